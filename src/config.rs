use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::{
    error::{GateError, Result},
    ipblock::{IpBlockConfig, IpBlocker},
    policy::{Group, Policy, RateLimitRule},
    resolver::Resolver,
    rule::Rule,
    server::GatehouseBuilder,
};

/// Environment variables starting with this prefix override file values,
/// e.g. `GATEHOUSE__RATE_LIMIT__BURST=50`.
pub const ENV_PREFIX: &str = "GATEHOUSE";

/// Declarative pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Panic recovery plus request tagging
    pub recovery: bool,
    /// Request tagging on its own
    pub request_id: bool,
    /// Wrap user stages in an `rpc` tracing span
    pub span: bool,
    pub ip_block: Option<IpBlockSettings>,
    pub rate_limit: Option<RateLimitSettings>,
    pub groups: Vec<GroupSettings>,
    pub cache: Option<CacheSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recovery: true,
            request_id: false,
            span: false,
            ip_block: None,
            rate_limit: None,
            groups: Vec::new(),
            cache: None,
        }
    }
}

/// IP admission settings; identical to the blocker's own config.
pub type IpBlockSettings = IpBlockConfig;

/// Global token bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub requests_per_second: f64,
    pub burst: u32,
}

/// A policy group as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSettings {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<RuleSettings>,
    pub policy: Option<PolicySettings>,
}

/// Exactly one of the three fields must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSettings {
    pub exact: Option<String>,
    pub prefix: Option<String>,
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub rate_limit: Option<RateLimitRule>,
    pub timeout_secs: Option<f64>,
    pub auth_required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub max_entries: u64,
}

impl RuleSettings {
    fn compile(&self, group: &str) -> Result<Rule> {
        match (&self.exact, &self.prefix, &self.pattern) {
            (Some(method), None, None) => Ok(Rule::exact(method.clone())),
            (None, Some(prefix), None) => Ok(Rule::prefix(prefix.clone())),
            (None, None, Some(pattern)) => Rule::pattern(pattern),
            _ => Err(GateError::Config(format!(
                "group {group:?}: each rule needs exactly one of exact, prefix or pattern"
            ))),
        }
    }
}

impl PolicySettings {
    fn compile(&self, group: &str) -> Result<Policy> {
        let timeout = self
            .timeout_secs
            .map(Duration::try_from_secs_f64)
            .transpose()
            .map_err(|e| GateError::Config(format!("group {group:?}: invalid timeout: {e}")))?;

        Ok(Policy {
            rate_limit: self.rate_limit,
            timeout,
            auth_required: self.auth_required,
        })
    }
}

impl GroupSettings {
    fn compile(&self) -> Result<Group> {
        let mut group = Group::new(self.name.clone());
        for rule in &self.rules {
            group = group.rule(rule.compile(&self.name)?);
        }
        if let Some(policy) = &self.policy {
            group = group.policy(policy.compile(&self.name)?);
        }
        Ok(group)
    }
}

impl Settings {
    /// Compile the settings into a builder. Every address, pattern and
    /// rate is validated here; the builder's `build` validates the rest.
    /// Authentication, metrics and user stages are code-level concerns and
    /// are attached to the returned builder by the caller.
    pub fn into_builder(self) -> Result<GatehouseBuilder> {
        let mut builder = GatehouseBuilder::new();

        if self.recovery {
            builder = builder.with_recovery();
        }
        if self.request_id {
            builder = builder.with_request_id();
        }
        if let Some(ip_block) = self.ip_block {
            builder = builder.with_ip_blocker(IpBlocker::new(ip_block)?);
        }
        if !self.groups.is_empty() {
            let groups = self
                .groups
                .iter()
                .map(GroupSettings::compile)
                .collect::<Result<Vec<_>>>()?;
            builder = builder.with_resolver(Resolver::new(groups));
        }
        if let Some(rate_limit) = self.rate_limit {
            builder = builder.with_rate_limit_global(rate_limit.requests_per_second, rate_limit.burst);
        }
        if let Some(cache) = self.cache {
            builder = builder.with_local_cache(cache.max_entries);
        }
        if self.span {
            builder = builder.with_span();
        }

        Ok(builder)
    }
}

/// Load settings from a YAML string
pub fn load_settings_from_yaml(yaml: &str) -> Result<Settings> {
    serde_yaml::from_str(yaml).map_err(|e| GateError::Config(format!("Failed to parse YAML: {}", e)))
}

/// Load settings from a YAML file
pub fn load_settings_from_file(path: &str) -> Result<Settings> {
    let content = std::fs::read_to_string(path)?;
    load_settings_from_yaml(&content)
}

/// Load settings from a YAML file, then apply `GATEHOUSE__*` environment
/// overrides. Nested keys are separated by a double underscore.
pub fn load_layered(path: &str) -> Result<Settings> {
    let settings = config::Config::builder()
        .add_source(config::File::new(path, config::FileFormat::Yaml))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize::<Settings>()?;

    info!(
        path,
        groups = settings.groups.len(),
        ip_block = settings.ip_block.is_some(),
        rate_limit = settings.rate_limit.is_some(),
        "Loaded gatehouse settings"
    );
    Ok(settings)
}
