use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

use crate::{
    error::Result,
    rule::Rule,
};

/// Rate-limit override attached to a policy group: `rate` requests per
/// `window`. The same value is used as the burst capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub rate: u32,
    #[serde(with = "window_secs")]
    pub window: Duration,
}

impl RateLimitRule {
    pub fn new(rate: u32, window: Duration) -> Self {
        Self { rate, window }
    }

    pub fn per_second(rate: u32) -> Self {
        Self::new(rate, Duration::from_secs(1))
    }

    pub fn per_minute(rate: u32) -> Self {
        Self::new(rate, Duration::from_secs(60))
    }

    /// Sustained rate in requests per second.
    pub fn requests_per_second(&self) -> f64 {
        if self.window.is_zero() {
            return 0.0;
        }
        f64::from(self.rate) / self.window.as_secs_f64()
    }
}

/// Per-method traffic policy. Plain data: the timeout is carried for the
/// dispatch layer and is not enforced by any gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    pub rate_limit: Option<RateLimitRule>,
    pub timeout: Option<Duration>,
    pub auth_required: bool,
}

/// A named bundle of matching rules and one optional policy.
#[derive(Debug, Clone)]
pub struct Group {
    name: Arc<str>,
    rules: Vec<Rule>,
    policy: Option<Policy>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            rules: Vec::new(),
            policy: None,
        }
    }

    pub fn exact(mut self, method: impl Into<String>) -> Self {
        self.rules.push(Rule::exact(method));
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.rules.push(Rule::prefix(prefix));
        self
    }

    /// Add a pattern rule. Fails if the pattern does not compile.
    pub fn pattern(mut self, pattern: &str) -> Result<Self> {
        self.rules.push(Rule::pattern(pattern)?);
        Ok(self)
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name as a shared string, cheap to clone into request state.
    pub fn shared_name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get_policy(&self) -> Option<&Policy> {
        self.policy.as_ref()
    }
}

mod window_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(window: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(window.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
