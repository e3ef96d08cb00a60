use async_trait::async_trait;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use tonic::{Extensions, Request};
use tracing::{debug, warn};

use crate::{
    chain::{StreamNext, UnaryNext},
    context::PolicyGroup,
    error::{self, Result},
    limiter::Limiter,
    policy::RateLimitRule,
    resolver::Resolver,
    stage::{MethodInfo, Payload, StreamInterceptor, StreamResult, UnaryInterceptor, UnaryResult},
};

/// Token-bucket admission. Methods whose resolved policy carries a rate
/// limit draw from that group's own limiter; everything else shares the
/// global one. One value serves both lanes, so unary and streaming calls
/// spend from the same buckets.
pub struct RateLimitGate {
    global: Limiter,
    resolver: Option<Arc<Resolver>>,
    groups: RwLock<HashMap<Arc<str>, Arc<Limiter>>>,
}

impl RateLimitGate {
    /// Every group rate limit is validated here so that a bad override is
    /// reported at configuration time rather than on first use.
    pub fn new(global: Limiter, resolver: Option<Arc<Resolver>>) -> Result<Self> {
        if let Some(resolver) = &resolver {
            for group in resolver.groups() {
                if let Some(rule) = group.get_policy().and_then(|p| p.rate_limit.as_ref()) {
                    Limiter::from_rule(rule).map_err(|e| match e {
                        error::GateError::InvalidRateLimit(reason) => error::GateError::InvalidRateLimit(
                            format!("group {:?}: {}", group.name(), reason),
                        ),
                        other => other,
                    })?;
                }
            }
        }

        Ok(Self {
            global,
            resolver,
            groups: RwLock::new(HashMap::new()),
        })
    }

    pub fn global(&self) -> &Limiter {
        &self.global
    }

    /// Number of per-group limiters created so far.
    pub fn group_limiters(&self) -> usize {
        self.groups.read().len()
    }

    /// Take one token for `full_method`. Returns whether the call is
    /// admitted and the policy group it resolved to.
    pub fn admit(&self, full_method: &str) -> (bool, Option<&str>) {
        let (allowed, group) = self.take(full_method);
        (allowed, group.map(|g| &**g))
    }

    fn take(&self, full_method: &str) -> (bool, Option<&Arc<str>>) {
        let Some(group) = self.resolver.as_deref().and_then(|r| r.resolve_group(full_method)) else {
            return (self.global.allow(), None);
        };

        let group_limiter = group
            .get_policy()
            .and_then(|p| p.rate_limit.as_ref())
            .and_then(|rule| self.group_limiter(group.shared_name(), rule));

        let allowed = match &group_limiter {
            Some(limiter) => limiter.allow(),
            None => self.global.allow(),
        };
        (allowed, Some(group.shared_name()))
    }

    fn group_limiter(&self, group: &Arc<str>, rule: &RateLimitRule) -> Option<Arc<Limiter>> {
        if let Some(limiter) = self.groups.read().get(group) {
            return Some(limiter.clone());
        }

        let mut groups = self.groups.write();
        if let Some(limiter) = groups.get(group) {
            return Some(limiter.clone());
        }

        match Limiter::from_rule(rule) {
            Ok(limiter) => {
                let limiter = Arc::new(limiter);
                groups.insert(group.clone(), limiter.clone());
                debug!(
                    group = &**group,
                    requests_per_second = limiter.requests_per_second(),
                    burst = limiter.burst(),
                    "Created group rate limiter"
                );
                Some(limiter)
            }
            Err(e) => {
                warn!(group = &**group, error = %e, "Invalid group rate limit, using global limiter");
                None
            }
        }
    }

    fn check(&self, extensions: &mut Extensions, info: &MethodInfo) -> bool {
        let (allowed, group) = self.take(info.full_method());
        if !allowed {
            debug!(method = info.full_method(), group = group.map(|g| &**g), "Request rejected by rate limit");
            return false;
        }
        if let Some(group) = group {
            extensions.insert(PolicyGroup(group.clone()));
        }
        true
    }
}

impl std::fmt::Debug for RateLimitGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitGate")
            .field("global", &self.global)
            .field("resolver", &self.resolver.is_some())
            .field("group_limiters", &self.group_limiters())
            .finish()
    }
}

#[async_trait]
impl UnaryInterceptor for RateLimitGate {
    async fn intercept(&self, mut request: Request<Payload>, info: &MethodInfo, next: UnaryNext<'_>) -> UnaryResult {
        if !self.check(request.extensions_mut(), info) {
            return Err(error::rate_limited());
        }
        next.run(request).await
    }
}

#[async_trait]
impl StreamInterceptor for RateLimitGate {
    async fn intercept(&self, mut request: Request<Payload>, info: &MethodInfo, next: StreamNext<'_>) -> StreamResult {
        if !self.check(request.extensions_mut(), info) {
            return Err(error::rate_limited());
        }
        next.run(request).await
    }
}
