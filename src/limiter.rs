use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::{fmt, num::NonZeroU32, time::Duration};

use crate::{
    error::{GateError, Result},
    policy::RateLimitRule,
};

/// Token-bucket admission primitive: `burst` tokens of capacity refilled
/// continuously at the sustained rate. Safe to share between tasks.
pub struct Limiter {
    inner: DefaultDirectRateLimiter,
    requests_per_second: f64,
    burst: u32,
}

impl Limiter {
    /// Create a limiter admitting `requests_per_second` on average with
    /// bursts of up to `burst` requests.
    pub fn new(requests_per_second: f64, burst: u32) -> Result<Self> {
        if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
            return Err(GateError::InvalidRateLimit(format!(
                "rate must be a positive number of requests per second, got {requests_per_second}"
            )));
        }
        let period = Duration::try_from_secs_f64(1.0 / requests_per_second)
            .map_err(|e| GateError::InvalidRateLimit(e.to_string()))?;
        Self::with_period(period, burst, requests_per_second)
    }

    /// Create the limiter for a policy override: `rate` tokens per
    /// `window`, with `rate` as the burst capacity.
    pub fn from_rule(rule: &RateLimitRule) -> Result<Self> {
        if rule.rate == 0 {
            return Err(GateError::InvalidRateLimit("rate must be at least 1".to_string()));
        }
        Self::with_period(rule.window / rule.rate, rule.rate, rule.requests_per_second())
    }

    fn with_period(period: Duration, burst: u32, requests_per_second: f64) -> Result<Self> {
        let burst_size = NonZeroU32::new(burst)
            .ok_or_else(|| GateError::InvalidRateLimit("burst must be at least 1".to_string()))?;
        let quota = Quota::with_period(period)
            .ok_or_else(|| {
                GateError::InvalidRateLimit(format!("replenish period {period:?} is too small"))
            })?
            .allow_burst(burst_size);

        Ok(Self {
            inner: RateLimiter::direct(quota),
            requests_per_second,
            burst,
        })
    }

    /// Take one token if available. Never waits.
    pub fn allow(&self) -> bool {
        self.inner.check().is_ok()
    }

    pub fn requests_per_second(&self) -> f64 {
        self.requests_per_second
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }
}

impl fmt::Debug for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("requests_per_second", &self.requests_per_second)
            .field("burst", &self.burst)
            .finish()
    }
}
