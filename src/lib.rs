//! Gatehouse
//!
//! A deterministic request pipeline for tonic gRPC services. Gates for
//! panic recovery, IP admission, rate limiting, authentication and request
//! tagging run at fixed priorities in front of user interceptors, so the
//! composed chain never depends on the order in which it was configured.
//! A method-level policy resolver maps fully-qualified method names to
//! named groups and their policies.

pub mod cache;
pub mod chain;
pub mod client_addr;
pub mod config;
pub mod context;
pub mod error;
pub mod interceptors;
pub mod ipblock;
pub mod limiter;
pub mod metrics;
pub mod policy;
pub mod proto;
pub mod registry;
pub mod resolver;
pub mod rule;
pub mod server;
pub mod service;
pub mod stage;

// Re-export main types
pub use cache::{Cache, LocalCache};
pub use config::{load_layered, load_settings_from_file, load_settings_from_yaml, Settings};
pub use error::{GateError, Result};
pub use ipblock::{IpBlockConfig, IpBlocker, Mode};
pub use limiter::Limiter;
pub use policy::{Group, Policy, RateLimitRule};
pub use resolver::{Resolved, Resolver};
pub use rule::Rule;
pub use server::{Gatehouse, GatehouseBuilder};
pub use service::PingService;
pub use stage::{MethodInfo, Payload, Stage, StreamInterceptor, UnaryInterceptor};
