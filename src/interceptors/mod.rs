//! Built-in stages. Each gate is registered at a fixed priority by
//! [`GatehouseBuilder`](crate::server::GatehouseBuilder); the span stage
//! runs at user priority.

pub mod auth;
pub mod ip_block;
pub mod rate_limit;
pub mod recovery;
pub mod request_id;
pub mod span;

pub use auth::{AuthGate, Authenticator};
pub use ip_block::IpBlockGate;
pub use rate_limit::RateLimitGate;
pub use recovery::Recovery;
pub use request_id::RequestTagging;
pub use span::SpanStage;
