use std::sync::LazyLock;
use thiserror::Error;
use tonic::{Code, Status};

/// Result type for gatehouse configuration operations
pub type Result<T> = std::result::Result<T, GateError>;

/// Errors raised while assembling a gatehouse. None of these occur on the
/// request path; request failures are reported as [`tonic::Status`].
#[derive(Error, Debug)]
pub enum GateError {
    #[error("ipblock: invalid CIDR {value:?}: {reason}")]
    InvalidCidr { value: String, reason: String },

    #[error("ipblock: invalid trusted proxy {value:?}: {reason}")]
    InvalidTrustedProxy { value: String, reason: String },

    #[error("policy: invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("rate limit: {0}")]
    InvalidRateLimit(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Cache error: {0}")]
    Cache(String),
}

pub(crate) const BLOCKED_MESSAGE: &str = "blocked";
pub(crate) const RATE_LIMITED_MESSAGE: &str = "rate limit exceeded";
pub(crate) const UNAUTHENTICATED_MESSAGE: &str = "unauthenticated";
pub(crate) const INTERNAL_MESSAGE: &str = "internal server error";

// One value per outcome, built once. Every rejection is a clone of these.
static BLOCKED: LazyLock<Status> = LazyLock::new(|| Status::new(Code::PermissionDenied, BLOCKED_MESSAGE));
static RATE_LIMITED: LazyLock<Status> =
    LazyLock::new(|| Status::new(Code::ResourceExhausted, RATE_LIMITED_MESSAGE));
static UNAUTHENTICATED: LazyLock<Status> =
    LazyLock::new(|| Status::new(Code::Unauthenticated, UNAUTHENTICATED_MESSAGE));
static INTERNAL: LazyLock<Status> = LazyLock::new(|| Status::new(Code::Internal, INTERNAL_MESSAGE));

/// Rejection returned by the IP admission gate.
pub fn blocked() -> Status {
    BLOCKED.clone()
}

/// Rejection returned by the rate-limit gate.
pub fn rate_limited() -> Status {
    RATE_LIMITED.clone()
}

/// Rejection returned by the authentication gate when the authenticator
/// failed without choosing a status of its own.
pub fn unauthenticated() -> Status {
    UNAUTHENTICATED.clone()
}

/// Response produced by the recovery gate after a panic.
pub fn internal() -> Status {
    INTERNAL.clone()
}
