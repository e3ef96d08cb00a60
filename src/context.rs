//! Typed values carried in request extensions.

use std::sync::Arc;
use tonic::Extensions;

/// Metadata key used to propagate a request ID from an upstream caller.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation identifier attached to every request that passed the gates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(pub String);

impl RequestId {
    /// A fresh random identifier (UUID v4, 32 hex digits).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The authenticated caller, set by an authenticator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    pub subject: String,
    pub tenant: String,
    pub client_id: String,
    pub scopes: Vec<String>,
}

impl Actor {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Name of the policy group a request resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyGroup(pub Arc<str>);

pub fn request_id(extensions: &Extensions) -> Option<&str> {
    extensions.get::<RequestId>().map(RequestId::as_str)
}

pub fn actor(extensions: &Extensions) -> Option<&Actor> {
    extensions.get::<Actor>()
}

pub fn policy_group(extensions: &Extensions) -> Option<&str> {
    extensions.get::<PolicyGroup>().map(|g| &*g.0)
}
