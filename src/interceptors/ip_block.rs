use async_trait::async_trait;
use std::sync::Arc;
use tonic::Request;
use tracing::debug;

use crate::{
    chain::{StreamNext, UnaryNext},
    error,
    ipblock::IpBlocker,
    stage::{MethodInfo, Payload, StreamInterceptor, StreamResult, UnaryInterceptor, UnaryResult},
};

/// Rejects requests whose client address the [`IpBlocker`] does not admit.
#[derive(Debug, Clone)]
pub struct IpBlockGate {
    blocker: Arc<IpBlocker>,
}

impl IpBlockGate {
    /// Accepts an owned blocker or one already shared with the
    /// [`Gatehouse`](crate::server::Gatehouse).
    pub fn new(blocker: impl Into<Arc<IpBlocker>>) -> Self {
        Self {
            blocker: blocker.into(),
        }
    }

    pub fn blocker(&self) -> &IpBlocker {
        &self.blocker
    }

    fn admit<T>(&self, request: &Request<T>, info: &MethodInfo) -> bool {
        let admitted = self.blocker.evaluate_request(request);
        if !admitted {
            debug!(
                method = info.full_method(),
                peer = ?request.remote_addr(),
                "Request rejected by IP admission"
            );
        }
        admitted
    }
}

#[async_trait]
impl UnaryInterceptor for IpBlockGate {
    async fn intercept(&self, request: Request<Payload>, info: &MethodInfo, next: UnaryNext<'_>) -> UnaryResult {
        if !self.admit(&request, info) {
            return Err(error::blocked());
        }
        next.run(request).await
    }
}

#[async_trait]
impl StreamInterceptor for IpBlockGate {
    async fn intercept(&self, request: Request<Payload>, info: &MethodInfo, next: StreamNext<'_>) -> StreamResult {
        if !self.admit(&request, info) {
            return Err(error::blocked());
        }
        next.run(request).await
    }
}
