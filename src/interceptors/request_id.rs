use async_trait::async_trait;
use tonic::Request;

use crate::{
    chain::{StreamNext, UnaryNext},
    context::{RequestId, REQUEST_ID_HEADER},
    stage::{MethodInfo, Payload, StreamInterceptor, StreamResult, UnaryInterceptor, UnaryResult},
};

/// Attaches a [`RequestId`] to every request that reaches it.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestTagging;

/// Keep an existing ID, adopt one propagated by the caller, or mint a new
/// one. Returns the ID now stored in the request extensions.
pub(crate) fn ensure_request_id<T>(request: &mut Request<T>) -> RequestId {
    if let Some(existing) = request.extensions().get::<RequestId>() {
        return existing.clone();
    }

    let id = request
        .metadata()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| RequestId(value.to_string()))
        .unwrap_or_else(RequestId::generate);

    request.extensions_mut().insert(id.clone());
    id
}

#[async_trait]
impl UnaryInterceptor for RequestTagging {
    async fn intercept(&self, mut request: Request<Payload>, _info: &MethodInfo, next: UnaryNext<'_>) -> UnaryResult {
        ensure_request_id(&mut request);
        next.run(request).await
    }
}

#[async_trait]
impl StreamInterceptor for RequestTagging {
    async fn intercept(&self, mut request: Request<Payload>, _info: &MethodInfo, next: StreamNext<'_>) -> StreamResult {
        ensure_request_id(&mut request);
        next.run(request).await
    }
}
