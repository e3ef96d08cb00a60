use async_trait::async_trait;
use tonic::Request;
use tracing::{info_span, Instrument, Span};

use crate::{
    chain::{StreamNext, UnaryNext},
    context::request_id,
    stage::{MethodInfo, Payload, StreamInterceptor, StreamResult, UnaryInterceptor, UnaryResult},
};

/// Runs the rest of the chain inside an `rpc` span.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpanStage;

fn rpc_span(request: &Request<Payload>, info: &MethodInfo) -> Span {
    info_span!(
        "rpc",
        method = info.full_method(),
        streaming = info.is_streaming(),
        request_id = request_id(request.extensions()).unwrap_or("-")
    )
}

#[async_trait]
impl UnaryInterceptor for SpanStage {
    async fn intercept(&self, request: Request<Payload>, info: &MethodInfo, next: UnaryNext<'_>) -> UnaryResult {
        let span = rpc_span(&request, info);
        next.run(request).instrument(span).await
    }
}

#[async_trait]
impl StreamInterceptor for SpanStage {
    async fn intercept(&self, request: Request<Payload>, info: &MethodInfo, next: StreamNext<'_>) -> StreamResult {
        let span = rpc_span(&request, info);
        next.run(request).instrument(span).await
    }
}
