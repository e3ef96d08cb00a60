use async_trait::async_trait;
use futures::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};
use tonic::Request;
use tracing::error;

use crate::{
    chain::{StreamNext, UnaryNext},
    error::internal,
    interceptors::request_id::ensure_request_id,
    metrics::Metrics,
    stage::{MethodInfo, Payload, StreamInterceptor, StreamResult, UnaryInterceptor, UnaryResult},
};

/// Outermost stage. A panic anywhere further down the chain becomes
/// `Internal("internal server error")` and no response; the panic payload
/// is logged but never sent to the caller.
#[derive(Clone, Default)]
pub struct Recovery {
    metrics: Option<Arc<Metrics>>,
}

impl Recovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics: Some(metrics),
        }
    }

    fn recovered(&self, info: &MethodInfo, request_id: &str, panic: Box<dyn Any + Send>) {
        error!(
            method = info.full_method(),
            request_id,
            panic = panic_message(panic.as_ref()),
            "Recovered from panic in request pipeline"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_panic_recovered();
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[async_trait]
impl UnaryInterceptor for Recovery {
    async fn intercept(&self, mut request: Request<Payload>, info: &MethodInfo, next: UnaryNext<'_>) -> UnaryResult {
        let request_id = ensure_request_id(&mut request);
        match AssertUnwindSafe(next.run(request)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                self.recovered(info, request_id.as_str(), panic);
                Err(internal())
            }
        }
    }
}

#[async_trait]
impl StreamInterceptor for Recovery {
    async fn intercept(&self, mut request: Request<Payload>, info: &MethodInfo, next: StreamNext<'_>) -> StreamResult {
        let request_id = ensure_request_id(&mut request);
        match AssertUnwindSafe(next.run(request)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                self.recovered(info, request_id.as_str(), panic);
                Err(internal())
            }
        }
    }
}
