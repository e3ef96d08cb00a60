use futures::{future::BoxFuture, FutureExt};
use std::{future::Future, sync::Arc};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Code, Request, Response, Status};
use tracing::{error, info};

use crate::{
    cache::{Cache, LocalCache},
    chain::{StreamChain, UnaryChain},
    error::{internal, Result},
    interceptors::{AuthGate, Authenticator, IpBlockGate, RateLimitGate, Recovery, RequestTagging, SpanStage},
    ipblock::IpBlocker,
    limiter::Limiter,
    metrics::Metrics,
    registry::Registry,
    resolver::{Resolved, Resolver},
    stage::{
        MethodInfo, Payload, Stage, StreamHandler, StreamInterceptor, StreamResult, UnaryHandler,
        UnaryInterceptor, UnaryResult,
    },
};

// Stage priorities. Lower values run first (outermost).
pub const PRIORITY_RECOVERY: i32 = 10;
pub const PRIORITY_IP_BLOCK: i32 = 20;
pub const PRIORITY_RATE_LIMIT: i32 = 25;
pub const PRIORITY_AUTH: i32 = 28;
pub const PRIORITY_REQUEST_ID: i32 = 30;
pub const PRIORITY_USER: i32 = 100;

// Items buffered between a streaming handler and the transport.
const STREAM_BUFFER: usize = 16;

/// Collects gate options and user stages. Built-in gates are registered
/// when [`build`](Self::build) runs, so the order in which options are
/// supplied never affects the composed chain.
#[derive(Default)]
pub struct GatehouseBuilder {
    registry: Registry,
    recovery: bool,
    request_id: bool,
    ip_blocker: Option<Arc<IpBlocker>>,
    rate_limit: Option<(f64, u32)>,
    resolver: Option<Resolver>,
    authenticator: Option<Arc<dyn Authenticator>>,
    metrics: Option<Arc<Metrics>>,
    cache: Option<Arc<dyn Cache>>,
}

impl GatehouseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The recommended production baseline: panic recovery plus request
    /// tagging.
    pub fn recommended() -> Self {
        Self::new().with_recovery()
    }

    /// Convert panics into `Internal` and tag every admitted request with
    /// a request ID.
    pub fn with_recovery(mut self) -> Self {
        self.recovery = true;
        self.request_id = true;
        self
    }

    /// Request tagging without recovery.
    pub fn with_request_id(mut self) -> Self {
        self.request_id = true;
        self
    }

    pub fn with_ip_blocker(mut self, blocker: IpBlocker) -> Self {
        self.ip_blocker = Some(Arc::new(blocker));
        self
    }

    /// Global token bucket: `rps` sustained, `burst` capacity. Methods whose
    /// resolved policy carries a rate limit use their group's bucket
    /// instead.
    pub fn with_rate_limit_global(mut self, rps: f64, burst: u32) -> Self {
        self.rate_limit = Some((rps, burst));
        self
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_auth(mut self, authenticator: impl Authenticator) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_cache(mut self, cache: impl Cache + 'static) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// In-process cache holding up to `max_entries` entries.
    pub fn with_local_cache(self, max_entries: u64) -> Self {
        self.with_cache(LocalCache::new(max_entries))
    }

    /// Instrument everything inside the user priority with an `rpc` span.
    pub fn with_span(mut self) -> Self {
        self.registry.add(PRIORITY_USER, Stage::both(SpanStage));
        self
    }

    pub fn with_unary_interceptor(mut self, interceptor: impl UnaryInterceptor) -> Self {
        self.registry.add(PRIORITY_USER, Stage::unary(interceptor));
        self
    }

    pub fn with_stream_interceptor(mut self, interceptor: impl StreamInterceptor) -> Self {
        self.registry.add(PRIORITY_USER, Stage::streaming(interceptor));
        self
    }

    /// Register one value on both lanes; any state inside it is shared.
    pub fn with_interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: UnaryInterceptor + StreamInterceptor,
    {
        self.registry.add(PRIORITY_USER, Stage::both(interceptor));
        self
    }

    /// Register the configured gates, sort and compose both chains.
    pub fn build(self) -> Result<Gatehouse> {
        let resolver = self.resolver.map(Arc::new);
        let mut registry = self.registry;

        if self.recovery {
            let recovery = match &self.metrics {
                Some(metrics) => Recovery::with_metrics(metrics.clone()),
                None => Recovery::new(),
            };
            registry.add(PRIORITY_RECOVERY, Stage::both(recovery));
        }
        if let Some(blocker) = &self.ip_blocker {
            registry.add(PRIORITY_IP_BLOCK, Stage::both(IpBlockGate::new(blocker.clone())));
        }
        if let Some((rps, burst)) = self.rate_limit {
            let gate = RateLimitGate::new(Limiter::new(rps, burst)?, resolver.clone())?;
            registry.add(PRIORITY_RATE_LIMIT, Stage::both(gate));
        }
        if let Some(authenticator) = self.authenticator {
            registry.add(PRIORITY_AUTH, Stage::both(AuthGate::from_arc(authenticator)));
        }
        if self.request_id {
            registry.add(PRIORITY_REQUEST_ID, Stage::both(RequestTagging));
        }

        let registered = registry.len();
        let (unary, stream) = registry.compose();
        info!(
            registered,
            unary = unary.len(),
            streaming = stream.len(),
            "Composed request pipeline"
        );

        Ok(Gatehouse {
            unary,
            stream,
            resolver,
            ip_blocker: self.ip_blocker,
            metrics: self.metrics,
            cache: self.cache,
        })
    }
}

/// A composed, immutable request pipeline. Cheap to clone and share
/// between tasks.
#[derive(Clone)]
pub struct Gatehouse {
    unary: UnaryChain,
    stream: StreamChain,
    resolver: Option<Arc<Resolver>>,
    ip_blocker: Option<Arc<IpBlocker>>,
    metrics: Option<Arc<Metrics>>,
    cache: Option<Arc<dyn Cache>>,
}

impl Gatehouse {
    pub fn builder() -> GatehouseBuilder {
        GatehouseBuilder::new()
    }

    pub fn unary_chain(&self) -> &UnaryChain {
        &self.unary
    }

    pub fn stream_chain(&self) -> &StreamChain {
        &self.stream
    }

    pub fn resolver(&self) -> Option<&Resolver> {
        self.resolver.as_deref()
    }

    /// Group and policy for a method, if a resolver is configured and a
    /// rule matches. Handlers use this to apply policy fields the gates do
    /// not enforce, such as the timeout.
    pub fn policy_for(&self, full_method: &str) -> Option<Resolved<'_>> {
        self.resolver.as_deref()?.resolve(full_method)
    }

    pub fn ip_blocker(&self) -> Option<&IpBlocker> {
        self.ip_blocker.as_deref()
    }

    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    /// The configured cache, if any.
    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.cache.as_ref()
    }

    /// Run a unary call through the chain. `handler` is only invoked when
    /// every stage admits the request.
    pub async fn unary<Req, Resp, F, Fut>(
        &self,
        info: &MethodInfo,
        request: Request<Req>,
        handler: F,
    ) -> std::result::Result<Response<Resp>, Status>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        F: FnOnce(Request<Req>) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<Response<Resp>, Status>> + Send + 'static,
    {
        let _timer = self
            .metrics
            .as_ref()
            .map(|m| m.start_request_timer(info.full_method()));

        let method = info.full_method().to_string();
        let handler: UnaryHandler = Box::new(move |request: Request<Payload>| -> BoxFuture<'static, UnaryResult> {
            async move {
                let request = restore_request::<Req>(request, &method)?;
                let (metadata, message, extensions) = handler(request).await?.into_parts();
                Ok(Response::from_parts(metadata, Box::new(message) as Payload, extensions))
            }
            .boxed()
        });

        let result = self
            .unary
            .call(erase_request(request), info, handler)
            .await
            .and_then(|response| restore_response::<Resp>(response, info.full_method()));

        self.record(info, result.as_ref().err());
        result
    }

    /// Run a streaming call through the chain. The handler owns the
    /// outbound half of the stream.
    pub async fn streaming<Req, F, Fut>(
        &self,
        info: &MethodInfo,
        request: Request<Req>,
        handler: F,
    ) -> std::result::Result<(), Status>
    where
        Req: Send + 'static,
        F: FnOnce(Request<Req>) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), Status>> + Send + 'static,
    {
        let _timer = self
            .metrics
            .as_ref()
            .map(|m| m.start_request_timer(info.full_method()));

        let method = info.full_method().to_string();
        let handler: StreamHandler = Box::new(move |request: Request<Payload>| -> BoxFuture<'static, StreamResult> {
            async move {
                let request = restore_request::<Req>(request, &method)?;
                handler(request).await
            }
            .boxed()
        });

        let result = self.stream.call(erase_request(request), info, handler).await;

        self.record(info, result.as_ref().err());
        result
    }

    /// Server-streaming adapter for tonic service impls. The chain runs on
    /// a spawned task; once every stage has admitted the request the
    /// response stream is returned and `handler` feeds it through the
    /// sender. A rejection before the handler starts is returned as the
    /// call's status. A failure after that is delivered as the last item of
    /// the stream.
    pub async fn server_streaming<Req, Item, F, Fut>(
        &self,
        info: &MethodInfo,
        request: Request<Req>,
        handler: F,
    ) -> std::result::Result<Response<ReceiverStream<std::result::Result<Item, Status>>>, Status>
    where
        Req: Send + 'static,
        Item: Send + 'static,
        F: FnOnce(Request<Req>, mpsc::Sender<std::result::Result<Item, Status>>) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), Status>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let gatehouse = self.clone();
        let task_info = info.clone();
        let sink = tx.clone();
        let task = tokio::spawn(async move {
            let result = gatehouse
                .streaming(&task_info, request, move |request: Request<Req>| async move {
                    let _ = started_tx.send(());
                    handler(request, sink).await
                })
                .await;
            if let Err(status) = &result {
                let _ = tx.send(Err(status.clone())).await;
            }
            result
        });

        if started_rx.await.is_ok() {
            return Ok(Response::new(ReceiverStream::new(rx)));
        }

        // The handler was dropped unstarted: a stage short-circuited.
        match task.await {
            Ok(Ok(())) => Ok(Response::new(ReceiverStream::new(rx))),
            Ok(Err(status)) => Err(status),
            Err(e) => {
                error!(method = info.full_method(), error = %e, "Streaming pipeline task failed");
                Err(internal())
            }
        }
    }

    fn record(&self, info: &MethodInfo, status: Option<&Status>) {
        if let Some(metrics) = &self.metrics {
            let code = status.map_or(Code::Ok, Status::code);
            metrics.record_request(info.full_method(), code);
        }
    }
}

impl std::fmt::Debug for Gatehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gatehouse")
            .field("unary_stages", &self.unary.len())
            .field("stream_stages", &self.stream.len())
            .field("resolver", &self.resolver.is_some())
            .field("ip_blocker", &self.ip_blocker.is_some())
            .field("metrics", &self.metrics.is_some())
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

fn erase_request<T: Send + 'static>(request: Request<T>) -> Request<Payload> {
    request.map(|message| Box::new(message) as Payload)
}

fn restore_request<T: 'static>(request: Request<Payload>, method: &str) -> std::result::Result<Request<T>, Status> {
    let (metadata, extensions, message) = request.into_parts();
    match message.downcast::<T>() {
        Ok(message) => Ok(Request::from_parts(metadata, extensions, *message)),
        Err(_) => {
            error!(method, "Request payload type changed inside the pipeline");
            Err(internal())
        }
    }
}

fn restore_response<T: 'static>(response: Response<Payload>, method: &str) -> std::result::Result<Response<T>, Status> {
    let (metadata, message, extensions) = response.into_parts();
    match message.downcast::<T>() {
        Ok(message) => Ok(Response::from_parts(metadata, *message, extensions)),
        Err(_) => {
            error!(method, "Response payload type changed inside the pipeline");
            Err(internal())
        }
    }
}
