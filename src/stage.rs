//! Stage signatures shared by every gate and user interceptor.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::{any::Any, borrow::Cow, sync::Arc};
use tonic::{Request, Response, Status};

use crate::chain::{StreamNext, UnaryNext};

/// A type-erased request or response message.
pub type Payload = Box<dyn Any + Send>;

pub type UnaryResult = Result<Response<Payload>, Status>;

/// Streaming handlers own the outbound half of the stream and only report
/// whether the exchange succeeded.
pub type StreamResult = Result<(), Status>;

/// The real unary handler at the centre of the chain.
pub type UnaryHandler = Box<dyn FnOnce(Request<Payload>) -> BoxFuture<'static, UnaryResult> + Send>;

/// The real streaming handler at the centre of the chain.
pub type StreamHandler = Box<dyn FnOnce(Request<Payload>) -> BoxFuture<'static, StreamResult> + Send>;

/// Describes the method being invoked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodInfo {
    full_method: Cow<'static, str>,
    streaming: bool,
}

impl MethodInfo {
    /// `full_method` is the fully-qualified name, e.g.
    /// `/helloworld.Greeter/SayHello`.
    pub fn unary(full_method: impl Into<Cow<'static, str>>) -> Self {
        Self {
            full_method: full_method.into(),
            streaming: false,
        }
    }

    pub fn streaming(full_method: impl Into<Cow<'static, str>>) -> Self {
        Self {
            full_method: full_method.into(),
            streaming: true,
        }
    }

    pub fn full_method(&self) -> &str {
        &self.full_method
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// The `package.Service` part of the name.
    pub fn service(&self) -> &str {
        self.split().0
    }

    /// The bare method name.
    pub fn method(&self) -> &str {
        self.split().1
    }

    fn split(&self) -> (&str, &str) {
        let trimmed = self.full_method.trim_start_matches('/');
        trimmed.rsplit_once('/').unwrap_or(("", trimmed))
    }
}

/// A unary processing stage. Call `next.run(request)` to continue down the
/// chain, or return early to short-circuit it.
#[async_trait]
pub trait UnaryInterceptor: Send + Sync + 'static {
    async fn intercept(&self, request: Request<Payload>, info: &MethodInfo, next: UnaryNext<'_>) -> UnaryResult;
}

/// A streaming processing stage.
#[async_trait]
pub trait StreamInterceptor: Send + Sync + 'static {
    async fn intercept(&self, request: Request<Payload>, info: &MethodInfo, next: StreamNext<'_>) -> StreamResult;
}

/// One registry entry: a unary stage, a streaming stage, or both. A stage
/// with neither lane cannot be expressed.
#[derive(Clone)]
pub enum Stage {
    Unary(Arc<dyn UnaryInterceptor>),
    Streaming(Arc<dyn StreamInterceptor>),
    Both(Arc<dyn UnaryInterceptor>, Arc<dyn StreamInterceptor>),
}

impl Stage {
    pub fn unary(interceptor: impl UnaryInterceptor) -> Self {
        Stage::Unary(Arc::new(interceptor))
    }

    pub fn streaming(interceptor: impl StreamInterceptor) -> Self {
        Stage::Streaming(Arc::new(interceptor))
    }

    /// Use one value for both lanes; state inside it is shared by unary
    /// and streaming calls.
    pub fn both<I>(interceptor: I) -> Self
    where
        I: UnaryInterceptor + StreamInterceptor,
    {
        let shared = Arc::new(interceptor);
        Stage::Both(shared.clone(), shared)
    }

    pub fn unary_lane(&self) -> Option<&Arc<dyn UnaryInterceptor>> {
        match self {
            Stage::Unary(u) | Stage::Both(u, _) => Some(u),
            Stage::Streaming(_) => None,
        }
    }

    pub fn stream_lane(&self) -> Option<&Arc<dyn StreamInterceptor>> {
        match self {
            Stage::Streaming(s) | Stage::Both(_, s) => Some(s),
            Stage::Unary(_) => None,
        }
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lanes = match self {
            Stage::Unary(_) => "unary",
            Stage::Streaming(_) => "streaming",
            Stage::Both(_, _) => "unary+streaming",
        };
        f.debug_tuple("Stage").field(&lanes).finish()
    }
}
