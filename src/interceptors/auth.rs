use async_trait::async_trait;
use std::sync::Arc;
use tonic::{metadata::MetadataMap, Extensions, Request, Status};
use tracing::debug;

use crate::{
    chain::{StreamNext, UnaryNext},
    error,
    stage::{MethodInfo, Payload, StreamInterceptor, StreamResult, UnaryInterceptor, UnaryResult},
};

/// Caller-supplied credential check. Implementations may enrich the
/// extensions, typically with an [`Actor`](crate::context::Actor), for the
/// stages and handler further in. Returning a [`tonic::Status`] (wrapped
/// in the `anyhow::Error`) sends that status to the caller verbatim; any
/// other error becomes `Unauthenticated`.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn authenticate(
        &self,
        full_method: &str,
        metadata: &MetadataMap,
        extensions: &mut Extensions,
    ) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> Authenticator for F
where
    F: Fn(&str, &MetadataMap, &mut Extensions) -> anyhow::Result<()> + Send + Sync + 'static,
{
    async fn authenticate(
        &self,
        full_method: &str,
        metadata: &MetadataMap,
        extensions: &mut Extensions,
    ) -> anyhow::Result<()> {
        self(full_method, metadata, extensions)
    }
}

/// Runs the configured [`Authenticator`] before the rest of the chain.
#[derive(Clone)]
pub struct AuthGate {
    authenticator: Arc<dyn Authenticator>,
}

impl AuthGate {
    pub fn new(authenticator: impl Authenticator) -> Self {
        Self {
            authenticator: Arc::new(authenticator),
        }
    }

    pub fn from_arc(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }

    async fn authenticate(&self, request: Request<Payload>, info: &MethodInfo) -> Result<Request<Payload>, Status> {
        let (metadata, mut extensions, message) = request.into_parts();
        match self
            .authenticator
            .authenticate(info.full_method(), &metadata, &mut extensions)
            .await
        {
            Ok(()) => Ok(Request::from_parts(metadata, extensions, message)),
            Err(err) => Err(rejection(err, info)),
        }
    }
}

fn rejection(err: anyhow::Error, info: &MethodInfo) -> Status {
    match err.downcast::<Status>() {
        Ok(status) => status,
        Err(err) => {
            debug!(method = info.full_method(), error = %err, "Authentication failed");
            error::unauthenticated()
        }
    }
}

#[async_trait]
impl UnaryInterceptor for AuthGate {
    async fn intercept(&self, request: Request<Payload>, info: &MethodInfo, next: UnaryNext<'_>) -> UnaryResult {
        let request = self.authenticate(request, info).await?;
        next.run(request).await
    }
}

#[async_trait]
impl StreamInterceptor for AuthGate {
    async fn intercept(&self, request: Request<Payload>, info: &MethodInfo, next: StreamNext<'_>) -> StreamResult {
        let request = self.authenticate(request, info).await?;
        next.run(request).await
    }
}
