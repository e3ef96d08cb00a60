//! Onion composition of stage sequences.
//!
//! A chain is a frozen slice of stages. Invoking it hands the request to
//! the first stage together with a continuation over the remaining slice;
//! the last continuation calls the real handler. An empty chain calls the
//! handler directly and a single-stage chain calls that stage directly.

use std::sync::Arc;
use tonic::Request;

use crate::stage::{
    MethodInfo, Payload, StreamHandler, StreamInterceptor, StreamResult, UnaryHandler,
    UnaryInterceptor, UnaryResult,
};

/// Continuation handed to a unary stage.
pub struct UnaryNext<'a> {
    stages: &'a [Arc<dyn UnaryInterceptor>],
    info: &'a MethodInfo,
    handler: UnaryHandler,
}

impl<'a> UnaryNext<'a> {
    /// Invoke the rest of the chain.
    pub async fn run(self, request: Request<Payload>) -> UnaryResult {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = UnaryNext {
                    stages: rest,
                    info: self.info,
                    handler: self.handler,
                };
                stage.intercept(request, self.info, next).await
            }
            None => (self.handler)(request).await,
        }
    }
}

/// Continuation handed to a streaming stage.
pub struct StreamNext<'a> {
    stages: &'a [Arc<dyn StreamInterceptor>],
    info: &'a MethodInfo,
    handler: StreamHandler,
}

impl<'a> StreamNext<'a> {
    /// Invoke the rest of the chain.
    pub async fn run(self, request: Request<Payload>) -> StreamResult {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = StreamNext {
                    stages: rest,
                    info: self.info,
                    handler: self.handler,
                };
                stage.intercept(request, self.info, next).await
            }
            None => (self.handler)(request).await,
        }
    }
}

/// Composed unary entry point. Cheap to clone; never mutated.
#[derive(Clone)]
pub struct UnaryChain {
    stages: Arc<[Arc<dyn UnaryInterceptor>]>,
}

impl UnaryChain {
    /// `stages[0]` becomes the outermost layer.
    pub fn new(stages: Vec<Arc<dyn UnaryInterceptor>>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn call(&self, request: Request<Payload>, info: &MethodInfo, handler: UnaryHandler) -> UnaryResult {
        UnaryNext {
            stages: &self.stages,
            info,
            handler,
        }
        .run(request)
        .await
    }
}

impl Default for UnaryChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Composed streaming entry point. Cheap to clone; never mutated.
#[derive(Clone)]
pub struct StreamChain {
    stages: Arc<[Arc<dyn StreamInterceptor>]>,
}

impl StreamChain {
    /// `stages[0]` becomes the outermost layer.
    pub fn new(stages: Vec<Arc<dyn StreamInterceptor>>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn call(&self, request: Request<Payload>, info: &MethodInfo, handler: StreamHandler) -> StreamResult {
        StreamNext {
            stages: &self.stages,
            info,
            handler,
        }
        .run(request)
        .await
    }
}

impl Default for StreamChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::{future::BoxFuture, FutureExt};
    use parking_lot::Mutex;
    use tonic::{Response, Status};

    pub(crate) type Log = Arc<Mutex<Vec<String>>>;

    /// Records entry and exit around the rest of the chain.
    pub(crate) struct Tag {
        pub(crate) name: &'static str,
        pub(crate) log: Log,
    }

    #[async_trait]
    impl UnaryInterceptor for Tag {
        async fn intercept(&self, request: Request<Payload>, _info: &MethodInfo, next: UnaryNext<'_>) -> UnaryResult {
            self.log.lock().push(format!("{}:in", self.name));
            let result = next.run(request).await;
            self.log.lock().push(format!("{}:out", self.name));
            result
        }
    }

    #[async_trait]
    impl StreamInterceptor for Tag {
        async fn intercept(&self, request: Request<Payload>, _info: &MethodInfo, next: StreamNext<'_>) -> StreamResult {
            self.log.lock().push(format!("{}:in", self.name));
            let result = next.run(request).await;
            self.log.lock().push(format!("{}:out", self.name));
            result
        }
    }

    struct Reject;

    #[async_trait]
    impl UnaryInterceptor for Reject {
        async fn intercept(&self, _request: Request<Payload>, _info: &MethodInfo, _next: UnaryNext<'_>) -> UnaryResult {
            Err(Status::permission_denied("nope"))
        }
    }

    pub(crate) fn unary_handler(log: Log) -> UnaryHandler {
        Box::new(move |request: Request<Payload>| -> BoxFuture<'static, UnaryResult> {
            async move {
                log.lock().push("handler".to_string());
                Ok(Response::new(request.into_inner()))
            }
            .boxed()
        })
    }

    pub(crate) fn stream_handler(log: Log) -> StreamHandler {
        Box::new(move |_request: Request<Payload>| -> BoxFuture<'static, StreamResult> {
            async move {
                log.lock().push("handler".to_string());
                Ok(())
            }
            .boxed()
        })
    }

    fn payload(value: u32) -> Request<Payload> {
        Request::new(Box::new(value) as Payload)
    }

    #[tokio::test]
    async fn test_unary_onion_order() {
        let log = Log::default();
        let chain = UnaryChain::new(vec![
            Arc::new(Tag { name: "A", log: log.clone() }),
            Arc::new(Tag { name: "B", log: log.clone() }),
            Arc::new(Tag { name: "C", log: log.clone() }),
        ]);

        let info = MethodInfo::unary("/svc.Service/Get");
        let response = chain.call(payload(7), &info, unary_handler(log.clone())).await.unwrap();

        assert_eq!(*response.into_inner().downcast::<u32>().unwrap(), 7);
        assert_eq!(
            *log.lock(),
            vec!["A:in", "B:in", "C:in", "handler", "C:out", "B:out", "A:out"]
        );
    }

    #[tokio::test]
    async fn test_unary_empty_chain_calls_handler() {
        let log = Log::default();
        let chain = UnaryChain::default();
        assert!(chain.is_empty());

        let info = MethodInfo::unary("/svc.Service/Get");
        chain.call(payload(1), &info, unary_handler(log.clone())).await.unwrap();
        assert_eq!(*log.lock(), vec!["handler"]);
    }

    #[tokio::test]
    async fn test_unary_single_stage() {
        let log = Log::default();
        let chain = UnaryChain::new(vec![Arc::new(Tag { name: "only", log: log.clone() })]);
        assert_eq!(chain.len(), 1);

        let info = MethodInfo::unary("/svc.Service/Get");
        chain.call(payload(1), &info, unary_handler(log.clone())).await.unwrap();
        assert_eq!(*log.lock(), vec!["only:in", "handler", "only:out"]);
    }

    #[tokio::test]
    async fn test_unary_short_circuit_skips_inner_stages() {
        let log = Log::default();
        let chain = UnaryChain::new(vec![
            Arc::new(Tag { name: "outer", log: log.clone() }),
            Arc::new(Reject),
            Arc::new(Tag { name: "inner", log: log.clone() }),
        ]);

        let info = MethodInfo::unary("/svc.Service/Get");
        let err = chain.call(payload(1), &info, unary_handler(log.clone())).await.unwrap_err();

        assert_eq!(err.code(), tonic::Code::PermissionDenied);
        assert_eq!(*log.lock(), vec!["outer:in", "outer:out"]);
    }

    #[tokio::test]
    async fn test_stream_onion_order() {
        let log = Log::default();
        let chain = StreamChain::new(vec![
            Arc::new(Tag { name: "A", log: log.clone() }),
            Arc::new(Tag { name: "B", log: log.clone() }),
        ]);

        let info = MethodInfo::streaming("/svc.Service/Watch");
        chain.call(payload(1), &info, stream_handler(log.clone())).await.unwrap();
        assert_eq!(*log.lock(), vec!["A:in", "B:in", "handler", "B:out", "A:out"]);
    }

    #[tokio::test]
    async fn test_stream_empty_chain_calls_handler() {
        let log = Log::default();
        let info = MethodInfo::streaming("/svc.Service/Watch");
        StreamChain::default()
            .call(payload(1), &info, stream_handler(log.clone()))
            .await
            .unwrap();
        assert_eq!(*log.lock(), vec!["handler"]);
    }
}
