use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use crate::{
    context::request_id,
    proto::{Ping, PingReply, PingRequest, PingServer, WatchRequest},
    server::Gatehouse,
    stage::MethodInfo,
};

pub const PING_METHOD: &str = "/gatehouse.Ping/Ping";
pub const WATCH_METHOD: &str = "/gatehouse.Ping/Watch";

/// Upper bound on replies produced by a single `Watch` call.
pub const MAX_WATCH_REPLIES: u32 = 1000;

/// Echo service whose methods run behind the [`Gatehouse`] pipeline.
#[derive(Debug, Clone)]
pub struct PingService {
    gatehouse: Gatehouse,
}

impl PingService {
    pub fn new(gatehouse: Gatehouse) -> Self {
        Self { gatehouse }
    }

    pub fn into_server(self) -> PingServer<Self> {
        PingServer::new(self)
    }
}

fn tagged_id<T>(request: &Request<T>) -> String {
    request_id(request.extensions()).unwrap_or_default().to_string()
}

#[tonic::async_trait]
impl Ping for PingService {
    async fn ping(&self, request: Request<PingRequest>) -> Result<Response<PingReply>, Status> {
        let info = MethodInfo::unary(PING_METHOD);
        self.gatehouse
            .unary(&info, request, |request: Request<PingRequest>| async move {
                let request_id = tagged_id(&request);
                Ok(Response::new(PingReply {
                    message: request.into_inner().message,
                    request_id,
                    sequence: 0,
                }))
            })
            .await
    }

    type WatchStream = ReceiverStream<Result<PingReply, Status>>;

    async fn watch(&self, request: Request<WatchRequest>) -> Result<Response<Self::WatchStream>, Status> {
        let info = MethodInfo::streaming(WATCH_METHOD);
        self.gatehouse
            .server_streaming(
                &info,
                request,
                |request: Request<WatchRequest>, sink: mpsc::Sender<Result<PingReply, Status>>| async move {
                    let request_id = tagged_id(&request);
                    let WatchRequest { message, count } = request.into_inner();

                    for sequence in 0..u64::from(count.min(MAX_WATCH_REPLIES)) {
                        let reply = PingReply {
                            message: message.clone(),
                            request_id: request_id.clone(),
                            sequence,
                        };
                        // Client went away
                        if sink.send(Ok(reply)).await.is_err() {
                            break;
                        }
                    }
                    Ok(())
                },
            )
            .await
    }
}
