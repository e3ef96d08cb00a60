// Generated protobuf types and gRPC service definitions
pub mod generated {
    tonic::include_proto!("gatehouse");
}

pub use generated::{
    ping_client::PingClient,
    ping_server::{Ping, PingServer},
    PingReply, PingRequest, WatchRequest,
};
