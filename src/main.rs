use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use prometheus::TextEncoder;
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tonic::transport::Server;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatehouse::{
    config::{load_layered, Settings},
    metrics::Metrics,
    server::Gatehouse,
    service::PingService,
};

#[derive(Clone)]
struct AppState {
    gatehouse: Gatehouse,
    metrics: Arc<Metrics>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatehouse=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting gatehouse");

    let metrics = Arc::new(Metrics::new()?);
    let settings = match std::env::var("CONFIG_PATH") {
        Ok(config_path) => {
            info!("Loading configuration from: {}", config_path);
            load_layered(&config_path)?
        }
        Err(_) => {
            info!("CONFIG_PATH not set, using default settings");
            Settings::default()
        }
    };

    let gatehouse = settings.into_builder()?.with_metrics(metrics.clone()).build()?;
    info!(?gatehouse, "Pipeline ready");

    let state = AppState { gatehouse, metrics };

    let http_addr = std::env::var("HTTP_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse::<SocketAddr>()?;
    let http_server = start_http_server(state.clone(), http_addr);

    let grpc_addr = std::env::var("GRPC_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8081".to_string())
        .parse::<SocketAddr>()?;
    let grpc_server = start_grpc_server(state.gatehouse, grpc_addr);

    info!("HTTP server listening on {}", http_addr);
    info!("gRPC server listening on {}", grpc_addr);

    // Wait for shutdown signal
    tokio::select! {
        result = http_server => {
            if let Err(e) = result {
                warn!("HTTP server error: {}", e);
            }
        }
        result = grpc_server => {
            if let Err(e) = result {
                warn!("gRPC server error: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    info!("Gatehouse stopped");
    Ok(())
}

async fn start_http_server(state: AppState, addr: SocketAddr) -> Result<()> {
    let app: Router = Router::new()
        .route("/healthcheck", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn start_grpc_server(gatehouse: Gatehouse, addr: SocketAddr) -> Result<()> {
    Server::builder()
        .add_service(PingService::new(gatehouse).into_server())
        .serve(addr)
        .await
        .map_err(|e| anyhow::anyhow!("gRPC server error: {}", e))?;

    Ok(())
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "unary_stages": state.gatehouse.unary_chain().len(),
        "stream_stages": state.gatehouse.stream_chain().len(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics) => Ok(metrics),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
