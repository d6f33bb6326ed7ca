use anyhow::{Context, Result};
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod config;
mod handlers;
mod metrics;
mod registry;
mod ws;

use engine_link::{StatusSink, status_sink};

use crate::config::GatewayConfig;
use crate::metrics::GatewayMetrics;
use crate::registry::EngineRegistry;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "spikegate")]
#[command(about = "HTTP/WebSocket gateway for spiking engine processes")]
struct Cli {
    /// Custom data directory (defaults to ~/.spikegate)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Host to bind to (overrides configuration)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the web server (overrides configuration)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    /// Engine name → connection manager directory
    pub registry: Arc<EngineRegistry>,
    /// Gateway metrics for observability
    pub metrics: Arc<GatewayMetrics>,
    /// Broadcast sink feeding WebSocket subscribers
    pub sink: StatusSink,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "spike_gateway=debug,engine_link=debug,tower_http=debug,info"
    } else {
        "spike_gateway=info,engine_link=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting spikegate - engine gateway");

    let data_dir = cli.data_dir.unwrap_or_else(config::default_data_dir);
    let file_config: config::FileConfig = config::load_config(&data_dir)
        .extract()
        .context("invalid configuration")?;

    let mut gateway_config = GatewayConfig::from_file(&file_config);
    if let Some(host) = cli.host {
        gateway_config.host = host;
    }
    if let Some(port) = cli.port {
        gateway_config.port = port;
    }
    let config = Arc::new(gateway_config);
    info!(
        engines = config.engine_count(),
        engine_port = config.engine_port,
        "engine directory loaded"
    );

    let sink = status_sink(256);
    let registry = Arc::new(EngineRegistry::new(config.clone(), sink.clone()));
    let metrics = Arc::new(GatewayMetrics::new());

    let app_state = AppState {
        registry: registry.clone(),
        metrics,
        sink,
    };

    let app = handlers::routes()
        .fallback_service(ServeDir::new(&config.public_dir))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr = format!("{}:{}", config.host, config.port)
        .parse::<SocketAddr>()
        .context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let actual_addr = listener.local_addr()?;

    info!("spikegate listening on http://{}", actual_addr);
    info!("API endpoints:");
    info!("  GET  /api/engine/:engine/status      - Cached engine status");
    info!("  GET  /api/engine/:engine/fullstatus  - Full status poll");
    info!("  POST /api/engine/:engine/connection  - Connect / disconnect");
    info!("  POST /api/engine/:engine/passthrough - Forward a command");
    info!("  POST /api/engine/:engine/select      - Choose broadcast source");
    info!("  GET  /api/ws                         - Status feed (WebSocket)");

    // Create shutdown signal handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, cleaning up...");
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    info!("Disconnecting engines...");
    registry.shutdown().await;

    info!("Shutdown complete");
    server_result
}
