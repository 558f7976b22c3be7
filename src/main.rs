mod config;
mod error;
mod gpu;
mod inference;
mod limiter;
mod metrics;
mod routes;
mod store;
mod usage;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use gpu::{GpuMonitor, NullSampler};
use inference::{InferenceEngine, MockEngine};
use limiter::RateLimiter;
use metrics::Metrics;
use usage::UsageAccountant;

pub struct AppState {
    pub limiter: RateLimiter,
    pub accountant: UsageAccountant,
    pub metrics: Arc<Metrics>,
    pub engine: Arc<dyn InferenceEngine>,
    pub model_name: String,
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

#[derive(Parser)]
#[command(name = "llm-gateway")]
#[command(about = "Text-generation gateway with per-key rate limiting and usage accounting")]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, env = "GATEWAY_HOST")]
    host: Option<String>,

    /// Port to bind to
    #[arg(short, long, env = "GATEWAY_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::from_env();

    let host = args.host.unwrap_or_else(|| config.host.clone());
    let port = args.port.unwrap_or(config.port);

    let metrics = Arc::new(Metrics::new().expect("Failed to build metrics registry"));

    // Redis if reachable, else in-memory for the process lifetime.
    let store = store::connect(&config).await;
    let limiter = RateLimiter::new(store.clone(), config.default_rate_limit);
    let accountant = UsageAccountant::new(store);

    info!("Loading model: {}", config.model_name);
    let engine: Arc<dyn InferenceEngine> = Arc::new(MockEngine::new());
    info!(
        "Serving limits: max_batch_size={}, max_concurrent_requests={}",
        config.max_batch_size, config.max_concurrent_requests
    );

    let state = Arc::new(AppState {
        limiter,
        accountant,
        metrics: metrics.clone(),
        engine,
        model_name: config.model_name.clone(),
    });

    // Metrics listener on its own port; a bind failure is logged, not fatal.
    let metrics_addr: SocketAddr = format!("{}:{}", host, config.metrics_port)
        .parse()
        .expect("Invalid metrics address");
    let metrics_router = metrics::router(metrics.clone());
    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(metrics_addr).await {
            Ok(listener) => {
                info!("Serving metrics on http://{metrics_addr}/metrics");
                if let Err(e) = axum::serve(listener, metrics_router).await {
                    warn!("Metrics server error: {e}");
                }
            }
            Err(e) => warn!("Failed to start metrics server: {e}"),
        }
    });

    let gpu_monitor = GpuMonitor::start(
        Arc::new(NullSampler),
        metrics,
        Duration::from_secs(config.gpu_poll_interval_secs),
    );

    let app = routes::router(state);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .expect("Invalid address");
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    gpu_monitor.stop().await;
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
