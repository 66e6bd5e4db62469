//! Leaderboard gateway: HTTP API, WebSocket push channel, write-through
//! engine, and the internal load simulator, composed in one process.

mod leaderboard_logic;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lib_common::configs::config_sys::AppConfig;
use lib_common::connections::cache_redis::RedisIndex;
use lib_common::connections::db_postgres::PostgresStore;
use lib_common::connections::{DurableStore, RankingIndex};
use lib_common::core::hub::Hub;
use lib_common::core::service::LeaderboardService;
use lib_common::core::worker_pool::{WorkerPool, WorkerPoolConfig};
use lib_common::jobs::simulator::{SimulationManager, SimulatorConfig};

use leaderboard_logic::state::AppState;
use leaderboard_logic::{downstream, handlers};

// Postgres pool sized for the worker pool width plus foreground queries.
const DB_MAX_CONNECTIONS: u32 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to set global tracing subscriber");

    let cfg = AppConfig::from_env();
    info!(%cfg, "configuration loaded");

    // Durable store first: migrations must run before anything writes.
    let store = Arc::new(PostgresStore::connect(&cfg.dsn(), DB_MAX_CONNECTIONS).await?);
    store.migrate().await?;
    info!("connected to PostgreSQL, migrations applied");

    let index = Arc::new(RedisIndex::connect(&cfg.redis_url()).await?);
    info!("connected to Redis");

    let worker_pool = Arc::new(WorkerPool::start(
        Arc::clone(&store),
        WorkerPoolConfig::default(),
    ));

    let service = Arc::new(LeaderboardService::new(
        Arc::clone(&index),
        Arc::clone(&store),
        Arc::clone(&worker_pool),
    ));

    // Cache loss leaves the durable rows as the only copy; rebuild the
    // index before serving reads from it.
    if index.cardinality().await? == 0 && store.count().await? > 0 {
        let count = service.sync_index_from_store().await?;
        info!(count, "ranking index recovered from durable store");
    }

    let hub = Arc::new(Hub::new(Arc::clone(&index)));
    let hub_token = CancellationToken::new();
    {
        let hub = Arc::clone(&hub);
        let token = hub_token.clone();
        tokio::spawn(async move { hub.run(token).await });
    }

    // The simulator drives the service directly; a failed start (for
    // example an unseeded database) must not take the server down.
    let simulator = Arc::new(SimulationManager::new(
        Arc::clone(&service),
        SimulatorConfig {
            tick_interval: Duration::from_millis(500),
            ..SimulatorConfig::default()
        },
    ));
    if let Err(err) = simulator.start().await {
        warn!(%err, "simulator not started");
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = AppState {
        service: Arc::clone(&service),
        hub: Arc::clone(&hub),
    };

    let app = Router::new()
        .route("/", get(handlers::root))
        .route("/api/v1/scores", post(handlers::update_score))
        .route("/api/v1/leaderboard", get(handlers::get_leaderboard))
        .route("/api/v1/search/{username}", get(handlers::search_user))
        .route("/api/v1/health", get(handlers::health_check))
        .route("/ws", get(downstream::ws_handler))
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "server listening");

    // Shutdown order on SIGINT/SIGTERM: simulator first, then the HTTP
    // listener, then the worker pool drain, then the hub.
    let http_token = CancellationToken::new();
    {
        let simulator = Arc::clone(&simulator);
        let token = http_token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            simulator.stop().await;
            token.cancel();
        });
    }

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown({
            let token = http_token.clone();
            async move { token.cancelled().await }
        })
        .await?;

    info!("flushing pending durable writes");
    if let Err(err) = worker_pool.shutdown().await {
        warn!(%err, "worker pool did not drain cleanly");
    }

    hub_token.cancel();
    store.close().await;
    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
