use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agora_gateway::config::Config;
use agora_gateway::db::pg::PgStore;
use agora_gateway::db::store::{MemoryStore, Persistence};
use agora_gateway::push::{HttpPushDispatcher, LogPushDispatcher, PushDispatcher};
use agora_gateway::AppState;

/// How often finished calls past their retention are pruned.
const CALL_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing, env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let store: Arc<dyn Persistence> = match &config.database_url {
        Some(url) => {
            let pool = agora_gateway::db::pool::connect(url).expect("failed to create database pool");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let push: Arc<dyn PushDispatcher> = match &config.push_gateway_url {
        Some(url) => Arc::new(HttpPushDispatcher::new(url)),
        None => Arc::new(LogPushDispatcher),
    };

    tracing::info!(
        worker_id = config.worker_id,
        heartbeat_interval_ms = config.heartbeat_interval_ms,
        rate_limit = config.rate_limit_max_events,
        push = config.push_gateway_url.is_some(),
        "gateway configured"
    );

    let state = AppState::new(config, store, push);
    state.calls.spawn_sweeper(CALL_SWEEP_INTERVAL);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(agora_gateway::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "gateway listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(?e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
