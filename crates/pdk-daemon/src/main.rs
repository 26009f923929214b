//! pdk-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, picks the backing
//! store, spawns the performance scheduler, wires middleware, and starts the
//! HTTP server.  All route handlers live in `routes.rs`; shared state lives
//! in `state.rs`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use pdk_daemon::{routes, state};
use pdk_perf::{HttpQuoteProvider, PerformanceScheduler};
use pdk_store::{MemoryStore, PgStore, SettlementStore, ENV_DB_URL};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).  Silent if the file
    // does not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let store = select_store().await?;
    let shared = Arc::new(state::AppState::new(
        Arc::clone(&store),
        state::initial_cash_from_env(),
    ));

    spawn_scheduler(store);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8910)));
    info!("pdk-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

/// Postgres when `PDK_DATABASE_URL` is set, in-memory otherwise.
async fn select_store() -> anyhow::Result<Arc<dyn SettlementStore>> {
    if std::env::var(ENV_DB_URL).is_ok() {
        let store = PgStore::connect_from_env()
            .await
            .context("connecting to postgres")?;
        info!("using postgres store");
        Ok(Arc::new(store))
    } else {
        warn!("{ENV_DB_URL} unset; using in-memory store (state is lost on restart)");
        Ok(Arc::new(MemoryStore::new()))
    }
}

/// The performance sweep needs a quote source; without one the scheduler
/// stays off and trade settlement runs normally.
fn spawn_scheduler(store: Arc<dyn SettlementStore>) {
    match HttpQuoteProvider::from_env() {
        Some(quotes) => {
            let interval = pdk_perf::interval_from_env();
            info!(interval_secs = interval.as_secs(), "performance scheduler enabled");
            Arc::new(PerformanceScheduler::new(store, Arc::new(quotes))).spawn(interval);
        }
        None => warn!(
            "{} unset; performance scheduler disabled",
            pdk_perf::ENV_QUOTE_BASE_URL
        ),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("PDK_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
