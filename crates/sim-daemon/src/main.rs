//! sim-daemon entry point.
//!
//! Thin on purpose: set up tracing, load config, connect + migrate the
//! database, bootstrap the analytics user and runner population, spawn the
//! scheduler loop, and serve the control surface. Handlers live in
//! `routes.rs`, the clock in `scheduler.rs`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

use sim_config::SimConfig;
use sim_daemon::{bootstrap, routes, scheduler::Scheduler, state::AppState};
use sim_runner::RunnerEngine;
use sim_strategy::StrategyRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; silent when the file does not exist. Production
    // injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cfg = Arc::new(SimConfig::from_env().context("configuration load failed")?);

    let pool = sim_db::connect_from_env().await?;
    sim_db::migrate(&pool).await?;

    let registry = StrategyRegistry::with_builtins();
    let mkt = sim_md::MarketData::new(cfg.engine.reference_clock_symbol.clone());

    let user = bootstrap::bootstrap(&pool, &cfg, &registry, &mkt).await?;

    // The engine judges data coverage against the run's virtual start.
    let sim_start = match cfg.timing.sim_start_epoch {
        Some(epoch) => chrono::DateTime::from_timestamp(epoch, 0)
            .with_context(|| format!("invalid SIM_START_EPOCH {epoch}"))?,
        None => mkt
            .earliest_any_timestamp(&pool)
            .await?
            .context("no historical data found; load bars before starting the daemon")?,
    };

    let engine = RunnerEngine::new((*cfg).clone(), registry, sim_start);
    let sched = Scheduler::new(pool.clone(), Arc::clone(&cfg), user.id, engine);
    tokio::spawn(async move {
        if let Err(e) = sched.run().await {
            tracing::error!(error = %e, "scheduler loop terminated");
        }
    });

    let app = routes::build_router(AppState::new(pool, Arc::clone(&cfg), user.id))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8090)));
    info!("sim-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("SIM_DAEMON_ADDR").ok()?.parse().ok()
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
