//! Axum router and HTTP handlers.
//!
//! The control surface touches exactly two pieces of simulator state:
//! `simulation_state.is_running` for start/stop, and (on reset) the
//! simulation-scoped tables plus the cursor. Everything else is read-only.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::info;

use crate::api_types::{
    ErrorResponse, HealthResponse, OkResponse, ResultRow, ResultsResponse, SimStatusResponse,
    StartRequest,
};
use crate::state::AppState;

/// Build the complete application router wired to the given shared state.
/// Middleware layers (CORS, tracing) are attached by `main.rs` so tests can
/// use the bare router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/sim/status", get(sim_status))
        .route("/v1/sim/start", post(sim_start))
        .route("/v1/sim/stop", post(sim_stop))
        .route("/v1/sim/reset", post(sim_reset))
        .route("/v1/sim/results", get(sim_results))
        .with_state(state)
}

fn internal_error(e: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<AppState>) -> impl IntoResponse {
    let ok = match sim_db::status(&st.pool).await {
        Ok(db) => db.ok && db.has_schema,
        Err(_) => false,
    };
    (
        if ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE },
        Json(HealthResponse {
            ok,
            service: st.build.service,
            version: st.build.version,
            instance_id: st.instance_id,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/sim/status
// ---------------------------------------------------------------------------

pub(crate) async fn sim_status(State(st): State<AppState>) -> Response {
    let snapshot = async {
        let state = sim_db::ensure_sim_state(&st.pool, st.user_id).await?;
        let executions = sim_db::execution_count(&st.pool, st.user_id).await?;
        let trades = sim_db::trade_count(&st.pool, st.user_id).await?;
        let open_positions = sim_db::open_position_count(&st.pool, st.user_id).await?;
        let latest = sim_db::latest_execution_status(&st.pool, st.user_id).await?;
        anyhow::Ok(SimStatusResponse {
            is_running: state.is_running == "true",
            last_ts: state.last_ts,
            executions,
            trades,
            open_positions,
            latest_status: latest.as_ref().map(|(s, _)| s.clone()),
            latest_reason: latest.and_then(|(_, r)| r),
        })
    }
    .await;

    match snapshot {
        Ok(snap) => (StatusCode::OK, Json(snap)).into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/sim/start
// ---------------------------------------------------------------------------

pub(crate) async fn sim_start(
    State(st): State<AppState>,
    body: Option<Json<StartRequest>>,
) -> Response {
    let req = body.map(|Json(b)| b).unwrap_or_default();

    if let Some(epoch) = req.start_epoch {
        let seed = chrono::DateTime::from_timestamp(epoch, 0);
        match seed {
            Some(ts) => {
                if let Err(e) = sim_db::set_last_ts(&st.pool, st.user_id, Some(ts)).await {
                    return internal_error(e);
                }
            }
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: format!("invalid start_epoch {epoch}"),
                    }),
                )
                    .into_response()
            }
        }
    }

    if let Err(e) = sim_db::set_is_running(&st.pool, st.user_id, true).await {
        return internal_error(e);
    }
    info!("sim/start");
    (StatusCode::OK, Json(OkResponse { ok: true })).into_response()
}

// ---------------------------------------------------------------------------
// POST /v1/sim/stop
// ---------------------------------------------------------------------------

pub(crate) async fn sim_stop(State(st): State<AppState>) -> Response {
    if let Err(e) = sim_db::set_is_running(&st.pool, st.user_id, false).await {
        return internal_error(e);
    }
    info!("sim/stop");
    (StatusCode::OK, Json(OkResponse { ok: true })).into_response()
}

// ---------------------------------------------------------------------------
// POST /v1/sim/reset
// ---------------------------------------------------------------------------

/// Reset clears the cursor, truncates simulation-scoped tables and reseeds
/// the mock account. Refused while the loop is running.
pub(crate) async fn sim_reset(State(st): State<AppState>) -> Response {
    match sim_db::load_sim_state(&st.pool, st.user_id).await {
        Ok(Some(state)) if state.is_running == "true" => {
            return (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: "stop the simulation before resetting".to_string(),
                }),
            )
                .into_response()
        }
        Ok(_) => {}
        Err(e) => return internal_error(e),
    }

    if let Err(e) =
        sim_db::reset_sim_scope(&st.pool, st.user_id, st.cfg.broker.starting_cash).await
    {
        return internal_error(e);
    }
    info!("sim/reset");
    (StatusCode::OK, Json(OkResponse { ok: true })).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/sim/results
// ---------------------------------------------------------------------------

pub(crate) async fn sim_results(State(st): State<AppState>) -> Response {
    match sim_db::list_results(&st.pool).await {
        Ok(rows) => {
            let results = rows
                .into_iter()
                .map(|r| ResultRow {
                    symbol: r.symbol,
                    strategy: r.strategy,
                    timeframe: r.timeframe,
                    start_ts: r.start_ts,
                    end_ts: r.end_ts,
                    final_pnl_amount: r.final_pnl_amount,
                    final_pnl_percent: r.final_pnl_percent,
                    trades_count: r.trades_count,
                    max_drawdown: r.max_drawdown,
                    avg_pnl_per_trade: r.avg_pnl_per_trade,
                    avg_trade_duration_sec: r.avg_trade_duration_sec,
                })
                .collect();
            (StatusCode::OK, Json(ResultsResponse { results })).into_response()
        }
        Err(e) => internal_error(e),
    }
}
