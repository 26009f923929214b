//! Axum router and all HTTP handlers for pdk-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.  All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pdk_schemas::AccountId;
use pdk_settlement::SettlementError;
use uuid::Uuid;

use crate::{
    api_types::{
        ErrorResponse, HealthResponse, OrdersResponse, PositionsResponse, TradeRequest,
        TradeResponse,
    },
    state::AppState,
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/accounts", post(create_account))
        .route("/v1/accounts/:id/orders", get(list_orders))
        .route("/v1/accounts/:id/positions", get(list_positions))
        .route("/v1/trade/buy", post(trade_buy))
        .route("/v1/trade/sell", post(trade_sell))
        .with_state(state)
}

/// Business-rule refusals are the caller's fault (400); everything else is
/// a server fault (500).  Bodies always carry `{"error": "..."}`.
fn error_response(err: SettlementError) -> Response {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/accounts
// ---------------------------------------------------------------------------

/// Open a fresh paper account with the configured starting balance.
pub(crate) async fn create_account(State(st): State<Arc<AppState>>) -> Response {
    let account = pdk_schemas::Account {
        account_id: AccountId::new_v4(),
        cash_micros: st.initial_cash,
        version: 0,
    };
    match st.engine.store().create_account(account.clone()).await {
        Ok(()) => (StatusCode::CREATED, Json(account)).into_response(),
        Err(err) => error_response(err.into()),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/trade/buy  /v1/trade/sell
// ---------------------------------------------------------------------------

pub(crate) async fn trade_buy(
    State(st): State<Arc<AppState>>,
    Json(req): Json<TradeRequest>,
) -> Response {
    let cmd = match req.to_command() {
        Ok(cmd) => cmd,
        Err(reason) => return error_response(SettlementError::InvalidInput { reason }),
    };
    match st.engine.settle_buy(cmd).await {
        Ok(settled) => (
            StatusCode::OK,
            Json(TradeResponse {
                account: settled.account,
                order: settled.order,
                position: settled.position,
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn trade_sell(
    State(st): State<Arc<AppState>>,
    Json(req): Json<TradeRequest>,
) -> Response {
    let cmd = match req.to_command() {
        Ok(cmd) => cmd,
        Err(reason) => return error_response(SettlementError::InvalidInput { reason }),
    };
    match st.engine.settle_sell(cmd).await {
        Ok(settled) => (
            StatusCode::OK,
            Json(TradeResponse {
                account: settled.account,
                order: settled.order,
                position: settled.position,
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/accounts/{id}/orders
// ---------------------------------------------------------------------------

pub(crate) async fn list_orders(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match st.engine.orders(AccountId(id)).await {
        Ok(orders) => (StatusCode::OK, Json(OrdersResponse { orders })).into_response(),
        Err(err) => error_response(err),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/accounts/{id}/positions
// ---------------------------------------------------------------------------

pub(crate) async fn list_positions(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match st.engine.positions(AccountId(id)).await {
        Ok(positions) => (StatusCode::OK, Json(PositionsResponse { positions })).into_response(),
        Err(err) => error_response(err),
    }
}
