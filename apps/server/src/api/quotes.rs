use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use stockfolio_core::instruments::normalize_code;
use stockfolio_market_data::{Quote, QuoteMap};

use crate::{
    error::{ApiError, ApiResult},
    main_lib::AppState,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshStatus {
    source: &'static str,
    session_open: bool,
    fetching: bool,
    cached_quotes: usize,
}

fn refresh_status(state: &AppState) -> RefreshStatus {
    RefreshStatus {
        source: state.scheduler.source_id(),
        session_open: state.scheduler.is_session_open(),
        fetching: state.scheduler.is_fetching(),
        cached_quotes: state.quotes().len(),
    }
}

async fn get_quotes(State(state): State<Arc<AppState>>) -> Json<QuoteMap> {
    Json(QuoteMap::clone(&state.quotes().snapshot()))
}

async fn get_quote(
    Path(code): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Quote>> {
    state
        .quotes()
        .get(&normalize_code(&code))
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<RefreshStatus> {
    Json(refresh_status(&state))
}

/// Starts or restarts the refresh loop.
async fn start_refresh(State(state): State<Arc<AppState>>) -> (StatusCode, Json<RefreshStatus>) {
    state.scheduler.start_fetching();
    (StatusCode::ACCEPTED, Json(refresh_status(&state)))
}

async fn stop_refresh(State(state): State<Arc<AppState>>) -> StatusCode {
    state.scheduler.stop_fetching();
    StatusCode::NO_CONTENT
}

async fn refresh_stock(
    Path(code): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Quote>> {
    let code = normalize_code(&code);
    if code.is_empty() {
        return Err(ApiError::BadRequest("Instrument code is required".to_string()));
    }
    state
        .scheduler
        .refresh_stock(&code)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/quotes", get(get_quotes))
        .route("/quotes/status", get(get_status))
        .route("/quotes/refresh", post(start_refresh).delete(stop_refresh))
        .route("/quotes/{code}", get(get_quote))
        .route("/quotes/{code}/refresh", post(refresh_stock))
}
