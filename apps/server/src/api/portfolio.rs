use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    extract::{Path, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures::Stream;
use stockfolio_core::portfolio::{PortfolioSnapshot, PortfolioSummary, PositionState};
use tokio_stream::{wrappers::WatchStream, StreamExt};

use crate::{
    error::{ApiError, ApiResult},
    main_lib::AppState,
};

async fn get_portfolio(State(state): State<Arc<AppState>>) -> ApiResult<Json<PortfolioSnapshot>> {
    Ok(Json(state.view.snapshot()?))
}

async fn get_holdings(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<PositionState>>> {
    Ok(Json(state.view.snapshot()?.holdings))
}

async fn get_summary(State(state): State<Arc<AppState>>) -> ApiResult<Json<PortfolioSummary>> {
    Ok(Json(state.view.snapshot()?.summary))
}

/// Includes sold-out positions, which the holdings list hides.
async fn get_position(
    Path(code): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<PositionState>> {
    state
        .view
        .position(&code)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn stream_portfolio(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = WatchStream::new(state.portfolio_feed.clone()).filter_map(|snapshot| {
        match SseEvent::default()
            .event("portfolio")
            .json_data(snapshot.as_ref())
        {
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                tracing::error!("Failed to serialize portfolio snapshot: {}", err);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/portfolio", get(get_portfolio))
        .route("/portfolio/holdings", get(get_holdings))
        .route("/portfolio/summary", get(get_summary))
        .route("/portfolio/positions/{code}", get(get_position))
        .route("/portfolio/stream", get(stream_portfolio))
}
