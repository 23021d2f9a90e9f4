use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use stockfolio_core::settings::RefreshSettings;

use crate::{error::ApiResult, main_lib::AppState};

async fn get_refresh_settings(State(state): State<Arc<AppState>>) -> Json<RefreshSettings> {
    Json(state.settings.current())
}

/// Takes effect from the running loop's next sleep; no restart needed.
async fn update_refresh_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<RefreshSettings>,
) -> ApiResult<Json<RefreshSettings>> {
    state.settings.update(settings)?;
    Ok(Json(state.settings.current()))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/settings/refresh",
        get(get_refresh_settings).put(update_refresh_settings),
    )
}
