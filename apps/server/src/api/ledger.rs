use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use stockfolio_core::{
    transactions::{
        export_csv, import_csv, LedgerImportSummary, NewTransaction, SkippedRow,
        TransactionEvent, TransactionUpdate,
    },
    Instrument,
};

use crate::{error::ApiResult, main_lib::AppState};

#[derive(Debug, Deserialize)]
struct TransactionsQuery {
    code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportResponse {
    #[serde(flatten)]
    summary: LedgerImportSummary,
    skipped: Vec<SkippedRow>,
}

async fn list_instruments(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Instrument>>> {
    Ok(Json(state.ledger.list_held_instruments()?))
}

async fn upsert_instrument(
    State(state): State<Arc<AppState>>,
    Json(instrument): Json<Instrument>,
) -> ApiResult<Json<Instrument>> {
    Ok(Json(state.ledger.upsert_instrument(instrument).await?))
}

async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TransactionsQuery>,
) -> ApiResult<Json<Vec<TransactionEvent>>> {
    let events = match q.code.as_deref() {
        Some(code) => state.ledger.list_transactions(code)?,
        None => state.ledger.list_all_transactions()?,
    };
    Ok(Json(events))
}

async fn create_transaction(
    State(state): State<Arc<AppState>>,
    Json(new_transaction): Json<NewTransaction>,
) -> ApiResult<(StatusCode, Json<TransactionEvent>)> {
    let event = state.ledger.insert_transaction(new_transaction).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn update_transaction(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(mut update): Json<TransactionUpdate>,
) -> ApiResult<Json<TransactionEvent>> {
    update.id = id;
    Ok(Json(state.ledger.update_transaction(update).await?))
}

async fn delete_transaction(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<TransactionEvent>> {
    Ok(Json(state.ledger.delete_transaction(&id).await?))
}

/// Accepts a ledger CSV body. Malformed rows are reported, not fatal.
async fn import_ledger(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<ImportResponse>> {
    let decoded = import_csv(&body)?;
    let summary = state
        .ledger
        .import(decoded.instruments, decoded.events)
        .await?;
    tracing::info!(
        "Imported {} transactions ({} duplicates, {} rows skipped)",
        summary.transactions_inserted,
        summary.duplicates_skipped,
        decoded.skipped.len()
    );
    Ok(Json(ImportResponse {
        summary,
        skipped: decoded.skipped,
    }))
}

async fn export_ledger(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let instruments = state.ledger.list_held_instruments()?;
    let events = state.ledger.list_all_transactions()?;
    let content = export_csv(&instruments, &events)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"ledger.csv\"",
            ),
        ],
        content,
    ))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/instruments", get(list_instruments).put(upsert_instrument))
        .route(
            "/transactions",
            get(list_transactions).post(create_transaction),
        )
        .route(
            "/transactions/{id}",
            put(update_transaction).delete(delete_transaction),
        )
        .route("/ledger/import", post(import_ledger))
        .route("/ledger/export", get(export_ledger))
}
