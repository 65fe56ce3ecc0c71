//! Persistence service.

use super::{health_route, HttpError};
use crate::core::ParsedRecord;
use crate::storage::StoreWriter;
use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
    routing::post,
    Router,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct StoreResponse {
    status: &'static str,
    id: i64,
}

/// Router for `/store`.
pub fn router(writer: StoreWriter) -> Router {
    Router::new()
        .route("/store", post(store_handler))
        .merge(health_route("persistor"))
        .with_state(writer)
}

/// POST /store - Append one record
async fn store_handler(
    State(writer): State<StoreWriter>,
    payload: Result<Json<ParsedRecord>, JsonRejection>,
) -> Result<Json<StoreResponse>, HttpError> {
    let Json(record) = payload?;
    let id = writer.write(record).await?;
    Ok(Json(StoreResponse { status: "stored", id }))
}
