//! Read-only query service.

use super::{health_route, HttpError};
use crate::core::config::AnalyzerConfig;
use crate::core::{Origin, Protocol, StoredRecord};
use crate::storage::{ProtocolSummary, QueryService, SummaryChart, Timeline};
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Clone)]
struct AnalyzerState {
    queries: QueryService,
    config: Arc<AnalyzerConfig>,
}

impl AnalyzerState {
    /// Requested limit, defaulted and capped.
    fn limit(&self, requested: Option<usize>) -> Result<usize, HttpError> {
        match requested {
            Some(0) => Err(HttpError::BadRequest("limit must be greater than 0".to_string())),
            Some(limit) => Ok(limit.min(self.config.max_limit)),
            None => Ok(self.config.recent_limit),
        }
    }
}

/// Query parameters for record listings.
#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    /// Origin tag, `LIVE` or `PCAP`
    source: Option<String>,
    /// Protocol label, required by `/filter`
    protocol: Option<String>,
    limit: Option<usize>,
}

fn origin(source: Option<&str>) -> Result<Option<Origin>, HttpError> {
    source
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Origin>())
        .transpose()
        .map_err(HttpError::from)
}

/// Router for the query endpoints.
pub fn router(queries: QueryService, config: AnalyzerConfig) -> Router {
    let state = AnalyzerState {
        queries,
        config: Arc::new(config),
    };

    Router::new()
        .route("/packets", get(packets_handler))
        .route("/filter", get(filter_handler))
        .route("/protocol_summary", get(summary_handler))
        .route("/protocol_summary_chart", get(chart_handler))
        .route("/packet_timeline", get(timeline_handler))
        .merge(health_route("analyzer"))
        .with_state(state)
}

/// GET /packets - Most recent records, newest first
async fn packets_handler(
    State(state): State<AnalyzerState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<StoredRecord>>, HttpError> {
    let limit = state.limit(params.limit)?;
    let origin = origin(params.source.as_deref())?;
    Ok(Json(state.queries.recent(limit, origin).await?))
}

/// GET /filter - Most recent records with one protocol label
async fn filter_handler(
    State(state): State<AnalyzerState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<StoredRecord>>, HttpError> {
    let protocol: Protocol = params
        .protocol
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| HttpError::BadRequest("protocol parameter is required".to_string()))?
        .parse()?;
    let limit = state.limit(params.limit)?;
    let origin = origin(params.source.as_deref())?;

    Ok(Json(state.queries.by_protocol(protocol, limit, origin).await?))
}

/// GET /protocol_summary - Counts per label and origin
async fn summary_handler(State(state): State<AnalyzerState>) -> Result<Json<ProtocolSummary>, HttpError> {
    Ok(Json(state.queries.protocol_summary().await?))
}

/// GET /protocol_summary_chart - Counts per label
async fn chart_handler(State(state): State<AnalyzerState>) -> Result<Json<SummaryChart>, HttpError> {
    Ok(Json(state.queries.summary_chart().await?))
}

/// GET /packet_timeline - Per-second histogram of recent records
async fn timeline_handler(State(state): State<AnalyzerState>) -> Result<Json<Timeline>, HttpError> {
    Ok(Json(state.queries.timeline().await?))
}
