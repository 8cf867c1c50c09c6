//! Health check endpoint

use axum::{
    Json,
    extract::{Query, State as AxumState},
    response::IntoResponse,
};
use serde_json::json;
use std::collections::HashMap;

use crate::SharedState;

/// Root health check endpoint
/// Supports ?format=json for detailed JSON response
pub async fn root(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if params.get("format").map(String::as_str) == Some("json") {
        let config = &state.config;
        Json(json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at.to_rfc3339(),
            "uptime_seconds": state.start_time.elapsed().as_secs(),
            "workers": config.dispatch.workers,
            "queue_capacity": config.dispatch.queue_capacity,
            "status": "healthy"
        }))
        .into_response()
    } else {
        "githook - healthy".into_response()
    }
}
