use axum::{extract::State, Json};
use std::sync::Arc;

use crate::loan::LoanService;
use crate::models::HealthResponse;

/// Health check endpoint; pings the loan store
pub async fn health_check(State(service): State<Arc<LoanService>>) -> Json<HealthResponse> {
    let (status, database) = if service.is_healthy().await {
        ("healthy", "connected")
    } else {
        tracing::warn!("Health check failed to reach the loan store");
        ("unhealthy", "unreachable")
    };

    Json(HealthResponse {
        status: status.to_string(),
        database: database.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
