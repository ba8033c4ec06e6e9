//! Route definitions for the loan ledger API

mod loan;

pub use loan::{health_routes, loan_routes};

use axum::Router;

use crate::middleware::request_tracing;
use crate::state::AppState;

/// Full API router with request tracing applied
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(loan_routes())
        .with_state(state)
        .layer(axum::middleware::from_fn(request_tracing))
}
