//! Loan route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn loan_routes() -> Router<AppState> {
    Router::new()
        .route("/api/loans", get(list_loans).post(propose_loan))
        .route("/api/loans/:loan_id", get(get_loan))
        .route("/api/loans/:loan_id/approve", post(approve_loan))
        .route("/api/loans/:loan_id/invest", post(invest_loan))
        .route("/api/loans/:loan_id/disburse", post(disburse_loan))
        .route("/api/loans/:loan_id/investments", get(list_loan_investments))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
