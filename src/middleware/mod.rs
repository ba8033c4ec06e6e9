//! Middleware for the loan ledger API

mod tracing;

pub use tracing::{request_tracing, REQUEST_ID_HEADER};
