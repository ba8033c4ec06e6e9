//! Loan ledger server library
//!
//! Loan lifecycle core (propose, approve, invest, disburse) plus the
//! configuration, persistence and HTTP layers that serve it.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod id;
pub mod loan;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
