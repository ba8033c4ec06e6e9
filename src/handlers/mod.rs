//! API handlers for the loan ledger server

mod health;
mod loan;

pub use health::health_check;
pub use loan::*;
