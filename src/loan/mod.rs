//! Loan domain module
//!
//! Lifecycle rules, persistence, per-loan locking, and outbound events for
//! the propose, approve, invest, disburse flow.

mod agreement;
mod error;
mod events;
mod lifecycle;
mod locks;
mod memory_store;
mod model;
mod pg_store;
mod service;
mod store;

pub use agreement::AgreementLocator;
pub use error::{BusinessError, LoanError, LoanResult, StoreError};
pub use events::{
    AgreementDispatcher, AgreementNotifier, FundedLoanQueue, LoanEvent, LoanEventBus, RetryPolicy,
    TracingNotifier,
};
pub use lifecycle::{InvalidTransition, LoanAction};
pub use locks::{LoanGuard, LoanLocks};
pub use memory_store::InMemoryLoanStore;
pub use model::*;
pub use pg_store::PgLoanStore;
pub use service::{InvestmentReceipt, LoanService, DEFAULT_OPERATION_TIMEOUT};
pub use store::{InvestmentApplied, LoanStore};
