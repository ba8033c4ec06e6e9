//! Persistence contract for loans and their investment ledger

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::error::StoreError;
use super::model::{Loan, LoanFilter, LoanInvestment, LoanUpdate};

/// Result of atomically applying one investment
#[derive(Debug, Clone, PartialEq)]
pub struct InvestmentApplied {
    /// Running total after this investment
    pub invested_amount: Decimal,
    pub principal_amount: Decimal,
    /// True only for the call that moved the loan to `Invested`
    pub reached_funding: bool,
}

/// Storage backend for the loan lifecycle.
///
/// Implementations are shared between concurrent requests. Every write is
/// conditional on the row's current status, so a guard checked by the
/// service is re-checked by the store in the same unit of work.
#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn insert_loan(&self, loan: &Loan) -> Result<(), StoreError>;

    async fn get_loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>, StoreError>;

    /// Apply `update` to the loan if it is still in `update.expected_status()`.
    /// Returns the number of rows changed (0 when the guard no longer holds).
    async fn update_loan(&self, loan_id: u64, update: &LoanUpdate) -> Result<u64, StoreError>;

    /// Append a ledger row without touching the loan's running total.
    async fn insert_loan_investment(&self, investment: &LoanInvestment) -> Result<(), StoreError>;

    /// Record an investment as a single atomic unit: add to the running
    /// total, append the ledger row and, when the total reaches the
    /// principal, move the loan to `Invested`.
    ///
    /// Returns `None` (and writes nothing) when the loan is missing or no
    /// longer `Approved`.
    async fn apply_investment(
        &self,
        investment: &LoanInvestment,
    ) -> Result<Option<InvestmentApplied>, StoreError>;

    async fn list_investments(&self, loan_id: u64) -> Result<Vec<LoanInvestment>, StoreError>;

    /// Cheap connectivity check used by `/health`
    async fn ping(&self) -> Result<(), StoreError>;
}
