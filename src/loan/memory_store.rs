//! In-process loan store
//!
//! Used by the test suites and for running the server without Postgres.
//! All state sits behind one `RwLock`, and every write completes inside a
//! single guard, so no reader ever sees half an investment.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::error::StoreError;
use super::model::{Loan, LoanFilter, LoanInvestment, LoanStatus, LoanUpdate};
use super::store::{InvestmentApplied, LoanStore};

#[derive(Default)]
struct Tables {
    loans: BTreeMap<u64, Loan>,
    investments: BTreeMap<u64, LoanInvestment>,
}

/// `LoanStore` backed by in-memory tables
#[derive(Default)]
pub struct InMemoryLoanStore {
    tables: RwLock<Tables>,
}

impl InMemoryLoanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger rows across all loans
    pub async fn investment_count(&self) -> usize {
        self.tables.read().await.investments.len()
    }
}

fn insert_investment(tables: &mut Tables, investment: &LoanInvestment) -> Result<(), StoreError> {
    if tables.investments.contains_key(&investment.id) {
        return Err(StoreError::NothingWritten(format!(
            "duplicate loan investment id {}",
            investment.id
        )));
    }
    tables.investments.insert(investment.id, investment.clone());
    Ok(())
}

#[async_trait]
impl LoanStore for InMemoryLoanStore {
    async fn insert_loan(&self, loan: &Loan) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.loans.contains_key(&loan.id) {
            return Err(StoreError::NothingWritten(format!(
                "duplicate loan id {}",
                loan.id
            )));
        }
        tables.loans.insert(loan.id, loan.clone());
        Ok(())
    }

    async fn get_loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .loans
            .values()
            .filter(|loan| filter.matches(loan))
            .cloned()
            .collect())
    }

    async fn update_loan(&self, loan_id: u64, update: &LoanUpdate) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.loans.get_mut(&loan_id) {
            Some(loan) if loan.status == update.expected_status() => {
                update.apply_to(loan, Utc::now());
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn insert_loan_investment(&self, investment: &LoanInvestment) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        insert_investment(&mut tables, investment)
    }

    async fn apply_investment(
        &self,
        investment: &LoanInvestment,
    ) -> Result<Option<InvestmentApplied>, StoreError> {
        let mut tables = self.tables.write().await;

        let invested_amount = match tables.loans.get(&investment.loan_id) {
            Some(loan) if loan.status == LoanStatus::Approved => loan
                .invested_amount
                .checked_add(investment.amount)
                .ok_or(StoreError::AmountOverflow(investment.loan_id))?,
            _ => return Ok(None),
        };

        // Ledger row first: if it is rejected the loan stays untouched.
        insert_investment(&mut tables, investment)?;

        let now = Utc::now();
        let Some(loan) = tables.loans.get_mut(&investment.loan_id) else {
            return Ok(None);
        };
        loan.invested_amount = invested_amount;
        loan.updated_at = now;
        let reached_funding = loan.is_fully_funded();
        if reached_funding {
            LoanUpdate::MarkInvested.apply_to(loan, now);
        }

        Ok(Some(InvestmentApplied {
            invested_amount,
            principal_amount: loan.principal_amount,
            reached_funding,
        }))
    }

    async fn list_investments(&self, loan_id: u64) -> Result<Vec<LoanInvestment>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .investments
            .values()
            .filter(|investment| investment.loan_id == loan_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
