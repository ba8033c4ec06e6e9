//! Loan lifecycle state machine
//!
//! `Proposed -> Approved -> Invested -> Disbursed`, one step at a time and
//! never backwards. Partial investments keep a loan in `Approved` and are
//! not transitions.

use serde::Serialize;
use thiserror::Error;

use super::model::LoanStatus;

/// Actions that move a loan to its next status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanAction {
    Approve,
    FundingReached,
    Disburse,
}

impl std::fmt::Display for LoanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoanAction::Approve => "approve",
            LoanAction::FundingReached => "funding_reached",
            LoanAction::Disburse => "disburse",
        };
        f.write_str(name)
    }
}

/// Rejected transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {action} a loan in status {from}")]
pub struct InvalidTransition {
    pub from: LoanStatus,
    pub action: LoanAction,
}

impl LoanStatus {
    /// Apply an action, returning the next status or the rejected pair
    pub fn apply(self, action: LoanAction) -> Result<LoanStatus, InvalidTransition> {
        match (self, action) {
            (LoanStatus::Proposed, LoanAction::Approve) => Ok(LoanStatus::Approved),
            (LoanStatus::Approved, LoanAction::FundingReached) => Ok(LoanStatus::Invested),
            (LoanStatus::Invested, LoanAction::Disburse) => Ok(LoanStatus::Disbursed),
            (
                LoanStatus::Proposed
                | LoanStatus::Approved
                | LoanStatus::Invested
                | LoanStatus::Disbursed,
                LoanAction::Approve | LoanAction::FundingReached | LoanAction::Disburse,
            ) => Err(InvalidTransition { from: self, action }),
        }
    }

    /// Whether new investments are accepted in this status
    pub fn accepts_investment(self) -> bool {
        matches!(self, LoanStatus::Approved)
    }
}
