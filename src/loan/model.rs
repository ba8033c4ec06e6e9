//! Loan models and data structures

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use validator::{Validate, ValidationError};

/// Loan status, persisted as the `loan_status` Postgres enum
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "loan_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Proposed,
    Approved,
    Invested,
    Disbursed,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Proposed => "proposed",
            LoanStatus::Approved => "approved",
            LoanStatus::Invested => "invested",
            LoanStatus::Disbursed => "disbursed",
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loan model
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Loan {
    pub id: u64,
    pub borrower_id: u64,
    pub principal_amount: Decimal,
    pub invested_amount: Decimal,
    pub interest_rate: Decimal,
    pub status: LoanStatus,
    pub approval_date: Option<DateTime<Utc>>,
    pub approval_employee_id: Option<u64>,
    pub disbursement_date: Option<DateTime<Utc>>,
    pub agreement_document_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// Build a freshly proposed loan with nothing invested yet
    pub fn proposed(
        id: u64,
        borrower_id: u64,
        principal_amount: Decimal,
        interest_rate: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            borrower_id,
            principal_amount,
            invested_amount: Decimal::ZERO,
            interest_rate,
            status: LoanStatus::Proposed,
            approval_date: None,
            approval_employee_id: None,
            disbursement_date: None,
            agreement_document_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount still missing before the loan is fully funded (never negative)
    pub fn remaining_amount(&self) -> Decimal {
        (self.principal_amount - self.invested_amount).max(Decimal::ZERO)
    }

    pub fn is_fully_funded(&self) -> bool {
        self.invested_amount >= self.principal_amount
    }
}

/// One investor's contribution against a loan. Immutable once written.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LoanInvestment {
    pub id: u64,
    pub loan_id: u64,
    pub investor_id: u64,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Filters for loan lookups. Present fields are AND-ed together.
#[derive(Debug, Default, Clone, Deserialize, PartialEq)]
pub struct LoanFilter {
    pub id: Option<u64>,
    pub borrower_id: Option<u64>,
    pub status: Option<LoanStatus>,
}

impl LoanFilter {
    pub fn by_id(loan_id: u64) -> Self {
        Self {
            id: Some(loan_id),
            ..Self::default()
        }
    }

    pub fn by_borrower(borrower_id: u64) -> Self {
        Self {
            borrower_id: Some(borrower_id),
            ..Self::default()
        }
    }

    pub fn by_status(status: LoanStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, loan: &Loan) -> bool {
        self.id.map_or(true, |id| loan.id == id)
            && self.borrower_id.map_or(true, |b| loan.borrower_id == b)
            && self.status.map_or(true, |s| loan.status == s)
    }
}

/// Partial loan updates issued by the lifecycle operations.
///
/// Each variant is only ever applied to a loan currently sitting in
/// [`LoanUpdate::expected_status`]; stores must enforce that guard in the
/// same statement that writes the columns.
#[derive(Debug, Clone, PartialEq)]
pub enum LoanUpdate {
    Approve {
        employee_id: u64,
        approved_at: DateTime<Utc>,
    },
    MarkInvested,
    Disburse {
        disbursed_at: DateTime<Utc>,
        agreement_document_url: String,
    },
}

impl LoanUpdate {
    /// Status the loan must be in for this update to apply
    pub fn expected_status(&self) -> LoanStatus {
        match self {
            LoanUpdate::Approve { .. } => LoanStatus::Proposed,
            LoanUpdate::MarkInvested => LoanStatus::Approved,
            LoanUpdate::Disburse { .. } => LoanStatus::Invested,
        }
    }

    /// Status the loan ends up in once the update applied
    pub fn target_status(&self) -> LoanStatus {
        match self {
            LoanUpdate::Approve { .. } => LoanStatus::Approved,
            LoanUpdate::MarkInvested => LoanStatus::Invested,
            LoanUpdate::Disburse { .. } => LoanStatus::Disbursed,
        }
    }

    /// Apply the column changes to an in-memory loan
    pub fn apply_to(&self, loan: &mut Loan, now: DateTime<Utc>) {
        match self {
            LoanUpdate::Approve {
                employee_id,
                approved_at,
            } => {
                loan.approval_date = Some(*approved_at);
                loan.approval_employee_id = Some(*employee_id);
            }
            LoanUpdate::MarkInvested => {}
            LoanUpdate::Disburse {
                disbursed_at,
                agreement_document_url,
            } => {
                loan.disbursement_date = Some(*disbursed_at);
                loan.agreement_document_url = Some(agreement_document_url.clone());
            }
        }
        loan.status = self.target_status();
        loan.updated_at = now;
    }
}

// ============================================================================
// Operation inputs
// ============================================================================

/// Amounts and principals must stay below this value
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(2_808_348_672, 232_830_643, 0, false, 0); // 10^18
/// Interest rates must stay below this value
pub const MAX_INTEREST_RATE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
/// Fractional digits accepted for amounts and rates
pub const MAX_SCALE: u32 = 8;

// With both bounds, a running total (at most principal plus one overshooting
// investment) keeps every digit inside Decimal's 28-digit mantissa, so sums
// are exact and never overflow.
fn check_scale(value: &Decimal) -> Result<(), ValidationError> {
    if value.normalize().scale() > MAX_SCALE {
        return Err(ValidationError::new("too_many_decimal_places"));
    }
    Ok(())
}

fn validate_positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if !amount.is_sign_positive() || amount.is_zero() {
        return Err(ValidationError::new("amount_must_be_positive"));
    }
    if *amount >= MAX_AMOUNT {
        return Err(ValidationError::new("amount_too_large"));
    }
    check_scale(amount)
}

fn validate_interest_rate(rate: &Decimal) -> Result<(), ValidationError> {
    if rate.is_sign_negative() {
        return Err(ValidationError::new("interest_rate_must_not_be_negative"));
    }
    if rate.is_zero() {
        return Err(ValidationError::new("interest_rate_required"));
    }
    if *rate >= MAX_INTEREST_RATE {
        return Err(ValidationError::new("interest_rate_too_large"));
    }
    check_scale(rate)
}

/// Input for proposing a new loan
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProposeLoanInput {
    #[validate(range(min = 1, message = "borrower_id is required"))]
    pub borrower_id: u64,
    #[validate(custom = "validate_positive_amount")]
    pub principal_amount: Decimal,
    #[validate(custom = "validate_interest_rate")]
    pub interest_rate: Decimal,
}

/// Input for approving a proposed loan
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ApproveLoanInput {
    #[serde(default)]
    #[validate(range(min = 1, message = "loan_id is required"))]
    pub loan_id: u64,
    #[validate(range(min = 1, message = "employee_id is required"))]
    pub employee_id: u64,
}

/// Input for investing into an approved loan
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InvestLoanInput {
    #[serde(default)]
    #[validate(range(min = 1, message = "loan_id is required"))]
    pub loan_id: u64,
    #[validate(range(min = 1, message = "investor_id is required"))]
    pub investor_id: u64,
    #[validate(custom = "validate_positive_amount")]
    pub amount: Decimal,
}

/// Input for disbursing a fully invested loan
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DisburseLoanInput {
    #[serde(default)]
    #[validate(range(min = 1, message = "loan_id is required"))]
    pub loan_id: u64,
}

/// Response for a successful proposal
#[derive(Debug, Serialize)]
pub struct ProposeLoanResponse {
    pub loan_id: u64,
    pub status: LoanStatus,
}
