//! Postgres loan store
//!
//! Identifiers are `u64` in the domain and `BIGINT` in the tables; the
//! conversion happens here and nowhere else.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::types::chrono::DateTime;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::error::StoreError;
use super::model::{Loan, LoanFilter, LoanInvestment, LoanStatus, LoanUpdate};
use super::store::{InvestmentApplied, LoanStore};

const LOAN_COLUMNS: &str = "id, borrower_id, principal_amount, invested_amount, interest_rate, \
    status, approval_date, approval_employee_id, disbursement_date, agreement_document_url, \
    created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct LoanRow {
    id: i64,
    borrower_id: i64,
    principal_amount: Decimal,
    invested_amount: Decimal,
    interest_rate: Decimal,
    status: LoanStatus,
    approval_date: Option<DateTime<Utc>>,
    approval_employee_id: Option<i64>,
    disbursement_date: Option<DateTime<Utc>>,
    agreement_document_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct InvestmentRow {
    id: i64,
    loan_id: i64,
    investor_id: i64,
    amount: Decimal,
    created_at: DateTime<Utc>,
}

fn to_db_id(id: u64) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::IdOutOfRange(id))
}

fn from_db_id(id: i64, column: &str) -> Result<u64, StoreError> {
    u64::try_from(id).map_err(|_| StoreError::CorruptRow(format!("negative {column}: {id}")))
}

impl TryFrom<LoanRow> for Loan {
    type Error = StoreError;

    fn try_from(row: LoanRow) -> Result<Self, Self::Error> {
        Ok(Loan {
            id: from_db_id(row.id, "loans.id")?,
            borrower_id: from_db_id(row.borrower_id, "loans.borrower_id")?,
            principal_amount: row.principal_amount,
            invested_amount: row.invested_amount,
            interest_rate: row.interest_rate,
            status: row.status,
            approval_date: row.approval_date,
            approval_employee_id: row
                .approval_employee_id
                .map(|id| from_db_id(id, "loans.approval_employee_id"))
                .transpose()?,
            disbursement_date: row.disbursement_date,
            agreement_document_url: row.agreement_document_url,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<InvestmentRow> for LoanInvestment {
    type Error = StoreError;

    fn try_from(row: InvestmentRow) -> Result<Self, Self::Error> {
        Ok(LoanInvestment {
            id: from_db_id(row.id, "loan_investments.id")?,
            loan_id: from_db_id(row.loan_id, "loan_investments.loan_id")?,
            investor_id: from_db_id(row.investor_id, "loan_investments.investor_id")?,
            amount: row.amount,
            created_at: row.created_at,
        })
    }
}

/// `LoanStore` backed by the `loans` and `loan_investments` tables
#[derive(Clone)]
pub struct PgLoanStore {
    db_pool: PgPool,
}

impl PgLoanStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    async fn insert_investment_with<'e, E>(
        executor: E,
        investment: &LoanInvestment,
    ) -> Result<(), StoreError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r#"
            INSERT INTO loan_investments (id, loan_id, investor_id, amount, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(to_db_id(investment.id)?)
        .bind(to_db_id(investment.loan_id)?)
        .bind(to_db_id(investment.investor_id)?)
        .bind(investment.amount)
        .bind(investment.created_at)
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NothingWritten(format!(
                "loan investment {}",
                investment.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LoanStore for PgLoanStore {
    async fn insert_loan(&self, loan: &Loan) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO loans (
                id, borrower_id, principal_amount, invested_amount, interest_rate,
                status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(to_db_id(loan.id)?)
        .bind(to_db_id(loan.borrower_id)?)
        .bind(loan.principal_amount)
        .bind(loan.invested_amount)
        .bind(loan.interest_rate)
        .bind(loan.status)
        .bind(loan.created_at)
        .bind(loan.updated_at)
        .execute(&self.db_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NothingWritten(format!("loan {}", loan.id)));
        }
        Ok(())
    }

    async fn get_loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>, StoreError> {
        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {LOAN_COLUMNS} FROM loans WHERE 1=1"));

        if let Some(id) = filter.id {
            query_builder.push(" AND id = ");
            query_builder.push_bind(to_db_id(id)?);
        }
        if let Some(borrower_id) = filter.borrower_id {
            query_builder.push(" AND borrower_id = ");
            query_builder.push_bind(to_db_id(borrower_id)?);
        }
        if let Some(status) = filter.status {
            query_builder.push(" AND status = ");
            query_builder.push_bind(status);
        }
        query_builder.push(" ORDER BY created_at DESC, id DESC");

        let rows = query_builder
            .build_query_as::<LoanRow>()
            .fetch_all(&self.db_pool)
            .await?;

        rows.into_iter().map(Loan::try_from).collect()
    }

    async fn update_loan(&self, loan_id: u64, update: &LoanUpdate) -> Result<u64, StoreError> {
        let id = to_db_id(loan_id)?;
        let expected = update.expected_status();
        let target = update.target_status();
        let now = Utc::now();

        let result = match update {
            LoanUpdate::Approve {
                employee_id,
                approved_at,
            } => {
                sqlx::query(
                    r#"
                    UPDATE loans
                    SET status = $1, approval_date = $2, approval_employee_id = $3, updated_at = $4
                    WHERE id = $5 AND status = $6
                    "#,
                )
                .bind(target)
                .bind(approved_at)
                .bind(to_db_id(*employee_id)?)
                .bind(now)
                .bind(id)
                .bind(expected)
                .execute(&self.db_pool)
                .await?
            }
            LoanUpdate::MarkInvested => {
                sqlx::query(
                    r#"
                    UPDATE loans
                    SET status = $1, updated_at = $2
                    WHERE id = $3 AND status = $4 AND invested_amount >= principal_amount
                    "#,
                )
                .bind(target)
                .bind(now)
                .bind(id)
                .bind(expected)
                .execute(&self.db_pool)
                .await?
            }
            LoanUpdate::Disburse {
                disbursed_at,
                agreement_document_url,
            } => {
                sqlx::query(
                    r#"
                    UPDATE loans
                    SET status = $1, disbursement_date = $2, agreement_document_url = $3,
                        updated_at = $4
                    WHERE id = $5 AND status = $6
                    "#,
                )
                .bind(target)
                .bind(disbursed_at)
                .bind(agreement_document_url)
                .bind(now)
                .bind(id)
                .bind(expected)
                .execute(&self.db_pool)
                .await?
            }
        };

        Ok(result.rows_affected())
    }

    async fn insert_loan_investment(&self, investment: &LoanInvestment) -> Result<(), StoreError> {
        Self::insert_investment_with(&self.db_pool, investment).await
    }

    async fn apply_investment(
        &self,
        investment: &LoanInvestment,
    ) -> Result<Option<InvestmentApplied>, StoreError> {
        let loan_id = to_db_id(investment.loan_id)?;
        let now = Utc::now();

        // Dropping `tx` before commit rolls everything back, which is what
        // makes a cancelled request leave no trace.
        let mut tx = self.db_pool.begin().await?;

        // Row lock taken here serialises concurrent investors on this loan.
        let totals = sqlx::query_as::<_, (Decimal, Decimal)>(
            r#"
            UPDATE loans
            SET invested_amount = invested_amount + $1, updated_at = $2
            WHERE id = $3 AND status = $4
            RETURNING invested_amount, principal_amount
            "#,
        )
        .bind(investment.amount)
        .bind(now)
        .bind(loan_id)
        .bind(LoanStatus::Approved)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((invested_amount, principal_amount)) = totals else {
            tx.rollback().await?;
            return Ok(None);
        };

        Self::insert_investment_with(&mut *tx, investment).await?;

        let transitioned = sqlx::query(
            r#"
            UPDATE loans
            SET status = $1, updated_at = $2
            WHERE id = $3 AND status = $4 AND invested_amount >= principal_amount
            "#,
        )
        .bind(LoanStatus::Invested)
        .bind(now)
        .bind(loan_id)
        .bind(LoanStatus::Approved)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        Ok(Some(InvestmentApplied {
            invested_amount,
            principal_amount,
            reached_funding: transitioned == 1,
        }))
    }

    async fn list_investments(&self, loan_id: u64) -> Result<Vec<LoanInvestment>, StoreError> {
        let rows = sqlx::query_as::<_, InvestmentRow>(
            r#"
            SELECT id, loan_id, investor_id, amount, created_at
            FROM loan_investments
            WHERE loan_id = $1
            ORDER BY id
            "#,
        )
        .bind(to_db_id(loan_id)?)
        .fetch_all(&self.db_pool)
        .await?;

        rows.into_iter().map(LoanInvestment::try_from).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.db_pool).await?;
        Ok(())
    }
}
