//! Loan service layer - lifecycle operations
//!
//! Every mutating operation follows the same discipline: take the loan's
//! lock, read it, check the transition, then issue a store write that
//! re-checks the status itself. The write and the events describing it run
//! on a task of their own that keeps the loan lock, so a caller that stops
//! waiting (timeout, shutdown) never leaves a committed change unannounced.
//! Waiting is bounded by the service timeout and shutdown token.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use super::agreement::AgreementLocator;
use super::error::{BusinessError, LoanError, LoanResult};
use super::events::{FundedLoanQueue, LoanEvent, LoanEventBus};
use super::lifecycle::LoanAction;
use super::locks::{LoanGuard, LoanLocks};
use super::model::{
    ApproveLoanInput, DisburseLoanInput, InvestLoanInput, Loan, LoanFilter, LoanInvestment,
    LoanStatus, LoanUpdate, ProposeLoanInput,
};
use super::store::LoanStore;
use crate::id::IdGenerator;

pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of an accepted investment
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InvestmentReceipt {
    pub investment_id: u64,
    pub loan_id: u64,
    pub invested_amount: Decimal,
    pub principal_amount: Decimal,
    pub status: LoanStatus,
}

/// Where committed changes are announced
#[derive(Clone)]
struct Outbox {
    events: LoanEventBus,
    funded: Option<FundedLoanQueue>,
}

impl Outbox {
    fn publish(&self, event: LoanEvent) {
        self.events.publish(event);
    }

    fn loan_funded(&self, loan_id: u64) {
        self.events.publish(LoanEvent::Invested { loan_id });
        if let Some(queue) = &self.funded {
            queue.enqueue(loan_id);
        }
    }
}

/// Loan service for managing the loan lifecycle
pub struct LoanService {
    store: Arc<dyn LoanStore>,
    ids: Arc<dyn IdGenerator>,
    locks: LoanLocks,
    outbox: Outbox,
    agreements: AgreementLocator,
    operation_timeout: Duration,
    shutdown: CancellationToken,
}

impl LoanService {
    /// Create a new loan service instance
    pub fn new(
        store: Arc<dyn LoanStore>,
        ids: Arc<dyn IdGenerator>,
        events: LoanEventBus,
        agreements: AgreementLocator,
    ) -> Self {
        Self {
            store,
            ids,
            locks: LoanLocks::new(),
            outbox: Outbox {
                events,
                funded: None,
            },
            agreements,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Abort in-flight and future operations once `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Hand every loan that reaches its principal to `queue`
    pub fn with_funded_queue(mut self, queue: FundedLoanQueue) -> Self {
        self.outbox.funded = Some(queue);
        self
    }

    pub fn events(&self) -> &LoanEventBus {
        &self.outbox.events
    }

    pub fn store(&self) -> Arc<dyn LoanStore> {
        self.store.clone()
    }

    /// Propose a new loan for a borrower
    pub async fn propose(&self, input: ProposeLoanInput) -> LoanResult<Loan> {
        input.validate()?;

        self.bounded("propose", async {
            let loan = Loan::proposed(
                self.ids.generate()?,
                input.borrower_id,
                input.principal_amount,
                input.interest_rate,
                Utc::now(),
            );

            let store = self.store.clone();
            let outbox = self.outbox.clone();
            commit_detached(None, async move {
                store.insert_loan(&loan).await?;

                tracing::info!(
                    loan_id = loan.id,
                    borrower_id = loan.borrower_id,
                    principal_amount = %loan.principal_amount,
                    "Loan proposed"
                );
                outbox.publish(LoanEvent::Proposed {
                    loan_id: loan.id,
                    borrower_id: loan.borrower_id,
                });

                Ok(loan)
            })
            .await
        })
        .await
    }

    /// Approve a proposed loan
    pub async fn approve(&self, input: ApproveLoanInput) -> LoanResult<Loan> {
        input.validate()?;

        self.bounded("approve", async {
            let guard = self.locks.acquire(input.loan_id).await;
            let mut loan = self.find_loan(input.loan_id).await?;

            if let Err(e) = loan.status.apply(LoanAction::Approve) {
                tracing::warn!(loan_id = loan.id, status = %loan.status, error = %e, "Loan already approved");
                return Err(BusinessError::AlreadyApproved.into());
            }

            let employee_id = input.employee_id;
            let update = LoanUpdate::Approve {
                employee_id,
                approved_at: Utc::now(),
            };
            let store = self.store.clone();
            let outbox = self.outbox.clone();
            commit_detached(Some(guard), async move {
                if store.update_loan(loan.id, &update).await? == 0 {
                    tracing::warn!(loan_id = loan.id, "Loan approved concurrently");
                    return Err(BusinessError::AlreadyApproved.into());
                }
                update.apply_to(&mut loan, Utc::now());

                tracing::info!(loan_id = loan.id, employee_id, "Loan approved");
                outbox.publish(LoanEvent::Approved {
                    loan_id: loan.id,
                    employee_id,
                });

                Ok(loan)
            })
            .await
        })
        .await
    }

    /// Record an investment into an approved loan.
    ///
    /// Amounts larger than the remaining gap are accepted in full; the loan
    /// then ends up with `invested_amount > principal_amount`. Retrying a
    /// call whose response was lost records the investment twice, and so
    /// does retrying one that timed out after its write had started.
    pub async fn invest(&self, input: InvestLoanInput) -> LoanResult<InvestmentReceipt> {
        input.validate()?;

        self.bounded("invest", async {
            let guard = self.locks.acquire(input.loan_id).await;
            let loan = self.find_loan(input.loan_id).await?;

            check_accepts_investment(&loan)?;

            if input.amount > loan.remaining_amount() {
                tracing::info!(
                    loan_id = loan.id,
                    amount = %input.amount,
                    remaining = %loan.remaining_amount(),
                    "Investment exceeds remaining amount, accepting in full"
                );
            }

            let investment = LoanInvestment {
                id: self.ids.generate()?,
                loan_id: loan.id,
                investor_id: input.investor_id,
                amount: input.amount,
                created_at: Utc::now(),
            };

            let store = self.store.clone();
            let outbox = self.outbox.clone();
            commit_detached(Some(guard), async move {
                let Some(applied) = store.apply_investment(&investment).await? else {
                    // Status changed between our read and the conditional write
                    let current = load_loan(store.as_ref(), loan.id).await?;
                    tracing::warn!(loan_id = loan.id, status = %current.status, "Investment lost race on loan status");
                    check_accepts_investment(&current)?;
                    return Err(BusinessError::NotApproved.into());
                };

                tracing::info!(
                    loan_id = loan.id,
                    investment_id = investment.id,
                    investor_id = investment.investor_id,
                    amount = %investment.amount,
                    invested_amount = %applied.invested_amount,
                    "Investment recorded"
                );
                outbox.publish(LoanEvent::InvestmentRecorded {
                    loan_id: loan.id,
                    investment_id: investment.id,
                    investor_id: investment.investor_id,
                    amount: investment.amount,
                });

                let status = if applied.reached_funding {
                    let next = LoanStatus::Approved.apply(LoanAction::FundingReached)?;
                    tracing::info!(
                        loan_id = loan.id,
                        invested_amount = %applied.invested_amount,
                        principal_amount = %applied.principal_amount,
                        "Loan fully invested"
                    );
                    outbox.loan_funded(loan.id);
                    next
                } else {
                    LoanStatus::Approved
                };

                Ok(InvestmentReceipt {
                    investment_id: investment.id,
                    loan_id: loan.id,
                    invested_amount: applied.invested_amount,
                    principal_amount: applied.principal_amount,
                    status,
                })
            })
            .await
        })
        .await
    }

    /// Disburse a fully invested loan
    pub async fn disburse(&self, input: DisburseLoanInput) -> LoanResult<Loan> {
        input.validate()?;

        self.bounded("disburse", async {
            let guard = self.locks.acquire(input.loan_id).await;
            let mut loan = self.find_loan(input.loan_id).await?;

            if let Err(e) = loan.status.apply(LoanAction::Disburse) {
                tracing::warn!(loan_id = loan.id, status = %loan.status, error = %e, "Loan not invested");
                return Err(BusinessError::NotInvested.into());
            }

            let update = LoanUpdate::Disburse {
                disbursed_at: Utc::now(),
                agreement_document_url: self.agreements.document_url(loan.id),
            };
            let store = self.store.clone();
            let outbox = self.outbox.clone();
            commit_detached(Some(guard), async move {
                if store.update_loan(loan.id, &update).await? == 0 {
                    tracing::warn!(loan_id = loan.id, "Loan disbursed concurrently");
                    return Err(BusinessError::NotInvested.into());
                }
                update.apply_to(&mut loan, Utc::now());

                tracing::info!(loan_id = loan.id, "Loan disbursed");
                outbox.publish(LoanEvent::Disbursed { loan_id: loan.id });

                Ok(loan)
            })
            .await
        })
        .await
    }

    /// Get loan by ID
    pub async fn get_loan(&self, loan_id: u64) -> LoanResult<Loan> {
        self.bounded("get_loan", self.find_loan(loan_id)).await
    }

    /// List loans matching `filter`
    pub async fn list_loans(&self, filter: LoanFilter) -> LoanResult<Vec<Loan>> {
        self.bounded("list_loans", async {
            Ok(self.store.get_loans(&filter).await?)
        })
        .await
    }

    /// Ledger rows of one loan, oldest first
    pub async fn list_investments(&self, loan_id: u64) -> LoanResult<Vec<LoanInvestment>> {
        self.bounded("list_investments", async {
            self.find_loan(loan_id).await?;
            Ok(self.store.list_investments(loan_id).await?)
        })
        .await
    }

    pub async fn is_healthy(&self) -> bool {
        self.store.ping().await.is_ok()
    }

    // ===== Private Helper Methods =====

    async fn find_loan(&self, loan_id: u64) -> LoanResult<Loan> {
        load_loan(self.store.as_ref(), loan_id).await
    }

    /// Bound how long the caller waits for `operation`.
    /// Reads are abandoned when the bound fires; writes already handed to
    /// `commit_detached` run to completion.
    async fn bounded<T, F>(&self, name: &'static str, operation: F) -> LoanResult<T>
    where
        F: Future<Output = LoanResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                tracing::warn!(operation = name, "Loan operation cancelled");
                Err(LoanError::Server("operation cancelled".to_string()))
            }
            result = tokio::time::timeout(self.operation_timeout, operation) => {
                result.unwrap_or_else(|_| {
                    tracing::error!(
                        operation = name,
                        timeout_ms = self.operation_timeout.as_millis() as u64,
                        "Loan operation timed out"
                    );
                    Err(LoanError::Server("operation timed out".to_string()))
                })
            }
        }
    }
}

async fn load_loan(store: &dyn LoanStore, loan_id: u64) -> LoanResult<Loan> {
    let loans = store.get_loans(&LoanFilter::by_id(loan_id)).await?;
    match loans.into_iter().next() {
        Some(loan) => Ok(loan),
        None => {
            tracing::warn!(loan_id, "Loan not found");
            Err(BusinessError::NotFound.into())
        }
    }
}

fn check_accepts_investment(loan: &Loan) -> LoanResult<()> {
    if loan.status.accepts_investment() {
        return Ok(());
    }
    if loan.status == LoanStatus::Invested {
        tracing::warn!(loan_id = loan.id, "Loan already invested");
        return Err(BusinessError::AlreadyInvested.into());
    }
    tracing::warn!(loan_id = loan.id, status = %loan.status, "Loan not approved");
    Err(BusinessError::NotApproved.into())
}

/// Run a store write and its event publication on their own task, holding
/// `guard` until both are done. Dropping the returned future only stops
/// the wait.
async fn commit_detached<T, F>(guard: Option<LoanGuard>, write: F) -> LoanResult<T>
where
    T: Send + 'static,
    F: Future<Output = LoanResult<T>> + Send + 'static,
{
    let task = tokio::spawn(async move {
        let result = write.await;
        drop(guard);
        result
    });

    task.await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Loan write task failed");
        Err(LoanError::Server("failed to access loan store".to_string()))
    })
}
