//! Outbound loan events and agreement letter delivery
//!
//! Events are published only after the store committed the change they
//! describe. The broadcast bus is lossy for slow subscribers, so funded
//! loans also go through a `FundedLoanQueue` that never drops an entry.
//! The agreement dispatcher drains that queue, delivers each loan on its
//! own task and keeps retrying each investor, so notification is
//! at-least-once and never part of the lifecycle transaction.

use async_trait::async_trait;
use futures_util::future::join_all;
use rand::Rng;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::store::LoanStore;

/// Loan event types
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum LoanEvent {
    Proposed {
        loan_id: u64,
        borrower_id: u64,
    },
    Approved {
        loan_id: u64,
        employee_id: u64,
    },
    InvestmentRecorded {
        loan_id: u64,
        investment_id: u64,
        investor_id: u64,
        amount: Decimal,
    },
    Invested {
        loan_id: u64,
    },
    Disbursed {
        loan_id: u64,
    },
}

impl LoanEvent {
    pub fn loan_id(&self) -> u64 {
        match self {
            LoanEvent::Proposed { loan_id, .. }
            | LoanEvent::Approved { loan_id, .. }
            | LoanEvent::InvestmentRecorded { loan_id, .. }
            | LoanEvent::Invested { loan_id }
            | LoanEvent::Disbursed { loan_id } => *loan_id,
        }
    }
}

/// Broadcast channel for committed loan events
#[derive(Clone)]
pub struct LoanEventBus {
    tx: broadcast::Sender<LoanEvent>,
}

impl LoanEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoanEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: LoanEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::debug!(loan_id = e.0.loan_id(), "No subscribers for loan event");
        }
    }
}

impl Default for LoanEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Loans that just reached their principal, in commit order
#[derive(Clone)]
pub struct FundedLoanQueue {
    tx: mpsc::UnboundedSender<u64>,
}

impl FundedLoanQueue {
    /// Queue handle plus the receiving end for `AgreementDispatcher::run`
    pub fn new() -> (Self, mpsc::UnboundedReceiver<u64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, loan_id: u64) {
        if self.tx.send(loan_id).is_err() {
            tracing::error!(loan_id, "Agreement dispatcher stopped, funded loan not queued");
        }
    }
}

/// Delivers the agreement letter of a funded loan to one investor
#[async_trait]
pub trait AgreementNotifier: Send + Sync {
    async fn send_agreement(&self, loan_id: u64, investor_id: u64) -> anyhow::Result<()>;
}

/// Notifier that only records the delivery in the logs
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl AgreementNotifier for TracingNotifier {
    async fn send_agreement(&self, loan_id: u64, investor_id: u64) -> anyhow::Result<()> {
        tracing::info!(loan_id, investor_id, "Agreement letter sent to investor");
        Ok(())
    }
}

/// Retry settings for agreement delivery
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Exponential backoff with up to 25% jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay);
        let jitter_ms = (capped.as_millis() as u64) / 4;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        capped + Duration::from_millis(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Background consumer sending agreement letters once a loan is funded
pub struct AgreementDispatcher {
    store: Arc<dyn LoanStore>,
    notifier: Arc<dyn AgreementNotifier>,
    retry: RetryPolicy,
}

impl AgreementDispatcher {
    pub fn new(
        store: Arc<dyn LoanStore>,
        notifier: Arc<dyn AgreementNotifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            notifier,
            retry,
        }
    }

    /// Drain funded loans until the queue closes or `shutdown` fires.
    /// Each loan is delivered on its own task so a slow notifier never
    /// holds up the loans behind it.
    pub async fn run(self, mut funded: mpsc::UnboundedReceiver<u64>, shutdown: CancellationToken) {
        tracing::info!("Agreement dispatcher started");

        let dispatcher = Arc::new(self);
        let mut deliveries = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(joined) = deliveries.join_next(), if !deliveries.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Agreement delivery task failed");
                    }
                }
                received = funded.recv() => match received {
                    Some(loan_id) => {
                        let dispatcher = dispatcher.clone();
                        deliveries.spawn(async move { dispatcher.dispatch(loan_id).await });
                    }
                    None => break,
                },
            }
        }

        // Queue closed: let in-flight deliveries finish unless shutdown fires
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = async { while deliveries.join_next().await.is_some() {} } => {}
        }
        if !deliveries.is_empty() {
            tracing::warn!(
                pending = deliveries.len(),
                "Agreement dispatcher stopping with deliveries in flight"
            );
            deliveries.abort_all();
        }

        tracing::info!("Agreement dispatcher stopped");
    }

    /// Send the agreement to every distinct investor of `loan_id`.
    /// Returns how many investors were notified successfully.
    pub async fn dispatch(&self, loan_id: u64) -> usize {
        let investments = match self.store.list_investments(loan_id).await {
            Ok(investments) => investments,
            Err(e) => {
                tracing::error!(loan_id, error = %e, "Failed to load investors for agreement delivery");
                return 0;
            }
        };

        let investors: BTreeSet<u64> = investments.iter().map(|i| i.investor_id).collect();
        let deliveries = investors
            .into_iter()
            .map(|investor_id| self.deliver(loan_id, investor_id));

        join_all(deliveries).await.into_iter().filter(|ok| *ok).count()
    }

    async fn deliver(&self, loan_id: u64, investor_id: u64) -> bool {
        let max_attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.notifier.send_agreement(loan_id, investor_id).await {
                Ok(()) => return true,
                Err(e) if attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        loan_id,
                        investor_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Agreement delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        loan_id,
                        investor_id,
                        attempts = max_attempts,
                        error = %e,
                        "Agreement delivery abandoned"
                    );
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loan::memory_store::InMemoryLoanStore;
    use crate::loan::model::{Loan, LoanInvestment, LoanStatus};
    use chrono::Utc;
    use std::sync::Mutex;

    /// Fails the first `failures` calls, then records deliveries
    struct FlakyNotifier {
        failures: Mutex<u32>,
        delivered: Mutex<Vec<(u64, u64)>>,
    }

    impl FlakyNotifier {
        fn new(failures: u32) -> Self {
            Self {
                failures: Mutex::new(failures),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AgreementNotifier for FlakyNotifier {
        async fn send_agreement(&self, loan_id: u64, investor_id: u64) -> anyhow::Result<()> {
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    anyhow::bail!("mail server unavailable");
                }
            }
            self.delivered.lock().unwrap().push((loan_id, investor_id));
            Ok(())
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    async fn funded_store() -> Arc<InMemoryLoanStore> {
        let store = Arc::new(InMemoryLoanStore::new());
        let mut loan = Loan::proposed(1, 1, Decimal::from(100), Decimal::new(1, 1), Utc::now());
        loan.status = LoanStatus::Approved;
        store.insert_loan(&loan).await.unwrap();
        for (id, investor_id) in [(10, 7), (11, 8), (12, 7)] {
            store
                .apply_investment(&LoanInvestment {
                    id,
                    loan_id: 1,
                    investor_id,
                    amount: Decimal::from(40),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        store
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(LoanEvent::Invested { loan_id: 3 }).unwrap();
        assert_eq!(json["type"], "Invested");
        assert_eq!(json["loan_id"], 3);
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
        };
        assert!(policy.delay_for(1) >= Duration::from_millis(100));
        assert!(policy.delay_for(8) <= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = LoanEventBus::new(4);
        bus.publish(LoanEvent::Disbursed { loan_id: 1 });
    }

    #[tokio::test]
    async fn test_dispatch_notifies_each_investor_once() {
        let store = funded_store().await;
        let notifier = Arc::new(FlakyNotifier::new(0));
        let dispatcher = AgreementDispatcher::new(store, notifier.clone(), fast_retry(3));

        assert_eq!(dispatcher.dispatch(1).await, 2);
        let mut delivered = notifier.delivered.lock().unwrap().clone();
        delivered.sort();
        assert_eq!(delivered, vec![(1, 7), (1, 8)]);
    }

    #[tokio::test]
    async fn test_dispatch_retries_failed_delivery() {
        let store = funded_store().await;
        let notifier = Arc::new(FlakyNotifier::new(2));
        let dispatcher = AgreementDispatcher::new(store, notifier.clone(), fast_retry(5));

        assert_eq!(dispatcher.dispatch(1).await, 2);
        assert_eq!(notifier.delivered.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_gives_up_after_max_attempts() {
        let store = funded_store().await;
        let notifier = Arc::new(FlakyNotifier::new(100));
        let dispatcher = AgreementDispatcher::new(store, notifier.clone(), fast_retry(2));

        assert_eq!(dispatcher.dispatch(1).await, 0);
        assert!(notifier.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = funded_store().await;
        let (_queue, funded) = FundedLoanQueue::new();
        let shutdown = CancellationToken::new();
        let dispatcher =
            AgreementDispatcher::new(store, Arc::new(TracingNotifier), RetryPolicy::default());

        let handle = tokio::spawn(dispatcher.run(funded, shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("dispatcher must stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_delivers_queued_loans_then_stops_when_queue_closes() {
        let store = funded_store().await;
        let notifier = Arc::new(FlakyNotifier::new(0));
        let (queue, funded) = FundedLoanQueue::new();
        let dispatcher = AgreementDispatcher::new(store, notifier.clone(), fast_retry(3));

        let handle = tokio::spawn(dispatcher.run(funded, CancellationToken::new()));
        queue.enqueue(1);
        drop(queue);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("dispatcher must stop once the queue closes")
            .unwrap();
        assert_eq!(notifier.delivered.lock().unwrap().len(), 2);
    }
}
