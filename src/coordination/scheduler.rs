//! Polling scheduler: one supervised loop per backend/role pair

use super::guard::ConcurrencyGuard;
use super::pipeline::{ApprovalPipeline, ProcessOutcome};
use crate::chain::ItemId;
use crate::error::{ApprovalError, ApprovalResult};

use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What a single tick did
#[derive(Debug, Default)]
pub struct TickReport {
    pub listed: usize,
    pub dispatched: usize,
    pub skipped_retired: usize,
    pub skipped_in_flight: usize,
    /// One handle per dispatched item
    pub handles: Vec<JoinHandle<ApprovalResult<ProcessOutcome>>>,
}

impl TickReport {
    /// Wait for every dispatched item; panicked tasks are dropped
    pub async fn join(self) -> Vec<ApprovalResult<ProcessOutcome>> {
        let mut results = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => error!("Item task aborted: {}", e),
            }
        }
        results
    }
}

pub struct Scheduler<P: ApprovalPipeline> {
    pipeline: Arc<P>,
    guard: ConcurrencyGuard<ItemId>,
    /// Items observed executed or abandoned; never dispatched again
    retired: Arc<DashSet<ItemId>>,
    interval: Duration,
}

const MIN_INTERVAL: Duration = Duration::from_secs(1);

impl<P: ApprovalPipeline> Scheduler<P> {
    pub fn new(pipeline: P, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            warn!("{}: zero poll interval, using {:?}", pipeline.name(), MIN_INTERVAL);
            MIN_INTERVAL
        } else {
            interval
        };
        Self {
            pipeline: Arc::new(pipeline),
            guard: ConcurrencyGuard::new(),
            retired: Arc::new(DashSet::new()),
            interval,
        }
    }

    pub fn name(&self) -> &'static str {
        self.pipeline.name()
    }

    pub fn is_retired(&self, id: &ItemId) -> bool {
        self.retired.contains(id)
    }

    pub fn in_flight(&self) -> usize {
        self.guard.in_flight()
    }

    /// List pending items and dispatch one task per item not already handled
    pub async fn tick(&self) -> ApprovalResult<TickReport> {
        let name = self.name();
        let started = Instant::now();

        let items = self.pipeline.list_pending().await?;
        let mut report = TickReport {
            listed: items.len(),
            ..Default::default()
        };
        crate::metrics::record_items_listed(name, items.len());

        for item in items {
            let id = item.id();

            if self.retired.contains(&id) {
                report.skipped_retired += 1;
                continue;
            }
            if item.is_executed() {
                debug!("{} observed executed", id);
                self.retired.insert(id);
                report.skipped_retired += 1;
                continue;
            }

            let ticket = match self.guard.try_acquire(id) {
                Some(ticket) => ticket,
                None => {
                    debug!("{} still in flight", id);
                    report.skipped_in_flight += 1;
                    continue;
                }
            };

            let pipeline = self.pipeline.clone();
            let retired = self.retired.clone();
            report.handles.push(tokio::spawn(async move {
                let _ticket = ticket;
                settle(name, id, pipeline.process(item).await, &retired)
            }));
            report.dispatched += 1;
        }

        crate::metrics::record_items_dispatched(name, report.dispatched);
        crate::metrics::set_in_flight(name, self.guard.in_flight());
        crate::metrics::observe_tick(name, started.elapsed());
        Ok(report)
    }

    /// Run `tick` on an interval until the returned handle is stopped
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("{} scheduler started ({:?} interval)", self.name(), self.interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.tick().await {
                            Ok(report) if report.dispatched > 0 => {
                                debug!("{}: dispatched {}/{}", self.name(), report.dispatched, report.listed);
                            }
                            Ok(_) => {}
                            Err(e) => {
                                error!("{} listing failed: {}", self.name(), e);
                                crate::metrics::record_failure(self.name(), e.kind());
                            }
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }

            info!("{} scheduler stopped", self.name());
        });

        SchedulerHandle { stop_tx, task }
    }
}

/// Log, meter and classify the result of processing one item
fn settle(
    pipeline: &'static str,
    id: ItemId,
    result: ApprovalResult<ProcessOutcome>,
    retired: &DashSet<ItemId>,
) -> ApprovalResult<ProcessOutcome> {
    let result = match result {
        Ok(outcome) => Ok(outcome),
        Err(ApprovalError::ValidationRejected { .. }) => {
            info!("{} rejected by validator", id);
            Ok(ProcessOutcome::Rejected)
        }
        Err(e) if e.retires_item() => {
            warn!("{} retired: {}", id, e);
            Ok(ProcessOutcome::Retired)
        }
        Err(e) => {
            error!("{} failed: {}", id, e);
            crate::metrics::record_failure(pipeline, e.kind());
            Err(e)
        }
    };

    if let Ok(outcome) = &result {
        if outcome.is_terminal() {
            retired.insert(id);
        }
        crate::metrics::record_outcome(pipeline, outcome.label());
    }
    result
}

/// Stops a running scheduler loop
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the loop and wait for it to exit; in-flight items keep running
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::order::fixtures::order;
    use crate::chain::safe::fixtures::safe_tx;
    use crate::chain::PendingItem;
    use crate::coordination::SafeExecutorPipeline;
    use crate::testing::FakeSafeBackend;
    use crate::tx::{RetryRunner, SafeExecutor};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;
    use tokio_test::{assert_err, assert_ok};

    /// Lists a fixed set of items and answers with a fixed outcome
    struct Scripted {
        items: Mutex<Vec<PendingItem>>,
        outcome: fn(&PendingItem) -> ApprovalResult<ProcessOutcome>,
        processed: AtomicUsize,
        gate: Option<Arc<Notify>>,
        /// Listings that fail before the items are returned
        failing_listings: AtomicUsize,
        listings: AtomicUsize,
    }

    impl Scripted {
        fn new(items: Vec<PendingItem>, outcome: fn(&PendingItem) -> ApprovalResult<ProcessOutcome>) -> Self {
            Self {
                items: Mutex::new(items),
                outcome,
                processed: AtomicUsize::new(0),
                gate: None,
                failing_listings: AtomicUsize::new(0),
                listings: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ApprovalPipeline for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn list_pending(&self) -> ApprovalResult<Vec<PendingItem>> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            let failing = self.failing_listings.load(Ordering::SeqCst);
            if failing > 0 {
                self.failing_listings.store(failing - 1, Ordering::SeqCst);
                return Err(ApprovalError::Chain("rpc unreachable".into()));
            }
            Ok(self.items.lock().unwrap().clone())
        }

        async fn process(&self, item: PendingItem) -> ApprovalResult<ProcessOutcome> {
            self.processed.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            (self.outcome)(&item)
        }
    }

    fn pending_order(seqno: u64) -> PendingItem {
        PendingItem::Order(order(seqno, &["a", "b"], &[false, false]))
    }

    #[tokio::test]
    async fn retired_items_are_never_dispatched_again() {
        let scheduler = Scheduler::new(
            Scripted::new(vec![pending_order(0)], |_| Ok(ProcessOutcome::Retired)),
            Duration::from_secs(5),
        );

        let first = scheduler.tick().await.expect("tick");
        assert_eq!(first.dispatched, 1);
        first.join().await;

        let second = scheduler.tick().await.expect("tick");
        assert_eq!(second.dispatched, 0);
        assert_eq!(second.skipped_retired, 1);
        assert_eq!(scheduler.pipeline.processed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn executed_items_are_retired_without_processing() {
        let mut executed = order(3, &["a"], &[true]);
        executed.executed = true;
        let scheduler = Scheduler::new(
            Scripted::new(vec![PendingItem::Order(executed)], |_| Ok(ProcessOutcome::Approved)),
            Duration::from_secs(5),
        );

        let report = scheduler.tick().await.expect("tick");
        assert_eq!(report.dispatched, 0);
        assert!(scheduler.is_retired(&ItemId::Order(3)));
        assert_eq!(scheduler.pipeline.processed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn in_flight_items_are_skipped() {
        let gate = Arc::new(Notify::new());
        let mut pipeline = Scripted::new(vec![pending_order(0)], |_| Ok(ProcessOutcome::Waiting));
        pipeline.gate = Some(gate.clone());
        let scheduler = Scheduler::new(pipeline, Duration::from_secs(5));

        let first = scheduler.tick().await.expect("tick");
        assert_eq!(first.dispatched, 1);

        let second = scheduler.tick().await.expect("tick");
        assert_eq!(second.skipped_in_flight, 1);
        assert_eq!(second.dispatched, 0);

        gate.notify_one();
        let results = first.join().await;
        assert_eq!(results.len(), 1);
        assert_eq!(*results[0].as_ref().expect("outcome"), ProcessOutcome::Waiting);
        assert_eq!(scheduler.in_flight(), 0);

        // waiting is not terminal, so the item comes back
        let third = scheduler.tick().await.expect("tick");
        assert_eq!(third.dispatched, 1);
        gate.notify_one();
        third.join().await;
    }

    #[tokio::test]
    async fn failures_are_isolated_per_item() {
        let scheduler = Scheduler::new(
            Scripted::new(vec![pending_order(0), pending_order(1)], |item| match item.id() {
                ItemId::Order(0) => Err(ApprovalError::Chain("boom".into())),
                _ => Ok(ProcessOutcome::Approved),
            }),
            Duration::from_secs(5),
        );

        let results = scheduler.tick().await.expect("tick").join().await;
        assert_eq!(results.len(), 2);
        assert_err!(&results[0]);
        assert_ok!(&results[1]);
        assert!(!scheduler.is_retired(&ItemId::Order(0)));
        assert!(scheduler.is_retired(&ItemId::Order(1)));
    }

    #[tokio::test]
    async fn validator_rejection_is_retried_next_tick() {
        let scheduler = Scheduler::new(
            Scripted::new(vec![pending_order(0)], |item| {
                Err(ApprovalError::ValidationRejected {
                    item: item.id().to_string(),
                })
            }),
            Duration::from_secs(5),
        );

        let results = scheduler.tick().await.expect("tick").join().await;
        assert_eq!(*results[0].as_ref().expect("outcome"), ProcessOutcome::Rejected);
        assert_eq!(scheduler.tick().await.expect("tick").dispatched, 1);
    }

    #[tokio::test]
    async fn executed_safe_transaction_is_never_resubmitted() {
        let tx = safe_tx(2, 1, &[1]);
        let backend = Arc::new(FakeSafeBackend::with(vec![tx.clone()]));
        let retry = RetryRunner::new(2, Duration::from_millis(1));
        let pipeline = SafeExecutorPipeline::new(
            backend.clone(),
            SafeExecutor::new(backend.clone(), backend.clone(), retry),
            retry,
        );
        let scheduler = Scheduler::new(pipeline, Duration::from_secs(10));

        let results = scheduler.tick().await.expect("tick").join().await;
        assert_eq!(*results[0].as_ref().expect("outcome"), ProcessOutcome::Executed);
        assert!(scheduler.is_retired(&ItemId::Safe(tx.safe_tx_hash)));

        scheduler.tick().await.expect("tick").join().await;
        assert_eq!(backend.execution_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handle_stops_the_loop() {
        let scheduler = Arc::new(Scheduler::new(
            Scripted::new(vec![], |_| Ok(ProcessOutcome::Skipped)),
            Duration::from_secs(5),
        ));

        let handle = scheduler.clone().start();
        tokio::time::sleep(Duration::from_secs(12)).await;
        handle.stop().await;
        assert_eq!(Arc::strong_count(&scheduler), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_survives_a_failed_listing_and_dispatches_later() {
        let pipeline = Scripted::new(vec![pending_order(4)], |_| Ok(ProcessOutcome::Approved));
        pipeline.failing_listings.store(1, Ordering::SeqCst);
        let scheduler = Arc::new(Scheduler::new(pipeline, Duration::from_secs(5)));

        let handle = scheduler.clone().start();
        // first tick fires immediately and fails, second lands at 5s
        tokio::time::sleep(Duration::from_secs(11)).await;
        handle.stop().await;

        assert!(scheduler.pipeline.listings.load(Ordering::SeqCst) >= 2);
        assert_eq!(scheduler.pipeline.processed.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_retired(&ItemId::Order(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_falls_back_to_minimum() {
        let scheduler = Arc::new(Scheduler::new(
            Scripted::new(vec![], |_| Ok(ProcessOutcome::Skipped)),
            Duration::ZERO,
        ));
        assert_eq!(scheduler.interval, MIN_INTERVAL);

        let handle = scheduler.clone().start();
        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.stop().await;
        assert!(scheduler.pipeline.listings.load(Ordering::SeqCst) >= 3);
    }
}
