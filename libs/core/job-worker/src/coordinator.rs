//! Consumption coordinator
//!
//! Single control loop that owns the broker consumer. Every iteration it:
//! 1. drains finished outcomes and commits what the [`CommitTracker`] releases,
//!    retrying earlier failed commits first
//! 2. pauses or resumes the consumer depending on intake-queue fullness
//! 3. polls one message (or takes one queued for local redelivery)
//! 4. enqueues it for the worker pool, blocking while the queue is full
//!
//! On shutdown it stops polling, closes the intake queue, waits for workers
//! to finish their current item, commits what finished and closes the
//! consumer.

use crate::backpressure::{Backpressure, FlowAction};
use crate::broker::{BrokerConsumer, BrokerMessage};
use crate::commit::CommitTracker;
use crate::config::WorkerConfig;
use crate::error::BrokerError;
use crate::event::{Outcome, WorkItem};
use crate::metrics::WorkerMetrics;
use crate::pool::{Processor, WorkerPool};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub struct Coordinator<C: BrokerConsumer> {
    consumer: C,
    config: WorkerConfig,
    tracker: CommitTracker,
    flow: Backpressure,
    redelivery: VecDeque<WorkItem>,
    /// Released by the tracker but not yet accepted by the broker, in offset order.
    uncommitted: VecDeque<BrokerMessage>,
    metrics: WorkerMetrics,
}

impl<C: BrokerConsumer> Coordinator<C> {
    pub fn new(consumer: C, config: WorkerConfig) -> Self {
        let metrics = WorkerMetrics::new(config.topic.clone());
        Self {
            consumer,
            config,
            tracker: CommitTracker::new(),
            flow: Backpressure::new(),
            redelivery: VecDeque::new(),
            uncommitted: VecDeque::new(),
            metrics,
        }
    }

    /// Run until `shutdown` flips to `true`.
    pub async fn run<P>(
        mut self,
        processor: Arc<P>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BrokerError>
    where
        P: Processor + ?Sized + 'static,
    {
        info!(
            topic = %self.config.topic,
            concurrency = self.config.concurrency,
            queue_capacity = self.config.queue_capacity,
            processor = processor.name(),
            "Starting consumption loop"
        );

        self.consumer
            .subscribe(std::slice::from_ref(&self.config.topic))
            .await?;

        let (intake_tx, intake_rx) = mpsc::channel::<WorkItem>(self.config.queue_capacity);
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Outcome>();
        let pool = WorkerPool::spawn(
            self.config.concurrency,
            processor,
            intake_rx,
            done_tx,
            shutdown.clone(),
        );

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping consumption");
                break;
            }

            self.drain_completions(&mut done_rx).await;

            let queue_full = intake_tx.capacity() == 0;
            self.apply_backpressure(queue_full).await;
            self.metrics
                .intake_depth(intake_tx.max_capacity() - intake_tx.capacity());

            let item = match self.next_item(queue_full, &mut shutdown).await {
                Some(item) => item,
                None => continue,
            };

            tokio::select! {
                sent = intake_tx.send(item) => {
                    if sent.is_err() {
                        error!("Intake queue closed unexpectedly");
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    // The item stays uncommitted and is redelivered by the broker.
                    info!("Shutdown while waiting for intake capacity");
                    break;
                }
            }
        }

        drop(intake_tx);
        pool.join().await;
        self.drain_completions(&mut done_rx).await;

        let outstanding = self.tracker.outstanding();
        if outstanding > 0 || !self.redelivery.is_empty() || !self.uncommitted.is_empty() {
            warn!(
                outstanding,
                redelivery = self.redelivery.len(),
                uncommitted = self.uncommitted.len(),
                "Stopping with uncommitted messages; they will be redelivered"
            );
        }

        self.consumer.close().await?;
        info!("Consumption loop stopped");
        Ok(())
    }

    /// Take a locally queued redelivery if there is room, otherwise poll.
    async fn next_item(
        &mut self,
        queue_full: bool,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<WorkItem> {
        if !queue_full && let Some(item) = self.redelivery.pop_front() {
            debug!(offset = item.offset(), "Redelivering uncommitted item");
            return Some(item);
        }

        match self.consumer.poll(self.config.poll_timeout).await {
            Ok(Some(message)) => {
                self.metrics.message_received();
                self.tracker.track(&message);
                Some(WorkItem::new(message))
            }
            Ok(None) => None,
            Err(e) if e.is_partition_eof() => None,
            Err(e) => {
                self.metrics.broker_error();
                warn!(error = %e, "Broker poll failed");
                tokio::select! {
                    _ = tokio::time::sleep(self.config.error_backoff) => {}
                    _ = shutdown.changed() => {}
                }
                None
            }
        }
    }

    async fn drain_completions(&mut self, done_rx: &mut mpsc::UnboundedReceiver<Outcome>) {
        while let Ok(outcome) = done_rx.try_recv() {
            if !outcome.commit {
                warn!(
                    offset = outcome.item.offset(),
                    disposition = %outcome.disposition,
                    "Outcome not committable, queueing for redelivery"
                );
                self.metrics.redelivered();
                self.redelivery.push_back(outcome.item);
                continue;
            }

            self.uncommitted
                .extend(self.tracker.complete(outcome.item.message));
        }

        self.commit_released().await;
    }

    /// Commit released messages in order, stopping at the first failure so
    /// it is retried before anything newer on the next iteration.
    async fn commit_released(&mut self) {
        while let Some(message) = self.uncommitted.front() {
            match self.consumer.commit(message).await {
                Ok(()) => {
                    self.metrics.committed();
                    debug!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        "Committed offset"
                    );
                    self.uncommitted.pop_front();
                }
                Err(e) => {
                    self.metrics.commit_failed();
                    error!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        pending = self.uncommitted.len(),
                        error = %e,
                        "Offset commit failed, will retry"
                    );
                    break;
                }
            }
        }
    }

    async fn apply_backpressure(&mut self, queue_full: bool) {
        let action = self.flow.evaluate(queue_full);
        let result = match action {
            FlowAction::Pause => self.consumer.pause().await,
            FlowAction::Resume => self.consumer.resume().await,
            FlowAction::Hold => return,
        };

        match result {
            Ok(()) => {
                self.flow.applied(action);
                self.metrics.consumer_paused(self.flow.is_paused());
                debug!(action = ?action, "Consumer flow changed");
            }
            Err(e) => warn!(action = ?action, error = %e, "Failed to change consumer flow"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Headers;
    use crate::event::Disposition;
    use crate::memory::MemoryBroker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Completes items only as permits are released.
    struct GatedProcessor {
        gate: Semaphore,
        processed: AtomicUsize,
    }

    #[async_trait]
    impl Processor for GatedProcessor {
        async fn process(&self, _item: &WorkItem) -> Disposition {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            self.processed.fetch_add(1, Ordering::SeqCst);
            Disposition::Completed
        }

        fn name(&self) -> &'static str {
            "GatedProcessor"
        }
    }

    /// Finishes later offsets before earlier ones.
    struct ReverseDelayProcessor;

    #[async_trait]
    impl Processor for ReverseDelayProcessor {
        async fn process(&self, item: &WorkItem) -> Disposition {
            let delay = 60u64.saturating_sub(item.offset() as u64 * 20);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Disposition::Completed
        }

        fn name(&self) -> &'static str {
            "ReverseDelayProcessor"
        }
    }

    /// Completes every item immediately.
    struct InstantProcessor;

    #[async_trait]
    impl Processor for InstantProcessor {
        async fn process(&self, _item: &WorkItem) -> Disposition {
            Disposition::Completed
        }

        fn name(&self) -> &'static str {
            "InstantProcessor"
        }
    }

    /// Leaves the first attempt unresolved.
    struct FlakyPublishProcessor {
        failed_once: AtomicBool,
    }

    #[async_trait]
    impl Processor for FlakyPublishProcessor {
        async fn process(&self, _item: &WorkItem) -> Disposition {
            if self.failed_once.swap(true, Ordering::SeqCst) {
                Disposition::DeadLettered
            } else {
                Disposition::Unresolved
            }
        }

        fn name(&self) -> &'static str {
            "FlakyPublishProcessor"
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig::new("stt.jobs")
            .with_poll_timeout(Duration::from_millis(10))
            .with_error_backoff(Duration::from_millis(10))
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_pauses_at_capacity_and_resumes_when_slot_frees() {
        let broker = MemoryBroker::new();
        for _ in 0..6 {
            broker.push("stt.jobs", None, b"{}", Headers::new());
        }

        let processor = Arc::new(GatedProcessor {
            gate: Semaphore::new(0),
            processed: AtomicUsize::new(0),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let coordinator = Coordinator::new(
            broker.consumer(),
            config().with_concurrency(1).with_queue_capacity(1),
        );
        let handle = tokio::spawn(coordinator.run(processor.clone(), shutdown_rx));

        // One item in flight, one waiting in the queue: consumption pauses.
        wait_until(|| broker.pending() == 4 && broker.is_paused()).await;
        let resumes = broker.resume_count();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(broker.is_paused());
        assert_eq!(broker.resume_count(), resumes);
        assert_eq!(broker.pending(), 4);
        assert!(broker.committed().is_empty());

        // Free a slot: consumption resumes.
        processor.gate.add_permits(1);
        wait_until(|| broker.resume_count() > resumes).await;

        processor.gate.add_permits(100);
        wait_until(|| broker.committed().len() == 6).await;
        assert_eq!(processor.processed.load(Ordering::SeqCst), 6);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        assert!(broker.is_closed());
    }

    #[tokio::test]
    async fn test_commits_follow_offset_order() {
        let broker = MemoryBroker::new();
        for _ in 0..3 {
            broker.push("stt.jobs", None, b"{}", Headers::new());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let coordinator = Coordinator::new(
            broker.consumer(),
            config().with_concurrency(3).with_queue_capacity(3),
        );
        let handle = tokio::spawn(coordinator.run(Arc::new(ReverseDelayProcessor), shutdown_rx));

        wait_until(|| broker.committed().len() == 3).await;
        assert_eq!(broker.committed_offsets(), vec![0, 1, 2]);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unresolved_outcome_is_redelivered_not_committed() {
        let broker = MemoryBroker::new();
        broker.push("stt.jobs", None, b"{}", Headers::new());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let coordinator = Coordinator::new(broker.consumer(), config());
        let processor = Arc::new(FlakyPublishProcessor {
            failed_once: AtomicBool::new(false),
        });
        let handle = tokio::spawn(coordinator.run(processor, shutdown_rx));

        wait_until(|| broker.committed().len() == 1).await;
        assert_eq!(broker.committed_offsets(), vec![0]);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failed_commit_is_retried_before_newer_offsets() {
        let broker = MemoryBroker::new();
        for _ in 0..3 {
            broker.push("stt.jobs", None, b"{}", Headers::new());
        }
        broker.fail_commits(true);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let coordinator = Coordinator::new(
            broker.consumer(),
            config().with_concurrency(3).with_queue_capacity(3),
        );
        let handle = tokio::spawn(coordinator.run(Arc::new(InstantProcessor), shutdown_rx));

        // Keeps retrying the head of the line while the broker rejects commits.
        wait_until(|| broker.failed_commits() >= 3 && broker.pending() == 0).await;
        assert!(broker.committed().is_empty());

        broker.fail_commits(false);
        wait_until(|| broker.committed().len() == 3).await;
        assert_eq!(broker.committed_offsets(), vec![0, 1, 2]);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_poll_errors_do_not_stop_the_loop() {
        let broker = MemoryBroker::new();
        for _ in 0..3 {
            broker.push("stt.jobs", None, b"{}", Headers::new());
        }
        broker.fail_polls(true);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let coordinator = Coordinator::new(broker.consumer(), config().with_concurrency(2));
        let handle = tokio::spawn(coordinator.run(Arc::new(InstantProcessor), shutdown_rx));

        wait_until(|| broker.poll_count() >= 3).await;
        assert!(!handle.is_finished());
        assert_eq!(broker.pending(), 3);

        broker.fail_polls(false);
        wait_until(|| broker.committed().len() == 3).await;
        assert_eq!(broker.committed_offsets(), vec![0, 1, 2]);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_partition_eof_is_not_backed_off() {
        let broker = MemoryBroker::new();
        broker.eof_polls(true);

        // A real error would hold the loop for the whole backoff.
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let coordinator = Coordinator::new(
            broker.consumer(),
            config().with_error_backoff(Duration::from_secs(60)),
        );
        let handle = tokio::spawn(coordinator.run(Arc::new(InstantProcessor), shutdown_rx));

        wait_until(|| broker.poll_count() >= 20).await;

        broker.eof_polls(false);
        broker.push("stt.jobs", None, b"{}", Headers::new());
        wait_until(|| broker.committed().len() == 1).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_poll_error_waits_for_backoff() {
        let broker = MemoryBroker::new();
        broker.fail_polls(true);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let coordinator = Coordinator::new(
            broker.consumer(),
            config().with_error_backoff(Duration::from_secs(60)),
        );
        let handle = tokio::spawn(coordinator.run(Arc::new(InstantProcessor), shutdown_rx));

        wait_until(|| broker.poll_count() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.poll_count(), 1);

        // Shutdown interrupts the backoff.
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("coordinator did not stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_with_idle_broker() {
        let broker = MemoryBroker::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let coordinator = Coordinator::new(broker.consumer(), config().with_concurrency(2));
        let processor = Arc::new(GatedProcessor {
            gate: Semaphore::new(0),
            processed: AtomicUsize::new(0),
        });
        let handle = tokio::spawn(coordinator.run(processor, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("coordinator did not stop")
            .unwrap()
            .unwrap();
        assert!(broker.is_closed());
    }
}
