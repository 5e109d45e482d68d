//! Worker pool
//!
//! A fixed set of tasks sharing one bounded intake receiver. Each worker takes
//! one item at a time, runs it through the [`Processor`] and reports an
//! [`Outcome`] on the unbounded completion channel.

use crate::event::{Disposition, Outcome, WorkItem};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long a worker waits for work before re-checking the shutdown flag.
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Trait for job processors.
///
/// Implementations must always reach a disposition; failures are routed
/// through retry/DLQ inside `process`, never returned.
///
/// # Example
///
/// ```rust,ignore
/// use job_worker::{Disposition, Processor, WorkItem};
///
/// struct EchoProcessor;
///
/// #[async_trait]
/// impl Processor for EchoProcessor {
///     async fn process(&self, item: &WorkItem) -> Disposition {
///         println!("{}", String::from_utf8_lossy(item.payload()));
///         Disposition::Completed
///     }
///
///     fn name(&self) -> &'static str {
///         "EchoProcessor"
///     }
/// }
/// ```
#[async_trait]
pub trait Processor: Send + Sync {
    /// Process a single work item to a terminal disposition.
    async fn process(&self, item: &WorkItem) -> Disposition;

    /// Get the processor name for logging.
    fn name(&self) -> &'static str;
}

/// Running worker tasks.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    pub fn spawn<P>(
        size: usize,
        processor: Arc<P>,
        intake: mpsc::Receiver<WorkItem>,
        completions: mpsc::UnboundedSender<Outcome>,
        shutdown: watch::Receiver<bool>,
    ) -> Self
    where
        P: Processor + ?Sized + 'static,
    {
        let intake = Arc::new(Mutex::new(intake));
        let handles = (0..size.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    processor.clone(),
                    intake.clone(),
                    completions.clone(),
                    shutdown.clone(),
                ))
            })
            .collect::<Vec<_>>();

        info!(workers = handles.len(), processor = processor.name(), "Worker pool started");
        Self { handles }
    }

    #[cfg(test)]
    fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to finish its current item and exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }
    }
}

async fn worker_loop<P>(
    id: usize,
    processor: Arc<P>,
    intake: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    completions: mpsc::UnboundedSender<Outcome>,
    shutdown: watch::Receiver<bool>,
) where
    P: Processor + ?Sized,
{
    debug!(worker = id, "Worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let next = tokio::time::timeout(RECV_TIMEOUT, async {
            intake.lock().await.recv().await
        })
        .await;

        let item = match next {
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(item)) => item,
        };

        let disposition = processor.process(&item).await;
        debug!(
            worker = id,
            offset = item.offset(),
            disposition = %disposition,
            "Work item finished"
        );

        if completions.send(Outcome::new(item, disposition)).is_err() {
            warn!(worker = id, "Completion queue closed, stopping worker");
            break;
        }
    }

    debug!(worker = id, "Worker stopped");
}
