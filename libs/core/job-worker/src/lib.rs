//! Job Worker Framework
//!
//! A generic at-least-once message worker: one coordinator task pulls messages
//! from a broker, hands them to a fixed pool of workers through a bounded
//! intake queue and commits offsets once the workers report back.
//!
//! ## Features
//!
//! - **Broker-agnostic**: `BrokerConsumer` / `BrokerProducer` traits, with a
//!   Redis Streams adapter and an in-memory broker for tests
//! - **Backpressure**: the consumer is paused while the intake queue is full
//! - **Ordered commits**: offsets only advance contiguously per partition
//! - **Retry / DLQ**: header-carried attempt counter, exponential backoff with
//!   jitter, dead-letter records for terminal failures
//! - **Idempotency cache**: TTL-bounded set of completed job ids
//! - **Health endpoints**: readiness lifecycle and Prometheus metrics over axum
//!
//! ## Example
//!
//! ```ignore
//! use job_worker::{Coordinator, WorkerConfig};
//!
//! let config = WorkerConfig::new("stt.jobs")
//!     .with_concurrency(4)
//!     .with_queue_capacity(8);
//!
//! let coordinator = Coordinator::new(consumer, config);
//! coordinator.run(Arc::new(processor), shutdown_rx).await?;
//! ```

mod backoff;
mod backpressure;
mod broker;
mod commit;
mod config;
mod coordinator;
mod dlq;
mod error;
mod event;
mod health;
mod idempotency;
pub mod memory;
pub mod metrics;
mod pool;
mod readiness;
pub mod redis_streams;
mod retry;

pub use backoff::Backoff;
pub use backpressure::{Backpressure, FlowAction};
pub use broker::{ATTEMPT_HEADER, BrokerConsumer, BrokerMessage, BrokerProducer, Headers};
pub use commit::CommitTracker;
pub use config::WorkerConfig;
pub use coordinator::Coordinator;
pub use dlq::DlqRecord;
pub use error::{BrokerError, RetryableError};
pub use event::{Disposition, Outcome, WorkItem};
pub use health::{HealthResponse, HealthState, health_router, metrics_router};
pub use idempotency::IdempotencyCache;
pub use self::metrics::{WorkerMetrics, init_metrics};
pub use pool::{Processor, WorkerPool};
pub use readiness::{Lifecycle, ReadinessSnapshot, ReadinessState};
pub use retry::RetryPolicy;
