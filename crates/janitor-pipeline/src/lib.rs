//! Janitor Pipeline
//!
//! Bounded, backpressured async producer/consumer building blocks that
//! maintenance operations use to process large record sets in parallel
//! without unbounded memory growth.
//!
//! # Architecture
//!
//! ```text
//!  generator workers ──enqueue──▶ BoundedProducer ──dequeue──▶ ConsumerPool
//!                                  (capacity K)                 (N workers)
//!                                                                    │
//!                                                       convert ─────┘
//!                                                          │
//!                                                          ▼
//!                                                Pipe (BoundedProducer) ──▶ next stage
//! ```
//!
//! A full buffer suspends writers; an empty buffer suspends readers. Every
//! suspension point observes a `CancellationToken`.
//!
//! # Usage
//!
//! ```ignore
//! use janitor_pipeline::{BoundedProducer, ConsumerPool, Pipe};
//!
//! let ids = BoundedProducer::generate(64, 1, |handle| async move {
//!     for id in 0..10_000u64 {
//!         handle.enqueue(id).await?;
//!     }
//!     Ok(())
//! })?;
//!
//! let blobs = Pipe::new(ids, 16, 4, |id| async move { Ok(Some(load(id).await?)) })?;
//!
//! ConsumerPool::new(blobs)
//!     .concurrency(2)
//!     .run(|blob| async move { store(blob).await }, &cancel)
//!     .await?;
//! ```

mod consumer;
mod error;
mod pipe;
mod producer;
mod progress;
mod signal;
mod source;

pub use consumer::{ConsumerPool, DEFAULT_CONCURRENCY, POLL_INTERVAL};
pub use error::{BoxError, PipelineError};
pub use pipe::Pipe;
pub use producer::{BoundedProducer, ProducerHandle};
pub use progress::ProgressAggregator;
pub use signal::Signal;
pub use source::{Dequeued, Source};
