//! Janitor Execution Engine
//!
//! This crate runs resolved maintenance plans. Operations execute one at a
//! time in plan order; lifecycle and progress events are relayed to an
//! `ExecutionNotifier`, and the run ends with a `RunOutcome`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       EngineRunner                          │
//! │  - spawn(plan, cancel) → RunHandle                          │
//! │  - one active run at a time                                 │
//! │  - events over an unbounded channel                         │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │  - run(plan, cancel) → RunOutcome                           │
//! │  - sequential execution, fail-fast                          │
//! │  - progress throttling, per-run resource release            │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Operation                            │
//! │  - execute(ctx) with cancellation and progress reporting    │
//! │  - typically drives a janitor-pipeline producer/consumer    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use janitor_engine::{Engine, LogNotifier};
//! use tokio_util::sync::CancellationToken;
//!
//! let plan = janitor_resolver::resolve(selection.options())?;
//! let engine = Engine::with_notifier(registry, services, LogNotifier);
//!
//! match engine.run(&plan, CancellationToken::new()).await? {
//!     RunOutcome::Completed(summary) => println!("{} done", summary.completed.len()),
//!     RunOutcome::Failed(failure) => eprintln!("{}", failure.root_cause),
//!     RunOutcome::Cancelled(_) => eprintln!("cancelled"),
//! }
//! ```

mod engine;
mod error;
mod events;
mod outcome;
mod runner;
mod throttle;

pub use engine::{DEFAULT_MAX_PROGRESS_UPDATES_PER_SECOND, Engine, EngineConfig};
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, LogNotifier, NoopNotifier};
pub use outcome::{OperationFailure, RunOutcome, RunState, RunSummary};
pub use runner::{EngineRunner, RunHandle};
pub use throttle::ProgressThrottle;
