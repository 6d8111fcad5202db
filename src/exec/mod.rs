//! Per-unit background task execution.
//!
//! This module is the work-unit model plus the dispatcher that drives it:
//! - **Work units**: [`Task`] (sync or async body, fixed at construction),
//!   [`Output`] (one per executed task, completion-ordered), and the typed
//!   [`Submission`] queue item whose `Shutdown` variant is the terminator.
//! - **Dispatcher**: one long-lived control loop per remote unit that
//!   serializes heterogeneous work onto a single ordered history without
//!   blocking submitters.
//!
//! Task failures are captured into their [`Output`] and never abort the
//! loop; only submissions after shutdown are dropped (with a warning).

pub mod dispatcher;
mod pool;
pub mod task;

pub use dispatcher::Dispatcher;
pub use task::{Output, Submission, Task, TaskError, TaskKind, TaskMeta};
