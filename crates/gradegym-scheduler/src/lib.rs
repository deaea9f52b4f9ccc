//! Step-indexed priority scheduling for the grading pipeline.
//!
//! One priority queue per stage, a shared lock, pause flags for the two
//! worker populations, and a versioned on-disk snapshot that survives
//! process restarts.

pub mod queue;
pub mod step_queue;
pub mod worker;

pub use queue::PriorityQueue;
pub use step_queue::{DEFAULT_PRIORITY, SchedulerError, StepQueue};
pub use worker::{AdvisoryWorker, WorkerPool};
