//! DAG scheduling and stage execution for walrus.
//!
//! One worker task per stage, a bounded worker-pool semaphore around the
//! container-execution phase, and per-stage completion broadcasts for the
//! dependency wait protocol.

pub mod cache;
pub mod lifecycle;
pub mod profile;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use lifecycle::{UmaskGuard, prepare};
pub use scheduler::{RunOptions, Scheduler, StageOutcome, StageReport};
