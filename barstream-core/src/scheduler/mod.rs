//! Incremental scheduling: one-time backfill followed by per-event
//! recomputation on a live thread.

pub mod executor;
pub mod processor;

pub use executor::{Executor, LiveOutcome, LiveSubscription};
pub use processor::{EventProcessor, ProcessorStats, StatsSnapshot};
