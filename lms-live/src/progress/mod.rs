//! Job progress aggregation
//!
//! Owns one [`JobProgressRecord`] per tracked job and merges the push and
//! poll channels into it.

mod aggregator;
mod record;

pub use aggregator::{ApplyOutcome, ProgressAggregator};
pub use record::{JobProgressRecord, ModelProgress, TimelineEntry, TimelineKind};
