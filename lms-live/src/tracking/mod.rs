//! Job tracking: which jobs are followed, how, and the poll fallback
//!
//! Push is the primary channel. Polling runs per job whenever push cannot be
//! relied on (offline, or connected but quiet for longer than the staleness
//! window) and auto-refresh is enabled.

mod poller;
mod source;
mod tracker;

pub use poller::PollScheduler;
pub use source::{HttpProgressSource, ProgressSource};
pub use tracker::{select_mode, JobTracker, TrackingMode};
