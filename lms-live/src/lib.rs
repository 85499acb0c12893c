//! # lms-live
//!
//! Real-time client for LMS AI analysis jobs:
//! - [`connection`]: authenticated WebSocket link with bounded reconnect
//! - [`registry`]: event subscription registry
//! - [`progress`]: per-job progress aggregation (push + poll)
//! - [`notifications`]: notification state store
//! - [`tracking`]: tracked jobs, tracking modes and the poll fallback
//! - [`context`]: wires the above together for one user session

pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod notifications;
pub mod progress;
pub mod registry;
pub mod tracking;

pub use config::{ConfigOverrides, LiveConfig};
pub use connection::{ConnectionClient, ConnectionPhase, ConnectionState, ReconnectPolicy};
pub use context::LiveContext;
pub use error::{ConnectionError, LiveError, LiveResult, SourceError};
pub use registry::{EventFilter, EventRegistry, Subscription};
