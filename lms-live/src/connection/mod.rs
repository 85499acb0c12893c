//! Live channel connection management

mod backoff;
mod client;
mod state;

pub use backoff::ReconnectPolicy;
pub use client::ConnectionClient;
pub use state::{ConnectionPhase, ConnectionState};
