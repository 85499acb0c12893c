//! # LMS Common Library
//!
//! Shared code for the LMS live-analysis client and the simulation server:
//! - Push event types (LiveEvent enum) and the EventBus
//! - Outbound command types and the JSON frame envelope
//! - Configuration loading
//! - Common error type

pub mod commands;
pub mod config;
pub mod error;
pub mod events;

pub use commands::{Frame, OutboundCommand};
pub use error::{Error, Result};
pub use events::{EventBus, LiveEvent};
