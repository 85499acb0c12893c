//! Notification state

mod store;

pub use store::{
    Notification, NotificationFilter, NotificationPreferences, NotificationStore, UpsertOutcome,
    DEFAULT_CAPACITY,
};
