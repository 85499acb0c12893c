//! Insertion-ordered notification store with an incrementally maintained
//! unread counter

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use lms_common::config::NotificationConfig;
use lms_common::events::{NotificationKind, NotificationPayload, Priority, Severity, SignificantChange};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// Default retained notification count
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub priority: Priority,
    pub is_read: bool,
    pub timestamp: DateTime<Utc>,
    pub owner_user_id: Option<String>,
    pub metadata: serde_json::Value,
}

impl Notification {
    pub fn new(id: impl Into<String>, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            message: message.into(),
            kind: NotificationKind::default(),
            priority: Priority::default(),
            is_read: false,
            timestamp: Utc::now(),
            owner_user_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_kind(mut self, kind: NotificationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_owner(mut self, user_id: impl Into<String>) -> Self {
        self.owner_user_id = Some(user_id.into());
        self
    }

    pub fn read(mut self) -> Self {
        self.is_read = true;
        self
    }

    /// Build from a pushed `notification` payload
    pub fn from_payload(payload: NotificationPayload) -> Self {
        Self {
            id: payload.id,
            title: payload.title,
            message: payload.message,
            kind: payload.kind.unwrap_or_default(),
            priority: payload.priority.unwrap_or_default(),
            is_read: payload.is_read,
            timestamp: payload.timestamp.unwrap_or_else(Utc::now),
            owner_user_id: payload.owner_user_id,
            metadata: payload.metadata,
        }
    }

    /// Build an analytics alert from a `significant_change` event
    pub fn from_significant_change(change: &SignificantChange) -> Self {
        let severity = change.severity();
        let kind = if severity >= Severity::High {
            NotificationKind::Warning
        } else {
            NotificationKind::Analysis
        };
        let title = match &change.metric {
            Some(metric) => format!("Significant change in {}", metric),
            None => "Significant change detected".to_string(),
        };

        Self {
            id: format!("change-{}", Uuid::new_v4()),
            title,
            message: change.message.clone(),
            kind,
            priority: Priority::from(severity),
            is_read: false,
            timestamp: Utc::now(),
            owner_user_id: None,
            metadata: json!({
                "metric": change.metric,
                "jobId": change.job_id,
                "contentId": change.content_id,
                "changePercent": change.change_percent,
            }),
        }
    }
}

/// Criteria for [`NotificationStore::list`]; unset fields match everything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationFilter {
    pub priority: Option<Priority>,
    pub kind: Option<NotificationKind>,
    pub is_read: Option<bool>,
}

impl NotificationFilter {
    pub fn unread() -> Self {
        Self {
            is_read: Some(false),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_kind(mut self, kind: NotificationKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn matches(&self, notification: &Notification) -> bool {
        self.priority.map_or(true, |p| notification.priority == p)
            && self.kind.map_or(true, |k| notification.kind == k)
            && self.is_read.map_or(true, |r| notification.is_read == r)
    }
}

/// User preferences applied by [`NotificationStore::ingest`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationPreferences {
    pub minimum_priority: Priority,
    pub muted_kinds: HashSet<NotificationKind>,
}

impl NotificationPreferences {
    pub fn allows(&self, notification: &Notification) -> bool {
        notification.priority >= self.minimum_priority
            && !self.muted_kinds.contains(&notification.kind)
    }
}

impl From<&NotificationConfig> for NotificationPreferences {
    fn from(config: &NotificationConfig) -> Self {
        Self {
            minimum_priority: config.minimum_priority,
            muted_kinds: config.muted_kinds.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// Existing entry with the same id replaced in place
    Updated,
}

/// Notification store
///
/// Entries keep insertion order; replacing an entry keeps its position.
/// When more than `capacity` entries are held the oldest are evicted.
#[derive(Debug)]
pub struct NotificationStore {
    records: IndexMap<String, Notification>,
    unread: usize,
    capacity: usize,
    preferences: NotificationPreferences,
    owner_user_id: Option<String>,
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl NotificationStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: IndexMap::new(),
            unread: 0,
            capacity: capacity.max(1),
            preferences: NotificationPreferences::default(),
            owner_user_id: None,
        }
    }

    pub fn with_preferences(mut self, preferences: NotificationPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn preferences(&self) -> &NotificationPreferences {
        &self.preferences
    }

    pub fn set_preferences(&mut self, preferences: NotificationPreferences) {
        self.preferences = preferences;
    }

    /// Restrict `ingest` to notifications for this user
    pub fn set_owner(&mut self, user_id: Option<String>) {
        self.owner_user_id = user_id;
    }

    /// Insert or replace by id
    pub fn upsert(&mut self, notification: Notification) -> UpsertOutcome {
        if let Some(existing) = self.records.get_mut(&notification.id) {
            match (existing.is_read, notification.is_read) {
                (false, true) => self.unread -= 1,
                (true, false) => self.unread += 1,
                _ => {}
            }
            *existing = notification;
            return UpsertOutcome::Updated;
        }

        if !notification.is_read {
            self.unread += 1;
        }
        self.records.insert(notification.id.clone(), notification);
        self.evict_overflow();
        UpsertOutcome::Inserted
    }

    /// Upsert a pushed notification after owner and preference checks
    ///
    /// Returns `None` when the notification was filtered out.
    pub fn ingest(&mut self, notification: Notification) -> Option<UpsertOutcome> {
        if let (Some(owner), Some(target)) = (&self.owner_user_id, &notification.owner_user_id) {
            if owner != target {
                debug!("Dropping notification {} addressed to another user", notification.id);
                return None;
            }
        }
        if !self.preferences.allows(&notification) {
            debug!(
                "Notification {} filtered by preferences ({:?}, {:?})",
                notification.id, notification.kind, notification.priority
            );
            return None;
        }
        Some(self.upsert(notification))
    }

    /// Returns false when `id` is unknown
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.records.get_mut(id) {
            Some(notification) => {
                if !notification.is_read {
                    notification.is_read = true;
                    self.unread -= 1;
                }
                true
            }
            None => false,
        }
    }

    /// Mark everything read; returns how many changed
    pub fn mark_all_read(&mut self) -> usize {
        let changed = self.unread;
        for notification in self.records.values_mut() {
            notification.is_read = true;
        }
        self.unread = 0;
        changed
    }

    pub fn remove(&mut self, id: &str) -> Option<Notification> {
        let removed = self.records.shift_remove(id)?;
        if !removed.is_read {
            self.unread -= 1;
        }
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.unread = 0;
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.records.get(id)
    }

    /// Matching notifications in insertion order
    pub fn list(&self, filter: Option<NotificationFilter>) -> impl Iterator<Item = &Notification> + '_ {
        self.records
            .values()
            .filter(move |notification| filter.map_or(true, |f| f.matches(notification)))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_overflow(&mut self) {
        while self.records.len() > self.capacity {
            if let Some((id, evicted)) = self.records.shift_remove_index(0) {
                if !evicted.is_read {
                    self.unread -= 1;
                }
                debug!("Evicted notification {} (capacity {})", id, self.capacity);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn note(id: &str) -> Notification {
        Notification::new(id, format!("title {}", id), "body")
    }

    fn literal_unread(store: &NotificationStore) -> usize {
        store.list(None).filter(|n| !n.is_read).count()
    }

    #[test]
    fn test_upsert_same_id_replaces_in_place() {
        let mut store = NotificationStore::default();
        store.upsert(note("a"));
        store.upsert(note("b"));
        assert_eq!(
            store.upsert(note("a").with_priority(Priority::High)),
            UpsertOutcome::Updated
        );

        let ids: Vec<&str> = store.list(None).map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.get("a").unwrap().priority, Priority::High);
        assert_eq!(store.unread_count(), 2);
    }

    #[test]
    fn test_upsert_read_state_transitions_adjust_counter() {
        let mut store = NotificationStore::default();
        store.upsert(note("a"));
        store.upsert(note("a").read());
        assert_eq!(store.unread_count(), 0);

        store.upsert(note("a"));
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn test_mark_read_and_unknown_id() {
        let mut store = NotificationStore::default();
        store.upsert(note("a"));
        store.upsert(note("b"));

        assert!(store.mark_read("a"));
        assert!(store.mark_read("a"), "already read is still a known id");
        assert!(!store.mark_read("missing"));
        assert_eq!(store.unread_count(), 1);

        assert_eq!(store.mark_all_read(), 1);
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut store = NotificationStore::default();
        store.upsert(note("a"));
        store.upsert(note("b").read());

        assert!(store.remove("a").is_some());
        assert!(store.remove("a").is_none());
        assert_eq!(store.unread_count(), 0);
        assert_eq!(store.len(), 1);

        store.upsert(note("c"));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn test_list_filters_compose() {
        let mut store = NotificationStore::default();
        store.upsert(note("a").with_priority(Priority::High).with_kind(NotificationKind::Analysis));
        store.upsert(note("b").with_priority(Priority::High).read());
        store.upsert(note("c").with_kind(NotificationKind::Analysis));

        let high_unread: Vec<&str> = store
            .list(Some(NotificationFilter::unread().with_priority(Priority::High)))
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(high_unread, vec!["a"]);

        let analysis = store
            .list(Some(NotificationFilter::default().with_kind(NotificationKind::Analysis)))
            .count();
        assert_eq!(analysis, 2);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut store = NotificationStore::new(3);
        for id in ["a", "b", "c", "d", "e"] {
            store.upsert(note(id));
        }
        let ids: Vec<&str> = store.list(None).map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d", "e"]);
        assert_eq!(store.unread_count(), 3);
    }

    #[test]
    fn test_ingest_applies_preferences_and_owner() {
        let preferences = NotificationPreferences {
            minimum_priority: Priority::Medium,
            muted_kinds: HashSet::from([NotificationKind::Course]),
        };
        let mut store = NotificationStore::default().with_preferences(preferences);
        store.set_owner(Some("u-1".to_string()));

        assert!(store.ingest(note("low").with_priority(Priority::Low)).is_none());
        assert!(store.ingest(note("muted").with_kind(NotificationKind::Course)).is_none());
        assert!(store.ingest(note("other").with_owner("u-2")).is_none());
        assert_eq!(store.ingest(note("mine").with_owner("u-1")), Some(UpsertOutcome::Inserted));
        assert_eq!(store.ingest(note("broadcast")), Some(UpsertOutcome::Inserted));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_significant_change_conversion() {
        let change = SignificantChange {
            severity: Some(Severity::Critical),
            message: "Engagement dropped 40%".to_string(),
            metric: Some("engagement".to_string()),
            job_id: Some("J1".to_string()),
            change_percent: Some(-40.0),
            ..Default::default()
        };
        let first = Notification::from_significant_change(&change);
        let second = Notification::from_significant_change(&change);

        assert_ne!(first.id, second.id);
        assert_eq!(first.priority, Priority::Urgent);
        assert_eq!(first.kind, NotificationKind::Warning);
        assert_eq!(first.title, "Significant change in engagement");
        assert_eq!(first.metadata["jobId"], "J1");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Upsert(String),
        UpsertRead(String),
        Ingest(String, Priority),
        MarkRead(String),
        MarkAllRead,
        Remove(String),
        Clear,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let id = (0u8..12).prop_map(|n| format!("n{}", n));
        let priority = prop::sample::select(vec![
            Priority::Low,
            Priority::Medium,
            Priority::High,
            Priority::Urgent,
        ]);
        prop_oneof![
            4 => id.clone().prop_map(Op::Upsert),
            2 => id.clone().prop_map(Op::UpsertRead),
            2 => (id.clone(), priority).prop_map(|(id, p)| Op::Ingest(id, p)),
            3 => id.clone().prop_map(Op::MarkRead),
            1 => Just(Op::MarkAllRead),
            2 => id.prop_map(Op::Remove),
            1 => Just(Op::Clear),
        ]
    }

    fn apply(store: &mut NotificationStore, op: &Op) {
        match op {
            Op::Upsert(id) => {
                store.upsert(note(id));
            }
            Op::UpsertRead(id) => {
                store.upsert(note(id).read());
            }
            Op::Ingest(id, priority) => {
                store.ingest(note(id).with_priority(*priority));
            }
            Op::MarkRead(id) => {
                store.mark_read(id);
            }
            Op::MarkAllRead => {
                store.mark_all_read();
            }
            Op::Remove(id) => {
                store.remove(id);
            }
            Op::Clear => store.clear(),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        /// The unread counter equals the literal unread count after every operation.
        #[test]
        fn prop_unread_count_matches_literal_count(
            ops in prop::collection::vec(op_strategy(), 1..80)
        ) {
            let preferences = NotificationPreferences {
                minimum_priority: Priority::Medium,
                muted_kinds: HashSet::new(),
            };
            let mut store = NotificationStore::new(8).with_preferences(preferences);

            for (i, op) in ops.iter().enumerate() {
                apply(&mut store, op);
                prop_assert_eq!(
                    store.unread_count(),
                    literal_unread(&store),
                    "after op {}: {:?}",
                    i,
                    op
                );
                prop_assert!(store.len() <= 8);
            }
        }

        /// Marking an unread record read drops the count by exactly one; repeating is a no-op.
        #[test]
        fn prop_mark_read_decrements_once(
            ops in prop::collection::vec(op_strategy(), 0..40),
            target in (0u8..12).prop_map(|n| format!("n{}", n))
        ) {
            let mut store = NotificationStore::new(8);
            for op in &ops {
                apply(&mut store, op);
            }

            let before = store.unread_count();
            let was_unread = store.get(&target).is_some_and(|n| !n.is_read);
            store.mark_read(&target);
            prop_assert_eq!(store.unread_count(), before - usize::from(was_unread));
            store.mark_read(&target);
            prop_assert_eq!(store.unread_count(), before - usize::from(was_unread));
        }
    }
}
