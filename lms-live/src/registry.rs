//! Event subscription registry
//!
//! Maps event names to callbacks. Dispatch snapshots the matching entries and
//! invokes them without holding the registry lock, so callbacks may subscribe
//! or unsubscribe re-entrantly. Each entry carries an `active` flag that is
//! checked immediately before invocation: once `unsubscribe()` returns, the
//! callback is never called again.

use lms_common::events::{LiveEvent, Severity};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

/// Callback invoked for every dispatched event that passes the filter
pub type EventHandler = Arc<dyn Fn(&LiveEvent) + Send + Sync>;

/// Subscription identifier, unique per registry
pub type SubscriptionId = u64;

/// Per-subscription predicate evaluated before the callback
#[derive(Clone)]
pub struct EventFilter {
    predicate: Arc<dyn Fn(&LiveEvent) -> bool + Send + Sync>,
}

impl EventFilter {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&LiveEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Only events referring to `job_id`
    pub fn job(job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        Self::new(move |event| event.job_id() == Some(job_id.as_str()))
    }

    /// Only events with a severity of at least `minimum`
    pub fn min_severity(minimum: Severity) -> Self {
        Self::new(move |event| event.severity().is_some_and(|severity| severity >= minimum))
    }

    pub fn matches(&self, event: &LiveEvent) -> bool {
        (self.predicate)(event)
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventFilter(..)")
    }
}

struct Entry {
    id: SubscriptionId,
    handler: EventHandler,
    filter: Option<EventFilter>,
    active: AtomicBool,
}

#[derive(Default)]
struct Inner {
    entries: Mutex<Entries>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Entries {
    by_event: HashMap<String, HashMap<SubscriptionId, Arc<Entry>>>,
    closed: bool,
}

impl Inner {
    fn remove(&self, event: &str, id: SubscriptionId) {
        let mut entries = self.entries.lock();
        if let Some(subscribers) = entries.by_event.get_mut(event) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                entries.by_event.remove(event);
            }
        }
    }
}

/// Publish/subscribe registry for [`LiveEvent`]s
///
/// Cloning is cheap; clones share the same subscriptions.
#[derive(Clone, Default)]
pub struct EventRegistry {
    inner: Arc<Inner>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events named `event`
    ///
    /// When `filter` is given the handler only sees events it accepts.
    /// Subscribing to a closed registry returns an inert subscription.
    pub fn subscribe<F>(&self, event: &str, handler: F, filter: Option<EventFilter>) -> Subscription
    where
        F: Fn(&LiveEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut entries = self.inner.entries.lock();

        if entries.closed {
            warn!("Subscription to '{}' on a closed registry ignored", event);
            return Subscription {
                id,
                event: event.to_string(),
                entry: Weak::new(),
                registry: Weak::new(),
            };
        }

        let entry = Arc::new(Entry {
            id,
            handler: Arc::new(handler),
            filter,
            active: AtomicBool::new(true),
        });
        let weak_entry = Arc::downgrade(&entry);
        entries
            .by_event
            .entry(event.to_string())
            .or_default()
            .insert(id, entry);
        drop(entries);

        debug!("Subscription {} registered for '{}'", id, event);
        Subscription {
            id,
            event: event.to_string(),
            entry: weak_entry,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every matching subscription
    ///
    /// Returns the number of callbacks invoked. A panicking filter or
    /// callback is logged and skipped; the remaining subscribers still
    /// receive the event.
    pub fn dispatch(&self, event: &LiveEvent) -> usize {
        let targets: Vec<Arc<Entry>> = {
            let entries = self.inner.entries.lock();
            match entries.by_event.get(event.event_name()) {
                Some(subscribers) => subscribers.values().cloned().collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for entry in targets {
            if !entry.active.load(Ordering::SeqCst) {
                continue;
            }

            if let Some(filter) = &entry.filter {
                match catch_unwind(AssertUnwindSafe(|| filter.matches(event))) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(_) => {
                        error!(
                            "Filter of subscription {} panicked on '{}'; skipping subscriber",
                            entry.id,
                            event.event_name()
                        );
                        continue;
                    }
                }
            }

            if catch_unwind(AssertUnwindSafe(|| (entry.handler)(event))).is_err() {
                error!(
                    "Handler of subscription {} panicked on '{}'",
                    entry.id,
                    event.event_name()
                );
                continue;
            }
            delivered += 1;
        }

        delivered
    }

    /// Number of live subscriptions for `event`
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.inner
            .entries
            .lock()
            .by_event
            .get(event)
            .map_or(0, HashMap::len)
    }

    /// Tear down: invalidate every outstanding subscription
    ///
    /// Later `subscribe` calls return inert subscriptions and `dispatch`
    /// delivers nothing.
    pub fn close(&self) {
        let mut entries = self.inner.entries.lock();
        entries.closed = true;
        let mut invalidated = 0;
        for (_, subscribers) in entries.by_event.drain() {
            for (_, entry) in subscribers {
                entry.active.store(false, Ordering::SeqCst);
                invalidated += 1;
            }
        }
        debug!("Event registry closed, {} subscriptions invalidated", invalidated);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.entries.lock().closed
    }
}

/// Handle returned by [`EventRegistry::subscribe`]
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
#[must_use = "keep the Subscription to be able to unsubscribe"]
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    event: String,
    entry: Weak<Entry>,
    registry: Weak<Inner>,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventRegistry")
    }
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn is_active(&self) -> bool {
        self.entry
            .upgrade()
            .is_some_and(|entry| entry.active.load(Ordering::SeqCst))
    }

    /// Stop delivery to this subscription; calling it again is a no-op
    pub fn unsubscribe(&self) {
        let Some(entry) = self.entry.upgrade() else {
            return;
        };
        if !entry.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.registry.upgrade() {
            inner.remove(&self.event, self.id);
        }
        debug!("Subscription {} for '{}' removed", self.id, self.event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lms_common::events::{names, ProgressEvent, SignificantChange};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    fn progress(job_id: &str) -> LiveEvent {
        LiveEvent::Progress(ProgressEvent::new(job_id).with_progress(10.0))
    }

    fn change(severity: Severity) -> LiveEvent {
        LiveEvent::SignificantChange(SignificantChange {
            severity: Some(severity),
            message: "threshold crossed".to_string(),
            ..Default::default()
        })
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&LiveEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = count.clone();
        (count, move |_: &LiveEvent| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_all_subscribers_invoked_in_any_order() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut subs = Vec::new();
        for label in ["a", "b", "c"] {
            let seen = seen.clone();
            subs.push(registry.subscribe(
                names::PROGRESS,
                move |_| seen.lock().push(label),
                None,
            ));
        }

        assert_eq!(registry.dispatch(&progress("J1")), 3);

        // Invocation order across subscriptions is unspecified; compare as a set
        let seen: HashSet<&str> = seen.lock().iter().copied().collect();
        assert_eq!(seen, HashSet::from(["a", "b", "c"]));
        assert_eq!(subs.len(), 3);
    }

    #[test]
    fn test_dispatch_only_reaches_matching_event_name() {
        let registry = EventRegistry::new();
        let (count, handler) = counter();
        let _sub = registry.subscribe(names::NOTIFICATION, handler, None);

        assert_eq!(registry.dispatch(&progress("J1")), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_filter_false_skips_callback() {
        let registry = EventRegistry::new();
        let (count, handler) = counter();
        let _sub = registry.subscribe(names::PROGRESS, handler, Some(EventFilter::job("J2")));

        registry.dispatch(&progress("J1"));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        registry.dispatch(&progress("J2"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_min_severity_filter() {
        let registry = EventRegistry::new();
        let (count, handler) = counter();
        let _sub = registry.subscribe(
            names::SIGNIFICANT_CHANGE,
            handler,
            Some(EventFilter::min_severity(Severity::High)),
        );

        registry.dispatch(&change(Severity::Medium));
        registry.dispatch(&change(Severity::High));
        registry.dispatch(&change(Severity::Critical));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_filter_is_isolated() {
        let registry = EventRegistry::new();
        let (count, handler) = counter();

        let _bad = registry.subscribe(
            names::PROGRESS,
            |_| {},
            Some(EventFilter::new(|_| panic!("filter bug"))),
        );
        let _good = registry.subscribe(names::PROGRESS, handler, None);

        assert_eq!(registry.dispatch(&progress("J1")), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let registry = EventRegistry::new();
        let (count, handler) = counter();

        let _bad = registry.subscribe(names::PROGRESS, |_| panic!("handler bug"), None);
        let _good = registry.subscribe(names::PROGRESS, handler, None);

        assert_eq!(registry.dispatch(&progress("J1")), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // The registry keeps working after the panic
        assert_eq!(registry.dispatch(&progress("J1")), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery_but_keeps_siblings() {
        let registry = EventRegistry::new();
        let (removed_count, removed_handler) = counter();
        let (kept_count, kept_handler) = counter();

        let removed = registry.subscribe(names::PROGRESS, removed_handler, None);
        let _kept = registry.subscribe(names::PROGRESS, kept_handler, None);

        registry.dispatch(&progress("J1"));
        removed.unsubscribe();
        registry.dispatch(&progress("J1"));
        registry.dispatch(&progress("J1"));

        assert_eq!(removed_count.load(Ordering::SeqCst), 1);
        assert_eq!(kept_count.load(Ordering::SeqCst), 3);
        assert_eq!(registry.subscriber_count(names::PROGRESS), 1);
        assert!(!removed.is_active());
    }

    #[test]
    fn test_unsubscribe_twice_is_noop() {
        let registry = EventRegistry::new();
        let sub = registry.subscribe(names::PROGRESS, |_| {}, None);
        let _other = registry.subscribe(names::PROGRESS, |_| {}, None);

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(registry.subscriber_count(names::PROGRESS), 1);
    }

    #[test]
    fn test_unsubscribe_from_sibling_callback_during_dispatch() {
        let registry = EventRegistry::new();
        let (victim_count, victim_handler) = counter();
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        // Whichever runs first, the victim must not run after being unsubscribed
        let slot = victim.clone();
        let _killer = registry.subscribe(
            names::PROGRESS,
            move |_| {
                if let Some(sub) = slot.lock().take() {
                    sub.unsubscribe();
                }
            },
            None,
        );
        *victim.lock() = Some(registry.subscribe(names::PROGRESS, victim_handler, None));

        registry.dispatch(&progress("J1"));
        let after_first = victim_count.load(Ordering::SeqCst);
        assert!(after_first <= 1);

        registry.dispatch(&progress("J1"));
        assert_eq!(victim_count.load(Ordering::SeqCst), after_first);
    }

    #[test]
    fn test_close_invalidates_outstanding_subscriptions() {
        let registry = EventRegistry::new();
        let (count, handler) = counter();
        let sub = registry.subscribe(names::PROGRESS, handler, None);

        registry.close();
        assert!(registry.is_closed());
        assert!(!sub.is_active());
        assert_eq!(registry.dispatch(&progress("J1")), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // Unsubscribe after teardown is still safe
        sub.unsubscribe();

        let late = registry.subscribe(names::PROGRESS, |_| {}, None);
        assert!(!late.is_active());
        assert_eq!(registry.subscriber_count(names::PROGRESS), 0);
    }
}
