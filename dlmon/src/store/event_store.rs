//! Append-only event log with synchronous subscribers

use std::sync::Arc;

use log::{debug, warn};

use super::event::{parse_block, Event, EventType};
use crate::domain::ParseError;

/// Handle returned by [`EventStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

/// Ordered log of parsed events
///
/// Events are never mutated or removed once appended. Subscribers run on the
/// appending thread, in subscription order, before `add_event` returns.
#[derive(Default)]
pub struct EventStore {
    events: Vec<Arc<Event>>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
    /// Blocks that did not parse
    pub rejected: u64,
}

impl EventStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a block and append it, notifying subscribers
    ///
    /// Malformed blocks are logged and dropped.
    pub fn add_event(&mut self, text: &str) -> Option<Arc<Event>> {
        match parse_block(text) {
            Ok(event) => Some(self.append(event)),
            Err(e) => {
                self.rejected += 1;
                match e {
                    ParseError::EmptyBlock => debug!("{e}"),
                    ParseError::BadHeader(_) | ParseError::EmptyTimestamp => {
                        warn!("dropping event block: {e}");
                    }
                }
                None
            }
        }
    }

    fn append(&mut self, event: Event) -> Arc<Event> {
        let event = Arc::new(event);
        self.events.push(Arc::clone(&event));
        for (_, notify) in &self.subscribers {
            notify(&event);
        }
        event
    }

    /// Every event, in arrival order
    #[must_use]
    pub fn events(&self) -> &[Arc<Event>] {
        &self.events
    }

    /// Events of one type, in arrival order
    #[must_use]
    pub fn events_of(&self, event_type: &EventType) -> Vec<Arc<Event>> {
        self.events.iter().filter(|e| e.event_type == *event_type).cloned().collect()
    }

    #[must_use]
    pub fn load_events(&self) -> Vec<Arc<Event>> {
        self.events_of(&EventType::Load)
    }

    #[must_use]
    pub fn unload_events(&self) -> Vec<Arc<Event>> {
        self.events_of(&EventType::Unload)
    }

    #[must_use]
    pub fn symbol_events(&self) -> Vec<Arc<Event>> {
        self.events_of(&EventType::Symbol)
    }

    #[must_use]
    pub fn count_of(&self, event_type: &EventType) -> usize {
        self.events.iter().filter(|e| e.event_type == *event_type).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Register a callback for every event appended from now on
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_add_event_appends_in_order() {
        let mut store = EventStore::new();
        store.add_event("[1] event: load\npid: 1\n").unwrap();
        store.add_event("[2] event: symbol\npid: 1\n").unwrap();
        store.add_event("[3] event: load\npid: 2\n").unwrap();

        let stamps: Vec<_> = store.events().iter().map(|e| e.timestamp.as_str()).collect();
        assert_eq!(stamps, vec!["1", "2", "3"]);

        let loads: Vec<_> = store.load_events().iter().map(|e| e.timestamp.clone()).collect();
        assert_eq!(loads, vec!["1", "3"]);
        assert_eq!(store.count_of(&EventType::Symbol), 1);
    }

    #[test]
    fn test_malformed_block_is_dropped() {
        let mut store = EventStore::new();
        assert!(store.add_event("garbage").is_none());
        assert!(store.add_event("[] event: load").is_none());
        assert!(store.is_empty());
        assert_eq!(store.rejected, 2);
    }

    #[test]
    fn test_subscribers_see_appends_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut store = EventStore::new();

        let sink = Arc::clone(&seen);
        store.subscribe(move |e| sink.lock().unwrap().push(e.timestamp.clone()));

        store.add_event("[a] event: load\n");
        store.add_event("not an event");
        store.add_event("[b] event: unload\n");

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut store = EventStore::new();

        let counter = Arc::clone(&calls);
        let id = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.add_event("[a] event: load\n");
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.add_event("[b] event: load\n");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_same_text_twice_gives_independent_events() {
        let mut store = EventStore::new();
        let first = store.add_event("[t] event: load\npid: 1\n").unwrap();
        let second = store.add_event("[t] event: load\npid: 1\n").unwrap();

        assert_eq!(*first, *second);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 2);
    }
}
