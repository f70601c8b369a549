//! In-process event bus
//!
//! Producers (device gateways, sensor pollers, the platform itself) fire
//! events on the bus from any task; the trigger dispatcher subscribes to all
//! of them. Delivery is best-effort: a slow subscriber that falls behind the
//! channel capacity observes `RecvError::Lagged` instead of blocking producers.

use arx_core::{Event, EventType};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Buffered events per subscriber channel
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Broadcast bus keyed by event type
pub struct EventBus {
    /// One sender per subscribed event type
    listeners: DashMap<EventType, broadcast::Sender<Event>>,
    /// Receives every event regardless of type
    match_all_sender: broadcast::Sender<Event>,
    /// Number of events fired since creation
    fired: AtomicU64,
    /// Channel capacity
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Bus whose subscriber channels buffer `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        let (match_all_sender, _) = broadcast::channel(capacity);
        Self {
            listeners: DashMap::new(),
            match_all_sender,
            fired: AtomicU64::new(0),
            capacity,
        }
    }

    /// Receive events of one type; `*` receives everything
    pub fn subscribe(&self, event_type: impl Into<EventType>) -> broadcast::Receiver<Event> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing to event type");

        if event_type.is_match_all() {
            return self.match_all_sender.subscribe();
        }

        self.listeners
            .entry(event_type)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.match_all_sender.subscribe()
    }

    /// Fire an event to type subscribers and MATCH_ALL subscribers
    pub fn fire(&self, event: Event) {
        debug!(event_type = %event.event_type, event_id = %event.id, "Firing event");
        self.fired.fetch_add(1, Ordering::Relaxed);

        if let Some(sender) = self.listeners.get(&event.event_type) {
            // Send errors only mean there are no active receivers
            let _ = sender.send(event.clone());
        }

        let _ = self.match_all_sender.send(event);
    }

    /// Build and fire an event from a type and payload
    pub fn fire_data(&self, event_type: impl Into<EventType>, data: serde_json::Value) {
        self.fire(Event::new(event_type, data));
    }

    /// Number of events fired so far
    pub fn fired_count(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Event types with at least one subscription ever made
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
