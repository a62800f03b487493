//! Priority-ordered synchronous publish/subscribe

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace, warn};

use livecfg_utils::Result;

use super::event::{Event, EventPayload, EventPriority};

/// Listener priority used when callers have no preference
pub const DEFAULT_LISTENER_PRIORITY: i32 = 0;

/// Listener callback; an `Err` is logged and does not affect other listeners
pub type Callback = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Listener {
    id: ListenerId,
    callback: Callback,
    priority: i32,
    once: bool,
    /// Claimed by the first publish that reaches a one-shot listener
    fired: AtomicBool,
    call_count: AtomicU64,
}

type SortedListeners = Arc<[Arc<Listener>]>;

#[derive(Default)]
struct Channel {
    /// Subscription order
    listeners: Vec<Arc<Listener>>,
    version: u64,
    sorted: Option<(u64, SortedListeners)>,
}

impl Channel {
    fn push(&mut self, listener: Arc<Listener>) {
        self.listeners.push(listener);
        self.version += 1;
    }

    fn retain(&mut self, mut keep: impl FnMut(&Listener) -> bool) -> usize {
        let before = self.listeners.len();
        self.listeners.retain(|l| keep(l));
        let removed = before - self.listeners.len();
        if removed > 0 {
            self.version += 1;
        }
        removed
    }

    /// Listeners by priority descending, ties in subscription order
    fn snapshot(&mut self) -> SortedListeners {
        if let Some((version, sorted)) = &self.sorted {
            if *version == self.version {
                return Arc::clone(sorted);
            }
        }
        let mut ordered = self.listeners.clone();
        // Stable sort keeps subscription order within a priority
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
        let sorted: SortedListeners = ordered.into();
        self.sorted = Some((self.version, Arc::clone(&sorted)));
        sorted
    }
}

/// Result of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub delivered: usize,
    pub failed: usize,
}

impl PublishOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Per-event-name counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventStats {
    pub emit_count: u64,
    /// Listeners at the most recent publish
    pub listener_count: usize,
    pub total_time: Duration,
    pub failures: u64,
}

impl EventStats {
    pub fn average_time(&self) -> Duration {
        if self.emit_count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_time.as_nanos() / u128::from(self.emit_count);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// In-process event bus
///
/// Callbacks run synchronously on the publishing thread, outside the
/// listener lock, so they may subscribe, unsubscribe or publish themselves.
pub struct EventBus {
    channels: Mutex<HashMap<String, Channel>>,
    next_id: AtomicU64,
    enabled: AtomicBool,
    stats: DashMap<String, EventStats>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("channels", &self.channels.lock().len())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            enabled: AtomicBool::new(true),
            stats: DashMap::new(),
        }
    }

    // ==================== Subscription ====================

    pub fn subscribe<F>(&self, name: &str, callback: F, priority: i32) -> ListenerId
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        self.add_listener(name, Arc::new(callback), priority, false)
    }

    /// Subscribe for a single delivery; the listener is removed afterwards
    pub fn subscribe_once<F>(&self, name: &str, callback: F, priority: i32) -> ListenerId
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        self.add_listener(name, Arc::new(callback), priority, true)
    }

    fn add_listener(&self, name: &str, callback: Callback, priority: i32, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let listener = Arc::new(Listener {
            id,
            callback,
            priority,
            once,
            fired: AtomicBool::new(false),
            call_count: AtomicU64::new(0),
        });
        self.channels
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(listener);
        debug!(event = name, listener = %id, priority, once, "Listener subscribed");
        id
    }

    pub fn unsubscribe(&self, name: &str, id: ListenerId) -> bool {
        let mut channels = self.channels.lock();
        let Some(channel) = channels.get_mut(name) else {
            return false;
        };
        let removed = channel.retain(|l| l.id != id) > 0;
        if channel.listeners.is_empty() {
            channels.remove(name);
        }
        removed
    }

    /// Drop every listener for `name`; returns how many were removed
    pub fn clear(&self, name: &str) -> usize {
        self.channels
            .lock()
            .remove(name)
            .map(|c| c.listeners.len())
            .unwrap_or(0)
    }

    pub fn clear_all(&self) {
        self.channels.lock().clear();
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.channels
            .lock()
            .get(name)
            .map(|c| c.listeners.len())
            .unwrap_or(0)
    }

    /// Invocations of a listener so far, if it is still subscribed
    pub fn call_count(&self, name: &str, id: ListenerId) -> Option<u64> {
        self.channels.lock().get(name).and_then(|c| {
            c.listeners
                .iter()
                .find(|l| l.id == id)
                .map(|l| l.call_count.load(Ordering::Relaxed))
        })
    }

    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.lock().keys().cloned().collect();
        names.sort();
        names
    }

    // ==================== Switch ====================

    pub fn enable_all(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Turn every publish into a no-op until `enable_all`
    pub fn disable_all(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    // ==================== Publish ====================

    pub fn publish(&self, name: &str, payload: impl Into<EventPayload>, priority: EventPriority) -> PublishOutcome {
        self.publish_event(Event::new(name, payload).with_priority(priority))
    }

    /// Publish with normal priority
    pub fn emit(&self, name: &str, payload: impl Into<EventPayload>) -> PublishOutcome {
        self.publish(name, payload, EventPriority::Normal)
    }

    /// Deliver `event` to the listeners subscribed at call time
    pub fn publish_event(&self, event: Event) -> PublishOutcome {
        if !self.is_enabled() {
            trace!(event = %event.name, "Event bus disabled; dropping event");
            return PublishOutcome::default();
        }

        let listeners = self
            .channels
            .lock()
            .get_mut(&event.name)
            .map(Channel::snapshot);
        let Some(listeners) = listeners else {
            self.record(&event.name, 0, Duration::ZERO, 0);
            return PublishOutcome::default();
        };

        let started = Instant::now();
        let mut outcome = PublishOutcome::default();
        let mut failures = Vec::new();
        let mut spent = Vec::new();

        for listener in listeners.iter() {
            if listener.once {
                if listener.fired.swap(true, Ordering::AcqRel) {
                    continue;
                }
                spent.push(listener.id);
            }
            listener.call_count.fetch_add(1, Ordering::Relaxed);

            match catch_unwind(AssertUnwindSafe(|| (listener.callback)(&event))) {
                Ok(Ok(())) => outcome.delivered += 1,
                Ok(Err(e)) => {
                    outcome.failed += 1;
                    failures.push(format!("listener {}: {}", listener.id, e));
                }
                Err(panic) => {
                    outcome.failed += 1;
                    failures.push(format!("listener {} panicked: {}", listener.id, panic_message(&*panic)));
                }
            }
        }

        if !spent.is_empty() {
            let mut channels = self.channels.lock();
            if let Some(channel) = channels.get_mut(&event.name) {
                channel.retain(|l| !spent.contains(&l.id));
                if channel.listeners.is_empty() {
                    channels.remove(&event.name);
                }
            }
        }

        if !failures.is_empty() {
            warn!(
                event = %event.name,
                event_id = %event.id,
                failed = failures.len(),
                "Event listeners failed: {}",
                failures.join("; ")
            );
        }

        self.record(&event.name, listeners.len(), started.elapsed(), outcome.failed as u64);
        outcome
    }

    // ==================== Stats ====================

    fn record(&self, name: &str, listener_count: usize, elapsed: Duration, failures: u64) {
        let mut stats = self.stats.entry(name.to_string()).or_default();
        stats.emit_count += 1;
        stats.listener_count = listener_count;
        stats.total_time += elapsed;
        stats.failures += failures;
    }

    pub fn stats(&self) -> HashMap<String, EventStats> {
        self.stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn stats_for(&self, name: &str) -> Option<EventStats> {
        self.stats.get(name).map(|s| s.clone())
    }

    pub fn reset_stats(&self) {
        self.stats.clear();
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
