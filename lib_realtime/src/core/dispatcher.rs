//! # Event Bus
//!
//! Fans inbound events out to subscribers registered by category name (the
//! wire `type` tag, or one of the local categories such as
//! `connection:status`). The bus is an owned instance, not a global, and is
//! handed to the connection manager at construction.
//!
//! ## Delivery model
//!
//! 1.  **Own task**: `publish` only pushes onto a channel. Callbacks run on
//!     the bus task, so socket handling never waits on a slow consumer.
//! 2.  **Batching**: high-frequency categories accumulate until the batch size
//!     or the max wait is reached and are delivered as one slice. Presence
//!     categories keep only the most recent event of a batch since the
//!     presence cache already holds the full state.
//! 3.  **Isolation**: a panicking callback is caught and logged; the other
//!     subscribers of the same event still run.
//! 4.  **Deterministic removal**: `subscribe` returns a [`Subscription`]
//!     guard. Dropping it, or calling [`Subscription::unsubscribe`], removes
//!     exactly that callback. When the last callback of a category goes, any
//!     pending batch for it is discarded.

use std::collections::HashMap;
use std::future::pending;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Duration, Instant};

use crate::protocol::WireMessage;

/// Subscribers receive one or more events of the same category per call.
pub type EventCallback = Arc<dyn Fn(&[WireMessage]) + Send + Sync>;

/// Category that receives every published event.
pub const WILDCARD: &str = "*";

/// How a batched category accumulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Deliver every event of the batch.
    Collect,
    /// Deliver only the newest event of the batch.
    LatestOnly,
}

/// Categories delivered in batches, with their mode.
pub fn batch_mode(category: &str) -> Option<BatchMode> {
    match category {
        "message:new" | "message:delivered" | "message:delivery_ack" | "message:read" => Some(BatchMode::Collect),
        "presence:online" | "presence:offline" => Some(BatchMode::LatestOnly),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub max_wait: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_wait: Duration::from_millis(50),
        }
    }
}

enum BusCmd {
    Publish(WireMessage),
    Subscribe {
        id: u64,
        category: String,
        callback: EventCallback,
    },
    Unsubscribe {
        id: u64,
        category: String,
    },
    Count {
        category: String,
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

/// Cheap to clone; every clone feeds the same task.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<BusCmd>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    /// Spawns the delivery task on the current tokio runtime.
    pub fn new(settings: BatchSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_bus(rx, settings));
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn subscribe<F>(&self, category: &str, callback: F) -> Subscription
    where
        F: Fn(&[WireMessage]) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sent = self
            .tx
            .send(BusCmd::Subscribe {
                id,
                category: category.to_string(),
                callback: Arc::new(callback),
            })
            .is_ok();
        if !sent {
            log::warn!("Subscribe to '{}' on a stopped event bus", category);
        }
        Subscription {
            id,
            category: category.to_string(),
            tx: self.tx.clone(),
            active: sent,
        }
    }

    /// Queues an event for delivery. Returns false once the bus is stopped.
    pub fn publish(&self, event: WireMessage) -> bool {
        self.tx.send(BusCmd::Publish(event)).is_ok()
    }

    /// Number of callbacks registered for `category` (wildcards excluded).
    pub async fn subscriber_count(&self, category: &str) -> usize {
        let (reply, rx) = oneshot::channel();
        let cmd = BusCmd::Count {
            category: category.to_string(),
            reply,
        };
        if self.tx.send(cmd).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Stops the task. Pending batches are discarded.
    pub fn shutdown(&self) {
        let _ = self.tx.send(BusCmd::Shutdown);
    }

    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Registration guard; removes its callback when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    category: String,
    tx: mpsc::UnboundedSender<BusCmd>,
    active: bool,
}

impl Subscription {
    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Keeps the callback registered for the lifetime of the bus.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn remove(&mut self) {
        if self.active {
            self.active = false;
            let _ = self.tx.send(BusCmd::Unsubscribe {
                id: self.id,
                category: std::mem::take(&mut self.category),
            });
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

struct PendingBatch {
    events: Vec<WireMessage>,
    deadline: Instant,
}

struct BusState {
    subscribers: HashMap<String, Vec<(u64, EventCallback)>>,
    batches: HashMap<String, PendingBatch>,
    settings: BatchSettings,
}

impl BusState {
    fn has_listeners(&self, category: &str) -> bool {
        self.subscribers.contains_key(category) || self.subscribers.contains_key(WILDCARD)
    }

    fn publish(&mut self, event: WireMessage) {
        if !self.has_listeners(&event.kind) {
            log::trace!("No subscribers for '{}'", event.kind);
            return;
        }
        let Some(mode) = batch_mode(&event.kind) else {
            self.deliver(&event.kind.clone(), &[event]);
            return;
        };

        let category = event.kind.clone();
        let max_wait = self.settings.max_wait;
        let batch = self.batches.entry(category.clone()).or_insert_with(|| PendingBatch {
            events: Vec::new(),
            deadline: Instant::now() + max_wait,
        });
        match mode {
            BatchMode::Collect => batch.events.push(event),
            BatchMode::LatestOnly => {
                batch.events.clear();
                batch.events.push(event);
            }
        }
        // Latest-only batches hold one event, so they only flush on the timer.
        if mode == BatchMode::Collect && batch.events.len() >= self.settings.batch_size {
            self.flush(&category);
        }
    }

    fn flush(&mut self, category: &str) {
        if let Some(batch) = self.batches.remove(category) {
            if !batch.events.is_empty() {
                self.deliver(category, &batch.events);
            }
        }
    }

    fn flush_due(&mut self, now: Instant) {
        let due: Vec<String> = self
            .batches
            .iter()
            .filter(|(_, b)| b.deadline <= now)
            .map(|(c, _)| c.clone())
            .collect();
        for category in due {
            self.flush(&category);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.batches.values().map(|b| b.deadline).min()
    }

    fn deliver(&self, category: &str, events: &[WireMessage]) {
        let targets = self
            .subscribers
            .get(category)
            .into_iter()
            .chain(self.subscribers.get(WILDCARD))
            .flatten();
        for (id, callback) in targets {
            if catch_unwind(AssertUnwindSafe(|| callback(events))).is_err() {
                log::error!("Subscriber {} for '{}' panicked; continuing", id, category);
            }
        }
    }

    fn subscribe(&mut self, id: u64, category: String, callback: EventCallback) {
        log::debug!("Subscriber {} registered for '{}'", id, category);
        self.subscribers.entry(category).or_default().push((id, callback));
    }

    fn unsubscribe(&mut self, id: u64, category: &str) {
        let now_empty = match self.subscribers.get_mut(category) {
            Some(list) => {
                list.retain(|(sid, _)| *sid != id);
                list.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.subscribers.remove(category);
            if category == WILDCARD {
                let orphaned: Vec<String> = self
                    .batches
                    .keys()
                    .filter(|c| !self.subscribers.contains_key(c.as_str()))
                    .cloned()
                    .collect();
                for c in orphaned {
                    self.batches.remove(&c);
                }
            } else if !self.subscribers.contains_key(WILDCARD) {
                self.batches.remove(category);
            }
            log::debug!("Last subscriber for '{}' removed", category);
        }
    }
}

async fn run_bus(mut rx: mpsc::UnboundedReceiver<BusCmd>, settings: BatchSettings) {
    let mut state = BusState {
        subscribers: HashMap::new(),
        batches: HashMap::new(),
        settings,
    };

    loop {
        let deadline = state.next_deadline();
        let timer = async move {
            match deadline {
                Some(d) => sleep_until(d).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(BusCmd::Publish(event)) => state.publish(event),
                Some(BusCmd::Subscribe { id, category, callback }) => state.subscribe(id, category, callback),
                Some(BusCmd::Unsubscribe { id, category }) => state.unsubscribe(id, &category),
                Some(BusCmd::Count { category, reply }) => {
                    let n = state.subscribers.get(&category).map_or(0, Vec::len);
                    let _ = reply.send(n);
                }
                Some(BusCmd::Shutdown) | None => break,
            },
            _ = timer => state.flush_due(Instant::now()),
        }
    }

    let dropped: usize = state.batches.values().map(|b| b.events.len()).sum();
    log::debug!("Event bus stopped ({} batched event(s) discarded)", dropped);
    rx.close();
}
