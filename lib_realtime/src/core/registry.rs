//! # Presence Interest Registry
//!
//! Reference-counts which remote users the application wants presence for.
//! The first interest in a user triggers `presence:subscribe`. Releasing the
//! last interest starts a linger timer; only if nobody re-subscribes before
//! it expires is the user reported on the expiry channel so the connection
//! task can send `presence:unsubscribe`. This absorbs the churn of views that
//! mount and unmount in quick succession.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

type Entries = Arc<Mutex<HashMap<String, (u32, CancellationToken)>>>;

pub struct PresenceRegistry {
    subscriptions: Entries,
    linger: Duration,
    expired_tx: mpsc::UnboundedSender<String>,
}

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<String, (u32, CancellationToken)>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PresenceRegistry {
    /// `expired_tx` receives user ids whose linger ran out.
    pub fn new(linger: Duration, expired_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            linger,
            expired_tx,
        }
    }

    /// Adds one interest. Returns true when the server must be told to
    /// subscribe (first interest and no linger in progress).
    pub fn subscribe(&self, user_id: &str) -> bool {
        let mut subs = lock(&self.subscriptions);
        let fresh = !subs.contains_key(user_id);
        let entry = subs
            .entry(user_id.to_string())
            .or_insert_with(|| (0, CancellationToken::new()));

        entry.0 += 1;
        if entry.0 == 1 && !fresh {
            // Revived during linger: the server subscription is still live.
            entry.1.cancel();
            entry.1 = CancellationToken::new();
            log::debug!("Presence linger cancelled for {}", user_id);
        }
        fresh
    }

    /// Drops one interest; the last one starts the linger timer.
    pub fn unsubscribe(&self, user_id: &str) {
        let mut subs = lock(&self.subscriptions);
        let Some(entry) = subs.get_mut(user_id) else {
            return;
        };
        if entry.0 == 0 {
            return;
        }
        entry.0 -= 1;
        if entry.0 > 0 {
            return;
        }

        let token = entry.1.clone();
        let user = user_id.to_string();
        let subs_handle = Arc::clone(&self.subscriptions);
        let expired_tx = self.expired_tx.clone();
        let linger = self.linger;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = sleep(linger) => {
                    let removed = {
                        let mut subs = lock(&subs_handle);
                        match subs.get(&user) {
                            Some((0, _)) => subs.remove(&user).is_some(),
                            _ => false,
                        }
                    };
                    if removed {
                        log::debug!("Presence linger expired for {}", user);
                        let _ = expired_tx.send(user);
                    }
                }
            }
        });
    }

    /// Users with live interest. Lingering entries are dropped since the new
    /// socket starts without any server-side subscription.
    pub fn on_reconnect(&self) -> Vec<String> {
        let mut subs = lock(&self.subscriptions);
        subs.retain(|_, (count, token)| {
            if *count == 0 {
                token.cancel();
                false
            } else {
                true
            }
        });
        let mut users: Vec<String> = subs.keys().cloned().collect();
        users.sort();
        users
    }

    pub fn interest(&self, user_id: &str) -> u32 {
        lock(&self.subscriptions).get(user_id).map_or(0, |(c, _)| *c)
    }

    pub fn clear(&self) {
        let mut subs = lock(&self.subscriptions);
        for (_, token) in subs.values() {
            token.cancel();
        }
        subs.clear();
    }
}
