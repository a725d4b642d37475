//! Per-`(tenant_id, sender_id)` dispatch serialization: two webhook
//! deliveries for the same conversation must never be processed concurrently,
//! or the conversation state machine could observe a stale step. Grounded on
//! an `OtpPromptHandler` pattern seen elsewhere, which keys a
//! `Mutex<HashMap<..>>` table by `"<channel>:<operator_id>"` the same way
//! this keys by `"<tenant>:<sender>"` — generalized here from a
//! single-purpose OTP coordinator into a plain mutual-exclusion table, since
//! the dispatcher (not this module) owns the conversation-state semantics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;

const IDLE_EVICTION_SECS: u64 = 10 * 60;

struct Entry {
    lock: Arc<AsyncMutex<()>>,
    last_used: Instant,
}

/// Table of async mutexes keyed by conversation. Holding the returned guard
/// for the duration of a dispatch call serializes all concurrent deliveries
/// for that sender.
pub struct KeyedLock {
    entries: std::sync::Mutex<HashMap<String, Entry>>,
}

impl Default for KeyedLock {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyedLock {
    pub fn new() -> Self {
        Self {
            entries: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn key(tenant_id: &str, sender_id: &str) -> String {
        format!("{tenant_id}:{sender_id}")
    }

    fn get_or_insert(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            lock: Arc::new(AsyncMutex::new(())),
            last_used: Instant::now(),
        });
        entry.last_used = Instant::now();
        entry.lock.clone()
    }

    /// Acquire the lock for `(tenant_id, sender_id)`. The returned guard must
    /// be held for the entire dispatch; dropping it releases the slot for the
    /// next inbound event on the same conversation.
    pub async fn acquire(&self, tenant_id: &str, sender_id: &str) -> OwnedKeyGuard {
        let key = Self::key(tenant_id, sender_id);
        let lock = self.get_or_insert(&key);
        let guard = lock.clone().lock_owned().await;
        OwnedKeyGuard { _guard: guard, _lock: lock }
    }

    /// Drop table entries untouched for longer than the idle window. Intended
    /// to run on a periodic background task alongside the other reapers.
    pub fn evict_idle(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| {
            entry.last_used.elapsed().as_secs() < IDLE_EVICTION_SECS
                || Arc::strong_count(&entry.lock) > 1
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held for the lifetime of a dispatch call; releases on drop.
pub struct OwnedKeyGuard {
    _guard: tokio::sync::OwnedMutexGuard<()>,
    _lock: Arc<AsyncMutex<()>>,
}
