//! Recently-processed update filter.
//!
//! When the transport switches or the relay redelivers after a reconnect the
//! same update may arrive twice. The filter remembers update ids for a fixed
//! retention window so each one is dispatched at most once inside it.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::UpdateId;

/// Default retention window: one hour.
pub const DEFAULT_RETENTION: Duration = Duration::from_millis(3_600_000);

/// How often the background sweeper drops expired ids.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct UpdateFilter {
    inner: Arc<FilterInner>,
}

struct FilterInner {
    retention: Duration,
    // id -> time it was first remembered
    entries: Mutex<HashMap<UpdateId, Instant>>,
}

impl Default for UpdateFilter {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl UpdateFilter {
    pub fn new(retention: Duration) -> Self {
        Self {
            inner: Arc::new(FilterInner {
                retention,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn retention(&self) -> Duration {
        self.inner.retention
    }

    pub fn seen(&self, id: UpdateId) -> bool {
        self.seen_at(id, Instant::now())
    }

    pub fn seen_at(&self, id: UpdateId, now: Instant) -> bool {
        let entries = self.entries();
        match entries.get(&id) {
            Some(at) => !self.expired(*at, now),
            None => false,
        }
    }

    /// Remember `id`. Remembering an id that is already remembered keeps its
    /// original expiry.
    pub fn remember(&self, id: UpdateId) {
        self.remember_at(id, Instant::now());
    }

    pub fn remember_at(&self, id: UpdateId, now: Instant) {
        let retention = self.inner.retention;
        let mut entries = self.entries();
        entries
            .entry(id)
            .and_modify(|at| {
                if now.saturating_duration_since(*at) >= retention {
                    *at = now;
                }
            })
            .or_insert(now);
    }

    /// Check-then-remember in one step. Returns `true` if the id was not seen
    /// recently (i.e. the caller should process it).
    pub fn admit(&self, id: UpdateId) -> bool {
        self.admit_at(id, Instant::now())
    }

    pub fn admit_at(&self, id: UpdateId, now: Instant) -> bool {
        let retention = self.inner.retention;
        let mut entries = self.entries();
        match entries.get_mut(&id) {
            Some(at) if now.saturating_duration_since(*at) < retention => false,
            Some(at) => {
                *at = now;
                true
            }
            None => {
                entries.insert(id, now);
                true
            }
        }
    }

    /// Explicit eviction.
    pub fn forget(&self, id: UpdateId) {
        self.entries().remove(&id);
    }

    /// Drop every expired id; returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    pub fn evict_expired_at(&self, now: Instant) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, at| !self.expired(*at, now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the periodic sweeper. The task lives until `cancel` fires.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let filter = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let removed = filter.evict_expired();
                        if removed > 0 {
                            debug!(removed, remaining = filter.len(), "evicted expired update ids");
                        }
                    }
                }
            }
        })
    }

    fn expired(&self, remembered_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(remembered_at) >= self.inner.retention
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<UpdateId, Instant>> {
        // A poisoned map is still a valid map.
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
