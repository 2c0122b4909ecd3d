//! Batched two-tier persistence
//!
//! Every write lands in the fast tier right away. Durable writes are deferred
//! to a periodic flush unless the caller asks for [`WritePolicy::WriteThrough`].
//! A generation counter tracks which snapshot the durable tier last received,
//! so redundant flushes are skipped and failed ones are retried.

use scrollwatch_api::StorageData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{KvStore, STORAGE_KEY};

/// How urgently a write must reach the durable tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Durable write happens at the next periodic flush
    WriteBack,
    /// Durable write happens before `write` returns
    WriteThrough,
}

/// Persistence layer owning all reads and writes of `StorageData`
#[derive(Clone)]
pub struct BatchStore {
    inner: Arc<Inner>,
}

struct Inner {
    fast: Arc<dyn KvStore>,
    durable: Arc<dyn KvStore>,
    key: String,
    snapshot: RwLock<Option<Arc<StorageData>>>,

    /// Bumped after every snapshot replacement
    generation: AtomicU64,
    /// Generation the durable tier is known to hold
    flushed_generation: AtomicU64,

    flush_lock: tokio::sync::Mutex<()>,
    init_lock: tokio::sync::Mutex<()>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl BatchStore {
    pub fn new(fast: Arc<dyn KvStore>, durable: Arc<dyn KvStore>) -> Self {
        Self::with_key(fast, durable, STORAGE_KEY)
    }

    /// Use a custom storage key instead of the default one
    pub fn with_key(
        fast: Arc<dyn KvStore>,
        durable: Arc<dyn KvStore>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                fast,
                durable,
                key: key.into(),
                snapshot: RwLock::new(None),
                generation: AtomicU64::new(0),
                flushed_generation: AtomicU64::new(0),
                flush_lock: tokio::sync::Mutex::new(()),
                init_lock: tokio::sync::Mutex::new(()),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Hydrate the snapshot from the tiers.
    ///
    /// The fast tier wins when it holds a decodable record. Otherwise the
    /// durable record is used and copied into the fast tier. When neither
    /// tier yields a record, fresh data is used. Never fails.
    pub async fn initialize(&self) -> Arc<StorageData> {
        let _guard = self.inner.init_lock.lock().await;
        let inner = &self.inner;

        let (data, dirty) = if let Some(data) = self.load_tier(&inner.fast, "fast").await {
            debug!("Hydrated from fast tier");
            // The fast tier may be ahead of the durable one
            (data, true)
        } else if let Some(data) = self.load_tier(&inner.durable, "durable").await {
            debug!("Hydrated from durable tier");
            self.seed_fast_tier(&data).await;
            (data, false)
        } else {
            info!("No stored state, starting fresh");
            (StorageData::fresh(scrollwatch_util::now()), false)
        };

        let data = Arc::new(data);
        self.replace_snapshot(Arc::clone(&data));
        if !dirty {
            inner
                .flushed_generation
                .store(inner.generation.load(Ordering::SeqCst), Ordering::SeqCst);
        }

        data
    }

    async fn load_tier(&self, tier: &Arc<dyn KvStore>, name: &str) -> Option<StorageData> {
        match tier.get(&self.inner.key).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(tier = name, error = %e, "Stored state is corrupt, ignoring");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(tier = name, error = %e, "Failed to read stored state");
                None
            }
        }
    }

    async fn seed_fast_tier(&self, data: &StorageData) {
        let json = match serde_json::to_string(data) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to encode state for fast tier");
                return;
            }
        };
        if let Err(e) = self.inner.fast.set(&self.inner.key, json).await {
            warn!(error = %e, "Failed to seed fast tier");
        }
    }

    /// Current snapshot, initializing on first use
    pub async fn read(&self) -> Arc<StorageData> {
        match self.current() {
            Some(data) => data,
            None => self.initialize().await,
        }
    }

    /// Current snapshot without touching the tiers
    pub fn current(&self) -> Option<Arc<StorageData>> {
        self.inner
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the stored state.
    ///
    /// The snapshot and fast tier are updated before returning. With
    /// `WriteThrough` the durable tier is flushed too. Tier failures are
    /// logged, never returned.
    pub async fn write(&self, data: StorageData, policy: WritePolicy) {
        let data = Arc::new(data);
        let json = serde_json::to_string(&*data);

        self.replace_snapshot(Arc::clone(&data));

        match json {
            Ok(json) => {
                if let Err(e) = self.inner.fast.set(&self.inner.key, json).await {
                    warn!(error = %e, "Fast tier write failed");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode state"),
        }

        if policy == WritePolicy::WriteThrough {
            self.flush().await;
        }
    }

    fn replace_snapshot(&self, data: Arc<StorageData>) {
        // Snapshot goes in before the generation moves, so a flush that
        // observes the new generation also sees the new data.
        *self
            .inner
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(data);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Whether the durable tier is behind the snapshot
    pub fn is_dirty(&self) -> bool {
        self.inner.flushed_generation.load(Ordering::SeqCst)
            < self.inner.generation.load(Ordering::SeqCst)
    }

    /// Write the snapshot to the durable tier if it changed since the last
    /// successful flush.
    ///
    /// Returns whether the durable tier is up to date afterwards.
    pub async fn flush(&self) -> bool {
        let inner = &self.inner;
        let _guard = inner.flush_lock.lock().await;

        let target = inner.generation.load(Ordering::SeqCst);
        if inner.flushed_generation.load(Ordering::SeqCst) >= target {
            return true;
        }

        let Some(data) = self.current() else {
            return true;
        };

        let json = match serde_json::to_string(&*data) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to encode state for durable tier");
                return false;
            }
        };

        match inner.durable.set(&inner.key, json).await {
            Ok(()) => {
                inner.flushed_generation.fetch_max(target, Ordering::SeqCst);
                debug!(generation = target, "Flushed to durable tier");
                true
            }
            Err(e) => {
                warn!(error = %e, "Durable flush failed, will retry");
                false
            }
        }
    }

    /// Start (or restart) the periodic flush timer
    pub fn start_flush_timer(&self, period: Duration) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                BatchStore { inner }.flush().await;
            }
        });

        let previous = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
            debug!("Replaced flush timer");
        }
        debug!(period_secs = period.as_secs_f64(), "Flush timer started");
    }

    /// Stop the periodic flush timer, if running
    pub fn stop_flush_timer(&self) {
        let handle = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Stop the timer and flush whatever is pending
    pub async fn shutdown(&self) -> bool {
        self.stop_flush_timer();
        let flushed = self.flush().await;
        if flushed {
            info!("Persistence layer shut down cleanly");
        } else {
            warn!("Final flush failed, durable tier may be stale");
        }
        flushed
    }
}
