//! Background timers

use scrollwatch_config::EngineConfig;
use scrollwatch_store::BatchStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::RuleEngine;

/// Engine shared between the service loop, connections and timers
pub type SharedEngine = Arc<Mutex<RuleEngine>>;

/// Owns the periodic reset sweep and the batched flush timer.
///
/// Starting again replaces running timers, so a reload never leaves
/// duplicates behind. Dropping the scheduler stops everything.
pub struct Scheduler {
    store: BatchStore,
    sweep: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(store: BatchStore) -> Self {
        Self { store, sweep: None }
    }

    /// Start (or restart) both timers with the given periods
    pub fn start(&mut self, engine: SharedEngine, config: &EngineConfig) {
        self.stop();

        self.store.start_flush_timer(config.flush_interval);
        self.sweep = Some(spawn_sweep(engine, config.sweep_interval));

        info!(
            flush_secs = config.flush_interval.as_secs(),
            sweep_secs = config.sweep_interval.as_secs(),
            "Timers started"
        );
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.sweep.take() {
            handle.abort();
            debug!("Sweep timer stopped");
        }
        self.store.stop_flush_timer();
    }

    pub fn is_running(&self) -> bool {
        self.sweep.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_sweep(engine: SharedEngine, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let mut engine = engine.lock().await;
            engine.sweep(scrollwatch_util::now()).await;
        }
    })
}
