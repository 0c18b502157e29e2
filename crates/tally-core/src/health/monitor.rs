//! Health monitor
//!
//! The monitor owns the health state machine. It probes the store on a
//! timer, takes replication status updates from the sync bridge, and
//! broadcasts a fresh [`HealthCheck`] to every listener each time either
//! one changes the metrics.
//!
//! ## Usage
//!
//! ```ignore
//! let ops = Arc::new(SafeOperations::new(Arc::new(store)));
//! let monitor = HealthMonitor::new(ops, config.health.clone());
//!
//! monitor.add_listener(Arc::new(|check: &HealthCheck| {
//!     println!("{}", check.status);
//! }));
//! monitor.start();
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::check::{evaluate, HealthCheck};
use super::metrics::{HealthMetrics, StorageQuota, SyncStatus};
use crate::config::HealthConfig;
use crate::safe::SafeOperations;
use crate::store::DocumentStore;

/// Document id read by the connectivity probe
pub const PROBE_DOC_ID: &str = "_local/health-probe";

/// Callback invoked with every published health check
pub type HealthListener = Arc<dyn Fn(&HealthCheck) + Send + Sync>;

/// Observable health state for one store
pub struct HealthMonitor<S> {
    inner: Arc<MonitorInner<S>>,
}

impl<S> Clone for HealthMonitor<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct MonitorInner<S> {
    ops: Arc<SafeOperations<S>>,
    config: HealthConfig,
    probe_interval: Duration,
    listeners: Mutex<Vec<HealthListener>>,
    timer: Mutex<TimerState>,
    last_check: RwLock<Option<HealthCheck>>,
    sequence: AtomicU64,
}

#[derive(Default)]
struct TimerState {
    handle: Option<JoinHandle<()>>,
    /// Bumped on every start and stop; ticks from older timers are ignored
    generation: u64,
    arm_count: usize,
}

impl<S> Drop for MonitorInner<S> {
    fn drop(&mut self) {
        let timer = self.timer.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = timer.handle.take() {
            handle.abort();
        }
    }
}

impl<S: DocumentStore> HealthMonitor<S> {
    /// Monitor probing at the configured interval
    pub fn new(ops: Arc<SafeOperations<S>>, config: HealthConfig) -> Self {
        let interval = config.probe_interval();
        Self::with_probe_interval(ops, config, interval)
    }

    pub fn with_probe_interval(
        ops: Arc<SafeOperations<S>>,
        config: HealthConfig,
        probe_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                ops,
                config,
                // tokio intervals cannot be zero
                probe_interval: probe_interval.max(Duration::from_millis(1)),
                listeners: Mutex::new(Vec::new()),
                timer: Mutex::new(TimerState::default()),
                last_check: RwLock::new(None),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    /// The facade whose outcomes this monitor tracks
    pub fn ops(&self) -> &Arc<SafeOperations<S>> {
        &self.inner.ops
    }

    pub fn config(&self) -> &HealthConfig {
        &self.inner.config
    }

    /// Arm the periodic probe. The first probe runs immediately.
    ///
    /// Does nothing if the timer is already running. Must be called from
    /// within a tokio runtime.
    pub fn start(&self) {
        let mut timer = self.inner.lock_timer();
        if timer.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Health monitor already running");
            return;
        }

        timer.generation += 1;
        timer.arm_count += 1;
        let generation = timer.generation;

        timer.handle = Some(tokio::spawn(run_probe_timer(
            Arc::downgrade(&self.inner),
            self.inner.probe_interval,
            generation,
        )));
        info!(
            "Health monitor started (probe every {:?})",
            self.inner.probe_interval
        );
    }

    /// Disarm the periodic probe. Probes already dispatched still finish.
    pub fn stop(&self) {
        let mut timer = self.inner.lock_timer();
        timer.generation += 1;
        if let Some(handle) = timer.handle.take() {
            handle.abort();
            info!("Health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .lock_timer()
            .handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Probe the store, refresh quota, then evaluate and broadcast.
    ///
    /// Never fails: a failed probe is itself a health signal.
    pub async fn perform_health_check(&self) -> HealthCheck {
        let ops = &self.inner.ops;

        let estimate = match ops.store().storage_estimate().await {
            Ok(estimate) => estimate,
            Err(failure) => {
                debug!("Storage estimate unavailable: {}", failure);
                None
            }
        };

        let (elapsed, probe) = ops.fetch(PROBE_DOC_ID).await;
        if let Err(ref error) = probe {
            warn!("Health probe failed: {}", error);
        }

        self.commit(|m| {
            match probe {
                Ok(_) => m.record_success(elapsed),
                Err(_) => m.record_probe_failure(elapsed),
            }
            if let Some(estimate) = estimate {
                m.storage_quota = Some(StorageQuota::new(estimate.used, estimate.total));
            }
        })
    }

    /// Record a replication status change and broadcast immediately
    pub fn update_sync_status(&self, status: SyncStatus) -> HealthCheck {
        debug!("Sync status -> {}", status);
        self.commit(|m| m.sync_status = status)
    }

    /// Snapshot of the current metrics
    pub fn current_metrics(&self) -> HealthMetrics {
        self.inner.ops.metrics().snapshot()
    }

    /// Most recently published check
    pub fn last_check(&self) -> Option<HealthCheck> {
        self.inner
            .last_check
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register a listener. Registering the same listener twice means it
    /// is called twice per check.
    pub fn add_listener(&self, listener: HealthListener) {
        self.inner.lock_listeners().push(listener);
    }

    /// Remove one registration of `listener`. Returns false if it was not
    /// registered.
    pub fn remove_listener(&self, listener: &HealthListener) -> bool {
        let target = Arc::as_ptr(listener) as *const ();
        let mut listeners = self.inner.lock_listeners();

        match listeners
            .iter()
            .position(|l| Arc::as_ptr(l) as *const () == target)
        {
            Some(pos) => {
                listeners.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock_listeners().len()
    }

    /// Apply one update, then evaluate and broadcast the result
    fn commit(&self, update: impl FnOnce(&mut HealthMetrics)) -> HealthCheck {
        let sequence = &self.inner.sequence;
        let (metrics, seq) = self.inner.ops.metrics().apply(|m| {
            update(m);
            // Numbered under the write lock so order matches the snapshots
            (m.clone(), sequence.fetch_add(1, Ordering::SeqCst) + 1)
        });

        let mut check = evaluate(&metrics, &self.inner.config, Utc::now());
        check.sequence = seq;

        {
            let mut last = self
                .inner
                .last_check
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if last.as_ref().map_or(true, |prev| prev.sequence < seq) {
                *last = Some(check.clone());
            }
        }

        let listeners = self.inner.lock_listeners().clone();
        for listener in &listeners {
            listener(&check);
        }
        check
    }

    #[cfg(test)]
    pub(crate) fn arm_count(&self) -> usize {
        self.inner.lock_timer().arm_count
    }
}

impl<S> MonitorInner<S> {
    fn lock_timer(&self) -> MutexGuard<'_, TimerState> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<HealthListener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        let timer = self.lock_timer();
        timer.generation == generation && timer.handle.is_some()
    }
}

/// Periodic probe loop
///
/// Holds only a weak reference so a dropped monitor ends the loop.
async fn run_probe_timer<S: DocumentStore>(
    inner: Weak<MonitorInner<S>>,
    period: Duration,
    generation: u64,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.is_current(generation) {
            break;
        }

        let monitor = HealthMonitor { inner };
        tokio::spawn(async move {
            let check = monitor.perform_health_check().await;
            debug!("Periodic health check: {}", check.status);
        });
    }
}
