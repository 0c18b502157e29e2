//! Sync status bridge
//!
//! Forwards replication lifecycle events into the health monitor. Each event
//! becomes exactly one `update_sync_status` call. On top of that the bridge
//! clears the session when the remote rejects our credentials, and once per
//! sync session it pre-warms the configured views so the first user-facing
//! query does not pay for the index build.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{ReplicationEngine, ReplicationEvent, SessionInvalidator, SyncOptions};
use crate::config::Config;
use crate::health::{HealthCheck, HealthMonitor, SyncStatus};
use crate::store::{DocumentStore, QueryParams};

/// Replication events to health updates
pub struct SyncStatusBridge<S> {
    monitor: HealthMonitor<S>,
    session: Arc<dyn SessionInvalidator>,
    prewarm_views: Vec<String>,
    prewarmed: bool,
}

impl<S: DocumentStore> SyncStatusBridge<S> {
    pub fn new(monitor: HealthMonitor<S>, session: Arc<dyn SessionInvalidator>) -> Self {
        Self {
            monitor,
            session,
            prewarm_views: Vec::new(),
            prewarmed: false,
        }
    }

    /// Bridge pre-warming the views named in the configuration
    pub fn from_config(
        monitor: HealthMonitor<S>,
        session: Arc<dyn SessionInvalidator>,
        config: &Config,
    ) -> Self {
        Self::new(monitor, session).with_prewarm_views(config.prewarm_views.clone())
    }

    /// Views to query once replication first catches up
    pub fn with_prewarm_views(mut self, views: Vec<String>) -> Self {
        self.prewarm_views = views;
        self
    }

    /// Health-facing status for an event
    pub fn status_for(event: &ReplicationEvent) -> SyncStatus {
        match event {
            ReplicationEvent::Started => SyncStatus::Connecting,
            ReplicationEvent::Active => SyncStatus::Syncing,
            ReplicationEvent::Paused | ReplicationEvent::Complete => SyncStatus::Connected,
            ReplicationEvent::Error(_) => SyncStatus::Error,
        }
    }

    /// Process one event
    pub async fn handle_event(&mut self, event: ReplicationEvent) -> HealthCheck {
        let check = self.monitor.update_sync_status(Self::status_for(&event));

        match event {
            ReplicationEvent::Started => {
                debug!("Replication session started");
                self.prewarmed = false;
            }
            ReplicationEvent::Paused | ReplicationEvent::Complete if !self.prewarmed => {
                self.prewarmed = true;
                self.prewarm().await;
            }
            ReplicationEvent::Error(ref error) => {
                warn!("Replication error: {}", error);
                if error.is_auth_failure() {
                    info!("Remote rejected credentials, invalidating session");
                    self.session.invalidate_session(&error.message);
                }
            }
            _ => {}
        }

        check
    }

    /// Run the bridge on its own task until the event channel closes
    pub fn spawn(mut self, mut events: mpsc::Receiver<ReplicationEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle_event(event).await;
            }
            debug!("Replication event stream closed");
        })
    }

    /// Subscribe to an engine and bridge its events
    pub fn attach(
        self,
        engine: &dyn ReplicationEngine,
        endpoint: &str,
        options: &SyncOptions,
    ) -> JoinHandle<()> {
        info!("Starting replication with {}", endpoint);
        let events = engine.subscribe(endpoint, options);
        self.spawn(events)
    }

    /// Start replication against the configured endpoint
    ///
    /// Returns `None` when sync is disabled or no `sync_url` is set.
    pub fn attach_configured(
        self,
        engine: &dyn ReplicationEngine,
        config: &Config,
    ) -> Option<JoinHandle<()>> {
        if !config.sync_enabled {
            debug!("Sync disabled, not starting replication");
            return None;
        }
        let Some(endpoint) = config.sync_url.as_deref() else {
            warn!("Sync is enabled but no sync_url is configured");
            return None;
        };
        Some(self.attach(engine, endpoint, &SyncOptions::default()))
    }

    async fn prewarm(&self) {
        let params = QueryParams::default().limit(1);

        for view in &self.prewarm_views {
            match self.monitor.ops().safe_query(view, &params).await {
                Ok(_) => debug!("Pre-warmed view '{}'", view),
                Err(e) => warn!("Failed to pre-warm view '{}': {}", view, e),
            }
        }
    }
}
