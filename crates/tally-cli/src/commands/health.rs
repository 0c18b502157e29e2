//! Health command handlers

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use tracing::info;

use tally_core::{DocumentStore, HealthCheck, HealthMonitor, HealthStatus, Issue};

use crate::output::Output;

/// Run one health check and print it
pub async fn check<S: DocumentStore>(monitor: &HealthMonitor<S>, output: &Output) -> Result<()> {
    let check = monitor.perform_health_check().await;
    output.print_health(&check);
    Ok(())
}

/// Probe periodically and print every change until Ctrl-C
pub async fn watch<S: DocumentStore>(monitor: &HealthMonitor<S>, output: &Output) -> Result<()> {
    let output = *output;
    let last: Mutex<Option<(HealthStatus, Vec<Issue>)>> = Mutex::new(None);

    monitor.add_listener(Arc::new(move |check: &HealthCheck| {
        let mut last = last.lock().unwrap_or_else(PoisonError::into_inner);
        if is_change(last.as_ref(), check) {
            output.print_health_change(check);
            *last = Some((check.status, check.issues.clone()));
        }
    }));

    output.message("Watching database health (Ctrl-C to stop)...");
    monitor.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    monitor.stop();
    info!("Stopped watching");
    Ok(())
}

fn is_change(last: Option<&(HealthStatus, Vec<Issue>)>, check: &HealthCheck) -> bool {
    match last {
        Some((status, issues)) => *status != check.status || *issues != check.issues,
        None => true,
    }
}
