use std::sync::Arc;

use recall_core::sync::CycleReport;
use recall_core::{LocalStore, NetworkMonitor, RemoteService, SyncOrchestrator, SyncOutcome, SyncSettings};

use crate::commands::common::Context;
use crate::error::CliError;

/// Drain the local queues once against `remote`.
pub async fn sync_once(
    store: LocalStore,
    network: Arc<NetworkMonitor>,
    remote: Arc<dyn RemoteService>,
    settings: SyncSettings,
) -> Result<Option<CycleReport>, CliError> {
    let orchestrator = SyncOrchestrator::new(store, network, remote, settings.without_periodic_sync());
    let outcome = orchestrator.force_sync().await;
    orchestrator.dispose();

    match outcome {
        SyncOutcome::Completed(report) => Ok(Some(report)),
        SyncOutcome::AlreadyRunning => Ok(None),
        SyncOutcome::Offline => Err(CliError::Offline),
        SyncOutcome::Failed(message) => Err(CliError::SyncFailed(message)),
    }
}

pub fn format_report(report: &CycleReport) -> Vec<String> {
    if report.is_empty() {
        return vec!["Nothing to sync.".to_string()];
    }

    let mut lines = vec!["Sync completed".to_string()];
    let sessions = report.sessions_synced + report.sessions_skipped;
    if sessions > 0 || report.sessions_deferred > 0 || report.sessions_dropped > 0 {
        lines.push(format!(
            "  sessions: {sessions} synced, {} waiting, {} rejected",
            report.sessions_deferred, report.sessions_dropped
        ));
    }
    let changes_waiting = report.changes_retried + report.changes_deferred;
    if report.changes_applied > 0 || changes_waiting > 0 || report.changes_dropped > 0 {
        lines.push(format!(
            "  changes: {} applied, {changes_waiting} waiting, {} dropped",
            report.changes_applied, report.changes_dropped
        ));
    }
    lines
}

pub async fn run_sync(context: &Context) -> Result<(), CliError> {
    let remote = context.remote()?;
    let store = context.open_store().await?;
    let report = sync_once(
        store,
        context.network(),
        Arc::new(remote),
        context.config.sync_settings(),
    )
    .await?;

    match report {
        Some(report) => {
            for line in format_report(&report) {
                println!("{line}");
            }
        }
        None => println!("A sync is already running."),
    }
    Ok(())
}
