use std::sync::Arc;

use anyhow::Context;
use pivot_health_sync::replay::ReplayHealthStore;
use pivot_health_sync::{JsonFileStore, SyncService, SyncSettings, WindowOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configure logging from env var `PIVOT_LOG_LEVEL` (or fallback to `RUST_LOG`, default `info`).
    let log_env = std::env::var("PIVOT_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(&log_env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(env_filter)
        .init();
    tracing::info!("pivot-health-sync: log filter: {}", log_env);

    let settings = SyncSettings::from_env().context("loading settings")?;
    let samples_path = settings
        .samples_path
        .clone()
        .context("PIVOT_SAMPLES_PATH must point at a sample export")?;

    let store = JsonFileStore::open(&settings.state_path)
        .await
        .with_context(|| format!("opening state file {}", settings.state_path.display()))?;
    let health = ReplayHealthStore::load(&samples_path)
        .await
        .with_context(|| format!("reading samples from {}", samples_path.display()))?;

    let service = SyncService::from_settings(&settings, Arc::new(health), Arc::new(store))?;
    if service.credentials().load().await?.is_none() {
        anyhow::bail!(
            "no credentials in {}; the web layer has not sent tokens yet",
            settings.state_path.display()
        );
    }

    tracing::info!(
        window_secs = settings.window.as_secs(),
        lookback_months = settings.lookback_months,
        "pivot-health-sync: starting collection"
    );
    let (summary, report) = service.sync_and_wait().await?;
    tracing::info!(
        forwarded = summary.forwarded_records(),
        failed_kinds = ?summary.failed_kinds(),
        "pivot-health-sync: cycle finished"
    );

    match report.map(|r| r.outcome) {
        Some(WindowOutcome::Failed(error)) => {
            anyhow::bail!("upload failed, checkpoints left unchanged: {error}")
        }
        Some(WindowOutcome::Cancelled) => anyhow::bail!("upload cancelled"),
        Some(outcome) => tracing::info!(?outcome, "pivot-health-sync: done"),
        None => tracing::warn!("pivot-health-sync: window never closed"),
    }
    Ok(())
}
