use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use stratus_core::DriveClient;
use tokio_util::sync::CancellationToken;

use crate::sync::reconcile::ReconcileEngine;
use crate::sync::session::{SyncError, SyncSession};
use crate::sync::store::{NodeStore, ParentRef};
use crate::sync::upload::UploadProcessor;

const DEFAULT_RECONCILE_SECS: u64 = 30;
const DEFAULT_DRAIN_SECS: u64 = 10;

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub api_base: String,
    pub api_token: String,
    pub database_url: Option<String>,
    pub scratch_root: PathBuf,
    pub reconcile_interval: Duration,
    pub drain_interval: Duration,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_base = std::env::var("STRATUS_API_BASE").context("STRATUS_API_BASE is not set")?;
        let api_token =
            std::env::var("STRATUS_API_TOKEN").context("STRATUS_API_TOKEN is not set")?;
        let database_url = std::env::var("STRATUS_DATABASE_URL").ok();
        let scratch_root = std::env::var("STRATUS_SCRATCH_DIR")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(default_scratch_root);
        let reconcile_interval = Duration::from_secs(read_u64_env(
            "STRATUS_RECONCILE_SECS",
            DEFAULT_RECONCILE_SECS,
        ));
        let drain_interval =
            Duration::from_secs(read_u64_env("STRATUS_DRAIN_SECS", DEFAULT_DRAIN_SECS));

        Ok(Self {
            api_base,
            api_token,
            database_url,
            scratch_root,
            reconcile_interval,
            drain_interval,
        })
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    session: Arc<SyncSession>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.scratch_root)
            .await
            .with_context(|| {
                format!("failed to create scratch root at {:?}", config.scratch_root)
            })?;

        let client = DriveClient::new(&config.api_base, config.api_token.clone())
            .context("invalid API base url")?;
        let store = match &config.database_url {
            Some(url) => NodeStore::new(url).await,
            None => NodeStore::new_default().await,
        }
        .context("failed to open node store")?;
        let session = Arc::new(SyncSession::new(client, store));

        Ok(Self { config, session })
    }

    /// Runs the reconcile and drain loops until a shutdown signal arrives,
    /// then cancels both and waits for them to finish their current step.
    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(
            api_base = %self.config.api_base,
            reconcile_secs = self.config.reconcile_interval.as_secs(),
            drain_secs = self.config.drain_interval.as_secs(),
            "daemon started"
        );

        let cancel = CancellationToken::new();

        let reconcile_session = Arc::clone(&self.session);
        let reconcile_interval = self.config.reconcile_interval;
        let reconcile_cancel = cancel.clone();
        let reconcile_handle = tokio::spawn(async move {
            let engine = ReconcileEngine::new(reconcile_session);
            loop {
                match engine
                    .reconcile_children(&ParentRef::Root, &reconcile_cancel)
                    .await
                {
                    Err(SyncError::Interrupted) => break,
                    // Other failures are logged by the engine; the next tick
                    // starts over from marking.
                    _ => {}
                }
                tokio::select! {
                    _ = tokio::time::sleep(reconcile_interval) => {}
                    _ = reconcile_cancel.cancelled() => break,
                }
            }
        });

        let drain_session = Arc::clone(&self.session);
        let scratch_root = self.config.scratch_root.clone();
        let drain_interval = self.config.drain_interval;
        let drain_cancel = cancel.clone();
        let drain_handle = tokio::spawn(async move {
            let processor = UploadProcessor::new(drain_session, scratch_root);
            loop {
                match processor.drain_queue(None, &drain_cancel).await {
                    Ok(outcome) if outcome.interrupted => break,
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "queue drain failed");
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(drain_interval) => {}
                    _ = drain_cancel.cancelled() => break,
                }
            }
        });

        tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal")?;
        tracing::info!("shutdown requested");
        cancel.cancel();
        let _ = reconcile_handle.await;
        let _ = drain_handle.await;

        Ok(())
    }

    /// One reconcile pass and one queue drain, then exit.
    pub async fn run_once(self) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();

        let engine = ReconcileEngine::new(Arc::clone(&self.session));
        engine
            .reconcile_children(&ParentRef::Root, &cancel)
            .await?;

        let processor = UploadProcessor::new(
            Arc::clone(&self.session),
            self.config.scratch_root.clone(),
        );
        processor.drain_queue(None, &cancel).await?;
        Ok(())
    }
}

fn default_scratch_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("stratus")
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
