use std::path::{Path, PathBuf};
use std::sync::Arc;

use stratus_core::UploadRequest;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::session::{SyncError, SyncSession};
use super::store::QueuedUpload;

/// Progress callback on the 0..=i32::MAX scale expected by listeners.
pub type UploadProgressFn = Arc<dyn Fn(i32) + Send + Sync>;

const COPY_CHUNK_BYTES: usize = 4096;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    pub attempted: u64,
    pub uploaded: u64,
    pub conflicts: u64,
    pub failed: u64,
    pub interrupted: bool,
}

pub struct UploadProcessor {
    session: Arc<SyncSession>,
    scratch_root: PathBuf,
}

impl UploadProcessor {
    pub fn new(session: Arc<SyncSession>, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            session,
            scratch_root: scratch_root.into(),
        }
    }

    /// Works through the queued uploads oldest first. A finished or
    /// remotely-duplicated item leaves the queue; a failed item stays queued
    /// with its failure recorded and the drain moves on. Cancellation stops
    /// the drain between items and is not an error.
    pub async fn drain_queue(
        &self,
        progress: Option<UploadProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<DrainOutcome, SyncError> {
        let mut outcome = DrainOutcome::default();
        if cancel.is_cancelled() {
            outcome.interrupted = true;
            return Ok(outcome);
        }

        let queued = self.session.store().queued_uploads().await?;
        if queued.is_empty() {
            return Ok(outcome);
        }
        let root_id = self
            .session
            .root_node_id()
            .await?
            .ok_or(SyncError::RootUnavailable)?;

        for item in queued {
            if cancel.is_cancelled() {
                outcome.interrupted = true;
                break;
            }
            outcome.attempted += 1;
            match self.upload_one(&item, &root_id, progress.clone(), cancel).await {
                Ok(()) => {
                    self.session.store().delete_queued_upload(item.id).await?;
                    outcome.uploaded += 1;
                }
                Err(SyncError::Drive(err)) if err.is_conflict() => {
                    tracing::info!(
                        source = %item.source_uri,
                        "remote already has this node, dropping it from the queue"
                    );
                    self.session.store().delete_queued_upload(item.id).await?;
                    outcome.conflicts += 1;
                }
                Err(SyncError::Interrupted) => {
                    outcome.interrupted = true;
                    break;
                }
                Err(err) => {
                    tracing::warn!(
                        source = %item.source_uri,
                        error = %err,
                        "upload failed, leaving it queued"
                    );
                    self.session
                        .store()
                        .set_upload_status(item.id, Some(&err.to_string()))
                        .await?;
                    outcome.failed += 1;
                }
            }
        }

        tracing::info!(
            attempted = outcome.attempted,
            uploaded = outcome.uploaded,
            conflicts = outcome.conflicts,
            failed = outcome.failed,
            interrupted = outcome.interrupted,
            "processed upload queue"
        );
        Ok(outcome)
    }

    async fn upload_one(
        &self,
        item: &QueuedUpload,
        root_id: &str,
        progress: Option<UploadProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let staged = self.stage_source(item, cancel).await?;
        let request = UploadRequest {
            name: staged.display_name.clone(),
            parents: vec![root_id.to_string()],
            suppress_dedup: true,
        };
        let progress = progress.map(|report| -> stratus_core::ProgressFn {
            Arc::new(move |sent, total| report(rebase_progress(sent, total)))
        });

        let upload = self
            .session
            .client()
            .upload_file(&request, &staged.path, progress);
        tokio::select! {
            result = upload => {
                result?;
                Ok(())
            }
            _ = cancel.cancelled() => Err(SyncError::Interrupted),
        }
    }

    /// Copies the source into the scratch directory so the transfer reads a
    /// stable file even if the original moves mid-upload. The staged copy is
    /// removed when the returned handle drops, on success and on failure
    /// alike.
    async fn stage_source(
        &self,
        item: &QueuedUpload,
        cancel: &CancellationToken,
    ) -> Result<StagedFile, SyncError> {
        let source = source_path_from_uri(&item.source_uri)?;
        let display_name = display_name_for(&source, &item.source_uri);

        let staging_dir = self.scratch_root.join("staged");
        tokio::fs::create_dir_all(&staging_dir).await?;
        let staged = StagedFile {
            path: staging_dir.join(format!("{}-{}", item.id, display_name)),
            display_name,
        };

        let mut reader = tokio::fs::File::open(&source).await?;
        let mut writer = tokio::fs::File::create(&staged.path).await?;
        let mut buf = [0u8; COPY_CHUNK_BYTES];
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Interrupted);
            }
            let read = reader.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            writer.write_all(&buf[..read]).await?;
        }
        writer.flush().await?;
        Ok(staged)
    }
}

struct StagedFile {
    path: PathBuf,
    display_name: String,
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn source_path_from_uri(source_uri: &str) -> Result<PathBuf, SyncError> {
    match Url::parse(source_uri) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map_err(|_| SyncError::InvalidSource(source_uri.to_string())),
        Ok(url) => Err(SyncError::InvalidSource(url.to_string())),
        // Not a URL at all: treat it as a plain filesystem path.
        Err(_) => Ok(PathBuf::from(source_uri)),
    }
}

fn display_name_for(source: &Path, source_uri: &str) -> String {
    if let Some(name) = source.file_name() {
        return name.to_string_lossy().into_owned();
    }
    source_uri
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("upload")
        .to_string()
}

/// Maps transferred/total bytes onto the 0..=i32::MAX listener scale. An
/// unknown total reports completion rather than a bogus fraction.
fn rebase_progress(transferred: u64, total: u64) -> i32 {
    if total == 0 {
        return i32::MAX;
    }
    (i32::MAX as f64 * (transferred as f64 / total as f64)) as i32
}
