use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::session::{SyncError, SyncSession};
use super::store::ParentRef;

/// Progress of a reconciliation run. Children are first marked dirty, then
/// merged page by page from the remote listing, then the leftover dirty rows
/// are swept out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePhase {
    Marking,
    Merging,
    Sweeping,
    Done,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub pages: u64,
    pub merged: u64,
    pub swept_nodes: u64,
    pub detached_edges: u64,
}

pub struct ReconcileEngine {
    session: Arc<SyncSession>,
}

impl ReconcileEngine {
    pub fn new(session: Arc<SyncSession>) -> Self {
        Self { session }
    }

    /// Refreshes the cached children of `parent` from the remote listing.
    /// Any failure leaves whatever was cached readable; a later run starts
    /// over from marking.
    pub async fn reconcile_children(
        &self,
        parent: &ParentRef,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, SyncError> {
        let result = self.run(parent, cancel).await;
        if let Err(err) = &result {
            tracing::warn!(error = %err, "reconciliation failed, cached rows left as they were");
        }
        result
    }

    async fn run(
        &self,
        parent: &ParentRef,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, SyncError> {
        let target = match parent {
            ParentRef::Node(id) => id.clone(),
            ParentRef::Root => match self.bootstrap_root(cancel).await? {
                Some(id) => id,
                None => {
                    tracing::debug!("remote listed no root folder, nothing to reconcile");
                    return Ok(ReconcileOutcome::default());
                }
            },
        };

        let mut outcome = ReconcileOutcome::default();
        let mut next_token: Option<String> = None;
        let mut phase = ReconcilePhase::Marking;

        loop {
            match phase {
                ReconcilePhase::Marking => {
                    let marked = self.session.store().mark_children_dirty(&target).await?;
                    tracing::debug!(parent = %target, marked, "marked cached children for verification");
                    phase = ReconcilePhase::Merging;
                }
                ReconcilePhase::Merging => {
                    if cancel.is_cancelled() {
                        return Err(SyncError::Interrupted);
                    }
                    let page = self
                        .session
                        .client()
                        .list_children(&target, next_token.as_deref())
                        .await?;
                    outcome.pages += 1;
                    outcome.merged += page.data.len() as u64;
                    self.session.store().apply_page(&page.data).await?;
                    next_token = page.next_token;
                    if next_token.is_none() {
                        phase = ReconcilePhase::Sweeping;
                    }
                }
                ReconcilePhase::Sweeping => {
                    let swept = self.session.store().sweep_children(&target).await?;
                    outcome.swept_nodes = swept.deleted_nodes;
                    outcome.detached_edges = swept.detached_edges;
                    phase = ReconcilePhase::Done;
                }
                ReconcilePhase::Done => break,
            }
        }

        tracing::info!(
            parent = %target,
            pages = outcome.pages,
            merged = outcome.merged,
            swept = outcome.swept_nodes,
            "reconciled children"
        );
        Ok(outcome)
    }

    /// Asks the remote which node is the root and caches it. An empty answer
    /// is not an error; the remote simply has nothing to show yet.
    async fn bootstrap_root(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Interrupted);
        }
        let listing = self.session.client().list_root_nodes().await?;
        let Some(root) = listing.data.into_iter().find(|node| node.is_root) else {
            return Ok(None);
        };
        self.session.store().upsert_node(&root, false).await?;
        self.session.cache_root_id(root.id.clone()).await;
        Ok(Some(root.id))
    }
}
