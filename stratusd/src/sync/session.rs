use stratus_core::{DriveClient, DriveError};
use thiserror::Error;
use tokio::sync::Mutex;

use super::store::{NodeStore, StoreError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("api error: {0}")]
    Drive(#[from] DriveError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("remote root folder is unavailable")]
    RootUnavailable,
    #[error("operation interrupted")]
    Interrupted,
    #[error("invalid upload source: {0}")]
    InvalidSource(String),
}

/// Shared handle tying one API client to one local store. The remote root id
/// is resolved lazily and reused for the lifetime of the session.
pub struct SyncSession {
    client: DriveClient,
    store: NodeStore,
    root_id: Mutex<Option<String>>,
}

impl SyncSession {
    pub fn new(client: DriveClient, store: NodeStore) -> Self {
        Self {
            client,
            store,
            root_id: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &DriveClient {
        &self.client
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    /// The remote root node id, fetched at most once per session. `None`
    /// means the remote reported no root folder.
    pub async fn root_node_id(&self) -> Result<Option<String>, SyncError> {
        if let Some(id) = self.cached_root_id().await {
            return Ok(Some(id));
        }
        let listing = self.client.list_root_nodes().await?;
        let Some(root) = listing.data.into_iter().find(|node| node.is_root) else {
            return Ok(None);
        };
        self.cache_root_id(root.id.clone()).await;
        Ok(Some(root.id))
    }

    pub async fn cached_root_id(&self) -> Option<String> {
        self.root_id.lock().await.clone()
    }

    pub async fn cache_root_id(&self, id: String) {
        let mut cached = self.root_id.lock().await;
        *cached = Some(id);
    }

    /// Drops everything this session has learned: cached rows and the
    /// resolved root id. The next operation starts from an empty cache.
    pub async fn reset(&self) -> Result<(), SyncError> {
        self.store.clear().await?;
        let mut cached = self.root_id.lock().await;
        *cached = None;
        Ok(())
    }
}
