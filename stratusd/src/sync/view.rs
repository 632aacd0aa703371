use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::store::{ChildFilter, ChildRow, NodeStore, ParentRef, StoreError, StoreEvent};

/// Live query over one parent's children. `load` reads the rows as they are;
/// `next_change` waits for a write that may affect them and re-reads.
pub struct ChildrenView {
    store: NodeStore,
    parent: ParentRef,
    filter: ChildFilter,
    events: broadcast::Receiver<StoreEvent>,
}

impl ChildrenView {
    pub fn new(store: NodeStore, parent: ParentRef, filter: ChildFilter) -> Self {
        let events = store.subscribe();
        Self {
            store,
            parent,
            filter,
            events,
        }
    }

    pub async fn load(&self) -> Result<Vec<ChildRow>, StoreError> {
        self.store.children_of(&self.parent, &self.filter).await
    }

    /// Waits for the next node or edge write and returns the fresh rows.
    /// Queue-only writes are skipped. A lagged receiver falls back to a full
    /// re-read, which is always current. `None` means the event channel
    /// closed.
    pub async fn next_change(&mut self) -> Option<Result<Vec<ChildRow>, StoreError>> {
        loop {
            match self.events.recv().await {
                Ok(StoreEvent::Nodes | StoreEvent::Children) => return Some(self.load().await),
                Ok(StoreEvent::UploadQueue) => continue,
                Err(RecvError::Lagged(_)) => return Some(self.load().await),
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
