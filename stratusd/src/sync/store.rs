use std::{fs, path::PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction, migrate::Migrator};
use stratus_core::{Node, NodeKind, NodeStatus};
use thiserror::Error;
use tokio::sync::broadcast;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("store integrity violation: {0}")]
    Integrity(String),
    #[error("node not found after upsert")]
    MissingNode,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Integrity(db.message().to_string())
            }
            _ => StoreError::Sqlx(err),
        }
    }
}

/// Emitted after a write commits, so views can re-run their queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Nodes,
    Children,
    UploadQueue,
}

/// Parent selector for child queries and reconciliation: either the remote
/// root folder (located by flag, its id need not be known) or a concrete node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRef {
    Root,
    Node(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: i64,
    pub node_id: String,
    pub created_by: Option<String>,
    pub created_date: Option<String>,
    pub description: Option<String>,
    pub kind: NodeKind,
    pub modified_date: Option<String>,
    pub name: Option<String>,
    pub status: NodeStatus,
    pub version: i64,
    pub is_root: bool,
    pub is_shared: bool,
    pub exclusively_trashed: bool,
    pub recursively_trashed: bool,
    pub is_dirty: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ChildFilter {
    pub exclude_statuses: Vec<NodeStatus>,
    pub exclude_kinds: Vec<NodeKind>,
}

impl ChildFilter {
    /// The default presentation filter: trashed and purged nodes are hidden,
    /// as are asset nodes (thumbnails and other derived content).
    pub fn browsable() -> Self {
        Self {
            exclude_statuses: vec![NodeStatus::Trash, NodeStatus::Purged],
            exclude_kinds: vec![NodeKind::Asset],
        }
    }

    pub fn allows(&self, node: &NodeRecord) -> bool {
        !self.exclude_statuses.contains(&node.status) && !self.exclude_kinds.contains(&node.kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildRow {
    pub node: NodeRecord,
    pub parent_node_id: String,
    pub parent_is_root: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedUpload {
    pub id: i64,
    pub source_uri: String,
    pub status: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    pub deleted_nodes: u64,
    pub detached_edges: u64,
}

#[derive(Clone)]
pub struct NodeStore {
    pool: SqlitePool,
    events: broadcast::Sender<StoreEvent>,
}

impl NodeStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { pool, events }
    }

    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub async fn new_default() -> Result<Self, StoreError> {
        let db_path = default_db_path()?;
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }

    /// Inserts or fully replaces a node row; the remote copy always wins.
    /// Upserting a root node clears the root flag on every other row.
    pub async fn upsert_node(&self, node: &Node, dirty: bool) -> Result<NodeRecord, StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::upsert_node_tx(&mut tx, node, dirty).await?;
        tx.commit().await?;
        self.notify(StoreEvent::Nodes);
        self.get_node(&node.id).await?.ok_or(StoreError::MissingNode)
    }

    /// Applies one listing page in a single transaction: every node is
    /// upserted clean and its parent edges are replaced wholesale from the
    /// wire payload.
    pub async fn apply_page(&self, nodes: &[Node]) -> Result<(), StoreError> {
        if nodes.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for node in nodes {
            Self::upsert_node_tx(&mut tx, node, false).await?;
            Self::replace_parents_tx(&mut tx, &node.id, &node.parents).await?;
        }
        tx.commit().await?;
        self.notify(StoreEvent::Children);
        Ok(())
    }

    pub async fn mark_children_dirty(&self, parent_node_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE nodes SET is_dirty = 1
             WHERE node_id IN (SELECT node_id FROM node_parents WHERE parent_node_id = ?1)",
        )
        .bind(parent_node_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Removes children of `parent_node_id` that stayed dirty through a merge.
    /// Only the edge to this parent is dropped; the node row itself is deleted
    /// when no edges remain, otherwise its dirty flag is cleared.
    pub async fn sweep_children(&self, parent_node_id: &str) -> Result<SweepOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            "SELECT DISTINCT n.node_id
             FROM nodes n
             JOIN node_parents np ON np.node_id = n.node_id
             WHERE np.parent_node_id = ?1 AND n.is_dirty = 1",
        )
        .bind(parent_node_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut outcome = SweepOutcome::default();
        for row in rows {
            let child_id: String = row.try_get("node_id")?;
            let detached =
                sqlx::query("DELETE FROM node_parents WHERE node_id = ?1 AND parent_node_id = ?2")
                    .bind(&child_id)
                    .bind(parent_node_id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            outcome.detached_edges += detached;

            let remaining =
                sqlx::query("SELECT COUNT(*) AS edges FROM node_parents WHERE node_id = ?1")
                    .bind(&child_id)
                    .fetch_one(&mut *tx)
                    .await?;
            let edges: i64 = remaining.try_get("edges")?;
            if edges == 0 {
                sqlx::query("DELETE FROM nodes WHERE node_id = ?1")
                    .bind(&child_id)
                    .execute(&mut *tx)
                    .await?;
                outcome.deleted_nodes += 1;
            } else {
                sqlx::query("UPDATE nodes SET is_dirty = 0 WHERE node_id = ?1")
                    .bind(&child_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        self.notify(StoreEvent::Children);
        Ok(outcome)
    }

    pub async fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, node_id, created_by, created_date, description, kind, modified_date,
                    name, status, version, is_root, is_shared, exclusively_trashed,
                    recursively_trashed, is_dirty
             FROM nodes WHERE node_id = ?1",
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(record_from_row(&row)?))
    }

    /// The locally cached root node, located by flag rather than by a known id.
    pub async fn root_node(&self) -> Result<Option<NodeRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, node_id, created_by, created_date, description, kind, modified_date,
                    name, status, version, is_root, is_shared, exclusively_trashed,
                    recursively_trashed, is_dirty
             FROM nodes WHERE is_root = 1 LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(record_from_row(&row)?))
    }

    /// Children of a parent with parent context, folders before files and
    /// alphabetical within a kind. Reads only local state.
    pub async fn children_of(
        &self,
        parent: &ParentRef,
        filter: &ChildFilter,
    ) -> Result<Vec<ChildRow>, StoreError> {
        let rows = match parent {
            ParentRef::Root => {
                sqlx::query(
                    "SELECT parent_node_id, parent_is_root, id, node_id, created_by,
                            created_date, description, kind, modified_date, name, status,
                            version, is_root, is_shared, exclusively_trashed,
                            recursively_trashed, is_dirty
                     FROM node_children
                     WHERE parent_is_root = 1
                     ORDER BY kind DESC, name ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
            ParentRef::Node(parent_id) => {
                sqlx::query(
                    "SELECT parent_node_id, parent_is_root, id, node_id, created_by,
                            created_date, description, kind, modified_date, name, status,
                            version, is_root, is_shared, exclusively_trashed,
                            recursively_trashed, is_dirty
                     FROM node_children
                     WHERE parent_node_id = ?1
                     ORDER BY kind DESC, name ASC",
                )
                .bind(parent_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let node = record_from_row(&row)?;
            if !filter.allows(&node) {
                continue;
            }
            let parent_is_root: i64 = row.try_get("parent_is_root")?;
            out.push(ChildRow {
                node,
                parent_node_id: row.try_get("parent_node_id")?,
                parent_is_root: parent_is_root != 0,
            });
        }
        Ok(out)
    }

    pub async fn enqueue_upload(&self, source_uri: &str) -> Result<i64, StoreError> {
        let result = sqlx::query("INSERT INTO upload_queue (source_uri) VALUES (?1)")
            .bind(source_uri)
            .execute(&self.pool)
            .await?;
        self.notify(StoreEvent::UploadQueue);
        Ok(result.last_insert_rowid())
    }

    pub async fn queued_uploads(&self) -> Result<Vec<QueuedUpload>, StoreError> {
        let rows = sqlx::query("SELECT id, source_uri, status FROM upload_queue ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(QueuedUpload {
                id: row.try_get("id")?,
                source_uri: row.try_get("source_uri")?,
                status: row.try_get("status")?,
            });
        }
        Ok(out)
    }

    pub async fn delete_queued_upload(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM upload_queue WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.notify(StoreEvent::UploadQueue);
        Ok(())
    }

    /// Records the latest failure text on a queue entry so a stuck item can be
    /// diagnosed without trawling logs.
    pub async fn set_upload_status(
        &self,
        id: i64,
        status: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE upload_queue SET status = ?1 WHERE id = ?2")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.notify(StoreEvent::UploadQueue);
        Ok(())
    }

    /// Drops all cached state. Used on credential reset.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM node_parents")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM nodes").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM upload_queue")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.notify(StoreEvent::Nodes);
        self.notify(StoreEvent::Children);
        self.notify(StoreEvent::UploadQueue);
        Ok(())
    }

    async fn upsert_node_tx(
        tx: &mut Transaction<'_, Sqlite>,
        node: &Node,
        dirty: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO nodes (
                node_id, created_by, created_date, description, kind, modified_date,
                name, status, version, is_root, is_shared, exclusively_trashed,
                recursively_trashed, is_dirty
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(node_id) DO UPDATE SET
                created_by = excluded.created_by,
                created_date = excluded.created_date,
                description = excluded.description,
                kind = excluded.kind,
                modified_date = excluded.modified_date,
                name = excluded.name,
                status = excluded.status,
                version = excluded.version,
                is_root = excluded.is_root,
                is_shared = excluded.is_shared,
                exclusively_trashed = excluded.exclusively_trashed,
                recursively_trashed = excluded.recursively_trashed,
                is_dirty = excluded.is_dirty",
        )
        .bind(&node.id)
        .bind(&node.created_by)
        .bind(&node.created_date)
        .bind(&node.description)
        .bind(node.kind.as_str())
        .bind(&node.modified_date)
        .bind(&node.name)
        .bind(node.status.as_str())
        .bind(node.version)
        .bind(if node.is_root { 1 } else { 0 })
        .bind(if node.is_shared { 1 } else { 0 })
        .bind(if node.exclusively_trashed { 1 } else { 0 })
        .bind(if node.recursively_trashed { 1 } else { 0 })
        .bind(if dirty { 1 } else { 0 })
        .execute(&mut **tx)
        .await?;

        if node.is_root {
            sqlx::query("UPDATE nodes SET is_root = 0 WHERE node_id != ?1")
                .bind(&node.id)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    async fn replace_parents_tx(
        tx: &mut Transaction<'_, Sqlite>,
        node_id: &str,
        parents: &[String],
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM node_parents WHERE node_id = ?1")
            .bind(node_id)
            .execute(&mut **tx)
            .await?;
        for parent_id in parents {
            sqlx::query("INSERT INTO node_parents (node_id, parent_node_id) VALUES (?1, ?2)")
                .bind(node_id)
                .bind(parent_id)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }
}

fn record_from_row(row: &SqliteRow) -> Result<NodeRecord, StoreError> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let is_root: i64 = row.try_get("is_root")?;
    let is_shared: i64 = row.try_get("is_shared")?;
    let exclusively_trashed: i64 = row.try_get("exclusively_trashed")?;
    let recursively_trashed: i64 = row.try_get("recursively_trashed")?;
    let is_dirty: i64 = row.try_get("is_dirty")?;

    Ok(NodeRecord {
        id: row.try_get("id")?,
        node_id: row.try_get("node_id")?,
        created_by: row.try_get("created_by")?,
        created_date: row.try_get("created_date")?,
        description: row.try_get("description")?,
        kind: NodeKind::from(kind),
        modified_date: row.try_get("modified_date")?,
        name: row.try_get("name")?,
        status: NodeStatus::from(status),
        version: row.try_get("version")?,
        is_root: is_root != 0,
        is_shared: is_shared != 0,
        exclusively_trashed: exclusively_trashed != 0,
        recursively_trashed: recursively_trashed != 0,
        is_dirty: is_dirty != 0,
    })
}

fn default_db_path() -> Result<PathBuf, StoreError> {
    let mut path = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    path.push("stratus");
    path.push("nodes.db");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn make_store() -> NodeStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = NodeStore::from_pool(pool);
        store.init().await.unwrap();
        store
    }

    fn node(id: &str, name: &str, kind: NodeKind, parents: &[&str]) -> Node {
        Node {
            id: id.to_string(),
            name: Some(name.to_string()),
            kind,
            status: NodeStatus::Available,
            version: 1,
            created_by: None,
            created_date: None,
            modified_date: None,
            description: None,
            parents: parents.iter().map(|p| p.to_string()).collect(),
            is_root: false,
            is_shared: false,
            exclusively_trashed: false,
            recursively_trashed: false,
        }
    }

    fn file(id: &str, name: &str, parents: &[&str]) -> Node {
        node(id, name, NodeKind::File, parents)
    }

    fn folder(id: &str, name: &str, parents: &[&str]) -> Node {
        node(id, name, NodeKind::Folder, parents)
    }

    fn root(id: &str) -> Node {
        let mut root = node(id, "", NodeKind::Folder, &[]);
        root.name = None;
        root.is_root = true;
        root
    }

    #[tokio::test]
    async fn upsert_and_fetch_node() {
        let store = make_store().await;
        let mut input = file("n1", "a.txt", &[]);
        input.description = Some("first".into());

        let inserted = store.upsert_node(&input, false).await.unwrap();
        let fetched = store.get_node("n1").await.unwrap().unwrap();

        assert_eq!(inserted, fetched);
        assert_eq!(fetched.name.as_deref(), Some("a.txt"));
        assert_eq!(fetched.kind, NodeKind::File);
        assert_eq!(fetched.description.as_deref(), Some("first"));
        assert!(!fetched.is_dirty);
    }

    #[tokio::test]
    async fn upsert_replaces_every_column() {
        let store = make_store().await;
        let mut input = file("n1", "a.txt", &[]);
        input.description = Some("kept?".into());
        store.upsert_node(&input, false).await.unwrap();

        let mut replacement = file("n1", "renamed.txt", &[]);
        replacement.status = NodeStatus::Trash;
        replacement.version = 9;
        let updated = store.upsert_node(&replacement, false).await.unwrap();

        assert_eq!(updated.name.as_deref(), Some("renamed.txt"));
        assert_eq!(updated.status, NodeStatus::Trash);
        assert_eq!(updated.version, 9);
        assert_eq!(updated.description, None);
    }

    #[tokio::test]
    async fn upsert_keeps_a_single_root() {
        let store = make_store().await;
        store.upsert_node(&root("root-a"), false).await.unwrap();
        store.upsert_node(&root("root-b"), false).await.unwrap();

        let current = store.root_node().await.unwrap().unwrap();
        assert_eq!(current.node_id, "root-b");
        assert!(!store.get_node("root-a").await.unwrap().unwrap().is_root);
    }

    #[tokio::test]
    async fn apply_page_clears_dirty_and_replaces_edges() {
        let store = make_store().await;
        store.upsert_node(&folder("x", "X", &[]), false).await.unwrap();
        store.upsert_node(&folder("y", "Y", &[]), false).await.unwrap();
        store
            .apply_page(&[file("a", "a.txt", &["x"])])
            .await
            .unwrap();
        store.mark_children_dirty("x").await.unwrap();
        assert!(store.get_node("a").await.unwrap().unwrap().is_dirty);

        // Listing now reports the same node under a different parent.
        store
            .apply_page(&[file("a", "a.txt", &["y"])])
            .await
            .unwrap();

        let record = store.get_node("a").await.unwrap().unwrap();
        assert!(!record.is_dirty);
        let filter = ChildFilter::default();
        let under_x = store
            .children_of(&ParentRef::Node("x".into()), &filter)
            .await
            .unwrap();
        let under_y = store
            .children_of(&ParentRef::Node("y".into()), &filter)
            .await
            .unwrap();
        assert!(under_x.is_empty());
        assert_eq!(under_y.len(), 1);
        assert_eq!(under_y[0].node.node_id, "a");
        assert_eq!(under_y[0].parent_node_id, "y");
    }

    #[tokio::test]
    async fn mark_children_dirty_is_scoped_to_the_parent() {
        let store = make_store().await;
        store.upsert_node(&folder("x", "X", &[]), false).await.unwrap();
        store.upsert_node(&folder("y", "Y", &[]), false).await.unwrap();
        store
            .apply_page(&[file("a", "a.txt", &["x"]), file("b", "b.txt", &["y"])])
            .await
            .unwrap();

        let marked = store.mark_children_dirty("x").await.unwrap();

        assert_eq!(marked, 1);
        assert!(store.get_node("a").await.unwrap().unwrap().is_dirty);
        assert!(!store.get_node("b").await.unwrap().unwrap().is_dirty);
    }

    #[tokio::test]
    async fn sweep_deletes_children_with_no_remaining_parent() {
        let store = make_store().await;
        store.upsert_node(&folder("x", "X", &[]), false).await.unwrap();
        store
            .apply_page(&[
                file("a", "a.txt", &["x"]),
                file("b", "b.txt", &["x"]),
                file("c", "c.txt", &["x"]),
            ])
            .await
            .unwrap();
        store.mark_children_dirty("x").await.unwrap();
        // The fresh listing no longer contains b.
        store
            .apply_page(&[file("a", "a.txt", &["x"]), file("c", "c.txt", &["x"])])
            .await
            .unwrap();

        let outcome = store.sweep_children("x").await.unwrap();

        assert_eq!(outcome.deleted_nodes, 1);
        assert_eq!(outcome.detached_edges, 1);
        assert!(store.get_node("b").await.unwrap().is_none());
        let names: Vec<_> = store
            .children_of(&ParentRef::Node("x".into()), &ChildFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.node.name.unwrap())
            .collect();
        assert_eq!(names, vec!["a.txt".to_string(), "c.txt".to_string()]);
    }

    #[tokio::test]
    async fn sweep_keeps_children_with_a_surviving_edge() {
        let store = make_store().await;
        store.upsert_node(&folder("x", "X", &[]), false).await.unwrap();
        store.upsert_node(&folder("y", "Y", &[]), false).await.unwrap();
        store
            .apply_page(&[file("b", "b.txt", &["x", "y"])])
            .await
            .unwrap();
        store.mark_children_dirty("x").await.unwrap();

        let outcome = store.sweep_children("x").await.unwrap();

        assert_eq!(outcome.deleted_nodes, 0);
        assert_eq!(outcome.detached_edges, 1);
        let record = store.get_node("b").await.unwrap().unwrap();
        assert!(!record.is_dirty);
        let under_y = store
            .children_of(&ParentRef::Node("y".into()), &ChildFilter::default())
            .await
            .unwrap();
        assert_eq!(under_y.len(), 1);
        assert!(
            store
                .children_of(&ParentRef::Node("x".into()), &ChildFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn children_are_ordered_folders_first_then_by_name() {
        let store = make_store().await;
        store.upsert_node(&folder("x", "X", &[]), false).await.unwrap();
        store
            .apply_page(&[
                file("f2", "zeta.txt", &["x"]),
                folder("d2", "Reports", &["x"]),
                file("f1", "alpha.txt", &["x"]),
                folder("d1", "Archive", &["x"]),
            ])
            .await
            .unwrap();

        let names: Vec<_> = store
            .children_of(&ParentRef::Node("x".into()), &ChildFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.node.name.unwrap())
            .collect();

        assert_eq!(
            names,
            vec![
                "Archive".to_string(),
                "Reports".to_string(),
                "alpha.txt".to_string(),
                "zeta.txt".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn children_of_root_resolves_by_flag() {
        let store = make_store().await;
        store.upsert_node(&root("root-1"), false).await.unwrap();
        store
            .apply_page(&[file("a", "a.txt", &["root-1"])])
            .await
            .unwrap();

        let rows = store
            .children_of(&ParentRef::Root, &ChildFilter::default())
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert!(rows[0].parent_is_root);
        assert_eq!(rows[0].parent_node_id, "root-1");
    }

    #[tokio::test]
    async fn browsable_filter_hides_trash_purged_and_assets() {
        let store = make_store().await;
        store.upsert_node(&folder("x", "X", &[]), false).await.unwrap();
        let mut trashed = file("t", "t.txt", &["x"]);
        trashed.status = NodeStatus::Trash;
        let mut purged = file("p", "p.txt", &["x"]);
        purged.status = NodeStatus::Purged;
        let thumb = node("th", "thumb", NodeKind::Asset, &["x"]);
        store
            .apply_page(&[file("a", "a.txt", &["x"]), trashed, purged, thumb])
            .await
            .unwrap();

        let visible = store
            .children_of(&ParentRef::Node("x".into()), &ChildFilter::browsable())
            .await
            .unwrap();
        let everything = store
            .children_of(&ParentRef::Node("x".into()), &ChildFilter::default())
            .await
            .unwrap();

        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].node.node_id, "a");
        assert_eq!(everything.len(), 4);
    }

    #[tokio::test]
    async fn upload_queue_preserves_fifo_order() {
        let store = make_store().await;
        let first = store.enqueue_upload("file:///tmp/one.txt").await.unwrap();
        let second = store.enqueue_upload("file:///tmp/two.txt").await.unwrap();
        let third = store.enqueue_upload("file:///tmp/three.txt").await.unwrap();
        assert!(first < second && second < third);

        store.delete_queued_upload(second).await.unwrap();
        store
            .set_upload_status(third, Some("transient: timed out"))
            .await
            .unwrap();

        let queued = store.queued_uploads().await.unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].source_uri, "file:///tmp/one.txt");
        assert_eq!(queued[1].source_uri, "file:///tmp/three.txt");
        assert_eq!(queued[1].status.as_deref(), Some("transient: timed out"));
    }

    #[tokio::test]
    async fn clear_empties_nodes_edges_and_queue() {
        let store = make_store().await;
        store.upsert_node(&root("root-1"), false).await.unwrap();
        store
            .apply_page(&[file("a", "a.txt", &["root-1"])])
            .await
            .unwrap();
        store.enqueue_upload("file:///tmp/x.bin").await.unwrap();

        store.clear().await.unwrap();

        assert!(store.root_node().await.unwrap().is_none());
        assert!(store.get_node("a").await.unwrap().is_none());
        assert!(store.queued_uploads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn writes_emit_store_events() {
        let store = make_store().await;
        let mut events = store.subscribe();

        store.upsert_node(&folder("x", "X", &[]), false).await.unwrap();
        store
            .apply_page(&[file("a", "a.txt", &["x"])])
            .await
            .unwrap();
        store.enqueue_upload("file:///tmp/a.txt").await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                StoreEvent::Nodes,
                StoreEvent::Children,
                StoreEvent::UploadQueue
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_node_id_maps_to_integrity_error() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = NodeStore::from_pool(pool.clone());
        store.init().await.unwrap();
        store.upsert_node(&file("n1", "a.txt", &[]), false).await.unwrap();

        let err = sqlx::query("INSERT INTO nodes (node_id, kind, status) VALUES ('n1', 'FILE', 'AVAILABLE')")
            .execute(&pool)
            .await
            .map_err(StoreError::from)
            .unwrap_err();

        assert!(matches!(err, StoreError::Integrity(_)));
    }
}
