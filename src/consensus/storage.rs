use std::collections::HashMap;
use std::fmt::Debug;
use std::io::Cursor;
use std::ops::RangeBounds;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use openraft::storage::{LogFlushed, LogState, RaftLogStorage, RaftStateMachine, Snapshot};
use openraft::{
    BasicNode, Entry, EntryPayload, LogId, OptionalSend, RaftLogReader, RaftSnapshotBuilder,
    SnapshotMeta, StorageError, StorageIOError, StoredMembership, Vote,
};
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::types::{CommandResult, NodeId, TypeConfig};
use crate::models::{Command, IndexConfig};
use crate::store::IndexStore;

/// Raft log entries: index -> JSON-encoded Entry. Entries carry commands
/// with arbitrary JSON documents, so the self-describing codec is required;
/// fixed-shape metadata below sticks with bincode.
const LOG_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("log");

/// Stable metadata: vote, committed marker, purge marker, applied state
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const KEY_VOTE: &str = "vote";
const KEY_COMMITTED: &str = "committed";
const KEY_LAST_PURGED: &str = "last_purged";
const KEY_APPLIED_STATE: &str = "applied_state";

const LOG_FILE: &str = "raft-log.db";
const STABLE_FILE: &str = "raft-stable.db";
const SNAPSHOT_DIR: &str = "snapshots";

/// Snapshots retained on disk
const SNAPSHOTS_TO_KEEP: usize = 3;

fn read_err<E: std::error::Error + 'static>(e: E) -> StorageError<NodeId> {
    StorageIOError::read_logs(&e).into()
}

fn write_err<E: std::error::Error + 'static>(e: E) -> StorageError<NodeId> {
    StorageIOError::write_logs(&e).into()
}

fn sm_err<E: std::error::Error + 'static>(e: E) -> StorageError<NodeId> {
    StorageIOError::write_state_machine(&e).into()
}

/// Raft log storage over two redb B-tree files: `raft-log.db` for entries
/// and `raft-stable.db` for vote and marker metadata. Every append commits
/// through redb's durable (fsync) write path before the flush callback runs.
pub struct LogStore {
    log_db: Arc<Database>,
    stable_db: Arc<Database>,
    vote_cache: RwLock<Option<Vote<NodeId>>>,
    last_purged_cache: RwLock<Option<LogId<NodeId>>>,
}

impl LogStore {
    pub fn open(raft_dir: &Path) -> Result<Self, StorageError<NodeId>> {
        std::fs::create_dir_all(raft_dir).map_err(write_err)?;

        let log_db = Database::create(raft_dir.join(LOG_FILE)).map_err(write_err)?;
        let stable_db = Database::create(raft_dir.join(STABLE_FILE)).map_err(write_err)?;

        for db in [&log_db, &stable_db] {
            let txn = db.begin_write().map_err(write_err)?;
            {
                let _ = txn.open_table(LOG_TABLE).map_err(write_err)?;
                let _ = txn.open_table(META_TABLE).map_err(write_err)?;
            }
            txn.commit().map_err(write_err)?;
        }

        let store = Self {
            log_db: Arc::new(log_db),
            stable_db: Arc::new(stable_db),
            vote_cache: RwLock::new(None),
            last_purged_cache: RwLock::new(None),
        };
        store.load_caches()?;
        Ok(store)
    }

    /// Handle to the stable store, shared with the state machine for its
    /// applied-state metadata
    pub fn stable_handle(&self) -> Arc<Database> {
        Arc::clone(&self.stable_db)
    }

    fn load_caches(&self) -> Result<(), StorageError<NodeId>> {
        let txn = self.stable_db.begin_read().map_err(read_err)?;
        let meta = txn.open_table(META_TABLE).map_err(read_err)?;

        if let Some(raw) = meta.get(KEY_VOTE).map_err(read_err)? {
            let vote: Vote<NodeId> = bincode::deserialize(raw.value()).map_err(read_err)?;
            *self.vote_cache.write() = Some(vote);
        }

        if let Some(raw) = meta.get(KEY_LAST_PURGED).map_err(read_err)? {
            let purged: LogId<NodeId> = bincode::deserialize(raw.value()).map_err(read_err)?;
            *self.last_purged_cache.write() = Some(purged);
        }

        Ok(())
    }

    fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StorageError<NodeId>> {
        let txn = self.stable_db.begin_write().map_err(write_err)?;
        {
            let mut meta = txn.open_table(META_TABLE).map_err(write_err)?;
            meta.insert(key, value).map_err(write_err)?;
        }
        txn.commit().map_err(write_err)?;
        Ok(())
    }

    fn insert_entries(&self, entries: Vec<Entry<TypeConfig>>) -> Result<(), StorageError<NodeId>> {
        let txn = self.log_db.begin_write().map_err(write_err)?;
        {
            let mut table = txn.open_table(LOG_TABLE).map_err(write_err)?;
            for entry in &entries {
                let raw = serde_json::to_vec(entry).map_err(write_err)?;
                table
                    .insert(entry.log_id.index, raw.as_slice())
                    .map_err(write_err)?;
            }
        }
        txn.commit().map_err(write_err)?;
        Ok(())
    }

    fn last_entry(&self) -> Result<Option<Entry<TypeConfig>>, StorageError<NodeId>> {
        let txn = self.log_db.begin_read().map_err(read_err)?;
        let table = txn.open_table(LOG_TABLE).map_err(read_err)?;

        let result = match table.last().map_err(read_err)? {
            Some((_, raw)) => {
                let entry: Entry<TypeConfig> =
                    serde_json::from_slice(raw.value()).map_err(read_err)?;
                Ok(Some(entry))
            }
            None => Ok(None),
        };
        result
    }
}

impl RaftLogReader<TypeConfig> for LogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeId>> {
        let txn = self.log_db.begin_read().map_err(read_err)?;
        let table = txn.open_table(LOG_TABLE).map_err(read_err)?;

        let mut entries = Vec::new();
        for item in table.range(range).map_err(read_err)? {
            let (_, raw) = item.map_err(read_err)?;
            let entry: Entry<TypeConfig> =
                serde_json::from_slice(raw.value()).map_err(read_err)?;
            entries.push(entry);
        }

        Ok(entries)
    }
}

impl RaftLogStorage<TypeConfig> for LogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let last_purged_log_id = *self.last_purged_cache.read();
        let last_log_id = self.last_entry()?.map(|e| e.log_id).or(last_purged_log_id);

        Ok(LogState {
            last_purged_log_id,
            last_log_id,
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        Self {
            log_db: Arc::clone(&self.log_db),
            stable_db: Arc::clone(&self.stable_db),
            vote_cache: RwLock::new(*self.vote_cache.read()),
            last_purged_cache: RwLock::new(*self.last_purged_cache.read()),
        }
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        Ok(*self.vote_cache.read())
    }

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        let raw = bincode::serialize(vote).map_err(write_err)?;
        self.put_meta(KEY_VOTE, &raw)?;
        *self.vote_cache.write() = Some(*vote);
        Ok(())
    }

    async fn save_committed(
        &mut self,
        committed: Option<LogId<NodeId>>,
    ) -> Result<(), StorageError<NodeId>> {
        let raw = bincode::serialize(&committed).map_err(write_err)?;
        self.put_meta(KEY_COMMITTED, &raw)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        self.insert_entries(entries.into_iter().collect())?;
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let txn = self.log_db.begin_write().map_err(write_err)?;
        {
            let mut table = txn.open_table(LOG_TABLE).map_err(write_err)?;
            let keys: Vec<u64> = {
                let mut keys = Vec::new();
                for item in table.range(log_id.index..).map_err(write_err)? {
                    let (key, _) = item.map_err(write_err)?;
                    keys.push(key.value());
                }
                keys
            };
            for key in keys {
                table.remove(key).map_err(write_err)?;
            }
        }
        txn.commit().map_err(write_err)?;
        Ok(())
    }

    async fn purge(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let txn = self.log_db.begin_write().map_err(write_err)?;
        {
            let mut table = txn.open_table(LOG_TABLE).map_err(write_err)?;
            let keys: Vec<u64> = {
                let mut keys = Vec::new();
                for item in table.range(..=log_id.index).map_err(write_err)? {
                    let (key, _) = item.map_err(write_err)?;
                    keys.push(key.value());
                }
                keys
            };
            for key in keys {
                table.remove(key).map_err(write_err)?;
            }
        }
        txn.commit().map_err(write_err)?;

        let raw = bincode::serialize(&log_id).map_err(write_err)?;
        self.put_meta(KEY_LAST_PURGED, &raw)?;
        *self.last_purged_cache.write() = Some(log_id);
        Ok(())
    }
}

/// Applied-state metadata persisted alongside the vote
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateMachineState {
    pub last_applied_log: Option<LogId<NodeId>>,
    pub last_membership: StoredMembership<NodeId, BasicNode>,
}

/// On-disk snapshot envelope. `data` is the `IndexConfig` map as JSON;
/// per-index document data never travels in snapshots and is reconstructed
/// from the index directories on disk.
#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    meta: SnapshotMeta<NodeId, BasicNode>,
    data: Vec<u8>,
}

/// Raft state machine: the deterministic interpreter of committed commands
/// over the index store.
pub struct StateMachineStore {
    store: Arc<IndexStore>,
    stable_db: Arc<Database>,
    snapshot_dir: PathBuf,
    state: RwLock<StateMachineState>,
}

impl StateMachineStore {
    pub fn open(
        raft_dir: &Path,
        stable_db: Arc<Database>,
        store: Arc<IndexStore>,
    ) -> Result<Self, StorageError<NodeId>> {
        let snapshot_dir = raft_dir.join(SNAPSHOT_DIR);
        std::fs::create_dir_all(&snapshot_dir).map_err(sm_err)?;

        let state = {
            let txn = stable_db.begin_read().map_err(read_err)?;
            let meta = txn.open_table(META_TABLE).map_err(read_err)?;
            match meta.get(KEY_APPLIED_STATE).map_err(read_err)? {
                Some(raw) => bincode::deserialize(raw.value()).map_err(read_err)?,
                None => StateMachineState::default(),
            }
        };

        Ok(Self {
            store,
            stable_db,
            snapshot_dir,
            state: RwLock::new(state),
        })
    }

    fn persist_state(&self) -> Result<(), StorageError<NodeId>> {
        let raw = bincode::serialize(&*self.state.read()).map_err(sm_err)?;
        let txn = self.stable_db.begin_write().map_err(sm_err)?;
        {
            let mut meta = txn.open_table(META_TABLE).map_err(sm_err)?;
            meta.insert(KEY_APPLIED_STATE, raw.as_slice())
                .map_err(sm_err)?;
        }
        txn.commit().map_err(sm_err)?;
        Ok(())
    }

    /// Apply one replicated command. Must stay deterministic: no clocks, no
    /// randomness, no I/O beyond the index store. Logical failures become a
    /// `CommandResult`, never a storage error.
    fn apply_command(&self, command: &Command) -> CommandResult {
        let outcome = match command {
            Command::CreateIndex {
                id,
                primary_key,
                exclude_attributes,
            } => self.store.create_index(IndexConfig {
                id: id.clone(),
                primary_key: primary_key.clone(),
                exclude_attributes: exclude_attributes.clone(),
            }),

            Command::DeleteIndex { id } => self.store.delete_index(id),

            Command::UpdateIndex {
                id,
                primary_key,
                exclude_attributes,
            } => self
                .store
                .update_index(
                    id,
                    IndexConfig {
                        id: id.clone(),
                        primary_key: primary_key.clone(),
                        exclude_attributes: exclude_attributes.clone(),
                    },
                )
                .map(|_| ()),

            Command::AddDocuments {
                index_id,
                documents,
            } => self.store.add_documents(index_id, documents).map(|_| ()),

            Command::DeleteDocument {
                index_id,
                document_id,
            } => self.store.delete_document(index_id, document_id),

            Command::DeleteDocuments {
                index_id,
                filter,
                ids,
            } => self
                .store
                .delete_documents(index_id, filter, ids)
                .map(|_| ()),

            Command::UpdateDocument {
                index_id,
                document_id,
                updates,
            } => self
                .store
                .update_document(index_id, document_id, updates)
                .map(|_| ()),

            Command::AutoCreateAndAddDocuments {
                index_id,
                primary_key,
                documents,
            } => {
                let create = if self.store.index_exists(index_id) {
                    Ok(())
                } else {
                    self.store
                        .create_index(IndexConfig::new(index_id.clone(), primary_key.clone()))
                };
                create.and_then(|_| self.store.add_documents(index_id, documents).map(|_| ()))
            }
        };

        match outcome {
            Ok(()) => CommandResult::success(),
            Err(e) => CommandResult::failure(&e),
        }
    }

    fn snapshot_path(&self, snapshot_id: &str) -> PathBuf {
        self.snapshot_dir.join(format!("{}.bin", snapshot_id))
    }

    fn write_snapshot_file(&self, file: &SnapshotFile) -> Result<(), StorageError<NodeId>> {
        let raw = bincode::serialize(file)
            .map_err(|e| StorageIOError::write_snapshot(None, &e))?;
        std::fs::write(self.snapshot_path(&file.meta.snapshot_id), raw)
            .map_err(|e| StorageIOError::write_snapshot(None, &e))?;
        prune_snapshots(&self.snapshot_dir, SNAPSHOTS_TO_KEEP);
        Ok(())
    }

    fn read_latest_snapshot(&self) -> Option<SnapshotFile> {
        let mut best: Option<(u64, SnapshotFile)> = None;

        let entries = std::fs::read_dir(&self.snapshot_dir).ok()?;
        for entry in entries.flatten() {
            let raw = match std::fs::read(entry.path()) {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            let file: SnapshotFile = match bincode::deserialize(&raw) {
                Ok(file) => file,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "skipping unreadable snapshot");
                    continue;
                }
            };

            let index = file.meta.last_log_id.map(|l| l.index).unwrap_or(0);
            if best.as_ref().map(|(i, _)| index > *i).unwrap_or(true) {
                best = Some((index, file));
            }
        }

        best.map(|(_, file)| file)
    }
}

/// Keep only the newest `keep` snapshot files, by modification time
fn prune_snapshots(dir: &Path, keep: usize) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    let mut files: Vec<(std::time::SystemTime, PathBuf)> = entries
        .flatten()
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            Some((meta.modified().ok()?, e.path()))
        })
        .collect();

    if files.len() <= keep {
        return;
    }

    files.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, path) in files.into_iter().skip(keep) {
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "failed to prune snapshot");
        }
    }
}

impl RaftSnapshotBuilder<TypeConfig> for StateMachineStore {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        let state = self.state.read().clone();

        let configs = self.store.get_all_configs();
        let data = serde_json::to_vec(&configs)
            .map_err(|e| StorageIOError::write_snapshot(None, &e))?;

        let snapshot_id = format!(
            "snapshot-{}-{}",
            state.last_applied_log.map(|l| l.index).unwrap_or(0),
            chrono::Utc::now().timestamp()
        );

        let meta = SnapshotMeta {
            last_log_id: state.last_applied_log,
            last_membership: state.last_membership,
            snapshot_id,
        };

        self.write_snapshot_file(&SnapshotFile {
            meta: meta.clone(),
            data: data.clone(),
        })?;

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl RaftStateMachine<TypeConfig> for StateMachineStore {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<NodeId>>, StoredMembership<NodeId, BasicNode>), StorageError<NodeId>>
    {
        let state = self.state.read();
        Ok((state.last_applied_log, state.last_membership.clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<CommandResult>, StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        let mut responses = Vec::new();

        for entry in entries {
            let mut state = self.state.write();
            state.last_applied_log = Some(entry.log_id);

            match entry.payload {
                EntryPayload::Normal(ref request) => {
                    drop(state);
                    responses.push(self.apply_command(&request.command));
                }
                EntryPayload::Membership(ref membership) => {
                    state.last_membership =
                        StoredMembership::new(Some(entry.log_id), membership.clone());
                    drop(state);
                    responses.push(CommandResult::success());
                }
                EntryPayload::Blank => {
                    drop(state);
                    responses.push(CommandResult::success());
                }
            }
        }

        self.persist_state()?;
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        Self {
            store: Arc::clone(&self.store),
            stable_db: Arc::clone(&self.stable_db),
            snapshot_dir: self.snapshot_dir.clone(),
            state: RwLock::new(self.state.read().clone()),
        }
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, BasicNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeId>> {
        let data = snapshot.into_inner();

        let configs: HashMap<String, IndexConfig> = serde_json::from_slice(&data)
            .map_err(|e| StorageIOError::read_snapshot(None, &e))?;
        self.store
            .restore_configs(configs)
            .map_err(|e| StorageIOError::read_snapshot(None, &e))?;

        self.write_snapshot_file(&SnapshotFile {
            meta: meta.clone(),
            data,
        })?;

        let mut state = self.state.write();
        state.last_applied_log = meta.last_log_id;
        state.last_membership = meta.last_membership.clone();
        drop(state);

        self.persist_state()
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        match self.read_latest_snapshot() {
            Some(file) => Ok(Some(Snapshot {
                meta: file.meta,
                snapshot: Box::new(Cursor::new(file.data)),
            })),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prune_snapshots_keeps_newest() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("snapshot-{}-0.bin", i)), b"x").unwrap();
            // Distinct mtimes so ordering is stable on coarse-grained filesystems
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        prune_snapshots(dir.path(), 3);

        let mut remaining: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        remaining.sort();
        assert_eq!(
            remaining,
            vec![
                "snapshot-2-0.bin".to_string(),
                "snapshot-3-0.bin".to_string(),
                "snapshot-4-0.bin".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_log_store_append_and_read() {
        let dir = TempDir::new().unwrap();
        let mut store = LogStore::open(dir.path()).unwrap();

        let entries: Vec<Entry<TypeConfig>> = (1..=3)
            .map(|i| Entry {
                log_id: LogId::new(openraft::CommittedLeaderId::new(1, 1), i),
                payload: EntryPayload::Blank,
            })
            .collect();

        store.insert_entries(entries).unwrap();

        let read = store.try_get_log_entries(1..=3).await.unwrap();
        assert_eq!(read.len(), 3);
        assert_eq!(read[2].log_id.index, 3);

        let state = store.get_log_state().await.unwrap();
        assert_eq!(state.last_log_id.unwrap().index, 3);

        store
            .truncate(LogId::new(openraft::CommittedLeaderId::new(1, 1), 3))
            .await
            .unwrap();
        let read = store.try_get_log_entries(1..).await.unwrap();
        assert_eq!(read.len(), 2);
    }

    #[tokio::test]
    async fn test_log_store_vote_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let vote = Vote::new(7, 2);

        {
            let mut store = LogStore::open(dir.path()).unwrap();
            store.save_vote(&vote).await.unwrap();
        }

        let mut store = LogStore::open(dir.path()).unwrap();
        assert_eq!(store.read_vote().await.unwrap(), Some(vote));
    }
}
