//! Table log handle: versioned reads, lock-guarded writes, and recovery.

use std::path::Path as StdPath;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use self::config::TableLogConfig;
use self::state::Snapshot;
use crate::errors::{TableLogError, TableLogResult};
use crate::kernel::{Action, CommitInfo, IsolationLevel};
use crate::logstore::{commit_bytes, get_actions, DefaultLogStore, LogStoreRef};
use crate::operations::transaction::conflict_checker::{
    ConflictChecker, TransactionInfo, WinningCommitSummary,
};
use crate::operations::transaction::{OptimisticTransaction, TransactionError};
use crate::protocol::checkpoints::{create_checkpoint_for, read_checkpoint_at, should_checkpoint};
use crate::protocol::{get_last_checkpoint, ProtocolError};

pub mod config;
pub mod state;

/// The next commit that's available from the underlying storage
#[derive(Debug)]
pub enum PeekCommit {
    /// The next commit version and associated actions
    New(i64, Vec<Action>),
    /// The provided version is up to date
    UpToDate,
}

/// Handle to the transaction log of a single table.
///
/// The handle owns the per-log lock. `update`, `write`, `checkpoint`, and the
/// optimistic conflict-check/commit composite hold it for their entire
/// critical section; plain version reads do not.
#[derive(Debug)]
pub struct TransactionLog {
    /// log store
    log_store: LogStoreRef,
    /// the options used for this handle
    config: TableLogConfig,
    /// Snapshot cache, refreshed under the log's lock. The mutex doubles as
    /// the per-log lock; commits are assigned strictly monotonic versions by
    /// whichever task wins it.
    state: Mutex<Snapshot>,
}

impl TransactionLog {
    /// Create a handle for the table rooted at the given local directory,
    /// creating the directory if needed.
    pub fn for_table(table_path: impl AsRef<StdPath>) -> TableLogResult<Arc<Self>> {
        Self::for_table_with_config(table_path, TableLogConfig::default())
    }

    /// Create a handle for a local table with explicit options.
    pub fn for_table_with_config(
        table_path: impl AsRef<StdPath>,
        config: TableLogConfig,
    ) -> TableLogResult<Arc<Self>> {
        std::fs::create_dir_all(table_path.as_ref())?;
        let canonical = std::fs::canonicalize(table_path.as_ref())?;
        let location = Url::from_directory_path(&canonical).map_err(|_| {
            TableLogError::InvalidTableLocation(table_path.as_ref().display().to_string())
        })?;
        Self::for_table_uri_with_config(location.as_str(), config)
    }

    /// Create a handle for the table at the given uri (`file://` or
    /// `memory://`).
    pub fn for_table_uri(table_uri: impl AsRef<str>) -> TableLogResult<Arc<Self>> {
        Self::for_table_uri_with_config(table_uri, TableLogConfig::default())
    }

    /// Create a handle for the table at the given uri with explicit options.
    pub fn for_table_uri_with_config(
        table_uri: impl AsRef<str>,
        config: TableLogConfig,
    ) -> TableLogResult<Arc<Self>> {
        let location = Url::parse(table_uri.as_ref())
            .map_err(|_| TableLogError::InvalidTableLocation(table_uri.as_ref().to_string()))?;
        let log_store: LogStoreRef = Arc::new(DefaultLogStore::try_new(location)?);
        Ok(Self::new(log_store, config))
    }

    /// Create a handle on top of an existing log store.
    pub fn new(log_store: LogStoreRef, config: TableLogConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            log_store,
            config,
            state: Mutex::new(Snapshot::new(weak.clone(), -1, Vec::new())),
        })
    }

    /// The options used for this handle.
    pub fn config(&self) -> &TableLogConfig {
        &self.config
    }

    /// Get a shared reference to the underlying log store.
    pub fn log_store(&self) -> LogStoreRef {
        self.log_store.clone()
    }

    /// The uri of the table root.
    pub fn table_uri(&self) -> String {
        self.log_store.root_uri()
    }

    /// List all committed versions in ascending order.
    pub async fn list_versions(&self) -> TableLogResult<Vec<i64>> {
        self.log_store.list_versions().await
    }

    /// The latest committed version, `-1` if the log holds no commits.
    pub async fn latest_version(&self) -> TableLogResult<i64> {
        self.log_store.get_latest_version().await
    }

    /// Whether the table exists, i.e. the log holds at least one commit.
    pub async fn table_exists(&self) -> TableLogResult<bool> {
        Ok(self.latest_version().await? >= 0)
    }

    /// Read the actions of a single version. A missing commit file yields an
    /// empty list so tolerant scans can pass over gaps.
    pub async fn read_version(&self, version: i64) -> TableLogResult<Vec<Action>> {
        match self.log_store.read_commit_entry(version).await? {
            Some(bytes) => get_actions(version, &bytes),
            None => Ok(Vec::new()),
        }
    }

    /// Read the actions of every committed version, in commit order.
    pub async fn all_actions(&self) -> TableLogResult<Vec<Action>> {
        let mut actions = Vec::new();
        for version in self.list_versions().await? {
            actions.extend(self.read_version(version).await?);
        }
        Ok(actions)
    }

    /// Get the actions of the commit after `current_version`, if any.
    pub async fn peek_next_commit(&self, current_version: i64) -> TableLogResult<PeekCommit> {
        let next_version = current_version + 1;
        let commit_log_bytes = match self.log_store.read_commit_entry(next_version).await? {
            Some(bytes) => bytes,
            None => return Ok(PeekCommit::UpToDate),
        };
        let actions = get_actions(next_version, &commit_log_bytes)?;
        Ok(PeekCommit::New(next_version, actions))
    }

    /// Update the cached snapshot to the latest committed version and return
    /// it.
    ///
    /// Recovery combines the newest usable checkpoint with the incremental
    /// commits past it; without one, every version is replayed. A table with
    /// no commits yields an empty snapshot at version `-1`.
    pub async fn update(self: &Arc<Self>) -> TableLogResult<Snapshot> {
        let mut state = self.state.lock().await;
        self.update_locked(&mut state).await?;
        Ok(state.clone())
    }

    /// The current snapshot of the table, refreshed to the latest version.
    pub async fn snapshot(self: &Arc<Self>) -> TableLogResult<Snapshot> {
        self.update().await
    }

    /// Provenance records of the table, oldest first. With a limit, only the
    /// most recent `limit` records are returned.
    pub async fn history(self: &Arc<Self>, limit: Option<usize>) -> TableLogResult<Vec<CommitInfo>> {
        let snapshot = self.update().await?;
        let infos = snapshot.commit_infos();
        let skip = match limit {
            Some(limit) => infos.len().saturating_sub(limit),
            None => 0,
        };
        Ok(infos[skip..].to_vec())
    }

    /// Write actions to a new version file.
    ///
    /// Callers prevent overwriting an existing version by resolving
    /// `version = latest_version() + 1` under the log's lock; transactions do
    /// exactly that. Writing triggers a checkpoint when the version hits the
    /// configured cadence.
    pub async fn write(self: &Arc<Self>, version: i64, actions: &[Action]) -> TableLogResult<()> {
        let mut state = self.state.lock().await;
        self.write_version_locked(&mut state, version, actions).await
    }

    /// Append actions as the next version, resolved under the log's lock.
    /// Returns the written version.
    pub(crate) async fn append(self: &Arc<Self>, actions: &[Action]) -> TableLogResult<i64> {
        let mut state = self.state.lock().await;
        let version = self.log_store.get_latest_version().await? + 1;
        self.write_version_locked(&mut state, version, actions)
            .await?;
        Ok(version)
    }

    /// Create a checkpoint for the given snapshot.
    pub async fn checkpoint(self: &Arc<Self>, snapshot: &Snapshot) -> TableLogResult<i64> {
        let _guard = self.state.lock().await;
        create_checkpoint_for(snapshot, self.log_store.as_ref()).await
    }

    /// Start a new optimistic transaction against this table.
    pub async fn start_transaction(self: &Arc<Self>) -> TableLogResult<OptimisticTransaction> {
        OptimisticTransaction::try_new(self.clone()).await
    }

    /// Conflict-check and commit staged actions as one critical section.
    ///
    /// Holds the log's lock across the re-check and the write so no commit
    /// can interleave between them. The committed version is resolved as
    /// `latest_version() + 1` under the same lock; a non-conflicting commit
    /// that landed after `read_version` therefore rebases this transaction
    /// forward instead of being overwritten.
    pub(crate) async fn commit_transaction(
        self: &Arc<Self>,
        actions: &[Action],
        operation: &str,
        read_version: i64,
        txn_info: TransactionInfo<'_>,
        isolation_level: IsolationLevel,
    ) -> TableLogResult<i64> {
        let mut state = self.state.lock().await;
        let latest = self.log_store.get_latest_version().await?;

        if read_version >= 0 && latest > read_version {
            let mut winning_actions = Vec::new();
            for version in (read_version + 1)..=latest {
                if let Some(bytes) = self.log_store.read_commit_entry(version).await? {
                    winning_actions.extend(get_actions(version, &bytes)?);
                }
            }
            let summary = WinningCommitSummary::new(winning_actions);
            if let Err(conflict) =
                ConflictChecker::new(&txn_info, summary, isolation_level).check_conflicts()
            {
                warn!(
                    "commit of `{operation}` at read version {read_version} conflicts: {conflict}"
                );
                return Err(TransactionError::CommitConflict(conflict).into());
            }
        }

        let version = latest + 1;
        let mut commit_info = CommitInfo::new(operation)
            .with_parameter("isolationLevel", isolation_level.as_ref())
            .with_parameter("startVersion", read_version.to_string())
            .with_parameter("commitTime", Utc::now().timestamp_millis().to_string())
            .with_parameter("clientVersion", format!("tablelog.{}", crate::crate_version()));
        commit_info.version = version.to_string();
        commit_info.commit_version = version.to_string();

        let mut commit_actions = actions.to_vec();
        commit_actions.push(Action::CommitInfo(commit_info));

        self.write_version_locked(&mut state, version, &commit_actions)
            .await?;
        Ok(version)
    }

    /// Write a version file, refresh the snapshot, and checkpoint when the
    /// cadence is hit. Requires the log's lock to be held.
    async fn write_version_locked(
        self: &Arc<Self>,
        state: &mut Snapshot,
        version: i64,
        actions: &[Action],
    ) -> TableLogResult<()> {
        let bytes = commit_bytes(actions)?;
        self.log_store.write_commit_entry(version, bytes).await?;
        self.update_locked(state).await?;

        if should_checkpoint(version, self.config.checkpoint_interval) {
            debug!(
                "creating checkpoint for version {version} (interval: {})",
                self.config.checkpoint_interval
            );
            create_checkpoint_for(state, self.log_store.as_ref()).await?;
        }
        Ok(())
    }

    /// Refresh the cached snapshot. Requires the log's lock to be held.
    async fn update_locked(self: &Arc<Self>, state: &mut Snapshot) -> TableLogResult<()> {
        let latest = self.log_store.get_latest_version().await?;
        if latest == state.version() {
            return Ok(());
        }
        if latest < 0 {
            *state = Snapshot::empty(Arc::downgrade(self));
            return Ok(());
        }

        let (mut actions, next) = match get_last_checkpoint(self.log_store.as_ref()).await {
            Ok(checkpoint) if checkpoint.version() <= latest && checkpoint.version() > state.version() => {
                debug!("recovering from checkpoint at version {}", checkpoint.version());
                let actions = read_checkpoint_at(self.log_store.as_ref(), checkpoint.version()).await?;
                (actions, checkpoint.version() + 1)
            }
            Ok(_) | Err(ProtocolError::CheckpointNotFound) => {
                // continue from the cached snapshot
                (state.actions().to_vec(), state.version() + 1)
            }
            Err(err) => return Err(err.into()),
        };

        let log_store = self.log_store.clone();
        let mut commits = futures::stream::iter(next..=latest)
            .map(|version| {
                let log_store = log_store.clone();
                async move {
                    let data = log_store.read_commit_entry(version).await?;
                    Ok::<_, TableLogError>((version, data))
                }
            })
            .buffered(self.config.log_buffer_size);

        while let Some(res) = commits.next().await {
            let (version, data) = res?;
            if let Some(bytes) = data {
                debug!("merging table state with version {version}");
                actions.extend(get_actions(version, &bytes)?);
            }
        }

        *state = Snapshot::new(Arc::downgrade(self), latest, actions);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::kernel::{Add, Metadata, Protocol, Remove};
    use crate::logstore::checkpoint_uri_from_version;

    fn memory_log() -> Arc<TransactionLog> {
        TransactionLog::for_table_uri("memory:///table").unwrap()
    }

    fn memory_log_with_interval(interval: i64) -> Arc<TransactionLog> {
        TransactionLog::for_table_uri_with_config(
            "memory:///table",
            TableLogConfig::default()
                .with_checkpoint_interval(interval)
                .unwrap(),
        )
        .unwrap()
    }

    fn init_actions() -> Vec<Action> {
        vec![
            Action::Protocol(Protocol::new(1, 1)),
            Action::Metadata(Metadata::new("id-1", "Test Table", "csv")),
        ]
    }

    #[tokio::test]
    async fn test_fresh_table() {
        let log = memory_log();
        assert_eq!(log.latest_version().await.unwrap(), -1);
        assert!(!log.table_exists().await.unwrap());
        let snapshot = log.update().await.unwrap();
        assert_eq!(snapshot.version(), -1);
        assert_eq!(snapshot.all_files().count(), 0);
    }

    #[tokio::test]
    async fn test_write_and_update() {
        let log = memory_log();
        log.write(0, &init_actions()).await.unwrap();

        assert_eq!(log.latest_version().await.unwrap(), 0);
        assert!(log.table_exists().await.unwrap());
        let snapshot = log.update().await.unwrap();
        assert_eq!(snapshot.version(), 0);
        assert!(snapshot.protocol().is_some());
        assert!(snapshot.metadata().is_some());
        assert_eq!(snapshot.all_files().count(), 0);
    }

    #[tokio::test]
    async fn test_read_version_roundtrip() {
        let log = memory_log();
        let actions = init_actions();
        log.write(0, &actions).await.unwrap();
        assert_eq!(log.read_version(0).await.unwrap(), actions);
        // missing version reads as empty
        assert!(log.read_version(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_back_reference() {
        let log = memory_log();
        log.write(0, &init_actions()).await.unwrap();
        let snapshot = log.update().await.unwrap();
        let upgraded = snapshot.log().expect("log should be alive");
        assert_eq!(upgraded.table_uri(), log.table_uri());
        drop(upgraded);
        drop(log);
        assert!(snapshot.log().is_none());
    }

    #[tokio::test]
    async fn test_write_checkpoints_on_cadence() {
        let log = memory_log_with_interval(2);
        log.write(0, &init_actions()).await.unwrap();
        // version 0 always checkpoints
        let store = log.log_store().object_store();
        assert!(store.get(&checkpoint_uri_from_version(0)).await.is_ok());

        log.write(1, &[Action::Add(Add::new("data/file1.csv", 1, 1))])
            .await
            .unwrap();
        assert!(store.get(&checkpoint_uri_from_version(1)).await.is_err());

        log.write(2, &[Action::Add(Add::new("data/file2.csv", 2, 2))])
            .await
            .unwrap();
        assert!(store.get(&checkpoint_uri_from_version(2)).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_from_checkpoint_and_tail() {
        let log = memory_log_with_interval(2);
        log.write(0, &init_actions()).await.unwrap();
        log.write(
            1,
            &[
                Action::Add(Add::new("data/file1.csv", 100, 1)),
                Action::Add(Add::new("data/file2.csv", 200, 2)),
            ],
        )
        .await
        .unwrap();
        log.write(2, &[Action::Remove(Remove::new("data/file1.csv", 3))])
            .await
            .unwrap();
        log.write(3, &[Action::Add(Add::new("data/file3.csv", 300, 4))])
            .await
            .unwrap();

        // a fresh handle over the same storage recovers via the checkpoint
        let reopened = TransactionLog::new(
            log.log_store(),
            TableLogConfig::default().with_checkpoint_interval(2).unwrap(),
        );
        let snapshot = reopened.update().await.unwrap();
        assert_eq!(snapshot.version(), 3);
        let mut paths: Vec<_> = snapshot.all_files().map(|a| a.path.clone()).collect();
        paths.sort();
        assert_eq!(paths, vec!["data/file2.csv", "data/file3.csv"]);
    }

    #[tokio::test]
    async fn test_peek_next_commit() {
        let log = memory_log();
        log.write(0, &init_actions()).await.unwrap();
        match log.peek_next_commit(-1).await.unwrap() {
            PeekCommit::New(version, actions) => {
                assert_eq!(version, 0);
                assert_eq!(actions.len(), 2);
            }
            PeekCommit::UpToDate => panic!("expected a next commit"),
        }
        assert!(matches!(
            log.peek_next_commit(0).await.unwrap(),
            PeekCommit::UpToDate
        ));
    }

    #[tokio::test]
    async fn test_history_limit() {
        let log = memory_log();
        let mut tx = log.start_transaction().await.unwrap();
        for action in init_actions() {
            tx.add_action(action).unwrap();
        }
        tx.commit("CREATE TABLE").await.unwrap();

        let mut tx = log.start_transaction().await.unwrap();
        tx.add_action(Action::Add(Add::new("data/file1.csv", 1, 1)))
            .unwrap();
        tx.commit("WRITE").await.unwrap();

        let infos = log.history(None).await.unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].operation, "CREATE TABLE");
        assert_eq!(infos[1].operation, "WRITE");

        let infos = log.history(Some(1)).await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].operation, "WRITE");
    }
}
