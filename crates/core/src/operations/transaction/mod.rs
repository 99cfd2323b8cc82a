//! Add a commit entry to the table log.
//!
//! Two layers are provided. [`Transaction`] is a single-writer append: it
//! stages actions and writes them as the next version. [`OptimisticTransaction`]
//! additionally tracks what was read, detects conflicts against commits that
//! landed since its read version, and can retry with exponential backoff.
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use object_store::Error as ObjectStoreError;
use tracing::{debug, warn};

use crate::errors::{TableLogError, TableLogResult};
use crate::kernel::{Action, IsolationLevel};
use crate::table::TransactionLog;

pub(crate) mod conflict_checker;

pub use conflict_checker::CommitConflictError;

/// Default maximum number of commit attempts of an optimistic transaction
pub const DEFAULT_MAX_RETRY_COUNT: usize = 3;

/// Error raised while committing a transaction
#[derive(thiserror::Error, Debug)]
pub enum TransactionError {
    /// Version already exists
    #[error("Tried committing existing table version: {0}")]
    VersionAlreadyExists(i64),

    /// Error returned when serializing the commit log to json failed.
    #[error("Error serializing commit log to json: {json_err}")]
    SerializeLogJson {
        /// Commit log record JSON serialization error.
        json_err: serde_json::error::Error,
    },

    /// Error returned when the log storage layer failed.
    #[error("Log storage error: {source}")]
    ObjectStore {
        /// Storage error details when writing the commit entry failed.
        #[from]
        source: ObjectStoreError,
    },

    /// Error returned when a commit conflict occurred
    #[error("Failed to commit transaction: {0}")]
    CommitConflict(#[from] CommitConflictError),

    /// Error returned when the transaction was already committed
    #[error("Transaction is already committed")]
    AlreadyCommitted,
}

/// Error carried inside the I/O error surfaced when commit retries are
/// exhausted.
#[derive(thiserror::Error, Debug)]
#[error("failed to commit transaction after {attempts} attempts")]
pub struct RetriesExhausted {
    /// Number of commit attempts made
    pub attempts: usize,
    /// The conflict that failed the final attempt
    #[source]
    pub source: CommitConflictError,
}

fn backoff(attempt: usize) -> Duration {
    Duration::from_millis(50u64.saturating_mul(1u64 << attempt.min(16)))
}

fn retries_exhausted(attempts: usize, conflict: CommitConflictError) -> TableLogError {
    TableLogError::Io {
        source: std::io::Error::other(RetriesExhausted {
            attempts,
            source: conflict,
        }),
    }
}

/// A single-writer transaction appending actions to a table log.
pub struct Transaction {
    log: Arc<TransactionLog>,
    actions: Vec<Action>,
    app_id: String,
    committed: AtomicBool,
}

impl Transaction {
    /// Create a new transaction against the given log.
    pub fn new(log: Arc<TransactionLog>) -> Self {
        Self {
            log,
            actions: Vec::new(),
            app_id: uuid::Uuid::new_v4().to_string(),
            committed: AtomicBool::new(false),
        }
    }

    /// Identifier of the application performing the transaction.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// The actions staged so far.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Stage an action. Fails once the transaction has committed.
    pub fn add_action(&mut self, action: Action) -> TableLogResult<()> {
        if self.committed.load(Ordering::SeqCst) {
            return Err(TransactionError::AlreadyCommitted.into());
        }
        self.actions.push(action);
        Ok(())
    }

    /// Commit the staged actions as the next version of the table.
    ///
    /// The version is resolved as `latest_version() + 1` under the log's
    /// lock; the first commit of a fresh table is version 0. Returns the
    /// committed version.
    pub async fn commit(&mut self) -> TableLogResult<i64> {
        if self.committed.load(Ordering::SeqCst) {
            return Err(TransactionError::AlreadyCommitted.into());
        }
        let version = self.log.append(&self.actions).await?;
        self.committed.store(true, Ordering::SeqCst);
        debug!("transaction {} committed version {version}", self.app_id);
        Ok(version)
    }
}

/// A transaction using optimistic concurrency control.
///
/// The transaction captures the table version at construction, records what
/// it reads, and at commit time checks whether any commit that landed since
/// then invalidates those reads. State machine: staging until a commit
/// succeeds (terminal); a conflicting commit leaves the transaction staging
/// so it can be retried.
pub struct OptimisticTransaction {
    log: Arc<TransactionLog>,
    actions: Vec<Action>,
    app_id: String,
    committed: AtomicBool,
    isolation_level: IsolationLevel,
    read_version: i64,
    read_predicates: HashSet<String>,
    new_metadata: HashMap<String, String>,
    max_retry_count: usize,
}

impl OptimisticTransaction {
    /// Create a new optimistic transaction, capturing the current table
    /// version as its read version.
    pub(crate) async fn try_new(log: Arc<TransactionLog>) -> TableLogResult<Self> {
        let read_version = log.latest_version().await?;
        Ok(Self {
            log,
            actions: Vec::new(),
            app_id: uuid::Uuid::new_v4().to_string(),
            committed: AtomicBool::new(false),
            isolation_level: IsolationLevel::default(),
            read_version,
            read_predicates: HashSet::new(),
            new_metadata: HashMap::new(),
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
        })
    }

    /// Set the isolation level used for conflict detection.
    pub fn with_isolation_level(mut self, isolation_level: IsolationLevel) -> Self {
        self.isolation_level = isolation_level;
        self
    }

    /// Set the maximum number of commit attempts of
    /// [`commit_with_retry`](Self::commit_with_retry).
    pub fn with_max_retry_count(mut self, max_retry_count: usize) -> Self {
        self.max_retry_count = max_retry_count;
        self
    }

    /// Identifier of the application performing the transaction.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// The table version this transaction reads from.
    pub fn read_version(&self) -> i64 {
        self.read_version
    }

    /// The actions staged so far.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Stage an action. Fails once the transaction has committed.
    pub fn add_action(&mut self, action: Action) -> TableLogResult<()> {
        if self.committed.load(Ordering::SeqCst) {
            return Err(TransactionError::AlreadyCommitted.into());
        }
        self.actions.push(action);
        Ok(())
    }

    /// Record that a predicate was read as part of this transaction.
    pub fn read_predicate(&mut self, predicate: impl Into<String>) -> &mut Self {
        self.read_predicates.insert(predicate.into());
        self
    }

    /// Record that the file at the given path was read.
    pub fn read_file(&mut self, path: impl AsRef<str>) -> &mut Self {
        self.read_predicate(format!("file:{}", path.as_ref()))
    }

    /// Record that the metadata key was read.
    pub fn read_metadata(&mut self, key: impl AsRef<str>) -> &mut Self {
        self.read_predicate(format!("metadata:{}", key.as_ref()))
    }

    /// Stage a metadata update for the given key.
    pub fn update_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.new_metadata.insert(key.into(), value.into());
        self
    }

    /// Commit the staged actions under the given operation name.
    ///
    /// Conflict check, commit-info augmentation, and the write execute as a
    /// single critical section under the log's lock. On conflict the
    /// transaction stays uncommitted and may be retried.
    pub async fn commit(&mut self, operation: &str) -> TableLogResult<i64> {
        if self.committed.load(Ordering::SeqCst) {
            return Err(TransactionError::AlreadyCommitted.into());
        }
        let txn_info =
            conflict_checker::TransactionInfo::new(&self.read_predicates, &self.new_metadata);
        let version = self
            .log
            .commit_transaction(
                &self.actions,
                operation,
                self.read_version,
                txn_info,
                self.isolation_level,
            )
            .await?;
        self.committed.store(true, Ordering::SeqCst);
        debug!("transaction {} committed version {version}", self.app_id);
        Ok(version)
    }

    /// Commit with automatic retry on conflicts.
    ///
    /// Backs off `50ms * 2^attempt` between attempts and recaptures the read
    /// version so the next attempt is evaluated against the new base. After
    /// `max_retry_count` failed attempts the last conflict is surfaced as an
    /// I/O error with the conflict as its cause.
    pub async fn commit_with_retry(&mut self, operation: &str) -> TableLogResult<i64> {
        let mut attempt = 0usize;
        loop {
            match self.commit(operation).await {
                Ok(version) => return Ok(version),
                Err(TableLogError::Transaction {
                    source: TransactionError::CommitConflict(conflict),
                }) => {
                    attempt += 1;
                    if attempt >= self.max_retry_count {
                        warn!(
                            "giving up commit of `{operation}` after {attempt} attempts: {conflict}"
                        );
                        return Err(retries_exhausted(attempt, conflict));
                    }
                    warn!("commit attempt {attempt} of `{operation}` conflicted, backing off: {conflict}");
                    tokio::time::sleep(backoff(attempt)).await;
                    self.read_version = self.log.update().await?.version();
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Run a commit operation with automatic retry on conflicts.
///
/// The factory is invoked once per attempt so each attempt works against a
/// fresh transaction; conflicts back off `50ms * 2^attempt`. Exhaustion
/// surfaces the last conflict as an I/O error with the conflict as its
/// cause.
pub async fn execute_with_retry<T, F, Fut>(
    max_retry_count: usize,
    mut operation: F,
) -> TableLogResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = TableLogResult<T>>,
{
    let mut attempt = 0usize;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(TableLogError::Transaction {
                source: TransactionError::CommitConflict(conflict),
            }) => {
                attempt += 1;
                if attempt >= max_retry_count {
                    return Err(retries_exhausted(attempt, conflict));
                }
                warn!("attempt {attempt} conflicted, backing off: {conflict}");
                tokio::time::sleep(backoff(attempt)).await;
            }
            Err(err) => return Err(err),
        }
    }
}
