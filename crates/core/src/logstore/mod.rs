//! The filesystem representation of the transaction log.
//!
//! A [`LogStore`] is scoped to a single table and owns the log directory
//! layout under `<root>/_delta_log/`. The correctness of everything built on
//! top is predicated on the guarantees of this interface:
//!
//! - Atomic visibility: partial commit writes must never be visible to readers.
//! - Mutual exclusion: only one writer can create the entry for a given version.
//! - Consistent listing: once an entry for version `v` has been written, any
//!   future listing must include it.
use std::sync::{Arc, LazyLock};

use bytes::Bytes;
use futures::StreamExt;
use object_store::{path::Path, Error as ObjectStoreError, ObjectStore};
use regex::Regex;
use tracing::{debug, error, warn};

use crate::errors::{TableLogError, TableLogResult};
use crate::kernel::Action;
use crate::operations::transaction::TransactionError;

pub mod default_logstore;

pub use default_logstore::DefaultLogStore;

/// Sharable reference to a [`LogStore`]
pub type LogStoreRef = Arc<dyn LogStore>;

/// Name of the directory holding the transaction log
pub const LOG_FOLDER_NAME: &str = "_delta_log";

static LOG_PATH: LazyLock<Path> = LazyLock::new(|| Path::from(LOG_FOLDER_NAME));

static COMMIT_FILE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{20})\.json$").unwrap());

/// Return the log-relative path of the commit file for a version.
///
/// ```rust
/// # use tablelog_core::logstore::commit_uri_from_version;
/// use object_store::path::Path;
/// let uri = commit_uri_from_version(3);
/// assert_eq!(uri, Path::from("_delta_log/00000000000000000003.json"));
/// ```
pub fn commit_uri_from_version(version: i64) -> Path {
    let version = format!("{version:020}.json");
    LOG_PATH.child(version.as_str())
}

/// Return the log-relative path of the checkpoint file for a version.
///
/// ```rust
/// # use tablelog_core::logstore::checkpoint_uri_from_version;
/// use object_store::path::Path;
/// let uri = checkpoint_uri_from_version(10);
/// assert_eq!(
///     uri,
///     Path::from("_delta_log/00000000000000000010.checkpoint.parquet")
/// );
/// ```
pub fn checkpoint_uri_from_version(version: i64) -> Path {
    let version = format!("{version:020}.checkpoint.parquet");
    LOG_PATH.child(version.as_str())
}

/// Extract the version from a commit file name, e.g.
/// `00000000000000000003.json`. Anything else yields `None`.
pub fn commit_version_from_filename(name: &str) -> Option<i64> {
    COMMIT_FILE_REGEX
        .captures(name)
        .map(|captures| captures.get(1).unwrap().as_str().parse().unwrap())
}

/// Parse the actions of a commit from its line-delimited representation.
///
/// Blank lines are skipped; every non-blank line must hold exactly one
/// self-describing action record.
pub fn get_actions(version: i64, commit_log_bytes: &Bytes) -> TableLogResult<Vec<Action>> {
    debug!("parsing commit with version {version}...");
    let content = std::str::from_utf8(commit_log_bytes)
        .map_err(|err| TableLogError::Generic(format!("commit {version} is not utf-8: {err}")))?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|json_err| {
                error!("invalid action in commit {version}: `{line}`");
                TableLogError::InvalidJsonLog {
                    json_err,
                    line: line.to_string(),
                    version,
                }
            })
        })
        .collect()
}

/// Serialize actions into the line-delimited commit representation, one
/// record per line, each line terminated by a newline.
pub fn commit_bytes(actions: &[Action]) -> Result<Bytes, TransactionError> {
    let mut content = String::new();
    for action in actions {
        let json = serde_json::to_string(action)
            .map_err(|json_err| TransactionError::SerializeLogJson { json_err })?;
        content.push_str(&json);
        content.push('\n');
    }
    Ok(Bytes::from(content))
}

/// Trait for the critical operations required to read and write commit
/// entries of a table log.
#[async_trait::async_trait]
pub trait LogStore: Send + Sync {
    /// Return the name of this LogStore implementation
    fn name(&self) -> String;

    /// Read data for the commit entry with the given version.
    ///
    /// Returns `None` when no entry exists for the version, which lets
    /// callers scan tolerantly past gaps.
    async fn read_commit_entry(&self, version: i64) -> TableLogResult<Option<Bytes>>;

    /// Write the serialized commit entry for the given version.
    ///
    /// Fails with [`TransactionError::VersionAlreadyExists`] when an entry
    /// for the version is already present; callers retry with a higher
    /// version.
    async fn write_commit_entry(&self, version: i64, bytes: Bytes)
        -> Result<(), TransactionError>;

    /// List all committed versions in ascending order.
    ///
    /// Entries in the log directory that are not commit files are ignored.
    /// A missing log directory yields an empty list.
    async fn list_versions(&self) -> TableLogResult<Vec<i64>> {
        let storage = self.object_store();
        let mut stream = storage.list(Some(self.log_path()));
        let mut versions = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = match meta {
                Ok(meta) => meta,
                Err(ObjectStoreError::NotFound { .. }) => continue,
                Err(err) => return Err(err.into()),
            };
            if let Some(version) = meta
                .location
                .filename()
                .and_then(commit_version_from_filename)
            {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Find the latest version currently stored in the log, `-1` when the
    /// log holds no commits.
    async fn get_latest_version(&self) -> TableLogResult<i64> {
        Ok(self.list_versions().await?.last().copied().unwrap_or(-1))
    }

    /// Get the underlying object store.
    fn object_store(&self) -> Arc<dyn ObjectStore>;

    /// Log-relative path of the log directory.
    fn log_path(&self) -> &Path {
        &LOG_PATH
    }

    /// Fully qualified uri of the table root.
    fn root_uri(&self) -> String;
}

impl std::fmt::Debug for dyn LogStore + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.root_uri())
    }
}

/// Default implementation for reading a commit entry from an object store.
pub(crate) async fn read_commit_entry(
    storage: &dyn ObjectStore,
    version: i64,
) -> TableLogResult<Option<Bytes>> {
    let commit_uri = commit_uri_from_version(version);
    match storage.get(&commit_uri).await {
        Ok(res) => Ok(Some(res.bytes().await?)),
        Err(ObjectStoreError::NotFound { .. }) => {
            debug!("commit entry for version {version} not found");
            Ok(None)
        }
        Err(err) => {
            error!("failed to read commit entry for version {version}: {err}");
            Err(err.into())
        }
    }
}

/// Default implementation for writing a commit entry.
///
/// The entry is first staged as a temporary object and then moved into place
/// with `rename_if_not_exists`, so a partially written commit is never
/// visible and two writers racing for the same version get exactly one
/// winner, even across processes.
pub(crate) async fn write_commit_entry(
    storage: &dyn ObjectStore,
    version: i64,
    bytes: Bytes,
) -> Result<(), TransactionError> {
    let token = uuid::Uuid::new_v4().to_string();
    let tmp_commit = Path::from_iter([LOG_FOLDER_NAME, &format!("_commit_{token}.json.tmp")]);
    storage.put(&tmp_commit, bytes.into()).await?;

    match storage
        .rename_if_not_exists(&tmp_commit, &commit_uri_from_version(version))
        .await
    {
        Ok(()) => {
            debug!("commit entry for version {version} written successfully");
            Ok(())
        }
        Err(err) => {
            if let Err(err) = storage.delete(&tmp_commit).await {
                warn!("failed to clean up temporary commit {tmp_commit}: {err}");
            }
            match err {
                ObjectStoreError::AlreadyExists { .. } => {
                    warn!("commit entry for version {version} already exists");
                    Err(TransactionError::VersionAlreadyExists(version))
                }
                _ => {
                    error!("failed to write commit entry for version {version}: {err}");
                    Err(TransactionError::from(err))
                }
            }
        }
    }
}
