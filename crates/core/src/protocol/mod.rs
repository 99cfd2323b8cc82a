//! Log protocol support: the checkpoint pointer record and the errors shared
//! by log recovery and the checkpoint engine.

use object_store::Error as ObjectStoreError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::logstore::LogStore;

pub mod checkpoints;

pub use checkpoints::{
    create_checkpoint, create_checkpoint_for, read_checkpoint, should_checkpoint,
    DEFAULT_CHECKPOINT_INTERVAL,
};

/// Name of the file locating the newest checkpoint
pub const LAST_CHECKPOINT_FILE_NAME: &str = "_last_checkpoint";

/// Errors raised by the log protocol layer
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    /// The log holds no checkpoint
    #[error("Checkpoint file not found")]
    CheckpointNotFound,

    /// A checkpoint or its pointer could not be parsed
    #[error("Malformed checkpoint: {msg}")]
    CorruptCheckpoint {
        /// Details of the corruption
        msg: String,
    },

    /// Error returned when the storage layer fails
    #[error("Log storage error: {source}")]
    ObjectStore {
        /// Storage error details
        #[from]
        source: ObjectStoreError,
    },

    /// Error returned when reading or writing the binary checkpoint container
    #[error("Parquet error: {source}")]
    Parquet {
        /// Parquet error details
        #[from]
        source: parquet::errors::ParquetError,
    },

    /// Generic protocol error
    #[error("Generic protocol error: {0}")]
    Generic(String),
}

/// Metadata for a checkpoint file, stored in the `_last_checkpoint` pointer.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy)]
pub struct CheckPoint {
    /// Table version of the checkpoint
    pub(crate) version: i64, // 20 digit decimals
    /// The number of actions stored in the checkpoint
    pub(crate) size: i64,
    /// The number of fragments if the checkpoint was written in multiple
    /// parts. Always `None` for the single-part checkpoints written here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) parts: Option<u32>,
}

impl CheckPoint {
    /// Creates a new checkpoint pointer record from the given parameters.
    pub fn new(version: i64, size: i64, parts: Option<u32>) -> Self {
        Self {
            version,
            size,
            parts,
        }
    }

    /// Table version of the checkpoint
    pub fn version(&self) -> i64 {
        self.version
    }

    /// The number of actions stored in the checkpoint
    pub fn size(&self) -> i64 {
        self.size
    }

    /// The number of parts of a multi-part checkpoint
    pub fn parts(&self) -> Option<u32> {
        self.parts
    }
}

impl PartialEq for CheckPoint {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
    }
}

impl Eq for CheckPoint {}

/// Read the `_last_checkpoint` pointer of the given log.
///
/// A missing pointer yields [`ProtocolError::CheckpointNotFound`]; a pointer
/// that cannot be parsed yields [`ProtocolError::CorruptCheckpoint`].
pub async fn get_last_checkpoint(log_store: &dyn LogStore) -> Result<CheckPoint, ProtocolError> {
    let file_path = log_store.log_path().child(LAST_CHECKPOINT_FILE_NAME);
    let data = match log_store.object_store().get(&file_path).await {
        Ok(data) => data.bytes().await?,
        Err(ObjectStoreError::NotFound { .. }) => return Err(ProtocolError::CheckpointNotFound),
        Err(err) => return Err(err.into()),
    };
    debug!("found last checkpoint pointer: {data:?}");
    serde_json::from_slice(&data).map_err(|err| ProtocolError::CorruptCheckpoint {
        msg: format!("invalid _last_checkpoint JSON: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use object_store::memory::InMemory;

    use super::*;
    use crate::logstore::DefaultLogStore;

    fn memory_store() -> DefaultLogStore {
        DefaultLogStore::new(
            Arc::new(InMemory::new()),
            url::Url::parse("memory:///table").unwrap(),
        )
    }

    #[test]
    fn test_checkpoint_pointer_serde() {
        let pointer = CheckPoint::new(10, 21, None);
        assert_eq!(
            serde_json::to_string(&pointer).unwrap(),
            "{\"version\":10,\"size\":21}"
        );
        let parsed: CheckPoint =
            serde_json::from_str("{\"version\":10,\"size\":21,\"parts\":null}").unwrap();
        assert_eq!(parsed, pointer);
    }

    #[tokio::test]
    async fn test_get_last_checkpoint_missing() {
        let store = memory_store();
        let res = get_last_checkpoint(&store).await;
        assert!(matches!(res, Err(ProtocolError::CheckpointNotFound)));
    }

    #[tokio::test]
    async fn test_get_last_checkpoint_malformed() {
        let store = memory_store();
        let path = store.log_path().child(LAST_CHECKPOINT_FILE_NAME);
        store
            .object_store()
            .put(&path, Bytes::from("not json").into())
            .await
            .unwrap();
        let res = get_last_checkpoint(&store).await;
        assert!(matches!(res, Err(ProtocolError::CorruptCheckpoint { .. })));
    }

    #[tokio::test]
    async fn test_get_last_checkpoint_roundtrip() {
        let store = memory_store();
        let path = store.log_path().child(LAST_CHECKPOINT_FILE_NAME);
        let pointer = CheckPoint::new(20, 7, None);
        store
            .object_store()
            .put(&path, Bytes::from(serde_json::to_vec(&pointer).unwrap()).into())
            .await
            .unwrap();
        let found = get_last_checkpoint(&store).await.unwrap();
        assert_eq!(found, pointer);
        assert_eq!(found.size(), 7);
    }
}
