//! Default [`LogStore`] implementation for storage backends with an atomic
//! rename-if-not-exists operation
use std::sync::Arc;

use bytes::Bytes;
use object_store::{local::LocalFileSystem, memory::InMemory, ObjectStore};
use url::Url;

use super::LogStore;
use crate::errors::{TableLogError, TableLogResult};
use crate::operations::transaction::TransactionError;

/// Default [`LogStore`] implementation
#[derive(Debug, Clone)]
pub struct DefaultLogStore {
    storage: Arc<dyn ObjectStore>,
    location: Url,
}

impl DefaultLogStore {
    /// Create a log store backed by the given object store.
    ///
    /// The store is expected to be rooted at the table directory, so that
    /// log entries live under the `_delta_log/` prefix.
    pub fn new(storage: Arc<dyn ObjectStore>, location: Url) -> Self {
        Self { storage, location }
    }

    /// Create a log store for the given table location.
    ///
    /// Supported schemes are `file://` (backed by the local filesystem) and
    /// `memory://` (backed by an in-memory store, mainly for testing).
    pub fn try_new(location: Url) -> TableLogResult<Self> {
        let storage: Arc<dyn ObjectStore> = match location.scheme() {
            "file" => {
                let path = location
                    .to_file_path()
                    .map_err(|_| TableLogError::InvalidTableLocation(location.to_string()))?;
                std::fs::create_dir_all(&path)?;
                Arc::new(LocalFileSystem::new_with_prefix(path)?)
            }
            "memory" => Arc::new(InMemory::new()),
            _ => return Err(TableLogError::InvalidTableLocation(location.to_string())),
        };
        Ok(Self { storage, location })
    }
}

#[async_trait::async_trait]
impl LogStore for DefaultLogStore {
    fn name(&self) -> String {
        "DefaultLogStore".into()
    }

    async fn read_commit_entry(&self, version: i64) -> TableLogResult<Option<Bytes>> {
        super::read_commit_entry(self.storage.as_ref(), version).await
    }

    async fn write_commit_entry(
        &self,
        version: i64,
        bytes: Bytes,
    ) -> Result<(), TransactionError> {
        super::write_commit_entry(self.storage.as_ref(), version, bytes).await
    }

    fn object_store(&self) -> Arc<dyn ObjectStore> {
        self.storage.clone()
    }

    fn root_uri(&self) -> String {
        self.location.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_scheme() {
        let location = Url::parse("s3://bucket/table").unwrap();
        let store = DefaultLogStore::try_new(location);
        assert!(matches!(
            store,
            Err(TableLogError::InvalidTableLocation(_))
        ));
    }

    #[tokio::test]
    async fn test_local_store_creates_table_root() {
        let tmp = tempfile::tempdir().unwrap();
        let table = tmp.path().join("fresh_table");
        let location = Url::from_directory_path(&table).unwrap();
        let store = DefaultLogStore::try_new(location).unwrap();
        assert!(table.is_dir());
        assert_eq!(store.get_latest_version().await.unwrap(), -1);
    }
}
