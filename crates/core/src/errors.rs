//! Error types for the tablelog crate
use object_store::Error as ObjectStoreError;

use crate::operations::transaction::TransactionError;
use crate::protocol::ProtocolError;

/// A result returned by tablelog
pub type TableLogResult<T> = Result<T, TableLogError>;

/// Errors raised while operating on a table transaction log
#[derive(thiserror::Error, Debug)]
pub enum TableLogError {
    /// Error raised by the protocol layer (checkpoint pointer, log framing).
    #[error("Log protocol violation: {source}")]
    Protocol {
        /// The source error
        source: ProtocolError,
    },

    /// Error returned when reading or writing a log object failed.
    #[error("Failed to access log object: {source}")]
    ObjectStore {
        /// Storage error details when reading or writing the log object failed.
        #[from]
        source: ObjectStoreError,
    },

    /// Error returned when reading or writing a binary checkpoint.
    #[error("Failed to parse parquet: {source}")]
    Parquet {
        /// Parquet error details returned when reading the checkpoint failed.
        #[from]
        source: parquet::errors::ParquetError,
    },

    /// Error returned when a log record holds invalid JSON.
    #[error("Invalid JSON in log record, version={version}, line=`{line}`, err=`{json_err}`")]
    InvalidJsonLog {
        /// JSON error details returned when parsing the record JSON.
        json_err: serde_json::error::Error,
        /// Invalid log entry content.
        line: String,
        /// Corresponding table version for the log file.
        version: i64,
    },

    /// Error returned when an operation names a version that cannot exist.
    #[error("Invalid table version: {0}")]
    InvalidVersion(i64),

    /// Error returned when a caller supplies an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Error returned when a commit for the given version already exists.
    #[error("Transaction failed, version {0} already exists")]
    VersionAlreadyExists(i64),

    /// Error raised while committing a transaction.
    #[error("Transaction failed: {source}")]
    Transaction {
        /// The source error
        source: TransactionError,
    },

    /// Error raised by the underlying filesystem.
    #[error("Log storage I/O error: {source}")]
    Io {
        /// Source error details returned while accessing the log.
        #[from]
        source: std::io::Error,
    },

    /// Error returned when a table location cannot be resolved to a store.
    #[error("Cannot infer storage location from: {0}")]
    InvalidTableLocation(String),

    /// Error returned when serializing staged actions to JSON fails.
    #[error("Log JSON serialization error: {json_err}")]
    SerializeLogJson {
        /// JSON serialization error
        json_err: serde_json::error::Error,
    },

    /// Generic tablelog error
    #[error("Generic TableLog error: {0}")]
    Generic(String),
}

impl From<ProtocolError> for TableLogError {
    fn from(value: ProtocolError) -> Self {
        match value {
            ProtocolError::ObjectStore { source } => TableLogError::ObjectStore { source },
            ProtocolError::Parquet { source } => TableLogError::Parquet { source },
            _ => TableLogError::Protocol { source: value },
        }
    }
}

impl From<TransactionError> for TableLogError {
    fn from(value: TransactionError) -> Self {
        match value {
            TransactionError::VersionAlreadyExists(version) => {
                TableLogError::VersionAlreadyExists(version)
            }
            TransactionError::SerializeLogJson { json_err } => {
                TableLogError::SerializeLogJson { json_err }
            }
            TransactionError::ObjectStore { source } => TableLogError::ObjectStore { source },
            other => TableLogError::Transaction { source: other },
        }
    }
}
