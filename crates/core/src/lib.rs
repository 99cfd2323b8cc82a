//! A native Rust library for a simplified, Delta-style table transaction log.
//!
//! Table state is managed as an ordered sequence of numbered commits under
//! `<root>/_delta_log/`. Each commit holds a set of actions that, replayed in
//! order, yield the current live data files and table metadata. Writers use
//! optimistic concurrency control with conflict detection and retry, and the
//! log is periodically compacted into binary checkpoints so recovery does not
//! replay every version.
//!
//! # Usage
//!
//! ```rust
//! # use tablelog_core::kernel::{Action, Add, Metadata, Protocol};
//! # use tablelog_core::TransactionLog;
//! # async {
//! let log = TransactionLog::for_table_uri("memory:///table").unwrap();
//!
//! let mut tx = log.start_transaction().await.unwrap();
//! tx.add_action(Action::Protocol(Protocol::new(1, 1))).unwrap();
//! tx.add_action(Action::Metadata(Metadata::new("id", "Table", "csv"))).unwrap();
//! tx.commit("CREATE TABLE").await.unwrap();
//!
//! let snapshot = log.update().await.unwrap();
//! assert_eq!(snapshot.version(), 0);
//! # };
//! ```

pub mod errors;
pub mod kernel;
pub mod logstore;
pub mod operations;
pub mod protocol;
pub mod table;

pub use errors::*;
pub use kernel::{Action, Add, CommitInfo, IsolationLevel, Metadata, Protocol, Remove};
pub use operations::transaction::{
    execute_with_retry, CommitConflictError, OptimisticTransaction, RetriesExhausted, Transaction,
    TransactionError, DEFAULT_MAX_RETRY_COUNT,
};
pub use protocol::{CheckPoint, ProtocolError, DEFAULT_CHECKPOINT_INTERVAL};
pub use table::config::TableLogConfig;
pub use table::state::Snapshot;
pub use table::{PeekCommit, TransactionLog};

use std::sync::Arc;

/// Open the table at the given local path, loaded to its latest version.
pub async fn open_table(table_path: impl AsRef<std::path::Path>) -> TableLogResult<Arc<TransactionLog>> {
    let log = TransactionLog::for_table(table_path)?;
    log.update().await?;
    Ok(log)
}

/// Open the table at the given local path with explicit options, loaded to
/// its latest version.
pub async fn open_table_with_config(
    table_path: impl AsRef<std::path::Path>,
    config: TableLogConfig,
) -> TableLogResult<Arc<TransactionLog>> {
    let log = TransactionLog::for_table_with_config(table_path, config)?;
    log.update().await?;
    Ok(log)
}

/// Returns the version of the crate.
pub fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
