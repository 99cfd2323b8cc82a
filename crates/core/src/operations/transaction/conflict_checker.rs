//! Helper module to check if a transaction can be committed in case of
//! conflicting commits.
use std::collections::{HashMap, HashSet};

use crate::kernel::{Action, Add, IsolationLevel, Metadata, Remove};

/// Exceptions raised during commit conflict resolution
#[derive(thiserror::Error, Debug)]
pub enum CommitConflictError {
    /// This exception occurs when a concurrent operation added a file this
    /// transaction declared it read. Under WriteSerializable a plain append
    /// never conflicts.
    #[error("Commit failed: a concurrent transaction added a file read by this transaction: {path}.\nHelp: This transaction's query must be rerun to include the new data. If stale reads are acceptable, the isolation level can be set to WriteSerializable.")]
    ConcurrentAppend {
        /// Path of the file the winning commit added
        path: String,
    },

    /// This exception occurs when a concurrent operation removed a file this
    /// transaction declared it read.
    #[error("Commit failed: a concurrent transaction removed a file read by this transaction: {path}.\nHelp: This transaction's query must be rerun to exclude the removed data.")]
    ConcurrentDeleteRead {
        /// Path of the file the winning commit removed
        path: String,
    },

    /// This exception occurs when a concurrent transaction updated table
    /// metadata this transaction both read and is about to write.
    #[error("Commit failed: a concurrent transaction changed metadata read by this transaction: {key}.")]
    MetadataChanged {
        /// The metadata key both transactions touched
        key: String,
    },
}

/// Attributes of the current transaction needed for conflict detection.
pub(crate) struct TransactionInfo<'a> {
    /// predicates the transaction declared it read, of the form
    /// `file:<path>` or `metadata:<key>`
    read_predicates: &'a HashSet<String>,
    /// metadata updates the transaction stages
    new_metadata: &'a HashMap<String, String>,
}

impl<'a> TransactionInfo<'a> {
    pub fn new(
        read_predicates: &'a HashSet<String>,
        new_metadata: &'a HashMap<String, String>,
    ) -> Self {
        Self {
            read_predicates,
            new_metadata,
        }
    }

    fn reads_file(&self, path: &str) -> bool {
        self.read_predicates.contains(&format!("file:{path}"))
    }

    fn read_metadata_keys(&self) -> impl Iterator<Item = &str> {
        self.read_predicates
            .iter()
            .filter_map(|predicate| predicate.strip_prefix("metadata:"))
    }

    fn writes_metadata_key(&self, key: &str) -> bool {
        self.new_metadata.contains_key(key)
    }
}

/// Summary of the winning commits against which the conflict is checked.
#[derive(Debug)]
pub(crate) struct WinningCommitSummary {
    actions: Vec<Action>,
}

impl WinningCommitSummary {
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    pub fn added_files(&self) -> impl Iterator<Item = &Add> {
        self.actions.iter().filter_map(|action| match action {
            Action::Add(add) => Some(add),
            _ => None,
        })
    }

    pub fn removed_files(&self) -> impl Iterator<Item = &Remove> {
        self.actions.iter().filter_map(|action| match action {
            Action::Remove(remove) => Some(remove),
            _ => None,
        })
    }

    pub fn metadata_updates(&self) -> impl Iterator<Item = &Metadata> {
        self.actions.iter().filter_map(|action| match action {
            Action::Metadata(metadata) => Some(metadata),
            _ => None,
        })
    }
}

/// Checks whether a transaction may still commit after conflicting winning
/// commits landed between its read version and the current version.
pub(crate) struct ConflictChecker<'a> {
    /// transaction information for the current transaction at start of check
    txn_info: &'a TransactionInfo<'a>,
    /// summary of the commits that landed ahead of the current transaction
    winning_commit_summary: WinningCommitSummary,
    /// isolation level for the current transaction
    isolation_level: IsolationLevel,
}

impl<'a> ConflictChecker<'a> {
    pub fn new(
        txn_info: &'a TransactionInfo<'a>,
        winning_commit_summary: WinningCommitSummary,
        isolation_level: IsolationLevel,
    ) -> Self {
        Self {
            txn_info,
            winning_commit_summary,
            isolation_level,
        }
    }

    pub fn check_conflicts(&self) -> Result<(), CommitConflictError> {
        self.check_for_added_files_read_by_current_txn()?;
        self.check_for_removed_files_read_by_current_txn()?;
        self.check_for_metadata_updates_read_by_current_txn()?;
        Ok(())
    }

    /// Fail if files have been added that the transaction declared it read.
    /// Only Serializable treats a concurrent append as invalidating reads.
    fn check_for_added_files_read_by_current_txn(&self) -> Result<(), CommitConflictError> {
        if self.isolation_level != IsolationLevel::Serializable {
            return Ok(());
        }
        for added in self.winning_commit_summary.added_files() {
            if self.txn_info.reads_file(&added.path) {
                return Err(CommitConflictError::ConcurrentAppend {
                    path: added.path.clone(),
                });
            }
        }
        Ok(())
    }

    /// Fail if files have been removed that the transaction declared it
    /// read, regardless of isolation level.
    fn check_for_removed_files_read_by_current_txn(&self) -> Result<(), CommitConflictError> {
        for removed in self.winning_commit_summary.removed_files() {
            if self.txn_info.reads_file(&removed.path) {
                return Err(CommitConflictError::ConcurrentDeleteRead {
                    path: removed.path.clone(),
                });
            }
        }
        Ok(())
    }

    /// Fail if the table metadata changed while this transaction both read
    /// and stages an update for one of the touched keys.
    fn check_for_metadata_updates_read_by_current_txn(&self) -> Result<(), CommitConflictError> {
        if self.winning_commit_summary.metadata_updates().next().is_none() {
            return Ok(());
        }
        for key in self.txn_info.read_metadata_keys() {
            if self.txn_info.writes_metadata_key(key) {
                return Err(CommitConflictError::MetadataChanged {
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }
}
