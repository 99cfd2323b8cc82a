//! The materialized state of a table at a given version.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::kernel::{Action, Add, CommitInfo, Metadata, Protocol};
use crate::table::TransactionLog;

/// State snapshot of a table at a specific version.
///
/// Built by a single deterministic pass over an ordered action list: adds
/// register a live file under their path, removes drop the path, the last
/// metadata and protocol actions win, and commit infos are collected without
/// affecting state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Back-reference to the log this snapshot was read from. Never owning,
    /// so a cached snapshot cannot keep its log alive.
    log: Weak<TransactionLog>,
    /// Table version represented by this snapshot, `-1` for a table that
    /// does not exist yet.
    version: i64,
    /// The actions that were replayed into this snapshot.
    actions: Vec<Action>,
    /// The last protocol action in replay order.
    protocol: Option<Protocol>,
    /// The last metadata action in replay order.
    metadata: Option<Metadata>,
    /// Live files keyed by path.
    files: HashMap<String, Add>,
    /// Provenance records collected during replay.
    commit_infos: Vec<CommitInfo>,
}

impl Snapshot {
    /// Replay the given action list into a snapshot at `version`.
    pub(crate) fn new(log: Weak<TransactionLog>, version: i64, actions: Vec<Action>) -> Self {
        let mut snapshot = Self {
            log,
            version,
            actions: Vec::new(),
            protocol: None,
            metadata: None,
            files: HashMap::new(),
            commit_infos: Vec::new(),
        };
        for action in &actions {
            snapshot.process_action(action);
        }
        snapshot.actions = actions;
        snapshot
    }

    /// An empty snapshot for a table that has no commits yet.
    pub(crate) fn empty(log: Weak<TransactionLog>) -> Self {
        Self::new(log, -1, Vec::new())
    }

    /// Apply a single action to the materialized state.
    fn process_action(&mut self, action: &Action) {
        match action {
            Action::Add(add) => {
                self.files.insert(add.path.clone(), add.clone());
            }
            Action::Remove(remove) => {
                self.files.remove(&remove.path);
            }
            Action::Protocol(protocol) => {
                self.protocol = Some(protocol.clone());
            }
            Action::Metadata(metadata) => {
                self.metadata = Some(metadata.clone());
            }
            Action::CommitInfo(commit_info) => {
                self.commit_infos.push(commit_info.clone());
            }
        }
    }

    /// Table version represented by this snapshot.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// The actions that were replayed into this snapshot.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// The most recent protocol of the table, if any was committed.
    pub fn protocol(&self) -> Option<&Protocol> {
        self.protocol.as_ref()
    }

    /// The most recent metadata of the table, if any was committed.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Provenance records collected during replay, oldest first.
    pub fn commit_infos(&self) -> &[CommitInfo] {
        &self.commit_infos
    }

    /// All live files of the table. Iteration order is not guaranteed.
    pub fn all_files(&self) -> impl Iterator<Item = &Add> {
        self.files.values()
    }

    /// Live files whose path matches the given predicate.
    ///
    /// An empty or absent predicate returns every live file. The match is a
    /// plain substring test against the path, a placeholder for a richer
    /// predicate language.
    pub fn files(&self, predicate: Option<&str>) -> Vec<&Add> {
        match predicate {
            None | Some("") => self.all_files().collect(),
            Some(predicate) => self
                .all_files()
                .filter(|add| add.path.contains(predicate))
                .collect(),
        }
    }

    /// The live file registered under the given path, if any.
    pub fn file(&self, path: &str) -> Option<&Add> {
        self.files.get(path)
    }

    /// The log this snapshot was read from, if it is still alive.
    pub fn log(&self) -> Option<Arc<TransactionLog>> {
        self.log.upgrade()
    }
}
