use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::TableLogError;

/// The actions a commit file may contain.
///
/// Every serialized action is a self-describing JSON object carrying a `type`
/// discriminant alongside its fields, e.g.
/// `{"type":"add","path":"data/part-1.csv",...}`. Deserialization ignores
/// unknown fields; an unknown `type` fails the parse.
#[derive(Debug, PartialEq, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    /// Reader/writer version requirements for the table
    Protocol(Protocol),
    /// Table-level metadata
    Metadata(Metadata),
    /// A data file joining the table
    Add(Add),
    /// A data file leaving the table
    Remove(Remove),
    /// Provenance information, never affects state
    CommitInfo(CommitInfo),
}

impl Action {
    /// The serialized discriminant of this action.
    pub fn action_type(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Metadata(_) => "metadata",
            Self::Add(_) => "add",
            Self::Remove(_) => "remove",
            Self::CommitInfo(_) => "commitInfo",
        }
    }
}

/// Defines a protocol action
///
/// Declares the minimum reader and writer versions a client must implement to
/// access the table correctly.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Protocol {
    /// The minimum version of the read protocol that a client must implement
    /// in order to correctly read this table
    pub min_reader_version: i32,
    /// The minimum version of the write protocol that a client must implement
    /// in order to correctly write this table
    pub min_writer_version: i32,
    /// Features a client must implement to correctly read this table
    pub reader_features: Vec<String>,
    /// Features a client must implement to correctly write this table
    pub writer_features: Vec<String>,
}

impl Protocol {
    /// Create a new protocol action
    pub fn new(min_reader_version: i32, min_writer_version: i32) -> Self {
        Self {
            min_reader_version,
            min_writer_version,
            reader_features: Vec::new(),
            writer_features: Vec::new(),
        }
    }

    /// set the reader features in the protocol action
    pub fn with_reader_features(
        mut self,
        reader_features: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.reader_features = reader_features.into_iter().map(|f| f.into()).collect();
        self
    }

    /// set the writer features in the protocol action
    pub fn with_writer_features(
        mut self,
        writer_features: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.writer_features = writer_features.into_iter().map(|f| f.into()).collect();
        self
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// Defines a metadata action
///
/// The last metadata action in replay order describes the current table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Metadata {
    /// Unique identifier for this table
    pub id: String,
    /// User-provided identifier for this table
    pub name: String,
    /// User-provided description for this table
    pub description: String,
    /// Name of the encoding for data files in this table
    pub format: String,
    /// Configuration options for the table
    pub configuration: HashMap<String, String>,
    /// Columns by which the data should be partitioned
    pub partition_columns: HashMap<String, String>,
    /// The time when this metadata action was created, in milliseconds since the Unix epoch
    pub created_time: i64,
}

impl Metadata {
    /// Create a new metadata action
    pub fn new(id: impl Into<String>, name: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            format: format.into(),
            created_time: chrono::Utc::now().timestamp_millis(),
            ..Default::default()
        }
    }

    /// set the table description in the metadata action
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// set a configuration key in the metadata action
    pub fn with_config_key(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }
}

/// Defines an add action
///
/// Adds a data file to the table, or replaces the file already registered
/// under the same path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Add {
    /// A relative path to a data file from the root of the table
    pub path: String,

    /// A map from partition column to value for this logical file
    pub partition_values: HashMap<String, String>,

    /// The size of this data file in bytes
    pub size: i64,

    /// The time this logical file was created, as milliseconds since the epoch
    pub modification_time: i64,

    /// When `false` the logical file must already be present in the table or
    /// the records in the added file must be contained in one or more remove
    /// actions in the same version
    pub data_change: bool,

    /// Statistics (e.g. count, min/max values for columns) about the data in this file
    pub stats: HashMap<String, String>,

    /// Metadata about this logical file
    pub tags: String,
}

impl Add {
    /// Create a new add action for the given relative path
    pub fn new(path: impl Into<String>, size: i64, modification_time: i64) -> Self {
        Self {
            path: path.into(),
            size,
            modification_time,
            ..Default::default()
        }
    }

    /// set the partition values of the add action
    pub fn with_partition_values(
        mut self,
        partition_values: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.partition_values = partition_values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }
}

impl Default for Add {
    fn default() -> Self {
        Self {
            path: String::new(),
            partition_values: HashMap::new(),
            size: 0,
            modification_time: 0,
            data_change: true,
            stats: HashMap::new(),
            tags: String::new(),
        }
    }
}

/// Defines a remove action
///
/// Removes the data file registered under `path` from the live set. Removing
/// a path that is not live is a no-op during replay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Remove {
    /// A relative path to a data file from the root of the table
    pub path: String,

    /// The time this logical file was removed, as milliseconds since the epoch
    pub deletion_timestamp: i64,

    /// When `false` the records in the removed file are contained in one or
    /// more add actions in the same version
    pub data_change: bool,

    /// A map from partition column to value for this logical file
    pub partition_values: HashMap<String, String>,

    /// The size of this data file in bytes
    pub size: i64,
}

impl Remove {
    /// Create a new remove action for the given relative path
    pub fn new(path: impl Into<String>, deletion_timestamp: i64) -> Self {
        Self {
            path: path.into(),
            deletion_timestamp,
            data_change: true,
            ..Default::default()
        }
    }
}

/// Defines a commit info action
///
/// Carries provenance for a commit. Replay skips it; it never affects the
/// live file set, protocol, or metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CommitInfo {
    /// Version recorded by the committing writer
    pub version: String,

    /// Timestamp in millis when the commit was created
    pub timestamp: i64,

    /// The operation performed during the commit
    pub operation: String,

    /// Parameters used for the table operation
    pub operation_parameters: HashMap<String, String>,

    /// Version the commit was written at
    pub commit_version: String,
}

impl CommitInfo {
    /// Create commit info for the named operation, stamped with the current time
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            ..Default::default()
        }
    }

    /// set an operation parameter on the commit info
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.operation_parameters.insert(key.into(), value.into());
        self
    }
}

/// The isolation level applied during an optimistic transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// The strongest isolation level. It ensures that committed write
    /// operations and all reads are serializable: a concurrently added file
    /// conflicts with any transaction that declared it read that file.
    Serializable,

    /// A weaker isolation level that ensures only the write operations are
    /// serializable. Concurrently added files never conflict on their own;
    /// concurrently removed files still do.
    WriteSerializable,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        Self::Serializable
    }
}

impl AsRef<str> for IsolationLevel {
    fn as_ref(&self) -> &str {
        match self {
            Self::Serializable => "Serializable",
            Self::WriteSerializable => "WriteSerializable",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl FromStr for IsolationLevel {
    type Err = TableLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "serializable" => Ok(Self::Serializable),
            "writeserializable" | "write_serializable" => Ok(Self::WriteSerializable),
            _ => Err(TableLogError::Generic(
                "Invalid string for IsolationLevel".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn roundtrip(action: &Action) -> Action {
        let json = serde_json::to_string(action).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_action_roundtrip_all_variants() {
        let actions = vec![
            Action::Protocol(Protocol::new(1, 2).with_writer_features(["appendOnly"])),
            Action::Metadata(
                Metadata::new("id-1", "Test Table", "csv")
                    .with_description("a table")
                    .with_config_key("retention", "7d"),
            ),
            Action::Add(
                Add::new("data/part-1.csv", 1024, 1700000000000)
                    .with_partition_values([("date", "2024-01-01")]),
            ),
            Action::Remove(Remove::new("data/part-1.csv", 1700000001000)),
            Action::CommitInfo(CommitInfo::new("WRITE").with_parameter("mode", "append")),
        ];
        for action in actions {
            assert_eq!(roundtrip(&action), action);
        }
    }

    #[test]
    fn test_action_roundtrip_defaults() {
        let actions = vec![
            Action::Protocol(Protocol::default()),
            Action::Metadata(Metadata::default()),
            Action::Add(Add::default()),
            Action::Remove(Remove::default()),
            Action::CommitInfo(CommitInfo::default()),
        ];
        for action in actions {
            assert_eq!(roundtrip(&action), action);
        }
    }

    #[test]
    fn test_action_discriminants() {
        let raw = serde_json::to_value(Action::Add(Add::new("data/f.csv", 1, 2))).unwrap();
        assert_eq!(raw["type"], "add");
        let raw = serde_json::to_value(Action::CommitInfo(CommitInfo::new("WRITE"))).unwrap();
        assert_eq!(raw["type"], "commitInfo");
        let raw = serde_json::to_value(Action::Metadata(Metadata::default())).unwrap();
        assert_eq!(raw["type"], "metadata");
        let raw = serde_json::to_value(Action::Protocol(Protocol::default())).unwrap();
        assert_eq!(raw["type"], "protocol");
        let raw = serde_json::to_value(Action::Remove(Remove::default())).unwrap();
        assert_eq!(raw["type"], "remove");
    }

    #[test]
    fn test_unknown_discriminant_fails() {
        let res: Result<Action, _> = serde_json::from_str(r#"{"type":"vacuum","path":"x"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let action: Action = serde_json::from_str(
            r#"{"type":"add","path":"data/f.csv","size":10,"futureField":{"nested":true}}"#,
        )
        .unwrap();
        match action {
            Action::Add(add) => {
                assert_eq!(add.path, "data/f.csv");
                assert_eq!(add.size, 10);
                // missing fields fall back to defaults
                assert!(add.data_change);
                assert_eq!(add.modification_time, 0);
            }
            other => panic!("expected add action, got {other:?}"),
        }
    }

    #[test]
    fn test_protocol_default_versions() {
        let protocol = Protocol::default();
        assert_eq!(protocol.min_reader_version, 1);
        assert_eq!(protocol.min_writer_version, 1);
        assert!(protocol.reader_features.is_empty());
        assert!(protocol.writer_features.is_empty());
    }

    #[test]
    fn test_isolation_level_roundtrip() {
        for level in [IsolationLevel::Serializable, IsolationLevel::WriteSerializable] {
            assert_eq!(level, level.as_ref().parse().unwrap());
        }
        assert!("snapshot".parse::<IsolationLevel>().is_err());
        assert_eq!(IsolationLevel::default(), IsolationLevel::Serializable);
    }
}
