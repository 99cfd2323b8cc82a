//! Implementation for writing and reading log checkpoints.
//!
//! A checkpoint is a single parquet file holding the full action list of a
//! snapshot, so that recovery can skip replaying every commit from version
//! zero. The engine does not speak every action's columnar schema: each row
//! is an `ActionRecord { actionType, actionJson }` envelope carrying the
//! canonical textual serialization inside the binary container.
use std::sync::Arc;

use arrow_array::{RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field as ParquetField;
use tracing::debug;

use super::{CheckPoint, ProtocolError, LAST_CHECKPOINT_FILE_NAME};
use crate::errors::{TableLogError, TableLogResult};
use crate::kernel::Action;
use crate::logstore::{checkpoint_uri_from_version, LogStore};
use crate::table::state::Snapshot;
use crate::table::TransactionLog;

/// Default number of versions between checkpoints
pub const DEFAULT_CHECKPOINT_INTERVAL: i64 = 10;

/// Whether committing `version` should trigger a checkpoint.
///
/// Version 0 always checkpoints, after that every `interval` versions.
pub fn should_checkpoint(version: i64, interval: i64) -> bool {
    version >= 0 && (version == 0 || version % interval == 0)
}

/// Creates a checkpoint at the current version of the given log.
pub async fn create_checkpoint(log: &Arc<TransactionLog>) -> TableLogResult<i64> {
    let snapshot = log.update().await?;
    log.checkpoint(&snapshot).await
}

/// Creates a checkpoint for the given snapshot and writes the
/// `_last_checkpoint` pointer.
///
/// Any pre-existing checkpoint at the same version is overwritten. Returns
/// the version checkpointed. Callers serialize invocations under the log's
/// lock.
pub async fn create_checkpoint_for(
    state: &Snapshot,
    log_store: &dyn LogStore,
) -> TableLogResult<i64> {
    let version = state.version();
    if version < 0 {
        return Err(TableLogError::InvalidVersion(version));
    }

    debug!("writing checkpoint for version {version}");
    let (checkpoint, parquet_bytes) = parquet_bytes_from_actions(version, state.actions())?;

    let checkpoint_path = checkpoint_uri_from_version(version);
    let object_store = log_store.object_store();
    object_store
        .put(&checkpoint_path, parquet_bytes.into())
        .await?;

    let last_checkpoint_path = log_store.log_path().child(LAST_CHECKPOINT_FILE_NAME);
    let last_checkpoint_content =
        serde_json::to_vec(&checkpoint).map_err(|err| ProtocolError::Generic(err.to_string()))?;
    debug!("writing {LAST_CHECKPOINT_FILE_NAME} for version {version}");
    object_store
        .put(&last_checkpoint_path, Bytes::from(last_checkpoint_content).into())
        .await?;

    Ok(version)
}

/// Serialize the action list into the checkpoint parquet envelope.
fn parquet_bytes_from_actions(
    version: i64,
    actions: &[Action],
) -> Result<(CheckPoint, Bytes), ProtocolError> {
    let mut action_types = Vec::with_capacity(actions.len());
    let mut action_jsons = Vec::with_capacity(actions.len());
    for action in actions {
        action_types.push(action.action_type());
        action_jsons
            .push(serde_json::to_string(action).map_err(|e| ProtocolError::Generic(e.to_string()))?);
    }

    let schema = Arc::new(Schema::new(vec![
        Field::new("actionType", DataType::Utf8, false),
        Field::new("actionJson", DataType::Utf8, false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(action_types)),
            Arc::new(StringArray::from(action_jsons)),
        ],
    )
    .map_err(|err| ProtocolError::Generic(err.to_string()))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut bytes = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut bytes, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    let checkpoint = CheckPoint::new(version, actions.len() as i64, None);
    Ok((checkpoint, Bytes::from(bytes)))
}

/// Parse the actions stored in a checkpoint file.
///
/// Rows preserve the order of the snapshot's action list. The `actionType`
/// column is informational only; each action is recovered from its
/// self-describing `actionJson` payload.
pub fn read_checkpoint(data: Bytes) -> Result<Vec<Action>, ProtocolError> {
    let reader = SerializedFileReader::new(data)?;
    let mut actions = Vec::new();
    for record in reader.get_row_iter(None)? {
        let record = record?;
        let mut action_json = None;
        for (name, field) in record.get_column_iter() {
            if name.as_str() == "actionJson" {
                if let ParquetField::Str(json) = field {
                    action_json = Some(json.clone());
                }
            }
        }
        let json = action_json.ok_or_else(|| ProtocolError::CorruptCheckpoint {
            msg: "checkpoint row is missing actionJson".to_string(),
        })?;
        let action =
            serde_json::from_str(&json).map_err(|err| ProtocolError::CorruptCheckpoint {
                msg: format!("invalid action in checkpoint: {err}"),
            })?;
        actions.push(action);
    }
    Ok(actions)
}

/// Read the actions of the checkpoint written at the given version.
pub(crate) async fn read_checkpoint_at(
    log_store: &dyn LogStore,
    version: i64,
) -> TableLogResult<Vec<Action>> {
    let path = checkpoint_uri_from_version(version);
    let data = log_store.object_store().get(&path).await?.bytes().await?;
    Ok(read_checkpoint(data)?)
}
