//! Configuration of a log handle.

use crate::errors::{TableLogError, TableLogResult};
use crate::protocol::DEFAULT_CHECKPOINT_INTERVAL;

/// Options for a [`TransactionLog`](crate::table::TransactionLog) handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLogConfig {
    /// Number of versions between checkpoints. Version 0 always checkpoints.
    pub checkpoint_interval: i64,
    /// Number of commit files read concurrently during replay.
    pub log_buffer_size: usize,
}

impl Default for TableLogConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            log_buffer_size: 32,
        }
    }
}

impl TableLogConfig {
    /// Set the number of versions between checkpoints.
    pub fn with_checkpoint_interval(mut self, interval: i64) -> TableLogResult<Self> {
        if interval <= 0 {
            return Err(TableLogError::InvalidArgument(format!(
                "checkpoint interval must be positive, got {interval}"
            )));
        }
        self.checkpoint_interval = interval;
        Ok(self)
    }

    /// Set the number of commit files read concurrently during replay.
    pub fn with_log_buffer_size(mut self, log_buffer_size: usize) -> TableLogResult<Self> {
        if log_buffer_size == 0 {
            return Err(TableLogError::InvalidArgument(
                "log buffer size must be positive".to_string(),
            ));
        }
        self.log_buffer_size = log_buffer_size;
        Ok(self)
    }
}
