//! Event Log
//!
//! Append-only, per-stream ordered log that carries mutation events from the
//! producer to the appliers. Each stream has its own monotonically increasing
//! offsets starting at 1; consumers track progress with a committed cursor per
//! consumer group and resume after it on restart.

mod error;
mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::Stream;

pub use error::EventLogError;
pub use memory::MemoryEventLog;
pub use postgres::PgEventLog;

/// A record as stored in the log
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub stream: Stream,
    pub offset: i64,
    /// Partition key (owning account id)
    pub key: String,
    pub payload: Vec<u8>,
    pub appended_at: DateTime<Utc>,
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a record and return its offset. Returns only once the record is
    /// durably committed by the log.
    async fn append(&self, stream: Stream, key: &str, payload: &[u8])
        -> Result<i64, EventLogError>;

    /// Next record after the group's committed cursor, if any.
    ///
    /// Fetching does not move the cursor: until [`EventLog::commit`] is called
    /// the same record is returned again.
    async fn fetch(&self, stream: Stream, group: &str)
        -> Result<Option<LogRecord>, EventLogError>;

    /// Advance the group's cursor to `offset`. Never moves a cursor backwards.
    async fn commit(&self, stream: Stream, group: &str, offset: i64)
        -> Result<(), EventLogError>;
}
