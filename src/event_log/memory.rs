//! In-memory event log

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;

use crate::domain::Stream;

use super::{EventLog, EventLogError, LogRecord};

#[derive(Debug, Default)]
struct LogState {
    records: HashMap<Stream, Vec<LogRecord>>,
    cursors: HashMap<(Stream, String), i64>,
}

/// Event log kept in process memory, with append-failure injection
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    state: Mutex<LogState>,
    failing_appends: AtomicU32,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` appends fail with [`EventLogError::Unavailable`]
    pub fn fail_next_appends(&self, count: u32) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    /// All records of a stream in offset order
    pub async fn records(&self, stream: Stream) -> Vec<LogRecord> {
        self.state
            .lock()
            .await
            .records
            .get(&stream)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn committed_offset(&self, stream: Stream, group: &str) -> i64 {
        self.state
            .lock()
            .await
            .cursors
            .get(&(stream, group.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Number of records appended to a stream
    pub async fn len(&self, stream: Stream) -> usize {
        self.state
            .lock()
            .await
            .records
            .get(&stream)
            .map_or(0, Vec::len)
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.records.values().all(Vec::is_empty)
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(
        &self,
        stream: Stream,
        key: &str,
        payload: &[u8],
    ) -> Result<i64, EventLogError> {
        if self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EventLogError::Unavailable("broker did not acknowledge".into()));
        }

        let mut state = self.state.lock().await;
        let records = state.records.entry(stream).or_default();
        let offset = records.len() as i64 + 1;
        records.push(LogRecord {
            stream,
            offset,
            key: key.to_string(),
            payload: payload.to_vec(),
            appended_at: Utc::now(),
        });

        Ok(offset)
    }

    async fn fetch(
        &self,
        stream: Stream,
        group: &str,
    ) -> Result<Option<LogRecord>, EventLogError> {
        let state = self.state.lock().await;
        let committed = state
            .cursors
            .get(&(stream, group.to_string()))
            .copied()
            .unwrap_or(0);

        Ok(state
            .records
            .get(&stream)
            .and_then(|records| records.iter().find(|r| r.offset > committed))
            .cloned())
    }

    async fn commit(&self, stream: Stream, group: &str, offset: i64) -> Result<(), EventLogError> {
        let mut state = self.state.lock().await;
        let cursor = state.cursors.entry((stream, group.to_string())).or_insert(0);
        *cursor = (*cursor).max(offset);
        Ok(())
    }
}
