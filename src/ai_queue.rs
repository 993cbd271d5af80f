//! Producer for the AI investigation queue.
//!
//! Gray-area cases are handed to the external AI investigator over a second
//! durable stream. Each escalation carries the case id, the user id and the
//! re-serialized event so the investigator needs no further lookups.

use crate::config::AppConfig;
use crate::error::{Result, TriageError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Mutex;
use tracing::debug;

/// One escalation handed to the AI investigator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationRecord {
    pub case_id: String,
    pub user_id: String,
    /// JSON encoding of the original transaction event.
    pub event_data: String,
}

/// Sink for escalation records.
#[async_trait]
pub trait AiQueue: Send + Sync {
    async fn enqueue(&self, record: &EscalationRecord) -> Result<()>;
}

/// Redis Streams producer writing to the investigation queue.
pub struct RedisAiQueue {
    conn: ConnectionManager,
    stream: String,
}

impl RedisAiQueue {
    pub fn new(conn: ConnectionManager, config: &AppConfig) -> Self {
        Self {
            conn,
            stream: config.streams.ai_queue_stream.clone(),
        }
    }

    /// Get the stream name.
    pub fn stream(&self) -> &str {
        &self.stream
    }
}

#[async_trait]
impl AiQueue for RedisAiQueue {
    async fn enqueue(&self, record: &EscalationRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        let fields = [
            ("case_id", record.case_id.as_str()),
            ("user_id", record.user_id.as_str()),
            ("event_data", record.event_data.as_str()),
        ];

        let id: String = conn
            .xadd(&self.stream, "*", &fields)
            .await
            .map_err(|e| TriageError::StreamUnavailable(format!("ai enqueue: {e}")))?;

        debug!(
            case_id = %record.case_id,
            user_id = %record.user_id,
            record_id = %id,
            "queued case for AI investigation"
        );

        Ok(())
    }
}

/// In-memory queue used by tests; optionally fails every enqueue to exercise
/// the pipeline's backpressure path.
#[derive(Default)]
pub struct MemoryAiQueue {
    records: Mutex<Vec<EscalationRecord>>,
    fail: Mutex<bool>,
}

impl MemoryAiQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent enqueues fail with `StreamUnavailable`.
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(|p| p.into_inner()) = fail;
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<EscalationRecord> {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl AiQueue for MemoryAiQueue {
    async fn enqueue(&self, record: &EscalationRecord) -> Result<()> {
        if *self.fail.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(TriageError::StreamUnavailable(
                "ai queue unreachable".to_string(),
            ));
        }
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(record.clone());
        Ok(())
    }
}
