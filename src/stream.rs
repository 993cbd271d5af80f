//! Event source adapter: consumer-group reads over the inbound stream.
//!
//! The Redis implementation reads the consumer's own pending entries first
//! (redeliveries of records that were never acked), then fills the batch with
//! new records. Delivery counts drive the poison-pill policy upstream.

use crate::config::AppConfig;
use crate::error::{Result, TriageError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// One record pulled from the stream.
#[derive(Debug, Clone)]
pub struct StreamRecord {
    /// Strictly increasing opaque id, time-ordered within the stream.
    pub id: String,
    /// Flat string fields; events arrive under `event_data`.
    pub fields: HashMap<String, String>,
    /// How many times this consumer has been handed the record.
    pub delivery_count: u64,
}

impl StreamRecord {
    /// The JSON-encoded event payload, when present.
    pub fn event_data(&self) -> Option<&str> {
        self.fields.get("event_data").map(String::as_str)
    }
}

/// Pull-style source with consumer-group semantics.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Create the consumer group at the latest offset. Idempotent: a
    /// group-already-exists reply is swallowed.
    async fn ensure_group(&self) -> Result<()>;

    /// Read up to `max` records for this consumer, pending redeliveries
    /// first. An empty stream yields an empty batch, not an error.
    async fn read_batch(&self, max: usize) -> Result<Vec<StreamRecord>>;

    /// Acknowledge a record, removing it from the pending list.
    async fn ack(&self, record_id: &str) -> Result<()>;
}

/// Redis Streams implementation.
pub struct RedisEventSource {
    conn: ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
    block_ms: u64,
    /// Local redelivery counts, seeded from XPENDING. Kept here because
    /// re-reading one's own history does not bump the server-side counter.
    deliveries: Mutex<HashMap<String, u64>>,
}

impl RedisEventSource {
    /// Connect to Redis and bind to the configured stream/group/consumer.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let client = redis::Client::open(config.redis.url.as_str())
            .map_err(|e| TriageError::StreamUnavailable(format!("redis client: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| TriageError::StreamUnavailable(format!("redis connect: {e}")))?;

        info!(url = %config.redis.url, stream = %config.streams.transaction_stream, "connected to redis");

        Ok(Self {
            conn,
            stream: config.streams.transaction_stream.clone(),
            group: config.streams.consumer_group.clone(),
            consumer: config.streams.consumer_name.clone(),
            block_ms: config.pipeline.read_block_ms,
            deliveries: Mutex::new(HashMap::new()),
        })
    }

    fn records_from_reply(reply: StreamReadReply) -> Vec<(String, HashMap<String, String>)> {
        let mut records = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let fields = entry
                    .map
                    .iter()
                    .filter_map(|(field, value)| {
                        redis::from_redis_value::<String>(value)
                            .ok()
                            .map(|v| (field.clone(), v))
                    })
                    .collect();
                records.push((entry.id, fields));
            }
        }
        records
    }

    fn bump_delivery(&self, record_id: &str, server_count: Option<u64>) -> u64 {
        let mut deliveries = match self.deliveries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let count = deliveries.entry(record_id.to_string()).or_insert(0);
        *count += 1;
        if let Some(server) = server_count {
            *count = (*count).max(server);
        }
        *count
    }

    fn forget_delivery(&self, record_id: &str) {
        let mut deliveries = match self.deliveries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        deliveries.remove(record_id);
    }
}

#[async_trait]
impl EventSource for RedisEventSource {
    async fn ensure_group(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: std::result::Result<String, redis::RedisError> = conn
            .xgroup_create_mkstream(&self.stream, &self.group, "$")
            .await;

        match created {
            Ok(_) => {
                info!(stream = %self.stream, group = %self.group, "consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(group = %self.group, "consumer group already exists");
                Ok(())
            }
            Err(e) => Err(TriageError::StreamUnavailable(format!(
                "group create failed: {e}"
            ))),
        }
    }

    async fn read_batch(&self, max: usize) -> Result<Vec<StreamRecord>> {
        let mut conn = self.conn.clone();
        let mut records = Vec::new();

        // Our own pending entries first: these are redeliveries.
        let pending_opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(max);
        let pending: StreamReadReply = conn
            .xread_options(&[&self.stream], &["0"], &pending_opts)
            .await
            .map_err(|e| TriageError::StreamUnavailable(format!("pending read: {e}")))?;

        let pending = Self::records_from_reply(pending);
        let server_counts: HashMap<String, u64> = if pending.is_empty() {
            HashMap::new()
        } else {
            let reply: redis::streams::StreamPendingCountReply = conn
                .xpending_consumer_count(
                    &self.stream,
                    &self.group,
                    "-",
                    "+",
                    pending.len(),
                    &self.consumer,
                )
                .await
                .map_err(|e| TriageError::StreamUnavailable(format!("xpending: {e}")))?;
            reply
                .ids
                .into_iter()
                .map(|entry| (entry.id, entry.times_delivered as u64))
                .collect()
        };

        for (id, fields) in pending {
            let delivery_count = self.bump_delivery(&id, server_counts.get(&id).copied());
            records.push(StreamRecord {
                id,
                fields,
                delivery_count,
            });
        }

        // Fill the remainder with new records.
        if records.len() < max {
            let new_opts = StreamReadOptions::default()
                .group(&self.group, &self.consumer)
                .count(max - records.len())
                .block(self.block_ms as usize);
            let fresh: StreamReadReply = conn
                .xread_options(&[&self.stream], &[">"], &new_opts)
                .await
                .map_err(|e| TriageError::StreamUnavailable(format!("stream read: {e}")))?;

            for (id, fields) in Self::records_from_reply(fresh) {
                let delivery_count = self.bump_delivery(&id, None);
                records.push(StreamRecord {
                    id,
                    fields,
                    delivery_count,
                });
            }
        }

        Ok(records)
    }

    async fn ack(&self, record_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let acked: i64 = conn
            .xack(&self.stream, &self.group, &[record_id])
            .await
            .map_err(|e| TriageError::StreamUnavailable(format!("ack: {e}")))?;

        if acked == 0 {
            warn!(record_id, "ack matched no pending record");
        }
        self.forget_delivery(record_id);
        Ok(())
    }
}

/// In-memory source mirroring the consumer-group contract for one consumer.
/// Unacked records are redelivered on the next read with a bumped count.
#[derive(Default)]
pub struct MemoryEventSource {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    next_seq: u64,
    fresh: VecDeque<(String, HashMap<String, String>)>,
    pending: Vec<PendingRecord>,
}

struct PendingRecord {
    id: String,
    fields: HashMap<String, String>,
    delivery_count: u64,
}

impl MemoryEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record with arbitrary fields; returns its id.
    pub fn push(&self, fields: HashMap<String, String>) -> String {
        let mut inner = self.lock();
        inner.next_seq += 1;
        let id = format!("{}-0", inner.next_seq);
        inner.fresh.push_back((id.clone(), fields));
        id
    }

    /// Append a record carrying `event_data`.
    pub fn push_event_data(&self, event_json: impl Into<String>) -> String {
        let mut fields = HashMap::new();
        fields.insert("event_data".to_string(), event_json.into());
        self.push(fields)
    }

    /// Number of records delivered but not yet acked.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Number of records not yet delivered.
    pub fn fresh_len(&self) -> usize {
        self.lock().fresh.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn ensure_group(&self) -> Result<()> {
        Ok(())
    }

    async fn read_batch(&self, max: usize) -> Result<Vec<StreamRecord>> {
        let mut inner = self.lock();
        let mut records = Vec::new();

        for pending in inner.pending.iter_mut() {
            if records.len() >= max {
                break;
            }
            pending.delivery_count += 1;
            records.push(StreamRecord {
                id: pending.id.clone(),
                fields: pending.fields.clone(),
                delivery_count: pending.delivery_count,
            });
        }

        while records.len() < max {
            let Some((id, fields)) = inner.fresh.pop_front() else {
                break;
            };
            inner.pending.push(PendingRecord {
                id: id.clone(),
                fields: fields.clone(),
                delivery_count: 1,
            });
            records.push(StreamRecord {
                id,
                fields,
                delivery_count: 1,
            });
        }

        Ok(records)
    }

    async fn ack(&self, record_id: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.pending.retain(|pending| pending.id != record_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_read_returns_empty_batch() {
        let source = MemoryEventSource::new();
        let batch = source.read_batch(10).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_records_delivered_in_order() {
        let source = MemoryEventSource::new();
        let first = source.push_event_data("{}");
        let second = source.push_event_data("{}");

        let batch = source.read_batch(10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, first);
        assert_eq!(batch[1].id, second);
        assert!(batch[0].id < batch[1].id);
    }

    #[tokio::test]
    async fn test_unacked_records_are_redelivered_with_count() {
        let source = MemoryEventSource::new();
        let id = source.push_event_data("not json");

        let batch = source.read_batch(10).await.unwrap();
        assert_eq!(batch[0].delivery_count, 1);

        // Not acked: shows up again with a bumped count.
        let batch = source.read_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);
        assert_eq!(batch[0].delivery_count, 2);
    }

    #[tokio::test]
    async fn test_ack_removes_from_pending() {
        let source = MemoryEventSource::new();
        let id = source.push_event_data("{}");

        source.read_batch(10).await.unwrap();
        assert_eq!(source.pending_len(), 1);

        source.ack(&id).await.unwrap();
        assert_eq!(source.pending_len(), 0);
        assert!(source.read_batch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_respects_max() {
        let source = MemoryEventSource::new();
        for _ in 0..5 {
            source.push_event_data("{}");
        }

        let batch = source.read_batch(3).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(source.fresh_len(), 2);
    }

    #[test]
    fn test_event_data_accessor() {
        let mut fields = HashMap::new();
        fields.insert("event_data".to_string(), "{\"a\":1}".to_string());
        let record = StreamRecord {
            id: "1-0".into(),
            fields,
            delivery_count: 1,
        };

        assert_eq!(record.event_data(), Some("{\"a\":1}"));
    }
}
