use redis::{aio::MultiplexedConnection, Client};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::core::types::{BatchConsumptionResult, DocumentWriteEvent, StreamMessage};
use crate::error::{Result, SyncError};

/// Fields a producer may use to carry the JSON payload, in lookup order.
const PAYLOAD_FIELDS: [&str; 3] = ["data", "payload", "event_data"];

/// Outcome of decoding one stream entry.
#[derive(Debug)]
pub enum ParsedEntry {
    Event(StreamMessage),
    /// Entry that can never be processed; acknowledge it so it is not redelivered.
    Poison { id: String, stream: String },
}

/// Consumer-group reader for document write notifications.
///
/// Messages stay pending until `ack_message` is called, so a handler failure
/// leaves the notification in the group's pending list. Pending messages that
/// have been idle for `claim_idle_ms` are picked up again on a later call to
/// `consume_batch`, which is how failed invocations get retried.
pub struct RedisStreamConsumer {
    connection: MultiplexedConnection,
    stream_names: Vec<String>,
    consumer_group: String,
    consumer_name: String,
    claim_idle_ms: u64,
}

impl RedisStreamConsumer {
    pub async fn new(
        redis_url: &str,
        stream_names: &[String],
        consumer_group: &str,
        consumer_name: &str,
        claim_idle_ms: u64,
    ) -> Result<Self> {
        let client = Client::open(redis_url).map_err(SyncError::Redis)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(SyncError::Redis)?;

        info!(
            "Connected to Redis streams: {:?} with consumer group: {} and consumer: {}",
            stream_names, consumer_group, consumer_name
        );

        let mut consumer = Self {
            connection,
            stream_names: stream_names.to_vec(),
            consumer_group: consumer_group.to_string(),
            consumer_name: consumer_name.to_string(),
            claim_idle_ms,
        };

        consumer.ensure_consumer_groups().await?;
        Ok(consumer)
    }

    async fn ensure_consumer_groups(&mut self) -> Result<()> {
        for stream_name in &self.stream_names {
            let result: std::result::Result<String, redis::RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(stream_name)
                .arg(&self.consumer_group)
                .arg("0")
                .arg("MKSTREAM")
                .query_async(&mut self.connection)
                .await;

            match result {
                Ok(_) => {
                    info!(
                        "Created consumer group '{}' for stream '{}'",
                        self.consumer_group, stream_name
                    );
                }
                Err(e) if e.to_string().contains("BUSYGROUP") => {
                    debug!(
                        "Consumer group '{}' already exists for stream '{}'",
                        self.consumer_group, stream_name
                    );
                }
                Err(e) => {
                    error!(
                        "Failed to create consumer group for stream '{}': {}",
                        stream_name, e
                    );
                    return Err(SyncError::Redis(e));
                }
            }
        }
        Ok(())
    }

    /// Read up to `batch_size` notifications.
    ///
    /// Reclaimed pending messages take priority over new ones. Poison entries
    /// are acknowledged here and never returned.
    pub async fn consume_batch(&self, batch_size: usize) -> Result<BatchConsumptionResult> {
        if self.stream_names.is_empty() {
            return Ok(BatchConsumptionResult::default());
        }

        for stream_name in &self.stream_names {
            let claimed = self
                .claim_idle_messages_for_stream(stream_name, batch_size)
                .await?;
            if !claimed.is_empty() {
                let messages = self.accept_entries(claimed).await;
                let count = messages.len();
                debug!("Claimed {} idle messages from stream {}", count, stream_name);
                return Ok(BatchConsumptionResult {
                    messages,
                    claimed_count: count,
                });
            }
        }

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.consumer_group)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(batch_size)
            .arg("BLOCK")
            .arg(1000)
            .arg("STREAMS");

        for stream_name in &self.stream_names {
            cmd.arg(stream_name);
        }
        for _ in &self.stream_names {
            cmd.arg(">");
        }

        let result: redis::Value = cmd
            .query_async(&mut self.connection.clone())
            .await
            .map_err(SyncError::Redis)?;

        let entries = parse_read_response(result);
        let messages = self.accept_entries(entries).await;
        Ok(BatchConsumptionResult {
            messages,
            claimed_count: 0,
        })
    }

    async fn accept_entries(&self, entries: Vec<ParsedEntry>) -> Vec<StreamMessage> {
        let mut messages = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry {
                ParsedEntry::Event(message) => messages.push(message),
                ParsedEntry::Poison { id, stream } => {
                    if let Err(e) = self.ack_message(&stream, &id).await {
                        warn!("Failed to drop unparseable message {} from {}: {}", id, stream, e);
                    }
                }
            }
        }
        messages
    }

    async fn claim_idle_messages_for_stream(
        &self,
        stream_name: &str,
        count: usize,
    ) -> Result<Vec<ParsedEntry>> {
        // Any consumer's entries, so a crashed consumer's backlog is picked up
        let pending_result: redis::Value = redis::cmd("XPENDING")
            .arg(stream_name)
            .arg(&self.consumer_group)
            .arg("IDLE")
            .arg(self.claim_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut self.connection.clone())
            .await
            .map_err(SyncError::Redis)?;

        let message_ids = extract_pending_message_ids(pending_result);
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(stream_name)
            .arg(&self.consumer_group)
            .arg(&self.consumer_name)
            .arg(self.claim_idle_ms);
        for message_id in &message_ids {
            cmd.arg(message_id);
        }

        let result: redis::Value = cmd
            .query_async(&mut self.connection.clone())
            .await
            .map_err(SyncError::Redis)?;

        let mut entries = Vec::new();
        if let redis::Value::Array(claimed) = result {
            for message in &claimed {
                entries.extend(parse_entry(message, stream_name));
            }
        }
        Ok(entries)
    }

    pub async fn ack_message(&self, stream_name: &str, message_id: &str) -> Result<()> {
        let ack_count: u64 = redis::cmd("XACK")
            .arg(stream_name)
            .arg(&self.consumer_group)
            .arg(message_id)
            .query_async(&mut self.connection.clone())
            .await
            .map_err(SyncError::Redis)?;

        if ack_count == 0 {
            debug!(
                "Message {} was already acknowledged in stream {}",
                message_id, stream_name
            );
        }

        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.connection.clone())
            .await
            .map_err(SyncError::Redis)?;
        Ok(())
    }

    pub fn get_stream_names(&self) -> &[String] {
        &self.stream_names
    }
}

fn bulk_to_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        redis::Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

fn extract_pending_message_ids(pending_result: redis::Value) -> Vec<String> {
    let mut message_ids = Vec::new();

    if let redis::Value::Array(pending_messages) = pending_result {
        for pending_entry in pending_messages {
            if let redis::Value::Array(entry_data) = pending_entry {
                if let Some(id) = entry_data.first().and_then(bulk_to_string) {
                    message_ids.push(id);
                }
            }
        }
    }

    message_ids
}

/// Decode an XREADGROUP reply: `[[stream, [[id, [k, v, ...]], ...]], ...]`.
pub(crate) fn parse_read_response(value: redis::Value) -> Vec<ParsedEntry> {
    let mut entries = Vec::new();

    if let redis::Value::Array(streams) = value {
        for stream in streams {
            let redis::Value::Array(stream_data) = stream else {
                continue;
            };
            if stream_data.len() < 2 {
                continue;
            }
            let Some(stream_name) = bulk_to_string(&stream_data[0]) else {
                continue;
            };
            if let redis::Value::Array(stream_messages) = &stream_data[1] {
                for message in stream_messages {
                    entries.extend(parse_entry(message, &stream_name));
                }
            }
        }
    }

    debug!("Parsed {} entries from Redis", entries.len());
    entries
}

/// Decode a single `[id, [k, v, ...]]` entry.
pub(crate) fn parse_entry(message: &redis::Value, stream_name: &str) -> Option<ParsedEntry> {
    let redis::Value::Array(message_data) = message else {
        return None;
    };
    if message_data.len() < 2 {
        return None;
    }
    let message_id = bulk_to_string(&message_data[0])?;

    let mut field_map = HashMap::new();
    if let redis::Value::Array(fields) = &message_data[1] {
        for chunk in fields.chunks(2) {
            if let [key, value] = chunk {
                if let (Some(k), Some(v)) = (bulk_to_string(key), bulk_to_string(value)) {
                    field_map.insert(k, v);
                }
            }
        }
    }

    let poison = || ParsedEntry::Poison {
        id: message_id.clone(),
        stream: stream_name.to_string(),
    };

    let Some(payload) = PAYLOAD_FIELDS.iter().find_map(|f| field_map.get(*f)) else {
        error!(
            "No payload in message {}. Available fields: {:?}",
            message_id,
            field_map.keys().collect::<Vec<_>>()
        );
        return Some(poison());
    };

    match serde_json::from_str::<DocumentWriteEvent>(payload) {
        Ok(event) => {
            debug!(
                "Parsed write notification for {} from message {}",
                event.document, message_id
            );
            Some(ParsedEntry::Event(StreamMessage {
                id: message_id.clone(),
                event,
                source_stream: stream_name.to_string(),
            }))
        }
        Err(e) => {
            error!(
                "Failed to parse write notification from message {}: {}. JSON: {}",
                message_id, e, payload
            );
            Some(poison())
        }
    }
}
