//! Atende IPC
//!
//! Transport-neutral inbound events and the bus that carries them to the core

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

static NEXT_TRACE_COUNTER: AtomicU64 = AtomicU64::new(1);

pub fn now_unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn generate_trace_id() -> String {
    let ts = now_unix_secs();
    let n = NEXT_TRACE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("trace-{}-{}", ts, n)
}

fn default_schema_version() -> u16 {
    1
}

fn default_trace_id() -> String {
    generate_trace_id()
}

/// Message timestamp as delivered by the transport: either plain seconds or a
/// 64-bit "long" object split into low/high words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventTimestamp {
    Seconds(i64),
    Long {
        low: i64,
        #[serde(default)]
        high: i64,
    },
}

impl EventTimestamp {
    /// Seconds since the epoch. Only the low-order word is meaningful for
    /// present-day timestamps.
    pub fn as_secs(&self) -> i64 {
        match self {
            EventTimestamp::Seconds(secs) => *secs,
            EventTimestamp::Long { low, .. } => *low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolMarker {
    Revoke,
    EphemeralSetting,
    HistorySync,
    KeyShare,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text: Option<String>,
    #[serde(default)]
    pub document_caption: Option<String>,
    #[serde(default)]
    pub image_caption: Option<String>,
    #[serde(default)]
    pub has_audio: bool,
    #[serde(default)]
    pub has_video: bool,
    #[serde(default)]
    pub protocol: Option<ProtocolMarker>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    #[serde(default = "default_trace_id")]
    pub trace_id: String,
    #[serde(default)]
    pub id: Option<String>,
    /// Kept as loose JSON: transports have been seen to deliver numbers or
    /// nothing at all here.
    #[serde(default)]
    pub chat_id: Option<serde_json::Value>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub timestamp: Option<EventTimestamp>,
    #[serde(default)]
    pub message: Option<MessagePayload>,
}

impl InboundEvent {
    pub fn new(chat_id: &str, payload: MessagePayload) -> Self {
        Self {
            schema_version: default_schema_version(),
            trace_id: generate_trace_id(),
            id: None,
            chat_id: Some(serde_json::Value::String(chat_id.to_string())),
            sender_id: Some(chat_id.to_string()),
            push_name: None,
            from_me: false,
            timestamp: Some(EventTimestamp::Seconds(now_unix_secs())),
            message: Some(payload),
        }
    }

    pub fn text(chat_id: &str, text: &str) -> Self {
        Self::new(
            chat_id,
            MessagePayload {
                conversation: Some(text.to_string()),
                ..MessagePayload::default()
            },
        )
    }

    pub fn with_timestamp(mut self, timestamp: EventTimestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_push_name(mut self, name: &str) -> Self {
        self.push_name = Some(name.to_string());
        self
    }

    pub fn sent_by_self(mut self) -> Self {
        self.from_me = true;
        self
    }

    pub fn chat_id_str(&self) -> Option<&str> {
        self.chat_id.as_ref().and_then(|v| v.as_str())
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A group of events delivered together by the transport. Events inside a
/// batch keep their delivery order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundBatch {
    pub events: Vec<InboundEvent>,
}

impl InboundBatch {
    pub fn single(event: InboundEvent) -> Self {
        Self {
            events: vec![event],
        }
    }
}

pub const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    inbound: broadcast::Sender<InboundBatch>,
}

impl EventBus {
    pub fn new() -> Self {
        let (inbound_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { inbound: inbound_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboundBatch> {
        self.inbound.subscribe()
    }

    pub fn publish(&self, batch: InboundBatch) -> anyhow::Result<()> {
        self.inbound.send(batch)?;
        Ok(())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
