//! Delivery of replies and the message log.

use anyhow::Result;
use async_trait::async_trait;
use atende_storage::{now_millis, AttachmentMeta, Storage};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::rate_limit::RateLimiter;

/// The chat transport. Each send resolves to the transport's delivery id.
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<String>;

    async fn send_image(&self, chat_id: &str, bytes: Vec<u8>, caption: Option<&str>)
        -> Result<String>;

    async fn send_document(
        &self,
        chat_id: &str,
        bytes: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> Result<String>;
}

#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn record_incoming(
        &self,
        chat_id: &str,
        text: &str,
        timestamp_millis: i64,
        display_name: Option<&str>,
    ) -> Result<()>;

    async fn record_outgoing(
        &self,
        chat_id: &str,
        text: &str,
        timestamp_millis: i64,
        attachment: Option<&AttachmentMeta>,
    ) -> Result<()>;
}

pub struct SqliteMessageLog {
    storage: Arc<Mutex<Storage>>,
}

impl SqliteMessageLog {
    pub fn new(storage: Arc<Mutex<Storage>>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl MessageLog for SqliteMessageLog {
    async fn record_incoming(
        &self,
        chat_id: &str,
        text: &str,
        timestamp_millis: i64,
        display_name: Option<&str>,
    ) -> Result<()> {
        let storage = self.storage.lock().await;
        storage.record_incoming(chat_id, text, timestamp_millis, display_name)?;
        Ok(())
    }

    async fn record_outgoing(
        &self,
        chat_id: &str,
        text: &str,
        timestamp_millis: i64,
        attachment: Option<&AttachmentMeta>,
    ) -> Result<()> {
        let storage = self.storage.lock().await;
        storage.record_outgoing(chat_id, text, timestamp_millis, attachment)?;
        Ok(())
    }
}

/// Sends through the transport, then records the response for rate limiting
/// and in the message log. Log failures never fail a send.
pub struct OutboundSender {
    transport: Arc<dyn OutboundTransport>,
    log: Arc<dyn MessageLog>,
    rate_limiter: Arc<RateLimiter>,
}

impl OutboundSender {
    pub fn new(
        transport: Arc<dyn OutboundTransport>,
        log: Arc<dyn MessageLog>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            transport,
            log,
            rate_limiter,
        }
    }

    pub async fn text(&self, chat_id: &str, text: &str) -> Result<String> {
        let delivery_id = self.transport.send_text(chat_id, text).await?;
        self.after_send(chat_id, text, None).await;
        Ok(delivery_id)
    }

    pub async fn image(&self, chat_id: &str, bytes: Vec<u8>, caption: Option<&str>) -> Result<String> {
        let delivery_id = self.transport.send_image(chat_id, bytes, caption).await?;
        self.after_send(chat_id, caption.unwrap_or("[imagem]"), Some(AttachmentMeta::image()))
            .await;
        Ok(delivery_id)
    }

    pub async fn document(
        &self,
        chat_id: &str,
        bytes: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> Result<String> {
        let delivery_id = self
            .transport
            .send_document(chat_id, bytes, file_name, caption)
            .await?;
        self.after_send(
            chat_id,
            caption.unwrap_or(file_name),
            Some(AttachmentMeta::document(file_name)),
        )
        .await;
        Ok(delivery_id)
    }

    pub async fn log_incoming(
        &self,
        chat_id: &str,
        text: &str,
        timestamp_millis: i64,
        display_name: Option<&str>,
    ) {
        if let Err(e) = self
            .log
            .record_incoming(chat_id, text, timestamp_millis, display_name)
            .await
        {
            warn!(chat_id = chat_id, "Failed to record incoming message: {:#}", e);
        }
    }

    /// Messages typed by a human agent on the bot's own account. Logged as
    /// outgoing; they do not count as bot responses.
    pub async fn log_outgoing_from_agent(&self, chat_id: &str, text: &str, timestamp_millis: i64) {
        if let Err(e) = self
            .log
            .record_outgoing(chat_id, text, timestamp_millis, None)
            .await
        {
            warn!(chat_id = chat_id, "Failed to record agent message: {:#}", e);
        }
    }

    async fn after_send(&self, chat_id: &str, text: &str, attachment: Option<AttachmentMeta>) {
        self.rate_limiter.record_response(chat_id);
        if let Err(e) = self
            .log
            .record_outgoing(chat_id, text, now_millis(), attachment.as_ref())
            .await
        {
            warn!(chat_id = chat_id, "Failed to record outgoing message: {:#}", e);
        }
        debug!(chat_id = chat_id, "Reply delivered");
    }
}
