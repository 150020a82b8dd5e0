//! Inbound filtering and the wiring of the core components.

use atende_billing::BillingApi;
use atende_config::Config;
use atende_ipc::{now_unix_secs, InboundBatch, InboundEvent, MessagePayload};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::classify::classify_any;
use crate::dedup::DedupGuard;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::normalize::normalize;
use crate::outbound::{MessageLog, OutboundSender, OutboundTransport};
use crate::payment::{PaymentOrchestrator, PaymentSettings};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryRunner;
use crate::state::{ConversationContext, ContextStore, PaymentState, PaymentStateStore};
use crate::store::MemoryStore;

pub const MEDIA_PLACEHOLDER: &str = "[áudio/vídeo]";
pub const EMPTY_PLACEHOLDER: &str = "[mensagem sem texto]";

const GROUP_SUFFIX: &str = "@g.us";
const BROADCAST_MARKERS: &[&str] = &["@broadcast", "@newsletter"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NoPayload,
    MissingChatId,
    GroupOrBroadcast,
    Protocol,
    FromSelf,
    Stale,
    Duplicate,
    RateLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Dropped(DropReason),
    Dispatched(DispatchOutcome),
    /// Handling failed; the customer was told so when possible.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub contexts: usize,
    pub payments: usize,
    pub rate_limits: usize,
    pub dedup: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.contexts + self.payments + self.rate_limits + self.dedup
    }
}

/// Chat id and payload of an event that may reach the dispatcher. Events
/// rejected here are dropped before any per-chat work.
pub fn route_event(event: &InboundEvent) -> Result<(&str, &MessagePayload), DropReason> {
    let message = event.message.as_ref().ok_or(DropReason::NoPayload)?;
    let chat_id = event.chat_id_str().ok_or(DropReason::MissingChatId)?;
    if chat_id.trim().is_empty() {
        return Err(DropReason::MissingChatId);
    }
    if is_group_or_broadcast(chat_id) {
        return Err(DropReason::GroupOrBroadcast);
    }
    if message.protocol.is_some() {
        return Err(DropReason::Protocol);
    }
    Ok((chat_id, message))
}

pub fn is_group_or_broadcast(chat_id: &str) -> bool {
    chat_id.ends_with(GROUP_SUFFIX) || BROADCAST_MARKERS.iter().any(|m| chat_id.contains(m))
}

/// First non-empty of text, extended text, document caption and image
/// caption; placeholders otherwise.
pub fn display_text(message: &MessagePayload) -> String {
    [
        &message.conversation,
        &message.extended_text,
        &message.document_caption,
        &message.image_caption,
    ]
    .into_iter()
    .filter_map(|candidate| candidate.as_deref())
    .find(|text| !text.trim().is_empty())
    .map(str::to_string)
    .unwrap_or_else(|| {
        if message.has_audio || message.has_video {
            MEDIA_PLACEHOLDER.to_string()
        } else {
            EMPTY_PLACEHOLDER.to_string()
        }
    })
}

pub struct InboundPipeline {
    contexts: Arc<ContextStore>,
    payments: Arc<PaymentStateStore>,
    dedup: Arc<DedupGuard>,
    rate_limiter: Arc<RateLimiter>,
    outbound: Arc<OutboundSender>,
    orchestrator: Arc<PaymentOrchestrator>,
    dispatcher: Arc<Dispatcher>,
    max_message_age: Duration,
}

impl InboundPipeline {
    pub fn new(
        config: &Config,
        billing: Arc<dyn BillingApi>,
        transport: Arc<dyn OutboundTransport>,
        log: Arc<dyn MessageLog>,
    ) -> Self {
        let pipeline = &config.pipeline;
        let contexts: Arc<ContextStore> = Arc::new(MemoryStore::<ConversationContext>::new(
            Duration::from_secs(pipeline.context_idle_secs),
        ));
        let payments: Arc<PaymentStateStore> = Arc::new(MemoryStore::<PaymentState>::new(
            Duration::from_secs(pipeline.payment_idle_secs),
        ));
        let dedup = Arc::new(DedupGuard::new(
            Duration::from_millis(pipeline.dedup_window_ms),
            Duration::from_millis(pipeline.dedup_retention_ms),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            Duration::from_millis(pipeline.min_response_interval_ms),
            Duration::from_secs(pipeline.rate_limit_idle_secs),
        ));
        let outbound = Arc::new(OutboundSender::new(transport, log, rate_limiter.clone()));
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            billing,
            contexts.clone(),
            payments.clone(),
            outbound.clone(),
            RetryRunner::new(config.retry.base_delay(), config.retry.upstream_timeout()),
            PaymentSettings::from_config(config),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            contexts.clone(),
            payments.clone(),
            orchestrator.clone(),
            outbound.clone(),
            &config.core.company_name,
        ));

        Self {
            contexts,
            payments,
            dedup,
            rate_limiter,
            outbound,
            orchestrator,
            dispatcher,
            max_message_age: Duration::from_secs(pipeline.max_message_age_secs),
        }
    }

    pub fn contexts(&self) -> &Arc<ContextStore> {
        &self.contexts
    }

    pub fn payments(&self) -> &Arc<PaymentStateStore> {
        &self.payments
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn orchestrator(&self) -> &Arc<PaymentOrchestrator> {
        &self.orchestrator
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub async fn process_batch(&self, batch: &InboundBatch) -> Vec<ProcessOutcome> {
        let mut outcomes = Vec::with_capacity(batch.events.len());
        for event in &batch.events {
            outcomes.push(self.process_event(event).await);
        }
        outcomes
    }

    /// Runs one event through the filters and the dispatcher. Never fails: a
    /// broken message is logged and answered with a recovery hint.
    pub async fn process_event(&self, event: &InboundEvent) -> ProcessOutcome {
        let (chat_id, message) = match route_event(event) {
            Ok(routed) => routed,
            Err(reason) => {
                debug!(trace_id = %event.trace_id, ?reason, "Dropping inbound event");
                return ProcessOutcome::Dropped(reason);
            }
        };

        let text = display_text(message);
        let now_secs = now_unix_secs();
        let sent_at = event.timestamp.map(|ts| ts.as_secs()).unwrap_or(now_secs);

        if event.from_me {
            self.outbound
                .log_outgoing_from_agent(chat_id, &text, sent_at.saturating_mul(1000))
                .await;
            return ProcessOutcome::Dropped(DropReason::FromSelf);
        }
        self.outbound
            .log_incoming(
                chat_id,
                &text,
                sent_at.saturating_mul(1000),
                event.push_name.as_deref(),
            )
            .await;

        let age_secs = now_secs.saturating_sub(sent_at);
        if age_secs > self.max_message_age.as_secs() as i64 {
            debug!(chat_id = chat_id, age_secs = age_secs, "Dropping stale message");
            return ProcessOutcome::Dropped(DropReason::Stale);
        }

        let now = Instant::now();
        if self.dedup.is_duplicate_at(chat_id, &text, now) {
            debug!(chat_id = chat_id, "Dropping duplicate message");
            return ProcessOutcome::Dropped(DropReason::Duplicate);
        }
        if !self.rate_limiter.admits(chat_id, &normalize(&text), now) {
            debug!(chat_id = chat_id, "Rate limited");
            return ProcessOutcome::Dropped(DropReason::RateLimited);
        }

        match self.dispatcher.dispatch(chat_id, &text).await {
            Ok(outcome) => ProcessOutcome::Dispatched(outcome),
            Err(e) => {
                let category = classify_any(&e);
                error!(
                    chat_id = chat_id,
                    category = category.as_str(),
                    "Failed to handle message: {:#}",
                    e
                );
                if let Err(send_err) = self.outbound.text(chat_id, category.user_message()).await {
                    warn!(chat_id = chat_id, "Failed to send error notice: {:#}", send_err);
                }
                ProcessOutcome::Failed
            }
        }
    }

    /// Drops idle entries from every store. Stores are swept one after the
    /// other, entry by entry.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        SweepReport {
            contexts: self.contexts.sweep(now),
            payments: self.payments.sweep(now),
            rate_limits: self.rate_limiter.sweep(now),
            dedup: self.dedup.sweep(now),
        }
    }
}
