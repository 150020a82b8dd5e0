//! Atende Core
//!
//! Inbound message pipeline, dialogue state machine and payment flow

pub mod classify;
pub mod dedup;
pub mod dispatcher;
pub mod intent;
pub mod normalize;
pub mod outbound;
pub mod payment;
pub mod pipeline;
pub mod pix;
pub mod rate_limit;
pub mod retry;
pub mod runtime;
pub mod state;
pub mod store;
pub mod testing;
pub mod texts;

pub use classify::{classify, classify_any, ErrorCategory};
pub use dedup::DedupGuard;
pub use dispatcher::{DispatchOutcome, Dispatcher, IgnoreReason};
pub use normalize::{extract_digits, is_valid_cpf, normalize};
pub use outbound::{MessageLog, OutboundSender, OutboundTransport, SqliteMessageLog};
pub use payment::{prioritize_bills, select_bill, PaymentOrchestrator, PaymentSettings};
pub use pipeline::{DropReason, InboundPipeline, ProcessOutcome, SweepReport};
pub use pix::PixCharge;
pub use rate_limit::RateLimiter;
pub use retry::RetryRunner;
pub use runtime::AtendeRuntime;
pub use state::{
    ContextStore, ConversationContext, DialogState, PaymentState, PaymentStateStore, PaymentStep,
    SupportStep,
};
pub use store::{MemoryStore, StateStore};
