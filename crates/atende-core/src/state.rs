//! Per-chat dialogue state.
//!
//! Each menu carries only the steps that exist in it, so combinations such
//! as "main menu, waiting for a CPF" cannot be represented.

use crate::store::StateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStep {
    WaitingCpf,
    ProcessingCpf,
    WaitingPaymentOption,
    WaitingPaymentConfirmation,
    PaymentSent,
}

impl PaymentStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStep::WaitingCpf => "waiting_cpf",
            PaymentStep::ProcessingCpf => "processing_cpf",
            PaymentStep::WaitingPaymentOption => "waiting_payment_option",
            PaymentStep::WaitingPaymentConfirmation => "waiting_payment_confirmation",
            PaymentStep::PaymentSent => "payment_sent",
        }
    }

    /// Steps in which a set `ignore_until_menu` silences everything but the
    /// menu command.
    pub fn is_locked(&self) -> bool {
        matches!(
            self,
            PaymentStep::PaymentSent | PaymentStep::WaitingPaymentConfirmation
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportStep {
    WaitingOption,
    SlowInternet,
    NoConnection,
}

impl SupportStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupportStep::WaitingOption => "waiting_option",
            SupportStep::SlowInternet => "internet_lenta",
            SupportStep::NoConnection => "sem_conexao",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialogState {
    #[default]
    Main,
    Payment(PaymentStep),
    Support(SupportStep),
    Other,
}

impl DialogState {
    pub fn menu(&self) -> &'static str {
        match self {
            DialogState::Main => "main",
            DialogState::Payment(_) => "payment",
            DialogState::Support(_) => "support_sub",
            DialogState::Other => "other",
        }
    }

    pub fn step(&self) -> Option<&'static str> {
        match self {
            DialogState::Main | DialogState::Other => None,
            DialogState::Payment(step) => Some(step.as_str()),
            DialogState::Support(step) => Some(step.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConversationContext {
    pub state: DialogState,
    pub ignore_until_menu: bool,
}

impl ConversationContext {
    pub fn at(state: DialogState) -> Self {
        Self {
            state,
            ignore_until_menu: false,
        }
    }

    pub fn locked(state: DialogState) -> Self {
        Self {
            state,
            ignore_until_menu: true,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.ignore_until_menu
            && matches!(self.state, DialogState::Payment(step) if step.is_locked())
    }
}

/// Result of a successful CPF lookup, kept until the customer picks how to pay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentState {
    pub client_id: String,
    pub service_id: String,
    pub bill_id: String,
    pub client_name: String,
}

pub type ContextStore = dyn StateStore<ConversationContext>;
pub type PaymentStateStore = dyn StateStore<PaymentState>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_is_main_without_step() {
        let ctx = ConversationContext::default();
        assert_eq!(ctx.state.menu(), "main");
        assert_eq!(ctx.state.step(), None);
        assert!(!ctx.ignore_until_menu);
    }

    #[test]
    fn labels_match_wire_names() {
        let state = DialogState::Payment(PaymentStep::WaitingPaymentOption);
        assert_eq!(state.menu(), "payment");
        assert_eq!(state.step(), Some("waiting_payment_option"));
        let state = DialogState::Support(SupportStep::SlowInternet);
        assert_eq!(state.menu(), "support_sub");
        assert_eq!(state.step(), Some("internet_lenta"));
    }

    #[test]
    fn only_flagged_locked_steps_are_locked() {
        let sent = DialogState::Payment(PaymentStep::PaymentSent);
        assert!(ConversationContext::locked(sent).is_locked());
        assert!(!ConversationContext::at(sent).is_locked());
        let waiting = DialogState::Payment(PaymentStep::WaitingCpf);
        assert!(!ConversationContext::locked(waiting).is_locked());
        assert!(!ConversationContext::locked(DialogState::Main).is_locked());
    }
}
