//! The dialogue state machine.
//!
//! Global rules (menu command, greeting, silencing) are evaluated first; the
//! first one that matches wins. Otherwise the message goes to the handler of
//! the chat's current state.

use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use crate::intent;
use crate::normalize::{extract_digits, is_valid_cpf, normalize, CPF_LEN};
use crate::outbound::OutboundSender;
use crate::payment::PaymentOrchestrator;
use crate::state::{
    ConversationContext, ContextStore, DialogState, PaymentStateStore, PaymentStep, SupportStep,
};
use crate::texts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Payment instructions were sent; waiting for the menu command.
    Locked,
    Filler,
    HumanRequest,
    /// Eleven digits outside the payment flow, likely meant for an agent.
    StrayDocument,
    Unmatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Replied,
    Ignored(IgnoreReason),
}

pub struct Dispatcher {
    contexts: Arc<ContextStore>,
    payments: Arc<PaymentStateStore>,
    orchestrator: Arc<PaymentOrchestrator>,
    outbound: Arc<OutboundSender>,
    company_name: String,
}

impl Dispatcher {
    pub fn new(
        contexts: Arc<ContextStore>,
        payments: Arc<PaymentStateStore>,
        orchestrator: Arc<PaymentOrchestrator>,
        outbound: Arc<OutboundSender>,
        company_name: &str,
    ) -> Self {
        Self {
            contexts,
            payments,
            orchestrator,
            outbound,
            company_name: company_name.to_string(),
        }
    }

    /// Current context, created as `main` on first contact. Reading refreshes
    /// the chat's activity time.
    pub fn context(&self, chat_id: &str) -> ConversationContext {
        let ctx = self.contexts.get(chat_id).unwrap_or_default();
        self.contexts.set(chat_id, ctx);
        ctx
    }

    pub async fn dispatch(&self, chat_id: &str, raw_text: &str) -> Result<DispatchOutcome> {
        let normalized = normalize(raw_text);
        let ctx = self.context(chat_id);
        debug!(
            chat_id = chat_id,
            menu = ctx.state.menu(),
            step = ctx.state.step().unwrap_or("-"),
            "Dispatching message"
        );

        if intent::is_menu_command(&normalized)
            || normalized.is_empty()
            || intent::is_greeting(&normalized)
        {
            return self.show_main_menu(chat_id).await;
        }

        if ctx.is_locked() {
            return Ok(DispatchOutcome::Ignored(IgnoreReason::Locked));
        }
        if intent::is_filler(&normalized) {
            return Ok(DispatchOutcome::Ignored(IgnoreReason::Filler));
        }
        if ctx.state == DialogState::Main && intent::asks_for_human(&normalized) {
            return Ok(DispatchOutcome::Ignored(IgnoreReason::HumanRequest));
        }

        let handled = match ctx.state {
            DialogState::Support(step) => self.on_support(chat_id, step, &normalized).await?,
            DialogState::Main => self.on_main(chat_id, &normalized).await?,
            DialogState::Payment(PaymentStep::WaitingPaymentOption) => {
                Some(self.on_payment_option(chat_id, &normalized).await?)
            }
            DialogState::Payment(PaymentStep::WaitingCpf) => {
                Some(self.on_cpf_input(chat_id, raw_text).await?)
            }
            DialogState::Payment(
                PaymentStep::ProcessingCpf
                | PaymentStep::WaitingPaymentConfirmation
                | PaymentStep::PaymentSent,
            )
            | DialogState::Other => None,
        };
        if let Some(outcome) = handled {
            return Ok(outcome);
        }

        if !matches!(ctx.state, DialogState::Payment(_)) && intent::looks_like_document(raw_text) {
            debug!(chat_id = chat_id, "Ignoring document number outside payment flow");
            return Ok(DispatchOutcome::Ignored(IgnoreReason::StrayDocument));
        }
        Ok(DispatchOutcome::Ignored(IgnoreReason::Unmatched))
    }

    async fn reply(&self, chat_id: &str, text: &str) -> Result<DispatchOutcome> {
        self.outbound.text(chat_id, text).await?;
        Ok(DispatchOutcome::Replied)
    }

    fn transition(&self, chat_id: &str, state: DialogState) {
        self.contexts.set(chat_id, ConversationContext::at(state));
    }

    async fn show_main_menu(&self, chat_id: &str) -> Result<DispatchOutcome> {
        self.contexts.set(chat_id, ConversationContext::default());
        self.reply(chat_id, &texts::main_menu(&self.company_name))
            .await
    }

    async fn on_main(&self, chat_id: &str, normalized: &str) -> Result<Option<DispatchOutcome>> {
        let (next, text) = match normalized {
            "1" => (Some(DialogState::Payment(PaymentStep::WaitingCpf)), texts::ASK_CPF),
            "2" => (
                Some(DialogState::Support(SupportStep::WaitingOption)),
                texts::SUPPORT_MENU,
            ),
            "3" => (None, texts::HUMAN_HANDOFF),
            "4" => (Some(DialogState::Other), texts::OTHER_SUBJECTS),
            _ => return Ok(None),
        };
        if let Some(next) = next {
            self.transition(chat_id, next);
        }
        self.reply(chat_id, text).await.map(Some)
    }

    async fn on_support(
        &self,
        chat_id: &str,
        step: SupportStep,
        normalized: &str,
    ) -> Result<Option<DispatchOutcome>> {
        let (next, text) = match (step, normalized) {
            (SupportStep::WaitingOption, "1") => (
                DialogState::Support(SupportStep::SlowInternet),
                texts::SLOW_INTERNET,
            ),
            (SupportStep::WaitingOption, "2") => (
                DialogState::Support(SupportStep::NoConnection),
                texts::NO_CONNECTION,
            ),
            (_, "3") => (DialogState::Main, texts::TECHNICIAN_HANDOFF),
            _ => return Ok(None),
        };
        self.transition(chat_id, next);
        self.reply(chat_id, text).await.map(Some)
    }

    async fn on_payment_option(&self, chat_id: &str, normalized: &str) -> Result<DispatchOutcome> {
        let pix = intent::wants_pix(normalized);
        if !pix && !intent::wants_boleto(normalized) {
            return self.reply(chat_id, texts::CHOOSE_PAYMENT).await;
        }

        let Some(state) = self.payments.get(chat_id) else {
            self.transition(chat_id, DialogState::Payment(PaymentStep::WaitingCpf));
            return self.reply(chat_id, texts::PAYMENT_DATA_MISSING).await;
        };
        if pix {
            self.orchestrator.send_pix(chat_id, &state).await?;
        } else {
            self.orchestrator.send_boleto(chat_id, &state).await?;
        }
        Ok(DispatchOutcome::Replied)
    }

    async fn on_cpf_input(&self, chat_id: &str, raw_text: &str) -> Result<DispatchOutcome> {
        let digits = extract_digits(raw_text);
        match digits.len() {
            0 => self.reply(chat_id, texts::CPF_MISSING).await,
            n if n < CPF_LEN => self.reply(chat_id, &texts::cpf_incomplete(n)).await,
            n if n > CPF_LEN => self.reply(chat_id, texts::CPF_TOO_LONG).await,
            _ if !is_valid_cpf(&digits) => self.reply(chat_id, texts::CPF_INVALID).await,
            _ => {
                self.orchestrator.handle_cpf(chat_id, &digits).await?;
                Ok(DispatchOutcome::Replied)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PaymentState;
    use crate::testing::{Harness, MemoryBilling};

    fn harness() -> Harness {
        Harness::new(MemoryBilling::with_overdue_customer("11144477735", "Maria Souza"))
    }

    async fn say(h: &Harness, text: &str) -> DispatchOutcome {
        h.dispatcher.dispatch("chat", text).await.unwrap()
    }

    #[tokio::test]
    async fn menu_command_resets_from_any_state() {
        let h = harness();
        for state in [
            DialogState::Other,
            DialogState::Support(SupportStep::NoConnection),
            DialogState::Payment(PaymentStep::WaitingCpf),
        ] {
            h.contexts.set("chat", ConversationContext::at(state));
            assert_eq!(say(&h, "Voltar ao MENU").await, DispatchOutcome::Replied);
            assert_eq!(h.context("chat"), ConversationContext::default());
        }
        h.contexts.set(
            "chat",
            ConversationContext::locked(DialogState::Payment(PaymentStep::PaymentSent)),
        );
        say(&h, "8").await;
        assert_eq!(h.context("chat"), ConversationContext::default());
        assert!(h.transport.texts_for("chat").last().unwrap().contains("Atende Internet"));
    }

    #[tokio::test]
    async fn greeting_and_empty_text_show_menu() {
        let h = harness();
        h.contexts
            .set("chat", ConversationContext::at(DialogState::Other));
        assert_eq!(say(&h, "Olá!").await, DispatchOutcome::Replied);
        assert_eq!(h.context("chat").state, DialogState::Main);
        assert_eq!(say(&h, "   ").await, DispatchOutcome::Replied);
        assert_eq!(h.transport.texts_for("chat").len(), 2);
    }

    #[tokio::test]
    async fn locked_chat_ignores_everything_but_menu() {
        let h = harness();
        h.contexts.set(
            "chat",
            ConversationContext::locked(DialogState::Payment(PaymentStep::PaymentSent)),
        );
        assert_eq!(
            say(&h, "paguei, obrigado").await,
            DispatchOutcome::Ignored(IgnoreReason::Locked)
        );
        assert_eq!(
            say(&h, "1").await,
            DispatchOutcome::Ignored(IgnoreReason::Locked)
        );
        assert!(h.transport.texts_for("chat").is_empty());
    }

    #[tokio::test]
    async fn fillers_and_human_requests_are_silent() {
        let h = harness();
        assert_eq!(
            say(&h, "ok").await,
            DispatchOutcome::Ignored(IgnoreReason::Filler)
        );
        assert_eq!(
            say(&h, "quero falar com atendente").await,
            DispatchOutcome::Ignored(IgnoreReason::HumanRequest)
        );
        assert!(h.transport.texts_for("chat").is_empty());
    }

    #[tokio::test]
    async fn main_menu_options() {
        let h = harness();
        say(&h, "1").await;
        assert_eq!(
            h.context("chat").state,
            DialogState::Payment(PaymentStep::WaitingCpf)
        );

        h.contexts.set("chat", ConversationContext::default());
        say(&h, "2").await;
        assert_eq!(
            h.context("chat").state,
            DialogState::Support(SupportStep::WaitingOption)
        );

        h.contexts.set("chat", ConversationContext::default());
        say(&h, "3").await;
        assert_eq!(h.context("chat").state, DialogState::Main);
        assert_eq!(
            h.transport.texts_for("chat").last().unwrap(),
            texts::HUMAN_HANDOFF
        );

        say(&h, "4").await;
        assert_eq!(h.context("chat").state, DialogState::Other);
        assert_eq!(
            say(&h, "quero mudar de plano").await,
            DispatchOutcome::Ignored(IgnoreReason::Unmatched)
        );
    }

    #[tokio::test]
    async fn support_submenu_flow() {
        let h = harness();
        say(&h, "2").await;
        say(&h, "1").await;
        assert_eq!(
            h.context("chat").state,
            DialogState::Support(SupportStep::SlowInternet)
        );
        assert_eq!(
            say(&h, "2").await,
            DispatchOutcome::Ignored(IgnoreReason::Unmatched)
        );
        say(&h, "3").await;
        assert_eq!(h.context("chat").state, DialogState::Main);
        assert_eq!(
            h.transport.texts_for("chat").last().unwrap(),
            texts::TECHNICIAN_HANDOFF
        );
    }

    #[tokio::test]
    async fn cpf_length_messages_skip_lookup() {
        let h = harness();
        say(&h, "1").await;
        for (input, expected) in [
            ("meu cpf", texts::CPF_MISSING.to_string()),
            ("111.444.777", texts::cpf_incomplete(9)),
            ("111.444.777-351", texts::CPF_TOO_LONG.to_string()),
            ("111.444.777-36", texts::CPF_INVALID.to_string()),
        ] {
            assert_eq!(say(&h, input).await, DispatchOutcome::Replied);
            assert_eq!(h.transport.texts_for("chat").last().unwrap(), &expected);
            assert_eq!(
                h.context("chat").state,
                DialogState::Payment(PaymentStep::WaitingCpf)
            );
        }
        assert_eq!(h.billing.lookup_calls(), 0);
    }

    #[tokio::test]
    async fn formatted_valid_cpf_starts_lookup() {
        let h = harness();
        say(&h, "1").await;
        say(&h, "111.444.777-35").await;
        assert_eq!(h.billing.lookup_calls(), 1);
        assert_eq!(
            h.context("chat").state,
            DialogState::Payment(PaymentStep::WaitingPaymentOption)
        );
    }

    #[tokio::test]
    async fn payment_option_reprompts_on_other_text() {
        let h = harness();
        say(&h, "1").await;
        say(&h, "11144477735").await;
        assert_eq!(say(&h, "quanto custa?").await, DispatchOutcome::Replied);
        assert_eq!(
            h.transport.texts_for("chat").last().unwrap(),
            texts::CHOOSE_PAYMENT
        );
        assert_eq!(
            h.context("chat").state,
            DialogState::Payment(PaymentStep::WaitingPaymentOption)
        );
    }

    #[tokio::test]
    async fn payment_option_without_cached_data_asks_cpf_again() {
        let h = harness();
        h.contexts.set(
            "chat",
            ConversationContext::at(DialogState::Payment(PaymentStep::WaitingPaymentOption)),
        );
        say(&h, "pix").await;
        assert_eq!(
            h.transport.texts_for("chat").last().unwrap(),
            texts::PAYMENT_DATA_MISSING
        );
        assert_eq!(
            h.context("chat").state,
            DialogState::Payment(PaymentStep::WaitingCpf)
        );
        assert_eq!(h.billing.pix_calls(), 0);
    }

    #[tokio::test]
    async fn boleto_choice_sends_document() {
        let h = harness();
        h.payments.set(
            "chat",
            PaymentState {
                client_id: "c1".into(),
                service_id: "s1".into(),
                bill_id: "b-overdue".into(),
                client_name: "Maria Souza".into(),
            },
        );
        h.contexts.set(
            "chat",
            ConversationContext::at(DialogState::Payment(PaymentStep::WaitingPaymentOption)),
        );
        say(&h, "quero o boleto").await;
        assert_eq!(h.transport.documents_for("chat").len(), 1);
        assert!(h.context("chat").is_locked());
    }

    #[tokio::test]
    async fn stray_document_outside_payment_is_dropped() {
        let h = harness();
        assert_eq!(
            say(&h, "meu cpf é 111.444.777-35").await,
            DispatchOutcome::Ignored(IgnoreReason::StrayDocument)
        );
        assert_eq!(h.billing.lookup_calls(), 0);
        assert!(h.transport.texts_for("chat").is_empty());
    }
}
