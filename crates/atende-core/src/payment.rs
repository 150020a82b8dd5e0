//! CPF resolution and PIX/Boleto delivery.

use anyhow::Result;
use atende_billing::{Bill, BillingApi, BillingError, Customer, Service};
use atende_config::Config;
use chrono::{Datelike, NaiveDate};
use std::cmp::{Ordering, Reverse};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::classify::classify;
use crate::outbound::OutboundSender;
use crate::pix::PixCharge;
use crate::retry::RetryRunner;
use crate::state::{
    ConversationContext, ContextStore, DialogState, PaymentState, PaymentStateStore, PaymentStep,
};
use crate::texts;

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub product_type: String,
    /// Budget for lookups (client, services, bills).
    pub max_retries: u32,
    /// Budget for PIX generation and boleto rendering.
    pub payment_max_retries: u32,
    pub aftercare_delay: Duration,
}

impl PaymentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            product_type: config.billing.product_type.clone(),
            max_retries: config.retry.max_retries,
            payment_max_retries: config.retry.payment_max_retries,
            aftercare_delay: Duration::from_millis(config.pipeline.aftercare_delay_ms),
        }
    }
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum DueCategory {
    Overdue,
    CurrentMonth,
    Future,
    Undated,
}

fn categorize(due: Option<NaiveDate>, today: NaiveDate) -> DueCategory {
    match due {
        None => DueCategory::Undated,
        Some(date) if date < today => DueCategory::Overdue,
        Some(date) if date.year() == today.year() && date.month() == today.month() => {
            DueCategory::CurrentMonth
        }
        Some(_) => DueCategory::Future,
    }
}

/// Eligible bills in the order they should be offered: overdue first, then
/// those due this month, then later ones; most recent due date first within
/// each group. Bills without a readable due date come last.
pub fn prioritize_bills(bills: Vec<Bill>, today: NaiveDate) -> Vec<Bill> {
    let mut eligible: Vec<(DueCategory, Option<NaiveDate>, Bill)> = bills
        .into_iter()
        .filter(Bill::is_eligible)
        .map(|bill| {
            let due = bill.due_date();
            (categorize(due, today), due, bill)
        })
        .collect();
    eligible.sort_by(|a, b| match a.0.cmp(&b.0) {
        Ordering::Equal => Reverse(a.1).cmp(&Reverse(b.1)),
        other => other,
    });
    eligible.into_iter().map(|(_, _, bill)| bill).collect()
}

pub fn select_bill(bills: Vec<Bill>, today: NaiveDate) -> Option<Bill> {
    prioritize_bills(bills, today).into_iter().next()
}

fn pick_service(services: Vec<Service>) -> Option<Service> {
    let mut services = services.into_iter();
    let first = services.next()?;
    if first.active {
        return Some(first);
    }
    Some(services.find(|s| s.active).unwrap_or(first))
}

pub struct PaymentOrchestrator {
    billing: Arc<dyn BillingApi>,
    contexts: Arc<ContextStore>,
    payments: Arc<PaymentStateStore>,
    outbound: Arc<OutboundSender>,
    retry: RetryRunner,
    settings: PaymentSettings,
}

impl PaymentOrchestrator {
    pub fn new(
        billing: Arc<dyn BillingApi>,
        contexts: Arc<ContextStore>,
        payments: Arc<PaymentStateStore>,
        outbound: Arc<OutboundSender>,
        retry: RetryRunner,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            billing,
            contexts,
            payments,
            outbound,
            retry,
            settings,
        }
    }

    fn set_state(&self, chat_id: &str, state: DialogState) {
        self.contexts.set(chat_id, ConversationContext::at(state));
    }

    async fn report_failure(&self, chat_id: &str, err: &BillingError) -> Result<()> {
        let category = classify(err);
        warn!(
            chat_id = chat_id,
            category = category.as_str(),
            error = %err,
            "{}",
            category.log_line()
        );
        self.outbound.text(chat_id, category.user_message()).await?;
        Ok(())
    }

    /// Resolves a validated CPF down to a single payable bill and offers the
    /// payment options. Every outcome leaves the chat in a state the customer
    /// can continue from.
    pub async fn handle_cpf(&self, chat_id: &str, digits: &str) -> Result<()> {
        self.set_state(chat_id, DialogState::Payment(PaymentStep::ProcessingCpf));
        self.outbound.text(chat_id, texts::PROCESSING_CPF).await?;

        let customer = match self.lookup_customer(digits).await {
            Ok(Some(customer)) => customer,
            Ok(None) => {
                info!(chat_id = chat_id, "No customer for document");
                self.set_state(chat_id, DialogState::Payment(PaymentStep::WaitingCpf));
                self.outbound.text(chat_id, texts::CPF_NOT_FOUND).await?;
                return Ok(());
            }
            Err(err) => return self.abort_lookup(chat_id, &err).await,
        };

        let services = match self.list_services(&customer.id).await {
            Ok(services) => services,
            Err(err) => return self.abort_lookup(chat_id, &err).await,
        };
        let Some(service) = pick_service(services) else {
            return self.finish_without_bill(chat_id, texts::NO_SERVICES).await;
        };

        let bills = match self.list_bills(&customer.id, &service.id).await {
            Ok(bills) => bills,
            Err(err) => return self.abort_lookup(chat_id, &err).await,
        };
        if bills.is_empty() {
            return self.finish_without_bill(chat_id, texts::NO_BILLS).await;
        }

        let today = chrono::Local::now().date_naive();
        let Some((bill, bill_id)) =
            select_bill(bills, today).and_then(|bill| bill.id.clone().map(|id| (bill, id)))
        else {
            return self.finish_without_bill(chat_id, texts::NOTHING_DUE).await;
        };

        let client_name = display_name(&customer);
        info!(
            chat_id = chat_id,
            client_id = %customer.id,
            bill_id = %bill_id,
            "Bill selected for payment"
        );
        self.payments.set(
            chat_id,
            PaymentState {
                client_id: customer.id.clone(),
                service_id: service.id.clone(),
                bill_id,
                client_name: client_name.clone(),
            },
        );
        self.set_state(
            chat_id,
            DialogState::Payment(PaymentStep::WaitingPaymentOption),
        );

        let due = bill.due_date().map(|d| d.format("%d/%m/%Y").to_string());
        let amount = bill.formatted_amount();
        let first_name = customer.first_name();
        let greeting_name = if first_name.is_empty() {
            client_name.as_str()
        } else {
            first_name
        };
        self.outbound
            .text(
                chat_id,
                &texts::payment_options(greeting_name, due.as_deref(), amount.as_deref()),
            )
            .await?;
        Ok(())
    }

    async fn abort_lookup(&self, chat_id: &str, err: &BillingError) -> Result<()> {
        self.set_state(chat_id, DialogState::Payment(PaymentStep::WaitingCpf));
        self.report_failure(chat_id, err).await
    }

    async fn finish_without_bill(&self, chat_id: &str, text: &str) -> Result<()> {
        self.set_state(chat_id, DialogState::Main);
        self.outbound.text(chat_id, text).await?;
        Ok(())
    }

    async fn lookup_customer(&self, document: &str) -> Result<Option<Customer>, BillingError> {
        let billing = self.billing.clone();
        let document = document.to_string();
        self.retry
            .run("lookup_client", self.settings.max_retries, move || {
                let billing = billing.clone();
                let document = document.clone();
                async move { billing.lookup_client_by_document(&document).await }
            })
            .await
    }

    async fn list_services(&self, client_id: &str) -> Result<Vec<Service>, BillingError> {
        let billing = self.billing.clone();
        let client_id = client_id.to_string();
        self.retry
            .run("list_services", self.settings.max_retries, move || {
                let billing = billing.clone();
                let client_id = client_id.clone();
                async move { billing.list_services(&client_id).await }
            })
            .await
    }

    async fn list_bills(&self, client_id: &str, service_id: &str) -> Result<Vec<Bill>, BillingError> {
        let billing = self.billing.clone();
        let client_id = client_id.to_string();
        let service_id = service_id.to_string();
        let product_type = self.settings.product_type.clone();
        self.retry
            .run("list_bills", self.settings.max_retries, move || {
                let billing = billing.clone();
                let client_id = client_id.clone();
                let service_id = service_id.clone();
                let product_type = product_type.clone();
                async move {
                    billing
                        .list_bills(&client_id, &service_id, &product_type)
                        .await
                }
            })
            .await
    }

    /// Generates and delivers the PIX charge. The chat is only locked once
    /// something was actually delivered.
    pub async fn send_pix(&self, chat_id: &str, state: &PaymentState) -> Result<()> {
        let billing = self.billing.clone();
        let ids = state.clone();
        let response = self
            .retry
            .run("generate_pix", self.settings.payment_max_retries, move || {
                let billing = billing.clone();
                let ids = ids.clone();
                async move {
                    billing
                        .generate_pix_charge(&ids.client_id, &ids.service_id, &ids.bill_id)
                        .await
                }
            })
            .await;
        let response = match response {
            Ok(response) => response,
            Err(err) => return self.report_failure(chat_id, &err).await,
        };

        let charge = PixCharge::from_response(&response);
        let mut delivered = false;
        if charge.image_data_url.is_some() {
            match charge.image_bytes() {
                Some(bytes) => {
                    self.outbound
                        .image(chat_id, bytes, Some(texts::PIX_CAPTION))
                        .await?;
                    delivered = true;
                }
                None => warn!(chat_id = chat_id, "PIX image is not valid base64, skipping"),
            }
        }
        if let Some(payload) = charge.payload.as_deref() {
            self.outbound.text(chat_id, payload).await?;
            delivered = true;
        }
        if !delivered {
            warn!(
                chat_id = chat_id,
                bill_id = %state.bill_id,
                "PIX response carried neither payload nor image"
            );
            self.outbound.text(chat_id, texts::PIX_UNAVAILABLE).await?;
            return Ok(());
        }

        if !self.settings.aftercare_delay.is_zero() {
            tokio::time::sleep(self.settings.aftercare_delay).await;
        }
        self.outbound.text(chat_id, texts::AFTERCARE).await?;
        self.complete(chat_id, "pix");
        Ok(())
    }

    pub async fn send_boleto(&self, chat_id: &str, state: &PaymentState) -> Result<()> {
        let billing = self.billing.clone();
        let ids = state.clone();
        let pdf = self
            .retry
            .run("render_boleto", self.settings.payment_max_retries, move || {
                let billing = billing.clone();
                let ids = ids.clone();
                async move {
                    billing
                        .render_boleto_pdf(&ids.client_id, &ids.service_id, &ids.bill_id)
                        .await
                }
            })
            .await;
        let pdf = match pdf {
            Ok(pdf) => pdf,
            Err(err) => return self.report_failure(chat_id, &err).await,
        };

        let caption = texts::boleto_caption(&state.client_name);
        self.outbound
            .document(chat_id, pdf, texts::BOLETO_FILE_NAME, Some(&caption))
            .await?;
        self.complete(chat_id, "boleto");
        Ok(())
    }

    fn complete(&self, chat_id: &str, method: &str) {
        self.contexts.set(
            chat_id,
            ConversationContext::locked(DialogState::Payment(PaymentStep::PaymentSent)),
        );
        self.payments.delete(chat_id);
        info!(chat_id = chat_id, method = method, "Payment instructions delivered");
    }
}

fn display_name(customer: &Customer) -> String {
    let name = customer.name.trim();
    if name.is_empty() {
        "cliente".to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, MemoryBilling};
    use serde_json::json;

    fn bill(id: &str, due: &str) -> Bill {
        Bill {
            id: Some(id.to_string()),
            due_date: Some(due.to_string()),
            payment_date: None,
            status_text: "aberto".to_string(),
            amount: Some(99.9),
        }
    }

    fn ids(bills: &[Bill]) -> Vec<&str> {
        bills.iter().filter_map(|b| b.id.as_deref()).collect()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn overdue_then_current_month_then_future() {
        let today = date(2024, 5, 15);
        let ordered = prioritize_bills(
            vec![
                bill("next", "2024-06-15"),
                bill("today", "15/05/2024"),
                bill("yesterday", "2024-05-14"),
            ],
            today,
        );
        assert_eq!(ids(&ordered), vec!["yesterday", "today", "next"]);
    }

    #[test]
    fn most_recent_overdue_bill_first() {
        let today = date(2024, 5, 15);
        let ordered = prioritize_bills(
            vec![bill("march", "2024-03-10"), bill("april", "2024-04-10")],
            today,
        );
        assert_eq!(ids(&ordered), vec!["april", "march"]);
    }

    #[test]
    fn undated_bills_sort_last_and_settled_are_dropped() {
        let today = date(2024, 5, 15);
        let mut paid = bill("paid", "2024-05-01");
        paid.payment_date = Some("2024-05-02".to_string());
        let mut cancelled = bill("cancelled", "2024-05-01");
        cancelled.status_text = "Cancelled".to_string();
        let ordered = prioritize_bills(
            vec![
                bill("garbled", "soon"),
                paid,
                cancelled,
                bill("future", "2024-08-01"),
            ],
            today,
        );
        assert_eq!(ids(&ordered), vec!["future", "garbled"]);
    }

    #[test]
    fn active_service_preferred() {
        let service = |id: &str, active: bool| Service {
            id: id.to_string(),
            active,
            description: None,
        };
        let picked = pick_service(vec![service("a", false), service("b", true)]).unwrap();
        assert_eq!(picked.id, "b");
        let picked = pick_service(vec![service("a", false), service("c", false)]).unwrap();
        assert_eq!(picked.id, "a");
        assert!(pick_service(Vec::new()).is_none());
    }

    #[tokio::test]
    async fn handle_cpf_offers_payment_options() {
        let h = Harness::new(MemoryBilling::with_overdue_customer("11144477735", "Maria Souza"));
        h.orchestrator.handle_cpf("chat", "11144477735").await.unwrap();

        let ctx = h.context("chat");
        assert_eq!(
            ctx.state,
            DialogState::Payment(PaymentStep::WaitingPaymentOption)
        );
        let state = h.payments.get("chat").unwrap();
        assert_eq!(state.client_name, "Maria Souza");
        let sent = h.transport.texts_for("chat");
        assert_eq!(sent[0], texts::PROCESSING_CPF);
        assert!(sent[1].contains("Maria"));
    }

    #[tokio::test]
    async fn unknown_document_returns_to_waiting_cpf() {
        let h = Harness::new(MemoryBilling::new());
        h.orchestrator.handle_cpf("chat", "52998224725").await.unwrap();
        assert_eq!(
            h.context("chat").state,
            DialogState::Payment(PaymentStep::WaitingCpf)
        );
        assert_eq!(h.transport.texts_for("chat").last().unwrap(), texts::CPF_NOT_FOUND);
        assert_eq!(h.billing.lookup_calls(), 1);
    }

    #[tokio::test]
    async fn upstream_outage_is_retried_then_reported() {
        let billing = MemoryBilling::with_overdue_customer("11144477735", "Maria");
        billing.fail_with(BillingError::Network("connection refused".into()));
        let h = Harness::new(billing);
        h.orchestrator.handle_cpf("chat", "11144477735").await.unwrap();

        assert_eq!(h.billing.lookup_calls(), 4);
        let last = h.transport.texts_for("chat").pop().unwrap();
        assert!(last.contains("fora do ar"));
        assert_eq!(
            h.context("chat").state,
            DialogState::Payment(PaymentStep::WaitingCpf)
        );
    }

    #[tokio::test]
    async fn customer_without_open_bills_goes_back_to_main() {
        let billing = MemoryBilling::with_overdue_customer("11144477735", "Maria");
        billing.mark_all_paid();
        let h = Harness::new(billing);
        h.orchestrator.handle_cpf("chat", "11144477735").await.unwrap();
        assert_eq!(h.context("chat").state, DialogState::Main);
        assert_eq!(h.transport.texts_for("chat").last().unwrap(), texts::NOTHING_DUE);
        assert!(h.payments.get("chat").is_none());
    }

    #[tokio::test]
    async fn pix_delivers_image_and_payload_then_locks() {
        let billing = MemoryBilling::with_overdue_customer("11144477735", "Maria");
        billing.set_pix_response(json!({
            "data": { "qrcode": "000201pix", "imagemQrcode": "aGVsbG8=" }
        }));
        let h = Harness::new(billing);
        h.orchestrator.handle_cpf("chat", "11144477735").await.unwrap();
        let state = h.payments.get("chat").unwrap();
        h.orchestrator.send_pix("chat", &state).await.unwrap();

        assert_eq!(h.transport.images_for("chat"), vec![b"hello".to_vec()]);
        let sent = h.transport.texts_for("chat");
        assert!(sent.contains(&"000201pix".to_string()));
        assert_eq!(sent.last().unwrap(), texts::AFTERCARE);
        let ctx = h.context("chat");
        assert!(ctx.is_locked());
        assert!(h.payments.get("chat").is_none());
    }

    #[tokio::test]
    async fn empty_pix_response_does_not_lock() {
        let billing = MemoryBilling::with_overdue_customer("11144477735", "Maria");
        billing.set_pix_response(json!({ "status": "pending" }));
        let h = Harness::new(billing);
        h.orchestrator.handle_cpf("chat", "11144477735").await.unwrap();
        let state = h.payments.get("chat").unwrap();
        h.orchestrator.send_pix("chat", &state).await.unwrap();

        assert_eq!(h.transport.texts_for("chat").last().unwrap(), texts::PIX_UNAVAILABLE);
        assert!(!h.context("chat").is_locked());
        assert!(h.payments.get("chat").is_some());
    }

    #[tokio::test]
    async fn boleto_is_sent_as_document() {
        let h = Harness::new(MemoryBilling::with_overdue_customer("11144477735", "Maria"));
        h.orchestrator.handle_cpf("chat", "11144477735").await.unwrap();
        let state = h.payments.get("chat").unwrap();
        h.orchestrator.send_boleto("chat", &state).await.unwrap();

        let docs = h.transport.documents_for("chat");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].0, texts::BOLETO_FILE_NAME);
        assert_eq!(h.billing.boleto_calls(), 1);
        assert!(h.context("chat").is_locked());
    }
}
