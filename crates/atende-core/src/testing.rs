//! In-memory billing backend and chat transport, for tests and the console
//! demo.

use anyhow::Result;
use async_trait::async_trait;
use atende_billing::{Bill, BillingApi, BillingError, BillingResult, Customer, Service};
use base64::Engine;
use chrono::{Duration as ChronoDuration, Local};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::outbound::OutboundTransport;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub const DEMO_DOCUMENT: &str = "11144477735";

#[derive(Default)]
pub struct MemoryBilling {
    customers: Mutex<HashMap<String, Customer>>,
    services: Mutex<HashMap<String, Vec<Service>>>,
    bills: Mutex<HashMap<(String, String), Vec<Bill>>>,
    pix_response: Mutex<Option<Value>>,
    failure: Mutex<Option<BillingError>>,
    lookup_calls: AtomicU32,
    pix_calls: AtomicU32,
    boleto_calls: AtomicU32,
}

impl MemoryBilling {
    pub fn new() -> Self {
        Self::default()
    }

    /// One customer (`c1`) with one active service (`s1`), a bill ten days
    /// overdue (`b-overdue`) and one due in forty days (`b-future`).
    pub fn with_overdue_customer(document: &str, name: &str) -> Self {
        let billing = Self::new();
        let today = Local::now().date_naive();
        let due = |days: i64| (today + ChronoDuration::days(days)).format("%Y-%m-%d").to_string();
        billing.add_customer(
            document,
            Customer {
                id: "c1".to_string(),
                name: name.to_string(),
                document: Some(document.to_string()),
            },
            vec![Service {
                id: "s1".to_string(),
                active: true,
                description: Some("Fibra 300MB".to_string()),
            }],
            vec![
                Bill {
                    id: Some("b-future".to_string()),
                    due_date: Some(due(40)),
                    payment_date: None,
                    status_text: "aberto".to_string(),
                    amount: Some(99.9),
                },
                Bill {
                    id: Some("b-overdue".to_string()),
                    due_date: Some(due(-10)),
                    payment_date: None,
                    status_text: "vencido".to_string(),
                    amount: Some(99.9),
                },
            ],
        );
        billing
    }

    pub fn demo() -> Self {
        Self::with_overdue_customer(DEMO_DOCUMENT, "Cliente Demonstração")
    }

    pub fn add_customer(
        &self,
        document: &str,
        customer: Customer,
        services: Vec<Service>,
        bills: Vec<Bill>,
    ) {
        let client_id = customer.id.clone();
        let mut by_service = lock(&self.bills);
        for service in &services {
            by_service.insert((client_id.clone(), service.id.clone()), bills.clone());
        }
        lock(&self.services).insert(client_id, services);
        lock(&self.customers).insert(document.to_string(), customer);
    }

    /// Every following call fails with `err` until [`clear_failure`](Self::clear_failure).
    pub fn fail_with(&self, err: BillingError) {
        *lock(&self.failure) = Some(err);
    }

    pub fn clear_failure(&self) {
        *lock(&self.failure) = None;
    }

    pub fn mark_all_paid(&self) {
        for bills in lock(&self.bills).values_mut() {
            for bill in bills.iter_mut() {
                bill.payment_date = Some(Local::now().date_naive().to_string());
            }
        }
    }

    pub fn set_pix_response(&self, response: Value) {
        *lock(&self.pix_response) = Some(response);
    }

    pub fn lookup_calls(&self) -> u32 {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn pix_calls(&self) -> u32 {
        self.pix_calls.load(Ordering::SeqCst)
    }

    pub fn boleto_calls(&self) -> u32 {
        self.boleto_calls.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> BillingResult<()> {
        match lock(&self.failure).clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn default_pix_response(bill_id: &str) -> Value {
        let image = base64::engine::general_purpose::STANDARD.encode(b"\x89PNG\r\n\x1a\ndemo");
        json!({
            "qrcode": format!("00020126580014br.gov.bcb.pix0136{}5204000053039865802BR", bill_id),
            "imagemQrcode": image,
        })
    }
}

#[async_trait]
impl BillingApi for MemoryBilling {
    async fn lookup_client_by_document(&self, document: &str) -> BillingResult<Option<Customer>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(lock(&self.customers).get(document).cloned())
    }

    async fn list_services(&self, client_id: &str) -> BillingResult<Vec<Service>> {
        self.check_failure()?;
        Ok(lock(&self.services)
            .get(client_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_bills(
        &self,
        client_id: &str,
        service_id: &str,
        _product_type: &str,
    ) -> BillingResult<Vec<Bill>> {
        self.check_failure()?;
        Ok(lock(&self.bills)
            .get(&(client_id.to_string(), service_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn generate_pix_charge(
        &self,
        _client_id: &str,
        _service_id: &str,
        bill_id: &str,
    ) -> BillingResult<Value> {
        self.pix_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(lock(&self.pix_response)
            .clone()
            .unwrap_or_else(|| Self::default_pix_response(bill_id)))
    }

    async fn render_boleto_pdf(
        &self,
        _client_id: &str,
        _service_id: &str,
        bill_id: &str,
    ) -> BillingResult<Vec<u8>> {
        self.boleto_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(format!("%PDF-1.4\n% boleto {}\n%%EOF\n", bill_id).into_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryKind {
    Text(String),
    Image {
        bytes: Vec<u8>,
        caption: Option<String>,
    },
    Document {
        file_name: String,
        bytes: Vec<u8>,
        caption: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub chat_id: String,
    pub kind: DeliveryKind,
}

/// Records every send instead of delivering it.
#[derive(Default)]
pub struct MemoryTransport {
    deliveries: Mutex<Vec<Delivery>>,
    failing: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every send fails.
    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        lock(&self.deliveries).clone()
    }

    pub fn texts_for(&self, chat_id: &str) -> Vec<String> {
        self.for_chat(chat_id, |kind| match kind {
            DeliveryKind::Text(text) => Some(text.clone()),
            _ => None,
        })
    }

    pub fn images_for(&self, chat_id: &str) -> Vec<Vec<u8>> {
        self.for_chat(chat_id, |kind| match kind {
            DeliveryKind::Image { bytes, .. } => Some(bytes.clone()),
            _ => None,
        })
    }

    pub fn documents_for(&self, chat_id: &str) -> Vec<(String, Vec<u8>)> {
        self.for_chat(chat_id, |kind| match kind {
            DeliveryKind::Document {
                file_name, bytes, ..
            } => Some((file_name.clone(), bytes.clone())),
            _ => None,
        })
    }

    fn for_chat<T>(&self, chat_id: &str, pick: impl Fn(&DeliveryKind) -> Option<T>) -> Vec<T> {
        lock(&self.deliveries)
            .iter()
            .filter(|d| d.chat_id == chat_id)
            .filter_map(|d| pick(&d.kind))
            .collect()
    }

    fn record(&self, chat_id: &str, kind: DeliveryKind) -> Result<String> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("transport disconnected");
        }
        let id = uuid::Uuid::new_v4().to_string();
        lock(&self.deliveries).push(Delivery {
            id: id.clone(),
            chat_id: chat_id.to_string(),
            kind,
        });
        Ok(id)
    }
}

#[async_trait]
impl OutboundTransport for MemoryTransport {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<String> {
        self.record(chat_id, DeliveryKind::Text(text.to_string()))
    }

    async fn send_image(
        &self,
        chat_id: &str,
        bytes: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<String> {
        self.record(
            chat_id,
            DeliveryKind::Image {
                bytes,
                caption: caption.map(str::to_string),
            },
        )
    }

    async fn send_document(
        &self,
        chat_id: &str,
        bytes: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> Result<String> {
        self.record(
            chat_id,
            DeliveryKind::Document {
                file_name: file_name.to_string(),
                bytes,
                caption: caption.map(str::to_string),
            },
        )
    }
}

#[cfg(test)]
pub(crate) use harness::Harness;


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_customer_is_found_by_document() {
        let billing = MemoryBilling::demo();
        let customer = billing
            .lookup_client_by_document(DEMO_DOCUMENT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(customer.id, "c1");
        assert_eq!(billing.list_services("c1").await.unwrap().len(), 1);
        assert_eq!(
            billing.list_bills("c1", "s1", "internet").await.unwrap().len(),
            2
        );
        assert!(billing
            .lookup_client_by_document("00000000000")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn injected_failure_applies_until_cleared() {
        let billing = MemoryBilling::demo();
        billing.fail_with(BillingError::Timeout("slow".into()));
        assert!(billing.list_services("c1").await.is_err());
        billing.clear_failure();
        assert!(billing.list_services("c1").await.is_ok());
    }

    #[tokio::test]
    async fn failing_transport_records_nothing() {
        let transport = MemoryTransport::new();
        transport.fail_sends(true);
        assert!(transport.send_text("chat", "oi").await.is_err());
        transport.fail_sends(false);
        transport.send_text("chat", "oi").await.unwrap();
        assert_eq!(transport.deliveries().len(), 1);
    }
}
