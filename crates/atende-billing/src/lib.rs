//! Atende Billing
//!
//! Client for the ISP billing backend: customer lookup by document, service
//! and bill listing, PIX charge generation and boleto PDF rendering

mod http;
mod model;

pub use http::HttpBillingClient;
pub use model::{Bill, Customer, Service};

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BillingError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("HTTP {status} at {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },
    #[error("invalid billing response: {0}")]
    Decode(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BillingError::Network(_) | BillingError::Timeout(_) => true,
            BillingError::Http { status, .. } => matches!(*status, 408 | 429) || *status >= 500,
            BillingError::Decode(_) | BillingError::Internal(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            BillingError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type BillingResult<T> = std::result::Result<T, BillingError>;

#[async_trait::async_trait]
pub trait BillingApi: Send + Sync {
    /// `Ok(None)` when no customer holds the document.
    async fn lookup_client_by_document(&self, document: &str) -> BillingResult<Option<Customer>>;

    async fn list_services(&self, client_id: &str) -> BillingResult<Vec<Service>>;

    async fn list_bills(
        &self,
        client_id: &str,
        service_id: &str,
        product_type: &str,
    ) -> BillingResult<Vec<Bill>>;

    /// Raw vendor response; field names vary between backend versions.
    async fn generate_pix_charge(
        &self,
        client_id: &str,
        service_id: &str,
        bill_id: &str,
    ) -> BillingResult<serde_json::Value>;

    async fn render_boleto_pdf(
        &self,
        client_id: &str,
        service_id: &str,
        bill_id: &str,
    ) -> BillingResult<Vec<u8>>;
}
