use crate::{Bill, BillingApi, BillingError, BillingResult, Customer, Service};
use reqwest::{Client, ClientBuilder, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const LIST_ENVELOPE_KEYS: &[&str] = &["data", "registros", "items", "results"];

pub struct HttpBillingClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBillingClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        request_timeout: Duration,
    ) -> BillingResult<Self> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BillingError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> BillingResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, url))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(BillingError::Http {
            status: status.as_u16(),
            url: url.to_string(),
            body: truncate_for_error(&body, 300),
        })
    }

    async fn get_json(&self, url: &str) -> BillingResult<Value> {
        let response = self.send(self.client.get(url), url).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| map_reqwest_error(e, url))
    }
}

#[async_trait::async_trait]
impl BillingApi for HttpBillingClient {
    async fn lookup_client_by_document(&self, document: &str) -> BillingResult<Option<Customer>> {
        let url = self.url("clients");
        let request = self.client.get(&url).query(&[("document", document)]);
        let value = match self.send(request, &url).await {
            Ok(response) => response
                .json::<Value>()
                .await
                .map_err(|e| map_reqwest_error(e, &url))?,
            Err(BillingError::Http { status: 404, .. }) => return Ok(None),
            Err(err) => return Err(err),
        };

        let customers: Vec<Customer> = decode_list(value, &url)?;
        debug!(url = %url, matches = customers.len(), "Client lookup finished");
        Ok(customers.into_iter().next())
    }

    async fn list_services(&self, client_id: &str) -> BillingResult<Vec<Service>> {
        let url = self.url(&format!("clients/{}/services", client_id));
        let value = self.get_json(&url).await?;
        decode_list(value, &url)
    }

    async fn list_bills(
        &self,
        client_id: &str,
        service_id: &str,
        product_type: &str,
    ) -> BillingResult<Vec<Bill>> {
        let url = self.url(&format!("clients/{}/services/{}/bills", client_id, service_id));
        let request = self.client.get(&url).query(&[("product", product_type)]);
        let response = self.send(request, &url).await?;
        let value = response
            .json::<Value>()
            .await
            .map_err(|e| map_reqwest_error(e, &url))?;
        decode_list(value, &url)
    }

    async fn generate_pix_charge(
        &self,
        client_id: &str,
        service_id: &str,
        bill_id: &str,
    ) -> BillingResult<Value> {
        let url = self.url(&format!("bills/{}/pix", bill_id));
        let body = serde_json::json!({
            "client_id": client_id,
            "service_id": service_id,
        });
        let response = self.send(self.client.post(&url).json(&body), &url).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| map_reqwest_error(e, &url))
    }

    async fn render_boleto_pdf(
        &self,
        client_id: &str,
        service_id: &str,
        bill_id: &str,
    ) -> BillingResult<Vec<u8>> {
        let url = self.url(&format!("bills/{}/boleto", bill_id));
        let request = self
            .client
            .get(&url)
            .query(&[("client_id", client_id), ("service_id", service_id)]);
        let response = self.send(request, &url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, &url))?;

        if !bytes.starts_with(b"%PDF") {
            return Err(BillingError::Decode(format!(
                "boleto at {} is not a PDF ({} bytes)",
                url,
                bytes.len()
            )));
        }
        Ok(bytes.to_vec())
    }
}

fn map_reqwest_error(err: reqwest::Error, url: &str) -> BillingError {
    if err.is_timeout() {
        BillingError::Timeout(format!("{} ({})", url, err))
    } else if err.is_connect() || err.is_request() {
        BillingError::Network(format!("{} ({})", url, err))
    } else if err.is_decode() {
        BillingError::Decode(format!("{} ({})", url, err))
    } else {
        BillingError::Internal(format!("{} ({})", url, err))
    }
}

/// Unwraps list responses that come either bare or inside a common envelope.
fn list_items(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => LIST_ENVELOPE_KEYS
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            }),
        Value::Null => Some(Vec::new()),
        _ => None,
    }
}

fn decode_list<T: DeserializeOwned>(value: Value, url: &str) -> BillingResult<Vec<T>> {
    let items = list_items(value)
        .ok_or_else(|| BillingError::Decode(format!("expected a list at {}", url)))?;
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| BillingError::Decode(format!("{}: {}", url, e)))
        })
        .collect()
}

fn truncate_for_error(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}
