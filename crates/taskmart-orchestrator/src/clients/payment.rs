//! Payment provider: invoice issuance and status

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    #[serde(alias = "settled")]
    Paid,
    #[serde(alias = "cancelled")]
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: String,
    /// What the buyer pays against (payment link or request string)
    #[serde(default)]
    pub payment_request: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment provider timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("payment provider unreachable: {0}")]
    Transport(String),

    #[error("invoice {0} not found")]
    NotFound(String),

    #[error("payment provider rejected request: {0}")]
    Rejected(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl PaymentError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Issue an invoice for `amount`, tagged with the job's reference key
    async fn create_invoice(
        &self,
        reference_key: &str,
        amount: Decimal,
        memo: &str,
    ) -> Result<Invoice, PaymentError>;

    async fn invoice_status(&self, invoice_id: &str) -> Result<InvoiceStatus, PaymentError>;
}

/// Payment section of the service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9200".to_string(),
            api_key: None,
            timeout_ms: 10_000,
        }
    }
}

pub struct HttpPaymentProvider {
    config: PaymentConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CreateInvoiceBody<'a> {
    amount: Decimal,
    reference_key: &'a str,
    memo: &'a str,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: InvoiceStatus,
}

impl HttpPaymentProvider {
    pub fn new(config: PaymentConfig) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PaymentError::InvalidConfig(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn transport(&self, e: reqwest::Error) -> PaymentError {
        if e.is_timeout() {
            PaymentError::Timeout {
                timeout_ms: self.config.timeout_ms,
            }
        } else {
            PaymentError::Transport(e.to_string())
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn create_invoice(
        &self,
        reference_key: &str,
        amount: Decimal,
        memo: &str,
    ) -> Result<Invoice, PaymentError> {
        let body = CreateInvoiceBody {
            amount,
            reference_key,
            memo,
        };
        let response = self
            .request(self.client.post(self.url("/invoices")))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                PaymentError::Transport(format!("HTTP {}: {}", status, body))
            } else {
                PaymentError::Rejected(format!("HTTP {}: {}", status, body))
            });
        }

        response
            .json()
            .await
            .map_err(|e| PaymentError::Transport(format!("bad invoice response: {}", e)))
    }

    async fn invoice_status(&self, invoice_id: &str) -> Result<InvoiceStatus, PaymentError> {
        let response = self
            .request(self.client.get(self.url(&format!("/invoices/{}", invoice_id))))
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PaymentError::NotFound(invoice_id.to_string()));
        }
        if !status.is_success() {
            return Err(PaymentError::Transport(format!("HTTP {}", status)));
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Transport(format!("bad status response: {}", e)))?;
        Ok(body.status)
    }
}
