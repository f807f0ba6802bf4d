//! Chain client: the only code that talks to the escrow contract

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Parameters of an escrow lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowCreate {
    pub buyer_address: String,
    pub worker_address: String,
    pub amount: Decimal,
    /// Job reference key, stored on the escrow object
    pub reference_key: String,
}

/// A confirmed escrow object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowLock {
    pub object_id: String,
    pub tx_digest: String,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Lock funds; returns the new escrow object and its transaction
    async fn submit_escrow_create(&self, request: &EscrowCreate) -> Result<EscrowLock, ChainError>;

    /// Pay the escrow out to the worker; returns the transaction digest
    async fn submit_escrow_release(&self, object_id: &str) -> Result<String, ChainError>;

    /// Return the escrow to the buyer; returns the transaction digest
    async fn submit_escrow_refund(&self, object_id: &str) -> Result<String, ChainError>;

    /// Escrow previously created for `reference_key`, if the chain has one
    async fn find_escrow_by_reference(
        &self,
        reference_key: &str,
    ) -> Result<Option<EscrowLock>, ChainError>;
}

/// `0x` followed by 1 to 64 hex digits
pub fn is_valid_address(address: &str) -> bool {
    match address.strip_prefix("0x") {
        Some(hex) => !hex.is_empty() && hex.len() <= 64 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Chain section of the service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Base URL of the transaction gateway
    pub gateway_url: String,
    /// Escrow contract (package) address
    pub contract_address: String,
    pub timeout_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://localhost:9100".to_string(),
            contract_address: "0x0".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl ChainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// [`ChainClient`] over a JSON transaction gateway
pub struct HttpChainClient {
    config: ChainConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CreateBody<'a> {
    contract: &'a str,
    buyer: &'a str,
    worker: &'a str,
    amount: Decimal,
    reference_key: &'a str,
}

#[derive(Serialize)]
struct SettleBody<'a> {
    contract: &'a str,
    object_id: &'a str,
}

#[derive(Deserialize)]
struct TxResponse {
    tx_digest: String,
}

#[derive(Deserialize)]
struct GatewayError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl HttpChainClient {
    pub fn new(config: ChainConfig) -> Result<Self, ChainError> {
        if !is_valid_address(&config.contract_address) {
            return Err(ChainError::InvalidConfig(format!(
                "contract address '{}'",
                config.contract_address
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ChainError::InvalidConfig(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.gateway_url.trim_end_matches('/'), path)
    }

    async fn post<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ChainError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(gateway_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ChainError::Transport(format!("bad gateway response: {}", e)))
    }
}

async fn gateway_error(response: reqwest::Response) -> ChainError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let parsed: Option<GatewayError> = serde_json::from_str(&body).ok();
    match parsed {
        Some(err) if err.code == "insufficient_funds" => ChainError::InsufficientFunds(err.message),
        Some(err) if err.code == "invalid_address" => ChainError::InvalidAddress(err.message),
        Some(err) if status.is_client_error() => {
            ChainError::Rejected(format!("{}: {}", err.code, err.message))
        }
        _ => ChainError::Transport(format!("HTTP {}: {}", status, body)),
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn submit_escrow_create(&self, request: &EscrowCreate) -> Result<EscrowLock, ChainError> {
        let body = CreateBody {
            contract: &self.config.contract_address,
            buyer: &request.buyer_address,
            worker: &request.worker_address,
            amount: request.amount,
            reference_key: &request.reference_key,
        };
        self.post("/escrow/create", &body).await
    }

    async fn submit_escrow_release(&self, object_id: &str) -> Result<String, ChainError> {
        let body = SettleBody {
            contract: &self.config.contract_address,
            object_id,
        };
        let tx: TxResponse = self.post("/escrow/release", &body).await?;
        Ok(tx.tx_digest)
    }

    async fn submit_escrow_refund(&self, object_id: &str) -> Result<String, ChainError> {
        let body = SettleBody {
            contract: &self.config.contract_address,
            object_id,
        };
        let tx: TxResponse = self.post("/escrow/refund", &body).await?;
        Ok(tx.tx_digest)
    }

    async fn find_escrow_by_reference(
        &self,
        reference_key: &str,
    ) -> Result<Option<EscrowLock>, ChainError> {
        let response = self
            .client
            .get(self.url(&format!("/escrow/by-reference/{}", reference_key)))
            .query(&[("contract", self.config.contract_address.as_str())])
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(gateway_error(response).await);
        }
        let lock = response
            .json()
            .await
            .map_err(|e| ChainError::Transport(format!("bad gateway response: {}", e)))?;
        Ok(Some(lock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address("0x2"));
        assert!(is_valid_address(&format!("0x{}", "a".repeat(64))));
        assert!(!is_valid_address("0x"));
        assert!(!is_valid_address("2a"));
        assert!(!is_valid_address("0xzz"));
        assert!(!is_valid_address(&format!("0x{}", "a".repeat(65))));
    }

    #[test]
    fn test_client_rejects_bad_contract_address() {
        let config = ChainConfig {
            contract_address: "not-an-address".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            HttpChainClient::new(config),
            Err(ChainError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = HttpChainClient::new(ChainConfig {
            gateway_url: "http://gateway:9100/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.url("/escrow/create"), "http://gateway:9100/escrow/create");
    }
}
