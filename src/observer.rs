//! Chain observer - external collaborator reporting escrow address balances
//!
//! The core never polls the chain itself; it asks this seam whether an
//! address holds at least the requested balance. Only native SOL balance
//! checking is implemented; token-account lookups are a separate
//! collaborator that is not wired in yet.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::EscrowResult;
use crate::error::EscrowError;
use crate::models::Currency;

/// Balance oracle for escrow addresses
#[async_trait]
pub trait ChainObserver: Send + Sync {
    /// Observed balance of `address` in minor units of `currency`
    async fn observe_balance(&self, address: &str, currency: Currency) -> EscrowResult<u64>;
}

/// Configuration for the JSON-RPC observer
#[derive(Debug, Clone)]
pub struct RpcObserverConfig {
    /// Solana-style JSON-RPC endpoint
    pub rpc_url: String,
}

impl Default for RpcObserverConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.devnet.solana.com".to_string(),
        }
    }
}

/// Observer backed by a Solana-style `getBalance` JSON-RPC call
pub struct RpcChainObserver {
    config: RpcObserverConfig,
    client: reqwest::Client,
}

impl RpcChainObserver {
    pub fn new(config: RpcObserverConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChainObserver for RpcChainObserver {
    async fn observe_balance(&self, address: &str, currency: Currency) -> EscrowResult<u64> {
        if !currency.native_observable() {
            return Err(EscrowError::unsupported_operation(format!(
                "balance checking for {currency} requires a token-account observer"
            )));
        }

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBalance",
            "params": [address],
        });

        let response = self
            .client
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EscrowError::observer(format!("getBalance request failed: {e}")))?;

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EscrowError::observer(format!("getBalance response malformed: {e}")))?;

        if let Some(err) = payload.get("error") {
            return Err(EscrowError::observer(format!("getBalance rpc error: {err}")));
        }

        let lamports = payload
            .pointer("/result/value")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| EscrowError::observer("getBalance result missing value"))?;

        debug!("observed {} lamports at {}", lamports, address);

        Ok(lamports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_non_native_currency_is_rejected() {
        let observer = RpcChainObserver::new(RpcObserverConfig::default());

        let result = observer.observe_balance("some-address", Currency::Usdc).await;
        assert!(matches!(result, Err(EscrowError::UnsupportedOperation(_))));
    }
}
