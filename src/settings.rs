//! Runtime configuration
//!
//! Loaded from an optional `escrow` config file merged with
//! `ESCROW_`-prefixed environment variables.

use serde::Deserialize;

use crate::EscrowResult;
use crate::error::EscrowError;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Directory holding the JSON ledger files
    pub data_dir: String,
    /// Chain observer JSON-RPC endpoint
    pub rpc_url: String,
    /// Platform fee in basis points
    pub fee_bps: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            rpc_url: "https://api.devnet.solana.com".to_string(),
            fee_bps: 250,
        }
    }
}

impl Settings {
    /// Load settings: defaults, then `escrow.{toml,yaml,json}` if present,
    /// then `ESCROW_*` environment overrides.
    pub fn load() -> EscrowResult<Self> {
        let defaults = Self::default();
        config::Config::builder()
            .set_default("data_dir", defaults.data_dir)
            .and_then(|b| b.set_default("rpc_url", defaults.rpc_url))
            .and_then(|b| b.set_default("fee_bps", defaults.fee_bps as i64))
            .map_err(|e| EscrowError::config(e.to_string()))?
            .add_source(config::File::with_name("escrow").required(false))
            .add_source(config::Environment::with_prefix("ESCROW"))
            .build()
            .map_err(|e| EscrowError::config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| EscrowError::config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_without_config_file() {
        let settings = Settings::load().unwrap();
        assert_eq!(settings.fee_bps, 250);
        assert!(!settings.data_dir.is_empty());
    }
}
