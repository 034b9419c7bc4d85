//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the gateway API key) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`. Every field has a
//! default matching the production values, so a partial file works.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub betting: BettingConfig,
    pub rates: RatesConfig,
    pub deposits: DepositsConfig,
    pub withdrawals: WithdrawalsConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub database_path: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "DUELBOOK-001".to_string(),
            database_path: "duelbook.db".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BettingConfig {
    /// Smallest accepted bet, in GP.
    pub min_bet_gp: i64,
    /// Largest accepted bet, in GP.
    pub max_bet_gp: i64,
    /// Betting window from round open to automatic close.
    pub window_secs: u64,
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            min_bet_gp: 1_000_000,
            max_bet_gp: 1_000_000_000,
            window_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RatesConfig {
    /// USD price of 1M GP on deposit.
    pub usd_per_million_gp: f64,
    /// USD the withdrawal rate subtracts from the face price per 1M GP.
    pub withdrawal_spread: f64,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            usd_per_million_gp: 0.15,
            withdrawal_spread: 0.015,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DepositsConfig {
    pub min_usd: f64,
    pub max_usd: f64,
    /// Reconciler poll interval.
    pub poll_interval_secs: u64,
    /// Only `pending` invoices younger than this are polled; older ones
    /// transition to `expired` and are never credited.
    pub lookback_hours: i64,
    /// Pause between per-invoice gateway queries (rate limiting).
    pub per_payment_delay_ms: u64,
}

impl Default for DepositsConfig {
    fn default() -> Self {
        Self {
            min_usd: 5.0,
            max_usd: 10_000.0,
            poll_interval_secs: 30,
            lookback_hours: 24,
            per_payment_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WithdrawalsConfig {
    pub min_usd: f64,
    pub max_usd: f64,
    /// Minimum ETH the operator wallet must hold to cover ERC20 gas.
    pub min_eth_for_gas: f64,
}

impl Default for WithdrawalsConfig {
    fn default() -> Self {
        Self {
            min_usd: 10.0,
            max_usd: 5_000.0,
            min_eth_for_gas: 0.00001,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    /// Env var holding the gateway API key. Unset key disables the
    /// crypto desks (deposits and withdrawals).
    pub api_key_env: String,
    pub base_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key_env: "PLISIO_API_KEY".to_string(),
            base_url: "https://plisio.net/api/v1".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.betting.min_bet_gp, 1_000_000);
        assert_eq!(cfg.betting.max_bet_gp, 1_000_000_000);
        assert_eq!(cfg.betting.window_secs, 30);
        assert_eq!(cfg.rates.usd_per_million_gp, 0.15);
        assert_eq!(cfg.deposits.lookback_hours, 24);
        assert_eq!(cfg.withdrawals.min_usd, 10.0);
        assert_eq!(cfg.gateway.api_key_env, "PLISIO_API_KEY");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [betting]
            window_secs = 60

            [deposits]
            min_usd = 20.0
            "#,
        )
        .unwrap();

        assert_eq!(cfg.betting.window_secs, 60);
        assert_eq!(cfg.betting.min_bet_gp, 1_000_000);
        assert_eq!(cfg.deposits.min_usd, 20.0);
        assert_eq!(cfg.deposits.max_usd, 10_000.0);
    }
}
