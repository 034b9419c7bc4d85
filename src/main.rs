//! DUELBOOK — Wagering Ledger & Settlement Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the SQLite store, and runs the two background loops — the
//! round countdown and the crypto payment reconciler — with graceful
//! shutdown. Round lifecycle triggers and bet requests arrive through
//! the library API from the hosting integration.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use duelbook::config;
use duelbook::engine::deposits::DepositDesk;
use duelbook::engine::rounds::RoundEngine;
use duelbook::engine::withdrawals::WithdrawalDesk;
use duelbook::gateway::plisio::PlisioClient;
use duelbook::gateway::PaymentGateway;
use duelbook::notify::LogNotifier;
use duelbook::storage::Store;
use duelbook::types::Rates;

const BANNER: &str = r#"
 ____  _   _ _____ _     ____   ___   ___  _  __
|  _ \| | | | ____| |   | __ ) / _ \ / _ \| |/ /
| | | | | | |  _| | |   |  _ \| | | | | | | ' /
| |_| | |_| | |___| |___| |_) | |_| | |_| | . \
|____/ \___/|_____|_____|____/ \___/ \___/|_|\_\

  Wagering Ledger & Settlement Engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = config::AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        service_name = %cfg.service.name,
        database = %cfg.service.database_path,
        betting_window_secs = cfg.betting.window_secs,
        poll_interval_secs = cfg.deposits.poll_interval_secs,
        "DUELBOOK starting up"
    );

    // -- Initialise components -------------------------------------------

    let store = Store::open(&cfg.service.database_path)
        .await
        .context("Failed to open store")?;

    let notifier = Arc::new(LogNotifier);

    let rates = Rates::new(
        Decimal::from_f64_retain(cfg.rates.usd_per_million_gp)
            .context("Invalid usd_per_million_gp in config")?,
        Decimal::from_f64_retain(cfg.rates.withdrawal_spread)
            .context("Invalid withdrawal_spread in config")?,
    )?;

    let engine = RoundEngine::new(store.clone(), notifier.clone(), &cfg.betting);

    // Crypto desks run only when the gateway key is configured.
    let api_key = std::env::var(&cfg.gateway.api_key_env)
        .ok()
        .filter(|key| !key.is_empty());

    let deposits = match api_key {
        Some(key) => {
            let gateway: Arc<dyn PaymentGateway> = Arc::new(PlisioClient::new(
                SecretString::new(key),
                Some(cfg.gateway.base_url.clone()),
            )?);
            info!(gateway = gateway.name(), "Payment gateway configured");

            let withdrawals = WithdrawalDesk::new(
                store.clone(),
                gateway.clone(),
                notifier.clone(),
                rates,
                &cfg.withdrawals,
            )?;
            let failed = withdrawals.failed_withdrawals().await?;
            if !failed.is_empty() {
                warn!(
                    count = failed.len(),
                    "Withdrawals awaiting manual remediation"
                );
            }

            Some(DepositDesk::new(
                store.clone(),
                gateway,
                notifier.clone(),
                rates,
                &cfg.deposits,
            )?)
        }
        None => {
            warn!(
                env = %cfg.gateway.api_key_env,
                "No gateway API key — crypto deposits and withdrawals disabled"
            );
            None
        }
    };

    // -- Main loop -------------------------------------------------------

    let mut countdown = tokio::time::interval(Duration::from_secs(1));
    let mut reconcile =
        tokio::time::interval(Duration::from_secs(cfg.deposits.poll_interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Entering main loop. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = countdown.tick() => {
                match engine.tick().await {
                    Ok(Some(round_id)) => info!(round_id, "Betting window closed"),
                    Ok(None) => {}
                    Err(e) => error!(error = %e, "Countdown tick failed"),
                }
            }
            _ = reconcile.tick(), if deposits.is_some() => {
                if let Some(desk) = &deposits {
                    match desk.run_cycle().await {
                        Ok(report) if report.checked > 0 || report.expired > 0 => {
                            info!(
                                checked = report.checked,
                                completed = report.completed,
                                expired = report.expired,
                                "Reconcile cycle complete"
                            );
                        }
                        Ok(_) => {}
                        // The loop is supervised: a failed cycle is logged
                        // and retried on the next tick, never fatal.
                        Err(e) => error!(error = %e, "Reconcile cycle failed — continuing"),
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    if let Some(snapshot) = engine.snapshot().await {
        warn!(
            round_id = %snapshot.round_id,
            bets = snapshot.bets.len(),
            "Shutting down with an active round; restart voids it"
        );
    }
    info!("DUELBOOK shut down cleanly.");

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("duelbook=info"));

    let json_logging = std::env::var("DUELBOOK_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
