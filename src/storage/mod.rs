//! Persistence layer — the durable side of the Balance Ledger.
//!
//! SQLite via `sqlx`. Owns users (balance + rakeback bucket), the
//! append-only ledger, bet history, outcome stats, and the crypto
//! payment/withdrawal records. Every balance mutation and its ledger
//! entry commit in a single transaction, so a crash leaves either the
//! pre- or post-state, never a half-applied pair.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::error::EngineResult;
use crate::types::{
    BetOutcome, BetRecord, CryptoPayment, CryptoWithdrawal, LedgerEntry, LedgerReason,
    PaymentStatus, Side, Stats, User, UserBetStats, WithdrawalStatus,
};

/// Outcome ring length kept in the stats row.
const LAST_WINNERS_CAP: usize = 50;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    display_name TEXT,
    balance INTEGER NOT NULL DEFAULT 0,
    rakeback_unclaimed INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS ledger_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    delta INTEGER NOT NULL,
    reason TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id)
);
CREATE INDEX IF NOT EXISTS idx_ledger_user ON ledger_entries(user_id);

CREATE TABLE IF NOT EXISTS bet_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    round_id TEXT NOT NULL,
    side TEXT NOT NULL,
    amount INTEGER NOT NULL,
    outcome TEXT NOT NULL,
    payout INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id)
);
CREATE INDEX IF NOT EXISTS idx_bet_user ON bet_history(user_id);
CREATE INDEX IF NOT EXISTS idx_bet_round ON bet_history(round_id);

CREATE TABLE IF NOT EXISTS stats (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    red_streak INTEGER NOT NULL DEFAULT 0,
    blue_streak INTEGER NOT NULL DEFAULT 0,
    last_winner TEXT
);

CREATE TABLE IF NOT EXISTS last_winners (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    winners TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS crypto_payments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    txn_id TEXT UNIQUE NOT NULL,
    user_id TEXT NOT NULL,
    amount_usd REAL NOT NULL,
    amount_gp INTEGER NOT NULL,
    currency TEXT NOT NULL DEFAULT 'USDT',
    wallet_hash TEXT,
    invoice_url TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at INTEGER NOT NULL,
    confirmed_at INTEGER,
    FOREIGN KEY (user_id) REFERENCES users(id)
);
CREATE INDEX IF NOT EXISTS idx_crypto_user ON crypto_payments(user_id);
CREATE INDEX IF NOT EXISTS idx_crypto_status ON crypto_payments(status);

CREATE TABLE IF NOT EXISTS crypto_withdrawals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    withdrawal_id TEXT UNIQUE NOT NULL,
    user_id TEXT NOT NULL,
    amount_gp INTEGER NOT NULL,
    amount_usd REAL NOT NULL,
    currency TEXT NOT NULL DEFAULT 'USDT',
    address TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    txn_hash TEXT,
    created_at INTEGER NOT NULL,
    processed_at INTEGER,
    FOREIGN KEY (user_id) REFERENCES users(id)
);
CREATE INDEX IF NOT EXISTS idx_withdrawal_user ON crypto_withdrawals(user_id);
CREATE INDEX IF NOT EXISTS idx_withdrawal_status ON crypto_withdrawals(status);

INSERT OR IGNORE INTO stats (id, red_streak, blue_streak, last_winner) VALUES (1, 0, 0, NULL);
INSERT OR IGNORE INTO last_winners (id, winners) VALUES (1, '[]');
"#;

/// Handle to the SQLite store. Cheap to clone; all methods take `&self`.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `path` in WAL mode.
    pub async fn open(path: &str) -> EngineResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(false)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        debug!(path, "Store opened");
        Ok(store)
    }

    /// Open an in-memory database (tests). Single connection so the
    /// whole pool sees the same memory database.
    pub async fn open_in_memory() -> EngineResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?
            .foreign_keys(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> EngineResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    // -- Users & balances ------------------------------------------------

    /// Idempotent user creation. Refreshes the display name if it changed.
    pub async fn get_or_create_user(
        &self,
        user_id: &str,
        display_name: Option<&str>,
    ) -> EngineResult<User> {
        let mut tx = self.pool.begin().await?;
        ensure_user(&mut tx, user_id, display_name).await?;
        let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        user_from_row(&row)
    }

    /// Current balance; zero for users not yet created.
    pub async fn balance_of(&self, user_id: &str) -> EngineResult<i64> {
        let row = sqlx::query("SELECT balance FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("balance")).unwrap_or(0))
    }

    /// Atomically apply `delta` to a user's balance, clamping the result
    /// at zero, and append the matching ledger entry. Returns the new
    /// balance, which callers must treat as authoritative.
    ///
    /// The ledger entry records the *applied* delta, so replaying the
    /// ledger reproduces the stored balance even when a clamp fired.
    pub async fn adjust_balance(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        delta: i64,
        reason: LedgerReason,
    ) -> EngineResult<i64> {
        let mut tx = self.pool.begin().await?;
        ensure_user(&mut tx, user_id, display_name).await?;

        let row = sqlx::query("SELECT balance FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
        let balance: i64 = row.get("balance");
        let new_balance = (balance + delta).max(0);
        let applied = new_balance - balance;

        sqlx::query("UPDATE users SET balance = ?1 WHERE id = ?2")
            .bind(new_balance)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO ledger_entries (user_id, delta, reason, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(user_id)
        .bind(applied)
        .bind(reason.as_str())
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(user_id, delta, applied, reason = %reason, new_balance, "Balance adjusted");
        Ok(new_balance)
    }

    /// Most recent ledger entries for a user, newest first.
    pub async fn recent_ledger(&self, user_id: &str, limit: u32) -> EngineResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM ledger_entries WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(ledger_from_row).collect()
    }

    // -- Rakeback --------------------------------------------------------

    /// Accrue rakeback into the unclaimed bucket. Zero or negative
    /// amounts are a no-op. Returns the bucket after accrual.
    pub async fn add_rakeback(&self, user_id: &str, amount: i64) -> EngineResult<i64> {
        if amount <= 0 {
            return self.rakeback_of(user_id).await;
        }

        let mut tx = self.pool.begin().await?;
        ensure_user(&mut tx, user_id, None).await?;
        sqlx::query("UPDATE users SET rakeback_unclaimed = rakeback_unclaimed + ?1 WHERE id = ?2")
            .bind(amount)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        let row = sqlx::query("SELECT rakeback_unclaimed FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(row.get("rakeback_unclaimed"))
    }

    pub async fn rakeback_of(&self, user_id: &str) -> EngineResult<i64> {
        let row = sqlx::query("SELECT rakeback_unclaimed FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("rakeback_unclaimed")).unwrap_or(0))
    }

    /// Claim the unclaimed bucket into the balance in one transaction.
    /// Returns `(claimed, new_balance)`; claiming an empty bucket is a
    /// no-op returning `(0, balance)`.
    pub async fn claim_rakeback(
        &self,
        user_id: &str,
        display_name: Option<&str>,
    ) -> EngineResult<(i64, i64)> {
        let mut tx = self.pool.begin().await?;
        ensure_user(&mut tx, user_id, display_name).await?;

        let row = sqlx::query("SELECT balance, rakeback_unclaimed FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
        let balance: i64 = row.get("balance");
        let claimed: i64 = row.get("rakeback_unclaimed");

        if claimed <= 0 {
            tx.commit().await?;
            return Ok((0, balance));
        }

        let new_balance = balance + claimed;
        sqlx::query("UPDATE users SET balance = ?1, rakeback_unclaimed = 0 WHERE id = ?2")
            .bind(new_balance)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO ledger_entries (user_id, delta, reason, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(user_id)
        .bind(claimed)
        .bind(LedgerReason::RakebackClaim.as_str())
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok((claimed, new_balance))
    }

    // -- Bet history & stats ---------------------------------------------

    pub async fn record_bet_history(&self, record: &BetRecord) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO bet_history (user_id, round_id, side, amount, outcome, payout, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&record.user_id)
        .bind(&record.round_id)
        .bind(record.side.as_str())
        .bind(record.amount)
        .bind(record.outcome.as_str())
        .bind(record.payout)
        .bind(record.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn bet_history(&self, user_id: &str, limit: u32) -> EngineResult<Vec<BetRecord>> {
        let rows =
            sqlx::query("SELECT * FROM bet_history WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2")
                .bind(user_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(bet_record_from_row).collect()
    }

    /// Aggregate a user's bet history: totals, W/L/R record, net profit,
    /// and the current win streak (wins counted back from the most
    /// recent bet until the first loss; refunds don't break it).
    pub async fn bet_stats(&self, user_id: &str) -> EngineResult<UserBetStats> {
        let rows = sqlx::query("SELECT * FROM bet_history WHERE user_id = ?1 ORDER BY id ASC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        let records: Vec<BetRecord> = rows
            .iter()
            .map(bet_record_from_row)
            .collect::<EngineResult<_>>()?;

        let mut stats = UserBetStats::default();
        for rec in &records {
            if rec.amount > 0 {
                stats.total_wagered += rec.amount;
                stats.total_bets += 1;
            }
            match rec.outcome {
                BetOutcome::Win => {
                    stats.wins += 1;
                    stats.net_profit += rec.payout - rec.amount;
                }
                BetOutcome::Loss => {
                    stats.losses += 1;
                    stats.net_profit -= rec.amount;
                }
                BetOutcome::Refund => stats.refunds += 1,
            }
        }
        for rec in records.iter().rev() {
            match rec.outcome {
                BetOutcome::Win => stats.current_streak += 1,
                BetOutcome::Loss => break,
                BetOutcome::Refund => continue,
            }
        }
        Ok(stats)
    }

    /// Global outcome stats: streaks, last winner, last-50 ring.
    pub async fn stats(&self) -> EngineResult<Stats> {
        let row = sqlx::query("SELECT * FROM stats WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        let winners_row = sqlx::query("SELECT winners FROM last_winners WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;

        let last_winner: Option<String> = row.get("last_winner");
        let winners_json: String = winners_row.get("winners");
        let last_winners: Vec<Side> = serde_json::from_str(&winners_json).unwrap_or_default();

        Ok(Stats {
            red_streak: row.get::<i64, _>("red_streak") as u32,
            blue_streak: row.get::<i64, _>("blue_streak") as u32,
            last_winner: last_winner.and_then(|s| s.parse().ok()),
            last_winners,
        })
    }

    /// Record a winning side: extend or reset streaks and append to the
    /// last-50 ring (dropping the oldest beyond the cap).
    pub async fn record_winner(&self, side: Side) -> EngineResult<Stats> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM stats WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?;
        let last_winner: Option<Side> =
            row.get::<Option<String>, _>("last_winner").and_then(|s| s.parse().ok());
        let red_streak = row.get::<i64, _>("red_streak") as u32;
        let blue_streak = row.get::<i64, _>("blue_streak") as u32;

        let (red, blue) = match (side, last_winner == Some(side)) {
            (Side::Red, true) => (red_streak + 1, 0),
            (Side::Red, false) => (1, 0),
            (Side::Blue, true) => (0, blue_streak + 1),
            (Side::Blue, false) => (0, 1),
        };

        sqlx::query("UPDATE stats SET last_winner = ?1, red_streak = ?2, blue_streak = ?3 WHERE id = 1")
            .bind(side.as_str())
            .bind(red as i64)
            .bind(blue as i64)
            .execute(&mut *tx)
            .await?;

        let winners_row = sqlx::query("SELECT winners FROM last_winners WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?;
        let winners_json: String = winners_row.get("winners");
        let mut winners: Vec<Side> = serde_json::from_str(&winners_json).unwrap_or_default();
        winners.push(side);
        if winners.len() > LAST_WINNERS_CAP {
            let excess = winners.len() - LAST_WINNERS_CAP;
            winners.drain(..excess);
        }
        let serialized =
            serde_json::to_string(&winners).unwrap_or_else(|_| "[]".to_string());
        sqlx::query("UPDATE last_winners SET winners = ?1 WHERE id = 1")
            .bind(serialized)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Stats {
            red_streak: red,
            blue_streak: blue,
            last_winner: Some(side),
            last_winners: winners,
        })
    }

    // -- Crypto payments -------------------------------------------------

    pub async fn record_crypto_payment(&self, payment: &CryptoPayment) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO crypto_payments
             (txn_id, user_id, amount_usd, amount_gp, currency, wallet_hash, invoice_url, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&payment.txn_id)
        .bind(&payment.user_id)
        .bind(payment.amount_usd.to_f64().unwrap_or(0.0))
        .bind(payment.amount_gp)
        .bind(&payment.currency)
        .bind(payment.wallet_hash.as_deref())
        .bind(payment.invoice_url.as_deref())
        .bind(payment.status.as_str())
        .bind(payment.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist a new payment status; stamps `confirmed_at` on completion.
    pub async fn update_payment_status(
        &self,
        txn_id: &str,
        status: PaymentStatus,
    ) -> EngineResult<()> {
        let confirmed_at = (status == PaymentStatus::Completed).then(|| Utc::now().timestamp());
        sqlx::query(
            "UPDATE crypto_payments SET status = ?1, confirmed_at = COALESCE(?2, confirmed_at)
             WHERE txn_id = ?3",
        )
        .bind(status.as_str())
        .bind(confirmed_at)
        .bind(txn_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_payment(&self, txn_id: &str) -> EngineResult<Option<CryptoPayment>> {
        let row = sqlx::query("SELECT * FROM crypto_payments WHERE txn_id = ?1")
            .bind(txn_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    /// Pending payments created after `cutoff` (the reconciler's poll set).
    pub async fn pending_payments_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> EngineResult<Vec<CryptoPayment>> {
        let rows = sqlx::query(
            "SELECT * FROM crypto_payments WHERE status = 'pending' AND created_at > ?1
             ORDER BY created_at DESC",
        )
        .bind(cutoff.timestamp())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(payment_from_row).collect()
    }

    /// Transition pending payments at or before `cutoff` to `expired`.
    /// Returns the number of payments expired. Expiry never credits.
    pub async fn expire_stale_pending(&self, cutoff: DateTime<Utc>) -> EngineResult<u64> {
        let result = sqlx::query(
            "UPDATE crypto_payments SET status = 'expired'
             WHERE status = 'pending' AND created_at <= ?1",
        )
        .bind(cutoff.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn recent_payments(
        &self,
        user_id: &str,
        limit: u32,
    ) -> EngineResult<Vec<CryptoPayment>> {
        let rows = sqlx::query(
            "SELECT * FROM crypto_payments WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(payment_from_row).collect()
    }

    // -- Crypto withdrawals ----------------------------------------------

    pub async fn record_crypto_withdrawal(
        &self,
        withdrawal: &CryptoWithdrawal,
    ) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO crypto_withdrawals
             (withdrawal_id, user_id, amount_gp, amount_usd, currency, address, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&withdrawal.withdrawal_id)
        .bind(&withdrawal.user_id)
        .bind(withdrawal.amount_gp)
        .bind(withdrawal.amount_usd.to_f64().unwrap_or(0.0))
        .bind(withdrawal.currency.ticker())
        .bind(&withdrawal.address)
        .bind(withdrawal.status.as_str())
        .bind(withdrawal.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist a withdrawal status, keeping any previously stored txn
    /// hash; stamps `processed_at` on completion.
    pub async fn update_withdrawal_status(
        &self,
        withdrawal_id: &str,
        status: WithdrawalStatus,
        txn_hash: Option<&str>,
    ) -> EngineResult<()> {
        let processed_at = (status == WithdrawalStatus::Completed).then(|| Utc::now().timestamp());
        sqlx::query(
            "UPDATE crypto_withdrawals
             SET status = ?1, txn_hash = COALESCE(?2, txn_hash),
                 processed_at = COALESCE(?3, processed_at)
             WHERE withdrawal_id = ?4",
        )
        .bind(status.as_str())
        .bind(txn_hash)
        .bind(processed_at)
        .bind(withdrawal_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_withdrawal(
        &self,
        withdrawal_id: &str,
    ) -> EngineResult<Option<CryptoWithdrawal>> {
        let row = sqlx::query("SELECT * FROM crypto_withdrawals WHERE withdrawal_id = ?1")
            .bind(withdrawal_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(withdrawal_from_row).transpose()
    }

    pub async fn withdrawals_by_status(
        &self,
        status: WithdrawalStatus,
    ) -> EngineResult<Vec<CryptoWithdrawal>> {
        let rows = sqlx::query(
            "SELECT * FROM crypto_withdrawals WHERE status = ?1 ORDER BY created_at ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(withdrawal_from_row).collect()
    }

    pub async fn recent_withdrawals(
        &self,
        user_id: &str,
        limit: u32,
    ) -> EngineResult<Vec<CryptoWithdrawal>> {
        let rows = sqlx::query(
            "SELECT * FROM crypto_withdrawals WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(withdrawal_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

async fn ensure_user(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: &str,
    display_name: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO users (id, display_name, balance, rakeback_unclaimed, created_at)
         VALUES (?1, ?2, 0, 0, ?3)",
    )
    .bind(user_id)
    .bind(display_name)
    .bind(Utc::now().timestamp())
    .execute(&mut **tx)
    .await?;

    if let Some(name) = display_name {
        sqlx::query(
            "UPDATE users SET display_name = ?1
             WHERE id = ?2 AND (display_name IS NULL OR display_name != ?1)",
        )
        .bind(name)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn ts_to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn decode_err(err: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}

fn user_from_row(row: &SqliteRow) -> EngineResult<User> {
    Ok(User {
        id: row.get("id"),
        display_name: row.get("display_name"),
        balance: row.get("balance"),
        rakeback_unclaimed: row.get("rakeback_unclaimed"),
        created_at: ts_to_datetime(row.get("created_at")),
    })
}

fn ledger_from_row(row: &SqliteRow) -> EngineResult<LedgerEntry> {
    let reason: String = row.get("reason");
    Ok(LedgerEntry {
        user_id: row.get("user_id"),
        delta: row.get("delta"),
        reason: reason.parse::<LedgerReason>().map_err(decode_err)?,
        created_at: ts_to_datetime(row.get("created_at")),
    })
}

fn bet_record_from_row(row: &SqliteRow) -> EngineResult<BetRecord> {
    let side: String = row.get("side");
    let outcome: String = row.get("outcome");
    Ok(BetRecord {
        user_id: row.get("user_id"),
        round_id: row.get("round_id"),
        side: side.parse::<Side>().map_err(decode_err)?,
        amount: row.get("amount"),
        outcome: outcome.parse::<BetOutcome>().map_err(decode_err)?,
        payout: row.get("payout"),
        created_at: ts_to_datetime(row.get("created_at")),
    })
}

fn payment_from_row(row: &SqliteRow) -> EngineResult<CryptoPayment> {
    let status: String = row.get("status");
    Ok(CryptoPayment {
        txn_id: row.get("txn_id"),
        user_id: row.get("user_id"),
        amount_usd: Decimal::from_f64_retain(row.get::<f64, _>("amount_usd")).unwrap_or_default(),
        amount_gp: row.get("amount_gp"),
        currency: row.get("currency"),
        wallet_hash: row.get("wallet_hash"),
        invoice_url: row.get("invoice_url"),
        status: status.parse::<PaymentStatus>().map_err(decode_err)?,
        created_at: ts_to_datetime(row.get("created_at")),
        confirmed_at: row.get::<Option<i64>, _>("confirmed_at").map(ts_to_datetime),
    })
}

fn withdrawal_from_row(row: &SqliteRow) -> EngineResult<CryptoWithdrawal> {
    let status: String = row.get("status");
    let currency: String = row.get("currency");
    Ok(CryptoWithdrawal {
        withdrawal_id: row.get("withdrawal_id"),
        user_id: row.get("user_id"),
        amount_gp: row.get("amount_gp"),
        amount_usd: Decimal::from_f64_retain(row.get::<f64, _>("amount_usd")).unwrap_or_default(),
        currency: currency.parse().map_err(decode_err)?,
        address: row.get("address"),
        status: status.parse::<WithdrawalStatus>().map_err(decode_err)?,
        txn_hash: row.get("txn_hash"),
        created_at: ts_to_datetime(row.get("created_at")),
        processed_at: row.get::<Option<i64>, _>("processed_at").map(ts_to_datetime),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
