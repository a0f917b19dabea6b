//! Storage gateway over the venue's SQLite accounting store.
//!
//! All reads return typed records; every write is committed individually.
//! NULL numeric columns read as zero so malformed rows never abort a
//! diagnosis.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::models::{LedgerEntry, OpenOrderFunds, Order, OrderStatus, Position, WalletBalance};

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open the accounting database and run the idempotent audit-log
    /// migration. A connection failure here is fatal for the whole run.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open accounting database: {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        let store = Self { conn };
        store.ensure_audit_schema()?;
        info!(db = %path.display(), "connected to accounting database");
        Ok(store)
    }

    /// Audit trail lives beside the venue tables; created up front so the
    /// repair write path never has to self-heal the schema.
    fn ensure_audit_schema(&self) -> Result<()> {
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS audit_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT,
                    action TEXT,
                    details TEXT,
                    timestamp DATETIME
                )",
                [],
            )
            .context("create audit_log table")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Wallet reads
    // ------------------------------------------------------------------

    pub fn distinct_wallet_users(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT user_id) FROM wallet_balances",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn negative_balances(&self) -> Result<Vec<WalletBalance>> {
        self.query_wallets("SELECT user_id, currency, balance, frozen_balance FROM wallet_balances WHERE balance < 0 OR frozen_balance < 0")
    }

    pub fn over_frozen_balances(&self) -> Result<Vec<WalletBalance>> {
        self.query_wallets("SELECT user_id, currency, balance, frozen_balance FROM wallet_balances WHERE frozen_balance > balance")
    }

    pub fn all_wallets(&self) -> Result<Vec<WalletBalance>> {
        self.query_wallets(
            "SELECT user_id, currency, balance, frozen_balance FROM wallet_balances",
        )
    }

    fn query_wallets(&self, sql: &str) -> Result<Vec<WalletBalance>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(WalletBalance {
                user_id: row.get(0)?,
                currency: row.get(1)?,
                balance: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                frozen_balance: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Order reads
    // ------------------------------------------------------------------

    /// Open orders created more than `stale_hours` ago.
    pub fn stale_open_orders(&self, stale_hours: i64) -> Result<Vec<Order>> {
        let modifier = format!("-{} hours", stale_hours.max(0));
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, user_id, symbol, side, type, amount, price, status, created_at
             FROM orders
             WHERE status = 'open' AND created_at < datetime('now', ?1)",
        )?;
        let rows = stmt.query_map(params![modifier], order_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Open orders joined to their owner's wallet rows. Report-only view;
    /// an entry here is not a violation on its own.
    pub fn open_orders_with_wallets(&self) -> Result<Vec<OpenOrderFunds>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT o.id, o.user_id, o.symbol, o.amount, w.balance, w.frozen_balance
             FROM orders o
             JOIN wallet_balances w ON o.user_id = w.user_id
             WHERE o.status = 'open'",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(OpenOrderFunds {
                order_id: row.get(0)?,
                user_id: row.get(1)?,
                symbol: row.get(2)?,
                amount: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                balance: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                frozen_balance: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Position reads
    // ------------------------------------------------------------------

    pub fn all_positions(&self) -> Result<Vec<Position>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT user_id, symbol, side, quantity, entry_price, current_price,
                    margin, leverage, unrealized_pnl
             FROM positions",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Position {
                user_id: row.get(0)?,
                symbol: row.get(1)?,
                side: row.get(2)?,
                quantity: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                entry_price: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                mark_price: row.get(5)?,
                margin: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
                leverage: row.get::<_, Option<f64>>(7)?.unwrap_or(0.0),
                unrealized_pnl: row.get::<_, Option<f64>>(8)?.unwrap_or(0.0),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Ledger reads
    // ------------------------------------------------------------------

    pub fn ledger_entry_count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM wallet_transactions", [], |row| {
                    row.get(0)
                })?;
        Ok(count as usize)
    }

    /// Union of order ids and pending-request ids, the valid targets for a
    /// ledger reference.
    pub fn referenceable_ids(&self) -> Result<HashSet<String>> {
        let mut ids = HashSet::new();
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id FROM orders UNION SELECT id FROM wallet_requests")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for row in rows {
            ids.insert(row?);
        }
        Ok(ids)
    }

    /// Ledger entries carrying a non-NULL reference. Entries with a NULL
    /// reference never orphan under the current lookup rule.
    pub fn referenced_ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, user_id, type, amount, currency, balance_before, balance_after,
                    reference_id, created_at
             FROM wallet_transactions
             WHERE reference_id IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(LedgerEntry {
                id: row.get(0)?,
                user_id: row.get(1)?,
                kind: row.get(2)?,
                amount: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                currency: row.get(4)?,
                balance_before: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
                balance_after: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
                reference_id: row.get(7)?,
                created_at: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn ledger_entry(&self, entry_id: &str) -> Result<Option<LedgerEntry>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, user_id, type, amount, currency, balance_before, balance_after,
                    reference_id, created_at
             FROM wallet_transactions WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![entry_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(LedgerEntry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            kind: row.get(2)?,
            amount: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
            currency: row.get(4)?,
            balance_before: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
            balance_after: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
            reference_id: row.get(7)?,
            created_at: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        }))
    }

    // ------------------------------------------------------------------
    // Risk reads
    // ------------------------------------------------------------------

    pub fn total_exposure(&self) -> Result<f64> {
        let total: Option<f64> =
            self.conn
                .query_row("SELECT SUM(quantity) FROM positions", [], |row| row.get(0))?;
        Ok(total.unwrap_or(0.0))
    }

    // ------------------------------------------------------------------
    // Repair writes (each committed individually)
    // ------------------------------------------------------------------

    pub fn set_position_pnl(&self, user_id: &str, symbol: &str, pnl: f64) -> Result<usize> {
        let updated = self
            .conn
            .execute(
                "UPDATE positions SET unrealized_pnl = ?1 WHERE user_id = ?2 AND symbol = ?3",
                params![pnl, user_id, symbol],
            )
            .context("update position pnl")?;
        Ok(updated)
    }

    pub fn set_position_mark_and_pnl(
        &self,
        user_id: &str,
        symbol: &str,
        mark_price: f64,
        pnl: f64,
    ) -> Result<usize> {
        let updated = self
            .conn
            .execute(
                "UPDATE positions SET current_price = ?1, unrealized_pnl = ?2
                 WHERE user_id = ?3 AND symbol = ?4",
                params![mark_price, pnl, user_id, symbol],
            )
            .context("update position mark price and pnl")?;
        Ok(updated)
    }

    /// Clamp negative balance and frozen amounts to zero, independently.
    pub fn clamp_wallet_nonnegative(&self, user_id: &str, currency: &str) -> Result<usize> {
        let updated = self
            .conn
            .execute(
                "UPDATE wallet_balances
                 SET balance = CASE WHEN balance < 0 THEN 0 ELSE balance END,
                     frozen_balance = CASE WHEN frozen_balance < 0 THEN 0 ELSE frozen_balance END
                 WHERE user_id = ?1 AND currency = ?2",
                params![user_id, currency],
            )
            .context("clamp negative wallet balance")?;
        Ok(updated)
    }

    pub fn align_frozen_to_balance(&self, user_id: &str, currency: &str) -> Result<usize> {
        let updated = self
            .conn
            .execute(
                "UPDATE wallet_balances SET frozen_balance = balance
                 WHERE user_id = ?1 AND currency = ?2",
                params![user_id, currency],
            )
            .context("align frozen balance")?;
        Ok(updated)
    }

    pub fn cancel_order(&self, order_id: &str) -> Result<usize> {
        let updated = self
            .conn
            .execute(
                "UPDATE orders SET status = 'cancelled', updated_at = datetime('now')
                 WHERE id = ?1",
                params![order_id],
            )
            .context("cancel stale order")?;
        Ok(updated)
    }

    pub fn set_ledger_reference(&self, entry_id: &str, reference: &str) -> Result<usize> {
        let updated = self
            .conn
            .execute(
                "UPDATE wallet_transactions SET reference_id = ?1 WHERE id = ?2",
                params![reference, entry_id],
            )
            .context("relabel orphaned ledger entry")?;
        Ok(updated)
    }

    pub fn append_audit(&self, user_id: &str, action: &str, details: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO audit_log (user_id, action, details, timestamp)
                 VALUES (?1, ?2, ?3, datetime('now'))",
                params![user_id, action, details],
            )
            .context("append audit log entry")?;
        Ok(())
    }
}

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    Ok(Order {
        id: row.get(0)?,
        user_id: row.get(1)?,
        symbol: row.get(2)?,
        side: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        kind: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        amount: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
        price: row.get(6)?,
        status: OrderStatus::parse(&row.get::<_, Option<String>>(7)?.unwrap_or_default()),
        created_at: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
    })
}
