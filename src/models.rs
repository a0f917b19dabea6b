//! Typed data model for the audit core
//! Mission: replace row-as-mapping records with a closed set of typed records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tolerance for comparing a stored PnL against the recomputed value.
pub const PNL_TOLERANCE: f64 = 0.01;

/// Margin ratio above which a position counts as near liquidation.
pub const MARGIN_RATIO_ALERT: f64 = 0.8;

/// Effective leverage above which a position counts as high risk.
pub const MAX_LEVERAGE: f64 = 20.0;

/// Default staleness cutoff for open orders, in hours.
pub const DEFAULT_STALE_HOURS: i64 = 24;

/// Prefix of placeholder references written for orphaned ledger entries.
/// The ledger lookup rule treats these as resolved.
pub const PLACEHOLDER_REF_PREFIX: &str = "FIXED_";

/// Tunables for a diagnose/fix/verify cycle.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Open orders older than this many hours are flagged stale.
    pub stale_hours: i64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            stale_hours: DEFAULT_STALE_HOURS,
        }
    }
}

/// Issue severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// The fixed catalog of violation categories the checker can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    NegativeBalance,
    LockedExceedsAvailable,
    StaleOrders,
    IncorrectPnlCalculation,
    OrphanedLedgerEntries,
    HighRiskPositions,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::NegativeBalance => "NEGATIVE_BALANCE",
            IssueKind::LockedExceedsAvailable => "LOCKED_EXCEEDS_AVAILABLE",
            IssueKind::StaleOrders => "STALE_ORDERS",
            IssueKind::IncorrectPnlCalculation => "INCORRECT_PNL_CALCULATION",
            IssueKind::OrphanedLedgerEntries => "ORPHANED_LEDGER_ENTRIES",
            IssueKind::HighRiskPositions => "HIGH_RISK_POSITIONS",
        }
    }

    /// All kinds, in presentation order.
    pub fn all() -> [IssueKind; 6] {
        [
            IssueKind::NegativeBalance,
            IssueKind::LockedExceedsAvailable,
            IssueKind::StaleOrders,
            IssueKind::IncorrectPnlCalculation,
            IssueKind::OrphanedLedgerEntries,
            IssueKind::HighRiskPositions,
        ]
    }
}

/// Position direction. The store persists `buy`/`sell`; some importers
/// write `long`/`short`, so both spellings are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn parse(raw: &str) -> Option<Side> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" | "long" => Some(Side::Long),
            "sell" | "short" => Some(Side::Short),
            _ => None,
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

/// Order lifecycle states. Unknown strings are carried through rather
/// than failing the check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
    PartiallyFilled,
    Liquidated,
    Other(String),
}

impl OrderStatus {
    pub fn parse(raw: &str) -> OrderStatus {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" => OrderStatus::Open,
            "filled" => OrderStatus::Filled,
            "cancelled" => OrderStatus::Cancelled,
            "partially_filled" => OrderStatus::PartiallyFilled,
            "liquidated" => OrderStatus::Liquidated,
            other => OrderStatus::Other(other.to_string()),
        }
    }
}

/// One (user, currency) wallet row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBalance {
    pub user_id: String,
    pub currency: String,
    pub balance: f64,
    pub frozen_balance: f64,
}

/// One order row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: String,
    /// Order type as stored: `limit`, `market`, ...
    pub kind: String,
    pub amount: f64,
    pub price: Option<f64>,
    pub status: OrderStatus,
    pub created_at: String,
}

/// One leveraged position row. Fixes key by (user_id, symbol).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub user_id: String,
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub mark_price: Option<f64>,
    pub margin: f64,
    pub leverage: f64,
    pub unrealized_pnl: f64,
}

/// One ledger (wallet transaction) row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub amount: f64,
    pub currency: String,
    pub balance_before: f64,
    pub balance_after: f64,
    pub reference_id: Option<String>,
    pub created_at: String,
}

/// An open order joined to its owner's wallet, surfaced for the report.
/// Not a violation on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrderFunds {
    pub order_id: String,
    pub user_id: String,
    pub symbol: String,
    pub amount: f64,
    pub balance: f64,
    pub frozen_balance: f64,
}

/// One raised issue; produced fresh each diagnosis, one per category
/// with at least one finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub description: String,
    /// Raw detail rows that triggered the issue.
    pub details: serde_json::Value,
}

/// Record of one applied repair strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixRecord {
    pub kind: IssueKind,
    pub rows_updated: usize,
    pub force_favorable: bool,
}

/// Repair operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepairMode {
    /// Recompute PnL with the authoritative formula and store it verbatim.
    #[default]
    Accurate,
    /// Rewrite losing positions to a +1% favorable mark price; trades
    /// accuracy for guaranteed non-negative PnL. Must be explicitly
    /// requested.
    ForceFavorable,
}

impl RepairMode {
    pub fn is_forced(&self) -> bool {
        matches!(self, RepairMode::ForceFavorable)
    }
}

/// Everything applied during one repair pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub generated_at: DateTime<Utc>,
    pub fixes: Vec<FixRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_matches_escalation() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn side_accepts_both_spellings() {
        assert_eq!(Side::parse("buy"), Some(Side::Long));
        assert_eq!(Side::parse("LONG"), Some(Side::Long));
        assert_eq!(Side::parse("sell"), Some(Side::Short));
        assert_eq!(Side::parse("short"), Some(Side::Short));
        assert_eq!(Side::parse("hold"), None);
    }

    #[test]
    fn order_status_is_total() {
        assert_eq!(OrderStatus::parse("open"), OrderStatus::Open);
        assert_eq!(
            OrderStatus::parse("Partially_Filled"),
            OrderStatus::PartiallyFilled
        );
        assert_eq!(
            OrderStatus::parse("weird"),
            OrderStatus::Other("weird".to_string())
        );
    }

    #[test]
    fn issue_kind_serializes_as_screaming_snake() {
        for kind in IssueKind::all() {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
