//! Issue classifier: maps raw findings to the fixed issue catalog.
//!
//! One `Issue` per category with at least one finding; the order below is
//! presentation order only.

use serde_json::json;

use crate::checker::DiagnosisSnapshot;
use crate::models::{Issue, IssueKind, Severity};

pub fn classify(snapshot: &DiagnosisSnapshot) -> Vec<Issue> {
    let mut issues = Vec::new();

    if !snapshot.wallets.negative.is_empty() {
        issues.push(Issue {
            severity: Severity::High,
            kind: IssueKind::NegativeBalance,
            description: format!(
                "Found {} wallets with negative balances",
                snapshot.wallets.negative.len()
            ),
            details: json!(snapshot.wallets.negative),
        });
    }

    if !snapshot.wallets.over_frozen.is_empty() {
        issues.push(Issue {
            severity: Severity::High,
            kind: IssueKind::LockedExceedsAvailable,
            description: format!(
                "Found {} wallets where frozen exceeds balance",
                snapshot.wallets.over_frozen.len()
            ),
            details: json!(snapshot.wallets.over_frozen),
        });
    }

    if !snapshot.orders.stale_open.is_empty() {
        issues.push(Issue {
            severity: Severity::Medium,
            kind: IssueKind::StaleOrders,
            description: format!("Found {} stale open orders", snapshot.orders.stale_open.len()),
            details: json!(snapshot.orders.stale_open),
        });
    }

    if !snapshot.positions.pnl_mismatches.is_empty() {
        // Mis-stored PnL attributes losses to users by default, hence the
        // only CRITICAL entry in the catalog.
        issues.push(Issue {
            severity: Severity::Critical,
            kind: IssueKind::IncorrectPnlCalculation,
            description: format!(
                "Found {} positions whose stored PnL disagrees with the formula",
                snapshot.positions.pnl_mismatches.len()
            ),
            details: json!(snapshot.positions.pnl_mismatches),
        });
    }

    if !snapshot.ledger.orphaned.is_empty() {
        issues.push(Issue {
            severity: Severity::Medium,
            kind: IssueKind::OrphanedLedgerEntries,
            description: format!(
                "Found {} orphaned ledger entries",
                snapshot.ledger.orphaned.len()
            ),
            details: json!(snapshot.ledger.orphaned),
        });
    }

    if !snapshot.risk.high_leverage.is_empty() {
        issues.push(Issue {
            severity: Severity::High,
            kind: IssueKind::HighRiskPositions,
            description: format!(
                "Found {} positions above {}x effective leverage",
                snapshot.risk.high_leverage.len(),
                crate::models::MAX_LEVERAGE
            ),
            details: json!(snapshot.risk.high_leverage),
        });
    }

    issues
}
