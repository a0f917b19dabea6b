//! Verification loop: re-diagnose and diff issue kinds.
//!
//! The comparison is over issue kinds, not individual rows: a kind counts
//! as remaining even if the specific rows behind it changed. Coarse by
//! design; per-row convergence tracking would be a strengthening, not a
//! behavior change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::checker::DiagnosisSnapshot;
use crate::models::IssueKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub generated_at: DateTime<Utc>,
    /// Kinds present originally and absent after repair.
    pub fixed_successfully: Vec<IssueKind>,
    /// Kinds present both before and after repair.
    pub issues_remaining: Vec<IssueKind>,
    /// Kinds absent originally but present now: regressions introduced by
    /// the repair pass.
    pub failed_fixes: Vec<IssueKind>,
}

impl VerificationResult {
    pub fn is_clean(&self) -> bool {
        self.issues_remaining.is_empty() && self.failed_fixes.is_empty()
    }
}

/// Compare the original diagnosis against a fresh one taken after repair.
pub fn verify(original: &DiagnosisSnapshot, new: &DiagnosisSnapshot) -> VerificationResult {
    let original_kinds: Vec<IssueKind> = original.issues.iter().map(|issue| issue.kind).collect();
    let new_kinds: Vec<IssueKind> = new.issues.iter().map(|issue| issue.kind).collect();

    let mut result = VerificationResult {
        generated_at: Utc::now(),
        fixed_successfully: Vec::new(),
        issues_remaining: Vec::new(),
        failed_fixes: Vec::new(),
    };

    for kind in &original_kinds {
        if new_kinds.contains(kind) {
            result.issues_remaining.push(*kind);
        } else {
            result.fixed_successfully.push(*kind);
        }
    }

    for kind in &new_kinds {
        if !original_kinds.contains(kind) {
            result.failed_fixes.push(*kind);
        }
    }

    info!(
        fixed = result.fixed_successfully.len(),
        remaining = result.issues_remaining.len(),
        regressed = result.failed_fixes.len(),
        "verification complete"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{LedgerCheck, OrderCheck, PositionCheck, RiskCheck, WalletCheck};
    use crate::models::{Issue, Severity};
    use uuid::Uuid;

    fn snapshot_with(kinds: &[IssueKind]) -> DiagnosisSnapshot {
        DiagnosisSnapshot {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            wallets: WalletCheck {
                total_users: 0,
                negative: Vec::new(),
                over_frozen: Vec::new(),
            },
            orders: OrderCheck {
                stale_open: Vec::new(),
                open_with_wallets: Vec::new(),
            },
            positions: PositionCheck {
                total_positions: 0,
                negative_margin: Vec::new(),
                near_liquidation: Vec::new(),
                pnl_mismatches: Vec::new(),
            },
            ledger: LedgerCheck {
                total_entries: 0,
                orphaned: Vec::new(),
            },
            risk: RiskCheck {
                total_exposure: 0.0,
                high_leverage: Vec::new(),
            },
            issues: kinds
                .iter()
                .map(|kind| Issue {
                    severity: Severity::Medium,
                    kind: *kind,
                    description: String::new(),
                    details: serde_json::Value::Null,
                })
                .collect(),
        }
    }

    #[test]
    fn classifies_fixed_remaining_and_regressed() {
        let before = snapshot_with(&[IssueKind::NegativeBalance, IssueKind::StaleOrders]);
        let after = snapshot_with(&[
            IssueKind::StaleOrders,
            IssueKind::LockedExceedsAvailable,
        ]);

        let result = verify(&before, &after);
        assert_eq!(result.fixed_successfully, vec![IssueKind::NegativeBalance]);
        assert_eq!(result.issues_remaining, vec![IssueKind::StaleOrders]);
        assert_eq!(result.failed_fixes, vec![IssueKind::LockedExceedsAvailable]);
        assert!(!result.is_clean());
    }

    #[test]
    fn clean_when_everything_resolved() {
        let before = snapshot_with(&[IssueKind::OrphanedLedgerEntries]);
        let after = snapshot_with(&[]);

        let result = verify(&before, &after);
        assert_eq!(
            result.fixed_successfully,
            vec![IssueKind::OrphanedLedgerEntries]
        );
        assert!(result.is_clean());
    }
}
