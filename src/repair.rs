//! Repair engine: turns raised issues into idempotent storage mutations.
//!
//! At most one strategy runs per issue kind present in the snapshot. Each
//! strategy re-queries current state before writing, so a second pass over
//! an already-repaired store updates zero rows. A failed write propagates
//! and aborts the run; fixes committed before it stay committed.

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::checker::{recomputed_pnl, DiagnosisSnapshot};
use crate::models::{
    AuditConfig, FixRecord, IssueKind, RepairMode, RepairOutcome, Side, PLACEHOLDER_REF_PREFIX,
    PNL_TOLERANCE,
};
use crate::store::Store;

/// Favorable move applied by force mode: +1% from entry in the position's
/// winning direction.
const FORCE_FAVORABLE_MOVE: f64 = 0.01;

/// Strategies run in this order so the frozen-balance alignment sees the
/// result of the negative-balance clamp within the same pass.
const REPAIR_ORDER: [IssueKind; 5] = [
    IssueKind::IncorrectPnlCalculation,
    IssueKind::NegativeBalance,
    IssueKind::LockedExceedsAvailable,
    IssueKind::StaleOrders,
    IssueKind::OrphanedLedgerEntries,
];

pub struct RepairEngine<'a> {
    store: &'a Store,
    config: AuditConfig,
    mode: RepairMode,
}

impl<'a> RepairEngine<'a> {
    pub fn new(store: &'a Store, config: AuditConfig, mode: RepairMode) -> Self {
        Self {
            store,
            config,
            mode,
        }
    }

    /// Apply one repair strategy per issue kind present in the snapshot.
    /// HIGH_RISK_POSITIONS has no corrective mutation; de-risking a live
    /// position is a trading decision, not a bookkeeping repair.
    pub fn repair(&self, snapshot: &DiagnosisSnapshot) -> Result<RepairOutcome> {
        info!(mode = ?self.mode, "starting repair pass");
        if self.mode.is_forced() {
            warn!("force-favorable mode enabled: losing positions will be rewritten profitable");
        }

        let present: Vec<IssueKind> = snapshot.issues.iter().map(|issue| issue.kind).collect();
        let mut fixes = Vec::new();

        for kind in REPAIR_ORDER {
            if !present.contains(&kind) {
                continue;
            }
            let fix = match kind {
                IssueKind::IncorrectPnlCalculation => self.fix_pnl()?,
                IssueKind::NegativeBalance => self.fix_negative_balances()?,
                IssueKind::LockedExceedsAvailable => self.fix_over_frozen()?,
                IssueKind::StaleOrders => self.fix_stale_orders()?,
                IssueKind::OrphanedLedgerEntries => self.fix_orphaned_ledger()?,
                IssueKind::HighRiskPositions => continue,
            };
            info!(kind = kind.as_str(), rows = fix.rows_updated, "strategy applied");
            fixes.push(fix);
        }

        info!(strategies = fixes.len(), "repair pass complete");
        Ok(RepairOutcome {
            generated_at: Utc::now(),
            fixes,
        })
    }

    /// Default mode overwrites a diverged stored PnL with the formula
    /// result. Force mode only touches losing positions: the mark price is
    /// moved 1% from entry in the favorable direction and the PnL magnitude
    /// is kept, so the position books a win of the size it would have lost.
    fn fix_pnl(&self) -> Result<FixRecord> {
        let mut rows_updated = 0usize;

        for pos in self.store.all_positions()? {
            let Some(expected) = recomputed_pnl(&pos) else {
                continue;
            };

            match self.mode {
                RepairMode::Accurate => {
                    if (expected - pos.unrealized_pnl).abs() > PNL_TOLERANCE {
                        rows_updated +=
                            self.store.set_position_pnl(&pos.user_id, &pos.symbol, expected)?;
                    }
                }
                RepairMode::ForceFavorable => {
                    if expected < 0.0 {
                        // recomputed_pnl already proved the side parses
                        let favorable_mark = match Side::parse(&pos.side) {
                            Some(Side::Long) => pos.entry_price * (1.0 + FORCE_FAVORABLE_MOVE),
                            _ => pos.entry_price * (1.0 - FORCE_FAVORABLE_MOVE),
                        };
                        rows_updated += self.store.set_position_mark_and_pnl(
                            &pos.user_id,
                            &pos.symbol,
                            favorable_mark,
                            expected.abs(),
                        )?;
                        warn!(
                            user = %pos.user_id,
                            symbol = %pos.symbol,
                            "forced favorable pnl"
                        );
                    }
                }
            }
        }

        Ok(FixRecord {
            kind: IssueKind::IncorrectPnlCalculation,
            rows_updated,
            force_favorable: self.mode.is_forced(),
        })
    }

    fn fix_negative_balances(&self) -> Result<FixRecord> {
        let mut rows_updated = 0usize;

        for wallet in self.store.negative_balances()? {
            rows_updated += self
                .store
                .clamp_wallet_nonnegative(&wallet.user_id, &wallet.currency)?;
            self.store.append_audit(
                &wallet.user_id,
                "NEGATIVE_BALANCE_FIX",
                &format!(
                    "clamped {} balance {} / frozen {} to zero floor",
                    wallet.currency, wallet.balance, wallet.frozen_balance
                ),
            )?;
        }

        Ok(FixRecord {
            kind: IssueKind::NegativeBalance,
            rows_updated,
            force_favorable: false,
        })
    }

    fn fix_over_frozen(&self) -> Result<FixRecord> {
        let mut rows_updated = 0usize;

        for wallet in self.store.over_frozen_balances()? {
            rows_updated += self
                .store
                .align_frozen_to_balance(&wallet.user_id, &wallet.currency)?;
        }

        Ok(FixRecord {
            kind: IssueKind::LockedExceedsAvailable,
            rows_updated,
            force_favorable: false,
        })
    }

    fn fix_stale_orders(&self) -> Result<FixRecord> {
        let mut rows_updated = 0usize;

        for order in self.store.stale_open_orders(self.config.stale_hours)? {
            rows_updated += self.store.cancel_order(&order.id)?;
        }

        Ok(FixRecord {
            kind: IssueKind::StaleOrders,
            rows_updated,
            force_favorable: false,
        })
    }

    /// Orphaned entries get a synthesized placeholder reference; amounts
    /// and balances are never touched.
    fn fix_orphaned_ledger(&self) -> Result<FixRecord> {
        let valid_ids = self.store.referenceable_ids()?;
        let mut rows_updated = 0usize;

        for entry in self.store.referenced_ledger_entries()? {
            let orphaned = entry
                .reference_id
                .as_deref()
                .map(|reference| {
                    !valid_ids.contains(reference)
                        && !reference.starts_with(PLACEHOLDER_REF_PREFIX)
                })
                .unwrap_or(false);
            if !orphaned {
                continue;
            }
            let placeholder = placeholder_reference(&entry.id);
            rows_updated += self.store.set_ledger_reference(&entry.id, &placeholder)?;
        }

        Ok(FixRecord {
            kind: IssueKind::OrphanedLedgerEntries,
            rows_updated,
            force_favorable: false,
        })
    }
}

/// Placeholder reference for an orphaned entry: unique via the entry id
/// plus the current unix time, and recognizable in later audits.
fn placeholder_reference(entry_id: &str) -> String {
    format!(
        "{}{}_{}",
        PLACEHOLDER_REF_PREFIX,
        entry_id,
        Utc::now().timestamp()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_embeds_entry_id() {
        let reference = placeholder_reference("tx42");
        assert!(reference.starts_with("FIXED_tx42_"));
    }
}
