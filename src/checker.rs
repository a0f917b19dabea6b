//! Invariant checker: the read-only diagnosis pass.
//!
//! Runs one check per invariant category and bundles the findings into a
//! `DiagnosisSnapshot`. Every check is total: NULL or nonsensical fields
//! exclude a row from a given rule instead of aborting the run.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::classify::classify;
use crate::models::{
    AuditConfig, Issue, LedgerEntry, OpenOrderFunds, Order, Position, Side, WalletBalance,
    MARGIN_RATIO_ALERT, MAX_LEVERAGE, PLACEHOLDER_REF_PREFIX, PNL_TOLERANCE,
};
use crate::store::Store;

/// Authoritative unrealized PnL: return relative to entry, signed by side.
///
/// Callers must exclude rows with a non-positive entry price.
pub fn expected_pnl(side: Side, quantity: f64, entry_price: f64, mark_price: f64) -> f64 {
    side.sign() * (mark_price - entry_price) * quantity / entry_price
}

/// Margin ratio used for the near-liquidation rule. A non-positive margin
/// is maximally risky, so the ratio saturates at 1 rather than dividing.
pub fn margin_ratio(stored_pnl: f64, margin: f64) -> f64 {
    if margin > 0.0 {
        stored_pnl.abs() / margin
    } else {
        1.0
    }
}

/// Total leverage function: quantity over margin, infinite when margin is
/// zero or negative so such positions always trip the high-risk rule.
pub fn effective_leverage(quantity: f64, margin: f64) -> f64 {
    if margin > 0.0 {
        quantity / margin
    } else {
        f64::INFINITY
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletCheck {
    pub total_users: usize,
    pub negative: Vec<WalletBalance>,
    pub over_frozen: Vec<WalletBalance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCheck {
    pub stale_open: Vec<Order>,
    /// Open orders joined to wallets, for the report; not a violation.
    pub open_with_wallets: Vec<OpenOrderFunds>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnlMismatch {
    pub position: Position,
    pub expected_pnl: f64,
    pub stored_pnl: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionCheck {
    pub total_positions: usize,
    pub negative_margin: Vec<Position>,
    pub near_liquidation: Vec<Position>,
    pub pnl_mismatches: Vec<PnlMismatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerCheck {
    pub total_entries: usize,
    pub orphaned: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeverageFinding {
    pub position: Position,
    /// Infinite when margin is non-positive; serialized as null.
    pub effective_leverage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskCheck {
    pub total_exposure: f64,
    pub high_leverage: Vec<LeverageFinding>,
}

/// Immutable result of one diagnosis pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisSnapshot {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub wallets: WalletCheck,
    pub orders: OrderCheck,
    pub positions: PositionCheck,
    pub ledger: LedgerCheck,
    pub risk: RiskCheck,
    pub issues: Vec<Issue>,
}

pub struct InvariantChecker<'a> {
    store: &'a Store,
    config: AuditConfig,
}

impl<'a> InvariantChecker<'a> {
    pub fn new(store: &'a Store, config: AuditConfig) -> Self {
        Self { store, config }
    }

    /// Run all five invariant checks and classify the findings.
    pub fn run_diagnosis(&self) -> Result<DiagnosisSnapshot> {
        info!("starting diagnosis");

        let mut snapshot = DiagnosisSnapshot {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            wallets: self.check_wallets()?,
            orders: self.check_orders()?,
            positions: self.check_positions()?,
            ledger: self.check_ledger()?,
            risk: self.check_risk()?,
            issues: Vec::new(),
        };
        snapshot.issues = classify(&snapshot);

        info!(issues = snapshot.issues.len(), "diagnosis complete");
        Ok(snapshot)
    }

    fn check_wallets(&self) -> Result<WalletCheck> {
        Ok(WalletCheck {
            total_users: self.store.distinct_wallet_users()?,
            negative: self.store.negative_balances()?,
            over_frozen: self.store.over_frozen_balances()?,
        })
    }

    fn check_orders(&self) -> Result<OrderCheck> {
        Ok(OrderCheck {
            stale_open: self.store.stale_open_orders(self.config.stale_hours)?,
            open_with_wallets: self.store.open_orders_with_wallets()?,
        })
    }

    fn check_positions(&self) -> Result<PositionCheck> {
        let positions = self.store.all_positions()?;
        let mut check = PositionCheck {
            total_positions: positions.len(),
            negative_margin: Vec::new(),
            near_liquidation: Vec::new(),
            pnl_mismatches: Vec::new(),
        };

        for pos in positions {
            if pos.margin < 0.0 {
                check.negative_margin.push(pos.clone());
            }
            if margin_ratio(pos.unrealized_pnl, pos.margin) > MARGIN_RATIO_ALERT {
                check.near_liquidation.push(pos.clone());
            }
            if let Some(expected) = recomputed_pnl(&pos) {
                if (expected - pos.unrealized_pnl).abs() > PNL_TOLERANCE {
                    check.pnl_mismatches.push(PnlMismatch {
                        stored_pnl: pos.unrealized_pnl,
                        expected_pnl: expected,
                        position: pos,
                    });
                }
            }
        }

        Ok(check)
    }

    fn check_ledger(&self) -> Result<LedgerCheck> {
        let valid_ids = self.store.referenceable_ids()?;
        let entries = self.store.referenced_ledger_entries()?;
        let orphaned = entries
            .into_iter()
            .filter(|entry| match entry.reference_id.as_deref() {
                // Placeholders written by a prior repair count as resolved.
                Some(reference) => {
                    !valid_ids.contains(reference)
                        && !reference.starts_with(PLACEHOLDER_REF_PREFIX)
                }
                // NULL references never orphan under the current policy.
                None => false,
            })
            .collect();

        Ok(LedgerCheck {
            total_entries: self.store.ledger_entry_count()?,
            orphaned,
        })
    }

    fn check_risk(&self) -> Result<RiskCheck> {
        let positions = self.store.all_positions()?;
        let mut high_leverage = Vec::new();
        for pos in positions {
            let leverage = effective_leverage(pos.quantity, pos.margin);
            if leverage > MAX_LEVERAGE {
                high_leverage.push(LeverageFinding {
                    effective_leverage: leverage,
                    position: pos,
                });
            }
        }

        Ok(RiskCheck {
            total_exposure: self.store.total_exposure()?,
            high_leverage,
        })
    }
}

/// Recompute a position's PnL, or None when the row cannot support the
/// formula (unknown side, NULL mark price, non-positive entry price).
pub fn recomputed_pnl(pos: &Position) -> Option<f64> {
    let side = Side::parse(&pos.side)?;
    let mark = pos.mark_price?;
    if pos.entry_price <= 0.0 {
        return None;
    }
    Some(expected_pnl(side, pos.quantity, pos.entry_price, mark))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(side: &str, qty: f64, entry: f64, mark: Option<f64>, margin: f64) -> Position {
        Position {
            user_id: "u1".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: side.to_string(),
            quantity: qty,
            entry_price: entry,
            mark_price: mark,
            margin,
            leverage: 10.0,
            unrealized_pnl: 0.0,
        }
    }

    #[test]
    fn long_pnl_is_return_relative_to_entry() {
        let pnl = expected_pnl(Side::Long, 1.0, 45_000.0, 46_000.0);
        assert!((pnl - 1_000.0 / 45_000.0).abs() < 1e-12);
    }

    #[test]
    fn short_pnl_gains_when_price_falls() {
        let pnl = expected_pnl(Side::Short, 10.0, 3_000.0, 2_900.0);
        assert!((pnl - 100.0 * 10.0 / 3_000.0).abs() < 1e-12);
        assert!(pnl > 0.0);
    }

    #[test]
    fn leverage_is_total_on_zero_margin() {
        assert_eq!(effective_leverage(100.0, 0.0), f64::INFINITY);
        assert_eq!(effective_leverage(100.0, -5.0), f64::INFINITY);
        assert!((effective_leverage(100.0, 4.0) - 25.0).abs() < 1e-12);
    }

    #[test]
    fn margin_ratio_saturates_on_nonpositive_margin() {
        assert_eq!(margin_ratio(-40.0, 0.0), 1.0);
        assert_eq!(margin_ratio(10.0, -1.0), 1.0);
        assert!((margin_ratio(-40.0, 100.0) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn recompute_excludes_unusable_rows() {
        assert!(recomputed_pnl(&position("buy", 1.0, 45_000.0, None, 100.0)).is_none());
        assert!(recomputed_pnl(&position("buy", 1.0, 0.0, Some(46_000.0), 100.0)).is_none());
        assert!(recomputed_pnl(&position("hold", 1.0, 45_000.0, Some(46_000.0), 100.0)).is_none());
        let pnl = recomputed_pnl(&position("sell", 10.0, 3_000.0, Some(2_900.0), 100.0)).unwrap();
        assert!((pnl - 1.0 / 3.0).abs() < 1e-9);
    }
}
