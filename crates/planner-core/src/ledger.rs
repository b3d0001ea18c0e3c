//! Holdings Ledger
//!
//! Rebuilds a position's quantity and average cost from its baseline plus
//! the full purchase/sale history. Always a full recomputation, never an
//! incremental patch, so edits and deletions cannot drift.
//!
//! ```text
//! quantity = max(0, baseline + Σ purchases − Σ sales)
//! avg_cost = (baseline × baseline_avg + Σ purchase cost) / (baseline + Σ purchases)
//! ```
//!
//! Ladder executions are counted through their linked sale event. An executed
//! level whose sale event is missing (legacy data) is counted from the level.

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Baseline, Position};

/// Result of a reconciliation pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub baseline: Baseline,
    pub total_purchased: Decimal,
    pub purchase_cost: Decimal,
    pub total_sold: Decimal,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
}

#[derive(Clone, Copy, Debug, Default)]
struct Totals {
    purchased: Decimal,
    purchase_cost: Decimal,
    sold: Decimal,
}

fn totals(position: &Position) -> Totals {
    let purchased = position.purchases.iter().map(|p| p.quantity).sum();
    let purchase_cost = position.purchases.iter().map(|p| p.quantity * p.price).sum();

    let sale_ids: HashSet<Uuid> = position.sales.iter().map(|s| s.id).collect();
    let sold_by_events: Decimal = position.sales.iter().map(|s| s.quantity).sum();

    let unlinked_executions: Decimal = position
        .exit_levels
        .iter()
        .filter_map(|level| {
            let execution = level.execution.as_ref()?;
            if sale_ids.contains(&execution.sale_id) {
                return None;
            }
            tracing::warn!(
                asset = %position.id,
                level = %level.id,
                "Executed level has no linked sale event, counting level quantity"
            );
            Some(execution.quantity)
        })
        .sum();

    Totals {
        purchased,
        purchase_cost,
        sold: sold_by_events + unlinked_executions,
    }
}

/// Baseline recorded on the position, or derived from its current state
fn baseline_for(position: &Position, totals: &Totals) -> Baseline {
    position.baseline.unwrap_or_else(|| Baseline {
        quantity: (position.quantity - totals.purchased + totals.sold).max(Decimal::ZERO),
        avg_cost: position.avg_cost,
    })
}

fn compute(position: &Position, baseline: Baseline, totals: &Totals) -> Reconciliation {
    let quantity = (baseline.quantity + totals.purchased - totals.sold).max(Decimal::ZERO);

    let denominator = baseline.quantity + totals.purchased;
    let avg_cost = if denominator > Decimal::ZERO {
        (baseline.quantity * baseline.avg_cost + totals.purchase_cost) / denominator
    } else {
        position.avg_cost
    };

    Reconciliation {
        baseline,
        total_purchased: totals.purchased,
        purchase_cost: totals.purchase_cost,
        total_sold: totals.sold,
        quantity,
        avg_cost,
    }
}

/// Pure reconciliation: derive quantity and average cost without mutating.
pub fn reconcile(position: &Position) -> Reconciliation {
    let totals = totals(position);
    compute(position, baseline_for(position, &totals), &totals)
}

/// Record the baseline if it was never recorded. Must run before the first
/// event mutation so the derivation sees the pre-edit state.
pub fn ensure_baseline(position: &mut Position) -> Baseline {
    if let Some(baseline) = position.baseline {
        return baseline;
    }
    let baseline = baseline_for(position, &totals(position));
    tracing::debug!(
        asset = %position.id,
        quantity = %baseline.quantity,
        "Derived baseline holdings"
    );
    position.baseline = Some(baseline);
    baseline
}

/// Reconcile and write the result back into the position.
pub fn apply(position: &mut Position) -> Reconciliation {
    let totals = totals(position);
    let baseline = ensure_baseline(position);
    let result = compute(position, baseline, &totals);

    position.quantity = result.quantity;
    position.avg_cost = result.avg_cost;

    tracing::debug!(
        asset = %position.id,
        quantity = %result.quantity,
        avg_cost = %result.avg_cost,
        purchased = %result.total_purchased,
        sold = %result.total_sold,
        "Reconciled holdings"
    );

    result
}

/// Raise the baseline by however much the wallets hold beyond the ledger.
/// Never lowers it. Runs only after wallet edits; sales and executions draw
/// holdings below the wallet total without being undone here.
///
/// Returns the shortfall that was added, if any.
pub fn cover_wallets(position: &mut Position) -> Option<Decimal> {
    let mut baseline = ensure_baseline(position);
    let current = reconcile(position).quantity;
    let wallet_total = position.wallet_total();
    if wallet_total <= current {
        return None;
    }

    let shortfall = wallet_total - current;
    tracing::info!(
        asset = %position.id,
        from = %current,
        to = %wallet_total,
        "Raising holdings to match wallet distribution"
    );
    baseline.quantity += shortfall;
    position.baseline = Some(baseline);
    apply(position);
    Some(shortfall)
}
