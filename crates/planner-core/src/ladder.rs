//! Exit Ladder
//!
//! Sizes each exit level against the position's holdings and manages the
//! level lifecycle (edit, reorder, execute, revert).
//!
//! # Percentage modes
//!
//! - **Remaining**: each level sells a share of what prior unexecuted levels
//!   leave behind. Executed levels keep their frozen quantity and do not
//!   shrink the remainder, since their sale is already out of `quantity`.
//! - **Total**: each level sells a share of the position as it stood before
//!   any ladder execution, capped at what is still unsold.
//!
//! Drafts (no price or no percentage) size to zero and never consume holdings.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PlannerError, Result};
use crate::ledger;
use crate::model::{
    validate_percentage, validate_price, ExitLevel, LedgerEvent, LevelExecution, PercentageMode,
    Position,
};

/// Sized view of one exit level
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelAmount {
    pub index: usize,
    pub level_id: Uuid,
    pub target_price: Decimal,
    pub quantity: Decimal,
    pub value: Decimal,
    pub executed: bool,
}

/// Aggregate view of a position's ladder
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderSummary {
    /// Share of the position the full ladder exits, 0..=100
    pub total_exit_pct: Decimal,

    /// Share kept after the full ladder, 0..=100
    pub retained_pct: Decimal,

    /// Quantity still to be sold by unexecuted levels
    pub planned_quantity: Decimal,

    /// Amount-weighted exit price over every sized level; `None` with nothing sized
    pub avg_exit_price: Option<Decimal>,

    pub active_levels: usize,
    pub executed_levels: usize,
    pub total_levels: usize,
}

fn planned_quantities(position: &Position) -> Vec<Decimal> {
    match position.percentage_mode {
        PercentageMode::Remaining => {
            let mut remaining = position.quantity;
            position
                .exit_levels
                .iter()
                .map(|level| {
                    if let Some(executed) = level.executed_quantity() {
                        return executed;
                    }
                    if level.is_draft() {
                        return Decimal::ZERO;
                    }
                    let amount = remaining * level.fraction();
                    remaining -= amount;
                    amount
                })
                .collect()
        }
        PercentageMode::Total => {
            let base = position.quantity + position.executed_quantity();
            let mut unsold = position.quantity;
            position
                .exit_levels
                .iter()
                .map(|level| {
                    if let Some(executed) = level.executed_quantity() {
                        return executed;
                    }
                    if level.is_draft() {
                        return Decimal::ZERO;
                    }
                    let amount = (base * level.fraction()).min(unsold).max(Decimal::ZERO);
                    unsold -= amount;
                    amount
                })
                .collect()
        }
    }
}

/// Quantity the level at `index` sells. Executed levels return their frozen quantity.
pub fn amount_for_level(position: &Position, index: usize) -> Option<Decimal> {
    planned_quantities(position).get(index).copied()
}

/// Gross value of the level at `index` (quantity x target price)
pub fn value_for_level(position: &Position, index: usize) -> Option<Decimal> {
    let level = position.exit_levels.get(index)?;
    amount_for_level(position, index).map(|q| q * level.target_price)
}

pub fn level_amounts(position: &Position) -> Vec<LevelAmount> {
    position
        .exit_levels
        .iter()
        .zip(planned_quantities(position))
        .enumerate()
        .map(|(index, (level, quantity))| LevelAmount {
            index,
            level_id: level.id,
            target_price: level.target_price,
            quantity,
            value: quantity * level.target_price,
            executed: level.is_executed(),
        })
        .collect()
}

/// Rewrite percentages so the ladder sells the same quantities under `to`.
///
/// Converting back reproduces the original percentages up to decimal precision.
pub fn convert_mode(levels: &[ExitLevel], from: PercentageMode, to: PercentageMode) -> Vec<ExitLevel> {
    if from == to {
        return levels.to_vec();
    }

    let mut used = Decimal::ZERO;
    levels
        .iter()
        .map(|level| {
            let fraction = level.fraction();
            let converted = match to {
                PercentageMode::Total => {
                    let total = (Decimal::ONE - used) * fraction;
                    used += total;
                    total
                }
                PercentageMode::Remaining => {
                    let left = Decimal::ONE - used;
                    let remaining = if left > Decimal::ZERO {
                        fraction / left
                    } else {
                        Decimal::ZERO
                    };
                    used += fraction;
                    remaining
                }
            };

            let mut level = level.clone();
            level.percentage = (converted * Decimal::ONE_HUNDRED)
                .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
                .normalize();
            level
        })
        .collect()
}

fn by_target_price(a: &ExitLevel, b: &ExitLevel) -> Ordering {
    let a_unpriced = a.target_price <= Decimal::ZERO;
    let b_unpriced = b.target_price <= Decimal::ZERO;
    match (a_unpriced, b_unpriced) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.target_price.cmp(&b.target_price),
    }
}

/// Stable ascending sort by target price, unpriced levels last.
/// Returns whether the order changed.
pub fn sort_levels(levels: &mut [ExitLevel]) -> bool {
    let before: Vec<Uuid> = levels.iter().map(|l| l.id).collect();
    levels.sort_by(by_target_price);
    levels.iter().map(|l| l.id).ne(before)
}

pub fn summary(position: &Position) -> LadderSummary {
    let amounts = level_amounts(position);
    let priced: Vec<&ExitLevel> = position.exit_levels.iter().filter(|l| !l.is_draft()).collect();

    let total_exit_fraction = match position.percentage_mode {
        PercentageMode::Remaining => {
            let kept = priced
                .iter()
                .fold(Decimal::ONE, |kept, l| kept * (Decimal::ONE - l.fraction()));
            Decimal::ONE - kept
        }
        PercentageMode::Total => priced.iter().map(|l| l.fraction()).sum::<Decimal>(),
    };
    let total_exit_pct = (total_exit_fraction * Decimal::ONE_HUNDRED)
        .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED);

    let sized_quantity: Decimal = amounts.iter().map(|a| a.quantity).sum();
    let sized_value: Decimal = amounts.iter().map(|a| a.value).sum();
    let avg_exit_price = (sized_quantity > Decimal::ZERO).then(|| sized_value / sized_quantity);

    let executed_levels = amounts.iter().filter(|a| a.executed).count();
    let active_levels = position
        .exit_levels
        .iter()
        .filter(|l| !l.is_executed() && !l.is_draft())
        .count();

    LadderSummary {
        total_exit_pct,
        retained_pct: Decimal::ONE_HUNDRED - total_exit_pct,
        planned_quantity: amounts.iter().filter(|a| !a.executed).map(|a| a.quantity).sum(),
        avg_exit_price,
        active_levels,
        executed_levels,
        total_levels: position.exit_levels.len(),
    }
}

fn level_mut(position: &mut Position, level_id: Uuid) -> Result<&mut ExitLevel> {
    position
        .exit_levels
        .iter_mut()
        .find(|l| l.id == level_id)
        .ok_or_else(|| PlannerError::LevelNotFound(level_id.to_string()))
}

fn editable_level(position: &mut Position, level_id: Uuid) -> Result<&mut ExitLevel> {
    let level = level_mut(position, level_id)?;
    if level.is_executed() {
        return Err(PlannerError::LevelFrozen(level_id.to_string()));
    }
    Ok(level)
}

/// Append a level and keep the ladder sorted
pub fn add_level(position: &mut Position, level: ExitLevel) -> Uuid {
    let id = level.id;
    position.exit_levels.push(level);
    sort_levels(&mut position.exit_levels);
    id
}

/// Change a level's target price. Positive prices trigger a re-sort; returns
/// whether the order changed.
pub fn set_level_price(position: &mut Position, level_id: Uuid, price: Decimal) -> Result<bool> {
    validate_price(price)?;
    editable_level(position, level_id)?.target_price = price;

    if price > Decimal::ZERO {
        return Ok(sort_levels(&mut position.exit_levels));
    }
    Ok(false)
}

pub fn set_level_percentage(position: &mut Position, level_id: Uuid, percentage: Decimal) -> Result<()> {
    validate_percentage(percentage)?;
    editable_level(position, level_id)?.percentage = percentage;
    Ok(())
}

/// Remove an unexecuted level. Executed levels must be reverted first.
pub fn remove_level(position: &mut Position, level_id: Uuid) -> Result<ExitLevel> {
    editable_level(position, level_id)?;
    let index = position
        .level_index(level_id)
        .ok_or_else(|| PlannerError::LevelNotFound(level_id.to_string()))?;
    Ok(position.exit_levels.remove(index))
}

/// Switch the percentage mode, converting every level's percentage
pub fn set_mode(position: &mut Position, mode: PercentageMode) -> bool {
    if position.percentage_mode == mode {
        return false;
    }
    position.exit_levels = convert_mode(&position.exit_levels, position.percentage_mode, mode);
    position.percentage_mode = mode;
    true
}

/// Execute a level: freeze its current amount, record the linked sale and
/// reconcile. Returns the quantity sold.
pub fn execute_level(position: &mut Position, level_id: Uuid, now: DateTime<Utc>) -> Result<Decimal> {
    let index = position
        .level_index(level_id)
        .ok_or_else(|| PlannerError::LevelNotFound(level_id.to_string()))?;

    let level = &position.exit_levels[index];
    if level.is_executed() {
        return Err(PlannerError::LevelFrozen(level_id.to_string()));
    }
    if level.is_draft() {
        return Err(PlannerError::InvalidInput(
            "cannot execute a level without price and percentage".into(),
        ));
    }
    let price = level.target_price;

    ledger::ensure_baseline(position);
    let quantity = amount_for_level(position, index).unwrap_or(Decimal::ZERO);
    if quantity <= Decimal::ZERO {
        return Err(PlannerError::InvalidQuantity(quantity));
    }

    let sale = LedgerEvent::ladder_sale(level_id, quantity, price, position.avg_cost, now);
    let sale_id = sale.id;
    position.sales.push(sale);
    position.exit_levels[index].execution = Some(LevelExecution {
        quantity,
        sale_id,
        executed_at: now,
    });

    ledger::apply(position);
    position.touch();

    tracing::info!(
        asset = %position.id,
        level = %level_id,
        quantity = %quantity,
        price = %price,
        "Executed exit level"
    );

    Ok(quantity)
}

/// Undo an execution: drop the linked sale, unfreeze the level and reconcile.
/// Returns the quantity restored.
pub fn revert_level(position: &mut Position, level_id: Uuid) -> Result<Decimal> {
    let execution = level_mut(position, level_id)?
        .execution
        .take()
        .ok_or_else(|| PlannerError::InvalidInput(format!("level {level_id} is not executed")))?;

    let before = position.sales.len();
    position.sales.retain(|s| s.id != execution.sale_id);
    if position.sales.len() == before {
        tracing::warn!(
            asset = %position.id,
            level = %level_id,
            sale = %execution.sale_id,
            "Linked sale event already missing on revert"
        );
    }

    ledger::apply(position);
    position.touch();

    tracing::info!(
        asset = %position.id,
        level = %level_id,
        quantity = %execution.quantity,
        "Reverted exit level"
    );

    Ok(execution.quantity)
}

/// Set a level's executed flag, doing nothing when it already matches
pub fn toggle_execution(
    position: &mut Position,
    level_id: Uuid,
    executed: bool,
    now: DateTime<Utc>,
) -> Result<Option<Decimal>> {
    let current = position
        .level(level_id)
        .ok_or_else(|| PlannerError::LevelNotFound(level_id.to_string()))?
        .is_executed();

    match (current, executed) {
        (false, true) => execute_level(position, level_id, now).map(Some),
        (true, false) => revert_level(position, level_id).map(Some),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position_with_levels(levels: &[(Decimal, Decimal)]) -> Position {
        let mut pos = Position::new("bitcoin", "BTC", "Bitcoin", dec!(100), dec!(10)).unwrap();
        for &(price, pct) in levels {
            pos.exit_levels.push(ExitLevel::new(price, pct).unwrap());
        }
        pos
    }

    fn assert_close(a: Decimal, b: Decimal) {
        let tolerance = dec!(0.000001) * b.abs().max(Decimal::ONE);
        assert!((a - b).abs() <= tolerance, "{a} != {b}");
    }

    #[test]
    fn test_remaining_mode_amounts() {
        let pos = position_with_levels(&[(dec!(150), dec!(50)), (dec!(200), dec!(50))]);
        assert_eq!(amount_for_level(&pos, 0), Some(dec!(50)));
        assert_eq!(amount_for_level(&pos, 1), Some(dec!(25)));
        assert_eq!(value_for_level(&pos, 1), Some(dec!(5000)));
        assert_eq!(amount_for_level(&pos, 2), None);
    }

    #[test]
    fn test_execution_freezes_amount_and_reduces_holdings() {
        let mut pos = position_with_levels(&[(dec!(150), dec!(50)), (dec!(200), dec!(50))]);
        let first = pos.exit_levels[0].id;

        let sold = execute_level(&mut pos, first, Utc::now()).unwrap();
        assert_eq!(sold, dec!(50));
        assert_eq!(pos.quantity, dec!(50));
        assert_eq!(amount_for_level(&pos, 0), Some(dec!(50)));
        assert_eq!(amount_for_level(&pos, 1), Some(dec!(25)));

        let sale = &pos.sales[0];
        assert_eq!(sale.originating_level(), Some(first));
        assert_eq!(sale.cost_basis_per_unit, Some(dec!(10)));
    }

    #[test]
    fn test_revert_restores_holdings() {
        let mut pos = position_with_levels(&[(dec!(150), dec!(50))]);
        let id = pos.exit_levels[0].id;

        execute_level(&mut pos, id, Utc::now()).unwrap();
        assert!(matches!(
            execute_level(&mut pos, id, Utc::now()),
            Err(PlannerError::LevelFrozen(_))
        ));

        assert_eq!(revert_level(&mut pos, id).unwrap(), dec!(50));
        assert_eq!(pos.quantity, dec!(100));
        assert!(pos.sales.is_empty());
        assert!(!pos.exit_levels[0].is_executed());
    }

    #[test]
    fn test_toggle_is_noop_when_state_matches() {
        let mut pos = position_with_levels(&[(dec!(150), dec!(10))]);
        let id = pos.exit_levels[0].id;
        assert_eq!(toggle_execution(&mut pos, id, false, Utc::now()).unwrap(), None);
        assert_eq!(
            toggle_execution(&mut pos, id, true, Utc::now()).unwrap(),
            Some(dec!(10))
        );
        assert_eq!(toggle_execution(&mut pos, id, true, Utc::now()).unwrap(), None);
    }

    #[test]
    fn test_draft_levels_are_skipped() {
        let mut pos = position_with_levels(&[(dec!(150), dec!(50))]);
        pos.exit_levels.insert(0, ExitLevel::draft());
        assert_eq!(amount_for_level(&pos, 0), Some(Decimal::ZERO));
        assert_eq!(amount_for_level(&pos, 1), Some(dec!(50)));

        let draft = pos.exit_levels[0].id;
        assert!(execute_level(&mut pos, draft, Utc::now()).is_err());
    }

    #[test]
    fn test_total_mode_amounts_are_independent_and_capped() {
        let mut pos = position_with_levels(&[
            (dec!(150), dec!(30)),
            (dec!(200), dec!(30)),
            (dec!(300), dec!(60)),
        ]);
        pos.percentage_mode = PercentageMode::Total;

        assert_eq!(amount_for_level(&pos, 0), Some(dec!(30)));
        assert_eq!(amount_for_level(&pos, 1), Some(dec!(30)));
        assert_eq!(amount_for_level(&pos, 2), Some(dec!(40)));

        let first = pos.exit_levels[0].id;
        execute_level(&mut pos, first, Utc::now()).unwrap();
        assert_eq!(pos.quantity, dec!(70));
        assert_eq!(amount_for_level(&pos, 1), Some(dec!(30)));
    }

    #[test]
    fn test_mode_conversion_round_trip() {
        let levels: Vec<ExitLevel> = [dec!(25), dec!(33.3), dec!(50), dec!(10)]
            .into_iter()
            .enumerate()
            .map(|(i, pct)| ExitLevel::new(Decimal::from(100 * (i + 1)), pct).unwrap())
            .collect();

        let total = convert_mode(&levels, PercentageMode::Remaining, PercentageMode::Total);
        assert_eq!(total[0].percentage, dec!(25));
        assert_close(total[1].percentage, dec!(24.975));

        let back = convert_mode(&total, PercentageMode::Total, PercentageMode::Remaining);
        for (original, converted) in levels.iter().zip(&back) {
            assert_close(converted.percentage, original.percentage);
        }
    }

    #[test]
    fn test_set_mode_preserves_quantities() {
        let mut pos = position_with_levels(&[(dec!(150), dec!(50)), (dec!(200), dec!(50))]);
        let before: Vec<Decimal> = level_amounts(&pos).iter().map(|a| a.quantity).collect();

        assert!(set_mode(&mut pos, PercentageMode::Total));
        assert!(!set_mode(&mut pos, PercentageMode::Total));
        let after: Vec<Decimal> = level_amounts(&pos).iter().map(|a| a.quantity).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_price_edit_resorts_with_unpriced_last() {
        let mut pos = position_with_levels(&[(dec!(100), dec!(10)), (dec!(200), dec!(10))]);
        add_level(&mut pos, ExitLevel::draft());
        let draft = pos.exit_levels[2].id;
        let first = pos.exit_levels[0].id;

        assert!(set_level_price(&mut pos, first, dec!(300)).unwrap());
        let prices: Vec<Decimal> = pos.exit_levels.iter().map(|l| l.target_price).collect();
        assert_eq!(prices, vec![dec!(200), dec!(300), Decimal::ZERO]);
        assert_eq!(pos.exit_levels[2].id, draft);

        assert!(!set_level_price(&mut pos, draft, Decimal::ZERO).unwrap());
    }

    #[test]
    fn test_executed_level_cannot_be_edited_or_removed() {
        let mut pos = position_with_levels(&[(dec!(150), dec!(50))]);
        let id = pos.exit_levels[0].id;
        execute_level(&mut pos, id, Utc::now()).unwrap();

        assert!(matches!(
            set_level_percentage(&mut pos, id, dec!(20)),
            Err(PlannerError::LevelFrozen(_))
        ));
        assert!(remove_level(&mut pos, id).is_err());

        revert_level(&mut pos, id).unwrap();
        assert!(remove_level(&mut pos, id).is_ok());
        assert!(pos.exit_levels.is_empty());
    }

    #[test]
    fn test_summary() {
        let pos = position_with_levels(&[(dec!(150), dec!(50)), (dec!(200), dec!(50))]);
        let summary = summary(&pos);

        assert_eq!(summary.total_exit_pct, dec!(75));
        assert_eq!(summary.retained_pct, dec!(25));
        assert_eq!(summary.planned_quantity, dec!(75));
        assert_eq!(summary.active_levels, 2);
        assert_eq!(summary.executed_levels, 0);

        // (50 x 150 + 25 x 200) / 75
        assert_eq!(summary.avg_exit_price.unwrap().round_dp(4), dec!(166.6667));
    }

    #[test]
    fn test_summary_without_levels() {
        let pos = position_with_levels(&[]);
        let summary = summary(&pos);
        assert_eq!(summary.total_exit_pct, Decimal::ZERO);
        assert_eq!(summary.avg_exit_price, None);
    }
}
