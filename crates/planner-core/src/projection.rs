//! Financial Projector
//!
//! Turns ladders, sales and prices into exit values, tax, tithe and net
//! proceeds per position and across the portfolio. Everything is USD.
//!
//! ```text
//! gross     = quantity × price
//! cost      = quantity × avg cost at sale time
//! tax       = max(0, (gross − cost) × tax rate)
//! tithe     = gross × tithe rate
//! net       = gross − cost − tax − tithe
//! ```

use std::cmp::Ordering;
use std::ops::AddAssign;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PlannerConfig;
use crate::ladder::{self, LadderSummary};
use crate::model::Position;
use crate::price::{PriceBook, PriceQuote};

/// Tax and tithe rates as fractions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxPolicy {
    pub tax_rate: Decimal,
    pub tithe_rate: Decimal,
}

impl Default for TaxPolicy {
    fn default() -> Self {
        Self::from_config(&PlannerConfig::default())
    }
}

impl TaxPolicy {
    pub const fn from_config(config: &PlannerConfig) -> Self {
        Self {
            tax_rate: config.tax_rate,
            tithe_rate: config.tithe_rate,
        }
    }
}

/// Proceeds of one sale, or a sum of sales
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleBreakdown {
    pub gross: Decimal,
    pub cost_basis: Decimal,
    pub gain: Decimal,
    pub tax: Decimal,
    pub tithe: Decimal,
    pub net: Decimal,
}

impl SaleBreakdown {
    pub fn compute(quantity: Decimal, price: Decimal, cost_per_unit: Decimal, policy: &TaxPolicy) -> Self {
        Self::from_amounts(quantity * price, quantity * cost_per_unit, policy)
    }

    /// Breakdown from aggregate gross value and cost basis. Tax never goes negative.
    pub fn from_amounts(gross: Decimal, cost_basis: Decimal, policy: &TaxPolicy) -> Self {
        let gain = gross - cost_basis;
        let tax = (gain * policy.tax_rate).max(Decimal::ZERO);
        let tithe = gross * policy.tithe_rate;

        Self {
            gross,
            cost_basis,
            gain,
            tax,
            tithe,
            net: gross - cost_basis - tax - tithe,
        }
    }
}

impl AddAssign for SaleBreakdown {
    fn add_assign(&mut self, other: Self) {
        self.gross += other.gross;
        self.cost_basis += other.cost_basis;
        self.gain += other.gain;
        self.tax += other.tax;
        self.tithe += other.tithe;
        self.net += other.net;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SignalStatus {
    /// Price has passed at least one unexecuted level
    Urgent {
        passed_by_pct: Decimal,
        passed_count: usize,
    },

    /// Next unexecuted level above the current price
    Upcoming { distance_pct: Decimal },
}

/// Most pressing exit level of a position at the current price
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitSignal {
    pub asset_id: String,
    pub symbol: String,
    pub level_id: Uuid,
    pub current_price: Decimal,
    pub target_price: Decimal,
    #[serde(flatten)]
    pub status: SignalStatus,
}

impl ExitSignal {
    pub const fn is_urgent(&self) -> bool {
        matches!(self.status, SignalStatus::Urgent { .. })
    }
}

/// Urgent (largest passed-by) wins over upcoming (smallest distance).
/// `None` without a positive price or without unexecuted priced levels.
pub fn exit_signal(position: &Position, current_price: Decimal) -> Option<ExitSignal> {
    if current_price <= Decimal::ZERO {
        return None;
    }

    let open: Vec<_> = position
        .exit_levels
        .iter()
        .filter(|l| !l.is_executed() && !l.is_draft())
        .collect();

    let signal = |level_id, target_price, status| ExitSignal {
        asset_id: position.id.clone(),
        symbol: position.symbol.clone(),
        level_id,
        current_price,
        target_price,
        status,
    };

    let passed: Vec<_> = open.iter().filter(|l| l.target_price <= current_price).collect();
    if let Some(deepest) = passed.iter().min_by_key(|l| l.target_price) {
        let passed_by_pct =
            (current_price - deepest.target_price) / deepest.target_price * Decimal::ONE_HUNDRED;
        return Some(signal(
            deepest.id,
            deepest.target_price,
            SignalStatus::Urgent {
                passed_by_pct,
                passed_count: passed.len(),
            },
        ));
    }

    open.iter()
        .filter(|l| l.target_price > current_price)
        .min_by_key(|l| l.target_price)
        .map(|next| {
            let distance_pct =
                (next.target_price - current_price) / current_price * Decimal::ONE_HUNDRED;
            signal(next.id, next.target_price, SignalStatus::Upcoming { distance_pct })
        })
}

/// Urgent first by passed-by descending, then upcoming by distance ascending
fn rank_signals(a: &ExitSignal, b: &ExitSignal) -> Ordering {
    match (a.status, b.status) {
        (
            SignalStatus::Urgent { passed_by_pct: pa, .. },
            SignalStatus::Urgent { passed_by_pct: pb, .. },
        ) => pb.cmp(&pa),
        (SignalStatus::Urgent { .. }, SignalStatus::Upcoming { .. }) => Ordering::Less,
        (SignalStatus::Upcoming { .. }, SignalStatus::Urgent { .. }) => Ordering::Greater,
        (
            SignalStatus::Upcoming { distance_pct: da },
            SignalStatus::Upcoming { distance_pct: db },
        ) => da.cmp(&db),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionProjection {
    pub asset_id: String,
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_cost: Decimal,

    /// Value of unexecuted levels at their targets
    pub planned_exit_value: Decimal,

    /// Executed levels plus manual sales
    pub realized_value: Decimal,

    /// Tax, tithe and net over realized sales
    pub tax: Decimal,
    pub tithe: Decimal,
    pub net: Decimal,

    /// realized / planned × 100; 0 with nothing planned
    pub exit_progress_pct: Decimal,

    pub planned: SaleBreakdown,
    pub realized: SaleBreakdown,

    /// `None` when no price is available from any tier
    pub quote: Option<PriceQuote>,
    pub current_value: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub unrealized_pnl_pct: Option<Decimal>,

    pub signal: Option<ExitSignal>,
    pub ladder: LadderSummary,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioProjection {
    pub positions: Vec<PositionProjection>,
    pub planned_exit_value: Decimal,
    pub realized_value: Decimal,
    pub tax: Decimal,
    pub tithe: Decimal,
    pub net: Decimal,
    pub exit_progress_pct: Decimal,

    /// Sum over priced positions only
    pub current_value: Decimal,
    pub unrealized_pnl: Decimal,

    /// Assets with no price from any tier
    pub unpriced: Vec<String>,

    /// Ranked exit signals across positions
    pub signals: Vec<ExitSignal>,

    /// At least one quote came from a live fetch
    pub live: bool,
}

impl PortfolioProjection {
    pub fn top_signals(&self, n: usize) -> &[ExitSignal] {
        &self.signals[..n.min(self.signals.len())]
    }

    pub fn position(&self, asset_id: &str) -> Option<&PositionProjection> {
        self.positions.iter().find(|p| p.asset_id == asset_id)
    }
}

fn progress_pct(realized: Decimal, planned: Decimal) -> Decimal {
    if planned > Decimal::ZERO {
        realized / planned * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Projector {
    policy: TaxPolicy,
}

impl Projector {
    pub const fn new(policy: TaxPolicy) -> Self {
        Self { policy }
    }

    pub const fn from_config(config: &PlannerConfig) -> Self {
        Self::new(TaxPolicy::from_config(config))
    }

    pub const fn policy(&self) -> &TaxPolicy {
        &self.policy
    }

    pub fn project(&self, position: &Position, prices: &PriceBook) -> PositionProjection {
        let amounts = ladder::level_amounts(position);

        let (planned_quantity, planned_exit_value) = amounts
            .iter()
            .filter(|a| !a.executed)
            .fold((Decimal::ZERO, Decimal::ZERO), |(q, v), a| (q + a.quantity, v + a.value));
        let planned = SaleBreakdown::from_amounts(
            planned_exit_value,
            planned_quantity * position.avg_cost,
            &self.policy,
        );

        let mut realized = SaleBreakdown::default();
        for level in &position.exit_levels {
            let Some(execution) = &level.execution else {
                continue;
            };
            let cost_per_unit = position
                .sale(execution.sale_id)
                .and_then(|s| s.cost_basis_per_unit)
                .unwrap_or(position.avg_cost);
            realized += SaleBreakdown::compute(
                execution.quantity,
                level.target_price,
                cost_per_unit,
                &self.policy,
            );
        }
        for sale in position.sales.iter().filter(|s| !s.is_ladder()) {
            realized += SaleBreakdown::compute(
                sale.quantity,
                sale.price,
                sale.cost_basis_per_unit.unwrap_or(position.avg_cost),
                &self.policy,
            );
        }

        let quote = prices.quote(&position.id).cloned();
        let current_value = quote.as_ref().map(|q| position.quantity * q.price);
        let unrealized_pnl = current_value.map(|v| v - position.total_cost());
        let unrealized_pnl_pct = unrealized_pnl.and_then(|pnl| {
            let cost = position.total_cost();
            (cost > Decimal::ZERO).then(|| pnl / cost * Decimal::ONE_HUNDRED)
        });
        let signal = quote.as_ref().and_then(|q| exit_signal(position, q.price));

        PositionProjection {
            asset_id: position.id.clone(),
            symbol: position.symbol.clone(),
            quantity: position.quantity,
            avg_cost: position.avg_cost,
            planned_exit_value,
            realized_value: realized.gross,
            tax: realized.tax,
            tithe: realized.tithe,
            net: realized.net,
            exit_progress_pct: progress_pct(realized.gross, planned_exit_value),
            planned,
            realized,
            quote,
            current_value,
            unrealized_pnl,
            unrealized_pnl_pct,
            signal,
            ladder: ladder::summary(position),
        }
    }

    pub fn project_portfolio<'a, I>(&self, positions: I, prices: &PriceBook) -> PortfolioProjection
    where
        I: IntoIterator<Item = &'a Position>,
    {
        let mut portfolio = PortfolioProjection {
            live: prices.is_live(),
            ..PortfolioProjection::default()
        };

        for position in positions {
            let projection = self.project(position, prices);

            portfolio.planned_exit_value += projection.planned_exit_value;
            portfolio.realized_value += projection.realized_value;
            portfolio.tax += projection.tax;
            portfolio.tithe += projection.tithe;
            portfolio.net += projection.net;

            match (projection.current_value, projection.unrealized_pnl) {
                (Some(value), Some(pnl)) => {
                    portfolio.current_value += value;
                    portfolio.unrealized_pnl += pnl;
                }
                _ => portfolio.unpriced.push(projection.asset_id.clone()),
            }
            if let Some(signal) = &projection.signal {
                portfolio.signals.push(signal.clone());
            }

            portfolio.positions.push(projection);
        }

        portfolio.signals.sort_by(rank_signals);
        portfolio.exit_progress_pct = progress_pct(portfolio.realized_value, portfolio.planned_exit_value);
        portfolio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExitLevel, LedgerEvent};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn position(id: &str, quantity: Decimal, avg: Decimal) -> Position {
        Position::new(id, id, id, quantity, avg).unwrap()
    }

    #[test]
    fn test_sale_breakdown_with_gain() {
        let sale = SaleBreakdown::compute(dec!(2), dec!(1000), dec!(100), &TaxPolicy::default());
        assert_eq!(sale.gross, dec!(2000));
        assert_eq!(sale.gain, dec!(1800));
        assert_eq!(sale.tax, dec!(396));
        assert_eq!(sale.tithe, dec!(200));
        assert_eq!(sale.net, dec!(1204));
    }

    #[test]
    fn test_loss_is_never_taxed() {
        let sale = SaleBreakdown::compute(dec!(1), dec!(50), dec!(100), &TaxPolicy::default());
        assert_eq!(sale.tax, Decimal::ZERO);
        assert_eq!(sale.tithe, dec!(5));
        assert_eq!(sale.net, dec!(-55));
    }

    #[test]
    fn test_manual_sale_projection() {
        let mut pos = position("bitcoin", dec!(10), dec!(100));
        pos.sales
            .push(LedgerEvent::new(dec!(2), dec!(1000), Utc::now()).unwrap());
        crate::ledger::apply(&mut pos);

        let projection = Projector::default().project(&pos, &PriceBook::new());
        assert_eq!(projection.realized_value, dec!(2000));
        assert_eq!(projection.tax, dec!(396));
        assert_eq!(projection.tithe, dec!(200));
        assert_eq!(projection.net, dec!(1204));
        assert_eq!(projection.exit_progress_pct, Decimal::ZERO);
        assert_eq!(projection.current_value, None);
    }

    #[test]
    fn test_executed_levels_and_ladder_sales_counted_once() {
        let mut pos = position("bitcoin", dec!(100), dec!(10));
        pos.exit_levels.push(ExitLevel::new(dec!(150), dec!(50)).unwrap());
        pos.exit_levels.push(ExitLevel::new(dec!(200), dec!(50)).unwrap());
        let first = pos.exit_levels[0].id;
        ladder::execute_level(&mut pos, first, Utc::now()).unwrap();

        let projection = Projector::default().project(&pos, &PriceBook::new());
        assert_eq!(projection.realized_value, dec!(7500));
        assert_eq!(projection.planned_exit_value, dec!(5000));
        assert_eq!(projection.exit_progress_pct, dec!(150));

        // 25 × 200 = 5000 gross, 250 cost
        assert_eq!(projection.planned.tax, dec!(1045));
        assert_eq!(projection.planned.tithe, dec!(500));
    }

    #[test]
    fn test_unrealized_pnl_when_priced() {
        let pos = position("bitcoin", dec!(2), dec!(100));
        let prices = PriceBook::from_prices([("bitcoin", dec!(150))]);

        let projection = Projector::default().project(&pos, &prices);
        assert_eq!(projection.current_value, Some(dec!(300)));
        assert_eq!(projection.unrealized_pnl, Some(dec!(100)));
        assert_eq!(projection.unrealized_pnl_pct, Some(dec!(50)));
    }

    #[test]
    fn test_urgent_overrides_closest() {
        let mut pos = position("bitcoin", dec!(1), dec!(100));
        for price in [dec!(80), dec!(90), dec!(110)] {
            pos.exit_levels.push(ExitLevel::new(price, dec!(10)).unwrap());
        }

        let signal = exit_signal(&pos, dec!(100)).unwrap();
        assert_eq!(signal.target_price, dec!(80));
        assert_eq!(
            signal.status,
            SignalStatus::Urgent {
                passed_by_pct: dec!(25),
                passed_count: 2
            }
        );

        let upcoming = exit_signal(&pos, dec!(50)).unwrap();
        assert_eq!(upcoming.target_price, dec!(80));
        assert_eq!(upcoming.status, SignalStatus::Upcoming { distance_pct: dec!(60) });

        assert!(exit_signal(&pos, Decimal::ZERO).is_none());
    }

    #[test]
    fn test_portfolio_ranking_and_unpriced() {
        let mut btc = position("bitcoin", dec!(1), dec!(100));
        btc.exit_levels.push(ExitLevel::new(dec!(120), dec!(50)).unwrap());
        let mut eth = position("ethereum", dec!(1), dec!(100));
        eth.exit_levels.push(ExitLevel::new(dec!(90), dec!(50)).unwrap());
        let mut sol = position("solana", dec!(1), dec!(100));
        sol.exit_levels.push(ExitLevel::new(dec!(105), dec!(50)).unwrap());
        let ghost = position("ghost", dec!(1), dec!(1));

        let prices = PriceBook::from_prices([
            ("bitcoin", dec!(100)),
            ("ethereum", dec!(100)),
            ("solana", dec!(100)),
        ]);
        let portfolio = Projector::default().project_portfolio([&btc, &eth, &sol, &ghost], &prices);

        let order: Vec<&str> = portfolio.signals.iter().map(|s| s.asset_id.as_str()).collect();
        assert_eq!(order, vec!["ethereum", "solana", "bitcoin"]);
        assert!(portfolio.signals[0].is_urgent());
        assert_eq!(portfolio.top_signals(2).len(), 2);
        assert_eq!(portfolio.top_signals(10).len(), 3);
        assert_eq!(portfolio.unpriced, vec!["ghost".to_string()]);
        assert_eq!(portfolio.current_value, dec!(300));
        assert!(portfolio.live);
    }
}
