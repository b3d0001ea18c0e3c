//! Domain Models
//!
//! Positions, exit levels, ledger events and wallet allocations.
//! Uses `rust_decimal` for all quantities and monetary values.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PlannerError, Result};

/// Upper bound for any quantity or unit price accepted into a position.
/// Quantity × price products stay far inside the `Decimal` range.
pub const MAX_AMOUNT: Decimal = dec!(1000000000000);

/// How an exit level's percentage is interpreted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PercentageMode {
    /// Fraction of what is left after prior non-executed levels
    #[default]
    Remaining,

    /// Fraction of the position, independent of other levels
    Total,
}

/// Origin of a sale event
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EventSource {
    #[default]
    Manual,

    /// Synthesized by executing the linked exit level
    Ladder { level_id: Uuid },
}

/// A purchase or sale in a position's history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub id: Uuid,

    /// Units bought or sold (always > 0)
    pub quantity: Decimal,

    /// Unit price in USD (>= 0)
    pub price: Decimal,

    pub timestamp: DateTime<Utc>,

    /// Wallet whose transaction balance this event moves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<Uuid>,

    #[serde(default)]
    pub source: EventSource,

    /// Average cost per unit at the moment a sale was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_basis_per_unit: Option<Decimal>,
}

impl LedgerEvent {
    /// Create a manual event, validating quantity and price
    pub fn new(quantity: Decimal, price: Decimal, timestamp: DateTime<Utc>) -> Result<Self> {
        validate_quantity(quantity)?;
        validate_price(price)?;

        Ok(Self {
            id: Uuid::new_v4(),
            quantity,
            price,
            timestamp,
            wallet_id: None,
            source: EventSource::Manual,
            cost_basis_per_unit: None,
        })
    }

    pub const fn with_wallet(mut self, wallet_id: Uuid) -> Self {
        self.wallet_id = Some(wallet_id);
        self
    }

    /// Sale emitted by executing an exit level
    pub(crate) fn ladder_sale(
        level_id: Uuid,
        quantity: Decimal,
        price: Decimal,
        cost_basis_per_unit: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            quantity,
            price,
            timestamp,
            wallet_id: None,
            source: EventSource::Ladder { level_id },
            cost_basis_per_unit: Some(cost_basis_per_unit),
        }
    }

    /// Gross value (quantity x price)
    pub fn value(&self) -> Decimal {
        self.quantity * self.price
    }

    pub const fn is_ladder(&self) -> bool {
        matches!(self.source, EventSource::Ladder { .. })
    }

    pub fn originating_level(&self) -> Option<Uuid> {
        match self.source {
            EventSource::Ladder { level_id } => Some(level_id),
            EventSource::Manual => None,
        }
    }
}

/// Frozen record of an executed exit level
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelExecution {
    /// Quantity sold, snapshotted when the level was executed
    pub quantity: Decimal,

    /// Linked sale event in `Position::sales`
    pub sale_id: Uuid,

    pub executed_at: DateTime<Utc>,
}

/// A planned partial sale at a target price
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitLevel {
    pub id: Uuid,

    /// Target sell price in USD; 0 while the level is a draft
    pub target_price: Decimal,

    /// Percentage on the 0..=100 scale, interpreted by the position's mode
    pub percentage: Decimal,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<LevelExecution>,
}

impl ExitLevel {
    /// Empty level, to be filled in before it counts
    pub fn draft() -> Self {
        Self {
            id: Uuid::new_v4(),
            target_price: Decimal::ZERO,
            percentage: Decimal::ZERO,
            execution: None,
        }
    }

    pub fn new(target_price: Decimal, percentage: Decimal) -> Result<Self> {
        validate_price(target_price)?;
        validate_percentage(percentage)?;

        Ok(Self {
            target_price,
            percentage,
            ..Self::draft()
        })
    }

    pub const fn is_executed(&self) -> bool {
        self.execution.is_some()
    }

    pub fn executed_quantity(&self) -> Option<Decimal> {
        self.execution.as_ref().map(|e| e.quantity)
    }

    /// Drafts (no price or no percentage) are excluded from every calculation
    pub fn is_draft(&self) -> bool {
        self.target_price <= Decimal::ZERO || self.percentage <= Decimal::ZERO
    }

    /// Percentage as a fraction (50 -> 0.5)
    pub fn fraction(&self) -> Decimal {
        self.percentage / Decimal::ONE_HUNDRED
    }
}

/// Custody location for part of a position
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
    HardwareWallet,
    #[default]
    Exchange,
    DefiProtocol,
    HotWallet,
    ColdStorage,
    Staking,
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAllocation {
    pub id: Uuid,

    pub name: String,

    #[serde(default)]
    pub kind: WalletKind,

    /// Amount the user entered for this wallet
    pub initial_quantity: Decimal,

    /// Running total moved by purchases (+) and sales (-) tagged with this wallet
    #[serde(default)]
    pub transaction_balance: Decimal,
}

impl WalletAllocation {
    pub fn new(name: impl Into<String>, kind: WalletKind, initial_quantity: Decimal) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(PlannerError::InvalidInput("wallet name is required".into()));
        }
        validate_holding(initial_quantity)?;

        Ok(Self {
            id: Uuid::new_v4(),
            name,
            kind,
            initial_quantity,
            transaction_balance: Decimal::ZERO,
        })
    }

    /// Initial amount plus transactions, never negative
    pub fn current_quantity(&self) -> Decimal {
        (self.initial_quantity + self.transaction_balance).max(Decimal::ZERO)
    }
}

/// Holdings recorded before any tracked purchase or sale
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    pub quantity: Decimal,
    pub avg_cost: Decimal,
}

/// A held asset with its event history and exit plan
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Price-source asset id (e.g. "bitcoin")
    pub id: String,

    /// Ticker symbol (e.g. "BTC")
    pub symbol: String,

    pub name: String,

    /// Current holdings, always the ledger-derived value
    pub quantity: Decimal,

    /// Weighted average cost per unit
    pub avg_cost: Decimal,

    /// Recorded on creation or derived once on first reconciliation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<Baseline>,

    #[serde(default)]
    pub percentage_mode: PercentageMode,

    #[serde(default)]
    pub exit_levels: Vec<ExitLevel>,

    #[serde(default)]
    pub purchases: Vec<LedgerEvent>,

    #[serde(default)]
    pub sales: Vec<LedgerEvent>,

    #[serde(default)]
    pub wallets: Vec<WalletAllocation>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        name: impl Into<String>,
        quantity: Decimal,
        avg_cost: Decimal,
    ) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(PlannerError::InvalidInput("asset id is required".into()));
        }
        validate_holding(quantity)?;
        validate_price(avg_cost)?;

        let now = Utc::now();
        Ok(Self {
            id,
            symbol: symbol.into().trim().to_uppercase(),
            name: name.into(),
            quantity,
            avg_cost,
            baseline: Some(Baseline { quantity, avg_cost }),
            percentage_mode: PercentageMode::default(),
            exit_levels: Vec::new(),
            purchases: Vec::new(),
            sales: Vec::new(),
            wallets: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Total cost of current holdings
    pub fn total_cost(&self) -> Decimal {
        self.quantity * self.avg_cost
    }

    pub fn level(&self, level_id: Uuid) -> Option<&ExitLevel> {
        self.exit_levels.iter().find(|l| l.id == level_id)
    }

    pub fn level_index(&self, level_id: Uuid) -> Option<usize> {
        self.exit_levels.iter().position(|l| l.id == level_id)
    }

    pub fn sale(&self, sale_id: Uuid) -> Option<&LedgerEvent> {
        self.sales.iter().find(|s| s.id == sale_id)
    }

    pub fn purchase(&self, purchase_id: Uuid) -> Option<&LedgerEvent> {
        self.purchases.iter().find(|p| p.id == purchase_id)
    }

    pub fn wallet(&self, wallet_id: Uuid) -> Option<&WalletAllocation> {
        self.wallets.iter().find(|w| w.id == wallet_id)
    }

    pub(crate) fn wallet_mut(&mut self, wallet_id: Uuid) -> Option<&mut WalletAllocation> {
        self.wallets.iter_mut().find(|w| w.id == wallet_id)
    }

    /// Sum of current wallet quantities
    pub fn wallet_total(&self) -> Decimal {
        self.wallets.iter().map(WalletAllocation::current_quantity).sum()
    }

    /// Holdings not assigned to any wallet
    pub fn undistributed(&self) -> Decimal {
        (self.quantity - self.wallet_total()).max(Decimal::ZERO)
    }

    /// Sum of frozen quantities over executed levels
    pub fn executed_quantity(&self) -> Decimal {
        self.exit_levels
            .iter()
            .filter_map(ExitLevel::executed_quantity)
            .sum()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Bounds check for positions arriving whole (imports, seeds)
    pub fn validate(&self) -> Result<()> {
        validate_holding(self.quantity)?;
        validate_price(self.avg_cost)?;
        if let Some(baseline) = self.baseline {
            validate_holding(baseline.quantity)?;
            validate_price(baseline.avg_cost)?;
        }
        for event in self.purchases.iter().chain(&self.sales) {
            validate_quantity(event.quantity)?;
            validate_price(event.price)?;
        }
        for level in &self.exit_levels {
            validate_price(level.target_price)?;
            validate_percentage(level.percentage)?;
        }
        for wallet in &self.wallets {
            validate_holding(wallet.initial_quantity)?;
        }
        Ok(())
    }
}

fn check_max(value: Decimal, what: &str) -> Result<()> {
    if value > MAX_AMOUNT {
        return Err(PlannerError::InvalidInput(format!(
            "{what} {value} exceeds {MAX_AMOUNT}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_quantity(quantity: Decimal) -> Result<()> {
    if quantity <= Decimal::ZERO {
        return Err(PlannerError::InvalidQuantity(quantity));
    }
    check_max(quantity, "quantity")
}

/// Like `validate_quantity` but zero is allowed
pub(crate) fn validate_holding(quantity: Decimal) -> Result<()> {
    if quantity < Decimal::ZERO {
        return Err(PlannerError::InvalidQuantity(quantity));
    }
    check_max(quantity, "quantity")
}

pub(crate) fn validate_price(price: Decimal) -> Result<()> {
    if price < Decimal::ZERO {
        return Err(PlannerError::InvalidPrice(price));
    }
    check_max(price, "price")
}

pub(crate) fn validate_percentage(percentage: Decimal) -> Result<()> {
    if percentage < Decimal::ZERO || percentage > Decimal::ONE_HUNDRED {
        return Err(PlannerError::InvalidInput(format!(
            "percentage {percentage} outside 0..=100"
        )));
    }
    Ok(())
}
