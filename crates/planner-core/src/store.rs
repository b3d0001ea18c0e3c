//! Portfolio Store
//!
//! Owns every position and is the only place that persists them. Each
//! mutation runs on a copy of the position: baseline recorded, change applied,
//! holdings reconciled, repository written, then the copy replaces the
//! original. A failed step leaves the portfolio untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PlannerError, Result};
use crate::ladder;
use crate::ledger;
use crate::model::{
    validate_holding, validate_price, validate_quantity, EventSource, ExitLevel, LedgerEvent, PercentageMode,
    Position, WalletAllocation, WalletKind,
};
use crate::price::{PriceBook, TrackedAsset};
use crate::projection::{PortfolioProjection, PositionProjection, Projector};
use crate::repository::PositionRepository;

/// Asset being added to the portfolio
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewHolding {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
}

/// Partial update of a purchase or sale; `None` keeps the current value
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventUpdate {
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub timestamp: Option<DateTime<Utc>>,

    /// `Some(None)` detaches the event from its wallet
    pub wallet_id: Option<Option<Uuid>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WalletUpdate {
    pub name: Option<String>,
    pub kind: Option<WalletKind>,
    pub initial_quantity: Option<Decimal>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EventKind {
    Purchase,
    Sale,
}

impl EventKind {
    fn events(self, position: &mut Position) -> &mut Vec<LedgerEvent> {
        match self {
            Self::Purchase => &mut position.purchases,
            Self::Sale => &mut position.sales,
        }
    }

    /// Amount an event of this kind moves its wallet
    fn wallet_delta(self, quantity: Decimal) -> Decimal {
        match self {
            Self::Purchase => quantity,
            Self::Sale => -quantity,
        }
    }
}

fn move_wallet(position: &mut Position, wallet_id: Option<Uuid>, delta: Decimal) -> Result<()> {
    let Some(wallet_id) = wallet_id else {
        return Ok(());
    };
    let wallet = position
        .wallet_mut(wallet_id)
        .ok_or_else(|| PlannerError::WalletNotFound(wallet_id.to_string()))?;
    wallet.transaction_balance += delta;
    Ok(())
}

fn find_event(position: &mut Position, kind: EventKind, event_id: Uuid) -> Result<usize> {
    kind.events(position)
        .iter()
        .position(|e| e.id == event_id)
        .ok_or_else(|| PlannerError::EventNotFound(event_id.to_string()))
}

fn push_event(position: &mut Position, kind: EventKind, event: LedgerEvent) -> Result<Uuid> {
    move_wallet(position, event.wallet_id, kind.wallet_delta(event.quantity))?;
    let id = event.id;
    kind.events(position).push(event);
    Ok(id)
}

fn update_event(position: &mut Position, kind: EventKind, event_id: Uuid, update: &EventUpdate) -> Result<()> {
    let index = find_event(position, kind, event_id)?;
    let old = kind.events(position)[index].clone();
    if old.is_ladder() {
        return Err(PlannerError::InvalidInput(
            "ladder sales change only through their exit level".into(),
        ));
    }

    let mut new = old.clone();
    if let Some(quantity) = update.quantity {
        validate_quantity(quantity)?;
        new.quantity = quantity;
    }
    if let Some(price) = update.price {
        validate_price(price)?;
        new.price = price;
    }
    if let Some(timestamp) = update.timestamp {
        new.timestamp = timestamp;
    }
    if let Some(wallet_id) = update.wallet_id {
        new.wallet_id = wallet_id;
    }

    move_wallet(position, old.wallet_id, -kind.wallet_delta(old.quantity))?;
    move_wallet(position, new.wallet_id, kind.wallet_delta(new.quantity))?;
    kind.events(position)[index] = new;
    Ok(())
}

fn remove_event(position: &mut Position, kind: EventKind, event_id: Uuid) -> Result<LedgerEvent> {
    let index = find_event(position, kind, event_id)?;
    let event = kind.events(position).remove(index);
    move_wallet(position, event.wallet_id, -kind.wallet_delta(event.quantity))?;

    if let EventSource::Ladder { level_id } = event.source {
        match position.exit_levels.iter_mut().find(|l| l.id == level_id) {
            Some(level) => level.execution = None,
            None => tracing::warn!(
                asset = %position.id,
                level = %level_id,
                "Deleted ladder sale has no originating level"
            ),
        }
    }
    Ok(event)
}

pub struct PortfolioStore {
    positions: Vec<Position>,
    repository: Arc<dyn PositionRepository>,
    projector: Projector,
}

impl PortfolioStore {
    pub fn new(repository: Arc<dyn PositionRepository>, projector: Projector) -> Self {
        Self {
            positions: Vec::new(),
            repository,
            projector,
        }
    }

    /// Replace in-memory state with the repository contents, reconciling each
    /// position so legacy records get their baseline.
    pub fn load(&mut self) -> Result<usize> {
        let mut positions = self.repository.list()?;
        for position in &mut positions {
            ledger::apply(position);
            self.repository.save(position)?;
        }

        tracing::info!(positions = positions.len(), "Loaded portfolio");
        self.positions = positions;
        Ok(self.positions.len())
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn position(&self, asset_id: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == asset_id)
    }

    pub const fn projector(&self) -> &Projector {
        &self.projector
    }

    fn index_of(&self, asset_id: &str) -> Result<usize> {
        self.positions
            .iter()
            .position(|p| p.id == asset_id)
            .ok_or_else(|| {
                tracing::warn!(asset = asset_id, "Position not found");
                PlannerError::PositionNotFound(asset_id.to_string())
            })
    }

    /// Run `change` against a copy of the position and commit only if every
    /// step succeeds, including the repository write.
    fn mutate<T, F>(&mut self, asset_id: &str, change: F) -> Result<T>
    where
        F: FnOnce(&mut Position) -> Result<T>,
    {
        let index = self.index_of(asset_id)?;
        let mut draft = self.positions[index].clone();

        ledger::ensure_baseline(&mut draft);
        let output = change(&mut draft)?;
        ledger::apply(&mut draft);
        draft.touch();

        self.repository.save(&draft)?;
        self.positions[index] = draft;
        Ok(output)
    }

    // ---- positions -------------------------------------------------------

    /// Add an asset. Adding one already held records a purchase at the given
    /// cost, merging into its weighted average.
    pub fn add_holding(&mut self, holding: NewHolding) -> Result<&Position> {
        let asset_id = holding.id.trim().to_string();

        if self.position(&asset_id).is_some() {
            let event = LedgerEvent::new(holding.quantity, holding.avg_cost, Utc::now())?;
            self.add_purchase(&asset_id, event)?;
        } else {
            let mut position = Position::new(
                asset_id.clone(),
                holding.symbol,
                holding.name,
                holding.quantity,
                holding.avg_cost,
            )?;
            ledger::apply(&mut position);
            self.repository.save(&position)?;
            tracing::info!(asset = %position.id, quantity = %position.quantity, "Added holding");
            self.positions.push(position);
        }

        let index = self.index_of(&asset_id)?;
        Ok(&self.positions[index])
    }

    /// Insert or replace a whole position (imports, seeds)
    pub fn upsert(&mut self, mut position: Position) -> Result<()> {
        position.validate()?;
        ledger::apply(&mut position);
        self.repository.save(&position)?;

        match self.positions.iter_mut().find(|p| p.id == position.id) {
            Some(existing) => *existing = position,
            None => self.positions.push(position),
        }
        Ok(())
    }

    pub fn remove_position(&mut self, asset_id: &str) -> Result<Position> {
        let index = self.index_of(asset_id)?;
        self.repository.delete(asset_id)?;
        let removed = self.positions.remove(index);
        tracing::info!(asset = asset_id, "Removed position");
        Ok(removed)
    }

    // ---- purchases and sales --------------------------------------------

    pub fn add_purchase(&mut self, asset_id: &str, event: LedgerEvent) -> Result<Uuid> {
        if event.is_ladder() {
            return Err(PlannerError::InvalidInput("purchases cannot come from the ladder".into()));
        }
        self.mutate(asset_id, |position| push_event(position, EventKind::Purchase, event))
    }

    pub fn update_purchase(&mut self, asset_id: &str, purchase_id: Uuid, update: &EventUpdate) -> Result<()> {
        self.mutate(asset_id, |position| {
            update_event(position, EventKind::Purchase, purchase_id, update)
        })
    }

    pub fn delete_purchase(&mut self, asset_id: &str, purchase_id: Uuid) -> Result<LedgerEvent> {
        self.mutate(asset_id, |position| {
            remove_event(position, EventKind::Purchase, purchase_id)
        })
    }

    /// Record a manual sale, snapshotting the current average cost as its basis
    pub fn add_sale(&mut self, asset_id: &str, mut event: LedgerEvent) -> Result<Uuid> {
        if event.is_ladder() {
            return Err(PlannerError::InvalidInput(
                "ladder sales are created by executing a level".into(),
            ));
        }
        self.mutate(asset_id, |position| {
            event.cost_basis_per_unit = Some(position.avg_cost);
            push_event(position, EventKind::Sale, event)
        })
    }

    pub fn update_sale(&mut self, asset_id: &str, sale_id: Uuid, update: &EventUpdate) -> Result<()> {
        self.mutate(asset_id, |position| {
            update_event(position, EventKind::Sale, sale_id, update)
        })
    }

    /// Delete a sale. Deleting a ladder sale reverts its exit level.
    pub fn delete_sale(&mut self, asset_id: &str, sale_id: Uuid) -> Result<LedgerEvent> {
        self.mutate(asset_id, |position| remove_event(position, EventKind::Sale, sale_id))
    }

    // ---- exit ladder ----------------------------------------------------

    pub fn add_level(&mut self, asset_id: &str, level: ExitLevel) -> Result<Uuid> {
        self.mutate(asset_id, |position| Ok(ladder::add_level(position, level)))
    }

    /// Returns whether the ladder was re-sorted
    pub fn set_level_price(&mut self, asset_id: &str, level_id: Uuid, price: Decimal) -> Result<bool> {
        self.mutate(asset_id, |position| ladder::set_level_price(position, level_id, price))
    }

    pub fn set_level_percentage(&mut self, asset_id: &str, level_id: Uuid, percentage: Decimal) -> Result<()> {
        self.mutate(asset_id, |position| {
            ladder::set_level_percentage(position, level_id, percentage)
        })
    }

    pub fn remove_level(&mut self, asset_id: &str, level_id: Uuid) -> Result<ExitLevel> {
        self.mutate(asset_id, |position| ladder::remove_level(position, level_id))
    }

    /// Set a level's executed state; returns the quantity sold or restored,
    /// `None` if nothing changed.
    pub fn toggle_execution(&mut self, asset_id: &str, level_id: Uuid, executed: bool) -> Result<Option<Decimal>> {
        self.mutate(asset_id, |position| {
            ladder::toggle_execution(position, level_id, executed, Utc::now())
        })
    }

    pub fn set_percentage_mode(&mut self, asset_id: &str, mode: PercentageMode) -> Result<bool> {
        self.mutate(asset_id, |position| Ok(ladder::set_mode(position, mode)))
    }

    // ---- wallets --------------------------------------------------------

    pub fn add_wallet(&mut self, asset_id: &str, wallet: WalletAllocation) -> Result<Uuid> {
        self.mutate(asset_id, |position| {
            let id = wallet.id;
            position.wallets.push(wallet);
            ledger::cover_wallets(position);
            Ok(id)
        })
    }

    pub fn update_wallet(&mut self, asset_id: &str, wallet_id: Uuid, update: WalletUpdate) -> Result<()> {
        self.mutate(asset_id, |position| {
            let wallet = position
                .wallet_mut(wallet_id)
                .ok_or_else(|| PlannerError::WalletNotFound(wallet_id.to_string()))?;

            if let Some(name) = update.name {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(PlannerError::InvalidInput("wallet name is required".into()));
                }
                wallet.name = name;
            }
            if let Some(kind) = update.kind {
                wallet.kind = kind;
            }
            if let Some(quantity) = update.initial_quantity {
                validate_holding(quantity)?;
                wallet.initial_quantity = quantity;
            }
            ledger::cover_wallets(position);
            Ok(())
        })
    }

    /// Remove a wallet; events tagged with it keep their quantities but lose the tag
    pub fn delete_wallet(&mut self, asset_id: &str, wallet_id: Uuid) -> Result<WalletAllocation> {
        self.mutate(asset_id, |position| {
            let index = position
                .wallets
                .iter()
                .position(|w| w.id == wallet_id)
                .ok_or_else(|| PlannerError::WalletNotFound(wallet_id.to_string()))?;

            for event in position.purchases.iter_mut().chain(position.sales.iter_mut()) {
                if event.wallet_id == Some(wallet_id) {
                    event.wallet_id = None;
                }
            }
            Ok(position.wallets.remove(index))
        })
    }

    // ---- read side ------------------------------------------------------

    /// Assets the price refresher should keep priced
    pub fn tracked_assets(&self) -> Vec<TrackedAsset> {
        self.positions
            .iter()
            .map(|p| TrackedAsset::new(p.id.clone(), p.symbol.clone()))
            .collect()
    }

    pub fn project(&self, prices: &PriceBook) -> PortfolioProjection {
        self.projector.project_portfolio(&self.positions, prices)
    }

    pub fn project_position(&self, asset_id: &str, prices: &PriceBook) -> Result<PositionProjection> {
        let index = self.index_of(asset_id)?;
        Ok(self.projector.project(&self.positions[index], prices))
    }
}
