//! Edit sessions
//!
//! Tracks rows a user is editing (exit levels, purchases, sales, wallets)
//! without putting editing flags on the domain types. Field input is parsed
//! as it is typed; nothing reaches the position until `commit`.

use std::collections::HashMap;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{PlannerError, Result};
use crate::input::{parse_decimal, parse_percentage, parse_quantity};
use crate::store::{EventUpdate, PortfolioStore, WalletUpdate};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EditTarget {
    Level(Uuid),
    Purchase(Uuid),
    Sale(Uuid),
    Wallet(Uuid),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditField {
    Price,
    Percentage,
    Quantity,
    Name,
}

/// Working copy of the editable fields of one row
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingEdit {
    Level {
        target_price: Decimal,
        percentage: Decimal,
    },
    Event {
        quantity: Decimal,
        price: Decimal,
    },
    Wallet {
        name: String,
        initial_quantity: Decimal,
    },
}

/// Pending edits for one position
#[derive(Debug)]
pub struct EditSession {
    asset_id: String,
    pending: HashMap<EditTarget, PendingEdit>,
}

impl EditSession {
    pub fn new(asset_id: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            pending: HashMap::new(),
        }
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub fn is_editing(&self, target: EditTarget) -> bool {
        self.pending.contains_key(&target)
    }

    pub fn pending(&self, target: EditTarget) -> Option<&PendingEdit> {
        self.pending.get(&target)
    }

    /// Start editing a row, copying its current values. Re-beginning keeps
    /// the existing working copy.
    pub fn begin(&mut self, store: &PortfolioStore, target: EditTarget) -> Result<&PendingEdit> {
        if !self.pending.contains_key(&target) {
            let edit = self.snapshot(store, target)?;
            self.pending.insert(target, edit);
        }
        self.pending
            .get(&target)
            .ok_or_else(|| PlannerError::Other("edit vanished after begin".into()))
    }

    fn snapshot(&self, store: &PortfolioStore, target: EditTarget) -> Result<PendingEdit> {
        let position = store
            .position(&self.asset_id)
            .ok_or_else(|| PlannerError::PositionNotFound(self.asset_id.clone()))?;

        match target {
            EditTarget::Level(id) => {
                let level = position
                    .level(id)
                    .ok_or_else(|| PlannerError::LevelNotFound(id.to_string()))?;
                if level.is_executed() {
                    return Err(PlannerError::LevelFrozen(id.to_string()));
                }
                Ok(PendingEdit::Level {
                    target_price: level.target_price,
                    percentage: level.percentage,
                })
            }
            EditTarget::Purchase(id) | EditTarget::Sale(id) => {
                let event = match target {
                    EditTarget::Purchase(_) => position.purchase(id),
                    _ => position.sale(id),
                }
                .ok_or_else(|| PlannerError::EventNotFound(id.to_string()))?;
                Ok(PendingEdit::Event {
                    quantity: event.quantity,
                    price: event.price,
                })
            }
            EditTarget::Wallet(id) => {
                let wallet = position
                    .wallet(id)
                    .ok_or_else(|| PlannerError::WalletNotFound(id.to_string()))?;
                Ok(PendingEdit::Wallet {
                    name: wallet.name.clone(),
                    initial_quantity: wallet.initial_quantity,
                })
            }
        }
    }

    /// Parse raw user input into a field of the working copy.
    /// Invalid input is rejected and the field keeps its previous value.
    pub fn set_field(&mut self, target: EditTarget, field: EditField, raw: &str) -> Result<()> {
        let edit = self
            .pending
            .get_mut(&target)
            .ok_or_else(|| PlannerError::InvalidInput("row is not being edited".into()))?;

        match (edit, field) {
            (PendingEdit::Level { target_price, .. }, EditField::Price) => {
                *target_price = parse_decimal(raw)?;
            }
            (PendingEdit::Level { percentage, .. }, EditField::Percentage) => {
                *percentage = parse_percentage(raw)?;
            }
            (PendingEdit::Event { quantity, .. }, EditField::Quantity) => {
                *quantity = parse_quantity(raw)?;
            }
            (PendingEdit::Event { price, .. }, EditField::Price) => {
                *price = parse_decimal(raw)?;
            }
            (PendingEdit::Wallet { name, .. }, EditField::Name) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(PlannerError::InvalidInput("wallet name is required".into()));
                }
                *name = trimmed.to_string();
            }
            (PendingEdit::Wallet { initial_quantity, .. }, EditField::Quantity) => {
                *initial_quantity = parse_decimal(raw)?;
            }
            (_, field) => {
                return Err(PlannerError::InvalidInput(format!(
                    "{field:?} is not editable on this row"
                )));
            }
        }
        Ok(())
    }

    pub fn discard(&mut self, target: EditTarget) -> bool {
        self.pending.remove(&target).is_some()
    }

    /// Write the working copy through the store. Rejected values keep the
    /// edit pending so the user can correct them; any other failure means the
    /// row changed underneath the edit, which is then dropped.
    pub fn commit(&mut self, store: &mut PortfolioStore, target: EditTarget) -> Result<()> {
        let edit = self
            .pending
            .get(&target)
            .ok_or_else(|| PlannerError::InvalidInput("row is not being edited".into()))?;

        match write(store, &self.asset_id, target, edit) {
            Ok(()) => {
                self.pending.remove(&target);
                Ok(())
            }
            Err(e) if e.is_input_error() => Err(e),
            Err(e) => {
                tracing::warn!(asset = %self.asset_id, ?target, error = %e, "Dropping stale edit");
                self.pending.remove(&target);
                Err(e)
            }
        }
    }
}

fn write(store: &mut PortfolioStore, asset_id: &str, target: EditTarget, edit: &PendingEdit) -> Result<()> {
    match (target, edit) {
        (EditTarget::Level(id), PendingEdit::Level { target_price, percentage }) => {
            store.set_level_percentage(asset_id, id, *percentage)?;
            store.set_level_price(asset_id, id, *target_price)?;
        }
        (EditTarget::Purchase(id), PendingEdit::Event { quantity, price }) => {
            let update = EventUpdate {
                quantity: Some(*quantity),
                price: Some(*price),
                ..EventUpdate::default()
            };
            store.update_purchase(asset_id, id, &update)?;
        }
        (EditTarget::Sale(id), PendingEdit::Event { quantity, price }) => {
            let update = EventUpdate {
                quantity: Some(*quantity),
                price: Some(*price),
                ..EventUpdate::default()
            };
            store.update_sale(asset_id, id, &update)?;
        }
        (EditTarget::Wallet(id), PendingEdit::Wallet { name, initial_quantity }) => {
            let update = WalletUpdate {
                name: Some(name.clone()),
                initial_quantity: Some(*initial_quantity),
                ..WalletUpdate::default()
            };
            store.update_wallet(asset_id, id, update)?;
        }
        _ => {
            return Err(PlannerError::Other(format!("edit does not match {target:?}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExitLevel, LedgerEvent, WalletAllocation, WalletKind};
    use crate::projection::Projector;
    use crate::repository::MemoryPositionRepository;
    use crate::store::NewHolding;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn store() -> PortfolioStore {
        let mut store = PortfolioStore::new(
            Arc::new(MemoryPositionRepository::new()),
            Projector::default(),
        );
        store
            .add_holding(NewHolding {
                id: "bitcoin".into(),
                symbol: "BTC".into(),
                name: "Bitcoin".into(),
                quantity: dec!(1),
                avg_cost: dec!(30000),
            })
            .unwrap();
        store
    }

    #[test]
    fn test_level_edit_commits_and_resorts() {
        let mut store = store();
        let low = store
            .add_level("bitcoin", ExitLevel::new(dec!(100000), dec!(10)).unwrap())
            .unwrap();
        store
            .add_level("bitcoin", ExitLevel::new(dec!(150000), dec!(10)).unwrap())
            .unwrap();

        let mut session = EditSession::new("bitcoin");
        let target = EditTarget::Level(low);
        session.begin(&store, target).unwrap();
        session.set_field(target, EditField::Price, "200 000").unwrap();
        session.set_field(target, EditField::Percentage, "12,5").unwrap();

        // nothing applied yet
        assert_eq!(store.position("bitcoin").unwrap().exit_levels[0].id, low);

        session.commit(&mut store, target).unwrap();
        let pos = store.position("bitcoin").unwrap();
        assert_eq!(pos.exit_levels[1].id, low);
        assert_eq!(pos.exit_levels[1].percentage, dec!(12.5));
        assert!(!session.is_editing(target));
    }

    #[test]
    fn test_invalid_input_keeps_field() {
        let mut store = store();
        let id = store
            .add_purchase("bitcoin", LedgerEvent::new(dec!(0.5), dec!(40000), Utc::now()).unwrap())
            .unwrap();

        let mut session = EditSession::new("bitcoin");
        let target = EditTarget::Purchase(id);
        session.begin(&store, target).unwrap();

        assert!(session.set_field(target, EditField::Quantity, "abc").is_err());
        assert!(session.set_field(target, EditField::Percentage, "5").is_err());
        assert_eq!(
            session.pending(target),
            Some(&PendingEdit::Event {
                quantity: dec!(0.5),
                price: dec!(40000)
            })
        );

        assert!(session.discard(target));
        assert!(session.commit(&mut store, target).is_err());
    }

    #[test]
    fn test_commit_keeps_rejected_values_and_drops_stale_rows() {
        let mut store = store();
        let wallet = WalletAllocation::new("Cold", WalletKind::ColdStorage, dec!(0.5)).unwrap();
        let wallet_id = store.add_wallet("bitcoin", wallet).unwrap();

        let mut session = EditSession::new("bitcoin");
        let target = EditTarget::Wallet(wallet_id);
        session.begin(&store, target).unwrap();
        session.set_field(target, EditField::Quantity, "5000000000000").unwrap();

        assert!(matches!(
            session.commit(&mut store, target),
            Err(PlannerError::InvalidInput(_))
        ));
        assert!(session.is_editing(target));

        session.set_field(target, EditField::Quantity, "0.25").unwrap();
        store.delete_wallet("bitcoin", wallet_id).unwrap();
        assert!(matches!(
            session.commit(&mut store, target),
            Err(PlannerError::WalletNotFound(_))
        ));
        assert!(!session.is_editing(target));
    }

    #[test]
    fn test_begin_unknown_row_fails() {
        let store = store();
        let mut session = EditSession::new("bitcoin");
        assert!(matches!(
            session.begin(&store, EditTarget::Wallet(Uuid::new_v4())),
            Err(PlannerError::WalletNotFound(_))
        ));
    }
}
