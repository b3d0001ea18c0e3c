//! Position persistence
//!
//! The store writes through a [`PositionRepository`] after every mutation.
//! Positions are stored as JSON so everything round-trips exactly as a real
//! backend would see it.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};
use crate::model::Position;
use crate::price::PriceCacheSnapshot;

/// Position repository trait
pub trait PositionRepository: Send + Sync {
    /// Load a position by asset id
    fn load(&self, asset_id: &str) -> Result<Option<Position>>;

    /// Insert or replace a position
    fn save(&self, position: &Position) -> Result<()>;

    fn delete(&self, asset_id: &str) -> Result<()>;

    /// All positions, oldest first
    fn list(&self) -> Result<Vec<Position>>;
}

/// In-memory repository (for development/testing)
#[derive(Default)]
pub struct MemoryPositionRepository {
    documents: RwLock<HashMap<String, String>>,
}

impl MemoryPositionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PositionRepository for MemoryPositionRepository {
    fn load(&self, asset_id: &str) -> Result<Option<Position>> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        documents
            .get(asset_id)
            .map(|json| serde_json::from_str(json).map_err(PlannerError::from))
            .transpose()
    }

    fn save(&self, position: &Position) -> Result<()> {
        let json = serde_json::to_string(position)?;
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        documents.insert(position.id.clone(), json);
        Ok(())
    }

    fn delete(&self, asset_id: &str) -> Result<()> {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        documents.remove(asset_id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<Position>> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        let mut positions = documents
            .values()
            .map(|json| serde_json::from_str::<Position>(json))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        positions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(positions)
    }
}

/// Portfolio plus price cache, as exported or seeded from disk
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    #[serde(default)]
    pub positions: Vec<Position>,

    #[serde(default)]
    pub prices: PriceCacheSnapshot,
}

impl PortfolioSnapshot {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExitLevel, LedgerEvent};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_memory_repository_round_trip() {
        let repo = MemoryPositionRepository::new();
        let mut pos = Position::new("ethereum", "ETH", "Ethereum", dec!(3), dec!(2000)).unwrap();
        pos.exit_levels.push(ExitLevel::new(dec!(5000), dec!(25)).unwrap());
        pos.sales
            .push(LedgerEvent::new(dec!(0.5), dec!(3500), Utc::now()).unwrap());

        repo.save(&pos).unwrap();
        assert_eq!(repo.load("ethereum").unwrap(), Some(pos));
        assert_eq!(repo.load("bitcoin").unwrap(), None);

        repo.delete("ethereum").unwrap();
        assert!(repo.list().unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_json() {
        let snapshot = PortfolioSnapshot {
            positions: vec![Position::new("solana", "SOL", "Solana", dec!(10), dec!(150)).unwrap()],
            prices: PriceCacheSnapshot::default(),
        };
        let json = snapshot.to_json().unwrap();
        assert_eq!(PortfolioSnapshot::from_json(&json).unwrap(), snapshot);
        assert!(PortfolioSnapshot::from_json("{not json").is_err());
    }
}
