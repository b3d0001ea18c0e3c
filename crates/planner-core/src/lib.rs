//! # planner-core
//!
//! Holdings reconciliation and exit-ladder engine for a crypto portfolio.
//!
//! A position's quantity and average cost are always rebuilt from its
//! history, its exit ladder is sized from that quantity, and projections
//! combine both with the best available price.
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌────────────┐   ┌─────────────┐
//! │ purchases    │──►│ ledger         │──►│ ladder     │──►│ projection  │
//! │ sales        │   │ qty, avg cost  │   │ level qty  │   │ tax, tithe, │
//! │ executions   │   └────────────────┘   └────────────┘   │ net, signal │
//! └──────────────┘                                          └──────▲──────┘
//!                    ┌────────────────┐   ┌────────────┐          │
//!                    │ PriceSource    │──►│ PriceCache │──────────┘
//!                    │ (live quotes)  │   │ live→cached│
//!                    └────────────────┘   │ →reference │
//!                                         └────────────┘
//! ```
//!
//! All mutations go through [`PortfolioStore`], which reconciles and persists
//! after every change.

pub mod config;
pub mod edit;
pub mod error;
pub mod input;
pub mod ladder;
pub mod ledger;
pub mod model;
pub mod price;
pub mod projection;
pub mod repository;
pub mod store;

pub use config::PlannerConfig;
pub use edit::{EditField, EditSession, EditTarget, PendingEdit};
pub use error::{PlannerError, Result};
pub use ladder::{LadderSummary, LevelAmount};
pub use ledger::Reconciliation;
pub use model::{
    Baseline, EventSource, ExitLevel, LedgerEvent, LevelExecution, PercentageMode, Position,
    WalletAllocation, WalletKind,
};
pub use price::{
    PriceBook, PriceCache, PriceCacheSnapshot, PriceQuote, PriceRefresher, PriceSource, PriceTier,
    RawQuote, ReferencePrices, RefreshReport, StaticPriceSource, TrackedAsset,
};
pub use projection::{
    ExitSignal, PortfolioProjection, PositionProjection, Projector, SaleBreakdown, SignalStatus,
    TaxPolicy,
};
pub use repository::{MemoryPositionRepository, PortfolioSnapshot, PositionRepository};
pub use store::{EventUpdate, NewHolding, PortfolioStore, WalletUpdate};
