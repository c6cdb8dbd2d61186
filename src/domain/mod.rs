//! Journal domain model.
//!
//! This module provides:
//! - Lossless money handling via the `Decimal` wrapper
//! - Primitives: identifiers, instrument kinds, actions, journal dates
//! - `Leg`, `Transaction` and the `Trade` aggregate
//! - Static instrument tables used for display and contract building

pub mod decimal;
pub mod instrument;
pub mod leg;
pub mod primitives;
pub mod trade;
pub mod transaction;

pub use decimal::Decimal;
pub use leg::{Leg, LegQuote, LegRef, QuoteText};
pub use primitives::{
    journal_date, ymd, Action, ContractId, PutCall, TickerId, TradeId, UnderlyingKind,
};
pub use trade::{PortfolioRollup, Trade, TradeError};
pub use transaction::Transaction;
