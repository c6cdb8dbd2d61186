pub mod api;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod journal;
pub mod market;

pub use config::Config;
pub use domain::{Action, Decimal, Leg, PutCall, Trade, TradeId, Transaction, UnderlyingKind};
pub use error::AppError;
pub use journal::{Journal, JournalError, JournalHandle, StoreError};
pub use market::{
    Gateway, GatewayConnector, GatewayEvent, HttpQuoteSource, MarketDataBridge, MockConnector,
    MockGateway, MockQuoteSource, QuoteSource, Session,
};
