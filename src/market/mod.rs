//! Brokerage gateway abstraction and the real-time market data pipeline.

use crate::domain::{ContractId, Decimal, TickerId};
use crate::engine::reconcile::{BrokerPosition, PositionKey};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod bridge;
pub mod contract;
pub mod mock;
pub mod quote;
pub mod session;

pub use bridge::{MarketDataBridge, TickerPrices};
pub use contract::{ContractSpec, SecurityType};
pub use mock::{GatewayRequest, MockConnector, MockGateway};
pub use quote::{HttpQuoteSource, MockQuoteSource, QuoteError, QuoteSource};
pub use session::{ConnectionState, Session, SessionConfig, SessionError};

/// Gateway error codes meaning "no market data entitlement for this request".
pub const ENTITLEMENT_ERROR_CODES: &[i64] = &[354, 10089, 10090, 10167, 10168, 10197];

/// Gateway error codes meaning the socket to the gateway is gone.
pub const CONNECTION_LOST_ERROR_CODES: &[i64] = &[504, 509, 1100];

/// Price fields a subscription delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceField {
    Last,
    Open,
    Close,
}

/// Portfolio valuation of one held contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortfolioUpdate {
    pub contract_id: ContractId,
    /// Description of the contract in journal key form.
    pub key: PositionKey,
    pub position: i64,
    pub market_price: Decimal,
    pub market_value: Decimal,
    pub average_cost: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Inbound gateway callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    ConnectAck,
    PriceTick {
        ticker_id: TickerId,
        field: PriceField,
        price: Decimal,
    },
    PortfolioUpdate(PortfolioUpdate),
    Position(BrokerPosition),
    PositionEnd,
    AccountValue {
        tag: String,
        value: String,
        currency: String,
    },
    /// `request_id` is the ticker id for subscription errors, -1 otherwise.
    Error {
        request_id: i64,
        code: i64,
        message: String,
    },
    ConnectionClosed,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway at {0} is unavailable")]
    Unavailable(String),
    #[error("gateway is not connected")]
    NotConnected,
    #[error("gateway request failed: {0}")]
    Request(String),
}

/// Outbound side of a live gateway client.
///
/// Callbacks arrive on the event channel handed out by [`GatewayConnector::connect`].
#[async_trait]
pub trait Gateway: Send + Sync + fmt::Debug {
    async fn subscribe_price(&self, ticker_id: TickerId, contract: &ContractSpec) -> Result<(), GatewayError>;

    async fn unsubscribe_price(&self, ticker_id: TickerId) -> Result<(), GatewayError>;

    /// Ask for the full position list, answered by `Position` events and one `PositionEnd`.
    async fn request_positions(&self) -> Result<(), GatewayError>;

    async fn request_account_summary(&self) -> Result<(), GatewayError>;

    /// Liveness check used by the keep-alive worker.
    async fn ping(&self) -> Result<(), GatewayError>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

/// A fresh client plus the receiving end of its callbacks.
#[derive(Debug)]
pub struct Connection {
    pub client: Arc<dyn Gateway>,
    pub events: mpsc::UnboundedReceiver<GatewayEvent>,
}

/// Builds a new client for every connection attempt.
#[async_trait]
pub trait GatewayConnector: Send + Sync + fmt::Debug {
    async fn connect(&self) -> Result<Connection, GatewayError>;
}

/// Host, port and client id of the brokerage gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoint {
    pub host: String,
    pub port: u16,
    pub client_id: i64,
}

impl fmt::Display for GatewayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (client {})", self.host, self.port, self.client_id)
    }
}

/// Connector for builds without a wire adapter. Every attempt fails, so the
/// journal runs in offline mode on fallback quotes.
#[derive(Debug, Clone)]
pub struct OfflineConnector {
    endpoint: GatewayEndpoint,
}

impl OfflineConnector {
    pub fn new(endpoint: GatewayEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl GatewayConnector for OfflineConnector {
    async fn connect(&self) -> Result<Connection, GatewayError> {
        Err(GatewayError::Unavailable(self.endpoint.to_string()))
    }
}
