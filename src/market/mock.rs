//! In-process gateway for tests: records requests and lets the test inject callbacks.

use super::{Connection, ContractSpec, Gateway, GatewayConnector, GatewayError, GatewayEvent};
use crate::domain::TickerId;
use crate::engine::reconcile::BrokerPosition;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Error code the mock sends for subscriptions without market data entitlement.
pub const MOCK_NO_ENTITLEMENT: i64 = 354;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayRequest {
    SubscribePrice {
        ticker_id: TickerId,
        contract: ContractSpec,
    },
    UnsubscribePrice(TickerId),
    RequestPositions,
    RequestAccountSummary,
    Ping,
    Disconnect,
}

#[derive(Debug)]
pub struct MockGateway {
    events: mpsc::UnboundedSender<GatewayEvent>,
    requests: Mutex<Vec<GatewayRequest>>,
    connected: AtomicBool,
    fail_pings: AtomicBool,
    positions: Mutex<Vec<BrokerPosition>>,
    no_entitlement: Mutex<HashSet<String>>,
    rejected: Mutex<HashSet<String>>,
}

impl MockGateway {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let gateway = Arc::new(Self {
            events,
            requests: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            fail_pings: AtomicBool::new(false),
            positions: Mutex::new(Vec::new()),
            no_entitlement: Mutex::new(HashSet::new()),
            rejected: Mutex::new(HashSet::new()),
        });
        (gateway, rx)
    }

    /// Deliver a callback as if the gateway sent it.
    pub fn emit(&self, event: GatewayEvent) {
        let _ = self.events.send(event);
    }

    pub fn requests(&self) -> Vec<GatewayRequest> {
        self.requests.lock().clone()
    }

    pub fn subscriptions(&self) -> Vec<(TickerId, ContractSpec)> {
        self.requests
            .lock()
            .iter()
            .filter_map(|r| match r {
                GatewayRequest::SubscribePrice { ticker_id, contract } => Some((*ticker_id, contract.clone())),
                _ => None,
            })
            .collect()
    }

    /// Positions reported in answer to `request_positions`.
    pub fn set_positions(&self, positions: Vec<BrokerPosition>) {
        *self.positions.lock() = positions;
    }

    /// Refuse price subscriptions for `symbol` with an entitlement error.
    pub fn deny_market_data(&self, symbol: &str) {
        self.no_entitlement.lock().insert(symbol.to_string());
    }

    /// Fail price subscriptions for `symbol` outright. The attempt is still recorded.
    pub fn reject_subscriptions(&self, symbol: &str) {
        self.rejected.lock().insert(symbol.to_string());
    }

    pub fn fail_pings(&self) {
        self.fail_pings.store(true, Ordering::SeqCst);
    }

    /// Simulate the socket dropping.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(GatewayEvent::ConnectionClosed);
    }

    fn record(&self, request: GatewayRequest) -> Result<(), GatewayError> {
        if !self.is_connected() {
            return Err(GatewayError::NotConnected);
        }
        self.requests.lock().push(request);
        Ok(())
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn subscribe_price(&self, ticker_id: TickerId, contract: &ContractSpec) -> Result<(), GatewayError> {
        self.record(GatewayRequest::SubscribePrice {
            ticker_id,
            contract: contract.clone(),
        })?;
        if self.rejected.lock().contains(&contract.symbol) {
            return Err(GatewayError::Request(format!("no security definition for {}", contract.symbol)));
        }
        if self.no_entitlement.lock().contains(&contract.symbol) {
            self.emit(GatewayEvent::Error {
                request_id: ticker_id.0,
                code: MOCK_NO_ENTITLEMENT,
                message: "Requested market data is not subscribed".to_string(),
            });
        }
        Ok(())
    }

    async fn unsubscribe_price(&self, ticker_id: TickerId) -> Result<(), GatewayError> {
        self.record(GatewayRequest::UnsubscribePrice(ticker_id))
    }

    async fn request_positions(&self) -> Result<(), GatewayError> {
        self.record(GatewayRequest::RequestPositions)?;
        let positions = self.positions.lock().clone();
        for position in positions {
            self.emit(GatewayEvent::Position(position));
        }
        self.emit(GatewayEvent::PositionEnd);
        Ok(())
    }

    async fn request_account_summary(&self) -> Result<(), GatewayError> {
        self.record(GatewayRequest::RequestAccountSummary)
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        self.record(GatewayRequest::Ping)?;
        if self.fail_pings.load(Ordering::SeqCst) {
            return Err(GatewayError::Request("ping timed out".to_string()));
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.requests.lock().push(GatewayRequest::Disconnect);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Hands out a new [`MockGateway`] per connection and keeps every one for inspection.
#[derive(Debug, Default)]
pub struct MockConnector {
    clients: Mutex<Vec<Arc<MockGateway>>>,
    refuse: AtomicBool,
    positions: Mutex<Vec<BrokerPosition>>,
    no_entitlement: Mutex<HashSet<String>>,
    rejected: Mutex<HashSet<String>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Positions every new client will report.
    pub fn with_positions(self, positions: Vec<BrokerPosition>) -> Self {
        *self.positions.lock() = positions;
        self
    }

    /// Symbols every new client refuses to stream.
    pub fn with_denied_market_data(self, symbol: &str) -> Self {
        self.no_entitlement.lock().insert(symbol.to_string());
        self
    }

    /// Symbols every new client fails to subscribe.
    pub fn with_rejected_subscriptions(self, symbol: &str) -> Self {
        self.rejected.lock().insert(symbol.to_string());
        self
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of clients built so far.
    pub fn connections(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn latest(&self) -> Option<Arc<MockGateway>> {
        self.clients.lock().last().cloned()
    }
}

#[async_trait]
impl GatewayConnector for MockConnector {
    async fn connect(&self) -> Result<Connection, GatewayError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("mock gateway".to_string()));
        }
        let (gateway, events) = MockGateway::new();
        gateway.set_positions(self.positions.lock().clone());
        for symbol in self.no_entitlement.lock().iter() {
            gateway.deny_market_data(symbol);
        }
        for symbol in self.rejected.lock().iter() {
            gateway.reject_subscriptions(symbol);
        }
        gateway.emit(GatewayEvent::ConnectAck);
        self.clients.lock().push(gateway.clone());
        Ok(Connection {
            client: gateway,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::PriceField;

    #[tokio::test]
    async fn test_mock_records_requests() {
        let (gateway, mut events) = MockGateway::new();
        let contract = ContractSpec::for_symbol("AAPL", None).unwrap();
        gateway.subscribe_price(TickerId(1), &contract).await.unwrap();
        gateway.ping().await.unwrap();
        assert_eq!(
            gateway.requests(),
            vec![
                GatewayRequest::SubscribePrice {
                    ticker_id: TickerId(1),
                    contract
                },
                GatewayRequest::Ping
            ]
        );

        gateway.emit(GatewayEvent::PriceTick {
            ticker_id: TickerId(1),
            field: PriceField::Last,
            price: crate::domain::Decimal::from(190),
        });
        assert!(matches!(events.recv().await, Some(GatewayEvent::PriceTick { .. })));
    }

    #[tokio::test]
    async fn test_mock_positions_end_with_marker() {
        let (gateway, mut events) = MockGateway::new();
        gateway.request_positions().await.unwrap();
        assert_eq!(events.recv().await, Some(GatewayEvent::PositionEnd));
    }

    #[tokio::test]
    async fn test_disconnected_mock_rejects_requests() {
        let (gateway, _events) = MockGateway::new();
        gateway.disconnect().await;
        gateway.disconnect().await;
        assert_eq!(gateway.ping().await, Err(GatewayError::NotConnected));
        assert_eq!(gateway.requests(), vec![GatewayRequest::Disconnect]);
    }

    #[tokio::test]
    async fn test_rejected_subscription_is_recorded_and_fails() {
        let (gateway, _events) = MockGateway::new();
        gateway.reject_subscriptions("XYZ");
        let contract = ContractSpec::for_symbol("XYZ", None).unwrap();
        assert!(matches!(
            gateway.subscribe_price(TickerId(4), &contract).await,
            Err(GatewayError::Request(_))
        ));
        assert_eq!(gateway.subscriptions().len(), 1);
    }

    #[tokio::test]
    async fn test_connector_builds_fresh_clients() {
        let connector = MockConnector::new();
        let first = connector.connect().await.unwrap();
        let second = connector.connect().await.unwrap();
        assert_eq!(connector.connections(), 2);
        assert!(!Arc::ptr_eq(&first.client, &second.client));

        connector.refuse_connections(true);
        assert!(connector.connect().await.is_err());
    }
}
