//! Gateway connection lifecycle and its background workers.
//!
//! A connection runs three tasks sharing one cancellation token: the monitor
//! (drains gateway callbacks), ticker refresh (subscribes trades that have no
//! price yet) and keep-alive (pings the gateway). Any of them can tear the
//! connection down on a fault; the next `connect` builds a new client.

use super::{
    Connection, Gateway, GatewayConnector, GatewayError, GatewayEvent, MarketDataBridge,
    CONNECTION_LOST_ERROR_CODES,
};
use crate::engine::reconcile::{ReconcileOutcome, ReconcileReport, Reconciler};
use crate::journal::JournalHandle;
use parking_lot::Mutex;
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub ticker_refresh: Duration,
    pub keepalive: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ticker_refresh: Duration::from_millis(1000),
            keepalive: Duration::from_millis(7500),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is {0:?}, expected Disconnected")]
    Busy(ConnectionState),
    #[error("gateway is not connected")]
    NotConnected,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

struct LiveConnection {
    client: Arc<dyn Gateway>,
    cancel: CancellationToken,
    generation: u64,
    workers: Vec<JoinHandle<()>>,
}

pub struct Session {
    connector: Arc<dyn GatewayConnector>,
    bridge: Arc<MarketDataBridge>,
    journal: JournalHandle,
    config: SessionConfig,
    state: watch::Sender<ConnectionState>,
    live: Mutex<Option<LiveConnection>>,
    reconciler: Mutex<Reconciler>,
    generation: AtomicU64,
}

impl Session {
    pub fn new(
        connector: Arc<dyn GatewayConnector>,
        bridge: Arc<MarketDataBridge>,
        journal: JournalHandle,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            connector,
            bridge,
            journal,
            config,
            state,
            live: Mutex::new(None),
            reconciler: Mutex::new(Reconciler::new()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn bridge(&self) -> &Arc<MarketDataBridge> {
        &self.bridge
    }

    pub fn last_report(&self) -> Option<ReconcileReport> {
        self.reconciler.lock().last_report().cloned()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "Connection state changed");
        }
    }

    /// Open a new gateway connection and start the workers.
    ///
    /// Only valid from `Disconnected`. Subscriptions from an earlier
    /// connection are forgotten so every open trade is subscribed again.
    pub async fn connect(self: &Arc<Self>) -> Result<(), SessionError> {
        let mut claimed = false;
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                claimed = true;
            }
            claimed
        });
        if !claimed {
            return Err(SessionError::Busy(self.state()));
        }

        info!("Connecting to gateway");
        let Connection { client, events } = match self.connector.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(error = %e, "Gateway connection failed");
                self.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };

        self.journal.clear_subscriptions().await;
        self.bridge.attach(client.clone());

        let cancel = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.live.lock() = Some(LiveConnection {
            client: client.clone(),
            cancel: cancel.clone(),
            generation,
            workers: Vec::new(),
        });
        self.set_state(ConnectionState::Connected);

        let workers = vec![
            tokio::spawn(self.clone().monitor(events, cancel.clone(), generation)),
            tokio::spawn(self.clone().ticker_refresh(cancel.clone(), generation)),
            tokio::spawn(self.clone().keep_alive(client.clone(), cancel.clone(), generation)),
        ];
        match self.live.lock().as_mut() {
            Some(live) if live.generation == generation => live.workers = workers,
            // Torn down already; the workers observe the cancelled token and exit.
            _ => return Ok(()),
        }
        info!(generation, "Gateway connected");

        if let Err(e) = client.request_account_summary().await {
            warn!(error = %e, "Account summary request failed");
        }
        if let Err(e) = self.request_positions().await {
            warn!(error = %e, "Position request failed");
        }
        Ok(())
    }

    /// Close the connection and wait for the workers to stop.
    ///
    /// A no-op when a fault already tore the connection down.
    pub async fn disconnect(&self) {
        let Some(live) = self.take_live(None) else {
            debug!("Disconnect without a live connection");
            return;
        };
        self.set_state(ConnectionState::Disconnecting);
        self.bridge.unsubscribe_all().await;
        live.cancel.cancel();
        live.client.disconnect().await;
        self.bridge.recover_from_disconnect();
        for worker in live.workers {
            let _ = worker.await;
        }
        self.set_state(ConnectionState::Disconnected);
        info!("Disconnected from gateway");
    }

    /// Ask the gateway for its position list; reconciliation runs when the list ends.
    pub async fn request_positions(&self) -> Result<(), SessionError> {
        let client = self
            .live
            .lock()
            .as_ref()
            .map(|live| live.client.clone())
            .ok_or(SessionError::NotConnected)?;
        self.reconciler.lock().begin();
        client.request_positions().await?;
        Ok(())
    }

    /// Take the live connection. With `generation` set, only if it still is
    /// that connection.
    fn take_live(&self, generation: Option<u64>) -> Option<LiveConnection> {
        let mut live = self.live.lock();
        let superseded = matches!(
            (live.as_ref(), generation),
            (Some(current), Some(g)) if current.generation != g
        );
        if superseded {
            None
        } else {
            live.take()
        }
    }

    async fn on_fault(&self, generation: u64, reason: &str) {
        let Some(live) = self.take_live(Some(generation)) else {
            return;
        };
        warn!(reason, generation, "Gateway connection lost");
        self.set_state(ConnectionState::Disconnecting);
        live.cancel.cancel();
        self.bridge.recover_from_disconnect();
        live.client.disconnect().await;
        self.set_state(ConnectionState::Disconnected);
    }

    async fn monitor(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<GatewayEvent>,
        cancel: CancellationToken,
        generation: u64,
    ) {
        loop {
            let first = tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => event,
            };
            let Some(first) = first else {
                self.on_fault(generation, "event channel closed").await;
                return;
            };
            let mut batch = vec![first];
            while let Ok(event) = events.try_recv() {
                batch.push(event);
            }
            for event in batch {
                if let ControlFlow::Break(reason) = self.dispatch(event).await {
                    self.on_fault(generation, &reason).await;
                    return;
                }
            }
        }
    }

    async fn dispatch(&self, event: GatewayEvent) -> ControlFlow<String> {
        match event {
            GatewayEvent::ConnectAck => debug!("Gateway acknowledged connection"),
            GatewayEvent::PriceTick {
                ticker_id,
                field,
                price,
            } => self.bridge.on_price_tick(ticker_id, field, price).await,
            GatewayEvent::PortfolioUpdate(update) => self.bridge.on_portfolio_update(update).await,
            GatewayEvent::Position(position) => self.reconciler.lock().on_position(position),
            GatewayEvent::PositionEnd => self.finish_positions().await,
            GatewayEvent::AccountValue {
                tag,
                value,
                currency,
            } => self.bridge.on_account_value(tag, value, currency),
            GatewayEvent::Error {
                request_id,
                code,
                message,
            } => {
                if CONNECTION_LOST_ERROR_CODES.contains(&code) {
                    return ControlFlow::Break(format!("gateway error {}: {}", code, message));
                }
                self.bridge.on_error(request_id, code, &message);
            }
            GatewayEvent::ConnectionClosed => {
                return ControlFlow::Break("connection closed by gateway".to_string())
            }
        }
        ControlFlow::Continue(())
    }

    async fn finish_positions(&self) {
        self.reconciler.lock().on_position_end();
        let local = match self.journal.local_positions().await {
            Ok(local) => local,
            Err(e) => {
                warn!(error = %e, "Cannot read local positions for reconciliation");
                return;
            }
        };
        let outcome = self.reconciler.lock().run(&local);
        if let ReconcileOutcome::Updated(report) = outcome {
            for entry in report.local_only.iter().chain(report.broker_only.iter()) {
                warn!(
                    key = %entry.key,
                    local = entry.local_quantity,
                    broker = entry.broker_quantity,
                    status = ?entry.status,
                    "Position mismatch"
                );
            }
        }
    }

    async fn ticker_refresh(self: Arc<Self>, cancel: CancellationToken, generation: u64) {
        let mut interval = tokio::time::interval(self.config.ticker_refresh);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            match self.bridge.refresh_subscriptions().await {
                Ok(0) => {}
                Ok(issued) => debug!(issued, "Price subscriptions issued"),
                Err(GatewayError::NotConnected) => {
                    self.on_fault(generation, "not connected during subscription refresh").await;
                    return;
                }
                Err(e) => warn!(error = %e, "Subscription refresh failed"),
            }
        }
    }

    async fn keep_alive(self: Arc<Self>, client: Arc<dyn Gateway>, cancel: CancellationToken, generation: u64) {
        let mut interval = tokio::time::interval(self.config.keepalive);
        // The first tick is immediate; the connection was just established.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            if !client.is_connected() {
                self.on_fault(generation, "gateway reports disconnected").await;
                return;
            }
            if let Err(e) = client.ping().await {
                self.on_fault(generation, &format!("keep-alive failed: {}", e)).await;
                return;
            }
        }
    }
}
