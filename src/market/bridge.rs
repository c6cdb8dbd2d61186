//! Folds gateway price and portfolio callbacks into the journal.
//!
//! The bridge keeps its own keyed state (ticker id to prices, contract id to
//! valuation), each map behind its own lock. Every resulting change to a trade
//! is posted to the journal service as a single command.

use super::{
    ContractSpec, Gateway, GatewayError, PortfolioUpdate, PriceField, QuoteSource, ENTITLEMENT_ERROR_CODES,
};
use crate::domain::{ContractId, Decimal, TickerId, TradeId};
use crate::journal::{JournalHandle, SubscriptionRequest};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Latest prices of one subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickerPrices {
    pub last: Decimal,
    pub open: Decimal,
    pub close: Decimal,
}

impl TickerPrices {
    /// Fold one tick. Returns false when the tick carried no data.
    ///
    /// Open seeds close while close is unset, and the first usable price of
    /// any field seeds last while last is unset.
    pub fn apply_tick(&mut self, field: PriceField, price: Decimal) -> bool {
        if !price.is_positive() {
            return false;
        }
        match field {
            PriceField::Last => self.last = price,
            PriceField::Open => {
                self.open = price;
                if self.close.is_zero() {
                    self.close = price;
                }
            }
            PriceField::Close => self.close = price,
        }
        if self.last.is_zero() {
            self.last = price;
        }
        true
    }
}

#[derive(Debug, Clone)]
struct TickerEntry {
    trade: TradeId,
    symbol: String,
    prices: TickerPrices,
    fallback_requested: bool,
}

/// Last valuation the gateway reported for a held contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractValuation {
    pub average_cost: Decimal,
    pub market_price: Decimal,
}

#[derive(Debug)]
pub struct MarketDataBridge {
    journal: JournalHandle,
    quotes: Arc<dyn QuoteSource>,
    client: RwLock<Option<Arc<dyn Gateway>>>,
    tickers: Mutex<HashMap<TickerId, TickerEntry>>,
    contracts: Mutex<HashMap<ContractId, ContractValuation>>,
    account: Mutex<BTreeMap<String, String>>,
    next_ticker_id: AtomicI64,
}

impl MarketDataBridge {
    pub fn new(journal: JournalHandle, quotes: Arc<dyn QuoteSource>) -> Self {
        Self {
            journal,
            quotes,
            client: RwLock::new(None),
            tickers: Mutex::new(HashMap::new()),
            contracts: Mutex::new(HashMap::new()),
            account: Mutex::new(BTreeMap::new()),
            next_ticker_id: AtomicI64::new(1),
        }
    }

    pub fn attach(&self, client: Arc<dyn Gateway>) {
        *self.client.write() = Some(client);
    }

    pub fn client(&self) -> Option<Arc<dyn Gateway>> {
        self.client.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.client().is_some_and(|c| c.is_connected())
    }

    /// Drop the live client and every subscription made through it.
    ///
    /// Returns the client so the caller can close it. The next connection
    /// builds a fresh one.
    pub fn recover_from_disconnect(&self) -> Option<Arc<dyn Gateway>> {
        let client = self.client.write().take();
        let dropped = {
            let mut tickers = self.tickers.lock();
            let n = tickers.len();
            tickers.clear();
            n
        };
        if client.is_some() {
            info!(subscriptions = dropped, "Market data client released");
        }
        client
    }

    /// Subscribe to the underlying price of one trade.
    ///
    /// Does nothing without a live client. A trade whose contract cannot be
    /// described is marked requested so it is not retried every refresh. A
    /// rejected subscription leaves the trade pending for the next refresh.
    pub async fn request_price(&self, request: &SubscriptionRequest) -> Result<Option<TickerId>, GatewayError> {
        let Some(client) = self.client() else {
            return Ok(None);
        };
        let contract = match ContractSpec::for_symbol(&request.ticker_symbol, request.future_expiry) {
            Ok(contract) => contract,
            Err(e) => {
                warn!(ticker = %request.ticker_symbol, error = %e, "Cannot describe contract, not subscribing");
                self.journal.mark_subscribed(request.trade, None).await;
                return Ok(None);
            }
        };

        let ticker_id = TickerId(self.next_ticker_id.fetch_add(1, Ordering::SeqCst));
        self.tickers.lock().insert(
            ticker_id,
            TickerEntry {
                trade: request.trade,
                symbol: request.ticker_symbol.clone(),
                prices: TickerPrices::default(),
                fallback_requested: false,
            },
        );

        if let Err(e) = client.subscribe_price(ticker_id, &contract).await {
            self.tickers.lock().remove(&ticker_id);
            return Err(e);
        }
        self.journal.mark_subscribed(request.trade, Some(ticker_id)).await;
        debug!(ticker = %request.ticker_symbol, ticker_id = ticker_id.0, "Price subscription requested");
        Ok(Some(ticker_id))
    }

    /// Subscribe every open trade that has no subscription yet.
    ///
    /// A request the gateway rejects is logged and retried on a later
    /// refresh. Only a lost connection stops the pass.
    pub async fn refresh_subscriptions(&self) -> Result<usize, GatewayError> {
        if self.client().is_none() {
            return Ok(0);
        }
        let pending = match self.journal.pending_subscriptions().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Cannot read pending subscriptions");
                return Ok(0);
            }
        };
        let mut issued = 0;
        for request in &pending {
            match self.request_price(request).await {
                Ok(Some(_)) => issued += 1,
                Ok(None) => {}
                Err(GatewayError::NotConnected) => return Err(GatewayError::NotConnected),
                Err(e) => {
                    warn!(ticker = %request.ticker_symbol, error = %e, "Price subscription rejected, will retry");
                }
            }
        }
        Ok(issued)
    }

    pub async fn on_price_tick(&self, ticker_id: TickerId, field: PriceField, price: Decimal) {
        let update = {
            let mut tickers = self.tickers.lock();
            match tickers.get_mut(&ticker_id) {
                Some(entry) => entry
                    .prices
                    .apply_tick(field, price)
                    .then_some((entry.trade, entry.prices)),
                None => {
                    debug!(ticker_id = ticker_id.0, "Tick for unknown ticker id");
                    None
                }
            }
        };
        if let Some((trade, prices)) = update {
            self.journal.apply_prices(trade, prices.last, prices.close).await;
        }
    }

    pub async fn on_portfolio_update(&self, update: PortfolioUpdate) {
        self.contracts.lock().insert(
            update.contract_id,
            ContractValuation {
                average_cost: update.average_cost,
                market_price: update.market_price,
            },
        );
        self.journal.apply_portfolio(update).await;
    }

    pub fn on_account_value(&self, tag: String, value: String, currency: String) {
        let key = if currency.is_empty() {
            tag
        } else {
            format!("{}/{}", tag, currency)
        };
        self.account.lock().insert(key, value);
    }

    /// Handle a gateway error addressed to a subscription.
    ///
    /// Entitlement errors switch that ticker to the previous close from the
    /// quote source, fetched in the background. Returns true when a fallback
    /// fetch was started.
    pub fn on_error(self: &Arc<Self>, request_id: i64, code: i64, message: &str) -> bool {
        if !ENTITLEMENT_ERROR_CODES.contains(&code) {
            warn!(request_id, code, message, "Gateway error");
            return false;
        }
        let ticker_id = TickerId(request_id);
        let symbol = {
            let mut tickers = self.tickers.lock();
            match tickers.get_mut(&ticker_id) {
                Some(entry) if !entry.fallback_requested => {
                    entry.fallback_requested = true;
                    entry.symbol.clone()
                }
                _ => return false,
            }
        };
        info!(ticker = %symbol, code, "No live market data, using previous close");
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            bridge.apply_fallback_close(ticker_id, &symbol).await;
        });
        true
    }

    async fn apply_fallback_close(&self, ticker_id: TickerId, symbol: &str) {
        let close = match self.quotes.previous_close(symbol).await {
            Ok(Some(close)) => close,
            Ok(None) => {
                warn!(ticker = %symbol, "No previous close available");
                return;
            }
            Err(e) => {
                warn!(ticker = %symbol, error = %e, "Previous close lookup failed");
                return;
            }
        };
        let trade = {
            let mut tickers = self.tickers.lock();
            let Some(entry) = tickers.get_mut(&ticker_id) else {
                return;
            };
            entry.prices.last = close;
            entry.prices.close = close;
            entry.trade
        };
        self.journal.apply_prices(trade, close, close).await;
    }

    /// Price trades from the quote source alone, for use without a gateway.
    pub async fn prime_previous_closes(&self, requests: &[SubscriptionRequest]) -> usize {
        let mut primed = 0;
        for request in requests {
            match self.quotes.previous_close(&request.ticker_symbol).await {
                Ok(Some(close)) => {
                    self.journal.apply_prices(request.trade, close, close).await;
                    primed += 1;
                }
                Ok(None) => debug!(ticker = %request.ticker_symbol, "No previous close"),
                Err(e) => warn!(ticker = %request.ticker_symbol, error = %e, "Previous close lookup failed"),
            }
        }
        primed
    }

    /// Cancel every live subscription on the current client.
    pub async fn unsubscribe_all(&self) {
        let Some(client) = self.client() else {
            return;
        };
        let ids: Vec<TickerId> = self.tickers.lock().keys().copied().collect();
        for ticker_id in ids {
            if let Err(e) = client.unsubscribe_price(ticker_id).await {
                debug!(ticker_id = ticker_id.0, error = %e, "Unsubscribe failed");
            }
        }
    }

    pub fn ticker_prices(&self, ticker_id: TickerId) -> Option<TickerPrices> {
        self.tickers.lock().get(&ticker_id).map(|e| e.prices)
    }

    pub fn contract_valuation(&self, contract_id: ContractId) -> Option<ContractValuation> {
        self.contracts.lock().get(&contract_id).copied()
    }

    pub fn subscription_count(&self) -> usize {
        self.tickers.lock().len()
    }

    pub fn account_values(&self) -> BTreeMap<String, String> {
        self.account.lock().clone()
    }
}
