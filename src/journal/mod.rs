//! The loaded journal and its single-owner command service.

pub mod service;
pub mod store;

pub use service::{spawn_journal_service, JournalCommand, JournalHandle};
pub use store::{load_journal, read_journal, save_journal, write_journal, StoreError};

use crate::domain::{ContractId, Decimal, LegRef, TickerId, Trade, TradeError, TradeId, Transaction};
use crate::engine::position;
use crate::engine::reconcile::{self, LocalPosition, PositionKey};
use crate::market::PortfolioUpdate;
use chrono::NaiveDate;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("unknown trade {0}")]
    UnknownTrade(TradeId),
    #[error(transparent)]
    Trade(#[from] TradeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("journal service has stopped")]
    Closed,
}

/// An open trade still waiting for a price subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub trade: TradeId,
    pub ticker_symbol: String,
    pub future_expiry: Option<NaiveDate>,
}

/// Every trade of the loaded log plus session bindings from gateway ids to legs.
#[derive(Debug, Default)]
pub struct Journal {
    trades: Vec<Trade>,
    contracts: HashMap<ContractId, (TradeId, LegRef)>,
    dirty: bool,
}

impl Journal {
    pub fn new(mut trades: Vec<Trade>) -> Self {
        for trade in trades.iter_mut() {
            position::refresh(trade);
        }
        Self {
            trades,
            contracts: HashMap::new(),
            dirty: false,
        }
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn trade(&self, id: TradeId) -> Option<&Trade> {
        self.trades.get(id.0)
    }

    fn trade_mut(&mut self, id: TradeId) -> Result<&mut Trade, JournalError> {
        self.trades.get_mut(id.0).ok_or(JournalError::UnknownTrade(id))
    }

    /// True once a transaction or trade was added since load or the last save.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    pub fn add_trade(&mut self, mut trade: Trade) -> TradeId {
        position::refresh(&mut trade);
        self.trades.push(trade);
        self.dirty = true;
        TradeId(self.trades.len() - 1)
    }

    pub fn record_transaction(&mut self, id: TradeId, tx: Transaction) -> Result<(), JournalError> {
        let trade = self.trade_mut(id)?;
        position::record_transaction(trade, tx)?;
        self.dirty = true;
        Ok(())
    }

    /// Open trades that have not issued a price subscription yet this session.
    pub fn pending_subscriptions(&self) -> Vec<SubscriptionRequest> {
        self.trades
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_open && !t.ticker_data_requested)
            .map(|(i, t)| SubscriptionRequest {
                trade: TradeId(i),
                ticker_symbol: t.ticker_symbol.clone(),
                future_expiry: t.future_expiry,
            })
            .collect()
    }

    /// Record that a subscription was issued. `ticker_id` is `None` when no
    /// contract could be built; the trade is still not retried.
    pub fn mark_subscribed(&mut self, id: TradeId, ticker_id: Option<TickerId>) -> Result<(), JournalError> {
        let trade = self.trade_mut(id)?;
        trade.ticker_data_requested = true;
        trade.ticker_id = ticker_id;
        Ok(())
    }

    /// Forget per-connection subscription state so a new connection resubscribes.
    pub fn clear_subscriptions(&mut self) {
        for trade in self.trades.iter_mut() {
            trade.ticker_data_requested = false;
            trade.ticker_id = None;
        }
    }

    pub fn apply_prices(&mut self, id: TradeId, last: Decimal, close: Decimal) -> Result<(), JournalError> {
        self.trade_mut(id)?.apply_prices(last, close);
        Ok(())
    }

    /// Fold one portfolio valuation into the matching leg and its trade's rollup.
    ///
    /// The first update for a contract binds it to the open leg with the same
    /// position key; later updates go straight to that leg. Returns the trade
    /// that changed, or `None` when no local leg matches.
    pub fn apply_portfolio(&mut self, update: &PortfolioUpdate) -> Option<TradeId> {
        let (trade_id, leg_ref) = match self.contracts.get(&update.contract_id).copied() {
            Some(bound) => bound,
            None => {
                let bound = self.bind_contract(update.contract_id, &update.key)?;
                self.contracts.insert(update.contract_id, bound);
                bound
            }
        };

        let trade = self.trades.get_mut(trade_id.0)?;
        let decimals = trade.ticker_decimals;
        let leg = trade.leg_mut(leg_ref)?;
        let position_cost = update.average_cost * Decimal::from(update.position.abs());
        leg.apply_quote(
            position_cost,
            update.market_value,
            update.unrealized_pnl,
            decimals,
        );
        trade.recompute_rollup();
        Some(trade_id)
    }

    fn bind_contract(&mut self, contract_id: ContractId, key: &PositionKey) -> Option<(TradeId, LegRef)> {
        for (i, trade) in self.trades.iter_mut().enumerate() {
            if !trade.is_open {
                continue;
            }
            let found = trade
                .open_legs
                .iter()
                .copied()
                .find(|r| {
                    trade.leg(*r).is_some_and(|leg| {
                        leg.contract_id.is_none() && PositionKey::for_leg(trade, leg) == *key
                    })
                });
            if let Some(leg_ref) = found {
                if let Some(leg) = trade.leg_mut(leg_ref) {
                    leg.contract_id = Some(contract_id);
                }
                debug!(contract_id = contract_id.0, key = %key, trade = i, "Contract bound to leg");
                return Some((TradeId(i), leg_ref));
            }
        }
        debug!(contract_id = contract_id.0, key = %key, "No open leg for contract");
        None
    }

    pub fn local_positions(&self) -> Vec<LocalPosition> {
        reconcile::local_positions(&self.trades)
    }
}
