//! The Trade aggregate: everything a trader considers one position.

use crate::domain::instrument;
use crate::domain::{Decimal, Leg, LegRef, TickerId, Transaction};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Real-time totals over the trade's open legs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioRollup {
    pub total_position_cost: Decimal,
    pub total_market_value: Decimal,
    pub total_unrealized_pnl: Decimal,
    pub percentage: Decimal,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TradeError {
    #[error("leg {leg_id} referenced by a back pointer does not exist")]
    UnknownBackPointer { leg_id: i64 },
    #[error("leg {leg_id} has open quantity {open}, cannot apply {change}")]
    OverClose { leg_id: i64, open: i64, change: i64 },
    #[error("no leg ids left after {next_leg_id}")]
    LegIdsExhausted { next_leg_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub ticker_symbol: String,
    pub ticker_name: String,
    pub future_expiry: Option<NaiveDate>,
    pub category: i64,

    /// Derived by the position deriver.
    pub is_open: bool,
    /// Monotonic; never reused.
    pub next_leg_id: i64,
    /// Derived: sum of every transaction total.
    pub adjusted_cost_base: Decimal,
    /// Derived: multiplier of the latest transaction that specified one.
    pub multiplier: Decimal,

    pub ticker_last_price: Decimal,
    pub ticker_close_price: Decimal,
    pub ticker_decimals: u32,
    pub rollup: PortfolioRollup,

    /// Set once a price subscription was issued this session.
    #[serde(skip)]
    pub ticker_data_requested: bool,
    #[serde(skip)]
    pub ticker_id: Option<TickerId>,

    pub needs_attention: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub attention_notes: Vec<String>,

    pub transactions: Vec<Transaction>,
    /// Derived, sorted open-leg cache. Not persisted.
    #[serde(skip)]
    pub open_legs: Vec<LegRef>,
}

impl Trade {
    pub fn new(ticker_symbol: impl Into<String>, ticker_name: impl Into<String>, category: i64) -> Self {
        let ticker_symbol = ticker_symbol.into();
        let ticker_decimals = instrument::ticker_decimals(&ticker_symbol);
        Self {
            ticker_symbol,
            ticker_name: ticker_name.into(),
            future_expiry: None,
            category,
            is_open: true,
            next_leg_id: 1,
            adjusted_cost_base: Decimal::zero(),
            multiplier: Decimal::from(1),
            ticker_last_price: Decimal::zero(),
            ticker_close_price: Decimal::zero(),
            ticker_decimals,
            rollup: PortfolioRollup::default(),
            ticker_data_requested: false,
            ticker_id: None,
            needs_attention: false,
            attention_notes: Vec::new(),
            transactions: Vec::new(),
            open_legs: Vec::new(),
        }
    }

    pub fn with_future_expiry(mut self, expiry: Option<NaiveDate>) -> Self {
        self.future_expiry = expiry;
        self
    }

    pub fn leg(&self, r: LegRef) -> Option<&Leg> {
        self.transactions.get(r.transaction)?.legs.get(r.leg)
    }

    pub fn leg_mut(&mut self, r: LegRef) -> Option<&mut Leg> {
        self.transactions.get_mut(r.transaction)?.legs.get_mut(r.leg)
    }

    /// Every leg in entry order together with its position.
    pub fn legs(&self) -> impl Iterator<Item = (LegRef, &Leg)> {
        self.transactions.iter().enumerate().flat_map(|(t, tx)| {
            tx.legs
                .iter()
                .enumerate()
                .map(move |(l, leg)| (LegRef::new(t, l), leg))
        })
    }

    /// Open legs in the derived display order.
    pub fn open_leg_iter(&self) -> impl Iterator<Item = &Leg> {
        self.open_legs.iter().filter_map(|r| self.leg(*r))
    }

    pub fn find_leg(&self, leg_id: i64) -> Option<LegRef> {
        self.legs()
            .find(|(_, leg)| leg.leg_id == leg_id)
            .map(|(r, _)| r)
    }

    pub fn flag_attention(&mut self, note: impl Into<String>) {
        let note = note.into();
        self.needs_attention = true;
        if !self.attention_notes.contains(&note) {
            self.attention_notes.push(note);
        }
    }

    /// Append a transaction, assigning leg ids and applying back-pointer quantity changes.
    ///
    /// The trade is left untouched when any back pointer is invalid. Derived
    /// fields are not refreshed here; callers run the position deriver next.
    pub fn append_transaction(&mut self, mut tx: Transaction) -> Result<(), TradeError> {
        let leg_count = i64::try_from(tx.legs.len()).unwrap_or(i64::MAX);
        if self.next_leg_id.checked_add(leg_count).is_none() {
            return Err(TradeError::LegIdsExhausted {
                next_leg_id: self.next_leg_id,
            });
        }
        let mut pending: Vec<(LegRef, i64)> = Vec::new();
        for leg in tx.legs.iter().filter(|l| l.leg_back_pointer_id != 0) {
            let target_ref = self.find_leg(leg.leg_back_pointer_id).ok_or(
                TradeError::UnknownBackPointer {
                    leg_id: leg.leg_back_pointer_id,
                },
            )?;
            let already = pending
                .iter()
                .filter(|(r, _)| *r == target_ref)
                .fold(0i64, |acc, (_, q)| acc.saturating_add(*q));
            let open = self
                .leg(target_ref)
                .map(|l| l.open_quantity)
                .unwrap_or(0)
                .saturating_add(already);
            let over_close = match open.checked_add(leg.original_quantity) {
                Some(after) => open == 0 || after.signum() == -open.signum(),
                None => true,
            };
            if over_close {
                return Err(TradeError::OverClose {
                    leg_id: leg.leg_back_pointer_id,
                    open,
                    change: leg.original_quantity,
                });
            }
            pending.push((target_ref, leg.original_quantity));
        }

        for (target_ref, change) in pending {
            if let Some(target) = self.leg_mut(target_ref) {
                target.open_quantity = target.open_quantity.saturating_add(change);
            }
        }
        for leg in tx.legs.iter_mut() {
            leg.leg_id = self.next_leg_id;
            self.next_leg_id += 1;
            if leg.leg_back_pointer_id != 0 {
                leg.open_quantity = 0;
            }
        }
        self.transactions.push(tx);
        Ok(())
    }

    pub fn apply_prices(&mut self, last: Decimal, close: Decimal) {
        self.ticker_last_price = last;
        self.ticker_close_price = close;
    }

    /// Recompute portfolio totals from the open legs' real-time fields.
    pub fn recompute_rollup(&mut self) {
        let mut rollup = PortfolioRollup::default();
        for leg in self.open_leg_iter() {
            rollup.total_position_cost += leg.quote.position_cost;
            rollup.total_market_value += leg.quote.market_value;
            rollup.total_unrealized_pnl += leg.quote.unrealized_pnl;
        }
        rollup.percentage = Decimal::checked_ratio(
            rollup.total_unrealized_pnl,
            rollup.total_position_cost,
        )
        .abs()
        .with_sign_of(rollup.total_unrealized_pnl)
            * Decimal::hundred();
        self.rollup = rollup;
    }
}
