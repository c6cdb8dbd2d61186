//! Reconciliation of journal open positions against the broker's position list.
//!
//! Purely informational: nothing here mutates a trade.

use crate::domain::instrument::normalize_symbol;
use crate::domain::{ContractId, Decimal, Leg, PutCall, Trade, UnderlyingKind};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Comparable identity of a position on either side.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionKey {
    pub ticker_symbol: String,
    pub underlying_kind: UnderlyingKind,
    pub expiry_date: Option<NaiveDate>,
    pub strike_price: String,
    pub put_call: Option<PutCall>,
}

impl PositionKey {
    /// Build a normalised key.
    ///
    /// Symbols lose case and the futures marker, strikes compare numerically,
    /// and fields that do not identify shares/futures positions are blanked.
    pub fn new(
        ticker_symbol: &str,
        underlying_kind: UnderlyingKind,
        expiry_date: Option<NaiveDate>,
        strike_price: &str,
        put_call: Option<PutCall>,
    ) -> Self {
        let strike_price = match Decimal::from_str_canonical(strike_price) {
            Ok(v) => v.to_canonical_string(),
            Err(_) => strike_price.trim().to_string(),
        };
        let mut key = Self {
            ticker_symbol: normalize_symbol(ticker_symbol),
            underlying_kind,
            expiry_date,
            strike_price,
            put_call,
        };
        match underlying_kind {
            UnderlyingKind::Options => {}
            UnderlyingKind::Futures => {
                key.strike_price.clear();
                key.put_call = None;
            }
            _ => {
                key.strike_price.clear();
                key.put_call = None;
                key.expiry_date = None;
            }
        }
        key
    }

    pub fn for_leg(trade: &Trade, leg: &Leg) -> Self {
        let expiry = match leg.underlying_kind {
            UnderlyingKind::Futures => leg.expiry_date.or(trade.future_expiry),
            _ => leg.expiry_date,
        };
        Self::new(
            &trade.ticker_symbol,
            leg.underlying_kind,
            expiry,
            &leg.strike_price,
            leg.put_call,
        )
    }
}

impl std::fmt::Display for PositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:?}", self.ticker_symbol, self.underlying_kind)?;
        if let Some(expiry) = self.expiry_date {
            write!(f, " {}", expiry.format("%Y-%m-%d"))?;
        }
        if !self.strike_price.is_empty() {
            write!(f, " {}", self.strike_price)?;
        }
        if let Some(pc) = self.put_call {
            write!(f, "{}", pc.as_str())?;
        }
        Ok(())
    }
}

/// One open journal leg reduced to its key and signed quantity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalPosition {
    pub key: PositionKey,
    pub quantity: i64,
}

/// One position as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerPosition {
    pub contract_id: Option<ContractId>,
    pub key: PositionKey,
    pub quantity: i64,
    pub average_cost: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchStatus {
    Matched,
    LocalOnly,
    BrokerOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileEntry {
    pub key: PositionKey,
    pub local_quantity: i64,
    pub broker_quantity: i64,
    pub status: MatchStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub matched: Vec<ReconcileEntry>,
    pub local_only: Vec<ReconcileEntry>,
    pub broker_only: Vec<ReconcileEntry>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.local_only.is_empty() && self.broker_only.is_empty()
    }
}

/// Snapshot every open leg of every open trade.
pub fn local_positions(trades: &[Trade]) -> Vec<LocalPosition> {
    trades
        .iter()
        .filter(|t| t.is_open)
        .flat_map(|trade| {
            trade
                .legs()
                .filter(|(_, leg)| leg.is_open())
                .map(move |(_, leg)| LocalPosition {
                    key: PositionKey::for_leg(trade, leg),
                    quantity: leg.open_quantity,
                })
        })
        .collect()
}

fn aggregate<'a>(items: impl Iterator<Item = (&'a PositionKey, i64)>) -> BTreeMap<PositionKey, i64> {
    let mut totals = BTreeMap::new();
    for (key, qty) in items {
        let total = totals.entry(key.clone()).or_insert(0i64);
        *total = total.saturating_add(qty);
    }
    totals
}

/// Compare aggregated local and broker quantities per key.
///
/// Output order is the key order, so identical inputs give identical reports.
pub fn reconcile(local: &[LocalPosition], broker: &[BrokerPosition]) -> ReconcileReport {
    let local_totals = aggregate(local.iter().map(|p| (&p.key, p.quantity)));
    let broker_totals = aggregate(broker.iter().map(|p| (&p.key, p.quantity)));

    let keys: BTreeSet<&PositionKey> = local_totals.keys().chain(broker_totals.keys()).collect();

    let mut report = ReconcileReport::default();
    for key in keys {
        let local_quantity = local_totals.get(key).copied().unwrap_or(0);
        let broker_quantity = broker_totals.get(key).copied().unwrap_or(0);
        let status = if local_quantity == broker_quantity {
            if local_quantity == 0 {
                continue;
            }
            MatchStatus::Matched
        } else if broker_quantity == 0 {
            MatchStatus::LocalOnly
        } else {
            MatchStatus::BrokerOnly
        };
        let entry = ReconcileEntry {
            key: key.clone(),
            local_quantity,
            broker_quantity,
            status,
        };
        match status {
            MatchStatus::Matched => report.matched.push(entry),
            MatchStatus::LocalOnly => report.local_only.push(entry),
            MatchStatus::BrokerOnly => report.broker_only.push(entry),
        }
    }
    report
}

/// Result of feeding the end-of-list signal to a [`Reconciler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The list is still streaming in.
    Pending,
    /// Same report as the previous pass.
    Unchanged,
    Updated(ReconcileReport),
}

/// Buffers the broker's position stream and reconciles once the list is complete.
#[derive(Debug, Default)]
pub struct Reconciler {
    buffer: BTreeMap<BufferKey, BrokerPosition>,
    complete: bool,
    last_report: Option<ReconcileReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum BufferKey {
    Contract(ContractId),
    Key(PositionKey),
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh position request; previously buffered positions are dropped.
    pub fn begin(&mut self) {
        self.buffer.clear();
        self.complete = false;
    }

    /// Buffer one position. A repeat for the same contract replaces the earlier one.
    pub fn on_position(&mut self, position: BrokerPosition) {
        let key = match position.contract_id {
            Some(id) => BufferKey::Contract(id),
            None => BufferKey::Key(position.key.clone()),
        };
        debug!(key = %position.key, quantity = position.quantity, "Broker position buffered");
        self.buffer.insert(key, position);
    }

    pub fn on_position_end(&mut self) {
        self.complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn broker_positions(&self) -> Vec<BrokerPosition> {
        self.buffer.values().cloned().collect()
    }

    pub fn last_report(&self) -> Option<&ReconcileReport> {
        self.last_report.as_ref()
    }

    /// Compare the buffered broker list against `local`.
    ///
    /// Does nothing until the end-of-list signal arrived. A pass that yields the
    /// same report as the previous one leaves the stored report in place.
    pub fn run(&mut self, local: &[LocalPosition]) -> ReconcileOutcome {
        if !self.complete {
            return ReconcileOutcome::Pending;
        }
        let report = reconcile(local, &self.broker_positions());
        if self.last_report.as_ref() == Some(&report) {
            debug!("Reconciliation inputs unchanged");
            return ReconcileOutcome::Unchanged;
        }
        info!(
            matched = report.matched.len(),
            local_only = report.local_only.len(),
            broker_only = report.broker_only.len(),
            "Reconciliation complete"
        );
        self.last_report = Some(report.clone());
        ReconcileOutcome::Updated(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ymd;

    fn put_key(symbol: &str, strike: &str) -> PositionKey {
        PositionKey::new(
            symbol,
            UnderlyingKind::Options,
            ymd(2024, 3, 15),
            strike,
            Some(PutCall::Put),
        )
    }

    fn local(symbol: &str, strike: &str, qty: i64) -> LocalPosition {
        LocalPosition {
            key: put_key(symbol, strike),
            quantity: qty,
        }
    }

    fn broker(id: i64, symbol: &str, strike: &str, qty: i64) -> BrokerPosition {
        BrokerPosition {
            contract_id: Some(ContractId(id)),
            key: put_key(symbol, strike),
            quantity: qty,
            average_cost: Decimal::zero(),
        }
    }

    #[test]
    fn test_matching_positions() {
        let report = reconcile(&[local("AAPL", "150", -2)], &[broker(1, "AAPL", "150", -2)]);
        assert_eq!(report.matched.len(), 1);
        assert!(report.local_only.is_empty());
        assert!(report.broker_only.is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn test_quantity_mismatch_is_broker_only() {
        let report = reconcile(&[local("AAPL", "150", -2)], &[broker(1, "AAPL", "150", -1)]);
        assert!(report.matched.is_empty());
        assert_eq!(report.broker_only.len(), 1);
        assert_eq!(report.broker_only[0].local_quantity, -2);
        assert_eq!(report.broker_only[0].broker_quantity, -1);
    }

    #[test]
    fn test_local_only_and_broker_only() {
        let report = reconcile(&[local("AAPL", "150", -2)], &[broker(2, "MSFT", "300", 1)]);
        assert_eq!(report.local_only.len(), 1);
        assert_eq!(report.local_only[0].key.ticker_symbol, "AAPL");
        assert_eq!(report.broker_only.len(), 1);
        assert_eq!(report.broker_only[0].local_quantity, 0);
    }

    #[test]
    fn test_split_journal_legs_aggregate() {
        let report = reconcile(
            &[local("AAPL", "150", -1), local("AAPL", "150.00", -1)],
            &[broker(1, "aapl", "150", -2)],
        );
        assert_eq!(report.matched.len(), 1);
        assert_eq!(report.matched[0].local_quantity, -2);
    }

    #[test]
    fn test_zero_broker_position_against_no_local_is_ignored() {
        let report = reconcile(&[], &[broker(1, "AAPL", "150", 0)]);
        assert_eq!(report, ReconcileReport::default());
    }

    #[test]
    fn test_futures_and_shares_keys_normalised() {
        let fut_local = PositionKey::new("/ES", UnderlyingKind::Futures, ymd(2024, 3, 15), "", None);
        let fut_broker = PositionKey::new("ES", UnderlyingKind::Futures, ymd(2024, 3, 15), "0", None);
        assert_eq!(fut_local, fut_broker);

        let shares_a = PositionKey::new("msft", UnderlyingKind::Shares, ymd(2024, 1, 1), "", None);
        let shares_b = PositionKey::new("MSFT", UnderlyingKind::Shares, None, "", None);
        assert_eq!(shares_a, shares_b);
    }

    #[test]
    fn test_reconciler_waits_for_end_and_is_idempotent() {
        let locals = vec![local("AAPL", "150", -2)];
        let mut rec = Reconciler::new();
        rec.begin();
        rec.on_position(broker(1, "AAPL", "150", -2));
        assert_eq!(rec.run(&locals), ReconcileOutcome::Pending);

        rec.on_position_end();
        let first = match rec.run(&locals) {
            ReconcileOutcome::Updated(r) => r,
            other => panic!("expected Updated, got {:?}", other),
        };
        assert_eq!(first.matched.len(), 1);

        // Trickle-in repeat of the same contract leaves the inputs unchanged.
        rec.on_position(broker(1, "AAPL", "150", -2));
        assert_eq!(rec.run(&locals), ReconcileOutcome::Unchanged);
        assert_eq!(rec.last_report(), Some(&first));

        rec.on_position(broker(1, "AAPL", "150", -1));
        match rec.run(&locals) {
            ReconcileOutcome::Updated(r) => assert_eq!(r.broker_only.len(), 1),
            other => panic!("expected Updated, got {:?}", other),
        }
    }

    #[test]
    fn test_local_positions_skip_closed_trades_and_legs() {
        use crate::domain::{Action, Transaction};
        use crate::engine::position::refresh;

        let mut trade = Trade::new("AAPL", "", 0);
        trade
            .append_transaction(
                Transaction::new(
                    ymd(2024, 1, 2),
                    "strangle",
                    UnderlyingKind::Options,
                    1,
                    Decimal::zero(),
                    Decimal::from(100),
                    Decimal::zero(),
                    Decimal::from(300),
                )
                .with_legs([
                    Leg::opening(-2, ymd(2024, 3, 15), "150", Some(PutCall::Put), Action::SellToOpen, UnderlyingKind::Options),
                    Leg::opening(-2, ymd(2024, 3, 15), "200", Some(PutCall::Call), Action::SellToOpen, UnderlyingKind::Options),
                ]),
            )
            .unwrap();
        trade.transactions[0].legs[1].open_quantity = 0;
        refresh(&mut trade);

        let mut closed = Trade::new("MSFT", "", 0);
        closed.is_open = false;

        let positions = local_positions(&[trade, closed]);
        assert_eq!(positions, vec![local("AAPL", "150", -2)]);
    }
}
