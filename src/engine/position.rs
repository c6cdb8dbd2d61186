//! Position derivation: open state, sorted open legs and adjusted cost base.
//!
//! Everything here is recomputed from the full transaction history on every
//! call. Historical transactions may be edited by hand, so no incremental
//! bookkeeping is trusted.

use crate::domain::{Decimal, Leg, LegRef, PutCall, Trade, TradeError, Transaction, UnderlyingKind};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::warn;

/// Output of one derivation pass over a trade.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DerivedState {
    pub is_open: bool,
    pub open_legs: Vec<LegRef>,
    pub adjusted_cost_base: Decimal,
    pub multiplier: Decimal,
    /// Leg ids whose strike could not be parsed and sorted as zero.
    pub malformed_strikes: Vec<i64>,
}

impl DerivedState {
    pub fn needs_attention(&self) -> bool {
        !self.malformed_strikes.is_empty()
    }
}

/// Rolled-up shares/futures quantity, shown as a single line instead of per leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareRollup {
    pub underlying_kind: UnderlyingKind,
    pub quantity: i64,
}

/// Derive open state, the sorted open-leg list and cost base for `trade`.
pub fn derive(trade: &Trade) -> DerivedState {
    let adjusted_cost_base = trade.transactions.iter().map(|tx| tx.total).sum();
    let multiplier = latest_multiplier(&trade.transactions);

    let mut open_legs: Vec<LegRef> = trade
        .legs()
        .filter(|(_, leg)| leg.is_open())
        .map(|(r, _)| r)
        .collect();
    open_legs.sort_by(|a, b| match (trade.leg(*a), trade.leg(*b)) {
        (Some(a), Some(b)) => compare_open_legs(a, b),
        _ => Ordering::Equal,
    });

    let malformed_strikes = open_legs
        .iter()
        .filter_map(|r| trade.leg(*r))
        .filter(|leg| leg.strike_value().is_none())
        .map(|leg| leg.leg_id)
        .collect();

    DerivedState {
        is_open: is_trade_open(trade),
        open_legs,
        adjusted_cost_base,
        multiplier,
        malformed_strikes,
    }
}

/// Run [`derive`] and store the result on the trade.
pub fn refresh(trade: &mut Trade) {
    let state = derive(trade);
    for leg_id in &state.malformed_strikes {
        let strike = trade
            .find_leg(*leg_id)
            .and_then(|r| trade.leg(r))
            .map(|l| l.strike_price.clone())
            .unwrap_or_default();
        warn!(
            ticker = %trade.ticker_symbol,
            leg_id,
            strike = %strike,
            "Unparsable strike price, sorting as 0"
        );
        trade.flag_attention(format!("leg {} has unparsable strike '{}'", leg_id, strike));
    }
    trade.is_open = state.is_open;
    trade.open_legs = state.open_legs;
    trade.adjusted_cost_base = state.adjusted_cost_base;
    trade.multiplier = state.multiplier;
    trade.recompute_rollup();
}

/// Journal a new transaction on `trade` and re-derive.
pub fn record_transaction(trade: &mut Trade, tx: Transaction) -> Result<(), TradeError> {
    trade.append_transaction(tx)?;
    refresh(trade);
    Ok(())
}

/// Open if any option leg is open; otherwise if the shares/futures aggregate is non-zero.
///
/// A trade with no legs yet counts as open.
pub fn is_trade_open(trade: &Trade) -> bool {
    let mut any_leg = false;
    let mut aggregate: i64 = 0;
    for (_, leg) in trade.legs() {
        any_leg = true;
        if leg.is_option() && leg.is_open() {
            return true;
        }
        if leg.underlying_kind.is_aggregated() {
            aggregate = aggregate.saturating_add(leg.open_quantity);
        }
    }
    !any_leg || aggregate != 0
}

/// Puts before calls, ascending strike within a right, legs without a right last.
///
/// Equal keys compare equal so a stable sort keeps entry order.
pub fn compare_open_legs(a: &Leg, b: &Leg) -> Ordering {
    fn rank(leg: &Leg) -> u8 {
        match leg.put_call {
            Some(PutCall::Put) => 0,
            Some(PutCall::Call) => 1,
            None => 2,
        }
    }

    let (ra, rb) = (rank(a), rank(b));
    if ra != rb || ra == 2 {
        return ra.cmp(&rb);
    }
    let sa = a.strike_value().unwrap_or_default();
    let sb = b.strike_value().unwrap_or_default();
    sa.cmp(&sb)
}

fn latest_multiplier(transactions: &[Transaction]) -> Decimal {
    transactions
        .iter()
        .rev()
        .map(|tx| tx.multiplier)
        .find(|m| !m.is_zero())
        .unwrap_or_else(|| Decimal::from(1))
}

/// Aggregate open shares/futures quantity, `None` when the trade holds none.
pub fn share_rollup(trade: &Trade) -> Option<ShareRollup> {
    let mut kind = None;
    let mut quantity: i64 = 0;
    for (_, leg) in trade.legs() {
        if leg.underlying_kind.is_aggregated() {
            kind.get_or_insert(leg.underlying_kind);
            quantity = quantity.saturating_add(leg.open_quantity);
        }
    }
    match kind {
        Some(underlying_kind) if quantity != 0 => Some(ShareRollup {
            underlying_kind,
            quantity,
        }),
        _ => None,
    }
}

/// Recompute every leg's open quantity by replaying the transaction log.
///
/// Opening legs contribute their original quantity; legs with a back pointer
/// move their original quantity onto the referenced leg and hold nothing
/// themselves. Sums saturate at the `i64` bounds.
pub fn replay_open_quantities(trade: &Trade) -> BTreeMap<i64, i64> {
    let mut open: BTreeMap<i64, i64> = BTreeMap::new();
    for (_, leg) in trade.legs() {
        if leg.leg_back_pointer_id == 0 {
            open.insert(leg.leg_id, leg.original_quantity);
        } else {
            let target = open.entry(leg.leg_back_pointer_id).or_insert(0);
            *target = target.saturating_add(leg.original_quantity);
            open.insert(leg.leg_id, 0);
        }
    }
    open
}

/// A leg whose stored open quantity differs from the replayed projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayDivergence {
    pub leg_id: i64,
    pub stored: i64,
    pub replayed: i64,
}

pub fn replay_divergences(trade: &Trade) -> Vec<ReplayDivergence> {
    let replayed = replay_open_quantities(trade);
    trade
        .legs()
        .filter_map(|(_, leg)| {
            let r = replayed.get(&leg.leg_id).copied().unwrap_or(0);
            (r != leg.open_quantity).then_some(ReplayDivergence {
                leg_id: leg.leg_id,
                stored: leg.open_quantity,
                replayed: r,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ymd, Action};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn option(qty: i64, strike: &str, pc: PutCall) -> Leg {
        let action = if qty < 0 {
            Action::SellToOpen
        } else {
            Action::BuyToOpen
        };
        Leg::opening(
            qty,
            ymd(2024, 6, 21),
            strike,
            Some(pc),
            action,
            UnderlyingKind::Options,
        )
    }

    fn shares(qty: i64) -> Leg {
        let action = if qty < 0 {
            Action::SellToOpen
        } else {
            Action::BuyToOpen
        };
        Leg::opening(qty, None, "", None, action, UnderlyingKind::Shares)
    }

    fn tx(total: &str, multiplier: &str) -> Transaction {
        Transaction::new(
            ymd(2024, 1, 2),
            "entry",
            UnderlyingKind::Options,
            1,
            d("1"),
            d(multiplier),
            d("0"),
            d(total),
        )
    }

    fn strikes(trade: &Trade, state: &DerivedState) -> Vec<String> {
        state
            .open_legs
            .iter()
            .map(|r| {
                let leg = trade.leg(*r).unwrap();
                format!(
                    "{}@{}",
                    leg.put_call.map(|p| p.as_str()).unwrap_or("-"),
                    leg.strike_price
                )
            })
            .collect()
    }

    #[test]
    fn test_open_legs_sorted_puts_then_calls_by_strike() {
        let mut trade = Trade::new("AAPL", "", 0);
        trade
            .append_transaction(tx("100", "100").with_legs([
                option(-1, "50", PutCall::Call),
                option(-1, "40", PutCall::Put),
                option(1, "30", PutCall::Put),
                option(1, "45", PutCall::Call),
            ]))
            .unwrap();
        let state = derive(&trade);
        assert_eq!(strikes(&trade, &state), vec!["P@30", "P@40", "C@45", "C@50"]);
    }

    #[test]
    fn test_sort_is_stable_for_equal_keys_and_rightless_legs() {
        let mut trade = Trade::new("AAPL", "", 0);
        let mut first = option(-1, "40", PutCall::Put);
        first.expiry_date = ymd(2024, 5, 17);
        trade
            .append_transaction(tx("100", "100").with_legs([
                shares(100),
                first,
                option(1, "40", PutCall::Put),
                shares(50),
            ]))
            .unwrap();
        let state = derive(&trade);
        let ids: Vec<i64> = state
            .open_legs
            .iter()
            .map(|r| trade.leg(*r).unwrap().leg_id)
            .collect();
        assert_eq!(ids, vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_acb_is_sum_of_totals() {
        let mut trade = Trade::new("AAPL", "", 0);
        trade
            .append_transaction(tx("250.50", "100").with_leg(option(-1, "150", PutCall::Put)))
            .unwrap();
        trade
            .append_transaction(tx("-75.25", "0").with_leg(option(1, "140", PutCall::Put)))
            .unwrap();
        refresh(&mut trade);
        assert_eq!(trade.adjusted_cost_base, d("175.25"));
        refresh(&mut trade);
        assert_eq!(trade.adjusted_cost_base, d("175.25"));
    }

    #[test]
    fn test_open_option_wins_over_flat_shares() {
        let mut trade = Trade::new("AAPL", "", 0);
        trade
            .append_transaction(tx("0", "1").with_legs([
                shares(100),
                shares(-100),
                option(-1, "150", PutCall::Call),
            ]))
            .unwrap();
        assert!(is_trade_open(&trade));
    }

    #[test]
    fn test_shares_only_open_iff_aggregate_nonzero() {
        let mut trade = Trade::new("MSFT", "", 0);
        trade
            .append_transaction(tx("-4000", "1").with_legs([shares(100), shares(-100)]))
            .unwrap();
        assert!(!is_trade_open(&trade));

        trade
            .append_transaction(tx("-2000", "1").with_leg(shares(50)))
            .unwrap();
        assert!(is_trade_open(&trade));
        assert_eq!(
            share_rollup(&trade),
            Some(ShareRollup {
                underlying_kind: UnderlyingKind::Shares,
                quantity: 50
            })
        );
    }

    #[test]
    fn test_empty_trade_is_open() {
        let trade = Trade::new("QQQ", "", 0);
        assert!(is_trade_open(&trade));
    }

    #[test]
    fn test_closed_options_trade() {
        let mut trade = Trade::new("AAPL", "", 0);
        record_transaction(&mut trade, tx("200", "100").with_leg(option(-1, "150", PutCall::Put)))
            .unwrap();
        assert!(trade.is_open);
        let target = trade.leg(LegRef::new(0, 0)).unwrap().clone();
        record_transaction(
            &mut trade,
            tx("-50", "100").with_leg(Leg::closing(&target, 1, Action::BuyToClose)),
        )
        .unwrap();
        assert!(!trade.is_open);
        assert!(trade.open_legs.is_empty());
        assert_eq!(trade.adjusted_cost_base, d("150"));
    }

    #[test]
    fn test_multiplier_inherits_latest_nonzero() {
        let mut trade = Trade::new("/ES", "", 0);
        trade
            .append_transaction(tx("0", "50").with_leg(option(1, "5000", PutCall::Call)))
            .unwrap();
        trade
            .append_transaction(tx("0", "0").with_leg(option(-1, "5100", PutCall::Call)))
            .unwrap();
        assert_eq!(derive(&trade).multiplier, d("50"));
        assert_eq!(derive(&Trade::new("X", "", 0)).multiplier, d("1"));
    }

    #[test]
    fn test_malformed_strike_sorts_as_zero_and_flags() {
        let mut trade = Trade::new("AAPL", "", 0);
        trade
            .append_transaction(tx("0", "100").with_legs([
                option(-1, "40", PutCall::Put),
                option(-1, "n/a", PutCall::Put),
            ]))
            .unwrap();
        refresh(&mut trade);
        let first = trade.leg(trade.open_legs[0]).unwrap();
        assert_eq!(first.strike_price, "n/a");
        assert!(trade.needs_attention);
    }

    #[test]
    fn test_replay_matches_recorded_quantities() {
        let mut trade = Trade::new("AAPL", "", 0);
        record_transaction(&mut trade, tx("300", "100").with_leg(option(-3, "150", PutCall::Put)))
            .unwrap();
        let target = trade.leg(LegRef::new(0, 0)).unwrap().clone();
        record_transaction(
            &mut trade,
            tx("-40", "100").with_leg(Leg::closing(&target, 1, Action::BuyToClose)),
        )
        .unwrap();
        let replayed = replay_open_quantities(&trade);
        assert_eq!(replayed.get(&1), Some(&-2));
        assert_eq!(replayed.get(&2), Some(&0));
        assert!(replay_divergences(&trade).is_empty());

        trade.leg_mut(LegRef::new(0, 0)).unwrap().open_quantity = -1;
        assert_eq!(
            replay_divergences(&trade),
            vec![ReplayDivergence {
                leg_id: 1,
                stored: -1,
                replayed: -2
            }]
        );
    }
}
