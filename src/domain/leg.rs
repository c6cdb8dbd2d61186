//! A single option/share/future lot inside a transaction.

use crate::domain::{Action, ContractId, Decimal, PutCall, UnderlyingKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Position of a leg inside its trade: owning transaction index, then leg index.
///
/// This is the leg's back-reference to its transaction; it is only valid for
/// the trade it was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LegRef {
    pub transaction: usize,
    pub leg: usize,
}

impl LegRef {
    pub fn new(transaction: usize, leg: usize) -> Self {
        Self { transaction, leg }
    }
}

/// Real-time valuation of a leg, last write wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegQuote {
    pub position_cost: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub percentage: Decimal,
    pub text: QuoteText,
}

/// Display strings cached alongside the numeric quote fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteText {
    pub position_cost: String,
    pub market_value: String,
    pub unrealized_pnl: String,
    pub percentage: String,
}

impl QuoteText {
    pub fn render(
        position_cost: Decimal,
        market_value: Decimal,
        unrealized_pnl: Decimal,
        percentage: Decimal,
        decimals: u32,
    ) -> Self {
        Self {
            position_cost: position_cost.to_fixed(decimals),
            market_value: market_value.to_fixed(decimals),
            unrealized_pnl: unrealized_pnl.to_fixed(decimals),
            percentage: format!("{}%", percentage.to_fixed(2)),
        }
    }
}

/// One lot created or modified by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leg {
    /// Unique within the owning trade, assigned from `Trade::next_leg_id`.
    pub leg_id: i64,
    /// Leg whose quantity this leg modifies; 0 when this leg opens a position.
    pub leg_back_pointer_id: i64,
    pub original_quantity: i64,
    /// Signed: positive long, negative short, zero closed.
    pub open_quantity: i64,
    pub expiry_date: Option<NaiveDate>,
    /// Kept as text to preserve the broker's formatting.
    pub strike_price: String,
    pub put_call: Option<PutCall>,
    pub action: Action,
    pub underlying_kind: UnderlyingKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<ContractId>,
    #[serde(default)]
    pub quote: LegQuote,
}

impl Leg {
    /// A leg opening a new position. `leg_id` is assigned when the transaction is recorded.
    pub fn opening(
        quantity: i64,
        expiry_date: Option<NaiveDate>,
        strike_price: impl Into<String>,
        put_call: Option<PutCall>,
        action: Action,
        underlying_kind: UnderlyingKind,
    ) -> Self {
        Self {
            leg_id: 0,
            leg_back_pointer_id: 0,
            original_quantity: quantity,
            open_quantity: quantity,
            expiry_date,
            strike_price: strike_price.into(),
            put_call,
            action,
            underlying_kind,
            contract_id: None,
            quote: LegQuote::default(),
        }
    }

    /// A leg that closes (or expires, rolls, assigns) `quantity` of `target`.
    pub fn closing(target: &Leg, quantity: i64, action: Action) -> Self {
        Self {
            leg_id: 0,
            leg_back_pointer_id: target.leg_id,
            original_quantity: quantity,
            open_quantity: 0,
            expiry_date: target.expiry_date,
            strike_price: target.strike_price.clone(),
            put_call: target.put_call,
            action,
            underlying_kind: target.underlying_kind,
            contract_id: None,
            quote: LegQuote::default(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open_quantity != 0
    }

    pub fn is_option(&self) -> bool {
        self.underlying_kind == UnderlyingKind::Options
    }

    pub fn is_long(&self) -> bool {
        self.open_quantity > 0
    }

    pub fn is_short(&self) -> bool {
        self.open_quantity < 0
    }

    /// Numeric strike, `None` when the text is not a number.
    ///
    /// An empty strike (shares, futures) parses as zero.
    pub fn strike_value(&self) -> Option<Decimal> {
        Decimal::parse_field(&self.strike_price)
    }

    /// Apply a portfolio valuation and refresh the cached display text.
    pub fn apply_quote(
        &mut self,
        position_cost: Decimal,
        market_value: Decimal,
        unrealized_pnl: Decimal,
        decimals: u32,
    ) {
        let percentage = Decimal::checked_ratio(unrealized_pnl, position_cost)
            .abs()
            .with_sign_of(unrealized_pnl)
            * Decimal::hundred();
        self.quote = LegQuote {
            position_cost,
            market_value,
            unrealized_pnl,
            percentage,
            text: QuoteText::render(
                position_cost,
                market_value,
                unrealized_pnl,
                percentage,
                decimals,
            ),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ymd;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn short_put() -> Leg {
        Leg::opening(
            -2,
            ymd(2024, 3, 15),
            "150",
            Some(PutCall::Put),
            Action::SellToOpen,
            UnderlyingKind::Options,
        )
    }

    #[test]
    fn test_open_flag_tracks_quantity() {
        let mut leg = short_put();
        assert!(leg.is_open());
        assert!(leg.is_short());
        leg.open_quantity = 0;
        assert!(!leg.is_open());
    }

    #[test]
    fn test_closing_leg_points_back() {
        let mut target = short_put();
        target.leg_id = 7;
        let close = Leg::closing(&target, 2, Action::BuyToClose);
        assert_eq!(close.leg_back_pointer_id, 7);
        assert_eq!(close.open_quantity, 0);
        assert_eq!(close.strike_price, "150");
        assert_eq!(close.put_call, Some(PutCall::Put));
    }

    #[test]
    fn test_strike_value_malformed() {
        let mut leg = short_put();
        assert_eq!(leg.strike_value(), Some(d("150")));
        leg.strike_price = "15O".to_string();
        assert_eq!(leg.strike_value(), None);
        leg.strike_price = String::new();
        assert_eq!(leg.strike_value(), Some(Decimal::zero()));
    }

    #[test]
    fn test_apply_quote_percentage_sign_follows_pnl() {
        let mut leg = short_put();
        // Short positions report a negative cost from the gateway.
        leg.apply_quote(d("-400"), d("-300"), d("100"), 2);
        assert_eq!(leg.quote.percentage, d("25"));
        assert_eq!(leg.quote.text.percentage, "25.00%");

        leg.apply_quote(d("400"), d("300"), d("-100"), 2);
        assert_eq!(leg.quote.percentage, d("-25"));
        assert_eq!(leg.quote.text.market_value, "300.00");
    }
}
