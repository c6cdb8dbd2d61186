//! In-the-money display classification for a trade's open option legs.

use crate::domain::{Decimal, Leg, PutCall, Trade};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItmColor {
    Green,
    Red,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Itm {
    pub label: &'static str,
    pub color: ItmColor,
}

impl Itm {
    pub const NONE: Itm = Itm {
        label: "",
        color: ItmColor::Neutral,
    };

    pub fn is_itm(&self) -> bool {
        !self.label.is_empty()
    }
}

/// Classify `trade` from its last price and open legs, in derived open-leg order.
pub fn classify(trade: &Trade) -> Itm {
    classify_legs(trade.ticker_last_price, trade.open_leg_iter())
}

/// Scan open option legs in the given order.
///
/// A short ITM leg is red unless a long ITM leg was already seen earlier in the
/// scan; a long ITM leg is green. Green wins over red. The result depends on
/// scan order, which must be the deriver's puts-then-calls strike order.
pub fn classify_legs<'a>(last_price: Decimal, legs: impl IntoIterator<Item = &'a Leg>) -> Itm {
    if !last_price.is_positive() {
        return Itm::NONE;
    }

    let mut red = false;
    let mut green = false;
    let mut long_spread = false;

    for leg in legs {
        if !leg.is_option() || !leg.is_open() {
            continue;
        }
        let strike = leg.strike_value().unwrap_or_default();
        let in_the_money = match leg.put_call {
            Some(PutCall::Put) => last_price < strike,
            Some(PutCall::Call) => last_price > strike,
            None => false,
        };
        if !in_the_money {
            continue;
        }
        if leg.is_short() {
            if !long_spread {
                red = true;
            }
        } else {
            green = true;
            long_spread = true;
        }
    }

    if green {
        Itm {
            label: "ITM",
            color: ItmColor::Green,
        }
    } else if red {
        Itm {
            label: "ITM",
            color: ItmColor::Red,
        }
    } else {
        Itm::NONE
    }
}
