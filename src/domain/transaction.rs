//! Journal entry: one fill event or one manual adjustment.

use crate::domain::{Decimal, Leg, UnderlyingKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub trans_date: Option<NaiveDate>,
    pub description: String,
    pub underlying_kind: UnderlyingKind,
    pub quantity: i64,
    pub price: Decimal,
    pub multiplier: Decimal,
    pub fees: Decimal,
    /// Signed cash effect: negative is a debit (cash paid).
    pub total: Decimal,
    /// Entry order, not display order.
    pub legs: Vec<Leg>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trans_date: Option<NaiveDate>,
        description: impl Into<String>,
        underlying_kind: UnderlyingKind,
        quantity: i64,
        price: Decimal,
        multiplier: Decimal,
        fees: Decimal,
        total: Decimal,
    ) -> Self {
        Self {
            trans_date,
            description: description.into(),
            underlying_kind,
            quantity,
            price,
            multiplier,
            fees,
            total,
            legs: Vec::new(),
        }
    }

    pub fn with_leg(mut self, leg: Leg) -> Self {
        self.legs.push(leg);
        self
    }

    pub fn with_legs(mut self, legs: impl IntoIterator<Item = Leg>) -> Self {
        self.legs.extend(legs);
        self
    }
}
