//! Domain primitives: identifiers, enum codes and journal dates.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Index of a trade inside the loaded journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TradeId(pub usize);

impl std::fmt::Display for TradeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Gateway request id for a price subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TickerId(pub i64);

/// Gateway identifier of a single listed contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContractId(pub i64);

/// Kind of instrument a transaction or leg refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnderlyingKind {
    Options,
    Shares,
    Futures,
    Currency,
    Commodities,
    Dividend,
    Other,
}

impl UnderlyingKind {
    /// Decode the integer stored in the journal log. Unknown codes map to `Other`.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => UnderlyingKind::Options,
            1 => UnderlyingKind::Shares,
            2 => UnderlyingKind::Futures,
            3 => UnderlyingKind::Currency,
            4 => UnderlyingKind::Commodities,
            5 => UnderlyingKind::Dividend,
            _ => UnderlyingKind::Other,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            UnderlyingKind::Options => 0,
            UnderlyingKind::Shares => 1,
            UnderlyingKind::Futures => 2,
            UnderlyingKind::Currency => 3,
            UnderlyingKind::Commodities => 4,
            UnderlyingKind::Dividend => 5,
            UnderlyingKind::Other => 6,
        }
    }

    /// Shares and futures open state is judged on the aggregate quantity, not per leg.
    pub fn is_aggregated(&self) -> bool {
        matches!(self, UnderlyingKind::Shares | UnderlyingKind::Futures)
    }
}

/// Order action that produced a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    SellToOpen,
    BuyToOpen,
    SellToClose,
    BuyToClose,
}

impl Action {
    /// Decode the journal code. Returns `None` for codes outside 0..=3.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Action::SellToOpen),
            1 => Some(Action::BuyToOpen),
            2 => Some(Action::SellToClose),
            3 => Some(Action::BuyToClose),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Action::SellToOpen => 0,
            Action::BuyToOpen => 1,
            Action::SellToClose => 2,
            Action::BuyToClose => 3,
        }
    }

    pub fn is_opening(&self) -> bool {
        matches!(self, Action::SellToOpen | Action::BuyToOpen)
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> i64 {
        match self {
            Action::BuyToOpen | Action::BuyToClose => 1,
            Action::SellToOpen | Action::SellToClose => -1,
        }
    }
}

/// Option right. Legs that are not options carry `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PutCall {
    Put,
    Call,
}

impl PutCall {
    /// Parse the journal/broker text form. Accepts `P`/`C` as well as `PUT`/`CALL`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P" | "PUT" => Some(PutCall::Put),
            "C" | "CALL" => Some(PutCall::Call),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PutCall::Put => "P",
            PutCall::Call => "C",
        }
    }
}

/// Journal log date helpers. The log stores `YYYYMMDD`; everything else uses `YYYY-MM-DD`.
pub mod journal_date {
    use chrono::NaiveDate;

    const LOG_FORMAT: &str = "%Y%m%d";
    const DISPLAY_FORMAT: &str = "%Y-%m-%d";

    /// Parse a log date. Also accepts the hyphenated form so hand-edited logs load.
    pub fn parse(s: &str) -> Option<NaiveDate> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        NaiveDate::parse_from_str(s, LOG_FORMAT)
            .or_else(|_| NaiveDate::parse_from_str(s, DISPLAY_FORMAT))
            .ok()
    }

    pub fn to_log(date: Option<NaiveDate>) -> String {
        date.map(|d| d.format(LOG_FORMAT).to_string())
            .unwrap_or_default()
    }

    pub fn to_display(date: Option<NaiveDate>) -> String {
        date.map(|d| d.format(DISPLAY_FORMAT).to_string())
            .unwrap_or_default()
    }
}

/// Convenience for tests and callers building dates by hand.
pub fn ymd(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}
