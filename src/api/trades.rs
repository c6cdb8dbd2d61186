use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::domain::{journal_date, Action, Leg, Trade, UnderlyingKind};
use crate::engine::itm::{self, Itm};
use crate::engine::position::share_rollup;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradesQuery {
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusFilter {
    Open,
    Closed,
    All,
}

impl StatusFilter {
    fn parse(raw: Option<&str>) -> Result<Self, AppError> {
        match raw.unwrap_or("all") {
            "open" => Ok(StatusFilter::Open),
            "closed" => Ok(StatusFilter::Closed),
            "all" | "" => Ok(StatusFilter::All),
            other => Err(AppError::BadRequest(format!(
                "status must be open, closed or all, got {}",
                other
            ))),
        }
    }

    fn admits(&self, trade: &Trade) -> bool {
        match self {
            StatusFilter::Open => trade.is_open,
            StatusFilter::Closed => !trade.is_open,
            StatusFilter::All => true,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradesResponse {
    pub trades: Vec<TradeDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeDto {
    pub id: usize,
    pub ticker_symbol: String,
    pub ticker_name: String,
    pub category: i64,
    pub is_open: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub future_expiry: Option<String>,
    pub adjusted_cost_base: String,
    pub multiplier: String,
    pub last_price: String,
    pub close_price: String,
    pub itm: Itm,
    pub position_cost: String,
    pub market_value: String,
    pub unrealized_pnl: String,
    pub percentage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares: Option<SharesDto>,
    pub open_legs: Vec<LegDto>,
    pub needs_attention: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attention_notes: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharesDto {
    pub kind: UnderlyingKind,
    pub quantity: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegDto {
    pub leg_id: i64,
    pub quantity: i64,
    pub kind: UnderlyingKind,
    pub action: Action,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub expiry: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub strike: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put_call: Option<&'static str>,
    pub market_value: String,
    pub unrealized_pnl: String,
    pub percentage: String,
}

impl LegDto {
    fn from_leg(leg: &Leg) -> Self {
        Self {
            leg_id: leg.leg_id,
            quantity: leg.open_quantity,
            kind: leg.underlying_kind,
            action: leg.action,
            expiry: journal_date::to_display(leg.expiry_date),
            strike: leg.strike_price.clone(),
            put_call: leg.put_call.map(|pc| pc.as_str()),
            market_value: leg.quote.text.market_value.clone(),
            unrealized_pnl: leg.quote.text.unrealized_pnl.clone(),
            percentage: leg.quote.text.percentage.clone(),
        }
    }
}

impl TradeDto {
    pub fn from_trade(id: usize, trade: &Trade) -> Self {
        let rollup = &trade.rollup;
        Self {
            id,
            ticker_symbol: trade.ticker_symbol.clone(),
            ticker_name: trade.ticker_name.clone(),
            category: trade.category,
            is_open: trade.is_open,
            future_expiry: trade
                .future_expiry
                .map(|d| journal_date::to_display(Some(d))),
            adjusted_cost_base: trade.adjusted_cost_base.to_fixed(2),
            multiplier: trade.multiplier.to_canonical_string(),
            last_price: trade.ticker_last_price.to_fixed(trade.ticker_decimals),
            close_price: trade.ticker_close_price.to_fixed(trade.ticker_decimals),
            itm: itm::classify(trade),
            position_cost: rollup.total_position_cost.to_fixed(2),
            market_value: rollup.total_market_value.to_fixed(2),
            unrealized_pnl: rollup.total_unrealized_pnl.to_fixed(2),
            percentage: format!("{}%", rollup.percentage.to_fixed(2)),
            shares: share_rollup(trade).map(|s| SharesDto {
                kind: s.underlying_kind,
                quantity: s.quantity,
            }),
            open_legs: trade.open_leg_iter().map(LegDto::from_leg).collect(),
            needs_attention: trade.needs_attention,
            attention_notes: trade.attention_notes.clone(),
        }
    }
}

pub async fn get_trades(
    Query(params): Query<TradesQuery>,
    State(state): State<AppState>,
) -> Result<Json<TradesResponse>, AppError> {
    let filter = StatusFilter::parse(params.status.as_deref())?;
    let trades = state.journal.trades().await?;

    let trades = trades
        .iter()
        .enumerate()
        .filter(|(_, t)| filter.admits(t))
        .map(|(id, t)| TradeDto::from_trade(id, t))
        .collect();

    Ok(Json(TradesResponse { trades }))
}
