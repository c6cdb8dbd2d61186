//! Previous-close quotes from outside the gateway, used when a subscription is
//! refused for lack of market data entitlement.

use crate::domain::instrument::{index_exchange, is_future_symbol, normalize_symbol};
use crate::domain::Decimal;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuoteError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Rate limited")]
    RateLimited,
}

#[async_trait]
pub trait QuoteSource: Send + Sync + fmt::Debug {
    /// Close of the previous session for a journal symbol, `None` when the
    /// source has no quote for it.
    async fn previous_close(&self, symbol: &str) -> Result<Option<Decimal>, QuoteError>;
}

pub const DEFAULT_QUOTE_URL: &str = "https://query1.finance.yahoo.com";

/// Chart API client (`/v8/finance/chart/{symbol}`).
#[derive(Debug, Clone)]
pub struct HttpQuoteSource {
    client: Client,
    base_url: String,
}

impl HttpQuoteSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get_chart(&self, symbol: &str) -> Result<serde_json::Value, QuoteError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .get(&url)
                .query(&[("range", "5d"), ("interval", "1d")])
                .send()
                .await
                .map_err(|e| backoff::Error::transient(QuoteError::Network(e.to_string())))?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(QuoteError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(QuoteError::Http {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if status == 404 {
                return Ok(serde_json::Value::Null);
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(QuoteError::Http {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::permanent(QuoteError::Parse(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    async fn previous_close(&self, symbol: &str) -> Result<Option<Decimal>, QuoteError> {
        let chart_symbol = chart_symbol(symbol);
        debug!(symbol, chart_symbol = %chart_symbol, "Fetching previous close");
        let response = self.get_chart(&chart_symbol).await?;
        parse_previous_close(&response)
    }
}

/// Chart API spelling of a journal symbol: `^SPX` for indexes, `ES=F` for futures.
pub fn chart_symbol(symbol: &str) -> String {
    let root = normalize_symbol(symbol);
    if is_future_symbol(symbol) {
        format!("{}=F", root)
    } else if index_exchange(&root).is_some() {
        format!("^{}", root)
    } else {
        root
    }
}

fn parse_previous_close(response: &serde_json::Value) -> Result<Option<Decimal>, QuoteError> {
    if response.is_null() {
        return Ok(None);
    }
    let meta = response
        .pointer("/chart/result/0/meta")
        .ok_or_else(|| QuoteError::Parse("Missing chart meta".to_string()))?;

    let close = meta
        .get("previousClose")
        .or_else(|| meta.get("chartPreviousClose"))
        .filter(|v| v.is_number());
    match close {
        Some(n) => Decimal::from_str_canonical(&n.to_string())
            .map(|d| d.is_positive().then_some(d))
            .map_err(|e| QuoteError::Parse(format!("Invalid close: {}", e))),
        None => Ok(None),
    }
}

/// Fixed quotes for tests. Clones share the lookup counter.
#[derive(Debug, Clone, Default)]
pub struct MockQuoteSource {
    closes: HashMap<String, Decimal>,
    error: Option<QuoteError>,
    lookups: Arc<AtomicUsize>,
}

impl MockQuoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_close(mut self, symbol: &str, close: Decimal) -> Self {
        self.closes.insert(normalize_symbol(symbol), close);
        self
    }

    /// Fail every lookup with `error`.
    pub fn with_error(mut self, error: QuoteError) -> Self {
        self.error = Some(error);
        self
    }

    /// Number of `previous_close` calls so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteSource for MockQuoteSource {
    async fn previous_close(&self, symbol: &str) -> Result<Option<Decimal>, QuoteError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        Ok(self.closes.get(&normalize_symbol(symbol)).copied())
    }
}
