//! Contract descriptors for price subscriptions.

use crate::domain::instrument::{futures_exchange, index_exchange, is_future_symbol, normalize_symbol};
use chrono::NaiveDate;
use thiserror::Error;

const STOCK_EXCHANGE: &str = "SMART";
const CURRENCY: &str = "USD";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityType {
    Stock,
    Index,
    Future,
}

/// What the gateway needs to identify the underlying of a trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractSpec {
    pub symbol: String,
    pub security_type: SecurityType,
    pub exchange: String,
    pub currency: String,
    /// Contract month as `YYYYMM`, futures only.
    pub contract_month: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("no exchange known for futures root {0}")]
    UnknownFuturesRoot(String),
    #[error("futures trade {0} has no contract month")]
    MissingContractMonth(String),
}

impl ContractSpec {
    /// Describe the underlying of a journal symbol.
    ///
    /// Index tickers get the index type and their listing exchange. Futures
    /// lose the `/` marker, take their exchange from the root table and use
    /// `future_expiry` as contract month. Everything else is a stock.
    pub fn for_symbol(symbol: &str, future_expiry: Option<NaiveDate>) -> Result<Self, ContractError> {
        let root = normalize_symbol(symbol);
        if is_future_symbol(symbol) {
            let exchange =
                futures_exchange(&root).ok_or_else(|| ContractError::UnknownFuturesRoot(root.clone()))?;
            let month = future_expiry.ok_or_else(|| ContractError::MissingContractMonth(root.clone()))?;
            return Ok(Self {
                symbol: root,
                security_type: SecurityType::Future,
                exchange: exchange.to_string(),
                currency: CURRENCY.to_string(),
                contract_month: Some(month.format("%Y%m").to_string()),
            });
        }
        if let Some(exchange) = index_exchange(&root) {
            return Ok(Self {
                symbol: root,
                security_type: SecurityType::Index,
                exchange: exchange.to_string(),
                currency: CURRENCY.to_string(),
                contract_month: None,
            });
        }
        Ok(Self {
            symbol: root,
            security_type: SecurityType::Stock,
            exchange: STOCK_EXCHANGE.to_string(),
            currency: CURRENCY.to_string(),
            contract_month: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ymd;

    #[test]
    fn test_stock_contract() {
        let c = ContractSpec::for_symbol("aapl", None).unwrap();
        assert_eq!(c.symbol, "AAPL");
        assert_eq!(c.security_type, SecurityType::Stock);
        assert_eq!(c.exchange, "SMART");
    }

    #[test]
    fn test_index_contract() {
        let c = ContractSpec::for_symbol("SPX", None).unwrap();
        assert_eq!(c.security_type, SecurityType::Index);
        assert_eq!(c.exchange, "CBOE");
        let c = ContractSpec::for_symbol("RUT", None).unwrap();
        assert_eq!(c.exchange, "RUSSELL");
    }

    #[test]
    fn test_futures_contract() {
        let c = ContractSpec::for_symbol("/ES", ymd(2024, 6, 21)).unwrap();
        assert_eq!(c.symbol, "ES");
        assert_eq!(c.security_type, SecurityType::Future);
        assert_eq!(c.exchange, "CME");
        assert_eq!(c.contract_month.as_deref(), Some("202406"));

        let c = ContractSpec::for_symbol("/CL", ymd(2024, 8, 20)).unwrap();
        assert_eq!(c.exchange, "NYMEX");
    }

    #[test]
    fn test_futures_errors() {
        assert_eq!(
            ContractSpec::for_symbol("/XX", ymd(2024, 6, 21)),
            Err(ContractError::UnknownFuturesRoot("XX".to_string()))
        );
        assert_eq!(
            ContractSpec::for_symbol("/ES", None),
            Err(ContractError::MissingContractMonth("ES".to_string()))
        );
    }
}
