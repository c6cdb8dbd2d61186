//! Static instrument tables: index tickers, futures exchanges and display precision.

/// Tickers that are cash-settled indexes rather than stocks, with their listing exchange.
const INDEX_TICKERS: &[(&str, &str)] = &[
    ("SPX", "CBOE"),
    ("XSP", "CBOE"),
    ("NDX", "NASDAQ"),
    ("RUT", "RUSSELL"),
    ("VIX", "CBOE"),
    ("DJX", "CBOE"),
];

/// Futures root symbol to exchange.
const FUTURES_EXCHANGES: &[(&str, &str)] = &[
    ("ES", "CME"),
    ("MES", "CME"),
    ("NQ", "CME"),
    ("MNQ", "CME"),
    ("RTY", "CME"),
    ("M2K", "CME"),
    ("6A", "CME"),
    ("6B", "CME"),
    ("6C", "CME"),
    ("6E", "CME"),
    ("6J", "CME"),
    ("6S", "CME"),
    ("HE", "CME"),
    ("LE", "CME"),
    ("YM", "CBOT"),
    ("MYM", "CBOT"),
    ("ZB", "CBOT"),
    ("ZN", "CBOT"),
    ("ZF", "CBOT"),
    ("ZC", "CBOT"),
    ("ZS", "CBOT"),
    ("ZW", "CBOT"),
    ("CL", "NYMEX"),
    ("MCL", "NYMEX"),
    ("NG", "NYMEX"),
    ("GC", "COMEX"),
    ("MGC", "COMEX"),
    ("SI", "COMEX"),
    ("HG", "COMEX"),
    ("VX", "CFE"),
];

/// Display precision for underlyings quoted finer than cents.
const TICKER_DECIMALS: &[(&str, u32)] = &[
    ("/6A", 5),
    ("/6B", 4),
    ("/6C", 5),
    ("/6E", 5),
    ("/6J", 7),
    ("/6S", 5),
    ("/ZB", 3),
    ("/ZN", 3),
    ("/ZF", 4),
    ("/NG", 3),
    ("/HG", 4),
];

const DEFAULT_DECIMALS: u32 = 2;

/// `/ES` style journal symbols denote futures.
pub fn is_future_symbol(symbol: &str) -> bool {
    symbol.trim().starts_with('/')
}

/// Listing exchange when `symbol` is an index ticker.
pub fn index_exchange(symbol: &str) -> Option<&'static str> {
    let symbol = symbol.trim().to_ascii_uppercase();
    INDEX_TICKERS
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, e)| *e)
}

/// Exchange for a futures root; accepts the symbol with or without the `/` marker.
pub fn futures_exchange(symbol: &str) -> Option<&'static str> {
    let root = normalize_symbol(symbol);
    FUTURES_EXCHANGES
        .iter()
        .find(|(s, _)| *s == root)
        .map(|(_, e)| *e)
}

pub fn ticker_decimals(symbol: &str) -> u32 {
    let symbol = symbol.trim().to_ascii_uppercase();
    TICKER_DECIMALS
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, d)| *d)
        .unwrap_or(DEFAULT_DECIMALS)
}

/// Upper-case symbol with the futures `/` marker stripped.
///
/// Journal and broker spell the same underlying differently (`/ES` vs `ES`).
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().trim_start_matches('/').to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_lookup() {
        assert_eq!(index_exchange("spx"), Some("CBOE"));
        assert_eq!(index_exchange("AAPL"), None);
    }

    #[test]
    fn test_futures_lookup_strips_marker() {
        assert!(is_future_symbol("/ES"));
        assert!(!is_future_symbol("ES"));
        assert_eq!(futures_exchange("/ES"), Some("CME"));
        assert_eq!(futures_exchange("cl"), Some("NYMEX"));
        assert_eq!(futures_exchange("/XYZ"), None);
    }

    #[test]
    fn test_decimals_default_and_override() {
        assert_eq!(ticker_decimals("AAPL"), 2);
        assert_eq!(ticker_decimals("/6E"), 5);
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol(" /es "), "ES");
        assert_eq!(normalize_symbol("aapl"), "AAPL");
    }
}
