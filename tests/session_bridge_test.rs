use optjournal::domain::{ymd, Action, ContractId, Decimal, Leg, PutCall, Trade, Transaction, UnderlyingKind};
use optjournal::engine::itm::{classify, ItmColor};
use optjournal::engine::position;
use optjournal::engine::reconcile::{BrokerPosition, PositionKey};
use optjournal::journal::{spawn_journal_service, Journal, JournalHandle};
use optjournal::market::{
    ConnectionState, GatewayEvent, MarketDataBridge, MockConnector, MockGateway, MockQuoteSource,
    PortfolioUpdate, PriceField, QuoteError, Session, SessionConfig,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

fn put_spread() -> Trade {
    put_spread_on("AAPL")
}

fn put_spread_on(symbol: &str) -> Trade {
    let mut trade = Trade::new(symbol, "", 0);
    position::record_transaction(
        &mut trade,
        Transaction::new(
            ymd(2024, 1, 2),
            "put spread",
            UnderlyingKind::Options,
            1,
            d("1.20"),
            d("100"),
            d("1.30"),
            d("118.70"),
        )
        .with_legs([
            Leg::opening(-2, ymd(2024, 3, 15), "150", Some(PutCall::Put), Action::SellToOpen, UnderlyingKind::Options),
            Leg::opening(2, ymd(2024, 3, 15), "145", Some(PutCall::Put), Action::BuyToOpen, UnderlyingKind::Options),
        ]),
    )
    .unwrap();
    trade
}

fn put_key(strike: &str) -> PositionKey {
    PositionKey::new("AAPL", UnderlyingKind::Options, ymd(2024, 3, 15), strike, Some(PutCall::Put))
}

struct TestSession {
    session: Arc<Session>,
    journal: JournalHandle,
    connector: Arc<MockConnector>,
}

fn setup_session(connector: MockConnector, quotes: MockQuoteSource) -> TestSession {
    setup_session_with(vec![put_spread()], connector, quotes)
}

fn setup_session_with(trades: Vec<Trade>, connector: MockConnector, quotes: MockQuoteSource) -> TestSession {
    let (journal, _task) = spawn_journal_service(Journal::new(trades), None);
    let connector = Arc::new(connector);
    let bridge = Arc::new(MarketDataBridge::new(journal.clone(), Arc::new(quotes)));
    let session = Session::new(
        connector.clone(),
        bridge,
        journal.clone(),
        SessionConfig {
            ticker_refresh: Duration::from_millis(10),
            keepalive: Duration::from_millis(50),
        },
    );
    TestSession {
        session,
        journal,
        connector,
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = tokio::time::timeout(Duration::from_secs(2), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not reached in time");
}

async fn first_trade(journal: &JournalHandle) -> Trade {
    journal.trades().await.unwrap().remove(0)
}

async fn subscribed_gateway(test: &TestSession) -> Arc<MockGateway> {
    let gateway = test.connector.latest().unwrap();
    let watched = gateway.clone();
    eventually(|| {
        let watched = watched.clone();
        async move { !watched.subscriptions().is_empty() }
    })
    .await;
    gateway
}

#[tokio::test]
async fn test_price_ticks_reach_trade_and_itm() {
    let test = setup_session(MockConnector::new(), MockQuoteSource::new());
    test.session.connect().await.unwrap();

    let gateway = subscribed_gateway(&test).await;
    let (ticker_id, contract) = gateway.subscriptions().remove(0);
    assert_eq!(contract.symbol, "AAPL");
    assert_eq!(test.session.bridge().subscription_count(), 1);

    gateway.emit(GatewayEvent::PriceTick {
        ticker_id,
        field: PriceField::Close,
        price: d("151.20"),
    });
    gateway.emit(GatewayEvent::PriceTick {
        ticker_id,
        field: PriceField::Last,
        price: d("148.75"),
    });
    // Sentinel price, ignored.
    gateway.emit(GatewayEvent::PriceTick {
        ticker_id,
        field: PriceField::Last,
        price: d("-1"),
    });

    let journal = test.journal.clone();
    eventually(|| {
        let journal = journal.clone();
        async move { first_trade(&journal).await.ticker_last_price == d("148.75") }
    })
    .await;
    let trade = first_trade(&test.journal).await;
    assert_eq!(trade.ticker_close_price, d("151.20"));
    assert_eq!(classify(&trade).color, ItmColor::Red);
    assert!(trade.ticker_data_requested);

    test.session.disconnect().await;
    assert_eq!(test.session.bridge().subscription_count(), 0);
}

#[tokio::test]
async fn test_portfolio_update_binds_contract_and_rolls_up() {
    let test = setup_session(MockConnector::new(), MockQuoteSource::new());
    test.session.connect().await.unwrap();
    let gateway = test.connector.latest().unwrap();

    let update = |pnl: &str| {
        GatewayEvent::PortfolioUpdate(PortfolioUpdate {
            contract_id: ContractId(7001),
            key: put_key("150"),
            position: -2,
            market_price: d("1.00"),
            market_value: d("-200"),
            average_cost: d("60"),
            unrealized_pnl: d(pnl),
        })
    };
    gateway.emit(update("-80"));

    let journal = test.journal.clone();
    eventually(|| {
        let journal = journal.clone();
        async move { !first_trade(&journal).await.rollup.total_position_cost.is_zero() }
    })
    .await;
    let trade = first_trade(&test.journal).await;
    assert_eq!(trade.rollup.total_position_cost, d("120"));
    assert_eq!(trade.rollup.total_unrealized_pnl, d("-80"));
    let short = trade.open_leg_iter().find(|l| l.strike_price == "150").unwrap();
    assert_eq!(short.contract_id, Some(ContractId(7001)));
    assert_eq!(short.quote.text.market_value, "-200.00");

    // Bound now: a later update overwrites the same leg.
    gateway.emit(update("40"));
    let journal = test.journal.clone();
    eventually(|| {
        let journal = journal.clone();
        async move { first_trade(&journal).await.rollup.total_unrealized_pnl == d("40") }
    })
    .await;
    assert_eq!(
        test.session
            .bridge()
            .contract_valuation(ContractId(7001))
            .unwrap()
            .average_cost,
        d("60")
    );

    test.session.disconnect().await;
}

#[tokio::test]
async fn test_entitlement_error_falls_back_to_previous_close() {
    let test = setup_session(
        MockConnector::new().with_denied_market_data("AAPL"),
        MockQuoteSource::new().with_close("AAPL", d("187.40")),
    );
    test.session.connect().await.unwrap();

    let journal = test.journal.clone();
    eventually(|| {
        let journal = journal.clone();
        async move { first_trade(&journal).await.ticker_last_price == d("187.40") }
    })
    .await;
    let trade = first_trade(&test.journal).await;
    assert_eq!(trade.ticker_close_price, d("187.40"));
    assert!(!classify(&trade).is_itm());

    test.session.disconnect().await;
}

#[tokio::test]
async fn test_failed_close_lookup_leaves_trade_unpriced() {
    let quotes = MockQuoteSource::new().with_error(QuoteError::Network("connection reset".to_string()));
    let lookups = quotes.clone();
    let test = setup_session(MockConnector::new().with_denied_market_data("AAPL"), quotes);
    test.session.connect().await.unwrap();

    eventually(|| {
        let lookups = lookups.clone();
        async move { lookups.lookups() > 0 }
    })
    .await;
    // Let any follow-up journal command land.
    tokio::time::sleep(Duration::from_millis(30)).await;

    let trade = first_trade(&test.journal).await;
    assert!(trade.ticker_last_price.is_zero());
    assert!(trade.ticker_close_price.is_zero());
    assert!(trade.ticker_data_requested);
    assert_eq!(test.session.state(), ConnectionState::Connected);
    // One fallback per subscription.
    assert_eq!(lookups.lookups(), 1);

    test.session.disconnect().await;
}

#[tokio::test]
async fn test_rejected_subscription_is_retried_without_dropping_others() {
    let test = setup_session_with(
        vec![put_spread_on("XYZ"), put_spread_on("AAPL")],
        MockConnector::new().with_rejected_subscriptions("XYZ"),
        MockQuoteSource::new(),
    );
    test.session.connect().await.unwrap();
    let gateway = test.connector.latest().unwrap();

    let attempts = |symbol: &'static str| {
        let gateway = gateway.clone();
        move || {
            gateway
                .subscriptions()
                .iter()
                .filter(|(_, contract)| contract.symbol == symbol)
                .count()
        }
    };
    let xyz_attempts = attempts("XYZ");
    eventually(|| {
        let n = xyz_attempts();
        async move { n >= 2 }
    })
    .await;

    assert_eq!(test.session.state(), ConnectionState::Connected);
    assert_eq!(attempts("AAPL")(), 1);
    assert_eq!(test.session.bridge().subscription_count(), 1);
    let trades = test.journal.trades().await.unwrap();
    assert!(!trades[0].ticker_data_requested);
    assert!(trades[1].ticker_data_requested);

    test.session.disconnect().await;
}

#[tokio::test]
async fn test_connect_reconciles_broker_positions() {
    let connector = MockConnector::new().with_positions(vec![
        BrokerPosition {
            contract_id: Some(ContractId(1)),
            key: put_key("150"),
            quantity: -2,
            average_cost: d("60"),
        },
        BrokerPosition {
            contract_id: Some(ContractId(2)),
            key: put_key("145"),
            quantity: 1,
            average_cost: d("40"),
        },
    ]);
    let test = setup_session(connector, MockQuoteSource::new());
    assert!(test.session.last_report().is_none());
    test.session.connect().await.unwrap();

    let session = test.session.clone();
    eventually(|| {
        let session = session.clone();
        async move { session.last_report().is_some() }
    })
    .await;
    let report = test.session.last_report().unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.matched.len(), 1);
    assert_eq!(report.broker_only.len(), 1);
    assert_eq!(report.broker_only[0].local_quantity, 2);
    assert_eq!(report.broker_only[0].broker_quantity, 1);

    test.session.disconnect().await;
}

#[tokio::test]
async fn test_dropped_connection_recovers_and_resubscribes() {
    let test = setup_session(MockConnector::new(), MockQuoteSource::new());
    test.session.connect().await.unwrap();
    let first = subscribed_gateway(&test).await;

    first.drop_connection();
    let mut state = test.session.watch_state();
    tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(test.session.bridge().client().is_none());
    assert_eq!(test.session.bridge().subscription_count(), 0);

    test.session.connect().await.unwrap();
    assert_eq!(test.connector.connections(), 2);
    let second = subscribed_gateway(&test).await;
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.subscriptions().len(), 1);

    test.session.disconnect().await;
    assert_eq!(test.session.state(), ConnectionState::Disconnected);
}
