use optjournal::journal::{load_journal, spawn_journal_service, Journal};
use optjournal::market::OfflineConnector;
use optjournal::{api, config::Config, HttpQuoteSource, MarketDataBridge, QuoteSource, Session};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // A bad header is fatal; record-level damage only flags trades.
    let trades = match load_journal(&config.journal_path) {
        Ok(trades) => trades,
        Err(e) => {
            eprintln!("Failed to load journal {}: {}", config.journal_path.display(), e);
            std::process::exit(1);
        }
    };
    let flagged = trades.iter().filter(|t| t.needs_attention).count();
    if flagged > 0 {
        tracing::warn!(flagged, "Trades need attention after load");
    }

    let (journal, _journal_task) =
        spawn_journal_service(Journal::new(trades), Some(config.journal_path.clone()));

    let quotes: Arc<dyn QuoteSource> = Arc::new(HttpQuoteSource::new(config.quote_fallback_url.clone()));
    let bridge = Arc::new(MarketDataBridge::new(journal.clone(), quotes));
    let session = Session::new(
        Arc::new(OfflineConnector::new(config.gateway.clone())),
        bridge.clone(),
        journal.clone(),
        config.session_config(),
    );

    if config.auto_connect {
        if let Err(e) = session.connect().await {
            tracing::warn!(error = %e, "Auto-connect failed, continuing offline");
        }
    }
    if !session.bridge().is_connected() {
        match journal.pending_subscriptions().await {
            Ok(pending) => {
                let primed = bridge.prime_previous_closes(&pending).await;
                tracing::info!(primed, "Offline prices primed from previous close");
            }
            Err(e) => tracing::warn!(error = %e, "Cannot prime offline prices"),
        }
    }

    // Create router
    let app = api::create_router(api::AppState::new(journal.clone(), session.clone()));

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }

    session.disconnect().await;
    match journal.save().await {
        Ok(true) => tracing::info!("Journal saved on shutdown"),
        Ok(false) => {}
        Err(e) => {
            eprintln!("Failed to save journal: {}", e);
            std::process::exit(1);
        }
    }
}
