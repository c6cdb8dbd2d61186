pub mod connection;
pub mod health;
pub mod reconciliation;
pub mod trades;

use crate::journal::JournalHandle;
use crate::market::Session;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub journal: JournalHandle,
    pub session: Arc<Session>,
}

impl AppState {
    pub fn new(journal: JournalHandle, session: Arc<Session>) -> Self {
        Self { journal, session }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/trades", get(trades::get_trades))
        .route("/v1/connection", get(connection::get_connection))
        .route("/v1/connection/connect", post(connection::post_connect))
        .route("/v1/connection/disconnect", post(connection::post_disconnect))
        .route(
            "/v1/reconciliation",
            get(reconciliation::get_reconciliation).post(reconciliation::post_reconciliation),
        )
        .layer(cors)
        .with_state(state)
}
