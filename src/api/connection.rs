use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;

use super::AppState;
use crate::error::AppError;
use crate::market::ConnectionState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResponse {
    pub state: ConnectionState,
    pub subscriptions: usize,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub account: BTreeMap<String, String>,
}

fn snapshot(state: &AppState) -> ConnectionResponse {
    let bridge = state.session.bridge();
    ConnectionResponse {
        state: state.session.state(),
        subscriptions: bridge.subscription_count(),
        account: bridge.account_values(),
    }
}

pub async fn get_connection(State(state): State<AppState>) -> Json<ConnectionResponse> {
    Json(snapshot(&state))
}

pub async fn post_connect(State(state): State<AppState>) -> Result<Json<ConnectionResponse>, AppError> {
    state.session.connect().await?;
    Ok(Json(snapshot(&state)))
}

pub async fn post_disconnect(State(state): State<AppState>) -> Json<ConnectionResponse> {
    state.session.disconnect().await;
    Json(snapshot(&state))
}
