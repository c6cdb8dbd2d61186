use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::engine::reconcile::ReconcileReport;
use crate::error::AppError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResponse {
    pub clean: bool,
    #[serde(flatten)]
    pub report: ReconcileReport,
}

/// Latest report; 404 until a position list was received and compared.
pub async fn get_reconciliation(
    State(state): State<AppState>,
) -> Result<Json<ReconciliationResponse>, AppError> {
    let report = state
        .session
        .last_report()
        .ok_or_else(|| AppError::NotFound("no reconciliation has run yet".to_string()))?;
    Ok(Json(ReconciliationResponse {
        clean: report.is_clean(),
        report,
    }))
}

/// Ask the gateway for a fresh position list. The report updates when the list ends.
pub async fn post_reconciliation(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    state.session.request_positions().await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"status": "requested"})),
    ))
}
