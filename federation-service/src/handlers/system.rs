use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use service_core::error::AppError;

use crate::config::DeploymentMode;
use crate::AppState;

/// `GET /api/systems/:action`
pub async fn get_handler(
    State(state): State<AppState>,
    Path(action): Path<String>,
) -> Result<Response, AppError> {
    match action.as_str() {
        "health" => {
            let mode = match state.config.mode {
                DeploymentMode::Hub => "hub",
                DeploymentMode::Satellite { .. } => "satellite",
            };
            Ok(Json(serde_json::json!({
                "status": "healthy",
                "service": state.config.service_name,
                "version": state.config.service_version,
                "mode": mode,
                "timestamp": Utc::now().to_rfc3339(),
            }))
            .into_response())
        }
        "version" => Ok(Json(serde_json::json!({
            "service": state.config.service_name,
            "version": state.config.service_version,
        }))
        .into_response()),
        "ping" => Ok("pong".into_response()),
        _ => Err(AppError::NotFound(anyhow::anyhow!(
            "unknown system action: {action}"
        ))),
    }
}
