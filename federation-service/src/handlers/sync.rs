use axum::{
    extract::State,
    http::{header, HeaderMap},
    Json,
};
use service_core::error::AppError;

use crate::models::SatelliteStatus;
use crate::services::{ExchangeResponse, ExportBundle, PatchBundle, ServiceError};
use crate::AppState;

/// Sync callers authenticate with the satellite tenant token, not a user
/// access token.
fn tenant_from_headers(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;
    Ok(state.sessions.authenticate_tenant(token)?)
}

/// `POST /api/sync` — initial snapshot for a registering satellite.
pub async fn export(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ExportBundle>, AppError> {
    let tenant_id = tenant_from_headers(&state, &headers)?;
    let bundle = state.sync.export_for_tenant(&tenant_id).await?;
    state
        .registry
        .record_satellite_status(&tenant_id, SatelliteStatus::Initializing)
        .await?;
    Ok(Json(bundle))
}

/// `PATCH /api/sync` — bidirectional exchange.
pub async fn exchange(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(bundle): Json<PatchBundle>,
) -> Result<Json<ExchangeResponse>, AppError> {
    let tenant_id = tenant_from_headers(&state, &headers)?;
    match state.sync.apply_and_diff(&tenant_id, bundle).await {
        Ok(response) => {
            // A completed exchange proves the satellite is live.
            if let Err(e) = state
                .registry
                .record_satellite_status(&tenant_id, SatelliteStatus::Ready)
                .await
            {
                tracing::warn!(tenant_id, error = %e, "could not record satellite status");
            }
            Ok(Json(response))
        }
        Err(e) => {
            if let Some(status) = failure_status(&e) {
                if let Err(status_err) = state
                    .registry
                    .record_satellite_status(&tenant_id, status)
                    .await
                {
                    tracing::debug!(tenant_id, error = %status_err, "could not record satellite status");
                }
            }
            Err(e.into())
        }
    }
}

/// Losing the per-tenant lease race to a concurrent exchange says nothing
/// about the satellite's health; every other failure does.
fn failure_status(err: &ServiceError) -> Option<SatelliteStatus> {
    match err {
        ServiceError::SyncInProgress => None,
        _ => Some(SatelliteStatus::InitFail),
    }
}
