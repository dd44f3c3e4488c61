use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;

use crate::dtos::tenant::{CreateTenantRequest, UpdateTenantRequest};
use crate::middleware::AuthUser;
use crate::models::user::ROLE_ROOT;
use crate::models::Tenant;
use crate::services::{AccessClaims, TenantUpdate};
use crate::utils::ValidatedJson;
use crate::AppState;

fn is_root(claims: &AccessClaims) -> bool {
    claims.roles.iter().any(|r| r == ROLE_ROOT)
}

fn require_root(claims: &AccessClaims) -> Result<(), AppError> {
    if is_root(claims) {
        return Ok(());
    }
    Err(AppError::Forbidden(anyhow::anyhow!("root role required")))
}

/// `GET /api/tenants` — root sees every tenant, others their own.
pub async fn list(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<Vec<Tenant>>, AppError> {
    let mut tenants = state.registry.list().await;
    if !is_root(&claims) {
        tenants.retain(|t| claims.tenants.contains(&t.id));
    }
    Ok(Json(tenants))
}

/// `GET /api/tenants/:id`
pub async fn get(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(tenant_id): Path<String>,
) -> Result<Json<Tenant>, AppError> {
    let tenant = state.registry.find(&tenant_id).await?;
    if !is_root(&claims) && !claims.tenants.contains(&tenant.id) {
        return Err(AppError::NotFound(anyhow::anyhow!("tenant not found")));
    }
    Ok(Json(tenant))
}

/// `POST /api/tenants` — root only.
pub async fn create(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ValidatedJson(req): ValidatedJson<CreateTenantRequest>,
) -> Result<Json<Tenant>, AppError> {
    require_root(&claims)?;
    let tenant = state
        .registry
        .create(&req.code, &req.name, req.mode, req.services)
        .await?;
    Ok(Json(tenant))
}

/// `PATCH /api/tenants/:id` — root or a tenant admin.
pub async fn update(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(tenant_id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateTenantRequest>,
) -> Result<Json<Tenant>, AppError> {
    let tenant = state.registry.find(&tenant_id).await?;
    if !is_root(&claims) && !tenant.is_admin(&claims.sub) {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "tenant admin role required"
        )));
    }

    let updated = state
        .registry
        .update(
            &tenant_id,
            TenantUpdate {
                name: req.name,
                mode: req.mode,
                services: req.services,
                admins: req.admins,
            },
            req.updated_at,
        )
        .await?;
    Ok(Json(updated))
}

/// `DELETE /api/tenants/:id` — root only.
pub async fn delete(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(tenant_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_root(&claims)?;
    state.registry.delete(&tenant_id).await?;
    Ok(Json(serde_json::json!({ "code": "COMPLETED" })))
}
