use serde::Deserialize;
use validator::Validate;

use crate::models::{TenantMode, TenantService};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTenantRequest {
    #[validate(length(min = 2, max = 16))]
    pub code: String,
    #[validate(length(min = 1))]
    pub name: String,
    pub mode: TenantMode,
    #[serde(default)]
    pub services: Vec<TenantService>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTenantRequest {
    pub name: Option<String>,
    pub mode: Option<TenantMode>,
    pub services: Option<Vec<TenantService>>,
    pub admins: Option<Vec<String>>,
    /// The `updatedAt` (ms) the caller read; stale writes conflict.
    pub updated_at: i64,
}
