use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sync::{Collection, StoreDocument};

/// Where a tenant's traffic is served from. Satellite tenants carry the URL
/// of their self-hosted deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TenantMode {
    Hub,
    Satellite { url: String },
}

impl TenantMode {
    pub fn is_satellite(&self) -> bool {
        matches!(self, TenantMode::Satellite { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SatelliteStatus {
    Initializing,
    Ready,
    InitFail,
}

/// Feature set a tenant has enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TenantService {
    AuthService,
    ChatGroup,
    Classroom,
    Question,
    QuestionBid,
    Tutor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: String,
    /// Unique, stored upper-case.
    pub code: String,
    pub name: String,
    pub mode: TenantMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satellite_status: Option<SatelliteStatus>,
    #[serde(default)]
    pub services: Vec<TenantService>,
    #[serde(default)]
    pub admins: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Tenant {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn has_service(&self, service: TenantService) -> bool {
        self.services.contains(&service)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.iter().any(|a| a == user_id)
    }
}

impl StoreDocument for Tenant {
    const COLLECTION: Collection = Collection::Tenants;

    fn doc_id(&self) -> &str {
        &self.id
    }

    fn doc_tenant(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn updated_at_ms(&self) -> i64 {
        self.updated_at.timestamp_millis()
    }
}
