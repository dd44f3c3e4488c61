use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sync::{Collection, StoreDocument};

pub const ROLE_ROOT: &str = "ROOT";
pub const ROLE_ADMIN: &str = "ADMIN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserStatus {
    Active,
    Deleted,
    System,
}

/// Platform account. A user may belong to several tenants; school-issued
/// identities are kept as `tenantId#studentId` entries in `student_ids`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub emails: Vec<String>,
    #[serde(default)]
    pub password_hash: String,
    pub roles: Vec<String>,
    pub tenants: Vec<String>,
    #[serde(default)]
    pub student_ids: Vec<String>,
    pub status: UserStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn is_root(&self) -> bool {
        self.roles.iter().any(|r| r == ROLE_ROOT)
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ROLE_ADMIN || r == ROLE_ROOT)
    }

    pub fn belongs_to(&self, tenant_id: &str) -> bool {
        self.tenants.iter().any(|t| t == tenant_id)
    }

    /// True while an unexpired suspension is on record.
    pub fn is_suspended(&self, now: DateTime<Utc>) -> bool {
        matches!(self.suspended_until, Some(until) if until > now)
    }

    pub fn has_student_id(&self, tenant_id: &str, student_id: &str) -> bool {
        let key = format!("{tenant_id}#{student_id}");
        self.student_ids.iter().any(|s| s == &key)
    }

    pub fn matches_email(&self, email: &str) -> bool {
        let needle = email.to_lowercase();
        self.emails.iter().any(|e| e.to_lowercase() == needle)
    }

    pub fn sanitize(&self) -> SanitizedUser {
        SanitizedUser {
            id: self.id.clone(),
            name: self.name.clone(),
            emails: self.emails.clone(),
            roles: self.roles.clone(),
            tenants: self.tenants.clone(),
            status: self.status,
        }
    }
}

impl StoreDocument for User {
    const COLLECTION: Collection = Collection::Users;

    fn doc_id(&self) -> &str {
        &self.id
    }

    fn doc_tenant(&self) -> Option<String> {
        self.tenants.first().cloned()
    }

    fn updated_at_ms(&self) -> i64 {
        self.updated_at.timestamp_millis()
    }
}

/// User view safe to return to clients (no password hash).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedUser {
    pub id: String,
    pub name: String,
    pub emails: Vec<String>,
    pub roles: Vec<String>,
    pub tenants: Vec<String>,
    pub status: UserStatus,
}
