use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One refresh-token session row in the session registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    /// Fingerprint of the device the session was opened from.
    pub device_key: String,
    pub ip: String,
    pub user_agent: String,
    pub refresh_token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    /// Set when an administrator opened this session on the user's behalf.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impersonated_by: Option<String>,
}

impl Session {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }

    /// Impersonation sessions never count toward the login limit.
    pub fn counts_toward_limit(&self) -> bool {
        self.impersonated_by.is_none()
    }
}

/// Client connection details captured at login time.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub ip: String,
    pub user_agent: String,
    /// Optional client-provided fingerprint mixed into the device key.
    pub client_hash: Option<String>,
}

impl DeviceInfo {
    pub fn device_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.ip.as_bytes());
        hasher.update(b"|");
        hasher.update(self.user_agent.as_bytes());
        if let Some(hash) = &self.client_hash {
            hasher.update(b"|");
            hasher.update(hash.as_bytes());
        }
        hex_lower(&hasher.finalize())
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
