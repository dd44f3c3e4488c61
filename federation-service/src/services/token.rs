use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ParentType;

use super::error::ServiceError;

/// Milliseconds shaved off every advertised expiry so a client acting right
/// at the deadline never presents a token the server already rejects.
pub const EXPIRY_SHAVE_MS: i64 = 5_000;

/// Signs and verifies every token the service issues (HS256, shared secret).
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessClaims {
    pub sub: String,
    pub name: String,
    pub roles: Vec<String>,
    pub tenants: Vec<String>,
    /// The administrator behind this session, when impersonating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_user_id: Option<String>,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl AccessClaims {
    pub fn is_impersonated(&self) -> bool {
        self.auth_user_id.is_some()
    }
}

/// Claims carried by a refresh token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Single-use tokens minted for a specific purpose, bound to one subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenPurpose {
    Login,
    PasswordReset,
    Satellite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurposeClaims {
    pub purpose: TokenPurpose,
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims of a contents capability token: access to the children of one
/// parent document, frozen at the parent's version at issue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityClaims {
    pub parent_type: ParentType,
    pub parent_id: String,
    /// The parent's `updatedAt` (ms) when the token was issued.
    pub content_version: i64,
    pub iat: i64,
    pub exp: i64,
}

impl TokenCodec {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, ServiceError> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("failed to sign token: {e}")))
    }

    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T, ServiceError> {
        decode::<T>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => ServiceError::TokenExpired,
                _ => ServiceError::TokenInvalid,
            })
    }

    /// Verify a purpose-tagged token and check it was minted for `purpose`.
    pub fn verify_purpose(
        &self,
        token: &str,
        purpose: TokenPurpose,
    ) -> Result<PurposeClaims, ServiceError> {
        let claims: PurposeClaims = self.verify(token)?;
        if claims.purpose != purpose {
            return Err(ServiceError::TokenInvalid);
        }
        Ok(claims)
    }

    pub fn sign_purpose(
        &self,
        purpose: TokenPurpose,
        subject: &str,
        ttl: Duration,
    ) -> Result<String, ServiceError> {
        let now = Utc::now();
        self.sign(&PurposeClaims {
            purpose,
            sub: subject.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        })
    }
}

/// Advertised expiry companion: epoch milliseconds, shaved for clock safety.
pub fn expire_at_ms(exp_secs: i64) -> i64 {
    exp_secs * 1000 - EXPIRY_SHAVE_MS
}
