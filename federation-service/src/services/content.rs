use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::models::{Collection, ContentDocument, ParentType};

use super::error::ServiceError;
use super::repository::DocumentStore;
use super::token::{CapabilityClaims, TokenCodec};

/// Result of a token-gated content fetch.
#[derive(Debug)]
pub enum ContentFetch {
    /// The document exists but is not newer than the client's copy.
    Unchanged,
    Document(Box<ContentDocument>),
}

/// Issues and honors content capability tokens: short-lived proof that the
/// holder could read a parent document at a particular version.
#[derive(Clone)]
pub struct ContentAccessBroker {
    docs: Arc<DocumentStore>,
    codec: TokenCodec,
    ttl: Duration,
}

impl ContentAccessBroker {
    pub fn new(docs: Arc<DocumentStore>, codec: TokenCodec, ttl: Duration) -> Self {
        Self { docs, codec, ttl }
    }

    /// Sign a capability for one parent. The requester must be able to see
    /// the parent: when the parent document carries a `users` list, the
    /// requester has to be on it.
    pub async fn issue(
        &self,
        parent_type: ParentType,
        parent_id: &str,
        requester_id: &str,
    ) -> Result<String, ServiceError> {
        let parent = self
            .docs
            .get(parent_type.collection(), parent_id)
            .await
            .ok_or(ServiceError::NotFound("parent"))?;

        if let Some(users) = parent.body.get("users").and_then(|u| u.as_array()) {
            let member = users
                .iter()
                .filter_map(|u| u.as_str())
                .any(|u| u == requester_id);
            if !member {
                return Err(ServiceError::Forbidden);
            }
        }

        let now = Utc::now();
        self.codec.sign(&CapabilityClaims {
            parent_type,
            parent_id: parent_id.to_string(),
            content_version: parent.updated_at,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        })
    }

    /// Fetch a content document under a capability token.
    ///
    /// The content must hang off the parent named in the token. With
    /// `update_after` set, a document not newer than that instant comes
    /// back as `Unchanged`.
    pub async fn fetch(
        &self,
        content_id: &str,
        token: &str,
        update_after: Option<i64>,
    ) -> Result<ContentFetch, ServiceError> {
        let claims: CapabilityClaims = self.codec.verify(token)?;

        let content = self
            .docs
            .get_as::<ContentDocument>(Collection::Contents, content_id)
            .await?
            .ok_or(ServiceError::NotFound("content"))?;

        if !content.has_parent(&claims.parent_id) {
            return Err(ServiceError::TokenParentMismatch);
        }

        if let Some(after) = update_after {
            if content.updated_at.timestamp_millis() <= after {
                return Ok(ContentFetch::Unchanged);
            }
        }

        Ok(ContentFetch::Document(Box::new(content)))
    }
}
