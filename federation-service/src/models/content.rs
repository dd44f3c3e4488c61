use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sync::{Collection, StoreDocument};

/// Kind of document a content item hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParentType {
    Chat,
    ChatGroup,
    Book,
    Question,
}

impl ParentType {
    pub fn collection(&self) -> Collection {
        match self {
            ParentType::Chat => Collection::Chats,
            ParentType::ChatGroup => Collection::ChatGroups,
            ParentType::Book => Collection::Books,
            ParentType::Question => Collection::Questions,
        }
    }
}

/// A piece of rich content attached to one or more parent documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentDocument {
    pub id: String,
    /// Parent ids this content is attached to.
    pub parents: Vec<String>,
    pub creator: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentDocument {
    pub fn has_parent(&self, parent_id: &str) -> bool {
        self.parents.iter().any(|p| p == parent_id)
    }
}

impl StoreDocument for ContentDocument {
    const COLLECTION: Collection = Collection::Contents;

    fn doc_id(&self) -> &str {
        &self.id
    }

    fn doc_tenant(&self) -> Option<String> {
        self.tenant_id.clone()
    }

    fn updated_at_ms(&self) -> i64 {
        self.updated_at.timestamp_millis()
    }
}
