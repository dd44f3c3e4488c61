use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The replicated collections. `rank` defines apply order for sync bundles:
/// documents referenced by other documents must land first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Tenants,
    Users,
    Classrooms,
    ChatGroups,
    Books,
    Questions,
    Chats,
    Contents,
}

impl Collection {
    pub fn rank(&self) -> u8 {
        match self {
            Collection::Tenants | Collection::Users => 0,
            Collection::Classrooms
            | Collection::ChatGroups
            | Collection::Books
            | Collection::Questions => 1,
            Collection::Chats | Collection::Contents => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Tenants => "tenants",
            Collection::Users => "users",
            Collection::Classrooms => "classrooms",
            Collection::ChatGroups => "chatGroups",
            Collection::Books => "books",
            Collection::Questions => "questions",
            Collection::Chats => "chats",
            Collection::Contents => "contents",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One replicated document as it travels in a sync bundle and as it is kept
/// in the document store. `updated_at` is epoch milliseconds and doubles as
/// the conflict and cursor ordinal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub collection: Collection,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub updated_at: i64,
    pub body: Value,
}

/// Implemented by every model that lives in the document store.
pub trait StoreDocument: Serialize {
    const COLLECTION: Collection;

    fn doc_id(&self) -> &str;
    fn doc_tenant(&self) -> Option<String>;
    fn updated_at_ms(&self) -> i64;

    fn to_record(&self) -> Result<SyncRecord, serde_json::Error> {
        Ok(SyncRecord {
            collection: Self::COLLECTION,
            id: self.doc_id().to_string(),
            tenant_id: self.doc_tenant(),
            updated_at: self.updated_at_ms(),
            body: serde_json::to_value(self)?,
        })
    }
}
