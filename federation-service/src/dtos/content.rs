use serde::{Deserialize, Serialize};

use crate::models::ParentType;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentTokenQuery {
    pub parent_type: ParentType,
    pub parent_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentFetchQuery {
    pub token: String,
    /// Epoch ms; documents not newer than this come back as `unchanged`.
    pub update_after: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentTokenResponse {
    pub contents_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnchangedResponse {
    pub unchanged: bool,
}
