use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;

use crate::dtos::content::{
    ContentFetchQuery, ContentTokenQuery, ContentTokenResponse, UnchangedResponse,
};
use crate::middleware::AuthUser;
use crate::services::ContentFetch;
use crate::AppState;

/// `GET /api/contents/token?parentType=&parentId=`
pub async fn issue_token(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Query(query): Query<ContentTokenQuery>,
) -> Result<Json<ContentTokenResponse>, AppError> {
    let contents_token = state
        .broker
        .issue(query.parent_type, &query.parent_id, &claims.sub)
        .await?;
    Ok(Json(ContentTokenResponse { contents_token }))
}

/// `GET /api/contents/:id?token=&updateAfter=`
///
/// The capability token is the authorization; no bearer header needed.
pub async fn fetch(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
    Query(query): Query<ContentFetchQuery>,
) -> Result<Response, AppError> {
    match state
        .broker
        .fetch(&content_id, &query.token, query.update_after)
        .await?
    {
        ContentFetch::Unchanged => {
            Ok(Json(UnchangedResponse { unchanged: true }).into_response())
        }
        ContentFetch::Document(doc) => Ok(Json(*doc).into_response()),
    }
}
