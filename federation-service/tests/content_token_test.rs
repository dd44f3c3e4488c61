mod common;

use axum::http::StatusCode;
use chrono::Utc;
use serde_json::json;

use common::{login, request, seed_user, test_app, test_config, TestApp};
use federation_service::models::{Collection, ContentDocument, SyncRecord};

async fn seed_chat(app: &TestApp, id: &str, users: &[&str]) {
    let updated_at = Utc::now().timestamp_millis();
    app.state
        .docs
        .apply_batch(
            &[SyncRecord {
                collection: Collection::Chats,
                id: id.to_string(),
                tenant_id: Some("t1".to_string()),
                updated_at,
                body: json!({ "id": id, "users": users, "updatedAt": updated_at }),
            }],
            false,
        )
        .await;
}

async fn seed_content(app: &TestApp, id: &str, parent: &str) -> ContentDocument {
    let now = Utc::now();
    let content = ContentDocument {
        id: id.to_string(),
        parents: vec![parent.to_string()],
        creator: "u1".to_string(),
        data: "the rich-text payload".to_string(),
        tenant_id: Some("t1".to_string()),
        created_at: now,
        updated_at: now,
    };
    app.state.docs.put(&content).await.expect("seed content");
    content
}

#[tokio::test]
async fn issue_and_fetch_content() {
    let app = test_app(test_config(3, false));
    seed_user(&app.state, "u1", "alice@example.com", "password-1", &[]).await;
    seed_chat(&app, "chat-1", &["u1"]).await;
    seed_content(&app, "doc-1", "chat-1").await;
    let (access, _) = login(&app.router, "alice@example.com", "password-1").await;

    // Issuing requires a signed-in caller.
    let (status, _) = request(
        &app.router,
        "GET",
        "/api/contents/token?parentType=chat&parentId=chat-1",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = request(
        &app.router,
        "GET",
        "/api/contents/token?parentType=chat&parentId=chat-1",
        Some(&access),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let token = body["contentsToken"].as_str().unwrap().to_string();

    // The capability token alone authorizes the fetch.
    let (status, body) = request(
        &app.router,
        "GET",
        &format!("/api/contents/doc-1?token={token}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"], "the rich-text payload");
}

#[tokio::test]
async fn membership_gates_issuance() {
    let app = test_app(test_config(3, false));
    seed_user(&app.state, "u2", "bob@example.com", "password-2", &[]).await;
    seed_chat(&app, "chat-1", &["u1"]).await;
    let (access, _) = login(&app.router, "bob@example.com", "password-2").await;

    let (status, _) = request(
        &app.router,
        "GET",
        "/api/contents/token?parentType=chat&parentId=chat-1",
        Some(&access),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn token_is_bound_to_its_parent() {
    let app = test_app(test_config(3, false));
    seed_user(&app.state, "u1", "alice@example.com", "password-1", &[]).await;
    seed_chat(&app, "chat-1", &["u1"]).await;
    seed_chat(&app, "chat-2", &["u1"]).await;
    seed_content(&app, "doc-2", "chat-2").await;
    let (access, _) = login(&app.router, "alice@example.com", "password-1").await;

    let (_, body) = request(
        &app.router,
        "GET",
        "/api/contents/token?parentType=chat&parentId=chat-1",
        Some(&access),
        None,
    )
    .await;
    let token = body["contentsToken"].as_str().unwrap().to_string();

    let (status, body) = request(
        &app.router,
        "GET",
        &format!("/api/contents/doc-2?token={token}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "TOKEN_PARENT_MISMATCH");
}

#[tokio::test]
async fn update_after_reports_unchanged() {
    let app = test_app(test_config(3, false));
    seed_user(&app.state, "u1", "alice@example.com", "password-1", &[]).await;
    seed_chat(&app, "chat-1", &["u1"]).await;
    let content = seed_content(&app, "doc-1", "chat-1").await;
    let (access, _) = login(&app.router, "alice@example.com", "password-1").await;

    let (_, body) = request(
        &app.router,
        "GET",
        "/api/contents/token?parentType=chat&parentId=chat-1",
        Some(&access),
        None,
    )
    .await;
    let token = body["contentsToken"].as_str().unwrap().to_string();

    let fresh_as_of = content.updated_at.timestamp_millis();
    let (status, body) = request(
        &app.router,
        "GET",
        &format!("/api/contents/doc-1?token={token}&updateAfter={fresh_as_of}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unchanged"], true);

    let stale_as_of = fresh_as_of - 10_000;
    let (status, body) = request(
        &app.router,
        "GET",
        &format!("/api/contents/doc-1?token={token}&updateAfter={stale_as_of}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "the rich-text payload");
}

#[tokio::test]
async fn missing_content_is_not_found() {
    let app = test_app(test_config(3, false));
    seed_user(&app.state, "u1", "alice@example.com", "password-1", &[]).await;
    seed_chat(&app, "chat-1", &["u1"]).await;
    let (access, _) = login(&app.router, "alice@example.com", "password-1").await;

    let (_, body) = request(
        &app.router,
        "GET",
        "/api/contents/token?parentType=chat&parentId=chat-1",
        Some(&access),
        None,
    )
    .await;
    let token = body["contentsToken"].as_str().unwrap().to_string();

    let (status, body) = request(
        &app.router,
        "GET",
        &format!("/api/contents/ghost?token={token}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}
