mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{login, request, seed_user, test_app, test_config};

#[tokio::test]
async fn login_conflict_and_force() {
    let app = test_app(test_config(2, false));
    seed_user(&app.state, "u1", "alice@example.com", "password-1", &[]).await;

    login(&app.router, "alice@example.com", "password-1").await;
    login(&app.router, "alice@example.com", "password-1").await;

    // Third login returns a success-shaped conflict descriptor.
    let (status, body) = request(
        &app.router,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "alice@example.com", "password": "password-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conflict"]["maxLogin"], 2);
    assert_eq!(body["conflict"]["exceedLogin"], 1);
    assert!(body.get("accessToken").is_none());

    // Forcing evicts the oldest session and succeeds.
    let (status, body) = request(
        &app.router,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({
            "email": "alice@example.com",
            "password": "password-1",
            "force": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["accessToken"].is_string());
    assert!(body["accessTokenExpireAt"].is_i64());
    assert_eq!(body["user"]["id"], "u1");
    assert!(body["user"].get("passwordHash").is_none());
}

#[tokio::test]
async fn bad_credentials_are_unauthorized() {
    let app = test_app(test_config(3, false));
    seed_user(&app.state, "u1", "alice@example.com", "password-1", &[]).await;

    let (status, body) = request(
        &app.router,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "alice@example.com", "password": "wrong" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTH_CREDENTIALS_ERROR");

    let (status, body) = request(
        &app.router,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "nobody@example.com", "password": "wrong" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTH_CREDENTIALS_ERROR");
}

#[tokio::test]
async fn renew_rotates_and_replay_is_revoked() {
    let app = test_app(test_config(3, false));
    seed_user(&app.state, "u1", "alice@example.com", "password-1", &[]).await;
    let (_, refresh) = login(&app.router, "alice@example.com", "password-1").await;

    let (status, body) = request(
        &app.router,
        "POST",
        "/api/auth/renewToken",
        None,
        Some(json!({ "refreshToken": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let rotated = body["refreshToken"].as_str().unwrap().to_string();
    assert_ne!(rotated, refresh);

    // Replaying the consumed token fails with the stable revocation code.
    let (status, body) = request(
        &app.router,
        "POST",
        "/api/auth/renewToken",
        None,
        Some(json!({ "refreshToken": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "TOKEN_REVOKED");

    // The rotated token still renews.
    let (status, _) = request(
        &app.router,
        "POST",
        "/api/auth/renewToken",
        None,
        Some(json!({ "refreshToken": rotated })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn logout_and_list_tokens() {
    let app = test_app(test_config(3, false));
    seed_user(&app.state, "u1", "alice@example.com", "password-1", &[]).await;
    let (access_a, refresh_a) = login(&app.router, "alice@example.com", "password-1").await;
    let (_, _refresh_b) = login(&app.router, "alice@example.com", "password-1").await;

    let (status, body) = request(
        &app.router,
        "GET",
        "/api/auth/listTokens",
        Some(&access_a),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(2));

    let (status, _) = request(
        &app.router,
        "POST",
        "/api/auth/logout",
        Some(&access_a),
        Some(json!({ "refreshToken": refresh_a })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(
        &app.router,
        "GET",
        "/api/auth/listTokens",
        Some(&access_a),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    // Unauthenticated listTokens is refused.
    let (status, _) = request(&app.router, "GET", "/api/auth/listTokens", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn impersonation_over_the_wire() {
    let app = test_app(test_config(2, false));
    seed_user(&app.state, "u1", "alice@example.com", "password-1", &[]).await;
    seed_user(&app.state, "a1", "admin@example.com", "password-2", &["ADMIN"]).await;
    let (admin_access, _) = login(&app.router, "admin@example.com", "password-2").await;

    let (status, body) = request(
        &app.router,
        "POST",
        "/api/auth/impersonateStart",
        Some(&admin_access),
        Some(json!({ "userId": "u1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["user"]["id"], "u1");
    let ghost_access = body["accessToken"].as_str().unwrap().to_string();
    let ghost_refresh = body["refreshToken"].as_str().unwrap().to_string();

    // The ghost session is excluded from u1's maxLogin accounting.
    login(&app.router, "alice@example.com", "password-1").await;
    login(&app.router, "alice@example.com", "password-1").await;

    // Stop requires the impersonated caller, not the admin.
    let (status, _) = request(
        &app.router,
        "POST",
        "/api/auth/impersonateStop",
        Some(&admin_access),
        Some(json!({ "refreshToken": ghost_refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(
        &app.router,
        "POST",
        "/api/auth/impersonateStop",
        Some(&ghost_access),
        Some(json!({ "refreshToken": ghost_refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn password_change_revokes_other_sessions() {
    let app = test_app(test_config(3, false));
    seed_user(&app.state, "u1", "alice@example.com", "password-1", &[]).await;
    let (access_a, refresh_a) = login(&app.router, "alice@example.com", "password-1").await;
    let (_, refresh_b) = login(&app.router, "alice@example.com", "password-1").await;

    let (status, body) = request(
        &app.router,
        "PATCH",
        "/api/auth/passwordChange",
        Some(&access_a),
        Some(json!({
            "currentPassword": "password-1",
            "newPassword": "password-next",
            "refreshToken": refresh_a
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["revoked"], 1);

    // The other session's refresh token is gone.
    let (status, body) = request(
        &app.router,
        "POST",
        "/api/auth/renewToken",
        None,
        Some(json!({ "refreshToken": refresh_b })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "TOKEN_REVOKED");

    login(&app.router, "alice@example.com", "password-next").await;
}

#[tokio::test]
async fn validation_errors_are_rejected_before_side_effects() {
    let app = test_app(test_config(3, false));

    let (status, body) = request(
        &app.router,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "not-an-email", "password": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "USER_INPUT_ERROR");

    let (status, _) = request(
        &app.router,
        "POST",
        "/api/auth/noSuchAction",
        None,
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
