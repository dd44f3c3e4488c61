use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

use federation_service::config::{
    AuthPolicyConfig, DeploymentMode, Environment, FederationConfig, JwtConfig, RateLimitConfig,
    SecurityConfig, SyncConfig, TieBreak,
};
use federation_service::models::{Tenant, TenantMode, User, UserStatus};
use federation_service::services::{DocumentStore, InMemorySessionStore, TracingNotifier};
use federation_service::utils::password::hash_password;
use federation_service::{build_router, AppState};
use service_core::config::Config;
use service_core::middleware::rate_limit::create_ip_rate_limiter;

pub const JWT_SECRET: &str = "integration-test-secret-0123456789";

pub fn test_config(max_login: usize, restful_full_access: bool) -> FederationConfig {
    FederationConfig {
        common: Config {
            port: 8080,
            host: "127.0.0.1".to_string(),
        },
        environment: Environment::Dev,
        service_name: "federation-service".to_string(),
        service_version: "1.4.2".to_string(),
        log_level: "warn".to_string(),
        mode: DeploymentMode::Hub,
        jwt: JwtConfig {
            secret: JWT_SECRET.to_string(),
            access_token_expiry_minutes: 20,
            refresh_token_expiry_days: 30,
        },
        auth: AuthPolicyConfig {
            max_login,
            same_ip_login_only: false,
            impersonation_expiry_minutes: 20,
            login_token_expiry_minutes: 5,
            password_reset_expiry_minutes: 30,
            contents_token_expiry_minutes: 20,
        },
        sync: SyncConfig {
            max_bundle_records: 500,
            interval_seconds: 60,
            tie_break: TieBreak::Hub,
            tenant_token_expiry_days: 365,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            restful_full_access,
        },
        rate_limit: RateLimitConfig {
            login_attempts: 10_000,
            login_window_seconds: 60,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

pub fn test_app(config: FederationConfig) -> TestApp {
    let docs = Arc::new(DocumentStore::new());
    let state = AppState::build(
        config.clone(),
        docs,
        Arc::new(InMemorySessionStore::new()),
        Arc::new(TracingNotifier),
    );
    let login_limiter = create_ip_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );
    let ip_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );
    TestApp {
        router: build_router(state.clone(), login_limiter, ip_limiter),
        state,
    }
}

pub async fn seed_user(state: &AppState, id: &str, email: &str, password: &str, roles: &[&str]) {
    let now = Utc::now();
    let user = User {
        id: id.to_string(),
        name: format!("User {id}"),
        emails: vec![email.to_string()],
        password_hash: hash_password(password).expect("hash"),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        tenants: vec!["t1".to_string()],
        student_ids: vec![],
        status: UserStatus::Active,
        suspended_until: None,
        created_at: now,
        updated_at: now,
    };
    state.docs.put(&user).await.expect("seed user");
}

pub async fn seed_satellite_tenant(state: &AppState, id: &str, code: &str) -> Tenant {
    let now = Utc::now();
    let tenant = Tenant {
        id: id.to_string(),
        code: code.to_string(),
        name: format!("Tenant {code}"),
        mode: TenantMode::Satellite {
            url: "https://satellite.example.com".to_string(),
        },
        satellite_status: None,
        services: vec![],
        admins: vec![],
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    state.docs.put(&tenant).await.expect("seed tenant");
    tenant
}

pub async fn request(
    router: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).to_string(),
        ))
    };
    (status, json)
}

/// Login over the wire and return (accessToken, refreshToken).
pub async fn login(router: &Router, email: &str, password: &str) -> (String, String) {
    let (status, body) = request(
        router,
        "POST",
        "/api/auth/login",
        None,
        Some(serde_json::json!({ "email": email, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    (
        body["accessToken"].as_str().expect("accessToken").to_string(),
        body["refreshToken"]
            .as_str()
            .expect("refreshToken")
            .to_string(),
    )
}
