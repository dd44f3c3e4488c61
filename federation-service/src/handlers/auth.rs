use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use service_core::error::AppError;
use std::collections::HashMap;
use validator::Validate;

use crate::dtos::auth::{
    DeregisterRequest, ImpersonateStartRequest, LoginRequest, PasswordChangeRequest,
    PasswordResetConfirm, PasswordResetRequest, RefreshTokenRequest, RenewTokenRequest,
    RevokedResponse, StatusResponse, StudentIdLoginRequest, TokenLoginRequest,
};
use crate::middleware::MaybeUser;
use crate::models::session::DeviceInfo;
use crate::models::user::ROLE_ROOT;
use crate::services::{AccessClaims, LoginOptions};
use crate::AppState;

fn parse<T>(body: &Value) -> Result<T, AppError>
where
    T: DeserializeOwned + Validate,
{
    let req: T = serde_json::from_value(body.clone())
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Json parse error: {e}")))?;
    req.validate()?;
    Ok(req)
}

fn require(user: MaybeUser) -> Result<AccessClaims, AppError> {
    user.0
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Authentication required")))
}

fn param<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str, AppError> {
    params
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("missing query parameter: {key}")))
}

/// `POST /api/auth/:action`
pub async fn post_handler(
    State(state): State<AppState>,
    Path(action): Path<String>,
    device: DeviceInfo,
    user: MaybeUser,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    match action.as_str() {
        "login" => {
            let req: LoginRequest = parse(&body)?;
            let outcome = state
                .sessions
                .login(
                    &req.email,
                    &req.password,
                    LoginOptions {
                        force: req.force,
                        is_public: req.is_public,
                    },
                    &device,
                )
                .await?;
            Ok(Json(outcome).into_response())
        }
        "loginWithStudentId" => {
            let req: StudentIdLoginRequest = parse(&body)?;
            let outcome = state
                .sessions
                .login_with_student_id(
                    &req.tenant_id,
                    &req.student_id,
                    &req.password,
                    LoginOptions {
                        force: req.force,
                        is_public: req.is_public,
                    },
                    &device,
                )
                .await?;
            Ok(Json(outcome).into_response())
        }
        "loginWithToken" => {
            let req: TokenLoginRequest = parse(&body)?;
            let outcome = state.sessions.login_with_token(&req.token, &device).await?;
            Ok(Json(outcome).into_response())
        }
        "renewToken" => {
            let req: RenewTokenRequest = parse(&body)?;
            let pair = state
                .sessions
                .renew_token(&req.refresh_token, req.is_public, &device)
                .await?;
            Ok(Json(pair).into_response())
        }
        "logout" => {
            let claims = require(user)?;
            let req: RefreshTokenRequest = parse(&body)?;
            state.sessions.logout(&claims.sub, &req.refresh_token).await?;
            Ok(Json(StatusResponse::completed()).into_response())
        }
        "logoutOthers" => {
            let claims = require(user)?;
            let req: RefreshTokenRequest = parse(&body)?;
            let revoked = state
                .sessions
                .logout_others(&claims.sub, &req.refresh_token)
                .await?;
            Ok(Json(RevokedResponse {
                code: "COMPLETED",
                revoked,
            })
            .into_response())
        }
        "impersonateStart" => {
            let claims = require(user)?;
            let req: ImpersonateStartRequest = parse(&body)?;
            let auth = state
                .sessions
                .impersonate_start(&claims, &req.user_id, &device)
                .await?;
            Ok(Json(auth).into_response())
        }
        "impersonateStop" => {
            let claims = require(user)?;
            let req: RefreshTokenRequest = parse(&body)?;
            state
                .sessions
                .impersonate_stop(&claims, &req.refresh_token)
                .await?;
            Ok(Json(StatusResponse::completed()).into_response())
        }
        "deregister" => {
            let claims = require(user)?;
            let req: DeregisterRequest = parse(&body)?;
            state.sessions.deregister(&claims, &req.password).await?;
            Ok(Json(StatusResponse::completed()).into_response())
        }
        "passwordResetRequest" => {
            let req: PasswordResetRequest = parse(&body)?;
            state.sessions.password_reset_request(&req.email).await?;
            Ok(Json(StatusResponse::completed()).into_response())
        }
        _ => Err(AppError::NotFound(anyhow::anyhow!(
            "unknown auth action: {action}"
        ))),
    }
}

/// `GET /api/auth/:action`
pub async fn get_handler(
    State(state): State<AppState>,
    Path(action): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    user: MaybeUser,
) -> Result<Response, AppError> {
    match action.as_str() {
        "listTokens" => {
            let claims = require(user)?;
            let sessions = state.sessions.list_tokens(&claims.sub).await?;
            Ok(Json(sessions).into_response())
        }
        "loginToken" => {
            let claims = require(user)?;
            let tenant_id = param(&params, "tenantId")?;
            let user_id = param(&params, "userId")?;
            let issued = state
                .sessions
                .issue_login_token(&claims, tenant_id, user_id)
                .await?;
            Ok(Json(issued).into_response())
        }
        "tenantToken" => {
            let claims = require(user)?;
            if !claims.roles.iter().any(|r| r == ROLE_ROOT) {
                return Err(AppError::Forbidden(anyhow::anyhow!(
                    "root role required"
                )));
            }
            let tenant_id = param(&params, "tenantId")?;
            let issued = state.sessions.issue_tenant_token(tenant_id).await?;
            Ok(Json(issued).into_response())
        }
        _ => Err(AppError::NotFound(anyhow::anyhow!(
            "unknown auth action: {action}"
        ))),
    }
}

/// `PATCH /api/auth/:action`
pub async fn patch_handler(
    State(state): State<AppState>,
    Path(action): Path<String>,
    user: MaybeUser,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    match action.as_str() {
        "passwordChange" => {
            let claims = require(user)?;
            let req: PasswordChangeRequest = parse(&body)?;
            let revoked = state
                .sessions
                .password_change(
                    &claims.sub,
                    &req.current_password,
                    &req.new_password,
                    &req.refresh_token,
                )
                .await?;
            Ok(Json(RevokedResponse {
                code: "COMPLETED",
                revoked,
            })
            .into_response())
        }
        "passwordResetConfirm" => {
            let req: PasswordResetConfirm = parse(&body)?;
            state
                .sessions
                .password_reset_confirm(&req.token, &req.password)
                .await?;
            Ok(Json(StatusResponse::completed()).into_response())
        }
        _ => Err(AppError::NotFound(anyhow::anyhow!(
            "unknown auth action: {action}"
        ))),
    }
}
