use axum::http::StatusCode;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account suspended")]
    AccountSuspended,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Token does not grant access to this parent")]
    TokenParentMismatch,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Stale update: document changed since it was read")]
    WriteConflict,

    #[error("Sync exchange already in progress for this tenant")]
    SyncInProgress,

    #[error("Version mismatch: peer runs {peer}, this node runs {ours}")]
    VersionMismatch { peer: String, ours: String },

    #[error("Operation not available in this deployment mode")]
    DeploymentMode,

    #[error("Operation not permitted")]
    Forbidden,

    #[error("{0}")]
    Validation(String),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Internal(_) => "GENERAL_ERROR",
            ServiceError::InvalidCredentials => "AUTH_CREDENTIALS_ERROR",
            ServiceError::AccountSuspended => "ACCOUNT_SUSPENDED",
            ServiceError::TokenExpired => "TOKEN_EXPIRED",
            ServiceError::TokenRevoked => "TOKEN_REVOKED",
            ServiceError::TokenInvalid => "TOKEN_ERROR",
            ServiceError::TokenParentMismatch => "TOKEN_PARENT_MISMATCH",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::WriteConflict => "WRITE_CONFLICT",
            ServiceError::SyncInProgress => "SYNC_IN_PROGRESS",
            ServiceError::VersionMismatch { .. } => "VERSION_MISMATCH",
            ServiceError::DeploymentMode => "DEPLOYMENT_MODE_ERROR",
            ServiceError::Forbidden => "UNAUTHORIZED_OPERATION",
            ServiceError::Validation(_) => "USER_INPUT_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::InvalidCredentials
            | ServiceError::TokenExpired
            | ServiceError::TokenRevoked
            | ServiceError::TokenInvalid => StatusCode::UNAUTHORIZED,
            ServiceError::AccountSuspended
            | ServiceError::TokenParentMismatch
            | ServiceError::Forbidden => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::WriteConflict | ServiceError::SyncInProgress => StatusCode::CONFLICT,
            ServiceError::VersionMismatch { .. }
            | ServiceError::DeploymentMode
            | ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Internal(e) => AppError::InternalError(e),
            other => AppError::Coded {
                status: other.status(),
                code: other.code(),
                message: other.to_string(),
            },
        }
    }
}
