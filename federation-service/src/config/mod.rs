use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub mode: DeploymentMode,
    pub jwt: JwtConfig,
    pub auth: AuthPolicyConfig,
    pub sync: SyncConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// How this process is deployed. A hub serves every tenant and answers
/// satellite sync exchanges; a satellite serves one tenant and drives
/// exchanges against the configured hub.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DeploymentMode {
    Hub,
    Satellite {
        hub_url: String,
        tenant_id: String,
        /// Satellite registration token minted by the hub.
        tenant_token: String,
    },
}

impl DeploymentMode {
    pub fn is_hub(&self) -> bool {
        matches!(self, DeploymentMode::Hub)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthPolicyConfig {
    /// Concurrent active sessions allowed per user.
    pub max_login: usize,
    /// When set, a login from a new IP conflicts with existing sessions.
    pub same_ip_login_only: bool,
    pub impersonation_expiry_minutes: i64,
    pub login_token_expiry_minutes: i64,
    pub password_reset_expiry_minutes: i64,
    pub contents_token_expiry_minutes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    Hub,
    Satellite,
}

impl std::str::FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hub" => Ok(TieBreak::Hub),
            "satellite" => Ok(TieBreak::Satellite),
            other => Err(format!("unknown tie-break policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub max_bundle_records: usize,
    pub interval_seconds: u64,
    /// Who wins when two replicas changed a document at the same millisecond.
    pub tie_break: TieBreak,
    pub tenant_token_expiry_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    /// Mounts the mutating /api/tenants routes when set.
    pub restful_full_access: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl FederationConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let mode = match get_env("DEPLOYMENT_MODE", Some("hub"), is_prod)?
            .to_lowercase()
            .as_str()
        {
            "hub" => DeploymentMode::Hub,
            "satellite" => DeploymentMode::Satellite {
                hub_url: get_env("HUB_URL", None, is_prod)?,
                tenant_id: get_env("TENANT_ID", None, is_prod)?,
                tenant_token: get_env("TENANT_TOKEN", None, is_prod)?,
            },
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "unknown DEPLOYMENT_MODE: {other}"
                )))
            }
        };

        let config = FederationConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("federation-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            mode,
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET", None, is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "20",
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    "30",
                    is_prod,
                )?,
            },
            auth: AuthPolicyConfig {
                max_login: parse_env("AUTH_MAX_LOGIN", "3", is_prod)?,
                same_ip_login_only: get_env("AUTH_SAME_IP_LOGIN_ONLY", Some("false"), is_prod)?
                    .parse()
                    .unwrap_or(false),
                impersonation_expiry_minutes: parse_env(
                    "AUTH_IMPERSONATION_EXPIRY_MINUTES",
                    "20",
                    is_prod,
                )?,
                login_token_expiry_minutes: parse_env(
                    "AUTH_LOGIN_TOKEN_EXPIRY_MINUTES",
                    "5",
                    is_prod,
                )?,
                password_reset_expiry_minutes: parse_env(
                    "AUTH_PASSWORD_RESET_EXPIRY_MINUTES",
                    "30",
                    is_prod,
                )?,
                contents_token_expiry_minutes: parse_env(
                    "AUTH_CONTENTS_TOKEN_EXPIRY_MINUTES",
                    "20",
                    is_prod,
                )?,
            },
            sync: SyncConfig {
                max_bundle_records: parse_env("SYNC_MAX_BUNDLE_RECORDS", "500", is_prod)?,
                interval_seconds: parse_env("SYNC_INTERVAL_SECONDS", "60", is_prod)?,
                tie_break: get_env("SYNC_TIE_BREAK", Some("hub"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                tenant_token_expiry_days: parse_env("SYNC_TENANT_TOKEN_EXPIRY_DAYS", "365", is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
                restful_full_access: get_env("RESTFUL_FULL_ACCESS", Some("false"), is_prod)?
                    .parse()
                    .unwrap_or(false),
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "5", is_prod)?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900", is_prod)?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", "100", is_prod)?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    "60",
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.secret.len() < 16 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must be at least 16 bytes"
            )));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"
            )));
        }

        if self.auth.max_login == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "AUTH_MAX_LOGIN must be greater than 0"
            )));
        }

        if self.sync.max_bundle_records == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SYNC_MAX_BUNDLE_RECORDS must be greater than 0"
            )));
        }

        Ok(())
    }
}

/// Read an environment variable. In prod, missing values without a default
/// are a hard startup error.
fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => match default {
            Some(default) if !is_prod => Ok(default.to_string()),
            Some(default) => {
                tracing::warn!(key, "using default value in prod");
                Ok(default.to_string())
            }
            None => Err(AppError::ConfigError(anyhow::anyhow!(
                "missing required environment variable: {key}"
            ))),
        },
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("invalid value for {key}: {e}"))
        })
}
