use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::FederationConfig;
use crate::models::session::DeviceInfo;
use crate::models::{Collection, SanitizedUser, Session, Tenant, User, UserStatus};
use crate::utils::password::{hash_password, scrambled_hash, verify_password};

use super::error::ServiceError;
use super::notifier::Notifier;
use super::repository::DocumentStore;
use super::session_store::{AdmitOutcome, AdmitPolicy, RotateOutcome, SessionStore};
use super::token::{
    expire_at_ms, AccessClaims, RefreshClaims, TokenCodec, TokenPurpose,
};

/// Extra refresh lifetime granted to public-terminal sessions beyond the
/// access token, so the client can keep renewing but a stolen token dies
/// quickly.
const PUBLIC_REFRESH_GRACE_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub max_login: usize,
    pub same_ip_only: bool,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub impersonation_ttl: Duration,
    pub login_token_ttl: Duration,
    pub password_reset_ttl: Duration,
    pub tenant_token_ttl: Duration,
}

impl SessionPolicy {
    pub fn from_config(config: &FederationConfig) -> Self {
        Self {
            max_login: config.auth.max_login,
            same_ip_only: config.auth.same_ip_login_only,
            access_ttl: Duration::minutes(config.jwt.access_token_expiry_minutes),
            refresh_ttl: Duration::days(config.jwt.refresh_token_expiry_days),
            impersonation_ttl: Duration::minutes(config.auth.impersonation_expiry_minutes),
            login_token_ttl: Duration::minutes(config.auth.login_token_expiry_minutes),
            password_reset_ttl: Duration::minutes(config.auth.password_reset_expiry_minutes),
            tenant_token_ttl: Duration::days(config.sync.tenant_token_expiry_days),
        }
    }
}

/// Token pair returned to a client. Expiry companions are epoch
/// milliseconds (shaved for clock safety).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub access_token_expire_at: i64,
    pub refresh_token: String,
    pub refresh_token_expire_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSuccess {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: SanitizedUser,
}

/// Login-limit conflict descriptor. This is a successful response shape,
/// not an error: the client resolves it by retrying with `force`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginConflict {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub max_login: usize,
    pub exceed_login: usize,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum LoginOutcome {
    Success(Box<AuthSuccess>),
    Conflict { conflict: LoginConflict },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub ip: String,
    pub user_agent: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub impersonated: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub expire_at: i64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoginOptions {
    pub force: bool,
    pub is_public: bool,
}

struct IssueSpec<'a> {
    device: &'a DeviceInfo,
    is_public: bool,
    /// Overrides both token lifetimes (impersonation sessions).
    ttl_override: Option<Duration>,
    impersonated_by: Option<String>,
}

/// Owns the session lifecycle: login in all its variants, token rotation,
/// revocation, impersonation, and the password flows.
#[derive(Clone)]
pub struct SessionTokenManager {
    docs: Arc<DocumentStore>,
    sessions: Arc<dyn SessionStore>,
    codec: TokenCodec,
    notifier: Arc<dyn Notifier>,
    policy: SessionPolicy,
    hub: bool,
}

impl SessionTokenManager {
    pub fn new(
        docs: Arc<DocumentStore>,
        sessions: Arc<dyn SessionStore>,
        codec: TokenCodec,
        notifier: Arc<dyn Notifier>,
        policy: SessionPolicy,
        hub: bool,
    ) -> Self {
        Self {
            docs,
            sessions,
            codec,
            notifier,
            policy,
            hub,
        }
    }

    async fn load_user(&self, user_id: &str) -> Result<User, ServiceError> {
        self.docs
            .get_as::<User>(Collection::Users, user_id)
            .await?
            .filter(User::is_active)
            .ok_or(ServiceError::NotFound("user"))
    }

    async fn find_user_by_email(&self, email: &str) -> Option<User> {
        self.docs
            .find_map(Collection::Users, |r| {
                serde_json::from_value::<User>(r.body.clone()).ok()
            })
            .await
            .into_iter()
            .find(|u| u.is_active() && u.matches_email(email))
    }

    fn build_pair(
        &self,
        user: &User,
        spec: &IssueSpec<'_>,
    ) -> Result<(TokenPair, Session), ServiceError> {
        let now = Utc::now();
        let access_ttl = spec.ttl_override.unwrap_or(self.policy.access_ttl);
        let refresh_ttl = match spec.ttl_override {
            Some(ttl) => ttl,
            None if spec.is_public => {
                self.policy.access_ttl + Duration::seconds(PUBLIC_REFRESH_GRACE_SECS)
            }
            None => self.policy.refresh_ttl,
        };

        let access_exp = now + access_ttl;
        let refresh_exp = now + refresh_ttl;
        let refresh_jti = Uuid::new_v4().to_string();

        let access_token = self.codec.sign(&AccessClaims {
            sub: user.id.clone(),
            name: user.name.clone(),
            roles: user.roles.clone(),
            tenants: user.tenants.clone(),
            auth_user_id: spec.impersonated_by.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: access_exp.timestamp(),
        })?;
        let refresh_token = self.codec.sign(&RefreshClaims {
            sub: user.id.clone(),
            jti: refresh_jti.clone(),
            iat: now.timestamp(),
            exp: refresh_exp.timestamp(),
        })?;

        let session = Session {
            id: refresh_jti,
            user_id: user.id.clone(),
            device_key: spec.device.device_key(),
            ip: spec.device.ip.clone(),
            user_agent: spec.device.user_agent.clone(),
            refresh_token: refresh_token.clone(),
            issued_at: now,
            expires_at: refresh_exp,
            revoked_at: None,
            impersonated_by: spec.impersonated_by.clone(),
        };

        let pair = TokenPair {
            access_token,
            access_token_expire_at: expire_at_ms(access_exp.timestamp()),
            refresh_token,
            refresh_token_expire_at: expire_at_ms(refresh_exp.timestamp()),
        };

        Ok((pair, session))
    }

    /// Open a session for an already-authenticated user, applying the
    /// login-limit policy.
    async fn open_session(
        &self,
        user: &User,
        device: &DeviceInfo,
        opts: LoginOptions,
    ) -> Result<LoginOutcome, ServiceError> {
        let (pair, session) = self.build_pair(
            user,
            &IssueSpec {
                device,
                is_public: opts.is_public,
                ttl_override: None,
                impersonated_by: None,
            },
        )?;

        let outcome = self
            .sessions
            .admit(
                session,
                AdmitPolicy {
                    max_login: self.policy.max_login,
                    same_ip_only: self.policy.same_ip_only,
                    force: opts.force,
                },
            )
            .await?;

        match outcome {
            AdmitOutcome::Admitted { evicted } => {
                if evicted > 0 {
                    tracing::info!(user_id = %user.id, evicted, "forced login evicted sessions");
                }
                self.notifier
                    .auth_event(&user.id, "login", &device.ip)
                    .await;
                Ok(LoginOutcome::Success(Box::new(AuthSuccess {
                    tokens: pair,
                    user: user.sanitize(),
                })))
            }
            AdmitOutcome::Conflict { ip, exceed_login } => Ok(LoginOutcome::Conflict {
                conflict: LoginConflict {
                    ip,
                    max_login: self.policy.max_login,
                    exceed_login,
                },
            }),
        }
    }

    /// Check the account, then clear a lapsed suspension on the way in.
    async fn gate_account(&self, user: &mut User) -> Result<(), ServiceError> {
        let now = Utc::now();
        if user.is_suspended(now) {
            return Err(ServiceError::AccountSuspended);
        }
        if user.suspended_until.is_some() {
            user.suspended_until = None;
            user.updated_at = now;
            self.docs.put(user).await?;
        }
        Ok(())
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        opts: LoginOptions,
        device: &DeviceInfo,
    ) -> Result<LoginOutcome, ServiceError> {
        let mut user = self
            .find_user_by_email(email)
            .await
            .ok_or(ServiceError::InvalidCredentials)?;
        if !verify_password(password, &user.password_hash) {
            return Err(ServiceError::InvalidCredentials);
        }
        self.gate_account(&mut user).await?;
        self.open_session(&user, device, opts).await
    }

    /// Login with a school-issued identity (`tenantId#studentId`).
    pub async fn login_with_student_id(
        &self,
        tenant_id: &str,
        student_id: &str,
        password: &str,
        opts: LoginOptions,
        device: &DeviceInfo,
    ) -> Result<LoginOutcome, ServiceError> {
        let tenant = self
            .docs
            .get_as::<Tenant>(Collection::Tenants, tenant_id)
            .await?
            .filter(|t| !t.is_deleted())
            .ok_or(ServiceError::NotFound("tenant"))?;

        let mut user = self
            .docs
            .find_map(Collection::Users, |r| {
                serde_json::from_value::<User>(r.body.clone()).ok()
            })
            .await
            .into_iter()
            .find(|u| u.is_active() && u.has_student_id(&tenant.id, student_id))
            .ok_or(ServiceError::InvalidCredentials)?;

        if !verify_password(password, &user.password_hash) {
            return Err(ServiceError::InvalidCredentials);
        }
        self.gate_account(&mut user).await?;
        self.open_session(&user, device, opts).await
    }

    /// Mint a one-time login token for a user of the admin's tenant.
    pub async fn issue_login_token(
        &self,
        caller: &AccessClaims,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<IssuedToken, ServiceError> {
        let tenant = self
            .docs
            .get_as::<Tenant>(Collection::Tenants, tenant_id)
            .await?
            .filter(|t| !t.is_deleted())
            .ok_or(ServiceError::NotFound("tenant"))?;

        let caller_user = self.load_user(&caller.sub).await?;
        if !caller_user.is_root() && !tenant.is_admin(&caller.sub) {
            return Err(ServiceError::Forbidden);
        }

        let target = self.load_user(user_id).await?;
        if !target.belongs_to(&tenant.id) {
            return Err(ServiceError::NotFound("user"));
        }

        let now = Utc::now();
        let token =
            self.codec
                .sign_purpose(TokenPurpose::Login, &target.id, self.policy.login_token_ttl)?;
        Ok(IssuedToken {
            token,
            expire_at: expire_at_ms((now + self.policy.login_token_ttl).timestamp()),
        })
    }

    /// Consume a login token. Always forces: the token holder was vouched
    /// for by a tenant admin.
    pub async fn login_with_token(
        &self,
        token: &str,
        device: &DeviceInfo,
    ) -> Result<LoginOutcome, ServiceError> {
        let claims = self.codec.verify_purpose(token, TokenPurpose::Login)?;
        let mut user = self.load_user(&claims.sub).await?;
        self.gate_account(&mut user).await?;
        self.open_session(
            &user,
            device,
            LoginOptions {
                force: true,
                is_public: true,
            },
        )
        .await
    }

    /// Exchange a refresh token for a fresh pair. The presented token is
    /// revoked in the same critical section, so replay fails.
    pub async fn renew_token(
        &self,
        refresh_token: &str,
        is_public: bool,
        device: &DeviceInfo,
    ) -> Result<TokenPair, ServiceError> {
        let claims: RefreshClaims = self.codec.verify(refresh_token)?;
        let user = self.load_user(&claims.sub).await?;

        let current = self
            .sessions
            .find(&user.id, refresh_token)
            .await?
            .ok_or(ServiceError::TokenRevoked)?;

        let ttl_override = current
            .impersonated_by
            .is_some()
            .then_some(self.policy.impersonation_ttl);
        let (pair, replacement) = self.build_pair(
            &user,
            &IssueSpec {
                device,
                is_public,
                ttl_override,
                impersonated_by: current.impersonated_by.clone(),
            },
        )?;

        match self
            .sessions
            .rotate(&user.id, refresh_token, replacement)
            .await?
        {
            RotateOutcome::Rotated => Ok(pair),
            RotateOutcome::Revoked => Err(ServiceError::TokenRevoked),
            RotateOutcome::Expired => Err(ServiceError::TokenExpired),
        }
    }

    /// Close the calling session. Idempotent.
    pub async fn logout(&self, user_id: &str, refresh_token: &str) -> Result<(), ServiceError> {
        self.sessions.revoke(user_id, refresh_token).await?;
        Ok(())
    }

    /// Close every other session; returns the number closed.
    pub async fn logout_others(
        &self,
        user_id: &str,
        keep_refresh: &str,
    ) -> Result<usize, ServiceError> {
        Ok(self.sessions.revoke_others(user_id, keep_refresh).await?)
    }

    pub async fn list_tokens(&self, user_id: &str) -> Result<Vec<SessionInfo>, ServiceError> {
        let sessions = self.sessions.list_active(user_id).await?;
        Ok(sessions
            .into_iter()
            .map(|s| SessionInfo {
                id: s.id,
                ip: s.ip,
                user_agent: s.user_agent,
                issued_at: s.issued_at.timestamp_millis(),
                expires_at: s.expires_at.timestamp_millis(),
                impersonated: s.impersonated_by.is_some(),
            })
            .collect())
    }

    /// Open a short-lived session as another user. Admin only; never
    /// nested, never against a root account. The session is excluded from
    /// the target's login-limit accounting.
    pub async fn impersonate_start(
        &self,
        caller: &AccessClaims,
        target_user_id: &str,
        device: &DeviceInfo,
    ) -> Result<AuthSuccess, ServiceError> {
        if caller.is_impersonated() {
            return Err(ServiceError::Forbidden);
        }
        let caller_user = self.load_user(&caller.sub).await?;
        if !caller_user.is_admin() {
            return Err(ServiceError::Forbidden);
        }
        let target = self.load_user(target_user_id).await?;
        if target.is_root() || target.id == caller_user.id {
            return Err(ServiceError::Forbidden);
        }

        let (pair, session) = self.build_pair(
            &target,
            &IssueSpec {
                device,
                is_public: false,
                ttl_override: Some(self.policy.impersonation_ttl),
                impersonated_by: Some(caller_user.id.clone()),
            },
        )?;
        self.sessions.insert_unchecked(session).await?;
        self.notifier
            .auth_event(&target.id, "impersonateStart", &device.ip)
            .await;

        Ok(AuthSuccess {
            tokens: pair,
            user: target.sanitize(),
        })
    }

    /// End an impersonation session. Only an impersonated caller may call.
    pub async fn impersonate_stop(
        &self,
        caller: &AccessClaims,
        refresh_token: &str,
    ) -> Result<(), ServiceError> {
        if !caller.is_impersonated() {
            return Err(ServiceError::Forbidden);
        }
        self.sessions.revoke(&caller.sub, refresh_token).await?;
        Ok(())
    }

    /// Soft-delete the calling account. Hub only; refused while
    /// impersonating.
    pub async fn deregister(
        &self,
        caller: &AccessClaims,
        password: &str,
    ) -> Result<(), ServiceError> {
        if !self.hub {
            return Err(ServiceError::DeploymentMode);
        }
        if caller.is_impersonated() {
            return Err(ServiceError::Forbidden);
        }
        let mut user = self.load_user(&caller.sub).await?;
        if !verify_password(password, &user.password_hash) {
            return Err(ServiceError::InvalidCredentials);
        }

        let now = Utc::now();
        user.status = UserStatus::Deleted;
        user.emails = user
            .emails
            .iter()
            .map(|e| format!("{e}#{}", now.timestamp_millis()))
            .collect();
        user.password_hash = scrambled_hash()?;
        user.updated_at = now;
        self.docs.put(&user).await?;

        let revoked = self.sessions.revoke_all(&user.id).await?;
        tracing::info!(user_id = %user.id, revoked, "account deregistered");
        Ok(())
    }

    /// Change password; every other session is closed.
    pub async fn password_change(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
        keep_refresh: &str,
    ) -> Result<usize, ServiceError> {
        let mut user = self.load_user(user_id).await?;
        if !verify_password(current_password, &user.password_hash) {
            return Err(ServiceError::InvalidCredentials);
        }
        user.password_hash = hash_password(new_password)?;
        user.updated_at = Utc::now();
        self.docs.put(&user).await?;
        Ok(self.sessions.revoke_others(user_id, keep_refresh).await?)
    }

    /// Mint a reset token and hand it to the notifier. Always succeeds, so
    /// the endpoint cannot be used to probe for accounts.
    pub async fn password_reset_request(&self, email: &str) -> Result<(), ServiceError> {
        let Some(user) = self.find_user_by_email(email).await else {
            tracing::debug!("password reset requested for unknown email");
            return Ok(());
        };
        let token = self.codec.sign_purpose(
            TokenPurpose::PasswordReset,
            &user.id,
            self.policy.password_reset_ttl,
        )?;
        self.notifier.password_reset(email, &token).await;
        Ok(())
    }

    pub async fn password_reset_confirm(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<(), ServiceError> {
        let claims = self
            .codec
            .verify_purpose(token, TokenPurpose::PasswordReset)?;
        let mut user = self.load_user(&claims.sub).await?;
        user.password_hash = hash_password(new_password)?;
        user.updated_at = Utc::now();
        self.docs.put(&user).await?;
        self.sessions.revoke_all(&user.id).await?;
        Ok(())
    }

    /// Mint the long-lived satellite registration token for a tenant. Root
    /// only (checked by the handler).
    pub async fn issue_tenant_token(&self, tenant_id: &str) -> Result<IssuedToken, ServiceError> {
        let tenant = self
            .docs
            .get_as::<Tenant>(Collection::Tenants, tenant_id)
            .await?
            .filter(|t| !t.is_deleted())
            .ok_or(ServiceError::NotFound("tenant"))?;
        if !tenant.mode.is_satellite() {
            return Err(ServiceError::Validation(
                "tenant is not in satellite mode".to_string(),
            ));
        }

        let now = Utc::now();
        let token = self.codec.sign_purpose(
            TokenPurpose::Satellite,
            &tenant.id,
            self.policy.tenant_token_ttl,
        )?;
        Ok(IssuedToken {
            token,
            expire_at: expire_at_ms((now + self.policy.tenant_token_ttl).timestamp()),
        })
    }

    /// Authenticate a sync exchange: returns the tenant id the satellite
    /// token was minted for.
    pub fn authenticate_tenant(&self, token: &str) -> Result<String, ServiceError> {
        let claims = self.codec.verify_purpose(token, TokenPurpose::Satellite)?;
        Ok(claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notifier::TracingNotifier;
    use crate::services::session_store::InMemorySessionStore;

    fn policy() -> SessionPolicy {
        SessionPolicy {
            max_login: 2,
            same_ip_only: false,
            access_ttl: Duration::minutes(20),
            refresh_ttl: Duration::days(30),
            impersonation_ttl: Duration::minutes(20),
            login_token_ttl: Duration::minutes(5),
            password_reset_ttl: Duration::minutes(30),
            tenant_token_ttl: Duration::days(365),
        }
    }

    fn manager(docs: Arc<DocumentStore>) -> SessionTokenManager {
        SessionTokenManager::new(
            docs,
            Arc::new(InMemorySessionStore::new()),
            TokenCodec::new("test-secret-at-least-16-bytes"),
            Arc::new(TracingNotifier),
            policy(),
            true,
        )
    }

    fn device() -> DeviceInfo {
        DeviceInfo {
            ip: "10.0.0.1".into(),
            user_agent: "tests".into(),
            client_hash: None,
        }
    }

    async fn seed_user(docs: &DocumentStore, id: &str, email: &str, password: &str) -> User {
        let now = Utc::now();
        let user = User {
            id: id.to_string(),
            name: "Alice".into(),
            emails: vec![email.to_string()],
            password_hash: hash_password(password).unwrap(),
            roles: vec![],
            tenants: vec!["t1".into()],
            student_ids: vec!["t1#s-100".into()],
            status: UserStatus::Active,
            suspended_until: None,
            created_at: now,
            updated_at: now,
        };
        docs.put(&user).await.unwrap();
        user
    }

    #[tokio::test]
    async fn login_succeeds_then_conflicts_then_forces() {
        let docs = Arc::new(DocumentStore::new());
        seed_user(&docs, "u1", "alice@example.com", "pw").await;
        let mgr = manager(docs);

        for _ in 0..2 {
            let out = mgr
                .login(
                    "alice@example.com",
                    "pw",
                    LoginOptions::default(),
                    &device(),
                )
                .await
                .unwrap();
            assert!(matches!(out, LoginOutcome::Success(_)));
        }

        // Third login trips maxLogin=2.
        let out = mgr
            .login(
                "alice@example.com",
                "pw",
                LoginOptions::default(),
                &device(),
            )
            .await
            .unwrap();
        match out {
            LoginOutcome::Conflict { conflict } => {
                assert_eq!(conflict.max_login, 2);
                assert_eq!(conflict.exceed_login, 1);
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        let out = mgr
            .login(
                "alice@example.com",
                "pw",
                LoginOptions {
                    force: true,
                    is_public: false,
                },
                &device(),
            )
            .await
            .unwrap();
        assert!(matches!(out, LoginOutcome::Success(_)));
        assert_eq!(mgr.list_tokens("u1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let docs = Arc::new(DocumentStore::new());
        seed_user(&docs, "u1", "alice@example.com", "pw").await;
        let mgr = manager(docs);

        let err = mgr
            .login(
                "alice@example.com",
                "nope",
                LoginOptions::default(),
                &device(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));
    }

    #[tokio::test]
    async fn suspended_account_is_gated_and_lapsed_suspension_clears() {
        let docs = Arc::new(DocumentStore::new());
        let mut user = seed_user(&docs, "u1", "alice@example.com", "pw").await;
        user.suspended_until = Some(Utc::now() + Duration::hours(1));
        docs.put(&user).await.unwrap();
        let mgr = manager(docs.clone());

        let err = mgr
            .login(
                "alice@example.com",
                "pw",
                LoginOptions::default(),
                &device(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AccountSuspended));

        user.suspended_until = Some(Utc::now() - Duration::hours(1));
        docs.put(&user).await.unwrap();
        let out = mgr
            .login(
                "alice@example.com",
                "pw",
                LoginOptions::default(),
                &device(),
            )
            .await
            .unwrap();
        assert!(matches!(out, LoginOutcome::Success(_)));

        let stored: User = docs
            .get_as(Collection::Users, "u1")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.suspended_until.is_none());
    }

    #[tokio::test]
    async fn renew_rotates_and_replay_fails() {
        let docs = Arc::new(DocumentStore::new());
        seed_user(&docs, "u1", "alice@example.com", "pw").await;
        let mgr = manager(docs);

        let out = mgr
            .login(
                "alice@example.com",
                "pw",
                LoginOptions::default(),
                &device(),
            )
            .await
            .unwrap();
        let LoginOutcome::Success(auth) = out else {
            panic!("expected success");
        };

        let pair = mgr
            .renew_token(&auth.tokens.refresh_token, false, &device())
            .await
            .unwrap();
        assert_ne!(pair.refresh_token, auth.tokens.refresh_token);

        // Replay of the consumed token.
        let err = mgr
            .renew_token(&auth.tokens.refresh_token, false, &device())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::TokenRevoked));

        // The rotated token still works.
        mgr.renew_token(&pair.refresh_token, false, &device())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn impersonation_is_admin_only_and_excluded_from_limits() {
        let docs = Arc::new(DocumentStore::new());
        seed_user(&docs, "u1", "alice@example.com", "pw").await;
        let mut admin = seed_user(&docs, "a1", "admin@example.com", "pw").await;
        admin.roles = vec!["ADMIN".into()];
        docs.put(&admin).await.unwrap();
        let mgr = manager(docs);

        let now = Utc::now();
        let admin_claims = AccessClaims {
            sub: "a1".into(),
            name: "Admin".into(),
            roles: vec!["ADMIN".into()],
            tenants: vec!["t1".into()],
            auth_user_id: None,
            jti: "j".into(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(20)).timestamp(),
        };
        let auth = mgr
            .impersonate_start(&admin_claims, "u1", &device())
            .await
            .unwrap();
        assert_eq!(auth.user.id, "u1");

        // The ghost session does not count toward u1's limit: two real
        // logins still fit under maxLogin=2.
        for _ in 0..2 {
            let out = mgr
                .login(
                    "alice@example.com",
                    "pw",
                    LoginOptions::default(),
                    &device(),
                )
                .await
                .unwrap();
            assert!(matches!(out, LoginOutcome::Success(_)));
        }

        // Non-admin callers are refused.
        let user_claims = AccessClaims {
            sub: "u1".into(),
            roles: vec![],
            ..admin_claims.clone()
        };
        let err = mgr
            .impersonate_start(&user_claims, "a1", &device())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden));

        // Nested impersonation is refused.
        let nested = AccessClaims {
            auth_user_id: Some("a0".into()),
            ..admin_claims
        };
        let err = mgr
            .impersonate_start(&nested, "u1", &device())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden));
    }

    #[tokio::test]
    async fn login_token_round_trip() {
        let docs = Arc::new(DocumentStore::new());
        seed_user(&docs, "u1", "alice@example.com", "pw").await;
        let mut admin = seed_user(&docs, "a1", "admin@example.com", "pw").await;
        admin.roles = vec!["ADMIN".into()];
        docs.put(&admin).await.unwrap();

        let now = Utc::now();
        let tenant = Tenant {
            id: "t1".into(),
            code: "ACME".into(),
            name: "Acme".into(),
            mode: crate::models::TenantMode::Hub,
            satellite_status: None,
            services: vec![],
            admins: vec!["a1".into()],
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        docs.put(&tenant).await.unwrap();
        let mgr = manager(docs);

        let admin_claims = AccessClaims {
            sub: "a1".into(),
            name: "Admin".into(),
            roles: vec!["ADMIN".into()],
            tenants: vec!["t1".into()],
            auth_user_id: None,
            jti: "j".into(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(20)).timestamp(),
        };
        let issued = mgr
            .issue_login_token(&admin_claims, "t1", "u1")
            .await
            .unwrap();

        let out = mgr.login_with_token(&issued.token, &device()).await.unwrap();
        let LoginOutcome::Success(auth) = out else {
            panic!("expected success");
        };
        assert_eq!(auth.user.id, "u1");
    }

    #[tokio::test]
    async fn student_id_login() {
        let docs = Arc::new(DocumentStore::new());
        seed_user(&docs, "u1", "alice@example.com", "pw").await;
        let now = Utc::now();
        let tenant = Tenant {
            id: "t1".into(),
            code: "ACME".into(),
            name: "Acme".into(),
            mode: crate::models::TenantMode::Hub,
            satellite_status: None,
            services: vec![],
            admins: vec![],
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        docs.put(&tenant).await.unwrap();
        let mgr = manager(docs);

        let out = mgr
            .login_with_student_id("t1", "s-100", "pw", LoginOptions::default(), &device())
            .await
            .unwrap();
        assert!(matches!(out, LoginOutcome::Success(_)));

        let err = mgr
            .login_with_student_id("t1", "s-999", "pw", LoginOptions::default(), &device())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));
    }

    #[tokio::test]
    async fn deregister_scrambles_and_revokes() {
        let docs = Arc::new(DocumentStore::new());
        seed_user(&docs, "u1", "alice@example.com", "pw").await;
        let mgr = manager(docs.clone());

        let out = mgr
            .login(
                "alice@example.com",
                "pw",
                LoginOptions::default(),
                &device(),
            )
            .await
            .unwrap();
        let LoginOutcome::Success(auth) = out else {
            panic!("expected success");
        };

        let now = Utc::now();
        let claims = AccessClaims {
            sub: "u1".into(),
            name: "Alice".into(),
            roles: vec![],
            tenants: vec!["t1".into()],
            auth_user_id: None,
            jti: "j".into(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(20)).timestamp(),
        };
        mgr.deregister(&claims, "pw").await.unwrap();

        let stored: User = docs
            .get_as(Collection::Users, "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, UserStatus::Deleted);
        assert!(!verify_password("pw", &stored.password_hash));

        let err = mgr
            .renew_token(&auth.tokens.refresh_token, false, &device())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn password_reset_flow_revokes_sessions() {
        let docs = Arc::new(DocumentStore::new());
        seed_user(&docs, "u1", "alice@example.com", "pw").await;
        let mgr = manager(docs.clone());

        // Unknown email is silently accepted.
        mgr.password_reset_request("nobody@example.com")
            .await
            .unwrap();

        let token = mgr
            .codec
            .sign_purpose(TokenPurpose::PasswordReset, "u1", Duration::minutes(30))
            .unwrap();
        mgr.password_reset_confirm(&token, "fresh-password")
            .await
            .unwrap();

        let out = mgr
            .login(
                "alice@example.com",
                "fresh-password",
                LoginOptions::default(),
                &device(),
            )
            .await
            .unwrap();
        assert!(matches!(out, LoginOutcome::Success(_)));
    }
}
