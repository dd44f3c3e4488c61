use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::Session;

/// Login admission policy applied inside the per-user critical section.
#[derive(Debug, Clone, Copy)]
pub struct AdmitPolicy {
    pub max_login: usize,
    pub same_ip_only: bool,
    pub force: bool,
}

/// Result of trying to open a new session.
#[derive(Debug)]
pub enum AdmitOutcome {
    Admitted { evicted: usize },
    /// Limit (or same-IP policy) hit and the login was not forced. `ip` is
    /// the address of the most recent conflicting session when the same-IP
    /// policy triggered.
    Conflict {
        ip: Option<String>,
        exceed_login: usize,
    },
}

/// Result of rotating a refresh token.
#[derive(Debug)]
pub enum RotateOutcome {
    Rotated,
    /// Unknown or already-revoked token: a replay.
    Revoked,
    Expired,
}

/// Session registry. Implementations must make the count-then-insert step
/// of `admit` atomic per user.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn admit(&self, session: Session, policy: AdmitPolicy) -> anyhow::Result<AdmitOutcome>;

    /// Insert without admission checks (impersonation sessions).
    async fn insert_unchecked(&self, session: Session) -> anyhow::Result<()>;

    async fn find(&self, user_id: &str, refresh_token: &str) -> anyhow::Result<Option<Session>>;

    /// Replace the session behind `old_refresh` with `replacement`, revoking
    /// the old row so replay of the old token fails.
    async fn rotate(
        &self,
        user_id: &str,
        old_refresh: &str,
        replacement: Session,
    ) -> anyhow::Result<RotateOutcome>;

    /// Revoke one session. Returns true when a live session was revoked.
    async fn revoke(&self, user_id: &str, refresh_token: &str) -> anyhow::Result<bool>;

    /// Revoke every active session except the one behind `keep_refresh`.
    /// Returns the number revoked.
    async fn revoke_others(&self, user_id: &str, keep_refresh: &str) -> anyhow::Result<usize>;

    async fn revoke_all(&self, user_id: &str) -> anyhow::Result<usize>;

    async fn list_active(&self, user_id: &str) -> anyhow::Result<Vec<Session>>;
}

/// In-process session registry: one mutex-guarded row vector per user.
#[derive(Default)]
pub struct InMemorySessionStore {
    users: DashMap<String, Arc<Mutex<Vec<Session>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self, user_id: &str) -> Arc<Mutex<Vec<Session>>> {
        self.users
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn admit(&self, session: Session, policy: AdmitPolicy) -> anyhow::Result<AdmitOutcome> {
        let rows = self.rows(&session.user_id);
        let mut rows = rows.lock().await;
        let now = Utc::now();

        // Drop rows that can never matter again.
        rows.retain(|s| !s.is_expired(now));

        let active: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_active(now) && s.counts_toward_limit())
            .map(|(i, _)| i)
            .collect();

        let ip_conflict = policy.same_ip_only
            && active
                .last()
                .map(|&i| rows[i].ip != session.ip)
                .unwrap_or(false);
        let over_limit = active.len() >= policy.max_login;

        if (over_limit || ip_conflict) && !policy.force {
            let exceed = (active.len() + 1).saturating_sub(policy.max_login);
            let ip = if ip_conflict {
                active.last().map(|&i| rows[i].ip.clone())
            } else {
                None
            };
            return Ok(AdmitOutcome::Conflict {
                ip,
                exceed_login: exceed,
            });
        }

        let mut evicted = 0;
        if ip_conflict {
            // Forced different-IP login closes every other session.
            for &i in &active {
                rows[i].revoked_at = Some(now);
                evicted += 1;
            }
        } else if over_limit {
            // Evict oldest-first until the new session fits.
            let excess = active.len() + 1 - policy.max_login;
            let mut by_age = active.clone();
            by_age.sort_by_key(|&i| rows[i].issued_at);
            for &i in by_age.iter().take(excess) {
                rows[i].revoked_at = Some(now);
                evicted += 1;
            }
        }

        rows.push(session);
        Ok(AdmitOutcome::Admitted { evicted })
    }

    async fn insert_unchecked(&self, session: Session) -> anyhow::Result<()> {
        let rows = self.rows(&session.user_id);
        rows.lock().await.push(session);
        Ok(())
    }

    async fn find(&self, user_id: &str, refresh_token: &str) -> anyhow::Result<Option<Session>> {
        let rows = self.rows(user_id);
        let rows = rows.lock().await;
        Ok(rows
            .iter()
            .find(|s| s.refresh_token == refresh_token && !s.is_revoked())
            .cloned())
    }

    async fn rotate(
        &self,
        user_id: &str,
        old_refresh: &str,
        replacement: Session,
    ) -> anyhow::Result<RotateOutcome> {
        let rows = self.rows(user_id);
        let mut rows = rows.lock().await;
        let now = Utc::now();

        let Some(pos) = rows
            .iter()
            .position(|s| s.refresh_token == old_refresh && !s.is_revoked())
        else {
            return Ok(RotateOutcome::Revoked);
        };
        if rows[pos].is_expired(now) {
            return Ok(RotateOutcome::Expired);
        }

        rows[pos].revoked_at = Some(now);
        rows.push(replacement);
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke(&self, user_id: &str, refresh_token: &str) -> anyhow::Result<bool> {
        let rows = self.rows(user_id);
        let mut rows = rows.lock().await;
        let now = Utc::now();
        for s in rows.iter_mut() {
            if s.refresh_token == refresh_token && !s.is_revoked() {
                s.revoked_at = Some(now);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn revoke_others(&self, user_id: &str, keep_refresh: &str) -> anyhow::Result<usize> {
        let rows = self.rows(user_id);
        let mut rows = rows.lock().await;
        let now = Utc::now();
        let mut revoked = 0;
        for s in rows.iter_mut() {
            if s.refresh_token != keep_refresh && s.is_active(now) {
                s.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn revoke_all(&self, user_id: &str) -> anyhow::Result<usize> {
        let rows = self.rows(user_id);
        let mut rows = rows.lock().await;
        let now = Utc::now();
        let mut revoked = 0;
        for s in rows.iter_mut() {
            if s.is_active(now) {
                s.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn list_active(&self, user_id: &str) -> anyhow::Result<Vec<Session>> {
        let rows = self.rows(user_id);
        let rows = rows.lock().await;
        let now = Utc::now();
        Ok(rows.iter().filter(|s| s.is_active(now)).cloned().collect())
    }
}
