use async_trait::async_trait;

/// Delivery seam for user-facing notifications. The production platform
/// pushes these over mail and sockets; this service only needs the hook.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn auth_event(&self, user_id: &str, event: &str, ip: &str);

    async fn password_reset(&self, email: &str, token: &str);
}

/// Notifier that records events in the structured log.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn auth_event(&self, user_id: &str, event: &str, ip: &str) {
        tracing::info!(user_id, event, ip, "auth event");
    }

    async fn password_reset(&self, email: &str, token: &str) {
        // The token is only logged truncated; the real delivery channel is
        // out of process.
        let prefix: String = token.chars().take(8).collect();
        tracing::info!(email, token_prefix = %prefix, "password reset requested");
    }
}
