use std::sync::Arc;
use std::time::Duration;

use super::error::ServiceError;
use super::sync::{ExchangeResponse, FederationSyncEngine, PatchBundle, SyncDirection};

/// One satellite exchange round, as seen from the satellite.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExchangeStats {
    pub pushed: usize,
    pub pulled: usize,
    /// The hub reported more records past the returned cursor.
    pub has_more: bool,
}

/// Drives the PATCH exchange against the hub on behalf of this satellite.
/// Spawned from `main` on an interval when the node runs in satellite mode.
pub struct SatelliteSyncClient {
    http: reqwest::Client,
    hub_url: String,
    tenant_id: String,
    tenant_token: String,
    version: String,
    engine: Arc<FederationSyncEngine>,
}

impl SatelliteSyncClient {
    pub fn new(
        hub_url: &str,
        tenant_id: &str,
        tenant_token: &str,
        version: &str,
        engine: Arc<FederationSyncEngine>,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("http client: {e}")))?;
        Ok(Self {
            http,
            hub_url: hub_url.trim_end_matches('/').to_string(),
            tenant_id: tenant_id.to_string(),
            tenant_token: tenant_token.to_string(),
            version: version.to_string(),
            engine,
        })
    }

    /// One exchange round trip. Cursors only move after the hub's reply is
    /// durably applied, so a network failure leaves everything replayable.
    pub async fn run_once(&self) -> Result<ExchangeStats, ServiceError> {
        let (outbound, _) = self.engine.pending_outbound(&self.tenant_id).await;
        let pushed = outbound.len();
        let newest_pushed = outbound.iter().map(|r| r.updated_at).max().unwrap_or(0);

        let bundle = PatchBundle {
            version: self.version.clone(),
            cursor: self.engine.cursor(&self.tenant_id, SyncDirection::Inbound),
            records: outbound,
        };

        let response = self
            .http
            .patch(format!("{}/api/sync", self.hub_url))
            .bearer_auth(&self.tenant_token)
            .json(&bundle)
            .send()
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("hub unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "hub rejected exchange: {status}: {body}"
            )));
        }

        let exchange: ExchangeResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("bad exchange reply: {e}")))?;

        let pulled = self
            .engine
            .apply_remote(
                &self.tenant_id,
                exchange.records,
                &exchange.version,
                exchange.cursor,
            )
            .await?;

        self.engine
            .advance_cursor(&self.tenant_id, SyncDirection::Outbound, newest_pushed);

        Ok(ExchangeStats {
            pushed,
            pulled,
            has_more: exchange.has_more,
        })
    }

    /// Exchange loop: keeps going while the hub reports a backlog, then
    /// sleeps for the configured interval.
    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            loop {
                match self.run_once().await {
                    Ok(stats) => {
                        tracing::info!(
                            tenant_id = %self.tenant_id,
                            pushed = stats.pushed,
                            pulled = stats.pulled,
                            "sync round complete"
                        );
                        if !stats.has_more {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(tenant_id = %self.tenant_id, error = %e, "sync round failed");
                        break;
                    }
                }
            }
        }
    }
}
