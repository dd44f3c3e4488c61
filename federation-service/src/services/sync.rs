use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::TieBreak;
use crate::models::{Collection, SyncRecord, Tenant};

use super::error::ServiceError;
use super::repository::DocumentStore;

/// Sync directions, relative to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncDirection {
    Inbound,
    Outbound,
}

/// What a peer sends in a PATCH exchange: its local changes plus the cursor
/// up to which it has durably applied ours.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchBundle {
    pub version: String,
    pub cursor: i64,
    pub records: Vec<SyncRecord>,
}

/// Exchange reply: what we did with the peer's records, and our changes
/// past its cursor.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeResponse {
    pub version: String,
    pub applied: usize,
    pub stale: usize,
    pub records: Vec<SyncRecord>,
    pub cursor: i64,
    pub has_more: bool,
}

/// Full snapshot handed to a satellite at registration time.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: String,
    pub tenant_id: String,
    pub records: Vec<SyncRecord>,
    pub exported_at: i64,
}

/// Drops the per-tenant exchange lease when the exchange ends, even on
/// error paths.
struct ExchangeLease<'a> {
    leases: &'a DashMap<String, ()>,
    tenant_id: String,
}

impl Drop for ExchangeLease<'_> {
    fn drop(&mut self) {
        self.leases.remove(&self.tenant_id);
    }
}

/// Replicates reference documents between the hub and satellite tenants.
pub struct FederationSyncEngine {
    docs: Arc<DocumentStore>,
    cursors: DashMap<(String, SyncDirection), i64>,
    in_flight: DashMap<String, ()>,
    tie_break: TieBreak,
    max_bundle_records: usize,
    version: String,
    hub: bool,
}

impl FederationSyncEngine {
    pub fn new(
        docs: Arc<DocumentStore>,
        tie_break: TieBreak,
        max_bundle_records: usize,
        version: &str,
        hub: bool,
    ) -> Self {
        Self {
            docs,
            cursors: DashMap::new(),
            in_flight: DashMap::new(),
            tie_break,
            max_bundle_records,
            version: version.to_string(),
            hub,
        }
    }

    pub fn cursor(&self, tenant_id: &str, direction: SyncDirection) -> i64 {
        self.cursors
            .get(&(tenant_id.to_string(), direction))
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// Cursors only ever move forward.
    pub fn advance_cursor(&self, tenant_id: &str, direction: SyncDirection, to: i64) {
        let mut slot = self
            .cursors
            .entry((tenant_id.to_string(), direction))
            .or_insert(0);
        if to > *slot {
            *slot = to;
        }
    }

    fn lease(&self, tenant_id: &str) -> Result<ExchangeLease<'_>, ServiceError> {
        match self.in_flight.entry(tenant_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ServiceError::SyncInProgress),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Ok(ExchangeLease {
                    leases: &self.in_flight,
                    tenant_id: tenant_id.to_string(),
                })
            }
        }
    }

    /// Peers must agree on major.minor; patch level may drift.
    fn check_version(&self, peer: &str) -> Result<(), ServiceError> {
        let major_minor = |v: &str| -> Vec<String> {
            v.split('.').take(2).map(str::to_string).collect()
        };
        if major_minor(peer) != major_minor(&self.version) {
            return Err(ServiceError::VersionMismatch {
                peer: peer.to_string(),
                ours: self.version.clone(),
            });
        }
        Ok(())
    }

    /// Reject the whole bundle on the first malformed record, before
    /// anything is applied.
    fn validate_records(records: &[SyncRecord]) -> Result<(), ServiceError> {
        for record in records {
            if record.id.is_empty() {
                return Err(ServiceError::Validation(format!(
                    "record in {} has an empty id",
                    record.collection
                )));
            }
            if record.updated_at <= 0 {
                return Err(ServiceError::Validation(format!(
                    "record {}/{} has no updatedAt",
                    record.collection, record.id
                )));
            }
            if !record.body.is_object() {
                return Err(ServiceError::Validation(format!(
                    "record {}/{} body is not an object",
                    record.collection, record.id
                )));
            }
        }
        Ok(())
    }

    /// Inbound records must carry the authenticated tenant's id; the
    /// exchange is no vehicle for writing other tenants' (or global)
    /// documents.
    fn validate_scope(tenant_id: &str, records: &[SyncRecord]) -> Result<(), ServiceError> {
        for record in records {
            if record.tenant_id.as_deref() != Some(tenant_id) {
                return Err(ServiceError::Forbidden);
            }
        }
        Ok(())
    }

    fn sort_for_apply(records: &mut [SyncRecord]) {
        records.sort_by(|a, b| {
            a.collection
                .rank()
                .cmp(&b.collection.rank())
                .then_with(|| a.updated_at.cmp(&b.updated_at))
        });
    }

    /// Incoming records win an exact-tie only when the configured policy
    /// favors their side.
    fn prefer_incoming(&self, incoming_from_hub: bool) -> bool {
        match self.tie_break {
            TieBreak::Hub => incoming_from_hub,
            TieBreak::Satellite => !incoming_from_hub,
        }
    }

    /// Hub side of the PATCH exchange: apply the satellite's records, then
    /// answer with our changes past its cursor.
    pub async fn apply_and_diff(
        &self,
        tenant_id: &str,
        mut bundle: PatchBundle,
    ) -> Result<ExchangeResponse, ServiceError> {
        if !self.hub {
            return Err(ServiceError::DeploymentMode);
        }
        let _lease = self.lease(tenant_id)?;
        self.check_version(&bundle.version)?;
        Self::validate_records(&bundle.records)?;
        Self::validate_scope(tenant_id, &bundle.records)?;
        Self::sort_for_apply(&mut bundle.records);

        // Diff before apply, so the reply never echoes the records the
        // satellite just sent.
        let (outbound, has_more) = self
            .docs
            .changes_since(tenant_id, bundle.cursor, self.max_bundle_records)
            .await;

        let stats = self
            .docs
            .apply_batch(&bundle.records, self.prefer_incoming(false))
            .await;

        let newest_inbound = bundle
            .records
            .iter()
            .map(|r| r.updated_at)
            .max()
            .unwrap_or(0);
        self.advance_cursor(tenant_id, SyncDirection::Inbound, newest_inbound);

        let cursor = outbound
            .last()
            .map(|r| r.updated_at)
            .unwrap_or(bundle.cursor);
        self.advance_cursor(tenant_id, SyncDirection::Outbound, cursor);

        tracing::info!(
            tenant_id,
            applied = stats.applied,
            stale = stats.stale,
            returned = outbound.len(),
            has_more,
            "sync exchange"
        );

        Ok(ExchangeResponse {
            version: self.version.clone(),
            applied: stats.applied,
            stale: stats.stale,
            records: outbound,
            cursor,
            has_more,
        })
    }

    /// Satellite side: apply records received from the hub and advance the
    /// inbound cursor to what the hub reported.
    pub async fn apply_remote(
        &self,
        tenant_id: &str,
        mut records: Vec<SyncRecord>,
        peer_version: &str,
        new_cursor: i64,
    ) -> Result<usize, ServiceError> {
        self.check_version(peer_version)?;
        Self::validate_records(&records)?;
        Self::sort_for_apply(&mut records);

        let stats = self
            .docs
            .apply_batch(&records, self.prefer_incoming(true))
            .await;
        self.advance_cursor(tenant_id, SyncDirection::Inbound, new_cursor);
        Ok(stats.applied)
    }

    /// Local changes a satellite should push next, past its outbound
    /// cursor.
    pub async fn pending_outbound(&self, tenant_id: &str) -> (Vec<SyncRecord>, bool) {
        let cursor = self.cursor(tenant_id, SyncDirection::Outbound);
        self.docs
            .changes_since(tenant_id, cursor, self.max_bundle_records)
            .await
    }

    /// Full snapshot for a satellite's initial seed. Hub only.
    pub async fn export_for_tenant(
        &self,
        tenant_id: &str,
    ) -> Result<ExportBundle, ServiceError> {
        if !self.hub {
            return Err(ServiceError::DeploymentMode);
        }
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

        let records = self.docs.export_for(tenant_id).await;
        let exported_at = chrono::Utc::now().timestamp_millis();
        tracing::info!(tenant_id, records = records.len(), "exported snapshot");
        Ok(ExportBundle {
            version: self.version.clone(),
            tenant_id: tenant_id.to_string(),
            records,
            exported_at,
        })
    }
}
