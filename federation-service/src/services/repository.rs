use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::models::{Collection, StoreDocument, SyncRecord};

use super::error::ServiceError;

/// Outcome of an atomic bundle apply.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApplyStats {
    pub applied: usize,
    /// Records skipped because the stored copy was newer (or tied and the
    /// tie-break preferred it).
    pub stale: usize,
}

/// In-process document store standing in for the reference-data repository.
/// One write guard covers the whole store, so `apply_batch` is atomic.
#[derive(Default)]
pub struct DocumentStore {
    collections: RwLock<HashMap<Collection, HashMap<String, SyncRecord>>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, collection: Collection, id: &str) -> Option<SyncRecord> {
        let guard = self.collections.read().await;
        guard.get(&collection).and_then(|c| c.get(id)).cloned()
    }

    /// Fetch a document and deserialize its body.
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<T>, ServiceError> {
        match self.get(collection, id).await {
            Some(record) => serde_json::from_value(record.body)
                .map(Some)
                .map_err(|e| {
                    ServiceError::Internal(anyhow::anyhow!(
                        "corrupt {collection} document {id}: {e}"
                    ))
                }),
            None => Ok(None),
        }
    }

    /// Upsert a typed document unconditionally.
    pub async fn put<T: StoreDocument>(&self, doc: &T) -> Result<(), ServiceError> {
        let record = doc
            .to_record()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("serialize failure: {e}")))?;
        let mut guard = self.collections.write().await;
        guard
            .entry(T::COLLECTION)
            .or_default()
            .insert(record.id.clone(), record);
        Ok(())
    }

    /// Update with optimistic concurrency: fails when the stored copy's
    /// `updatedAt` no longer matches what the caller read.
    pub async fn update_checked<T: StoreDocument>(
        &self,
        doc: &T,
        expected_updated_at: i64,
    ) -> Result<(), ServiceError> {
        let record = doc
            .to_record()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("serialize failure: {e}")))?;
        let mut guard = self.collections.write().await;
        let slot = guard
            .entry(T::COLLECTION)
            .or_default()
            .get_mut(&record.id)
            .ok_or(ServiceError::NotFound(T::COLLECTION.as_str()))?;
        if slot.updated_at != expected_updated_at {
            return Err(ServiceError::WriteConflict);
        }
        *slot = record;
        Ok(())
    }

    pub async fn remove(&self, collection: Collection, id: &str) -> bool {
        let mut guard = self.collections.write().await;
        guard
            .get_mut(&collection)
            .and_then(|c| c.remove(id))
            .is_some()
    }

    /// Scan one collection, yielding whatever the closure extracts.
    pub async fn find_map<T, F>(&self, collection: Collection, mut f: F) -> Vec<T>
    where
        F: FnMut(&SyncRecord) -> Option<T>,
    {
        let guard = self.collections.read().await;
        guard
            .get(&collection)
            .map(|c| c.values().filter_map(|r| f(r)).collect())
            .unwrap_or_default()
    }

    /// Apply a pre-validated bundle under a single write guard. Per record,
    /// the larger `updatedAt` wins; an exact tie goes to the incoming record
    /// only when `prefer_incoming_on_tie` is set.
    pub async fn apply_batch(
        &self,
        records: &[SyncRecord],
        prefer_incoming_on_tie: bool,
    ) -> ApplyStats {
        let mut guard = self.collections.write().await;
        let mut stats = ApplyStats::default();
        for record in records {
            let slot = guard.entry(record.collection).or_default();
            let keep_incoming = match slot.get(&record.id) {
                Some(existing) if existing.updated_at > record.updated_at => false,
                Some(existing) if existing.updated_at == record.updated_at => {
                    prefer_incoming_on_tie
                }
                _ => true,
            };
            if keep_incoming {
                slot.insert(record.id.clone(), record.clone());
                stats.applied += 1;
            } else {
                stats.stale += 1;
            }
        }
        stats
    }

    /// Documents visible to `tenant_id` changed strictly after `cursor`,
    /// ordered by (`updatedAt`, id) so a cursor can page through them.
    /// Returns the page and whether more records remain.
    pub async fn changes_since(
        &self,
        tenant_id: &str,
        cursor: i64,
        limit: usize,
    ) -> (Vec<SyncRecord>, bool) {
        let guard = self.collections.read().await;
        let mut out: Vec<SyncRecord> = guard
            .values()
            .flat_map(|c| c.values())
            .filter(|r| r.updated_at > cursor)
            .filter(|r| r.tenant_id.as_deref().map(|t| t == tenant_id).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        let has_more = out.len() > limit;
        out.truncate(limit);
        (out, has_more)
    }

    /// Everything visible to one tenant, in apply order. Used for the
    /// initial satellite snapshot.
    pub async fn export_for(&self, tenant_id: &str) -> Vec<SyncRecord> {
        let guard = self.collections.read().await;
        let mut out: Vec<SyncRecord> = guard
            .values()
            .flat_map(|c| c.values())
            .filter(|r| r.tenant_id.as_deref().map(|t| t == tenant_id).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.collection
                .rank()
                .cmp(&b.collection.rank())
                .then_with(|| a.updated_at.cmp(&b.updated_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(collection: Collection, id: &str, tenant: Option<&str>, updated_at: i64) -> SyncRecord {
        SyncRecord {
            collection,
            id: id.to_string(),
            tenant_id: tenant.map(str::to_string),
            updated_at,
            body: json!({ "id": id, "updatedAt": updated_at }),
        }
    }

    #[tokio::test]
    async fn apply_batch_skips_stale_records() {
        let store = DocumentStore::new();
        store
            .apply_batch(&[record(Collection::Users, "u1", Some("t1"), 100)], false)
            .await;

        let stats = store
            .apply_batch(&[record(Collection::Users, "u1", Some("t1"), 50)], false)
            .await;
        assert_eq!(stats.applied, 0);
        assert_eq!(stats.stale, 1);

        let kept = store.get(Collection::Users, "u1").await.unwrap();
        assert_eq!(kept.updated_at, 100);
    }

    #[tokio::test]
    async fn tie_goes_to_the_configured_side() {
        let store = DocumentStore::new();
        store
            .apply_batch(&[record(Collection::Users, "u1", Some("t1"), 100)], false)
            .await;

        let incoming = vec![SyncRecord {
            body: json!({ "id": "u1", "marker": "incoming" }),
            ..record(Collection::Users, "u1", Some("t1"), 100)
        }];

        let stats = store.apply_batch(&incoming, false).await;
        assert_eq!(stats.stale, 1);

        let stats = store.apply_batch(&incoming, true).await;
        assert_eq!(stats.applied, 1);
        let kept = store.get(Collection::Users, "u1").await.unwrap();
        assert_eq!(kept.body["marker"], "incoming");
    }

    #[tokio::test]
    async fn changes_since_pages_in_cursor_order() {
        let store = DocumentStore::new();
        let records: Vec<SyncRecord> = (1..=5)
            .map(|i| record(Collection::Users, &format!("u{i}"), Some("t1"), i * 10))
            .collect();
        store.apply_batch(&records, false).await;

        let (page, has_more) = store.changes_since("t1", 0, 3).await;
        assert_eq!(page.len(), 3);
        assert!(has_more);
        assert_eq!(page.last().unwrap().updated_at, 30);

        let (rest, has_more) = store.changes_since("t1", 30, 3).await;
        assert_eq!(rest.len(), 2);
        assert!(!has_more);
    }

    #[tokio::test]
    async fn changes_since_scopes_by_tenant_but_keeps_global_docs() {
        let store = DocumentStore::new();
        store
            .apply_batch(
                &[
                    record(Collection::Users, "mine", Some("t1"), 10),
                    record(Collection::Users, "theirs", Some("t2"), 20),
                    record(Collection::Books, "global", None, 30),
                ],
                false,
            )
            .await;

        let (page, _) = store.changes_since("t1", 0, 10).await;
        let ids: Vec<&str> = page.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["mine", "global"]);
    }

    #[tokio::test]
    async fn update_checked_rejects_stale_writers() {
        use crate::models::{Tenant, TenantMode};
        use chrono::{TimeZone, Utc};

        let t0 = Utc.timestamp_millis_opt(1_000).unwrap();
        let tenant = Tenant {
            id: "t1".into(),
            code: "ACME".into(),
            name: "Acme".into(),
            mode: TenantMode::Hub,
            satellite_status: None,
            services: vec![],
            admins: vec![],
            created_at: t0,
            updated_at: t0,
            deleted_at: None,
        };
        let store = DocumentStore::new();
        store.put(&tenant).await.unwrap();

        let mut fresh = tenant.clone();
        fresh.name = "Acme Renamed".into();
        fresh.updated_at = Utc.timestamp_millis_opt(2_000).unwrap();
        store.update_checked(&fresh, 1_000).await.unwrap();

        // A second writer still holding the original read fails.
        let mut stale = tenant.clone();
        stale.name = "Acme Stale".into();
        stale.updated_at = Utc.timestamp_millis_opt(3_000).unwrap();
        let err = store.update_checked(&stale, 1_000).await.unwrap_err();
        assert!(matches!(err, ServiceError::WriteConflict));

        let kept: Tenant = store.get_as(Collection::Tenants, "t1").await.unwrap().unwrap();
        assert_eq!(kept.name, "Acme Renamed");
    }
}
