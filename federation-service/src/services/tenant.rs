use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Collection, SatelliteStatus, Tenant, TenantMode, TenantService};

use super::error::ServiceError;
use super::repository::DocumentStore;

/// Caller-editable tenant fields.
#[derive(Debug, Default)]
pub struct TenantUpdate {
    pub name: Option<String>,
    pub mode: Option<TenantMode>,
    pub services: Option<Vec<TenantService>>,
    pub admins: Option<Vec<String>>,
}

/// CRUD and lookups over tenants. Deletes are soft (`deletedAt`); updates
/// use optimistic concurrency on `updatedAt`.
#[derive(Clone)]
pub struct TenantRegistry {
    docs: Arc<DocumentStore>,
}

impl TenantRegistry {
    pub fn new(docs: Arc<DocumentStore>) -> Self {
        Self { docs }
    }

    pub async fn create(
        &self,
        code: &str,
        name: &str,
        mode: TenantMode,
        services: Vec<TenantService>,
    ) -> Result<Tenant, ServiceError> {
        let code = code.trim().to_uppercase();
        if code.is_empty() {
            return Err(ServiceError::Validation("tenant code is required".into()));
        }
        if self.lookup_by_code(&code).await?.is_some() {
            return Err(ServiceError::Validation(format!(
                "tenant code {code} is already taken"
            )));
        }

        let now = Utc::now();
        let tenant = Tenant {
            id: Uuid::new_v4().to_string(),
            code,
            name: name.to_string(),
            satellite_status: mode.is_satellite().then_some(SatelliteStatus::Initializing),
            mode,
            services,
            admins: vec![],
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.docs.put(&tenant).await?;
        tracing::info!(tenant_id = %tenant.id, code = %tenant.code, "tenant created");
        Ok(tenant)
    }

    pub async fn find(&self, tenant_id: &str) -> Result<Tenant, ServiceError> {
        self.docs
            .get_as::<Tenant>(Collection::Tenants, tenant_id)
            .await?
            .filter(|t| !t.is_deleted())
            .ok_or(ServiceError::NotFound("tenant"))
    }

    pub async fn list(&self) -> Vec<Tenant> {
        let mut tenants: Vec<Tenant> = self
            .docs
            .find_map(Collection::Tenants, |r| {
                serde_json::from_value::<Tenant>(r.body.clone()).ok()
            })
            .await
            .into_iter()
            .filter(|t| !t.is_deleted())
            .collect();
        tenants.sort_by(|a, b| a.code.cmp(&b.code));
        tenants
    }

    /// Codes are stored upper-case, so the lookup folds its input too.
    pub async fn lookup_by_code(&self, code: &str) -> Result<Option<Tenant>, ServiceError> {
        let needle = code.trim().to_uppercase();
        Ok(self
            .docs
            .find_map(Collection::Tenants, |r| {
                serde_json::from_value::<Tenant>(r.body.clone()).ok()
            })
            .await
            .into_iter()
            .find(|t| !t.is_deleted() && t.code == needle))
    }

    /// Apply caller edits. `expected_updated_at` is the `updatedAt` (ms)
    /// the caller read; a mismatch means someone got there first.
    pub async fn update(
        &self,
        tenant_id: &str,
        update: TenantUpdate,
        expected_updated_at: i64,
    ) -> Result<Tenant, ServiceError> {
        let mut tenant = self.find(tenant_id).await?;

        if let Some(name) = update.name {
            tenant.name = name;
        }
        if let Some(mode) = update.mode {
            if mode.is_satellite() && !tenant.mode.is_satellite() {
                tenant.satellite_status = Some(SatelliteStatus::Initializing);
            }
            tenant.mode = mode;
        }
        if let Some(services) = update.services {
            tenant.services = services;
        }
        if let Some(admins) = update.admins {
            tenant.admins = admins;
        }
        tenant.updated_at = Utc::now();

        self.docs
            .update_checked(&tenant, expected_updated_at)
            .await?;
        Ok(tenant)
    }

    /// Soft delete; the row stays for sync history.
    pub async fn delete(&self, tenant_id: &str) -> Result<(), ServiceError> {
        let mut tenant = self.find(tenant_id).await?;
        let expected = tenant.updated_at.timestamp_millis();
        let now = Utc::now();
        tenant.deleted_at = Some(now);
        tenant.updated_at = now;
        self.docs.update_checked(&tenant, expected).await?;
        tracing::info!(tenant_id, "tenant deleted");
        Ok(())
    }

    /// Status transitions are service-driven, so they bypass the optimistic
    /// check. Re-recording the current status is a no-op: it must not bump
    /// `updatedAt`, or steady-state sync would ship the tenant document on
    /// every exchange.
    pub async fn record_satellite_status(
        &self,
        tenant_id: &str,
        status: SatelliteStatus,
    ) -> Result<(), ServiceError> {
        let mut tenant = self.find(tenant_id).await?;
        if !tenant.mode.is_satellite() {
            return Err(ServiceError::Validation(
                "tenant is not in satellite mode".to_string(),
            ));
        }
        if tenant.satellite_status == Some(status) {
            return Ok(());
        }
        tenant.satellite_status = Some(status);
        tenant.updated_at = Utc::now();
        self.docs.put(&tenant).await?;
        Ok(())
    }

    pub async fn resolve_services(&self, tenant_id: &str) -> Result<Vec<TenantService>, ServiceError> {
        Ok(self.find(tenant_id).await?.services)
    }
}
