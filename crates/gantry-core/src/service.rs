//! Control-plane facade
//!
//! [`GatewayRuntime`] resolves gateways and their etcd stores;
//! [`ControlPlane`] binds a gateway and an operator into a [`GatewayScope`]
//! from which every engine is reached.

use std::sync::Arc;

use dashmap::DashMap;
use gantry_common::{EtcdConfig, GantryError, GatewayInfo, Result};
use gantry_etcd::{EtcdConnector, EtcdStore};
use gantry_persistence::{
    AuditLogFilter, AuditLogRecord, GatewayPersistence, Page, PersistenceService,
};
use tracing::info;

use crate::adopt::Adopter;
use crate::audit::AuditLogger;
use crate::context::GatewayContext;
use crate::diff::DiffEngine;
use crate::draft::DraftService;
use crate::import::Importer;
use crate::publish::PublishPipeline;
use crate::reconcile::Reconciler;
use crate::revert::RevertEngine;
use crate::scheduler::ResyncHandle;

/// Shared storage handles, one per process.
pub struct GatewayRuntime {
    persistence: Arc<dyn PersistenceService>,
    connector: Arc<dyn EtcdConnector>,
    stores: DashMap<i64, (EtcdConfig, Arc<dyn EtcdStore>)>,
}

impl GatewayRuntime {
    pub fn new(persistence: Arc<dyn PersistenceService>, connector: Arc<dyn EtcdConnector>) -> Self {
        Self {
            persistence,
            connector,
            stores: DashMap::new(),
        }
    }

    pub fn persistence(&self) -> &Arc<dyn PersistenceService> {
        &self.persistence
    }

    pub async fn gateway(&self, gateway_id: i64) -> Result<GatewayInfo> {
        self.persistence
            .gateway_find(gateway_id)
            .await?
            .ok_or_else(|| GantryError::gateway_not_found(gateway_id))
    }

    /// The gateway's etcd store, reconnecting when its settings changed.
    pub async fn etcd(&self, gateway: &GatewayInfo) -> Result<Arc<dyn EtcdStore>> {
        if let Some(entry) = self.stores.get(&gateway.id)
            && entry.0 == gateway.etcd
        {
            return Ok(entry.1.clone());
        }
        let store = self.connector.connect(gateway).await?;
        info!(gateway = %gateway.name, endpoints = ?gateway.etcd.endpoints, "Connected to etcd");
        self.stores
            .insert(gateway.id, (gateway.etcd.clone(), store.clone()));
        Ok(store)
    }

    pub async fn scope(
        &self,
        gateway_id: i64,
        operator: &str,
        resync: ResyncHandle,
    ) -> Result<GatewayScope> {
        let gateway = self.gateway(gateway_id).await?;
        let etcd = self.etcd(&gateway).await?;
        Ok(GatewayScope::new(
            GatewayContext::new(gateway, operator),
            self.persistence.clone(),
            etcd,
            resync,
        ))
    }
}

/// Entry point used by the REST layer.
#[derive(Clone)]
pub struct ControlPlane {
    runtime: Arc<GatewayRuntime>,
    resync: ResyncHandle,
}

impl ControlPlane {
    pub fn new(runtime: Arc<GatewayRuntime>, resync: ResyncHandle) -> Self {
        Self { runtime, resync }
    }

    pub fn runtime(&self) -> &Arc<GatewayRuntime> {
        &self.runtime
    }

    pub async fn register_gateway(&self, gateway: &GatewayInfo, operator: &str) -> Result<i64> {
        if gateway.name.trim().is_empty() {
            return Err(GantryError::Validation("gateway name is required".to_string()));
        }
        if gateway.etcd.endpoints.is_empty() {
            return Err(GantryError::Validation(
                "gateway etcd endpoints are required".to_string(),
            ));
        }
        let id = self
            .runtime
            .persistence()
            .gateway_create(gateway, operator)
            .await?;
        info!(gateway = %gateway.name, id, "Registered gateway");
        Ok(id)
    }

    pub async fn scope(&self, gateway_id: i64, operator: &str) -> Result<GatewayScope> {
        self.runtime
            .scope(gateway_id, operator, self.resync.clone())
            .await
    }

    pub async fn search_audit_logs(
        &self,
        gateway_id: i64,
        filter: &AuditLogFilter,
        page_no: u64,
        page_size: u64,
    ) -> Result<Page<AuditLogRecord>> {
        AuditLogger::new(self.runtime.persistence().clone())
            .search(gateway_id, filter, page_no, page_size)
            .await
    }
}

/// One operator acting on one gateway.
pub struct GatewayScope {
    pub(crate) ctx: GatewayContext,
    pub(crate) persistence: Arc<dyn PersistenceService>,
    pub(crate) etcd: Arc<dyn EtcdStore>,
    pub(crate) resync: ResyncHandle,
}

impl GatewayScope {
    pub fn new(
        ctx: GatewayContext,
        persistence: Arc<dyn PersistenceService>,
        etcd: Arc<dyn EtcdStore>,
        resync: ResyncHandle,
    ) -> Self {
        Self {
            ctx,
            persistence,
            etcd,
            resync,
        }
    }

    pub fn context(&self) -> &GatewayContext {
        &self.ctx
    }

    pub fn gateway(&self) -> &GatewayInfo {
        &self.ctx.gateway
    }

    pub fn drafts(&self) -> DraftService<'_> {
        DraftService::new(self)
    }

    pub fn publisher(&self) -> PublishPipeline<'_> {
        PublishPipeline::new(self)
    }

    pub fn diff(&self) -> DiffEngine<'_> {
        DiffEngine::new(self)
    }

    pub fn reverter(&self) -> RevertEngine<'_> {
        RevertEngine::new(self)
    }

    pub fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::new(self.gateway(), self.persistence.as_ref(), self.etcd.as_ref())
    }

    pub fn adopter(&self) -> Adopter<'_> {
        Adopter::new(self)
    }

    pub fn importer(&self) -> Importer<'_> {
        Importer::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_etcd::{MemoryEtcdConnector, MemoryEtcdStore};
    use gantry_persistence::MemoryPersistService;

    use crate::testing::gateway_info;

    #[tokio::test]
    async fn test_scope_requires_known_gateway() {
        let runtime = GatewayRuntime::new(
            Arc::new(MemoryPersistService::new()),
            Arc::new(MemoryEtcdConnector::new(Arc::new(MemoryEtcdStore::new()))),
        );
        let plane = ControlPlane::new(Arc::new(runtime), ResyncHandle::disabled());
        let err = plane.scope(42, "admin").await.err().unwrap();
        assert!(matches!(err, GantryError::NotFound { .. }));

        let id = plane.register_gateway(&gateway_info(), "admin").await.unwrap();
        let scope = plane.scope(id, "admin").await.unwrap();
        assert_eq!(scope.gateway().id, id);
        assert_eq!(scope.context().operator, "admin");
    }

    #[tokio::test]
    async fn test_register_rejects_missing_endpoints() {
        let runtime = GatewayRuntime::new(
            Arc::new(MemoryPersistService::new()),
            Arc::new(MemoryEtcdConnector::new(Arc::new(MemoryEtcdStore::new()))),
        );
        let plane = ControlPlane::new(Arc::new(runtime), ResyncHandle::disabled());
        let mut gateway = gateway_info();
        gateway.etcd.endpoints.clear();
        assert!(matches!(
            plane.register_gateway(&gateway, "admin").await,
            Err(GantryError::Validation(_))
        ));
    }
}
