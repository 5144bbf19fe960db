//! Shared fixtures for unit tests.

use std::sync::Arc;

use chrono::Utc;
use gantry_common::{EtcdConfig, GatewayInfo, ResourceKind, ResourceStatus};
use gantry_etcd::{MemoryEtcdConnector, MemoryEtcdStore};
use gantry_persistence::{
    DraftChangeSet, DraftFilter, DraftRow, GatewayPersistence, MemoryPersistService,
    ResourcePersistence,
};
use serde_json::Value;

use crate::context::GatewayContext;
use crate::document::ResourceDocument;
use crate::registry::capability;
use crate::scheduler::ResyncHandle;
use crate::service::{GatewayRuntime, GatewayScope};

pub fn gateway_info() -> GatewayInfo {
    GatewayInfo {
        id: 0,
        name: "gw-test".to_string(),
        apisix_type: "apisix".to_string(),
        apisix_version: "3.11.X".to_string(),
        etcd: EtcdConfig {
            endpoints: vec!["127.0.0.1:2379".to_string()],
            prefix: "/apisix".to_string(),
            ..Default::default()
        },
        read_only: false,
        last_synced_at: None,
    }
}

pub struct Fixture {
    pub persistence: Arc<MemoryPersistService>,
    pub etcd: Arc<MemoryEtcdStore>,
    pub gateway: GatewayInfo,
    runtime: Arc<GatewayRuntime>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_gateway(gateway_info()).await
    }

    pub async fn with_gateway(mut gateway: GatewayInfo) -> Self {
        let persistence = Arc::new(MemoryPersistService::new());
        let etcd = Arc::new(MemoryEtcdStore::new());
        gateway.id = persistence.gateway_create(&gateway, "admin").await.unwrap();
        let runtime = Arc::new(GatewayRuntime::new(
            persistence.clone(),
            Arc::new(MemoryEtcdConnector::new(etcd.clone())),
        ));
        Self {
            persistence,
            etcd,
            gateway,
            runtime,
        }
    }

    pub fn runtime(&self) -> Arc<GatewayRuntime> {
        self.runtime.clone()
    }

    pub fn context(&self) -> GatewayContext {
        GatewayContext::new(self.gateway.clone(), "admin")
    }

    pub fn scope(&self) -> GatewayScope {
        self.scope_with(ResyncHandle::disabled())
    }

    pub fn scope_with(&self, resync: ResyncHandle) -> GatewayScope {
        GatewayScope::new(
            self.context(),
            self.persistence.clone(),
            self.etcd.clone(),
            resync,
        )
    }

    pub fn draft_row(
        &self,
        kind: ResourceKind,
        id: &str,
        config: &str,
        status: ResourceStatus,
    ) -> DraftRow {
        let doc = ResourceDocument::parse(config).unwrap();
        capability(kind)
            .to_draft_row(
                self.gateway.id,
                id,
                &doc,
                status,
                "admin",
                Utc::now().naive_utc(),
            )
            .unwrap()
    }

    /// Inserts a draft row directly, bypassing the state machine.
    pub async fn insert_draft(
        &self,
        kind: ResourceKind,
        id: &str,
        config: &str,
        status: ResourceStatus,
    ) -> DraftRow {
        let row = self.draft_row(kind, id, config, status);
        self.persistence
            .resource_apply(
                self.gateway.id,
                kind,
                DraftChangeSet {
                    inserts: vec![row.clone()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        row
    }

    pub async fn find_draft(&self, kind: ResourceKind, id: &str) -> Option<DraftRow> {
        self.persistence
            .resource_find(
                self.gateway.id,
                kind,
                &DraftFilter::by_ids(&[id.to_string()]),
            )
            .await
            .unwrap()
            .pop()
    }

    pub fn etcd_json(&self, key: &str) -> Option<Value> {
        self.etcd
            .value(key)
            .map(|raw| serde_json::from_str(&raw).unwrap())
    }
}
