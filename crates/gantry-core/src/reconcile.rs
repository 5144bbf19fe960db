//! etcd to snapshot reconciliation
//!
//! The snapshot table mirrors what etcd holds for a gateway. Each run lists
//! the keyspace, canonicalizes every value into the shape draft rows use, and
//! applies the inserts, revision-gated updates and deletions in one
//! transaction together with the gateway's `last_synced_at`.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use gantry_common::{GantryError, GatewayInfo, ResourceKind, Result};
use gantry_etcd::keys::covered_kinds;
use gantry_etcd::{EtcdStore, KeyValue, parse_resource_key};
use gantry_persistence::{
    DraftFilter, DraftRow, PersistenceService, ResourcePersistence, SyncChangeSet,
    SyncDataPersistence, SyncDataRow,
};
use metrics::counter;
use serde::Serialize;
use tracing::{info, warn};

use crate::document::ResourceDocument;
use crate::registry::capability;

/// Counts of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// Resources seen for the first time, per kind.
    pub new_resources: BTreeMap<ResourceKind, usize>,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SyncOutcome {
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// One etcd resource in canonical form.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedResource {
    pub kind: ResourceKind,
    pub id: String,
    pub key: String,
    pub name: String,
    pub config: String,
    pub mod_revision: i64,
}

impl SyncedResource {
    pub fn document(&self) -> Result<ResourceDocument> {
        ResourceDocument::parse(&self.config)
    }
}

/// `{segment}_{key}`, the name given to etcd resources that carry none.
pub(crate) fn fallback_name(kind: ResourceKind, key: &str) -> String {
    format!("{}_{}", kind.etcd_segment(), key)
}

struct Canonicalizer<'a> {
    gateway: &'a GatewayInfo,
    snapshot: &'a [SyncDataRow],
    drafts: HashMap<ResourceKind, Vec<DraftRow>>,
}

impl<'a> Canonicalizer<'a> {
    async fn load(
        gateway: &'a GatewayInfo,
        persistence: &dyn PersistenceService,
        snapshot: &'a [SyncDataRow],
        kinds: &HashSet<ResourceKind>,
    ) -> Result<Self> {
        let mut drafts = HashMap::new();
        for kind in kinds {
            let rows = persistence
                .resource_find(gateway.id, *kind, &DraftFilter::all())
                .await?;
            drafts.insert(*kind, rows);
        }
        Ok(Self {
            gateway,
            snapshot,
            drafts,
        })
    }

    fn draft(&self, kind: ResourceKind, id: &str) -> Option<&DraftRow> {
        self.drafts.get(&kind)?.iter().find(|row| row.id == id)
    }

    /// Draft ID for a plugin's metadata: the draft row with that name, else
    /// the snapshot row already holding it, else a fresh one.
    fn plugin_metadata_id(&self, plugin: &str) -> String {
        if let Some(row) = self
            .drafts
            .get(&ResourceKind::PluginMetadata)
            .and_then(|rows| rows.iter().find(|row| row.name == plugin))
        {
            return row.id.clone();
        }
        self.snapshot
            .iter()
            .filter(|row| row.kind == ResourceKind::PluginMetadata)
            .find(|row| {
                ResourceDocument::parse(&row.config)
                    .is_ok_and(|doc| doc.name.as_deref() == Some(plugin))
            })
            .map(|row| row.id.clone())
            .unwrap_or_else(|| ResourceKind::PluginMetadata.generate_id())
    }

    fn canonicalize(&self, kind: ResourceKind, key: String, kv: &KeyValue) -> Option<SyncedResource> {
        let mut doc = match ResourceDocument::parse(&kv.value) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(key = %kv.key, error = %e, "Skipping etcd value that is not a JSON object");
                return None;
            }
        };
        doc.strip_timestamps();

        let id = match kind {
            ResourceKind::PluginMetadata => {
                doc.id = None;
                doc.name = Some(key.clone());
                self.plugin_metadata_id(&key)
            }
            _ => {
                if doc.id.is_none() && kind.supports_field("id", self.gateway.version()) {
                    doc.id = Some(key.clone());
                }
                key.clone()
            }
        };

        let cap = capability(kind);
        cap.enrich(&mut doc, self.draft(kind, &id));
        let name = match cap.name_of(&doc) {
            Some(name) => name.to_string(),
            None => {
                let name = fallback_name(kind, &key);
                doc.set_display_name(kind, name.clone());
                name
            }
        };
        let config = match doc.to_json() {
            Ok(config) => config,
            Err(e) => {
                warn!(key = %kv.key, error = %e, "Skipping etcd value that cannot be re-encoded");
                return None;
            }
        };
        Some(SyncedResource {
            kind,
            id,
            key,
            name,
            config,
            mod_revision: kv.mod_revision,
        })
    }
}

pub struct Reconciler<'a> {
    gateway: &'a GatewayInfo,
    persistence: &'a dyn PersistenceService,
    etcd: &'a dyn EtcdStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        gateway: &'a GatewayInfo,
        persistence: &'a dyn PersistenceService,
        etcd: &'a dyn EtcdStore,
    ) -> Self {
        Self {
            gateway,
            persistence,
            etcd,
        }
    }

    /// The normalized prefix and the kinds it covers.
    fn checked_prefix(&self, prefix: &str) -> Result<(String, Vec<ResourceKind>)> {
        let base = self.gateway.etcd_prefix();
        let covered = covered_kinds(&base, prefix).map_err(|e| {
            GantryError::Validation(format!("invalid sync prefix for gateway '{}': {}", base, e))
        })?;
        Ok((prefix.trim_end_matches('/').to_string(), covered))
    }

    async fn fetch_with(&self, prefix: &str, snapshot: &[SyncDataRow]) -> Result<Vec<SyncedResource>> {
        let base = self.gateway.etcd_prefix();
        let kvs = self.etcd.list(&format!("{}/", prefix)).await?;

        let mut parsed = Vec::with_capacity(kvs.len());
        for kv in kvs {
            match parse_resource_key(&base, &kv.key) {
                Ok((kind, key)) => parsed.push((kind, key, kv)),
                Err(e) => warn!(gateway = %self.gateway.name, error = %e, "Skipping etcd key"),
            }
        }
        let kinds: HashSet<ResourceKind> = parsed.iter().map(|(kind, _, _)| *kind).collect();
        let canonicalizer = Canonicalizer::load(self.gateway, self.persistence, snapshot, &kinds).await?;

        Ok(parsed
            .into_iter()
            .filter_map(|(kind, key, kv)| canonicalizer.canonicalize(kind, key, &kv))
            .collect())
    }

    /// Canonical resources under `prefix` as etcd holds them now.
    pub async fn fetch(&self, prefix: &str) -> Result<Vec<SyncedResource>> {
        let (prefix, _) = self.checked_prefix(prefix)?;
        let snapshot = self.persistence.sync_data_find_all(self.gateway.id, None).await?;
        self.fetch_with(&prefix, &snapshot).await
    }

    /// Every resource of the gateway, without touching the snapshot table.
    pub async fn export_resources(&self) -> Result<Vec<SyncedResource>> {
        self.fetch(&self.gateway.etcd_prefix()).await
    }

    pub async fn sync(&self) -> Result<SyncOutcome> {
        self.sync_with_prefix(&self.gateway.etcd_prefix()).await
    }

    /// Reconciles the snapshot rows of the kinds `prefix` covers.
    pub async fn sync_with_prefix(&self, prefix: &str) -> Result<SyncOutcome> {
        let (prefix, covered) = self.checked_prefix(prefix)?;
        let gateway_id = self.gateway.id;
        let snapshot = self.persistence.sync_data_find_all(gateway_id, None).await?;
        let records = self.fetch_with(&prefix, &snapshot).await?;

        let existing: HashMap<(ResourceKind, &str), &SyncDataRow> = snapshot
            .iter()
            .map(|row| ((row.kind, row.id.as_str()), row))
            .collect();
        let now = Utc::now().naive_utc();
        let mut outcome = SyncOutcome::default();
        let mut changes = SyncChangeSet::default();
        let mut seen: HashSet<(ResourceKind, String)> = HashSet::new();

        for record in records {
            if !seen.insert((record.kind, record.id.clone())) {
                warn!(key = %record.key, id = %record.id, "Duplicate resource id in etcd listing");
                continue;
            }
            match existing.get(&(record.kind, record.id.as_str())).copied() {
                None => {
                    *outcome.new_resources.entry(record.kind).or_default() += 1;
                    changes.inserts.push(SyncDataRow {
                        id: record.id,
                        gateway_id,
                        kind: record.kind,
                        config: record.config,
                        mod_revision: record.mod_revision,
                        created_at: now,
                        updated_at: now,
                    });
                }
                Some(old) if old.mod_revision != record.mod_revision => {
                    changes.updates.push(SyncDataRow {
                        id: record.id,
                        gateway_id,
                        kind: record.kind,
                        config: record.config,
                        mod_revision: record.mod_revision,
                        created_at: old.created_at,
                        updated_at: now,
                    });
                }
                Some(_) => {}
            }
        }

        changes.deletes = snapshot
            .iter()
            .filter(|row| covered.contains(&row.kind))
            .filter(|row| !seen.contains(&(row.kind, row.id.clone())))
            .map(|row| (row.kind, row.id.clone()))
            .collect();

        outcome.inserted = changes.inserts.len();
        outcome.updated = changes.updates.len();
        outcome.deleted = changes.deletes.len();
        let writes = changes.len() as u64;

        self.persistence
            .sync_data_apply(gateway_id, changes, now)
            .await?;

        counter!("gantry_reconcile_writes_total", "gateway" => self.gateway.name.clone())
            .increment(writes);
        if outcome.is_noop() {
            info!(gateway = %self.gateway.name, %prefix, "Snapshot already up to date");
        } else {
            info!(
                gateway = %self.gateway.name,
                %prefix,
                inserted = outcome.inserted,
                updated = outcome.updated,
                deleted = outcome.deleted,
                "Reconciled snapshot"
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_common::ResourceStatus;

    use crate::testing::Fixture;

    async fn snapshot(fx: &Fixture) -> Vec<SyncDataRow> {
        fx.persistence.sync_data_find_all(fx.gateway.id, None).await.unwrap()
    }

    #[tokio::test]
    async fn test_sync_inserts_then_is_idempotent() {
        let fx = Fixture::new().await;
        fx.etcd.seed(
            "/apisix/routes/r1",
            r#"{"id":"r1","uri":"/a","create_time":1,"update_time":2}"#,
        );
        fx.etcd.seed("/apisix/upstreams/u1", r#"{"id":"u1","nodes":{}}"#);
        let scope = fx.scope();

        let first = scope.reconciler().sync().await.unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(first.new_resources[&ResourceKind::Route], 1);
        let rows = snapshot(&fx).await;
        let route = rows.iter().find(|r| r.id == "r1").unwrap();
        assert_eq!(route.config, r#"{"id":"r1","name":"routes_r1","uri":"/a"}"#);

        let writes = fx.persistence.sync_write_count();
        let second = scope.reconciler().sync().await.unwrap();
        assert!(second.is_noop());
        assert_eq!(fx.persistence.sync_write_count(), writes);

        let gateway = fx.runtime().gateway(fx.gateway.id).await.unwrap();
        assert!(gateway.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_sync_updates_on_revision_change_and_deletes_vanished() {
        let fx = Fixture::new().await;
        fx.etcd.seed("/apisix/routes/r1", r#"{"id":"r1","uri":"/a"}"#);
        fx.etcd.seed("/apisix/routes/r2", r#"{"id":"r2","uri":"/b"}"#);
        let scope = fx.scope();
        scope.reconciler().sync().await.unwrap();

        fx.etcd.seed("/apisix/routes/r1", r#"{"id":"r1","uri":"/changed"}"#);
        fx.etcd.remove("/apisix/routes/r2");
        let outcome = scope.reconciler().sync().await.unwrap();
        assert_eq!((outcome.inserted, outcome.updated, outcome.deleted), (0, 1, 1));

        let rows = snapshot(&fx).await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].config.contains("/changed"));
    }

    #[tokio::test]
    async fn test_malformed_keys_and_values_are_skipped() {
        let fx = Fixture::new().await;
        fx.etcd.seed("/apisix/routes/r1", r#"{"id":"r1"}"#);
        fx.etcd.seed("/apisix/routes/nested/r2", r#"{"id":"r2"}"#);
        fx.etcd.seed("/apisix/unknown/x", r#"{"id":"x"}"#);
        fx.etcd.seed("/apisix/routes/bad", "not json");
        fx.etcd.seed("/apisix/routes/", "init_dir");

        let outcome = fx.scope().reconciler().sync().await.unwrap();
        assert_eq!(outcome.inserted, 1);
    }

    #[tokio::test]
    async fn test_unreachable_etcd_fails() {
        let fx = Fixture::new().await;
        fx.etcd.set_unavailable(true);
        let err = fx.scope().reconciler().sync().await.unwrap_err();
        assert!(matches!(err, GantryError::Etcd(_)));
    }

    #[tokio::test]
    async fn test_narrow_prefix_only_deletes_covered_kinds() {
        let fx = Fixture::new().await;
        fx.etcd.seed("/apisix/routes/r1", r#"{"id":"r1"}"#);
        fx.etcd.seed("/apisix/services/s1", r#"{"id":"s1"}"#);
        let scope = fx.scope();
        scope.reconciler().sync().await.unwrap();

        fx.etcd.remove("/apisix/routes/r1");
        fx.etcd.remove("/apisix/services/s1");
        let outcome = scope
            .reconciler()
            .sync_with_prefix("/apisix/routes")
            .await
            .unwrap();
        assert_eq!(outcome.deleted, 1);
        let rows = snapshot(&fx).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, ResourceKind::Service);

        let outside = scope.reconciler().sync_with_prefix("/other").await;
        assert!(matches!(outside, Err(GantryError::Validation(_))));
    }

    #[tokio::test]
    async fn test_partial_segment_prefix_is_rejected() {
        let fx = Fixture::new().await;
        fx.etcd.seed("/apisix/routes/r1", r#"{"id":"r1"}"#);
        let scope = fx.scope();
        scope.reconciler().sync().await.unwrap();

        for prefix in ["/apisix/route", "/apisix/routes/r1", "/apisixx"] {
            let result = scope.reconciler().sync_with_prefix(prefix).await;
            assert!(matches!(result, Err(GantryError::Validation(_))), "{prefix}");
        }
        let rows = snapshot(&fx).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "r1");
    }

    #[tokio::test]
    async fn test_snapshot_matches_etcd_value() {
        let fx = Fixture::new().await;
        let raw = r#"{"id":"u1","name":"backend","nodes":{"10.0.0.1:80":1},"type":"roundrobin"}"#;
        fx.etcd.seed("/apisix/upstreams/u1", raw);
        fx.etcd.seed(
            "/apisix/services/s1",
            r#"{"id":"s1","name":"svc","upstream_id":"u1","create_time":10,"update_time":20}"#,
        );
        fx.scope().reconciler().sync().await.unwrap();

        let rows = snapshot(&fx).await;
        let upstream = rows.iter().find(|r| r.id == "u1").unwrap();
        assert_eq!(upstream.config, raw);
        let service = rows.iter().find(|r| r.id == "s1").unwrap();
        let mut live = fx.etcd_json("/apisix/services/s1").unwrap();
        let live_object = live.as_object_mut().unwrap();
        live_object.remove("create_time");
        live_object.remove("update_time");
        assert_eq!(serde_json::from_str::<serde_json::Value>(&service.config).unwrap(), live);
    }

    #[tokio::test]
    async fn test_plugin_metadata_ids_are_stable() {
        let fx = Fixture::new().await;
        fx.etcd.seed(
            "/apisix/plugin_metadata/limit-count",
            r#"{"id":"limit-count","log_format":{"host":"$host"}}"#,
        );
        let scope = fx.scope();
        scope.reconciler().sync().await.unwrap();
        let first = snapshot(&fx).await;
        assert_eq!(first.len(), 1);
        assert!(first[0].id.starts_with("bk.pm."));
        assert_eq!(
            first[0].config,
            r#"{"name":"limit-count","log_format":{"host":"$host"}}"#
        );

        fx.etcd.seed(
            "/apisix/plugin_metadata/limit-count",
            r#"{"id":"limit-count","log_format":{}}"#,
        );
        let outcome = scope.reconciler().sync().await.unwrap();
        assert_eq!((outcome.inserted, outcome.updated), (0, 1));
        assert_eq!(snapshot(&fx).await[0].id, first[0].id);
    }

    #[tokio::test]
    async fn test_plugin_metadata_reuses_draft_id() {
        let fx = Fixture::new().await;
        fx.insert_draft(
            ResourceKind::PluginMetadata,
            "bk.pm.draft",
            r#"{"name":"limit-count"}"#,
            ResourceStatus::Success,
        )
        .await;
        fx.etcd.seed("/apisix/plugin_metadata/limit-count", r#"{"id":"limit-count"}"#);
        fx.scope().reconciler().sync().await.unwrap();
        assert_eq!(snapshot(&fx).await[0].id, "bk.pm.draft");
    }

    #[tokio::test]
    async fn test_enrichment_and_name_fallback() {
        let fx = Fixture::new().await;
        fx.insert_draft(
            ResourceKind::GlobalRule,
            "gr1",
            r#"{"id":"gr1","name":"audit","plugins":{}}"#,
            ResourceStatus::Success,
        )
        .await;
        fx.etcd.seed("/apisix/global_rules/gr1", r#"{"id":"gr1","plugins":{}}"#);
        fx.etcd.seed("/apisix/routes/r9", r#"{"id":"r9"}"#);

        let resources = fx.scope().reconciler().export_resources().await.unwrap();
        let rule = resources.iter().find(|r| r.id == "gr1").unwrap();
        assert_eq!(rule.name, "audit");
        assert_eq!(rule.config, r#"{"id":"gr1","name":"audit","plugins":{}}"#);
        let route = resources.iter().find(|r| r.id == "r9").unwrap();
        assert_eq!(route.name, "routes_r9");
        assert_eq!(route.config, r#"{"id":"r9","name":"routes_r9"}"#);
        assert_eq!(fx.persistence.sync_write_count(), 0);
    }
}
