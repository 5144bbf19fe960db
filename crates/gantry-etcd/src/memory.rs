use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use gantry_common::{GantryError, GatewayInfo, Result};
use parking_lot::RwLock;

use crate::store::{EtcdConnector, EtcdStore, KeyValue};
use crate::{PLACEHOLDER_VALUES, TXN_MAX_OPS};

#[derive(Default)]
struct Keyspace {
    revision: i64,
    entries: BTreeMap<String, (String, i64)>,
}

/// In-process [`EtcdStore`].
///
/// Every transaction bumps a global revision that becomes the mod revision of
/// the keys it wrote, like etcd.
#[derive(Default)]
pub struct MemoryEtcdStore {
    keyspace: RwLock<Keyspace>,
    writes: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryEtcdStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a key outside the write counter; used to seed state.
    pub fn seed(&self, key: &str, value: &str) -> i64 {
        let mut keyspace = self.keyspace.write();
        keyspace.revision += 1;
        let revision = keyspace.revision;
        keyspace
            .entries
            .insert(key.to_string(), (value.to_string(), revision));
        revision
    }

    /// Removes a key outside the write counter.
    pub fn remove(&self, key: &str) -> bool {
        let mut keyspace = self.keyspace.write();
        keyspace.revision += 1;
        keyspace.entries.remove(key).is_some()
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.keyspace
            .read()
            .entries
            .get(key)
            .map(|(value, _)| value.clone())
    }

    /// Number of keys written or deleted through [`EtcdStore`].
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes every call fail like an unreachable cluster.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GantryError::Etcd("etcd cluster unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EtcdStore for MemoryEtcdStore {
    async fn list(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        self.check_available()?;
        let keyspace = self.keyspace.read();
        Ok(keyspace
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, (value, _))| !PLACEHOLDER_VALUES.contains(&value.as_str()))
            .map(|(key, (value, revision))| KeyValue {
                key: key.clone(),
                value: value.clone(),
                mod_revision: *revision,
            })
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        self.check_available()?;
        Ok(self
            .keyspace
            .read()
            .entries
            .get(key)
            .map(|(value, revision)| KeyValue {
                key: key.to_string(),
                value: value.clone(),
                mod_revision: *revision,
            }))
    }

    async fn batch_put(&self, entries: &[(String, String)]) -> Result<()> {
        self.check_available()?;
        let mut keyspace = self.keyspace.write();
        for chunk in entries.chunks(TXN_MAX_OPS) {
            keyspace.revision += 1;
            let revision = keyspace.revision;
            for (key, value) in chunk {
                keyspace
                    .entries
                    .insert(key.clone(), (value.clone(), revision));
            }
        }
        self.writes
            .fetch_add(entries.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    async fn batch_delete(&self, keys: &[String]) -> Result<()> {
        self.check_available()?;
        let mut keyspace = self.keyspace.write();
        for chunk in keys.chunks(TXN_MAX_OPS) {
            keyspace.revision += 1;
            for key in chunk {
                keyspace.entries.remove(key);
            }
        }
        self.writes.fetch_add(keys.len() as u64, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands every gateway the same in-memory store.
#[derive(Clone)]
pub struct MemoryEtcdConnector {
    store: Arc<MemoryEtcdStore>,
}

impl MemoryEtcdConnector {
    pub fn new(store: Arc<MemoryEtcdStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EtcdConnector for MemoryEtcdConnector {
    async fn connect(&self, _gateway: &GatewayInfo) -> Result<Arc<dyn EtcdStore>> {
        self.store.check_available()?;
        Ok(self.store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_skips_placeholders() {
        let store = MemoryEtcdStore::new();
        store.seed("/apisix/routes", "init_dir");
        store.seed("/apisix/routes/r1", r#"{"uri":"/a"}"#);
        store.seed("/apisix/upstreams/u1", "{}");
        store.seed("/apisix2/routes/r9", r#"{"uri":"/z"}"#);

        let kvs = store.list("/apisix/").await.unwrap();
        assert_eq!(kvs.len(), 1);
        assert_eq!(kvs[0].key, "/apisix/routes/r1");
    }

    #[tokio::test]
    async fn test_revisions_advance_per_write() {
        let store = MemoryEtcdStore::new();
        store
            .batch_put(&[("/p/routes/a".to_string(), "{\"x\":1}".to_string())])
            .await
            .unwrap();
        let first = store.get("/p/routes/a").await.unwrap().unwrap().mod_revision;
        store
            .batch_put(&[("/p/routes/a".to_string(), "{\"x\":2}".to_string())])
            .await
            .unwrap();
        let second = store.get("/p/routes/a").await.unwrap().unwrap().mod_revision;
        assert!(second > first);
        assert_eq!(store.write_count(), 2);

        store.batch_delete(&["/p/routes/a".to_string()]).await.unwrap();
        assert!(store.get("/p/routes/a").await.unwrap().is_none());
        assert_eq!(store.write_count(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails() {
        let store = MemoryEtcdStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.list("/").await, Err(GantryError::Etcd(_))));
        assert!(store.batch_put(&[]).await.is_err());
    }
}
