use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, GetOptions, Txn, TxnOp};
use gantry_common::{EtcdConfig, GantryError, GatewayInfo, Result};
use tracing::{debug, warn};

use crate::store::{EtcdConnector, EtcdStore, KeyValue};
use crate::{PLACEHOLDER_VALUES, TXN_MAX_OPS};

#[derive(Debug, Clone)]
pub struct EtcdClientOptions {
    pub dial_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for EtcdClientOptions {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(2),
        }
    }
}

pub(crate) fn etcd_error(context: &str, err: etcd_client::Error) -> GantryError {
    GantryError::Etcd(format!("{}: {}", context, err))
}

/// [`EtcdStore`] backed by an etcd v3 cluster.
#[derive(Clone)]
pub struct EtcdV3Store {
    client: Client,
    request_timeout: Duration,
}

impl EtcdV3Store {
    pub async fn connect(config: &EtcdConfig, options: &EtcdClientOptions) -> Result<Self> {
        if config.endpoints.is_empty() {
            return Err(GantryError::Validation(
                "etcd endpoints must not be empty".to_string(),
            ));
        }

        let mut connect_options = ConnectOptions::new()
            .with_connect_timeout(options.dial_timeout)
            .with_timeout(options.request_timeout);
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            connect_options = connect_options.with_user(user.clone(), password.clone());
        }

        let client = Client::connect(config.endpoints.clone(), Some(connect_options))
            .await
            .map_err(|e| etcd_error("connect", e))?;

        Ok(Self {
            client,
            request_timeout: options.request_timeout,
        })
    }

    /// Underlying client, shared with the leader elector.
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    async fn run_txn(&self, ops: Vec<TxnOp>) -> Result<()> {
        let mut kv = self.client.kv_client();
        let txn = Txn::new().and_then(ops);
        let resp = tokio::time::timeout(self.request_timeout, kv.txn(txn))
            .await
            .map_err(|_| GantryError::Etcd("transaction timed out".to_string()))?
            .map_err(|e| etcd_error("txn", e))?;
        if !resp.succeeded() {
            return Err(GantryError::Etcd("transaction was not applied".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EtcdStore for EtcdV3Store {
    async fn list(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let mut kv = self.client.kv_client();
        let resp = tokio::time::timeout(
            self.request_timeout,
            kv.get(prefix, Some(GetOptions::new().with_prefix())),
        )
        .await
        .map_err(|_| GantryError::Etcd(format!("list '{}' timed out", prefix)))?
        .map_err(|e| etcd_error("list", e))?;

        let mut result = Vec::with_capacity(resp.kvs().len());
        for item in resp.kvs() {
            let (Ok(key), Ok(value)) = (item.key_str(), item.value_str()) else {
                warn!("Skipping non utf-8 etcd entry under {}", prefix);
                continue;
            };
            if PLACEHOLDER_VALUES.contains(&value) {
                continue;
            }
            result.push(KeyValue {
                key: key.to_string(),
                value: value.to_string(),
                mod_revision: item.mod_revision(),
            });
        }
        debug!("Listed {} keys under {}", result.len(), prefix);
        Ok(result)
    }

    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let mut kv = self.client.kv_client();
        let resp = tokio::time::timeout(self.request_timeout, kv.get(key, None))
            .await
            .map_err(|_| GantryError::Etcd(format!("get '{}' timed out", key)))?
            .map_err(|e| etcd_error("get", e))?;
        let Some(item) = resp.kvs().first() else {
            return Ok(None);
        };
        let value = item.value_str().map_err(|e| etcd_error("decode", e))?;
        Ok(Some(KeyValue {
            key: key.to_string(),
            value: value.to_string(),
            mod_revision: item.mod_revision(),
        }))
    }

    async fn batch_put(&self, entries: &[(String, String)]) -> Result<()> {
        for chunk in entries.chunks(TXN_MAX_OPS) {
            let ops = chunk
                .iter()
                .map(|(key, value)| TxnOp::put(key.as_str(), value.as_str(), None))
                .collect();
            self.run_txn(ops).await?;
            metrics::counter!("gantry_etcd_write_ops_total", "op" => "put")
                .increment(chunk.len() as u64);
        }
        Ok(())
    }

    async fn batch_delete(&self, keys: &[String]) -> Result<()> {
        for chunk in keys.chunks(TXN_MAX_OPS) {
            let ops = chunk
                .iter()
                .map(|key| TxnOp::delete(key.as_str(), None))
                .collect();
            self.run_txn(ops).await?;
            metrics::counter!("gantry_etcd_write_ops_total", "op" => "delete")
                .increment(chunk.len() as u64);
        }
        Ok(())
    }
}

/// Connects a fresh [`EtcdV3Store`] per gateway.
#[derive(Debug, Clone, Default)]
pub struct EtcdV3Connector {
    options: EtcdClientOptions,
}

impl EtcdV3Connector {
    pub fn new(options: EtcdClientOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl EtcdConnector for EtcdV3Connector {
    async fn connect(&self, gateway: &GatewayInfo) -> Result<Arc<dyn EtcdStore>> {
        let store = EtcdV3Store::connect(&gateway.etcd, &self.options).await?;
        Ok(Arc::new(store))
    }
}
