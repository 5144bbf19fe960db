//! Configuration management for the Gantry server
//!
//! Values come from `conf/application.yml`, then `GANTRY__*` environment
//! variables (`GANTRY__SYNC__INTERVAL_SECS` sets `sync.interval_secs`), then
//! command line flags.

use std::time::Duration;

use clap::Parser;
use config::{Config, Environment};
use gantry_common::{EtcdConfig, GatewayInfo};
use gantry_core::SyncSettings;
use gantry_etcd::{ElectionOptions, EtcdClientOptions};
use gantry_persistence::StorageMode;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use serde::Deserialize;

use crate::startup::LoggingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";

/// Command line arguments for the server
#[derive(Debug, Default, Parser)]
#[command(name = "gantry-server", version, about = "APISIX control plane")]
pub struct Cli {
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,
    #[arg(short = 's', long = "storage-mode")]
    pub storage_mode: Option<String>,
    #[arg(long = "db-url", env = "DATABASE_URL")]
    pub database_url: Option<String>,
    #[arg(long = "log-dir")]
    pub log_dir: Option<String>,
}

/// Gateway declared in the configuration file, registered on startup when no
/// gateway with the same name exists yet.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySeed {
    pub name: String,
    #[serde(default = "default_apisix_type")]
    pub apisix_type: String,
    pub apisix_version: String,
    pub etcd: EtcdConfig,
    #[serde(default)]
    pub read_only: bool,
}

fn default_apisix_type() -> String {
    "apisix".to_string()
}

impl GatewaySeed {
    pub fn to_gateway(&self) -> GatewayInfo {
        GatewayInfo {
            id: 0,
            name: self.name.clone(),
            apisix_type: self.apisix_type.clone(),
            apisix_version: self.apisix_version.clone(),
            etcd: self.etcd.clone(),
            read_only: self.read_only,
            last_synced_at: None,
        }
    }
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn new() -> anyhow::Result<Self> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(args: Cli) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .add_source(config::File::with_name(&args.config).required(false))
            .add_source(
                Environment::with_prefix("gantry")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(v) = args.storage_mode {
            builder = builder.set_override("storage.mode", v)?;
        }
        if let Some(v) = args.database_url {
            builder = builder.set_override("db.url", v)?;
        }
        if let Some(v) = args.log_dir {
            builder = builder.set_override("logs.dir", v)?;
        }

        Ok(Configuration {
            config: builder.build()?,
        })
    }

    // ========================================================================
    // Storage Configuration
    // ========================================================================

    pub fn storage_mode(&self) -> anyhow::Result<StorageMode> {
        match self.config.get_string("storage.mode") {
            Ok(mode) => mode.parse().map_err(anyhow::Error::msg),
            Err(_) => Ok(StorageMode::ExternalDb),
        }
    }

    pub fn database_url(&self) -> Option<String> {
        self.config.get_string("db.url").ok()
    }

    /// Create the tables on startup when they do not exist.
    pub fn db_auto_migrate(&self) -> bool {
        self.config.get_bool("db.auto_migrate").unwrap_or(false)
    }

    pub async fn database_connection(&self) -> anyhow::Result<DatabaseConnection> {
        let url = self
            .database_url()
            .ok_or_else(|| anyhow::anyhow!("db.url is required for external_db storage"))?;
        let max_connections = self
            .config
            .get_int("db.pool.max_connections")
            .unwrap_or(20) as u32;
        let min_connections = self
            .config
            .get_int("db.pool.min_connections")
            .unwrap_or(1) as u32;
        let connect_timeout = self
            .config
            .get_int("db.pool.connect_timeout_secs")
            .unwrap_or(30) as u64;
        let idle_timeout = self
            .config
            .get_int("db.pool.idle_timeout_secs")
            .unwrap_or(600) as u64;
        let max_lifetime = self
            .config
            .get_int("db.pool.max_lifetime_secs")
            .unwrap_or(1800) as u64;
        let sqlx_logging = self
            .config
            .get_bool("db.pool.sqlx_logging")
            .unwrap_or(false);

        let mut opt = ConnectOptions::new(url);
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .idle_timeout(Duration::from_secs(idle_timeout))
            .max_lifetime(Duration::from_secs(max_lifetime))
            .sqlx_logging(sqlx_logging);

        tracing::info!(
            max_connections,
            min_connections,
            connect_timeout,
            idle_timeout,
            max_lifetime,
            "Database connection pool configured"
        );

        Ok(Database::connect(opt).await?)
    }

    // ========================================================================
    // Sync Configuration
    // ========================================================================

    pub fn sync_settings(&self) -> SyncSettings {
        let defaults = SyncSettings::default();
        SyncSettings {
            interval: self
                .duration_secs("sync.interval_secs")
                .unwrap_or(defaults.interval),
            jitter_max: self
                .duration_secs("sync.jitter_max_secs")
                .unwrap_or(defaults.jitter_max),
            debounce: self
                .duration_millis("sync.debounce_ms")
                .unwrap_or(defaults.debounce),
        }
    }

    // ========================================================================
    // etcd Configuration
    // ========================================================================

    pub fn etcd_client_options(&self) -> EtcdClientOptions {
        let defaults = EtcdClientOptions::default();
        EtcdClientOptions {
            dial_timeout: self
                .duration_millis("etcd.dial_timeout_ms")
                .unwrap_or(defaults.dial_timeout),
            request_timeout: self
                .duration_millis("etcd.txn_timeout_ms")
                .unwrap_or(defaults.request_timeout),
        }
    }

    pub fn election_options(&self) -> ElectionOptions {
        let defaults = ElectionOptions::default();
        ElectionOptions {
            lease_ttl: self
                .config
                .get_int("election.lease_ttl_secs")
                .unwrap_or(defaults.lease_ttl),
            retry_delay: self
                .duration_secs("election.retry_delay_secs")
                .unwrap_or(defaults.retry_delay),
        }
    }

    pub fn gateways(&self) -> anyhow::Result<Vec<GatewaySeed>> {
        match self.config.get::<Vec<GatewaySeed>>("gateways") {
            Ok(seeds) => Ok(seeds),
            Err(config::ConfigError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.config.get_string("logs.dir").ok(),
            self.config.get_bool("logs.console").unwrap_or(true),
            self.config.get_bool("logs.file").unwrap_or(true),
            self.config
                .get_string("logs.level")
                .unwrap_or_else(|_| "info".to_string()),
        )
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.duration_secs("server.shutdown_grace_secs")
            .unwrap_or(Duration::from_secs(5))
    }

    fn duration_secs(&self, key: &str) -> Option<Duration> {
        self.config
            .get_int(key)
            .ok()
            .map(|v| Duration::from_secs(v.max(0) as u64))
    }

    fn duration_millis(&self, key: &str) -> Option<Duration> {
        self.config
            .get_int(key)
            .ok()
            .map(|v| Duration::from_millis(v.max(0) as u64))
    }
}
