use std::time::Duration;

use kube::Client;
use log::warn;
use serde::Deserialize;

pub mod backup;
pub mod controller;
pub mod crd;
pub mod deletion;
pub mod errors;
pub mod metrics;
pub mod updater;
pub mod utils;
pub mod views;

pub use crd::etcd_cluster::EtcdCluster;
pub use deletion::{DeletionWaiter, StorageCheckerOptions, WaitConfig};
pub use errors::{Error, Result};
pub use updater::{atomic_update, atomic_update_status, ClusterKey, ClusterStore, UpdateConfig};

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EtcdEnvironmentConfig {
    pub server_host: String,
    pub server_port: u16,
    /// Restrict the controller to one namespace; all namespaces when unset.
    pub watch_namespace: Option<String>,
    pub default_s3_bucket: String,
    pub update_max_retries: u32,
    pub update_retry_delay_ms: u64,
    /// Bound for one update including its retries; unbounded when unset.
    pub update_deadline_secs: Option<u64>,
    pub deletion_poll_interval_secs: u64,
    pub deletion_timeout_secs: u64,
    /// Wait for dependents to be removed from the API instead of only marked for deletion.
    pub deletion_require_removed: bool,
}

impl Default for EtcdEnvironmentConfig {
    fn default() -> Self {
        EtcdEnvironmentConfig {
            server_host: "0.0.0.0".to_owned(),
            server_port: 8888,
            watch_namespace: None,
            default_s3_bucket: String::new(),
            update_max_retries: 5,
            update_retry_delay_ms: 1000,
            update_deadline_secs: None,
            deletion_poll_interval_secs: 5,
            deletion_timeout_secs: 150,
            deletion_require_removed: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub namespace: Option<String>,
    pub update: UpdateConfig,
    pub wait: WaitConfig,
    pub storage: StorageCheckerOptions,
}

impl Config {
    pub fn from_env_config(env_config: EtcdEnvironmentConfig) -> Result<Self> {
        if env_config.update_max_retries == 0 {
            return Err(Error::InvalidConfig("UPDATE_MAX_RETRIES should be > 0".to_owned()));
        }
        if env_config.update_deadline_secs == Some(0) {
            return Err(Error::InvalidConfig("UPDATE_DEADLINE_SECS should be > 0".to_owned()));
        }
        if env_config.deletion_poll_interval_secs == 0 {
            return Err(Error::InvalidConfig("DELETION_POLL_INTERVAL_SECS should be > 0".to_owned()));
        }
        if env_config.deletion_timeout_secs < env_config.deletion_poll_interval_secs {
            warn!("DELETION_TIMEOUT_SECS is shorter than one poll interval, deletions will be checked once");
        }
        let namespace = env_config.watch_namespace.filter(|ns| !ns.is_empty());
        Ok(Config {
            server_host: env_config.server_host,
            server_port: env_config.server_port,
            namespace,
            update: UpdateConfig {
                max_retries: env_config.update_max_retries,
                retry_delay: Duration::from_millis(env_config.update_retry_delay_ms),
                deadline: env_config.update_deadline_secs.map(Duration::from_secs),
            },
            wait: WaitConfig {
                poll_interval: Duration::from_secs(env_config.deletion_poll_interval_secs),
                timeout: Duration::from_secs(env_config.deletion_timeout_secs),
            },
            storage: StorageCheckerOptions {
                default_bucket: env_config.default_s3_bucket,
                deleted_from_api: env_config.deletion_require_removed,
                verify_backups: false,
            },
        })
    }
}

/// Start reconciling `EtcdCluster`s; the returned future runs until the watch ends.
pub async fn init_controller(client: Client, config: Config) {
    controller::run_controller(client, config).await
}
