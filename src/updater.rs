use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use log::{debug, info, warn};
use thiserror::Error;

use crate::crd::EtcdCluster;
use crate::errors::{Error, Result};
use crate::metrics;

/// Identity of a cluster resource in the store.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClusterKey {
    pub namespace: String,
    pub name: String,
}

impl ClusterKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        ClusterKey {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        }
    }

    pub fn from_cluster(cluster: &EtcdCluster) -> Result<Self> {
        let name = cluster.metadata.name.as_deref().ok_or(Error::MissingKey(".metadata.name"))?;
        let namespace = cluster
            .metadata
            .namespace
            .as_deref()
            .ok_or(Error::MissingKey(".metadata.namespace"))?;
        Ok(ClusterKey::new(namespace, name))
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Store failures, split by how the update loop has to react to them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The resourceVersion sent with a write is no longer current.
    #[error("write conflicted with a concurrent update")]
    Conflict,

    #[error("resource not found")]
    NotFound,

    #[error("Kube API Error: {0}")]
    Api(#[source] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 409 => StoreError::Conflict,
            kube::Error::Api(ref resp) if resp.code == 404 => StoreError::NotFound,
            err => StoreError::Api(err),
        }
    }
}

/// Versioned storage of cluster resources.
///
/// `replace` and `replace_status` must only succeed when the
/// `metadata.resourceVersion` of the submitted object is still current.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get(&self, key: &ClusterKey) -> std::result::Result<EtcdCluster, StoreError>;

    async fn create(&self, key: &ClusterKey, cluster: &EtcdCluster) -> std::result::Result<EtcdCluster, StoreError>;

    async fn replace(&self, key: &ClusterKey, cluster: &EtcdCluster) -> std::result::Result<EtcdCluster, StoreError>;

    async fn replace_status(
        &self,
        key: &ClusterKey,
        cluster: &EtcdCluster,
    ) -> std::result::Result<EtcdCluster, StoreError>;

    async fn delete(&self, key: &ClusterKey) -> std::result::Result<(), StoreError>;
}

/// `ClusterStore` backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeClusterStore {
    client: Client,
}

impl KubeClusterStore {
    pub fn new(client: Client) -> Self {
        KubeClusterStore { client }
    }

    fn api(&self, key: &ClusterKey) -> Api<EtcdCluster> {
        Api::namespaced(self.client.clone(), &key.namespace)
    }
}

#[async_trait]
impl ClusterStore for KubeClusterStore {
    async fn get(&self, key: &ClusterKey) -> std::result::Result<EtcdCluster, StoreError> {
        Ok(self.api(key).get(&key.name).await?)
    }

    async fn create(&self, key: &ClusterKey, cluster: &EtcdCluster) -> std::result::Result<EtcdCluster, StoreError> {
        let created = self.api(key).create(&PostParams::default(), cluster).await?;
        info!("Created etcd cluster: {}", key);
        Ok(created)
    }

    async fn replace(&self, key: &ClusterKey, cluster: &EtcdCluster) -> std::result::Result<EtcdCluster, StoreError> {
        Ok(self.api(key).replace(&key.name, &PostParams::default(), cluster).await?)
    }

    async fn replace_status(
        &self,
        key: &ClusterKey,
        cluster: &EtcdCluster,
    ) -> std::result::Result<EtcdCluster, StoreError> {
        let data = serde_json::to_vec(cluster)?;
        Ok(self.api(key).replace_status(&key.name, &PostParams::default(), data).await?)
    }

    async fn delete(&self, key: &ClusterKey) -> std::result::Result<(), StoreError> {
        self.api(key).delete(&key.name, &DeleteParams::default()).await?;
        info!("Deleting etcd cluster: {}", key);
        Ok(())
    }
}

/// Retry budget of an optimistic update.
#[derive(Clone, Debug)]
pub struct UpdateConfig {
    /// Attempts before giving up on a resource that keeps conflicting.
    pub max_retries: u32,
    /// Pause between two attempts.
    pub retry_delay: Duration,
    /// Upper bound for the whole update, retries included.
    pub deadline: Option<Duration>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        UpdateConfig {
            max_retries: 5,
            retry_delay: Duration::from_secs(1),
            deadline: None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum UpdateTarget {
    Object,
    Status,
}

/// Fetch the cluster, apply `transform` and write it back conditioned on the
/// fetched resourceVersion, retrying from a fresh fetch on conflicts.
///
/// `transform` may run once per attempt, each time on a newer copy, so it
/// must not do I/O. An `Err` from it aborts the update.
pub async fn atomic_update<S, F>(store: &S, key: &ClusterKey, config: &UpdateConfig, transform: F) -> Result<EtcdCluster>
where
    S: ClusterStore + ?Sized,
    F: FnMut(&mut EtcdCluster) -> Result<()> + Send,
{
    run_update(store, key, config, UpdateTarget::Object, transform).await
}

/// Same as [`atomic_update`] but writes through the status subresource.
pub async fn atomic_update_status<S, F>(
    store: &S,
    key: &ClusterKey,
    config: &UpdateConfig,
    transform: F,
) -> Result<EtcdCluster>
where
    S: ClusterStore + ?Sized,
    F: FnMut(&mut EtcdCluster) -> Result<()> + Send,
{
    run_update(store, key, config, UpdateTarget::Status, transform).await
}

/// Update the cluster identified by an already fetched copy.
pub async fn update_cluster<S, F>(
    store: &S,
    cluster: &EtcdCluster,
    config: &UpdateConfig,
    transform: F,
) -> Result<EtcdCluster>
where
    S: ClusterStore + ?Sized,
    F: FnMut(&mut EtcdCluster) -> Result<()> + Send,
{
    let key = ClusterKey::from_cluster(cluster)?;
    atomic_update(store, &key, config, transform).await
}

async fn run_update<S, F>(
    store: &S,
    key: &ClusterKey,
    config: &UpdateConfig,
    target: UpdateTarget,
    transform: F,
) -> Result<EtcdCluster>
where
    S: ClusterStore + ?Sized,
    F: FnMut(&mut EtcdCluster) -> Result<()> + Send,
{
    let attempts = retry_on_conflict(store, key, config, target, transform);
    let result = match config.deadline {
        Some(budget) => match tokio::time::timeout(budget, attempts).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                cluster: key.clone(),
                budget,
            }),
        },
        None => attempts.await,
    };
    match &result {
        Ok(_) => metrics::update_finished("ok"),
        Err(err) => metrics::update_finished(err.kind()),
    }
    result
}

async fn retry_on_conflict<S, F>(
    store: &S,
    key: &ClusterKey,
    config: &UpdateConfig,
    target: UpdateTarget,
    mut transform: F,
) -> Result<EtcdCluster>
where
    S: ClusterStore + ?Sized,
    F: FnMut(&mut EtcdCluster) -> Result<()> + Send,
{
    let store_error = |source| Error::Store {
        cluster: key.clone(),
        source,
    };

    for attempt in 1..=config.max_retries {
        if attempt > 1 {
            tokio::time::sleep(config.retry_delay).await;
        }

        let mut cluster = store.get(key).await.map_err(store_error)?;
        transform(&mut cluster)?;

        let written = match target {
            UpdateTarget::Object => store.replace(key, &cluster).await,
            UpdateTarget::Status => store.replace_status(key, &cluster).await,
        };
        match written {
            Ok(updated) => {
                debug!(
                    "Updated {:?} of etcd cluster {} on attempt {}, resourceVersion: {:?}",
                    target, key, attempt, updated.metadata.resource_version
                );
                return Ok(updated);
            }
            Err(StoreError::Conflict) => {
                metrics::update_conflict();
                debug!(
                    "Update of etcd cluster {} conflicted on attempt {}/{}",
                    key, attempt, config.max_retries
                );
            }
            Err(source) => return Err(store_error(source)),
        }
    }

    warn!(
        "Giving up on update of etcd cluster {} after {} conflicting attempts",
        key, config.max_retries
    );
    Err(Error::RetriesExhausted {
        cluster: key.clone(),
        attempts: config.max_retries,
    })
}
