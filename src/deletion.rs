use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use kube::api::{Api, DeleteParams, ListParams};
use kube::Client;
use log::{debug, info, warn};

use crate::backup::{backup_location, BackupLocation};
use crate::crd::BackupPolicy;
use crate::errors::{Error, Result, StorageCheckError};
use crate::metrics;
use crate::updater::{ClusterKey, ClusterStore, StoreError};
use crate::utils::{backup_pvc_name, backup_sidecar_name, cluster_label_selector, plural_str, resource_names};

/// An object that still exists on behalf of a deleted cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct DependentResource {
    pub kind: &'static str,
    pub name: String,
    /// Marked for deletion but not gone yet.
    pub terminating: bool,
}

/// Lists the runtime objects a cluster left behind in the control plane.
#[async_trait]
pub trait DependentChecker: Send + Sync {
    async fn remaining(&self, key: &ClusterKey) -> std::result::Result<Vec<DependentResource>, StoreError>;

    /// Ask for every dependent of `key` to be deleted. Objects already gone are not an error.
    async fn delete_remaining(&self, key: &ClusterKey) -> std::result::Result<(), StoreError>;
}

/// Lists backup objects stored under a location in a storage backend.
#[async_trait]
pub trait BackupLister: Send + Sync {
    async fn list(&self, location: &BackupLocation) -> std::result::Result<Vec<String>, StorageCheckError>;
}

/// Sink for progress messages emitted while waiting.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, key: &ClusterKey, message: &str);
}

/// Forwards progress to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report(&self, key: &ClusterKey, message: &str) {
        info!("etcd cluster {}: {}", key, message);
    }
}

#[derive(Clone, Debug, Default)]
pub struct StorageCheckerOptions {
    /// Bucket used when an S3 policy does not name its own.
    pub default_bucket: String,
    /// Require dependents to be gone from the API instead of only marked for deletion.
    pub deleted_from_api: bool,
    /// Check the backup objects even when the policy does not auto delete them.
    pub verify_backups: bool,
}

#[derive(Clone, Debug)]
pub struct WaitConfig {
    pub poll_interval: Duration,
    /// Total budget for the wait.
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        WaitConfig {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(150),
        }
    }
}

/// Outcome of a deletion wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitState {
    Polling,
    Confirmed,
    TimedOut,
    Errored,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Polling => "polling",
            WaitState::Confirmed => "confirmed",
            WaitState::TimedOut => "timed_out",
            WaitState::Errored => "errored",
        }
    }
}

/// Polls until everything a deleted cluster owned has disappeared.
pub struct DeletionWaiter<'a> {
    dependents: &'a dyn DependentChecker,
    backups: Option<&'a dyn BackupLister>,
    reporter: &'a dyn ProgressReporter,
    config: WaitConfig,
}

impl<'a> DeletionWaiter<'a> {
    pub fn new(
        dependents: &'a dyn DependentChecker,
        backups: &'a dyn BackupLister,
        reporter: &'a dyn ProgressReporter,
        config: WaitConfig,
    ) -> Self {
        DeletionWaiter {
            dependents,
            backups: Some(backups),
            reporter,
            config,
        }
    }

    /// Waiter that has no access to the storage backend. Backup objects are
    /// never listed; a policy asking for it is logged and skipped.
    pub fn without_backup_listing(
        dependents: &'a dyn DependentChecker,
        reporter: &'a dyn ProgressReporter,
        config: WaitConfig,
    ) -> Self {
        DeletionWaiter {
            dependents,
            backups: None,
            reporter,
            config,
        }
    }

    /// Request deletion of everything `key` still owns in the control plane.
    pub async fn delete_dependents(&self, key: &ClusterKey) -> Result<()> {
        self.dependents.delete_remaining(key).await.map_err(|source| Error::Store {
            cluster: key.clone(),
            source,
        })?;
        debug!("Requested deletion of dependents of etcd cluster {}", key);
        Ok(())
    }

    /// Wait until the dependents of `key` and, when the policy auto deletes
    /// them or `options.verify_backups` is set, its backup objects are gone.
    ///
    /// Both checks have to come back empty in the same poll. A check error
    /// ends the wait immediately; running out of budget yields
    /// `Error::DeletionTimeout`.
    pub async fn wait_backup_deleted(
        &self,
        key: &ClusterKey,
        policy: Option<&BackupPolicy>,
        options: &StorageCheckerOptions,
    ) -> Result<()> {
        let location = policy
            .filter(|policy| policy.auto_delete || options.verify_backups)
            .and_then(|policy| backup_location(policy, &key.namespace, &key.name, &options.default_bucket));
        let location = match (location, self.backups) {
            (Some(location), None) => {
                warn!(
                    "No backup storage access, backups of etcd cluster {} under {}/{} are not checked",
                    key, location.bucket, location.prefix
                );
                None
            }
            (location, _) => location,
        };
        if let Some(location) = &location {
            debug!(
                "Checking backups of etcd cluster {} under {}/{}",
                key, location.bucket, location.prefix
            );
        }

        let budget = self.config.timeout;
        let (state, result) =
            match tokio::time::timeout(budget, self.poll_until_gone(key, location.as_ref(), options)).await {
                Ok(Ok(())) => (WaitState::Confirmed, Ok(())),
                Ok(Err(err)) => (WaitState::Errored, Err(err)),
                Err(_) => (
                    WaitState::TimedOut,
                    Err(Error::DeletionTimeout {
                        cluster: key.clone(),
                        budget,
                    }),
                ),
            };

        metrics::deletion_wait_finished(state.as_str());
        match &result {
            Ok(()) => self.reporter.report(key, "dependent resources and backups are deleted"),
            Err(err) => {
                warn!("Waiting for deletion of etcd cluster {} ended {}: {}", key, state.as_str(), err);
                self.reporter.report(key, &format!("deletion wait {}: {}", state.as_str(), err));
            }
        }
        result
    }

    async fn poll_until_gone(
        &self,
        key: &ClusterKey,
        location: Option<&BackupLocation>,
        options: &StorageCheckerOptions,
    ) -> Result<()> {
        loop {
            if self.poll_once(key, location, options).await? {
                return Ok(());
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One poll of both checks; `true` once nothing remains.
    async fn poll_once(
        &self,
        key: &ClusterKey,
        location: Option<&BackupLocation>,
        options: &StorageCheckerOptions,
    ) -> Result<bool> {
        let remaining: Vec<DependentResource> = self
            .dependents
            .remaining(key)
            .await
            .map_err(|source| Error::Store {
                cluster: key.clone(),
                source,
            })?
            .into_iter()
            .filter(|resource| options.deleted_from_api || !resource.terminating)
            .collect();

        let objects = match (location, self.backups) {
            (Some(location), Some(backups)) => backups.list(location).await.map_err(|source| Error::StorageCheck {
                cluster: key.clone(),
                source,
            })?,
            _ => Vec::new(),
        };

        if remaining.is_empty() && objects.is_empty() {
            return Ok(true);
        }
        if !remaining.is_empty() {
            self.reporter.report(
                key,
                &format!(
                    "waiting for {} to be deleted: {}",
                    plural_str(remaining.len(), "resources"),
                    resource_names(&remaining)
                ),
            );
        }
        if !objects.is_empty() {
            self.reporter.report(
                key,
                &format!("waiting for {} to be deleted", plural_str(objects.len(), "backup objects")),
            );
        }
        Ok(false)
    }
}

/// Delete the cluster resource, then wait for its dependents and backups to go.
pub async fn delete_cluster_and_backup<S>(
    store: &S,
    waiter: &DeletionWaiter<'_>,
    key: &ClusterKey,
    policy: Option<&BackupPolicy>,
    options: &StorageCheckerOptions,
) -> Result<()>
where
    S: ClusterStore + ?Sized,
{
    store.delete(key).await.map_err(|source| Error::Store {
        cluster: key.clone(),
        source,
    })?;
    info!("Waiting for backup of etcd cluster {} to be deleted", key);
    waiter.wait_backup_deleted(key, policy, options).await
}

/// `DependentChecker` looking up pods, services, the backup sidecar and the
/// backup claim of a cluster through the Kubernetes API.
#[derive(Clone)]
pub struct KubeDependentChecker {
    client: Client,
}

impl KubeDependentChecker {
    pub fn new(client: Client) -> Self {
        KubeDependentChecker { client }
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

fn dependent(kind: &'static str, metadata: &kube::api::ObjectMeta) -> DependentResource {
    DependentResource {
        kind,
        name: metadata.name.clone().unwrap_or_default(),
        terminating: metadata.deletion_timestamp.is_some(),
    }
}

#[async_trait]
impl DependentChecker for KubeDependentChecker {
    async fn remaining(&self, key: &ClusterKey) -> std::result::Result<Vec<DependentResource>, StoreError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &key.namespace);
        let services: Api<Service> = Api::namespaced(self.client.clone(), &key.namespace);
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &key.namespace);
        let claims: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &key.namespace);

        let selector = cluster_label_selector(&key.name);
        let params = ListParams::default().labels(&selector);
        let sidecar_name = backup_sidecar_name(&key.name);
        let pvc_name = backup_pvc_name(&key.name);

        let (pod_list, service_list, sidecar, pvc) = futures::join!(
            pods.list(&params),
            services.list(&params),
            deployments.get(&sidecar_name),
            claims.get(&pvc_name),
        );

        let mut remaining: Vec<DependentResource> = Vec::new();
        for pod in pod_list?.items {
            remaining.push(dependent("Pod", &pod.metadata));
        }
        for service in service_list?.items {
            remaining.push(dependent("Service", &service.metadata));
        }
        match sidecar {
            Ok(deployment) => remaining.push(dependent("Deployment", &deployment.metadata)),
            Err(err) if is_not_found(&err) => {}
            Err(err) => {
                metrics::kube_error_happened("get_backup_sidecar", &err);
                return Err(err.into());
            }
        }
        match pvc {
            Ok(claim) => remaining.push(dependent("PersistentVolumeClaim", &claim.metadata)),
            Err(err) if is_not_found(&err) => {}
            Err(err) => {
                metrics::kube_error_happened("get_backup_pvc", &err);
                return Err(err.into());
            }
        }
        Ok(remaining)
    }

    async fn delete_remaining(&self, key: &ClusterKey) -> std::result::Result<(), StoreError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &key.namespace);
        let services: Api<Service> = Api::namespaced(self.client.clone(), &key.namespace);
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &key.namespace);
        let claims: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &key.namespace);

        let selector = cluster_label_selector(&key.name);
        let params = ListParams::default().labels(&selector);
        let delete_params = DeleteParams::background();
        let sidecar_name = backup_sidecar_name(&key.name);
        let pvc_name = backup_pvc_name(&key.name);

        let (pod_result, service_result, sidecar, pvc) = futures::join!(
            pods.delete_collection(&delete_params, &params),
            services.delete_collection(&delete_params, &params),
            deployments.delete(&sidecar_name, &delete_params),
            claims.delete(&pvc_name, &delete_params),
        );

        let results = [
            ("delete_cluster_pods", pod_result.map(|_| ())),
            ("delete_cluster_services", service_result.map(|_| ())),
            ("delete_backup_sidecar", sidecar.map(|_| ())),
            ("delete_backup_pvc", pvc.map(|_| ())),
        ];
        for (action, result) in results {
            match result {
                Ok(()) => {}
                Err(err) if is_not_found(&err) => {}
                Err(err) => {
                    metrics::kube_error_happened(action, &err);
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }
}
