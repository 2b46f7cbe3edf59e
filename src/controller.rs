use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, ListParams};
use kube::runtime::controller::{Action, Context, Controller as KubeController};
use kube::Client;
use log::{debug, info, warn};

use crate::crd::{load_cluster_resource, EtcdCluster, EtcdClusterStatus};
use crate::deletion::{DeletionWaiter, KubeDependentChecker, LogReporter, StorageCheckerOptions};
use crate::errors::{Error, Result};
use crate::metrics;
use crate::updater::{
    atomic_update, atomic_update_status, ClusterKey, ClusterStore, KubeClusterStore, StoreError, UpdateConfig,
};
use crate::utils::now_rfc3339;
use crate::Config;

/// Held on every cluster until its dependents and backups are cleaned up.
pub const CLUSTER_FINALIZER: &str = "etcd.database.coreos.com/backup-cleanup";

const REQUEUE_AFTER_ERROR: Duration = Duration::from_secs(30);
const REQUEUE_AFTER_FINALIZER: Duration = Duration::from_secs(1);
const RESYNC_PERIOD: Duration = Duration::from_secs(300);

pub struct ControllerContext {
    pub client: Client,
    pub store: KubeClusterStore,
    pub config: Config,
}

/// Fill in the backup policy fields that have an implicit default.
pub fn apply_backup_defaults(cluster: &mut EtcdCluster) -> Result<()> {
    if let Some(policy) = cluster.spec.backup.as_mut() {
        policy.apply_defaults();
    }
    Ok(())
}

fn needs_defaults(cluster: &EtcdCluster) -> bool {
    cluster.spec.backup.as_ref().map_or(false, |p| p.needs_defaults())
}

pub fn has_finalizer(cluster: &EtcdCluster) -> bool {
    cluster
        .metadata
        .finalizers
        .as_ref()
        .map_or(false, |finalizers| finalizers.iter().any(|f| f == CLUSTER_FINALIZER))
}

fn add_finalizer(cluster: &mut EtcdCluster) -> Result<()> {
    if !has_finalizer(cluster) {
        cluster
            .metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(CLUSTER_FINALIZER.to_owned());
    }
    Ok(())
}

fn remove_finalizer(cluster: &mut EtcdCluster) -> Result<()> {
    if let Some(finalizers) = cluster.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != CLUSTER_FINALIZER);
    }
    Ok(())
}

/// Put the cleanup finalizer on a live cluster. Returns whether it had to be written.
pub async fn ensure_finalizer<S>(store: &S, key: &ClusterKey, cluster: &EtcdCluster, update: &UpdateConfig) -> Result<bool>
where
    S: ClusterStore + ?Sized,
{
    if has_finalizer(cluster) {
        return Ok(false);
    }
    atomic_update(store, key, update, add_finalizer).await?;
    info!("Added finalizer to etcd cluster {}", key);
    Ok(true)
}

/// Clean up after a cluster marked for deletion and release its finalizer.
///
/// Dependents are deleted first, then the waiter has to confirm them and the
/// backups gone. Any failure keeps the finalizer so the cleanup is retried.
pub async fn finalize_cluster<S>(
    store: &S,
    waiter: &DeletionWaiter<'_>,
    key: &ClusterKey,
    cluster: &EtcdCluster,
    update: &UpdateConfig,
    options: &StorageCheckerOptions,
) -> Result<()>
where
    S: ClusterStore + ?Sized,
{
    if !has_finalizer(cluster) {
        return Ok(());
    }
    info!("Cleaning up deleted etcd cluster {}", key);
    waiter.delete_dependents(key).await?;
    waiter
        .wait_backup_deleted(key, cluster.spec.backup.as_ref(), options)
        .await?;

    match atomic_update(store, key, update, remove_finalizer).await {
        Ok(_) => {}
        Err(Error::Store {
            source: StoreError::NotFound,
            ..
        }) => debug!("etcd cluster {} is already gone", key),
        Err(err) => return Err(err),
    }
    info!("Removed finalizer from etcd cluster {}", key);
    Ok(())
}

/// Status the cluster should report given its current spec.
fn desired_status(cluster: &EtcdCluster) -> EtcdClusterStatus {
    let current = cluster.status.clone().unwrap_or_default();
    let validation = match &cluster.spec.backup {
        Some(policy) => policy.validate(),
        None => Ok(()),
    };
    let mut status = match validation {
        Ok(()) => EtcdClusterStatus::running(),
        Err(err) => EtcdClusterStatus::failed(&err.to_string()),
    };
    status.backup_service_status = match &cluster.spec.backup {
        Some(_) => Some(current.backup_service_status.clone().unwrap_or_default()),
        None => None,
    };
    status.last_transition_time = if status.phase == current.phase && status.reason == current.reason {
        current.last_transition_time
    } else {
        Some(now_rfc3339())
    };
    status
}

/// Bring one cluster resource in line with its backup policy.
///
/// Defaults are written to the spec first; the next pass then validates the
/// policy and records the outcome in the status.
pub async fn sync_cluster<S>(store: &S, key: &ClusterKey, cluster: &EtcdCluster, update: &UpdateConfig) -> Result<()>
where
    S: ClusterStore + ?Sized,
{
    if needs_defaults(cluster) {
        info!("Applying backup policy defaults to etcd cluster {}", key);
        atomic_update(store, key, update, apply_backup_defaults).await?;
        return Ok(());
    }

    let status = desired_status(cluster);
    if cluster.status.as_ref() == Some(&status) {
        debug!("Status of etcd cluster {} is current", key);
        return Ok(());
    }
    if !status.reason.is_empty() {
        metrics::validation_failed();
        warn!("Backup policy of etcd cluster {} rejected: {}", key, status.reason);
    }

    // Recomputed from every fetched copy so backup totals written concurrently survive.
    atomic_update_status(store, key, update, |latest| {
        latest.status = Some(desired_status(latest));
        Ok(())
    })
    .await?;
    Ok(())
}

async fn reconcile(cluster: Arc<EtcdCluster>, ctx: Context<ControllerContext>) -> Result<Action> {
    let ctx = ctx.get_ref();
    let key = ClusterKey::from_cluster(&cluster)?;
    if cluster.metadata.deletion_timestamp.is_some() {
        let dependents = KubeDependentChecker::new(ctx.client.clone());
        let waiter = DeletionWaiter::without_backup_listing(&dependents, &LogReporter, ctx.config.wait.clone());
        finalize_cluster(
            &ctx.store,
            &waiter,
            &key,
            &cluster,
            &ctx.config.update,
            &ctx.config.storage,
        )
        .await?;
        return Ok(Action::await_change());
    }
    if ensure_finalizer(&ctx.store, &key, &cluster, &ctx.config.update).await? {
        return Ok(Action::requeue(REQUEUE_AFTER_FINALIZER));
    }
    sync_cluster(&ctx.store, &key, &cluster, &ctx.config.update).await?;
    Ok(Action::requeue(RESYNC_PERIOD))
}

fn error_policy(error: &Error, _ctx: Context<ControllerContext>) -> Action {
    warn!("Reconcile failed ({}): {}", error.kind(), error);
    Action::requeue(REQUEUE_AFTER_ERROR)
}

/// Watch `EtcdCluster`s and reconcile them until the watch stream ends.
pub async fn run_controller(client: Client, config: Config) {
    let clusters: Api<EtcdCluster> = match &config.namespace {
        Some(namespace) => load_cluster_resource(&client, namespace),
        None => Api::all(client.clone()),
    };
    let context = Context::new(ControllerContext {
        store: KubeClusterStore::new(client.clone()),
        client,
        config,
    });

    KubeController::new(clusters, ListParams::default())
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!("Reconciled {}", object),
                Err(err) => warn!("Reconcile error: {}", err),
            }
        })
        .await;
}
