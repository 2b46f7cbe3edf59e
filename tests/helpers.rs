#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use etcd_controller::backup::BackupLocation;
use etcd_controller::crd::{EtcdCluster, EtcdClusterSpec};
use etcd_controller::deletion::{BackupLister, DependentChecker, DependentResource, ProgressReporter};
use etcd_controller::errors::StorageCheckError;
use etcd_controller::updater::{ClusterKey, ClusterStore, StoreError};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

// Get the repo's example `EtcdCluster` manifest
pub fn example_cluster(name: &str) -> EtcdCluster {
    let manifest = std::fs::read_to_string(format!("{}/{}", env!("CARGO_MANIFEST_DIR"), name))
        .expect("Failed to read manifest file");
    serde_yaml::from_str(&manifest).expect("Unable to parse manifest into an EtcdCluster")
}

pub fn cluster(namespace: &str, name: &str, spec: EtcdClusterSpec) -> EtcdCluster {
    let mut cluster = EtcdCluster::new(name, spec);
    cluster.metadata.namespace = Some(namespace.to_owned());
    cluster
}

#[derive(Default)]
struct StoreState {
    cluster: Option<EtcdCluster>,
    version: u64,
    conflicts_remaining: u32,
    gets: u32,
    writes: u32,
}

impl StoreState {
    fn bump(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// In-memory store that enforces resourceVersion checks and can simulate
/// a number of concurrent writers winning before us.
#[derive(Default)]
pub struct FakeClusterStore {
    state: Mutex<StoreState>,
}

impl FakeClusterStore {
    pub fn with_cluster(mut cluster: EtcdCluster) -> Self {
        let mut state = StoreState::default();
        cluster.metadata.resource_version = Some(state.bump());
        state.cluster = Some(cluster);
        FakeClusterStore {
            state: Mutex::new(state),
        }
    }

    pub fn inject_conflicts(&self, conflicts: u32) {
        self.state.lock().unwrap().conflicts_remaining = conflicts;
    }

    pub fn stored(&self) -> Option<EtcdCluster> {
        self.state.lock().unwrap().cluster.clone()
    }

    pub fn gets(&self) -> u32 {
        self.state.lock().unwrap().gets
    }

    pub fn writes(&self) -> u32 {
        self.state.lock().unwrap().writes
    }

    /// Delete request from a user: the cluster is only marked while finalizers remain.
    pub fn mark_deleted(&self) {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        if let Some(stored) = state.cluster.as_mut() {
            stored.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            stored.metadata.resource_version = Some(version);
        }
        if state.cluster.as_ref().map_or(false, is_released) {
            state.cluster = None;
        }
    }

    fn write(&self, cluster: &EtcdCluster, status_only: bool) -> Result<EtcdCluster, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        if state.conflicts_remaining > 0 {
            // Someone else commits first
            state.conflicts_remaining -= 1;
            let version = state.bump();
            if let Some(stored) = state.cluster.as_mut() {
                stored.metadata.resource_version = Some(version);
            }
            return Err(StoreError::Conflict);
        }
        let stored = state.cluster.clone().ok_or(StoreError::NotFound)?;
        if stored.metadata.resource_version != cluster.metadata.resource_version {
            return Err(StoreError::Conflict);
        }
        let mut written = if status_only {
            let mut written = stored;
            written.status = cluster.status.clone();
            written
        } else {
            let mut written = cluster.clone();
            written.status = stored.status;
            written
        };
        written.metadata.resource_version = Some(state.bump());
        state.cluster = if is_released(&written) {
            None
        } else {
            Some(written.clone())
        };
        Ok(written)
    }
}

// Marked for deletion with no finalizer left
fn is_released(cluster: &EtcdCluster) -> bool {
    cluster.metadata.deletion_timestamp.is_some() && cluster.metadata.finalizers.as_ref().map_or(true, |f| f.is_empty())
}

#[async_trait]
impl ClusterStore for FakeClusterStore {
    async fn get(&self, _key: &ClusterKey) -> Result<EtcdCluster, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.gets += 1;
        state.cluster.clone().ok_or(StoreError::NotFound)
    }

    async fn create(&self, _key: &ClusterKey, cluster: &EtcdCluster) -> Result<EtcdCluster, StoreError> {
        let mut state = self.state.lock().unwrap();
        let mut created = cluster.clone();
        created.metadata.resource_version = Some(state.bump());
        state.cluster = Some(created.clone());
        Ok(created)
    }

    async fn replace(&self, _key: &ClusterKey, cluster: &EtcdCluster) -> Result<EtcdCluster, StoreError> {
        self.write(cluster, false)
    }

    async fn replace_status(&self, _key: &ClusterKey, cluster: &EtcdCluster) -> Result<EtcdCluster, StoreError> {
        self.write(cluster, true)
    }

    async fn delete(&self, _key: &ClusterKey) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.cluster.take().map(|_| ()).ok_or(StoreError::NotFound)
    }
}

/// Reports one pod for the first `polls` calls.
pub struct FakeDependents {
    remaining_polls: AtomicU32,
    terminating: bool,
    fail: bool,
    calls: AtomicU32,
    deletes: AtomicU32,
}

impl FakeDependents {
    pub fn gone_after(polls: u32) -> Self {
        FakeDependents {
            remaining_polls: AtomicU32::new(polls),
            terminating: false,
            fail: false,
            calls: AtomicU32::new(0),
            deletes: AtomicU32::new(0),
        }
    }

    pub fn terminating_forever() -> Self {
        FakeDependents {
            terminating: true,
            ..Self::gone_after(u32::MAX)
        }
    }

    pub fn failing() -> Self {
        FakeDependents {
            fail: true,
            ..Self::gone_after(0)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DependentChecker for FakeDependents {
    async fn delete_remaining(&self, _key: &ClusterKey) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remaining(&self, _key: &ClusterKey) -> Result<Vec<DependentResource>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StoreError::NotFound);
        }
        let left = self.remaining_polls.load(Ordering::SeqCst);
        if left == 0 {
            return Ok(Vec::new());
        }
        self.remaining_polls.store(left.saturating_sub(1), Ordering::SeqCst);
        Ok(vec![DependentResource {
            kind: "Pod",
            name: "etcd-0".to_owned(),
            terminating: self.terminating,
        }])
    }
}

/// Lists one backup object for the first `polls` calls.
pub struct FakeLister {
    remaining_polls: AtomicU32,
    fail: bool,
    calls: AtomicU32,
    locations: Mutex<Vec<BackupLocation>>,
}

impl FakeLister {
    pub fn empty_after(polls: u32) -> Self {
        FakeLister {
            remaining_polls: AtomicU32::new(polls),
            fail: false,
            calls: AtomicU32::new(0),
            locations: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        FakeLister {
            fail: true,
            ..Self::empty_after(0)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn locations(&self) -> Vec<BackupLocation> {
        self.locations.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackupLister for FakeLister {
    async fn list(&self, location: &BackupLocation) -> Result<Vec<String>, StorageCheckError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.locations.lock().unwrap().push(location.clone());
        if self.fail {
            return Err(StorageCheckError {
                backend: "s3",
                location: location.prefix.clone(),
                message: "access denied".to_owned(),
            });
        }
        let left = self.remaining_polls.load(Ordering::SeqCst);
        if left == 0 {
            return Ok(Vec::new());
        }
        self.remaining_polls.store(left - 1, Ordering::SeqCst);
        Ok(vec![format!("{}/3.2.13_0000000000000001_etcd.backup", location.prefix)])
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    messages: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, key: &ClusterKey, message: &str) {
        self.messages.lock().unwrap().push(format!("{}: {}", key, message));
    }
}
