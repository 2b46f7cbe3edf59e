use kube::{Api, Client, CustomResource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::backup::{BackupPolicy, ServiceStatus};

pub const CLUSTER_PHASE_RUNNING: &str = "Running";
pub const CLUSTER_PHASE_FAILED: &str = "Failed";

/// Represents the 'spec' field of an EtcdCluster resource
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "etcd.database.coreos.com",
    version = "v1beta2",
    kind = "EtcdCluster",
    plural = "etcdclusters",
    shortname = "etcd",
    status = "EtcdClusterStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct EtcdClusterSpec {
    /// Expected number of members.
    #[serde(default)]
    pub size: i32,
    /// etcd version to run, e.g. "3.2.13".
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupPolicy>,
}

/// Represents the 'status' field of an EtcdCluster resource
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EtcdClusterStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_service_status: Option<ServiceStatus>,
}

impl EtcdClusterStatus {
    pub fn running() -> Self {
        EtcdClusterStatus {
            phase: CLUSTER_PHASE_RUNNING.to_owned(),
            ..EtcdClusterStatus::default()
        }
    }

    pub fn failed(reason: &str) -> Self {
        EtcdClusterStatus {
            phase: CLUSTER_PHASE_FAILED.to_owned(),
            reason: reason.to_owned(),
            ..EtcdClusterStatus::default()
        }
    }
}

pub fn load_cluster_resource(client: &Client, namespace: &str) -> Api<EtcdCluster> {
    Api::namespaced(client.clone(), namespace)
}
