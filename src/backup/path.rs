use serde::Serialize;

use crate::crd::backup::{BackupPolicy, StorageType};

/// Version 1 of the object-store backup layout:
/// `<bucket>/<prefix>/"v1"/<namespace>/<clusterName>`
pub const S3_V1: &str = "v1";

/// Joins `base`, the schema tag, `namespace` and `cluster_name` into the
/// prefix under which a cluster's backup objects live.
///
/// Segments are joined like paths: empty segments are dropped and repeated
/// slashes collapse. Identifiers are used as-is.
pub fn artifact_prefix(base: &str, namespace: &str, cluster_name: &str) -> String {
    join_path(&[base, S3_V1, namespace, cluster_name])
}

fn join_path(segments: &[&str]) -> String {
    let absolute = segments
        .iter()
        .find(|s| !s.is_empty())
        .map_or(false, |s| s.starts_with('/'));
    let joined = segments
        .iter()
        .flat_map(|s| s.split('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Remote location holding a cluster's backup objects.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupLocation {
    pub storage_type: StorageType,
    /// S3 bucket or ABS container.
    pub bucket: String,
    pub prefix: String,
}

/// Resolve where the backups of `namespace/cluster_name` are stored.
///
/// Returns `None` for volume backed storage: those backups live on a claim
/// owned by the cluster, not in an object store.
pub fn backup_location(
    policy: &BackupPolicy,
    namespace: &str,
    cluster_name: &str,
    default_bucket: &str,
) -> Option<BackupLocation> {
    match policy.storage.effective_type() {
        StorageType::S3 => {
            let (bucket, prefix) = match policy.storage.s3() {
                Some(s3) if !s3.s3_bucket.is_empty() => (s3.s3_bucket.as_str(), s3.prefix.as_str()),
                Some(s3) => (default_bucket, s3.prefix.as_str()),
                None => (default_bucket, ""),
            };
            Some(BackupLocation {
                storage_type: StorageType::S3,
                bucket: bucket.to_owned(),
                prefix: artifact_prefix(prefix, namespace, cluster_name),
            })
        }
        StorageType::Abs => Some(BackupLocation {
            storage_type: StorageType::Abs,
            bucket: policy
                .storage
                .abs()
                .map(|abs| abs.abs_container.clone())
                .unwrap_or_default(),
            prefix: artifact_prefix("", namespace, cluster_name),
        }),
        StorageType::Default | StorageType::PersistentVolume => None,
    }
}
