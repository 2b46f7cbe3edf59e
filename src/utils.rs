use crate::deletion::DependentResource;

/// Label carried by every object that belongs to a cluster.
pub const CLUSTER_LABEL: &str = "etcd_cluster";

const MAX_NAME_LENGTH: usize = 63;

pub fn cluster_label_selector(cluster_name: &str) -> String {
    format!("{}={}", CLUSTER_LABEL, cluster_name)
}

/// Name of the deployment running the backup sidecar of a cluster.
pub fn backup_sidecar_name(cluster_name: &str) -> String {
    child_resource_name(cluster_name, "backup-sidecar")
}

/// Name of the claim holding volume backed backups of a cluster.
pub fn backup_pvc_name(cluster_name: &str) -> String {
    child_resource_name(cluster_name, "backup-pvc")
}

/// Generate a name which is no greater than 63 chars in length,
/// always keeping the `suffix` and as much of `cluster_name` as possible.
pub fn child_resource_name(cluster_name: &str, suffix: &str) -> String {
    let budget = MAX_NAME_LENGTH.saturating_sub(suffix.len() + 1);
    let prefix = cluster_name.chars().take(budget).collect::<String>();
    format!("{}-{}", prefix.trim_end_matches('-'), suffix)
}

pub fn resource_names(resources: &[DependentResource]) -> String {
    let words: Vec<String> = resources
        .iter()
        .map(|resource| format!("{} \"{}\"", resource.kind, resource.name))
        .collect();
    words.join(", ")
}

pub fn plural_str(length: usize, word: &str) -> String {
    let word = if length == 1 { word.trim_end_matches('s') } else { word };
    format!("{} {}", length, word)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
