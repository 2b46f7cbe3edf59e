use std::time::Duration;

use thiserror::Error;

use crate::updater::{ClusterKey, StoreError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid backup policy: {0}")]
    Validation(String),

    #[error("PV backup should not have 0 size volume")]
    PvZeroSize,

    #[error("Cluster {cluster}: update still conflicting after {attempts} attempts")]
    RetriesExhausted { cluster: ClusterKey, attempts: u32 },

    #[error("Cluster {cluster}: store error: {source}")]
    Store {
        cluster: ClusterKey,
        #[source]
        source: StoreError,
    },

    #[error("Cluster {cluster}: backup storage check failed: {source}")]
    StorageCheck {
        cluster: ClusterKey,
        #[source]
        source: StorageCheckError,
    },

    #[error("Cluster {cluster}: failed to confirm backup deletion within {budget:?}")]
    DeletionTimeout { cluster: ClusterKey, budget: Duration },

    #[error("Cluster {cluster}: update did not complete within {budget:?}")]
    Timeout { cluster: ClusterKey, budget: Duration },

    #[error("Transform rejected the update: {0}")]
    Transform(String),

    #[error("Key '{0}' is empty")]
    MissingKey(&'static str),

    #[error("Kube API Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Failed to load environment config: {0}")]
    ConfigError(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) | Error::PvZeroSize => "validation",
            Error::RetriesExhausted { .. } => "conflict",
            Error::Store { .. } | Error::KubeError(_) => "store",
            Error::StorageCheck { .. } => "storage_check",
            Error::DeletionTimeout { .. } | Error::Timeout { .. } => "timeout",
            Error::Transform(_) => "transform",
            Error::MissingKey(_) | Error::SerdeError(_) => "internal",
            Error::ConfigError(_) | Error::InvalidConfig(_) => "config",
        }
    }
}

/// Failure reported by a storage backend while listing backup artifacts.
#[derive(Debug, Error)]
#[error("{backend} listing of '{location}' failed: {message}")]
pub struct StorageCheckError {
    pub backend: &'static str,
    pub location: String,
    pub message: String,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
