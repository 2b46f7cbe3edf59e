use std::convert::TryFrom;
use std::fmt;
use std::time::Duration;

use schemars::{gen::SchemaGenerator, schema::Schema, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::errors::{Error, Result};

/// Interval used when `backupIntervalInSecond` is zero or unset.
pub const DEFAULT_BACKUP_INTERVAL_SECONDS: i32 = 1800;

pub const AWS_SECRET_CREDENTIALS_FILE_NAME: &str = "credentials";
pub const AWS_SECRET_CONFIG_FILE_NAME: &str = "config";
/// Profile read from both AWS secret files.
pub const AWS_PROFILE: &str = "default";

/// Key of the Azure Storage account name in an ABS secret.
pub const ABS_STORAGE_ACCOUNT: &str = "storage-account";
/// Key of the Azure Storage account key in an ABS secret.
pub const ABS_STORAGE_KEY: &str = "storage-key";

/// The `storageType` discriminator as it appears on the wire.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageType {
    /// Unset by the user; means `PersistentVolume`.
    #[serde(rename = "")]
    Default,
    PersistentVolume,
    S3,
    #[serde(rename = "ABS")]
    Abs,
}

impl Default for StorageType {
    fn default() -> Self {
        StorageType::Default
    }
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Default => "",
            StorageType::PersistentVolume => "PersistentVolume",
            StorageType::S3 => "S3",
            StorageType::Abs => "ABS",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persistent volume claimed for backups before the cluster is created.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default, PartialEq)]
pub struct PvSource {
    #[serde(rename = "volumeSizeInMB", default)]
    pub volume_size_in_mb: i32,
}

#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3Source {
    /// Overrides the operator wide bucket when set.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub s3_bucket: String,
    /// Leading part of the object path; version and cluster segments follow it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    /// Secret holding the `credentials` and `config` files.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aws_secret: String,
}

#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AbsSource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub abs_container: String,
    /// Secret holding `storage-account` and `storage-key`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub abs_secret: String,
}

/// Where backups go. The payload type is fixed by the variant, so a source
/// that disagrees with its `storageType` cannot be built.
#[derive(Clone, Debug, PartialEq)]
pub enum BackupStorage {
    Default(Option<PvSource>),
    PersistentVolume(Option<PvSource>),
    S3(Option<S3Source>),
    Abs(Option<AbsSource>),
}

impl Default for BackupStorage {
    fn default() -> Self {
        BackupStorage::Default(None)
    }
}

impl BackupStorage {
    pub fn storage_type(&self) -> StorageType {
        match self {
            BackupStorage::Default(_) => StorageType::Default,
            BackupStorage::PersistentVolume(_) => StorageType::PersistentVolume,
            BackupStorage::S3(_) => StorageType::S3,
            BackupStorage::Abs(_) => StorageType::Abs,
        }
    }

    /// The only place where an unset storage type becomes `PersistentVolume`.
    pub fn effective_type(&self) -> StorageType {
        match self.storage_type() {
            StorageType::Default => StorageType::PersistentVolume,
            other => other,
        }
    }

    pub fn pv(&self) -> Option<&PvSource> {
        match self {
            BackupStorage::Default(pv) | BackupStorage::PersistentVolume(pv) => pv.as_ref(),
            _ => None,
        }
    }

    pub fn s3(&self) -> Option<&S3Source> {
        match self {
            BackupStorage::S3(s3) => s3.as_ref(),
            _ => None,
        }
    }

    pub fn abs(&self) -> Option<&AbsSource> {
        match self {
            BackupStorage::Abs(abs) => abs.as_ref(),
            _ => None,
        }
    }
}

/// A storage source populated alongside a `storageType` it does not belong to.
#[derive(Debug, Error)]
#[error("storageType '{storage_type}' does not accept the '{populated}' storage source")]
pub struct StorageSourceMismatch {
    pub storage_type: StorageType,
    pub populated: &'static str,
}

/// Storage source found on the wire next to a `storageType` it does not match.
#[derive(Clone, Debug, PartialEq)]
pub enum StraySource {
    Pv(PvSource),
    S3(S3Source),
    Abs(AbsSource),
}

impl StraySource {
    /// Wire field the source was read from.
    pub fn field(&self) -> &'static str {
        match self {
            StraySource::Pv(_) => "pv",
            StraySource::S3(_) => "s3",
            StraySource::Abs(_) => "abs",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackupPolicy {
    /// Backup pod policy, passed through untouched.
    pub pod: Option<Value>,
    pub storage: BackupStorage,
    /// Sources that do not match `storage`. They make the policy invalid and
    /// are written back unchanged.
    pub stray_sources: Vec<StraySource>,
    pub backup_interval_in_second: i32,
    /// Maximum number of backups to retain; 0 means unlimited.
    pub max_backups: i32,
    /// Remove backup data when the cluster is deleted.
    pub auto_delete: bool,
}

impl BackupPolicy {
    /// Check the invariants a policy must hold before it is accepted into a cluster spec.
    ///
    /// S3 and ABS sources are not checked here; a missing source for those
    /// types surfaces when the backend is used.
    pub fn validate(&self) -> Result<()> {
        if self.max_backups < 0 {
            return Err(Error::Validation(format!(
                "MaxBackups value should be >= 0, got {}",
                self.max_backups
            )));
        }
        if let BackupStorage::PersistentVolume(pv) = &self.storage {
            match pv {
                Some(pv) if pv.volume_size_in_mb > 0 => {}
                _ => return Err(Error::PvZeroSize),
            }
        }
        if let Some(stray) = self.stray_sources.first() {
            let mismatch = StorageSourceMismatch {
                storage_type: self.storage_type(),
                populated: stray.field(),
            };
            return Err(Error::Validation(mismatch.to_string()));
        }
        Ok(())
    }

    /// Resolve the fields that have an implicit default: an unset storage
    /// type becomes `PersistentVolume` and a non-positive interval the default one.
    pub fn apply_defaults(&mut self) {
        if self.storage_type() == StorageType::Default {
            self.storage = BackupStorage::PersistentVolume(self.storage.pv().cloned());
        }
        if self.backup_interval_in_second <= 0 {
            self.backup_interval_in_second = DEFAULT_BACKUP_INTERVAL_SECONDS;
        }
    }

    /// Whether [`BackupPolicy::apply_defaults`] would change anything.
    pub fn needs_defaults(&self) -> bool {
        self.storage_type() == StorageType::Default || self.backup_interval_in_second <= 0
    }

    pub fn storage_type(&self) -> StorageType {
        self.storage.storage_type()
    }

    /// Interval between two backups, falling back to the default for non-positive values.
    pub fn backup_interval(&self) -> Duration {
        let seconds = if self.backup_interval_in_second > 0 {
            self.backup_interval_in_second
        } else {
            DEFAULT_BACKUP_INTERVAL_SECONDS
        };
        Duration::from_secs(seconds as u64)
    }
}

/// Flat wire shape of a `BackupPolicy`; the storage source fields are inlined.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct RawBackupPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pod: Option<Value>,
    #[serde(default)]
    storage_type: StorageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pv: Option<PvSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s3: Option<S3Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    abs: Option<AbsSource>,
    #[serde(default)]
    backup_interval_in_second: i32,
    #[serde(default)]
    max_backups: i32,
    #[serde(default)]
    auto_delete: bool,
}

impl From<RawBackupPolicy> for BackupPolicy {
    fn from(raw: RawBackupPolicy) -> Self {
        let pv = raw.pv;
        let s3 = raw.s3;
        let abs = raw.abs;
        let (storage, stray_sources) = match raw.storage_type {
            StorageType::Default => (
                BackupStorage::Default(pv),
                strays(None, s3.map(StraySource::S3), abs.map(StraySource::Abs)),
            ),
            StorageType::PersistentVolume => (
                BackupStorage::PersistentVolume(pv),
                strays(None, s3.map(StraySource::S3), abs.map(StraySource::Abs)),
            ),
            StorageType::S3 => (
                BackupStorage::S3(s3),
                strays(pv.map(StraySource::Pv), None, abs.map(StraySource::Abs)),
            ),
            StorageType::Abs => (
                BackupStorage::Abs(abs),
                strays(pv.map(StraySource::Pv), s3.map(StraySource::S3), None),
            ),
        };
        BackupPolicy {
            pod: raw.pod,
            storage,
            stray_sources,
            backup_interval_in_second: raw.backup_interval_in_second,
            max_backups: raw.max_backups,
            auto_delete: raw.auto_delete,
        }
    }
}

fn strays(pv: Option<StraySource>, s3: Option<StraySource>, abs: Option<StraySource>) -> Vec<StraySource> {
    pv.into_iter().chain(s3).chain(abs).collect()
}

impl From<BackupPolicy> for RawBackupPolicy {
    fn from(policy: BackupPolicy) -> Self {
        let storage_type = policy.storage_type();
        let (mut pv, mut s3, mut abs) = match policy.storage {
            BackupStorage::Default(pv) | BackupStorage::PersistentVolume(pv) => (pv, None, None),
            BackupStorage::S3(s3) => (None, s3, None),
            BackupStorage::Abs(abs) => (None, None, abs),
        };
        for stray in policy.stray_sources {
            match stray {
                StraySource::Pv(source) => pv = pv.or(Some(source)),
                StraySource::S3(source) => s3 = s3.or(Some(source)),
                StraySource::Abs(source) => abs = abs.or(Some(source)),
            }
        }
        RawBackupPolicy {
            pod: policy.pod,
            storage_type,
            pv,
            s3,
            abs,
            backup_interval_in_second: policy.backup_interval_in_second,
            max_backups: policy.max_backups,
            auto_delete: policy.auto_delete,
        }
    }
}

impl Serialize for BackupPolicy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        RawBackupPolicy::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BackupPolicy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        RawBackupPolicy::deserialize(deserializer).map(BackupPolicy::from)
    }
}

impl JsonSchema for BackupPolicy {
    fn schema_name() -> String {
        "BackupPolicy".to_owned()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        RawBackupPolicy::json_schema(gen)
    }
}

/// One completed backup. Never modified once created.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    pub creation_time: String,
    /// Size in MB.
    pub size: f64,
    pub revision: i64,
    /// etcd version of the cluster that was backed up.
    pub version: String,
    pub time_took_in_second: i32,
}

impl BackupStatus {
    /// Status of a backup that just finished, stamped with the current time.
    pub fn completed(size: f64, revision: i64, version: &str, took: Duration) -> Self {
        BackupStatus {
            creation_time: chrono::Utc::now().to_rfc3339(),
            size,
            revision,
            version: version.to_owned(),
            time_took_in_second: i32::try_from(took.as_secs()).unwrap_or(i32::MAX),
        }
    }
}

/// Aggregate of the backups currently retained for a cluster.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_backup: Option<BackupStatus>,
    /// Total number of existing backups.
    pub backups: i32,
    /// Total size of existing backups in MB.
    pub backup_size: f64,
}
