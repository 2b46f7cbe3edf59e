pub mod path;
pub mod tracker;

pub use path::{artifact_prefix, backup_location, BackupLocation, S3_V1};
pub use tracker::BackupStatusTracker;
