use std::collections::VecDeque;

use crate::crd::backup::{BackupPolicy, BackupStatus, ServiceStatus};

/// History of the backups retained for one cluster, bounded by `maxBackups`.
///
/// Evicting a record only drops it from the retained set; removing the
/// backup object itself is left to whoever receives the evicted records.
#[derive(Clone, Debug, Default)]
pub struct BackupStatusTracker {
    max_backups: usize,
    retained: VecDeque<BackupStatus>,
}

impl BackupStatusTracker {
    /// `max_backups == 0` keeps every record.
    pub fn new(max_backups: usize) -> Self {
        BackupStatusTracker {
            max_backups,
            ..BackupStatusTracker::default()
        }
    }

    /// Tracker honouring the retention of `policy`. Negative values are
    /// rejected by validation and treated as unlimited here.
    pub fn for_policy(policy: &BackupPolicy) -> Self {
        Self::new(policy.max_backups.max(0) as usize)
    }

    /// Add a completed backup as the most recent one and return the records
    /// evicted to stay within retention, oldest first.
    pub fn record(&mut self, status: BackupStatus) -> Vec<BackupStatus> {
        self.retained.push_back(status);

        let mut evicted = Vec::new();
        if self.max_backups > 0 {
            while self.retained.len() > self.max_backups {
                if let Some(oldest) = self.retained.pop_front() {
                    evicted.push(oldest);
                }
            }
        }
        evicted
    }

    /// Totals over the retained set, summed oldest first.
    pub fn snapshot(&self) -> ServiceStatus {
        ServiceStatus {
            recent_backup: self.retained.back().cloned(),
            backups: self.retained.len() as i32,
            backup_size: self.retained.iter().fold(0.0, |total, backup| total + backup.size),
        }
    }

    /// Retained records, oldest first.
    pub fn retained(&self) -> impl Iterator<Item = &BackupStatus> {
        self.retained.iter()
    }

    pub fn len(&self) -> usize {
        self.retained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }
}
