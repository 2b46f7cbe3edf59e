use std::time::Duration;

use etcd_controller::crd::{BackupPolicy, BackupStorage, EtcdClusterSpec, PvSource, S3Source, StorageType};
use etcd_controller::deletion::{delete_cluster_and_backup, DeletionWaiter, LogReporter, StorageCheckerOptions, WaitConfig};
use etcd_controller::errors::Error;
use etcd_controller::updater::{ClusterKey, StoreError};
use tokio::time::Instant;

mod helpers;

use helpers::{FakeClusterStore, FakeDependents, FakeLister, RecordingReporter};

fn key() -> ClusterKey {
    ClusterKey::new("prod", "etcd1")
}

fn wait_config() -> WaitConfig {
    WaitConfig {
        poll_interval: Duration::from_secs(5),
        timeout: Duration::from_secs(60),
    }
}

fn s3_policy(auto_delete: bool) -> BackupPolicy {
    BackupPolicy {
        storage: BackupStorage::S3(Some(S3Source {
            s3_bucket: String::new(),
            prefix: "backups".to_owned(),
            aws_secret: "aws".to_owned(),
        })),
        auto_delete,
        ..BackupPolicy::default()
    }
}

fn options() -> StorageCheckerOptions {
    StorageCheckerOptions {
        default_bucket: "operator-bucket".to_owned(),
        ..StorageCheckerOptions::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_on_first_poll() {
    let dependents = FakeDependents::gone_after(0);
    let lister = FakeLister::empty_after(0);
    let reporter = RecordingReporter::default();
    let waiter = DeletionWaiter::new(&dependents, &lister, &reporter, wait_config());
    let start = Instant::now();

    waiter
        .wait_backup_deleted(&key(), Some(&s3_policy(true)), &options())
        .await
        .unwrap();

    assert_eq!(start.elapsed(), Duration::from_secs(0));
    assert_eq!(dependents.calls(), 1);
    assert_eq!(lister.calls(), 1);
    let location = &lister.locations()[0];
    assert_eq!(location.storage_type, StorageType::S3);
    assert_eq!(location.bucket, "operator-bucket");
    assert_eq!(location.prefix, "backups/v1/prod/etcd1");
}

#[tokio::test(start_paused = true)]
async fn test_times_out_while_backups_remain() {
    // One object stays listed for 3 polls but the budget only covers 2
    let dependents = FakeDependents::gone_after(0);
    let lister = FakeLister::empty_after(3);
    let reporter = RecordingReporter::default();
    let config = WaitConfig {
        poll_interval: Duration::from_secs(5),
        timeout: Duration::from_secs(7),
    };
    let waiter = DeletionWaiter::new(&dependents, &lister, &reporter, config);
    let start = Instant::now();

    let err = waiter
        .wait_backup_deleted(&key(), Some(&s3_policy(true)), &options())
        .await
        .unwrap_err();

    match &err {
        Error::DeletionTimeout { cluster, budget } => {
            assert_eq!(cluster, &key());
            assert_eq!(*budget, Duration::from_secs(7));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.to_string().contains("failed to confirm backup deletion within"));
    assert_eq!(start.elapsed(), Duration::from_secs(7));
    assert_eq!(lister.calls(), 2);
    assert!(reporter
        .messages()
        .iter()
        .any(|m| m == "prod/etcd1: waiting for 1 backup object to be deleted"));
}

#[tokio::test(start_paused = true)]
async fn test_both_checks_must_be_empty_in_same_poll() {
    let dependents = FakeDependents::gone_after(1);
    let lister = FakeLister::empty_after(2);
    let reporter = RecordingReporter::default();
    let waiter = DeletionWaiter::new(&dependents, &lister, &reporter, wait_config());
    let start = Instant::now();

    waiter
        .wait_backup_deleted(&key(), Some(&s3_policy(true)), &options())
        .await
        .unwrap();

    assert_eq!(start.elapsed(), Duration::from_secs(10));
    assert_eq!(dependents.calls(), 3);
    assert_eq!(lister.calls(), 3);
    let messages = reporter.messages();
    assert_eq!(messages[0], "prod/etcd1: waiting for 1 resource to be deleted: Pod \"etcd-0\"");
}

#[tokio::test(start_paused = true)]
async fn test_storage_error_is_fatal() {
    let dependents = FakeDependents::gone_after(0);
    let lister = FakeLister::failing();
    let waiter = DeletionWaiter::new(&dependents, &lister, &LogReporter, wait_config());
    let start = Instant::now();

    let err = waiter
        .wait_backup_deleted(&key(), Some(&s3_policy(true)), &options())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StorageCheck { .. }));
    assert!(err.to_string().contains("prod/etcd1"));
    assert_eq!(lister.calls(), 1);
    assert_eq!(start.elapsed(), Duration::from_secs(0));
}

#[tokio::test(start_paused = true)]
async fn test_dependent_check_error_is_fatal() {
    let dependents = FakeDependents::failing();
    let lister = FakeLister::empty_after(0);
    let waiter = DeletionWaiter::new(&dependents, &lister, &LogReporter, wait_config());

    let err = waiter
        .wait_backup_deleted(&key(), Some(&s3_policy(true)), &options())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Store {
            source: StoreError::NotFound,
            ..
        }
    ));
    assert_eq!(lister.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_backups_kept_without_auto_delete() {
    let dependents = FakeDependents::gone_after(0);
    let lister = FakeLister::empty_after(u32::MAX);
    let waiter = DeletionWaiter::new(&dependents, &lister, &LogReporter, wait_config());

    waiter
        .wait_backup_deleted(&key(), Some(&s3_policy(false)), &options())
        .await
        .unwrap();
    assert_eq!(lister.calls(), 0);

    // Explicitly requested verification still looks at the backups
    let verify = StorageCheckerOptions {
        verify_backups: true,
        ..options()
    };
    let lister = FakeLister::empty_after(0);
    let waiter = DeletionWaiter::new(&dependents, &lister, &LogReporter, wait_config());
    waiter
        .wait_backup_deleted(&key(), Some(&s3_policy(false)), &verify)
        .await
        .unwrap();
    assert_eq!(lister.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_volume_backups_need_no_listing() {
    let dependents = FakeDependents::gone_after(0);
    let lister = FakeLister::failing();
    let waiter = DeletionWaiter::new(&dependents, &lister, &LogReporter, wait_config());
    let policy = BackupPolicy {
        storage: BackupStorage::PersistentVolume(Some(PvSource { volume_size_in_mb: 100 })),
        auto_delete: true,
        ..BackupPolicy::default()
    };

    waiter.wait_backup_deleted(&key(), Some(&policy), &options()).await.unwrap();
    waiter.wait_backup_deleted(&key(), None, &options()).await.unwrap();
    assert_eq!(lister.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_terminating_dependents() {
    let dependents = FakeDependents::terminating_forever();
    let lister = FakeLister::empty_after(0);
    let waiter = DeletionWaiter::new(&dependents, &lister, &LogReporter, wait_config());

    // Marked for deletion is enough by default
    waiter.wait_backup_deleted(&key(), None, &options()).await.unwrap();

    let strict = StorageCheckerOptions {
        deleted_from_api: true,
        ..options()
    };
    let err = waiter.wait_backup_deleted(&key(), None, &strict).await.unwrap_err();
    assert!(matches!(err, Error::DeletionTimeout { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_delete_cluster_and_backup() {
    let cluster = helpers::cluster(
        "prod",
        "etcd1",
        EtcdClusterSpec {
            size: 3,
            version: "3.2.13".to_owned(),
            backup: Some(s3_policy(true)),
        },
    );
    let store = FakeClusterStore::with_cluster(cluster);
    let dependents = FakeDependents::gone_after(2);
    let lister = FakeLister::empty_after(1);
    let waiter = DeletionWaiter::new(&dependents, &lister, &LogReporter, wait_config());
    let policy = store.stored().unwrap().spec.backup;

    delete_cluster_and_backup(&store, &waiter, &key(), policy.as_ref(), &options())
        .await
        .unwrap();

    assert!(store.stored().is_none());
    assert_eq!(dependents.calls(), 3);

    // Deleting again fails before any polling
    let err = delete_cluster_and_backup(&store, &waiter, &key(), policy.as_ref(), &options())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Store {
            source: StoreError::NotFound,
            ..
        }
    ));
    assert_eq!(dependents.calls(), 3);
}
