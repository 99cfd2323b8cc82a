//! Checkpoint creation and recovery tests.

use tablelog_core::kernel::{Action, Add, Metadata, Protocol, Remove};
use tablelog_core::logstore::checkpoint_uri_from_version;
use tablelog_core::protocol::{checkpoints::create_checkpoint, get_last_checkpoint};
use tablelog_core::{TableLogConfig, TransactionLog};
use tempfile::TempDir;

fn init_actions() -> Vec<Action> {
    vec![
        Action::Protocol(Protocol::new(1, 1)),
        Action::Metadata(Metadata::new("id-1", "Test Table", "csv")),
    ]
}

#[tokio::test]
async fn test_checkpoint_creation() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("test_table");
    let log = TransactionLog::for_table_with_config(
        &path,
        TableLogConfig::default().with_checkpoint_interval(2).unwrap(),
    )
    .unwrap();

    log.write(0, &init_actions()).await.unwrap();

    // version 0 always checkpoints
    let pointer = get_last_checkpoint(log.log_store().as_ref()).await.unwrap();
    assert_eq!(pointer.version(), 0);
    assert!(path
        .join("_delta_log")
        .join("00000000000000000000.checkpoint.parquet")
        .is_file());

    log.write(
        2,
        &[
            Action::Add(Add::new("data/file1.csv", 100, 1)),
            Action::Add(Add::new("data/file2.csv", 200, 2)),
        ],
    )
    .await
    .unwrap();

    let pointer = get_last_checkpoint(log.log_store().as_ref()).await.unwrap();
    assert_eq!(pointer.version(), 2);
    // protocol, metadata, two adds, no commit info on direct writes
    assert_eq!(pointer.size(), 4);
    assert!(path
        .join("_delta_log")
        .join("00000000000000000002.checkpoint.parquet")
        .is_file());
}

#[tokio::test]
async fn test_checkpoint_and_tail_replay_across_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("test_table");
    let config = TableLogConfig::default().with_checkpoint_interval(2).unwrap();
    {
        let log = TransactionLog::for_table_with_config(&path, config.clone()).unwrap();
        log.write(0, &init_actions()).await.unwrap();
        log.write(
            2,
            &[
                Action::Add(Add::new("data/file1.csv", 100, 1)),
                Action::Add(Add::new("data/file2.csv", 200, 2)),
            ],
        )
        .await
        .unwrap();
        log.write(
            4,
            &[
                Action::Add(Add::new("data/file3.csv", 300, 3)),
                Action::Remove(Remove::new("data/file1.csv", 4)),
            ],
        )
        .await
        .unwrap();
        log.write(6, &[Action::Add(Add::new("data/file4.csv", 400, 5))])
            .await
            .unwrap();
    }

    let log = TransactionLog::for_table_with_config(&path, config).unwrap();
    let snapshot = log.update().await.unwrap();
    assert_eq!(snapshot.version(), 6);
    let mut live: Vec<_> = snapshot.all_files().map(|add| add.path.clone()).collect();
    live.sort();
    assert_eq!(
        live,
        vec!["data/file2.csv", "data/file3.csv", "data/file4.csv"]
    );
    assert!(snapshot.protocol().is_some());
    assert!(snapshot.metadata().is_some());
}

#[tokio::test]
async fn test_recovery_combines_checkpoint_with_later_commits() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("test_table");
    // large interval: only version 0 checkpoints, the rest is tail replay
    {
        let log = TransactionLog::for_table(&path).unwrap();
        log.write(0, &init_actions()).await.unwrap();
        log.write(1, &[Action::Add(Add::new("data/file1.csv", 100, 1))])
            .await
            .unwrap();
        log.write(2, &[Action::Add(Add::new("data/file2.csv", 200, 2))])
            .await
            .unwrap();
        log.write(3, &[Action::Remove(Remove::new("data/file1.csv", 3))])
            .await
            .unwrap();
    }

    let log = TransactionLog::for_table(&path).unwrap();
    let pointer = get_last_checkpoint(log.log_store().as_ref()).await.unwrap();
    assert_eq!(pointer.version(), 0);

    let snapshot = log.update().await.unwrap();
    assert_eq!(snapshot.version(), 3);
    let live: Vec<_> = snapshot.all_files().map(|add| add.path.clone()).collect();
    assert_eq!(live, vec!["data/file2.csv"]);
}

#[tokio::test]
async fn test_explicit_checkpoint_matches_replayed_state() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("test_table");
    let log = TransactionLog::for_table(&path).unwrap();
    log.write(0, &init_actions()).await.unwrap();
    log.write(1, &[Action::Add(Add::new("data/file1.csv", 100, 1))])
        .await
        .unwrap();

    let version = create_checkpoint(&log).await.unwrap();
    assert_eq!(version, 1);

    let store = log.log_store().object_store();
    assert!(store.get(&checkpoint_uri_from_version(1)).await.is_ok());

    // a handle recovering purely from the checkpoint sees the same state
    let reopened = TransactionLog::for_table(&path).unwrap();
    let snapshot = reopened.update().await.unwrap();
    assert_eq!(snapshot.version(), 1);
    assert_eq!(snapshot.all_files().count(), 1);
    assert!(snapshot.file("data/file1.csv").is_some());
}

#[tokio::test]
async fn test_checkpoint_skips_intermediate_versions() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("test_table");
    let config = TableLogConfig::default().with_checkpoint_interval(2).unwrap();
    let log = TransactionLog::for_table_with_config(&path, config).unwrap();

    log.write(0, &init_actions()).await.unwrap();
    log.write(1, &[Action::Add(Add::new("data/file1.csv", 100, 1))])
        .await
        .unwrap();

    // version 1 does not hit the cadence
    assert!(!path
        .join("_delta_log")
        .join("00000000000000000001.checkpoint.parquet")
        .exists());
    let pointer = get_last_checkpoint(log.log_store().as_ref()).await.unwrap();
    assert_eq!(pointer.version(), 0);
}
