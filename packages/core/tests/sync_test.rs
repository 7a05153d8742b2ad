//! Integration tests for `sync` against in-memory vaults.

mod common;

use common::{engine, store, InMemoryVault};
use keyvault_sync::cloud::SecretStore;
use keyvault_sync::fanout::ProgressFn;
use keyvault_sync::source::SourceSnapshot;
use keyvault_sync::sync::{sync_report, sync_secrets, SyncOptions, SyncRow, SyncStatus, SyncSummary};
use std::sync::{Arc, Mutex};

const SOURCE: &str = "https://kv-source.vault.azure.net/";
const T1: &str = "https://kv-target-1.vault.azure.net/";
const T2: &str = "https://kv-target-2.vault.azure.net/";

fn row(secret: &str, target: &str, status: SyncStatus) -> SyncRow {
    SyncRow {
        secret: secret.to_string(),
        target: target.to_string(),
        status,
    }
}

fn replace() -> SyncOptions {
    SyncOptions {
        replace_if_exist: true,
        dry_run: false,
    }
}

#[tokio::test]
async fn test_sync_into_empty_and_partial_targets_with_replace() {
    let source = Arc::new(
        InMemoryVault::new("kv-source")
            .with_secret("a", "1")
            .with_secret("b", "2"),
    );
    let t1 = Arc::new(InMemoryVault::new("kv-target-1"));
    let t2 = Arc::new(InMemoryVault::new("kv-target-2").with_secret("a", "old"));

    let rows = sync_secrets(store(&source), vec![store(&t1), store(&t2)], &engine(4), replace())
        .await
        .unwrap();

    assert_eq!(
        rows,
        vec![
            row("a", T1, SyncStatus::Synced),
            row("b", T1, SyncStatus::Synced),
            row("a", T2, SyncStatus::Replaced),
            row("b", T2, SyncStatus::Synced),
        ]
    );

    assert_eq!(t1.snapshot(), source.snapshot());
    assert_eq!(t2.snapshot(), source.snapshot());
}

#[tokio::test]
async fn test_second_run_without_replace_only_reports_existing() {
    let source = Arc::new(
        InMemoryVault::new("kv-source")
            .with_secret("a", "1")
            .with_secret("b", "2"),
    );
    let target = Arc::new(InMemoryVault::new("kv-target-1"));

    let first = sync_secrets(store(&source), vec![store(&target)], &engine(2), SyncOptions::default())
        .await
        .unwrap();
    assert!(first.iter().all(|r| r.status == SyncStatus::Synced));
    assert_eq!(target.writes(), 2);

    let second = sync_secrets(store(&source), vec![store(&target)], &engine(2), SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(second.len(), 2);
    assert!(second.iter().all(|r| r.status == SyncStatus::AlreadyExists));
    assert_eq!(target.writes(), 2, "no writes on the second run");
}

#[tokio::test]
async fn test_existing_secret_is_kept_without_replace() {
    let source = Arc::new(InMemoryVault::new("kv-source").with_secret("a", "new"));
    let target = Arc::new(InMemoryVault::new("kv-target-1").with_secret("a", "old"));

    let rows = sync_secrets(store(&source), vec![store(&target)], &engine(2), SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(rows, vec![row("a", T1, SyncStatus::AlreadyExists)]);
    assert_eq!(target.value("a").as_deref(), Some("old"));
}

#[tokio::test]
async fn test_replace_overwrites_existing_value() {
    let source = Arc::new(InMemoryVault::new("kv-source").with_secret("a", "new"));
    let target = Arc::new(InMemoryVault::new("kv-target-1").with_secret("a", "old"));

    let rows = sync_secrets(store(&source), vec![store(&target)], &engine(2), replace())
        .await
        .unwrap();

    assert_eq!(rows, vec![row("a", T1, SyncStatus::Replaced)]);
    assert_eq!(target.value("a").as_deref(), Some("new"));
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let source = Arc::new(
        InMemoryVault::new("kv-source")
            .with_secret("a", "new")
            .with_secret("b", "2"),
    );
    let target = Arc::new(InMemoryVault::new("kv-target-1").with_secret("a", "old"));

    let options = SyncOptions {
        replace_if_exist: true,
        dry_run: true,
    };
    let rows = sync_secrets(store(&source), vec![store(&target)], &engine(2), options)
        .await
        .unwrap();

    assert_eq!(
        rows,
        vec![
            row("a", T1, SyncStatus::Replaced),
            row("b", T1, SyncStatus::Synced),
        ]
    );
    assert_eq!(target.writes(), 0);
    assert_eq!(target.value("a").as_deref(), Some("old"));
    assert_eq!(target.value("b"), None);
}

#[tokio::test]
async fn test_failed_write_is_isolated_to_its_pair() {
    let source = Arc::new(
        InMemoryVault::new("kv-source")
            .with_secret("a", "1")
            .with_secret("b", "2"),
    );
    let t1 = Arc::new(InMemoryVault::new("kv-target-1").failing_set("a"));
    let t2 = Arc::new(InMemoryVault::new("kv-target-2"));

    let rows = sync_secrets(store(&source), vec![store(&t1), store(&t2)], &engine(4), replace())
        .await
        .unwrap();

    assert_eq!(rows.len(), 4);
    match &rows[0].status {
        SyncStatus::Error(reason) => assert!(reason.contains("write denied"), "reason: {}", reason),
        other => panic!("expected an error row, got {:?}", other),
    }
    assert_eq!(rows[1], row("b", T1, SyncStatus::Synced));
    assert_eq!(rows[2], row("a", T2, SyncStatus::Synced));
    assert_eq!(rows[3], row("b", T2, SyncStatus::Synced));

    let summary = SyncSummary::from_rows(&rows);
    assert_eq!(summary.synced, 3);
    assert_eq!(summary.errors, 1);
}

#[tokio::test]
async fn test_unreadable_source_secret_fails_for_every_target() {
    let source = Arc::new(
        InMemoryVault::new("kv-source")
            .with_secret("a", "1")
            .with_secret("b", "2")
            .failing_get("b"),
    );
    let t1 = Arc::new(InMemoryVault::new("kv-target-1"));
    let t2 = Arc::new(InMemoryVault::new("kv-target-2"));

    let rows = sync_secrets(store(&source), vec![store(&t1), store(&t2)], &engine(4), replace())
        .await
        .unwrap();

    assert_eq!(rows.len(), 4);
    let failed: Vec<&SyncRow> = rows.iter().filter(|r| r.status.is_error()).collect();
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|r| r.secret == "b"));
    assert_eq!(t1.value("b"), None);
    assert_eq!(t2.value("b"), None);
    assert_eq!(t1.value("a").as_deref(), Some("1"));
}

#[tokio::test]
async fn test_unlistable_source_aborts() {
    let source = Arc::new(InMemoryVault::new("kv-source").failing_listing());
    let target = Arc::new(InMemoryVault::new("kv-target-1"));

    let result = sync_secrets(store(&source), vec![store(&target)], &engine(2), replace()).await;

    assert!(result.is_err());
    assert_eq!(target.writes(), 0);
}

#[tokio::test]
async fn test_empty_source_produces_no_rows() {
    let source = Arc::new(InMemoryVault::new("kv-source"));
    let target = Arc::new(InMemoryVault::new("kv-target-1"));

    let rows = sync_secrets(store(&source), vec![store(&target)], &engine(2), replace())
        .await
        .unwrap();

    assert!(rows.is_empty());
    assert!(sync_report(&rows, replace()).is_empty());
}

#[test]
fn test_sync_on_a_blocking_runtime() {
    let source = Arc::new(InMemoryVault::new("kv-source").with_secret("a", "1"));
    let target = Arc::new(InMemoryVault::new("kv-target-1"));

    let rows = tokio_test::block_on(sync_secrets(
        store(&source),
        vec![store(&target)],
        &engine(1),
        SyncOptions::default(),
    ))
    .unwrap();

    assert_eq!(rows, vec![row("a", T1, SyncStatus::Synced)]);
    assert_eq!(source.uri(), SOURCE);
}

#[tokio::test]
async fn test_source_is_read_once_per_secret_whatever_the_target_count() {
    let source = Arc::new(
        InMemoryVault::new("kv-source")
            .with_secret("a", "1")
            .with_secret("b", "2")
            .with_secret("c", "3"),
    );
    let targets: Vec<Arc<InMemoryVault>> = (1..=4)
        .map(|i| Arc::new(InMemoryVault::new(&format!("kv-target-{}", i)).with_secret("a", "old")))
        .collect();

    let rows = sync_secrets(
        store(&source),
        targets.iter().map(store).collect(),
        &engine(4),
        replace(),
    )
    .await
    .unwrap();

    assert_eq!(rows.len(), 12);
    assert_eq!(source.reads(), 3);
    for target in &targets {
        assert_eq!(target.reads(), 3, "one existence check per secret");
        assert_eq!(target.snapshot(), source.snapshot());
    }
}

#[tokio::test]
async fn test_source_phase_reports_its_own_progress() {
    let source = Arc::new(
        InMemoryVault::new("kv-source")
            .with_secret("a", "1")
            .with_secret("b", "2")
            .with_secret("c", "3"),
    );

    let seen: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let progress: ProgressFn = Arc::new(move |done: usize, total: usize| {
        sink.lock().unwrap().push((done, total));
    });

    let snapshot = SourceSnapshot::load(store(&source), &engine(2).with_progress(progress))
        .await
        .unwrap();

    assert_eq!(snapshot.len(), 3);
    assert!(!snapshot.is_empty());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen.last(), Some(&(3, 3)));
    assert!(seen.iter().all(|(_, total)| *total == 3));
}

#[tokio::test]
async fn test_empty_source_snapshot() {
    let source = Arc::new(InMemoryVault::new("kv-source"));

    let snapshot = SourceSnapshot::load(store(&source), &engine(2)).await.unwrap();

    assert!(snapshot.is_empty());
    assert_eq!(source.reads(), 0);
}
