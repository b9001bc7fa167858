//! End-to-end behavior of `SnapshotService::create_snapshot`

mod common;

use codesnap_cache::EMPTY_SNAPSHOT_ID;
use codesnap_snapshot::config::ENV_DISABLE_SIZE_LIMIT;
use codesnap_snapshot::{SnapshotConfig, SnapshotError, SnapshotOptions};
use common::{harness, harness_with, test_config, write_file, FakeRemote, FakeTransport};
use std::sync::atomic::Ordering;
use tempfile::TempDir;

const KEY: &str = "projects/demo";

#[tokio::test]
async fn test_incremental_snapshots_end_to_end() {
    let project = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let h = harness(test_config(), cache_dir.path());

    write_file(project.path(), "a.txt", "1");
    write_file(project.path(), "b.txt", "2");

    let s1 = h
        .service
        .create_snapshot(project.path(), 2, KEY, SnapshotOptions::default())
        .await
        .unwrap();
    assert_eq!(h.transport.uploaded_paths(), vec!["a.txt", "b.txt"]);
    assert_eq!(h.remote.last_commit().unwrap().parent_snapshot_id, EMPTY_SNAPSHOT_ID);

    h.transport.reset();
    write_file(project.path(), "a.txt", "11");
    let s2 = h
        .service
        .create_snapshot(project.path(), 3, KEY, SnapshotOptions::default())
        .await
        .unwrap();
    assert_ne!(s1, s2);
    assert_eq!(h.transport.uploaded_paths(), vec!["a.txt"]);

    let second = h.remote.last_commit().unwrap();
    assert_eq!(second.snapshot_id, s2);
    assert_eq!(second.parent_snapshot_id, s1);
    assert_eq!(second.file_revisions.len(), 1);
    assert_eq!(second.file_revisions[0].size_bytes, 2);

    h.transport.reset();
    let requests_before = h.remote.target_requests.load(Ordering::SeqCst);
    let lookups_before = h.remote.lookups.load(Ordering::SeqCst);
    let s3 = h
        .service
        .create_snapshot(project.path(), 3, KEY, SnapshotOptions::default())
        .await
        .unwrap();
    assert_eq!(s3, s2);
    assert_eq!(h.transport.upload_count(), 0);
    assert_eq!(h.remote.target_requests.load(Ordering::SeqCst), requests_before);
    assert_eq!(h.remote.lookups.load(Ordering::SeqCst), lookups_before);
    assert_eq!(h.remote.commits(), 2);
}

#[tokio::test]
async fn test_identical_content_converges_across_projects() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let h = harness(test_config(), cache_dir.path());

    for root in [first.path(), second.path()] {
        write_file(root, "src/main.rs", "fn main() {}");
        write_file(root, "README.md", "# demo");
    }

    let id_a = h
        .service
        .create_snapshot(first.path(), 0, "project-a", SnapshotOptions::default())
        .await
        .unwrap();
    h.transport.reset();

    let id_b = h
        .service
        .create_snapshot(second.path(), 0, "project-b", SnapshotOptions::default())
        .await
        .unwrap();

    assert_eq!(id_a, id_b);
    assert_eq!(h.transport.upload_count(), 0);
    assert_eq!(h.remote.commits(), 1);
    // The remote hit still records the snapshot for project-b
    assert_eq!(h.cache.get_latest("project-b").unwrap().snapshot_id, id_b);
}

#[tokio::test]
async fn test_corrupt_cache_pointer_recovered() {
    let project = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let h = harness(test_config(), cache_dir.path());
    write_file(project.path(), "a.txt", "1");

    let id = h
        .service
        .create_snapshot(project.path(), 1, KEY, SnapshotOptions::default())
        .await
        .unwrap();

    std::fs::write(h.cache.project_dir(KEY).join("LATEST"), b"\x00garbage\xff").unwrap();

    let again = h
        .service
        .create_snapshot(project.path(), 1, KEY, SnapshotOptions::default())
        .await
        .unwrap();
    assert_eq!(again, id);
    assert!(h.cache.get_latest(KEY).unwrap().has_snapshot());
}

#[tokio::test]
async fn test_corrupt_tree_record_recovered() {
    let project = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let h = harness(test_config(), cache_dir.path());
    write_file(project.path(), "a.txt", "1");

    h.service
        .create_snapshot(project.path(), 1, KEY, SnapshotOptions::default())
        .await
        .unwrap();

    let trees = h.cache.project_dir(KEY).join("trees");
    for entry in std::fs::read_dir(&trees).unwrap() {
        std::fs::write(entry.unwrap().path(), b"not a tree record").unwrap();
    }

    write_file(project.path(), "a.txt", "2");
    let result = h
        .service
        .create_snapshot(project.path(), 1, KEY, SnapshotOptions::default())
        .await
        .unwrap();
    // Treated as a first snapshot
    assert_eq!(h.remote.last_commit().unwrap().snapshot_id, result);
    assert_eq!(h.remote.last_commit().unwrap().parent_snapshot_id, EMPTY_SNAPSHOT_ID);
}

#[tokio::test]
async fn test_commit_rejected_once_retries_once() {
    let project = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let h = harness(test_config(), cache_dir.path());
    write_file(project.path(), "a.txt", "1");
    write_file(project.path(), "b.txt", "2");

    let s1 = h
        .service
        .create_snapshot(project.path(), 2, KEY, SnapshotOptions::default())
        .await
        .unwrap();

    write_file(project.path(), "a.txt", "11");
    h.transport.reset();
    h.remote.reject_next_commits(1);
    let attempts_before = h.remote.commit_attempts.load(Ordering::SeqCst);

    let s2 = h
        .service
        .create_snapshot(project.path(), 3, KEY, SnapshotOptions::default())
        .await
        .unwrap();

    assert_ne!(s1, s2);
    assert_eq!(h.remote.commit_attempts.load(Ordering::SeqCst) - attempts_before, 2);
    // The retry starts from a cleared latest pointer and uploads everything
    let commit = h.remote.last_commit().unwrap();
    assert_eq!(commit.parent_snapshot_id, EMPTY_SNAPSHOT_ID);
    assert_eq!(commit.file_revisions.len(), 2);
    // Only the pointer was cleared; the earlier tree stays in history
    assert_eq!(h.cache.history(KEY).unwrap().len(), 2);
}

#[tokio::test]
async fn test_commit_rejected_twice_fails_without_third_attempt() {
    let project = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let h = harness(test_config(), cache_dir.path());
    write_file(project.path(), "a.txt", "1");
    h.remote.reject_next_commits(2);

    let err = h
        .service
        .create_snapshot(project.path(), 1, KEY, SnapshotOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SnapshotError::CommitFailed(_)));
    assert_eq!(h.remote.commit_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(h.remote.commits(), 0);
    assert!(!h.cache.get_latest(KEY).unwrap().has_snapshot());
}

#[tokio::test]
async fn test_commit_rejected_without_retry() {
    let project = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let h = harness(test_config(), cache_dir.path());
    write_file(project.path(), "a.txt", "1");
    h.remote.reject_next_commits(1);

    let options = SnapshotOptions {
        retry_on_failure: false,
        ..SnapshotOptions::default()
    };
    let err = h
        .service
        .create_snapshot(project.path(), 1, KEY, options)
        .await
        .unwrap_err();

    assert!(err.is_commit_rejection());
    assert_eq!(h.remote.commit_attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_size_limit_raises_before_any_work() {
    let project = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let config = SnapshotConfig {
        max_snapshot_bytes: 10,
        ..test_config()
    };
    let h = harness(config, cache_dir.path());
    write_file(project.path(), "a.txt", "1");

    let err = h
        .service
        .create_snapshot(project.path(), 11, KEY, SnapshotOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::Validation(_)));
    assert!(err.to_string().contains(ENV_DISABLE_SIZE_LIMIT));
    assert_eq!(h.remote.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_size_limit_logged_when_not_raising() {
    let project = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let config = SnapshotConfig {
        max_snapshot_bytes: 10,
        ..test_config()
    };
    let h = harness(config, cache_dir.path());
    write_file(project.path(), "a.txt", "1");

    let options = SnapshotOptions {
        raise_on_validation_failure: false,
        ..SnapshotOptions::default()
    };
    h.service
        .create_snapshot(project.path(), 11, KEY, options)
        .await
        .unwrap();
    assert_eq!(h.remote.commits(), 1);
}

#[tokio::test]
async fn test_size_limit_disabled_by_override() {
    let project = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let mut config = SnapshotConfig {
        max_snapshot_bytes: 10,
        ..test_config()
    };
    config
        .apply_overrides(|key| (key == ENV_DISABLE_SIZE_LIMIT).then(|| "1".to_string()))
        .unwrap();
    let h = harness(config, cache_dir.path());
    write_file(project.path(), "a.txt", "1");

    h.service
        .create_snapshot(project.path(), 1_000_000, KEY, SnapshotOptions::default())
        .await
        .unwrap();
    assert_eq!(h.remote.commits(), 1);
}

#[tokio::test]
async fn test_file_count_limit() {
    let project = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let config = SnapshotConfig {
        max_file_count: 2,
        ..test_config()
    };
    let h = harness(config, cache_dir.path());
    for name in ["a.txt", "b.txt", "c.txt"] {
        write_file(project.path(), name, name);
    }

    let err = h
        .service
        .create_snapshot(project.path(), 0, KEY, SnapshotOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::Validation(_)));
    assert_eq!(h.transport.upload_count(), 0);
    assert_eq!(h.remote.target_requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_upload_failure_commits_nothing() {
    let project = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let remote = FakeRemote::new();
    let transport = FakeTransport::new();
    transport.fail_fatally("b.txt");
    let h = harness_with(test_config(), cache_dir.path(), remote, transport);
    write_file(project.path(), "a.txt", "1");
    write_file(project.path(), "b.txt", "2");

    let err = h
        .service
        .create_snapshot(project.path(), 2, KEY, SnapshotOptions::default())
        .await
        .unwrap_err();

    match err {
        SnapshotError::Upload {
            scheduled_files,
            scheduled_bytes,
            ..
        } => {
            assert_eq!(scheduled_files, 2);
            assert_eq!(scheduled_bytes, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.remote.commit_attempts.load(Ordering::SeqCst), 0);
    assert!(!h.cache.get_latest(KEY).unwrap().has_snapshot());
}

#[tokio::test]
async fn test_lookup_failure_propagates_before_upload() {
    let project = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let h = harness(test_config(), cache_dir.path());
    h.remote.fail_lookups(500);
    write_file(project.path(), "a.txt", "1");

    let err = h
        .service
        .create_snapshot(project.path(), 1, KEY, SnapshotOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SnapshotError::Remote { status: 500, .. }));
    assert_eq!(h.remote.lookups.load(Ordering::SeqCst), 1);
    assert_eq!(h.remote.target_requests.load(Ordering::SeqCst), 0);
    assert_eq!(h.transport.upload_count(), 0);
    assert_eq!(h.remote.commit_attempts.load(Ordering::SeqCst), 0);
    assert!(!h.cache.get_latest(KEY).unwrap().has_snapshot());
}

#[tokio::test]
async fn test_empty_folder_first_snapshot_commits() {
    let project = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let h = harness(test_config(), cache_dir.path());

    let first = h
        .service
        .create_snapshot(project.path(), 0, KEY, SnapshotOptions::default())
        .await
        .unwrap();
    assert_eq!(h.remote.commits(), 1);
    assert!(h.remote.last_commit().unwrap().file_revisions.is_empty());

    let second = h
        .service
        .create_snapshot(project.path(), 0, KEY, SnapshotOptions::default())
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(h.remote.commits(), 1);
}

#[tokio::test]
async fn test_exclusion_rules_applied() {
    let project = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    write_file(project.path(), ".gitignore", "*.log\n");
    write_file(project.path(), "app.py", "print()");
    write_file(project.path(), "debug.log", "noise");

    let rules = codesnap_core::ExclusionRules::load(project.path(), Default::default()).unwrap();
    let h = harness(test_config(), cache_dir.path());
    let service = h
        .service
        .with_exclusion(codesnap_snapshot::exclude_with(std::sync::Arc::new(rules)));

    service
        .create_snapshot(project.path(), 0, KEY, SnapshotOptions::default())
        .await
        .unwrap();
    assert_eq!(h.transport.uploaded_paths(), vec![".gitignore", "app.py"]);
}

#[tokio::test]
async fn test_publish_folder_measures_under_rules() {
    let project = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    write_file(project.path(), ".snapignore", "data/\n");
    write_file(project.path(), "main.py", "print(1)");
    write_file(project.path(), "data/huge.bin", &"x".repeat(64));

    let config = SnapshotConfig {
        max_snapshot_bytes: 32,
        ..test_config()
    };
    let h = harness(config, cache_dir.path());

    // data/ alone would exceed the limit; excluded, it neither counts nor uploads
    h.service
        .publish_folder(project.path(), KEY, SnapshotOptions::default())
        .await
        .unwrap();
    assert_eq!(h.transport.uploaded_paths(), vec![".snapignore", "main.py"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_publish_folder_skips_editor_lock_links() {
    let project = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    write_file(project.path(), "main.py", "print(1)");
    // Emacs keeps `.#name` as a dangling link while the file is being edited
    std::os::unix::fs::symlink("user@host.4242:1700000000", project.path().join(".#main.py")).unwrap();
    let h = harness(test_config(), cache_dir.path());

    h.service
        .publish_folder(project.path(), KEY, SnapshotOptions::default())
        .await
        .unwrap();
    assert_eq!(h.transport.uploaded_paths(), vec!["main.py"]);
}
