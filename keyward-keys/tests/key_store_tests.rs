//! Key Store Integration Tests

use chrono::{DateTime, Duration, TimeZone, Utc};
use keyward_keys::{KeyMaterial, KeyStore, StorageError};
use tempfile::TempDir;

fn at(offset_hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap() + Duration::hours(offset_hours)
}

fn material(byte: u8) -> KeyMaterial {
    KeyMaterial::new(vec![byte; 32])
}

#[test]
fn test_commit_and_read_current() {
    let dir = TempDir::new().unwrap();
    let store = KeyStore::open(dir.path(), false).unwrap();

    let path = store.commit("app-key.key", &material(7)).unwrap();

    assert_eq!(path, dir.path().join("app-key.key"));
    assert_eq!(store.read_current("app-key.key").unwrap().as_bytes(), &[7u8; 32]);
}

#[test]
fn test_read_missing_key() {
    let dir = TempDir::new().unwrap();
    let store = KeyStore::open(dir.path(), false).unwrap();

    assert!(matches!(
        store.read_current("app-key.key"),
        Err(StorageError::NotFound(_))
    ));
}

#[test]
fn test_overwrite_without_keep_old() {
    let dir = TempDir::new().unwrap();
    let store = KeyStore::open(dir.path(), false).unwrap();

    store.commit_at("app-key.key", &material(1), at(0)).unwrap();
    store.commit_at("app-key.key", &material(2), at(24)).unwrap();

    assert_eq!(store.read_current("app-key.key").unwrap().as_bytes(), &[2u8; 32]);
    assert!(store.retired("app-key.key").unwrap().is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_retention_keeps_most_recent() {
    let dir = TempDir::new().unwrap();
    let store = KeyStore::open(dir.path(), true).unwrap();

    for i in 0..6u8 {
        store
            .commit_at("app-key.key", &material(i), at(i as i64 * 24))
            .unwrap();
        store.prune("app-key.key", 3).unwrap();
    }

    let retired = store.retired("app-key.key").unwrap();
    assert_eq!(retired.len(), 3);
    // Retired at commits 5, 4 and 3, holding materials 4, 3 and 2
    for (artifact, (hours, byte)) in retired.iter().zip([(120, 4u8), (96, 3), (72, 2)]) {
        assert_eq!(artifact.retired_at, at(hours));
        assert_eq!(std::fs::read(&artifact.path).unwrap(), vec![byte; 32]);
    }
    assert_eq!(store.read_current("app-key.key").unwrap().as_bytes(), &[5u8; 32]);
}

#[test]
fn test_prune_removes_oldest() {
    let dir = TempDir::new().unwrap();
    let store = KeyStore::open(dir.path(), true).unwrap();

    for i in 0..5 {
        std::fs::write(
            dir.path().join(format!("app-key.key.2025030{}120000", i + 1)),
            b"old",
        )
        .unwrap();
    }

    let report = store.prune("app-key.key", 3).unwrap();

    assert_eq!(report.kept, 3);
    assert_eq!(report.removed.len(), 2);
    assert!(report.failed.is_empty());
    assert!(!dir.path().join("app-key.key.20250301120000").exists());
    assert!(!dir.path().join("app-key.key.20250302120000").exists());
    assert!(dir.path().join("app-key.key.20250305120000").exists());
}

#[test]
fn test_prune_ignores_other_keys_and_unrelated_files() {
    let dir = TempDir::new().unwrap();
    let store = KeyStore::open(dir.path(), true).unwrap();

    std::fs::write(dir.path().join("app-key.key.20250301120000"), b"old").unwrap();
    std::fs::write(dir.path().join("app-key.key.20250302120000"), b"old").unwrap();
    std::fs::write(dir.path().join("app-key.key.backup"), b"manual").unwrap();
    std::fs::write(dir.path().join("other.key.20250301120000"), b"other").unwrap();

    let report = store.prune("app-key.key", 0).unwrap();

    assert_eq!(report.removed.len(), 2);
    assert!(dir.path().join("app-key.key.backup").exists());
    assert!(dir.path().join("other.key.20250301120000").exists());
}

#[test]
fn test_same_second_retirements_do_not_collide() {
    let dir = TempDir::new().unwrap();
    let store = KeyStore::open(dir.path(), true).unwrap();

    store.commit_at("app-key.key", &material(1), at(0)).unwrap();
    store.commit_at("app-key.key", &material(2), at(1)).unwrap();
    store.commit_at("app-key.key", &material(3), at(1)).unwrap();

    let retired = store.retired("app-key.key").unwrap();
    assert_eq!(retired.len(), 2);
    assert_eq!(retired[0].sequence, 1);
    assert_eq!(std::fs::read(&retired[0].path).unwrap(), vec![2u8; 32]);
    assert_eq!(retired[1].sequence, 0);
    assert_eq!(std::fs::read(&retired[1].path).unwrap(), vec![1u8; 32]);
}

#[test]
fn test_interrupted_commit_keeps_previous_key() {
    let dir = TempDir::new().unwrap();
    let store = KeyStore::open(dir.path(), true).unwrap();
    store.commit_at("app-key.key", &material(1), at(0)).unwrap();

    // Staged but never published, as after a crash before the rename
    let staged = store.stage("app-key.key", &material(2)).unwrap();
    let temp_path = staged.temp_path().to_path_buf();
    assert!(temp_path.exists());
    drop(staged);

    assert!(!temp_path.exists());
    assert_eq!(store.read_current("app-key.key").unwrap().as_bytes(), &[1u8; 32]);
    assert!(store.retired("app-key.key").unwrap().is_empty());
}

#[test]
fn test_leftover_staging_file_is_ignored() {
    let dir = TempDir::new().unwrap();
    let store = KeyStore::open(dir.path(), true).unwrap();
    store.commit_at("app-key.key", &material(1), at(0)).unwrap();
    std::fs::write(dir.path().join(".app-key.key.a1b2c3.tmp"), b"partial").unwrap();

    store.commit_at("app-key.key", &material(2), at(24)).unwrap();
    let report = store.prune("app-key.key", 5).unwrap();

    assert_eq!(report.kept, 1);
    assert!(report.removed.is_empty());
    assert_eq!(store.read_current("app-key.key").unwrap().as_bytes(), &[2u8; 32]);
    assert!(dir.path().join(".app-key.key.a1b2c3.tmp").exists());
}

#[test]
fn test_rejects_path_like_names() {
    let dir = TempDir::new().unwrap();
    let store = KeyStore::open(dir.path(), false).unwrap();

    for name in ["", "../escape.key", "nested/app.key", ".hidden"] {
        assert!(
            matches!(store.commit(name, &material(1)), Err(StorageError::InvalidName(_))),
            "{:?} should be rejected",
            name
        );
    }
}

#[test]
fn test_open_creates_missing_root() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("app").join("output");

    let store = KeyStore::open(&root, false).unwrap();
    store.commit("app-key.key", &material(9)).unwrap();

    assert!(root.join("app-key.key").is_file());
}

#[test]
fn test_prune_reports_failed_removals() {
    let dir = TempDir::new().unwrap();
    let store = KeyStore::open(dir.path(), true).unwrap();
    let stuck = dir.path().join("app-key.key.20250301120000");
    std::fs::create_dir(&stuck).unwrap();
    std::fs::write(stuck.join("occupied"), b"x").unwrap();
    std::fs::write(dir.path().join("app-key.key.20250302120000"), b"old").unwrap();

    let report = store.prune("app-key.key", 0).unwrap();

    assert_eq!(report.removed.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, stuck);
}
