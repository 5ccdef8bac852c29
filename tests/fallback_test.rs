use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_rocksdb_fallback_warning() {
    let mut cmd = Command::new(cargo_bin!("regpay"));
    cmd.arg("tests/fixtures/replay.jsonl")
        .arg("--programs")
        .arg("tests/fixtures/programs.csv")
        .arg("--gateway-secret")
        .arg("test-secret")
        .arg("--db-path")
        .arg("some_db");

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."))
        .stdout(predicate::str::contains(",IW,confirmed,success,250"));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_no_fallback_warning() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut cmd = Command::new(cargo_bin!("regpay"));
    cmd.arg("tests/fixtures/replay.jsonl")
        .arg("--programs")
        .arg("tests/fixtures/programs.csv")
        .arg("--gateway-secret")
        .arg("test-secret")
        .arg("--db-path")
        .arg(&db_path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Falling back").not());
}
