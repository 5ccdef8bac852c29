#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

const COMPETITION: &str = r#"{"cmd":"competition","at":"2026-05-01T09:00:00Z","competition_id":"spring-cup","name":"Spring Cup","payment_mode":"paid","currency":"EUR"}"#;

fn register(at: &str, registration_id: &str) -> String {
    format!(
        r#"{{"cmd":"register","at":"{at}","competition_id":"spring-cup","payload":{{"contact":{{"name":"Anna","email":"anna@example.org"}},"entries":[{{"registration_id":"{registration_id}","program":"TR","category":"SEN","participant_ref":"{registration_id}","registration_type":"individual"}}]}}}}"#
    )
}

fn run(db_path: &std::path::Path, lines: &[String]) -> String {
    let mut replay = tempfile::NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(replay, "{line}").unwrap();
    }

    let mut cmd = Command::new(cargo_bin!("regpay"));
    cmd.arg(replay.path())
        .arg("--programs")
        .arg("tests/fixtures/programs.csv")
        .arg("--gateway-secret")
        .arg("test-secret")
        .arg("--db-path")
        .arg(db_path);

    let output = cmd.output().expect("Failed to execute command");
    assert!(output.status.success());
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: take the only trio slot and pay for it
    let stdout1 = run(
        &db_path,
        &[
            COMPETITION.to_string(),
            register("2026-05-01T10:00:00Z", "r1"),
            r#"{"cmd":"callback","at":"2026-05-01T10:05:00Z","registration_id":"r1","status":"success","payment_id":"p1"}"#.to_string(),
        ],
    );
    assert!(stdout1.contains(",TR,confirmed,success,90.5"));

    // 2. Second run: reopening the competition keeps the reservation
    let stdout2 = run(
        &db_path,
        &[
            COMPETITION.to_string(),
            register("2026-05-02T10:00:00Z", "r2"),
        ],
    );
    assert!(stdout2.contains("r1,"));
    assert!(stdout2.contains(",TR,confirmed,success,90.5"));
    assert!(!stdout2.contains("r2,"));
}
