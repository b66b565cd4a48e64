mod common;

use assert_cmd::cargo_bin;
use common::request_file;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_sqlite_persistence_across_runs() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("cashier.db");

    // 1. First run: a deposit registers the currency and fills the safe.
    let first = request_file(&["cash_in,1,http://a,100,10,note-10,deposit-1"]);
    let output1 = Command::new(cargo_bin!("cashier"))
        .arg(first.path())
        .arg("--db-path")
        .arg(&db_path)
        .arg("--user-create")
        .output()
        .expect("Failed to execute command");
    assert!(output1.status.success());
    assert!(String::from_utf8_lossy(&output1.stdout).contains("1,http://a,100"));

    // 2. Second run: the currency is known, so no --user-create is needed.
    let second = request_file(&[
        "cash_in,1,http://a,50,20,note-20,deposit-2",
        "cash_out,1,http://a,30,,,withdraw-1",
    ]);
    let output2 = Command::new(cargo_bin!("cashier"))
        .arg(second.path())
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output2.status.success());
    assert!(String::from_utf8_lossy(&output2.stdout).contains("1,http://a,120"));
}
