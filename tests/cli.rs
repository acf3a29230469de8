// End-to-end runs of the `backup` binary against a fake mysqldump script.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::{TempDir, tempdir};

const PASSWORD: &str = "hunter2-e2e";

fn fake_dump(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-mysqldump");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

// A clean environment so nothing from the developer's shell leaks in.
fn backup_cmd(scratch: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_backup"));
    cmd.env_clear()
        .env("PATH", std::env::var("PATH").unwrap_or_default())
        .env("RUST_LOG", "info")
        .current_dir(scratch.path());
    cmd
}

fn with_db_env(cmd: &mut Command, bin: &Path) {
    cmd.env("DB_HOST", "127.0.0.1")
        .env("DB_USER", "root")
        .env("DB_PASSWORD", PASSWORD)
        .env("BACKUP_DUMP_BIN", bin);
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_run_success_prints_artifact_path() {
    let scratch = tempdir().unwrap();
    let bin = fake_dump(
        scratch.path(),
        r#"echo "-- MySQL dump 10.13"
echo "CREATE TABLE employees (id int, name varchar(64));"
echo "INSERT INTO employees VALUES (1,'Ana'),(2,'Bo'),(3,'Cy');"
echo "-- Dump completed""#,
    );

    let mut cmd = backup_cmd(&scratch);
    with_db_env(&mut cmd, &bin);
    let output = cmd
        .args(["run", "--db", "mydatabase", "--out", "backups", "--verify-markers"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr_of(&output));
    let stdout = stdout_of(&output);
    let line = stdout.trim();
    assert_eq!(stdout.lines().count(), 1);
    assert!(line.starts_with("backups/mydatabase_backup_"));
    assert!(line.ends_with(".sql"));

    let content = std::fs::read_to_string(scratch.path().join(line)).unwrap();
    assert!(content.contains("CREATE TABLE employees"));
    assert!(content.contains("INSERT INTO employees"));
}

#[test]
fn test_run_with_rejected_credentials_exits_2() {
    let scratch = tempdir().unwrap();
    let bin = fake_dump(
        scratch.path(),
        "echo \"mysqldump: Got error: 1045: Access denied for user 'root' ($MYSQL_PWD)\" >&2\n\
         exit 2",
    );

    let mut cmd = backup_cmd(&scratch);
    with_db_env(&mut cmd, &bin);
    let output = cmd
        .args(["run", "--db", "mydatabase", "--out", "backups"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(stdout_of(&output).is_empty());
    let stderr = stderr_of(&output);
    assert!(stderr.contains("Access denied"));
    assert!(!stderr.contains(PASSWORD));

    let leftovers: Vec<_> = std::fs::read_dir(scratch.path().join("backups"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".sql"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_run_without_password_exits_1() {
    let scratch = tempdir().unwrap();
    let bin = fake_dump(scratch.path(), "exit 0");

    let output = backup_cmd(&scratch)
        .env("DB_HOST", "127.0.0.1")
        .env("DB_USER", "root")
        .env("BACKUP_DUMP_BIN", &bin)
        .args(["run", "--db", "mydatabase", "--out", "backups"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("DB_PASSWORD"));
    assert!(!scratch.path().join("backups").exists());
}

#[test]
fn test_empty_dump_exits_3() {
    let scratch = tempdir().unwrap();
    let bin = fake_dump(scratch.path(), "exit 0");

    let mut cmd = backup_cmd(&scratch);
    with_db_env(&mut cmd, &bin);
    let output = cmd
        .args(["run", "--db", "mydatabase", "--out", "backups"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(3));
    assert!(stdout_of(&output).is_empty());
}

#[test]
fn test_list_and_prune() {
    let scratch = tempdir().unwrap();
    let dir = scratch.path().join("backups");
    std::fs::create_dir_all(&dir).unwrap();
    for stamp in ["20260101T000000Z", "20260102T000000Z", "20260103T000000Z"] {
        std::fs::write(dir.join(format!("mydatabase_backup_{}.sql", stamp)), "-- x").unwrap();
    }
    std::fs::write(dir.join("otherdb_backup_20260101T000000Z.sql"), "-- x").unwrap();

    let listed = backup_cmd(&scratch)
        .args(["list", "--db", "mydatabase", "--out", "backups"])
        .output()
        .unwrap();
    assert_eq!(listed.status.code(), Some(0));
    let lines: Vec<String> = stdout_of(&listed).lines().map(str::to_string).collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("mydatabase_backup_20260103T000000Z.sql"));

    let pruned = backup_cmd(&scratch)
        .args(["prune", "--db", "mydatabase", "--out", "backups", "--keep", "1"])
        .output()
        .unwrap();
    assert_eq!(pruned.status.code(), Some(0));
    assert_eq!(stdout_of(&pruned).lines().count(), 2);
    assert!(dir.join("mydatabase_backup_20260103T000000Z.sql").exists());
    assert!(!dir.join("mydatabase_backup_20260101T000000Z.sql").exists());
    assert!(dir.join("otherdb_backup_20260101T000000Z.sql").exists());
}

#[test]
fn test_usage_error_exits_1() {
    let scratch = tempdir().unwrap();
    let output = backup_cmd(&scratch)
        .args(["run", "--keep", "0"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_prune_refuses_while_backup_holds_lock() {
    let scratch = tempdir().unwrap();
    let dir = scratch.path().join("backups");
    std::fs::create_dir_all(&dir).unwrap();
    for stamp in ["20260101T000000Z", "20260102T000000Z"] {
        std::fs::write(dir.join(format!("mydatabase_backup_{}.sql", stamp)), "-- x").unwrap();
    }
    std::fs::write(dir.join(".mydatabase.lock"), "4242\n").unwrap();

    let output = backup_cmd(&scratch)
        .args(["prune", "--db", "mydatabase", "--out", "backups", "--keep", "1"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(stdout_of(&output).is_empty());
    assert!(stderr_of(&output).contains("pid 4242"));
    assert!(dir.join("mydatabase_backup_20260101T000000Z.sql").exists());
    assert!(dir.join(".mydatabase.lock").exists());
}
