/// End-to-end tests driving the `cohortkv` binary.
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::{tempdir, TempDir};

fn cohortkv(db: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_cohortkv"));
    cmd.arg("--db")
        .arg(db)
        .arg("--no-metrics")
        .env("RUST_LOG", "warn")
        .env_remove("COHORTKV_DB_PATH");
    cmd
}

fn run(cmd: &mut Command) -> Output {
    cmd.output().expect("failed to run cohortkv")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).to_string()
}

fn write_file(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

/// Two campaigns: 1 = {d1}, 2 = {d1, d2}. Returns (tempdir, db path).
fn loaded_store() -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let a = write_file(dir.path(), "a.txt", "d1\n");
    let b = write_file(dir.path(), "b.txt", "d1\nd2\n");
    let manifest = write_file(
        dir.path(),
        "manifest.csv",
        &format!("1,{}\n2,{}\n", a.display(), b.display()),
    );
    let db = dir.path().join("db.redb");

    let out = run(cohortkv(&db).arg("load").arg(&manifest));
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(stdout(&out).contains("loaded 3 devices from 2 files"));
    (dir, db)
}

fn campaigns_of(db: &Path, device: &str) -> String {
    let out = run(cohortkv(db).arg("get").arg(device));
    assert!(out.status.success());
    let mut ids: Vec<String> = stdout(&out).trim().split(',').map(str::to_string).collect();
    ids.sort();
    ids.join(",")
}

#[test]
fn test_load_then_get() {
    let (_dir, db) = loaded_store();

    assert_eq!(campaigns_of(&db, "d1"), "1,2");
    assert_eq!(campaigns_of(&db, "d2"), "2");
    let out = run(cohortkv(&db).arg("get").arg("d3"));
    assert_eq!(stdout(&out).trim(), "(nil)");
}

#[test]
fn test_update_from_directory_is_idempotent() {
    let (dir, db) = loaded_store();
    let updates = dir.path().join("updates");
    fs::create_dir(&updates).unwrap();
    write_file(&updates, "3.csv", "d1\n");

    let first = run(cohortkv(&db).arg("update").arg("--dir").arg(&updates));
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    assert!(stdout(&first).contains("1 updated, 0 up to date"));
    assert_eq!(campaigns_of(&db, "d1"), "1,2,3");

    let second = run(cohortkv(&db).arg("update").arg("--dir").arg(&updates));
    assert!(stdout(&second).contains("0 updated, 1 up to date"));
}

#[test]
fn test_update_remove() {
    let (dir, db) = loaded_store();
    let file = write_file(dir.path(), "2.csv", "d1\nd2\n");

    let out = run(cohortkv(&db).arg("update").arg("--remove").arg(&file));
    assert!(out.status.success());

    assert_eq!(campaigns_of(&db, "d1"), "1");
    let out = run(cohortkv(&db).arg("get").arg("d2"));
    assert_eq!(stdout(&out).trim(), "");
}

#[test]
fn test_stats_counts_records() {
    let (_dir, db) = loaded_store();
    let out = run(cohortkv(&db).arg("stats"));
    assert!(stdout(&out).contains("records: 2"));
}

#[test]
fn test_bad_manifest_fails() {
    let dir = tempdir().unwrap();
    let manifest = write_file(dir.path(), "manifest.csv", "one,a.txt\n");
    let db = dir.path().join("db.redb");

    let out = run(cohortkv(&db).arg("load").arg(&manifest));

    assert!(!out.status.success());
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.contains("manifest.csv:1"), "{err}");
}

#[test]
fn test_get_on_missing_store_fails() {
    let dir = tempdir().unwrap();
    let out = run(cohortkv(&dir.path().join("absent.redb")).arg("get").arg("d1"));
    assert!(!out.status.success());
}

#[cfg(unix)]
#[test]
fn test_serve_answers_and_stops_on_sigterm() {
    let (_dir, db) = loaded_store();
    let mut child = cohortkv(&db)
        .arg("serve")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut banner = String::new();
    BufReader::new(child.stdout.take().unwrap())
        .read_line(&mut banner)
        .unwrap();
    let addr = banner.trim().trim_start_matches("listening on ").to_string();

    let mut conn = TcpStream::connect(&addr).unwrap();
    conn.write_all(b"PING\r\nGET d2\r\nGET d3\r\nQUIT\r\n").unwrap();
    let mut replies = String::new();
    conn.read_to_string(&mut replies).unwrap();
    assert_eq!(replies, "+PONG\r\n*1\r\n:2\r\n$-1\r\n+OK\r\n");

    let killed = Command::new("kill")
        .arg("-TERM")
        .arg(child.id().to_string())
        .status()
        .unwrap();
    assert!(killed.success());
    let status = child.wait().unwrap();
    assert!(status.success(), "{status:?}");
}
