// Integration tests for the `gridchat` binary.
// Run with: cargo test -p gridchat-cli --test cli_tests -- --nocapture

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

fn gridchat() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_gridchat"));
    cmd.env_remove("GRIDCHAT_OPENAI_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("GRIDCHAT_CONFIG")
        .env("GRIDCHAT_LOG", "warn");
    cmd
}

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn local_config(dir: &Path) -> PathBuf {
    write_file(dir, "settings.toml", "[agent]\nprovider = \"local\"\n")
}

/// Kills the server when the test ends, pass or fail.
struct ServerGuard(Child);

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

// ---------------------------------------------------------------------------
// tools
// ---------------------------------------------------------------------------

#[test]
fn tools_prints_every_schema() {
    let output = gridchat().arg("tools").output().expect("gridchat tools");
    assert!(output.status.success());

    let schemas: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).expect("valid JSON array");
    let names: Vec<&str> = schemas
        .iter()
        .map(|s| s["function"]["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 12);
    assert!(names.contains(&"write_range"));
    assert!(names.contains(&"aggregate"));
    assert!(schemas.iter().all(|s| s["type"] == "function"));
}

// ---------------------------------------------------------------------------
// inspect
// ---------------------------------------------------------------------------

#[test]
fn inspect_csv_json() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_file(dir.path(), "sales.csv", "region,amount\nnorth,10\nsouth,30\n");

    let output = gridchat()
        .args(["inspect", csv.to_str().unwrap(), "--json"])
        .output()
        .expect("gridchat inspect --json");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let desc: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(desc["name"], "sales");
    assert_eq!(desc["rows"], 3);
    assert_eq!(desc["cols"], 2);
    assert_eq!(desc["used_range"], "A1:B3");
    assert_eq!(desc["header"][0], "region");
    assert_eq!(desc["sequence"], 0);
}

#[test]
fn inspect_text_is_the_system_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_file(dir.path(), "sales.csv", "region,amount\nnorth,10\n");

    let output = gridchat().args(["inspect", csv.to_str().unwrap()]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("sales"));
    assert!(stdout.contains("region"));
}

#[test]
fn inspect_missing_file_is_io_error() {
    let output = gridchat().args(["inspect", "/nonexistent/grid.csv"]).output().unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("error:"));
}

#[test]
fn inspect_unsupported_format_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "notes.pdf", "%PDF-1.4");
    let output = gridchat().args(["inspect", path.to_str().unwrap()]).output().unwrap();
    assert_eq!(output.status.code(), Some(4));
}

// ---------------------------------------------------------------------------
// doctor
// ---------------------------------------------------------------------------

#[test]
fn doctor_reports_missing_key() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_file(dir.path(), "settings.toml", "[agent]\nprovider = \"openai\"\n");

    let output = gridchat()
        .args(["doctor", "--json", "--config", config.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(11));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(report["status"], "missing_key");
    assert_eq!(report["key"], "missing");
    assert_eq!(report["provider"], "openai");
}

#[test]
fn doctor_never_prints_the_key() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_file(dir.path(), "settings.toml", "[agent]\nprovider = \"openai\"\n");

    let output = gridchat()
        .env("GRIDCHAT_OPENAI_KEY", "sk-test-secret-value")
        .args(["doctor", "--config", config.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("present"));
    assert!(!stdout.contains("sk-test-secret-value"));
}

#[test]
fn doctor_local_provider_is_ready() {
    let dir = tempfile::tempdir().unwrap();
    let config = local_config(dir.path());
    let output = gridchat()
        .args(["doctor", "--json", "--config", config.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["status"], "ready");
}

#[test]
fn doctor_malformed_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_file(dir.path(), "settings.toml", "[agent\nprovider = ");
    let output = gridchat()
        .args(["doctor", "--config", config.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(12));
}

// ---------------------------------------------------------------------------
// serve + chat
// ---------------------------------------------------------------------------

#[test]
fn serve_without_key_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_file(dir.path(), "settings.toml", "[agent]\nprovider = \"openai\"\n");
    let output = gridchat()
        .args(["serve", "--bind", "127.0.0.1:0", "--config", config.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(11));
    assert!(String::from_utf8_lossy(&output.stderr).contains("GRIDCHAT_OPENAI_KEY"));
}

#[test]
fn chat_without_server_is_connect_error() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_file(dir.path(), "a.csv", "x\n1\n");
    let output = gridchat()
        .args(["chat", "--file", csv.to_str().unwrap(), "--addr", "127.0.0.1:1"])
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(20));
}

#[test]
fn chat_uploads_and_closes_session() {
    let dir = tempfile::tempdir().unwrap();
    let config = local_config(dir.path());
    let csv = write_file(dir.path(), "sales.csv", "region,amount\nnorth,10\nsouth,30\n");

    let child = gridchat()
        .args(["serve", "--bind", "127.0.0.1:0", "--config", config.to_str().unwrap()])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("start gridchat serve");
    let mut server = ServerGuard(child);

    let stdout = server.0.stdout.take().unwrap();
    let mut banner = String::new();
    BufReader::new(stdout).read_line(&mut banner).unwrap();
    let addr = banner.trim().rsplit(' ').next().unwrap().to_string();
    assert!(banner.contains("listening on"), "banner: {}", banner);

    // No stdin lines: upload, attach, close
    let output = gridchat()
        .args(["chat", "--file", csv.to_str().unwrap(), "--addr", &addr, "--close"])
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("sales: 3 rows x 2 cols"), "stderr: {}", stderr);

    let output = gridchat()
        .args(["chat", "--session", "no-such-session", "--addr", &addr])
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(22));
}
