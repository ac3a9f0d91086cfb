//! CLI smoke tests: verify basic binary behavior.

use std::io::Write;
use std::process::{Command, Stdio};

fn cli_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_lumen"))
}

#[test]
fn test_help_flag() {
    let output = cli_bin().arg("--help").output().expect("failed to run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage"), "Expected usage info in --help output");
    assert!(stdout.contains("--ephemeral"));
}

#[test]
fn test_version_flag() {
    let output = cli_bin().arg("--version").output().expect("failed to run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("lumen"),
        "Expected binary name in --version output"
    );
}

#[test]
fn test_invalid_config_does_not_panic() {
    // A nonexistent config file falls back to defaults
    let output = cli_bin()
        .arg("--config")
        .arg("/tmp/nonexistent_lumen_config_12345.toml")
        .arg("--help")
        .output()
        .expect("failed to run");
    assert!(output.status.success());
}

#[test]
fn test_quit_shuts_down_cleanly() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut child = cli_bin()
        .current_dir(dir.path())
        .arg("--ephemeral")
        .env("LUMEN_CONFIG", dir.path().join("absent.toml"))
        .env("LUMEN_DROPZONE", dir.path().join("dropzone"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to run");

    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"/mode chat\nquit\n")
        .unwrap();
    let output = child.wait_with_output().expect("failed to wait");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Lumen online"));
    assert!(!dir.path().join("runtime/state.json").exists());
}
