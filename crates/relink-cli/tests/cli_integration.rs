//! CLI Integration Tests
//!
//! These tests run the `relink` binary against a temporary identity store
//! and config file. None of them need Bluetooth hardware.
//!
//! ```
//! cargo test --package relink-cli --test cli_integration
//! ```

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

/// Run relink with its state confined to `dir`
fn run_relink(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_relink"))
        .arg("--store")
        .arg(dir.join("identities.db"))
        .arg("--config")
        .arg(dir.join("config.toml"))
        .args(args)
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to run relink binary")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// =============================================================================
// Help and Version
// =============================================================================

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    let output = run_relink(dir.path(), &["--help"]);

    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("watch"));
    assert!(text.contains("identities"));
    assert!(text.contains("config"));
}

#[test]
fn test_version() {
    let dir = TempDir::new().unwrap();
    let output = run_relink(dir.path(), &["--version"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_unknown_subcommand_fails() {
    let dir = TempDir::new().unwrap();
    let output = run_relink(dir.path(), &["pair"]);
    assert!(!output.status.success());
}

// =============================================================================
// Identities
// =============================================================================

#[test]
fn test_identities_lifecycle() {
    let dir = TempDir::new().unwrap();

    let output = run_relink(dir.path(), &["identities", "list"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "No remembered identities.\n");

    for id in ["AA:BB:CC:DD:EE:01", "AA:BB:CC:DD:EE:02"] {
        let output = run_relink(dir.path(), &["identities", "add", id]);
        assert!(output.status.success());
        assert_eq!(stdout(&output), format!("[OK] Remembered {}\n", id));
    }

    let output = run_relink(dir.path(), &["identities", "list", "--format", "json"]);
    assert!(output.status.success());
    let ids: Vec<String> = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(ids, vec!["AA:BB:CC:DD:EE:01", "AA:BB:CC:DD:EE:02"]);

    let output = run_relink(dir.path(), &["identities", "remove", "AA:BB:CC:DD:EE:01"]);
    assert!(output.status.success());
    assert_eq!(
        stdout(&run_relink(dir.path(), &["identities", "list"])),
        "AA:BB:CC:DD:EE:02\n"
    );

    let output = run_relink(dir.path(), &["identities", "clear"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "[OK] Forgot 1 identity\n");
    assert!(dir.path().join("identities.db").exists());
}

#[test]
fn test_identities_add_rejects_blank_identifier() {
    let dir = TempDir::new().unwrap();
    let output = run_relink(dir.path(), &["identities", "add", " "]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid peripheral identifier"));
}

// =============================================================================
// Config
// =============================================================================

#[test]
fn test_config_path_honors_flag() {
    let dir = TempDir::new().unwrap();
    let output = run_relink(dir.path(), &["config", "path"]);

    assert!(output.status.success());
    assert_eq!(
        stdout(&output).trim_end(),
        dir.path().join("config.toml").display().to_string()
    );
}

#[test]
fn test_config_init_then_show() {
    let dir = TempDir::new().unwrap();

    let output = run_relink(dir.path(), &["config", "init"]);
    assert!(output.status.success());
    assert!(dir.path().join("config.toml").exists());

    // A second init must not clobber the file
    let output = run_relink(dir.path(), &["config", "init"]);
    assert!(!output.status.success());

    let output = run_relink(dir.path(), &["config", "init", "--force"]);
    assert!(output.status.success());

    let output = run_relink(dir.path(), &["config", "show"]);
    assert!(output.status.success());
    let shown: toml::Value = toml::from_str(&stdout(&output)).unwrap();
    assert_eq!(shown["manager"]["allow_rescan"].as_bool(), Some(true));
}

#[test]
fn test_config_file_sets_store_path() {
    let dir = TempDir::new().unwrap();
    let custom = dir.path().join("custom.db");
    std::fs::write(
        dir.path().join("config.toml"),
        format!("store_path = {:?}\n", custom.display().to_string()),
    )
    .unwrap();

    // Without --store the config file decides
    let output = Command::new(env!("CARGO_BIN_EXE_relink"))
        .arg("--config")
        .arg(dir.path().join("config.toml"))
        .args(["identities", "add", "AA:01"])
        .env_remove("RELINK_STORE")
        .output()
        .unwrap();

    assert!(output.status.success());
    assert!(custom.exists());
}
