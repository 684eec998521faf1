//! Config file loading
//!
//! Each load phase (read, parse, validate) reports the file path so the
//! operator knows which file to fix.

use std::fs;
use tempfile::TempDir;
use tierroute::config::Config;
use tierroute::error::AppError;

const VALID: &str = r#"
[server]
port = 4000

[[backends]]
tier = 1
name = "ollama"
kind = "native"
base_url = "http://127.0.0.1:11434"
primary = true
"#;

fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("Failed to write config");
    path
}

#[test]
fn test_valid_file_loads() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "config.toml", VALID);

    let config = tokio_test::assert_ok!(Config::from_file(&path));
    assert_eq!(config.server.port, 4000);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.timeouts.attempt_seconds, 60);
    assert!(config.routing.loop_guard);
}

#[test]
fn test_missing_file_names_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");

    let err = tokio_test::assert_err!(Config::from_file(&path));
    assert!(matches!(err, AppError::ConfigFileRead { .. }));
    assert!(err.to_string().contains("absent.toml"), "got: {}", err);
}

#[test]
fn test_parse_error_names_path() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "broken.toml", "[server\nport = 4000");

    let err = tokio_test::assert_err!(Config::from_file(&path));
    assert!(matches!(err, AppError::ConfigParseFailed { .. }));
    assert!(err.to_string().contains("broken.toml"));
}

#[test]
fn test_missing_required_field_is_parse_error() {
    let dir = TempDir::new().unwrap();
    // base_url is required; no silent default for addresses
    let path = write(
        &dir,
        "no-url.toml",
        r#"
[server]
port = 4000

[[backends]]
tier = 1
name = "ollama"
kind = "native"
primary = true
"#,
    );

    let err = Config::from_file(&path).unwrap_err();
    assert!(matches!(err, AppError::ConfigParseFailed { .. }));
    assert!(err.to_string().contains("base_url"), "got: {}", err);
}

#[test]
fn test_validation_error_names_path_and_reason() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "bad-rule.toml",
        &format!("{}\n[routing]\nrules = [{{ pattern = \"opus\", tier = 3 }}]\n", VALID),
    );

    let err = Config::from_file(&path).unwrap_err();
    assert!(matches!(err, AppError::ConfigValidationFailed { .. }));
    let message = err.to_string();
    assert!(message.contains("bad-rule.toml"), "got: {}", message);
    assert!(message.contains("tier3"), "got: {}", message);
}

#[test]
fn test_hosted_without_credential_env_fails_fast() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "hosted.toml",
        &format!(
            "{}\n[[backends]]\ntier = 3\nname = \"claude-account\"\nkind = \"hosted\"\nbase_url = \"https://api.anthropic.com\"\n",
            VALID
        ),
    );

    let err = Config::from_file(&path).unwrap_err();
    assert!(err.to_string().contains("credential_env"), "got: {}", err);
}
