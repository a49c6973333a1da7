//! Smoke-tests the `secure-wrapper` binary's `print-config` subcommand
//! against a real config file on disk, resolving the binary via
//! `assert_cmd`.

use std::fs;

use assert_cmd::Command;

#[test]
fn print_config_redacts_secrets_and_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let config_dir = dir.path().join("data").join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(
        config_dir.join("wrapper-config.json"),
        r#"{
            "apiKey": "super-secret-api-key",
            "tokenSigningKeyCurrent": "super-secret-signing-key",
            "gmailAccountId": "agent@example.com",
            "allowedCalendarIds": ["primary"]
        }"#,
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("secure-wrapper").unwrap();
    cmd.arg("print-config")
        .env("SECURE_WRAPPER_DATA_DIR", dir.path().join("data"))
        .current_dir(dir.path());

    let output = cmd.output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("[redacted]"));
    assert!(!stdout.contains("super-secret-api-key"));
    assert!(!stdout.contains("super-secret-signing-key"));
}

#[test]
fn missing_config_file_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();

    let mut cmd = Command::cargo_bin("secure-wrapper").unwrap();
    cmd.arg("print-config")
        .env("SECURE_WRAPPER_DATA_DIR", dir.path().join("data"))
        .current_dir(dir.path());

    cmd.assert().failure();
}
