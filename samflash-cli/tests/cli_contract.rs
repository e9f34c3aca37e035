//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("samflash")
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("samflash"))
        .stdout(predicate::str::contains("Usage"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("samflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn help_lists_every_subcommand() {
    let output = cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .clone();
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    for name in ["flash", "info", "read", "reset", "list-ports", "completions"] {
        assert!(stdout.contains(name), "help is missing {name}");
    }
}

#[test]
fn colors_disabled_when_not_tty() {
    let output = cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .clone();
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert!(!stdout.contains("\x1b["), "Colors should be disabled in non-TTY mode");
}

#[test]
fn completions_command_writes_to_stdout() {
    cli_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty())
        .stdout(predicate::str::contains("_samflash()"));
}

// ============================================================================
// Exit codes
// ============================================================================

#[test]
fn exit_code_two_for_unknown_command() {
    cli_cmd()
        .arg("falsh")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("flash"));
}

#[test]
fn exit_code_two_for_invalid_flag() {
    cli_cmd()
        .arg("--invalid-flag-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_missing_firmware_argument() {
    cli_cmd()
        .arg("flash")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("FILE"));
}

#[test]
fn exit_code_two_for_bad_hex_offset() {
    cli_cmd()
        .args(["flash", "app.bin", "--offset", "0xNOPE"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Invalid hex value"));
}

#[test]
fn exit_code_two_for_unknown_chip() {
    cli_cmd()
        .args(["--chip", "esp32", "info"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Unknown chip"));
}

#[test]
fn exit_code_two_for_read_without_length() {
    cli_cmd()
        .args(["read", "dump.bin"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--length"));
}

#[test]
fn exit_code_one_for_missing_firmware_file() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir
        .path()
        .join("missing.bin");

    cli_cmd()
        .arg("--non-interactive")
        .arg("flash")
        .arg(&missing)
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"))
        .stderr(predicate::str::contains("Failed to load firmware"));
}

#[test]
fn exit_code_two_for_empty_firmware_file() {
    let dir = tempdir().expect("tempdir should be created");
    let empty = dir
        .path()
        .join("empty.bin");
    fs::write(&empty, b"").expect("write empty image");

    cli_cmd()
        .arg("--non-interactive")
        .arg("flash")
        .arg(&empty)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("is empty"));
}

#[test]
fn unreachable_port_fails_without_hanging() {
    let dir = tempdir().expect("tempdir should be created");
    let out = dir
        .path()
        .join("dump.bin");

    let output = cli_cmd()
        .args(["--non-interactive", "-p", "INVALID_PORT_NAME_XYZ"])
        .arg("read")
        .arg(&out)
        .args(["--length", "16"])
        .timeout(std::time::Duration::from_secs(30))
        .output()
        .expect("command should execute");
    assert!(!output.status.success(), "reading from a missing port should fail");
    assert!(!out.exists(), "no dump should be written on failure");
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn invalid_config_file_warns_and_continues() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir
        .path()
        .join("samflash.toml");
    fs::write(&config, "invalid toml [[[").expect("write invalid config");

    cli_cmd()
        .arg("--config")
        .arg(&config)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Failed to parse config file"));
}

#[test]
fn local_config_file_is_picked_up() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("samflash.toml"), "not = [valid").expect("write local config");

    cli_cmd()
        .current_dir(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stderr(predicate::str::contains("samflash.toml"));
}

#[test]
fn non_interactive_environment_variable_works() {
    cli_cmd()
        .env("SAMFLASH_NON_INTERACTIVE", "true")
        .arg("--version")
        .assert()
        .success();
}

// ============================================================================
// JSON output purity
// ============================================================================

#[test]
fn list_ports_json_is_a_single_document() {
    let output = cli_cmd()
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    // Enumeration can be unavailable in sandboxes; only successful runs are checked.
    if output
        .status
        .success()
    {
        let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
        let parsed: serde_json::Value =
            serde_json::from_str(&stdout).expect("stdout should be one JSON document");
        assert_eq!(parsed["ok"], true);
        assert!(parsed["data"]["ports"].is_array());
        assert!(output.stderr.is_empty(), "JSON mode should keep stderr quiet");
    } else {
        assert!(output.stdout.is_empty());
    }
}
