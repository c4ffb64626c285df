//! Integration tests for the `benchrig` binary.
//!
//! Only commands that need no network or toolchain are exercised here.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn benchrig(config_home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_benchrig"))
        .args(args)
        .env("XDG_CONFIG_HOME", config_home)
        .env_remove("GOROOT")
        .env_remove("BENCHRIG_TOOLCHAIN_ROOT")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to launch benchrig")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

// -----------------------------------------------------------------------
// list
// -----------------------------------------------------------------------

#[test]
fn list_prints_registered_harnesses() {
    let home = TempDir::new().unwrap();
    let out = benchrig(home.path(), &["list"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out).lines().collect::<Vec<_>>(), vec!["cockroachdb"]);
}

#[test]
fn list_json_is_an_array_of_names() {
    let home = TempDir::new().unwrap();
    let out = benchrig(home.path(), &["list", "--json"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let names: Vec<String> = serde_json::from_str(stdout(&out).trim()).unwrap();
    assert_eq!(names, vec!["cockroachdb"]);
}

// -----------------------------------------------------------------------
// init
// -----------------------------------------------------------------------

#[test]
fn init_writes_config_under_xdg_home() {
    let home = TempDir::new().unwrap();
    let out = benchrig(
        home.path(),
        &["init", "--toolchain-root", "/opt/go-tip", "--work-dir", "/srv/work"],
    );
    assert!(out.status.success(), "stderr: {}", stderr(&out));

    let path = home.path().join("benchrig").join("config.toml");
    let text = std::fs::read_to_string(&path).unwrap();
    let parsed: toml::Value = toml::from_str(&text).unwrap();
    assert_eq!(parsed["toolchain"]["root"].as_str(), Some("/opt/go-tip"));
    assert_eq!(parsed["paths"]["work_dir"].as_str(), Some("/srv/work"));
    assert!(stdout(&out).contains("Config written to"));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let home = TempDir::new().unwrap();
    let first = benchrig(home.path(), &["init", "--toolchain-root", "/opt/a"]);
    assert!(first.status.success(), "stderr: {}", stderr(&first));

    let second = benchrig(home.path(), &["init", "--toolchain-root", "/opt/b"]);
    assert!(!second.status.success());
    assert!(stderr(&second).contains("already exists"), "stderr: {}", stderr(&second));

    let forced = benchrig(home.path(), &["init", "--toolchain-root", "/opt/b", "--force"]);
    assert!(forced.status.success(), "stderr: {}", stderr(&forced));
    let text = std::fs::read_to_string(home.path().join("benchrig/config.toml")).unwrap();
    assert!(text.contains("/opt/b"), "{text}");
}

#[test]
fn explicit_config_path_wins() {
    let home = TempDir::new().unwrap();
    let custom = home.path().join("custom.toml");
    let out = benchrig(
        home.path(),
        &["--config", custom.to_str().unwrap(), "init", "--toolchain-root", "/opt/go"],
    );
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(custom.is_file());
    assert!(!home.path().join("benchrig/config.toml").exists());
}

// -----------------------------------------------------------------------
// Suite commands
// -----------------------------------------------------------------------

#[test]
fn suite_command_without_toolchain_root_fails() {
    let home = TempDir::new().unwrap();
    let out = benchrig(home.path(), &["build", "--all"]);
    assert!(!out.status.success());
    assert!(
        stderr(&out).contains("toolchain root not found"),
        "stderr: {}",
        stderr(&out)
    );
}

#[test]
fn unknown_harness_fails() {
    let home = TempDir::new().unwrap();
    let work = home.path().join("work");
    let config = home.path().join("config.toml");
    std::fs::write(
        &config,
        format!(
            "[toolchain]\nroot = \"/opt/go\"\n\n[paths]\nwork_dir = {:?}\n",
            work.to_str().unwrap()
        ),
    )
    .unwrap();

    let out = benchrig(
        home.path(),
        &["--config", config.to_str().unwrap(), "build", "no-such-harness"],
    );
    assert!(!out.status.success());
    assert!(stderr(&out).contains("no-such-harness"), "stderr: {}", stderr(&out));
}

// -----------------------------------------------------------------------
// completions
// -----------------------------------------------------------------------

#[test]
fn completions_mention_binary_name() {
    let home = TempDir::new().unwrap();
    let out = benchrig(home.path(), &["completions", "bash"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(stdout(&out).contains("benchrig"));
}
