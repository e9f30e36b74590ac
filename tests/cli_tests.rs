//! CLI integration tests
//!
//! Every test gets its own isolated KERBPM_CONFIG_DIR so nothing touches
//! the real user configuration, and repositories are served from file://
//! URLs so nothing touches the network.


use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use kerbpm::{Instance, Release};
use test_utils::{write_repo, MockMod};

fn kerbpm(config_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("kerbpm").unwrap();
    cmd.env("KERBPM_CONFIG_DIR", config_dir);
    cmd
}

/// Write a config pointing at one file:// repository, offline
fn write_config(config_dir: &Path, repo_uri: &str) {
    fs::create_dir_all(config_dir).unwrap();
    let config = format!(
        r#"[[repositories]]
name = "main"
uri = "{}"
priority = 0

[game]
refresh_builds = false
"#,
        repo_uri
    );
    fs::write(config_dir.join("config.toml"), config).unwrap();
}

#[test]
fn test_help_lists_subcommands() {
    let config = TempDir::new().unwrap();
    kerbpm(config.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("update"))
        .stdout(predicate::str::contains("install"))
        .stdout(predicate::str::contains("remove"))
        .stdout(predicate::str::contains("list"));
}

#[test]
fn test_completions_generate() {
    let config = TempDir::new().unwrap();
    kerbpm(config.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("kerbpm"));
}

#[test]
fn test_list_with_nothing_installed() {
    let config = TempDir::new().unwrap();
    kerbpm(config.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No mods installed"));
}

#[test]
fn test_repo_add_list_remove_cycle() {
    let config = TempDir::new().unwrap();

    kerbpm(config.path())
        .args(["repo", "add", "extras", "https://example.com/extras.json"])
        .assert()
        .success();

    kerbpm(config.path())
        .args(["repo", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("extras"));

    kerbpm(config.path())
        .args(["repo", "remove", "extras"])
        .assert()
        .success();

    kerbpm(config.path())
        .args(["repo", "remove", "extras"])
        .assert()
        .failure();
}

#[test]
fn test_update_then_install_dry_run() {
    let config = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    let repo = write_repo(
        source.path(),
        "main",
        0,
        vec![
            MockMod::new("AwesomeParts", "2.0").depends("ModuleManager").build(),
            MockMod::new("ModuleManager", "4.2.1").build(),
        ],
    );
    write_config(config.path(), repo.uri.as_str());

    kerbpm(config.path())
        .arg("update")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 modules available"));

    kerbpm(config.path())
        .args(["install", "AwesomeParts", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ModuleManager 4.2.1"))
        .stdout(predicate::str::contains("AwesomeParts 2.0"))
        .stdout(predicate::str::contains("dry run"));
}

#[test]
fn test_search_finds_by_substring() {
    let config = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    let repo = write_repo(
        source.path(),
        "main",
        0,
        vec![MockMod::new("AwesomeParts", "2.0").build()],
    );
    write_config(config.path(), repo.uri.as_str());

    kerbpm(config.path()).arg("update").assert().success();

    kerbpm(config.path())
        .args(["search", "awesome"])
        .assert()
        .success()
        .stdout(predicate::str::contains("AwesomeParts"));

    kerbpm(config.path())
        .args(["search", "zzzznope"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No modules match"));
}

#[test]
fn test_unmet_dependency_exits_2() {
    let config = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    let repo = write_repo(
        source.path(),
        "main",
        0,
        vec![MockMod::new("A", "1.0").depends("Missing").build()],
    );
    write_config(config.path(), repo.uri.as_str());

    kerbpm(config.path()).arg("update").assert().success();

    kerbpm(config.path())
        .args(["install", "A", "--dry-run"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Missing"));
}

#[test]
fn test_conflicting_mods_exit_3() {
    let config = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    let repo = write_repo(
        source.path(),
        "main",
        0,
        vec![
            MockMod::new("A", "1.0").conflicts("B").build(),
            MockMod::new("B", "1.0").build(),
        ],
    );
    write_config(config.path(), repo.uri.as_str());

    kerbpm(config.path()).arg("update").assert().success();

    kerbpm(config.path())
        .args(["install", "A", "B", "--dry-run"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("conflicts"));
}

#[test]
fn test_remove_refuses_to_break_dependents() {
    let config = TempDir::new().unwrap();
    fs::create_dir_all(config.path()).unwrap();

    // Seed installed state directly: A depends on B, both installed.
    let mut instance = Instance::default();
    let a: Release = MockMod::new("A", "1.0").depends("B").into_release();
    instance.mark_installed(&a);
    instance.mark_installed(&MockMod::new("B", "1.0").into_release());
    instance.save(&config.path().join("instance.json")).unwrap();

    kerbpm(config.path())
        .args(["remove", "B"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not consistent"));

    kerbpm(config.path())
        .args(["remove", "B", "--force"])
        .assert()
        .success();

    kerbpm(config.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("A 1.0"));
}

#[test]
fn test_remove_unknown_mod_fails() {
    let config = TempDir::new().unwrap();
    kerbpm(config.path())
        .args(["remove", "NotThere"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not installed"));
}
