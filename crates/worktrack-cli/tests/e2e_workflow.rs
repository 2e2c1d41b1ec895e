//! E2E CLI tests: create/show/update/delete, filtered paging, the version
//! conflict contract, identity enforcement and iterations.
//!
//! Each test runs `wt` as a subprocess against a database in a temp dir.

use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

fn wt(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("wt"));
    cmd.current_dir(dir);
    cmd.arg("--project").arg(dir);
    cmd.env("WORKTRACK_IDENTITY", "test-agent");
    cmd.env("WORKTRACK_LOG", "error");
    cmd.env("XDG_CONFIG_HOME", dir.join("xdg"));
    cmd.env("HOME", dir);
    cmd.env_remove("WORKTRACK_DB");
    cmd
}

fn json_of(cmd: &mut Command) -> Value {
    let output = cmd.output().expect("wt should not crash");
    assert!(
        output.status.success(),
        "wt failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("--json should produce valid JSON")
}

fn create(dir: &Path, title: &str, state: &str) -> String {
    let view = json_of(wt(dir).args(["create", "--json", "--title", title, "--state", state]));
    view["id"].as_str().expect("id").to_string()
}

#[test]
fn create_show_update_delete_roundtrip() {
    let dir = TempDir::new().expect("tempdir");
    let id = create(dir.path(), "Crash on save", "new");

    let shown = json_of(wt(dir.path()).args(["show", &id, "--json"]));
    assert_eq!(shown["type"], "workitems");
    assert_eq!(shown["attributes"]["system.title"], "Crash on save");
    assert_eq!(shown["attributes"]["system.creator"], "test-agent");
    assert_eq!(shown["attributes"]["version"], 0);

    let updated = json_of(wt(dir.path()).args([
        "update", &id, "--version", "0", "--state", "open", "--json",
    ]));
    assert_eq!(updated["attributes"]["system.state"], "open");
    assert_eq!(updated["attributes"]["version"], 1);

    wt(dir.path()).args(["delete", &id]).assert().success();
    wt(dir.path())
        .args(["show", &id])
        .assert()
        .failure()
        .stderr(contains("E2001"));
}

#[test]
fn stale_version_is_a_conflict_and_writes_nothing() {
    let dir = TempDir::new().expect("tempdir");
    let id = create(dir.path(), "Racy", "new");
    wt(dir.path())
        .args(["update", &id, "--version", "0", "--state", "open"])
        .assert()
        .success();

    wt(dir.path())
        .args(["update", &id, "--version", "0", "--state", "closed", "--json"])
        .assert()
        .failure()
        .stderr(contains("E2201"));

    let shown = json_of(wt(dir.path()).args(["show", &id, "--json"]));
    assert_eq!(shown["attributes"]["system.state"], "open");
    assert_eq!(shown["attributes"]["version"], 1);
}

#[test]
fn list_filters_and_links_pages() {
    let dir = TempDir::new().expect("tempdir");
    for i in 0..5 {
        create(dir.path(), &format!("open {i}"), "open");
    }
    create(dir.path(), "closed one", "closed");

    let doc = json_of(wt(dir.path()).args([
        "list",
        "--json",
        "--filter",
        r#"{"system.state":"open"}"#,
        "--offset",
        "2",
        "--limit",
        "2",
    ]));
    assert_eq!(doc["meta"]["total_count"], 5);
    assert_eq!(doc["data"].as_array().map(Vec::len), Some(2));
    let links = &doc["links"];
    assert!(links["first"].as_str().expect("first").ends_with("offset=0&limit=2"));
    assert!(links["prev"].as_str().expect("prev").ends_with("offset=0&limit=2"));
    assert!(links["next"].as_str().expect("next").ends_with("offset=4&limit=2"));
    assert!(links["last"].as_str().expect("last").ends_with("offset=4&limit=2"));
}

#[test]
fn malformed_filter_is_reported_with_code() {
    let dir = TempDir::new().expect("tempdir");
    wt(dir.path())
        .args(["list", "--filter", "[not an object"])
        .assert()
        .failure()
        .stderr(contains("E2101"));
}

#[test]
fn broken_config_is_reported_with_code() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::create_dir_all(dir.path().join(".worktrack")).expect("mkdir");
    std::fs::write(dir.path().join(".worktrack/config.toml"), "[paging\nlimit = ").expect("write");
    wt(dir.path())
        .args(["list"])
        .assert()
        .failure()
        .stderr(contains("error[E1002]: Config file parse error"))
        .stderr(contains("suggestion:"));
}

#[test]
fn mutations_need_an_identity() {
    let dir = TempDir::new().expect("tempdir");
    wt(dir.path())
        .env_remove("WORKTRACK_IDENTITY")
        .args(["create", "--title", "anonymous"])
        .assert()
        .failure()
        .stderr(contains("E4001"));

    // reads stay open
    wt(dir.path())
        .env_remove("WORKTRACK_IDENTITY")
        .args(["list"])
        .assert()
        .success();
}

#[test]
fn iterations_count_their_items_and_start_once() {
    let dir = TempDir::new().expect("tempdir");
    let sprint = json_of(wt(dir.path()).args([
        "iteration", "create", "--space", "core", "--name", "Sprint 1", "--json",
    ]));
    let sprint_id = sprint["id"].as_str().expect("id").to_string();
    let other = json_of(wt(dir.path()).args([
        "iteration", "create", "--space", "core", "--name", "Sprint 2", "--json",
    ]));
    let other_id = other["id"].as_str().expect("id").to_string();

    let iteration_field = format!("system.iteration={sprint_id}");
    wt(dir.path())
        .args(["create", "--title", "planned", "--state", "closed", "-f", &iteration_field])
        .assert()
        .success();

    let shown = json_of(wt(dir.path()).args(["iteration", "show", &sprint_id, "--json"]));
    let meta = &shown["relationships"]["workitems"]["meta"];
    assert_eq!(meta["total"], 1);
    assert_eq!(meta["closed"], 1);

    wt(dir.path())
        .args(["iteration", "start", &sprint_id])
        .assert()
        .success();
    wt(dir.path())
        .args(["iteration", "start", &other_id])
        .assert()
        .failure()
        .stderr(contains("E2301"));
}
