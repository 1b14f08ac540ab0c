//! CLI contract tests for the `mailcast` binary.

use assert_cmd::Command;
use serde_json::json;

fn mailcast(home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("mailcast").expect("binary should build");
    cmd.env("MAILCAST_HOME", home).env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_subcommands() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let output = mailcast(tmp.path()).arg("--help").output().expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for sub in ["init", "preview", "dispatch", "cancel", "stats"] {
        assert!(stdout.contains(sub), "help should mention {sub}");
    }
}

#[test]
fn init_creates_runtime_layout() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let home = tmp.path().join("mc");
    let output = mailcast(&home).arg("init").output().expect("run");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    assert!(home.join("config.toml").exists());
    assert!(home.join(".env").exists());
    assert!(home.join("logs").is_dir());
    assert!(home.join("mailcast.db").exists());
}

#[test]
fn preview_counts_nothing_in_empty_database() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let home = tmp.path().join("mc");
    assert!(mailcast(&home).arg("init").output().expect("init").status.success());

    let rules = tmp.path().join("rules.json");
    let group = json!({
        "logic": "AND",
        "conditions": [
            {"field": "status", "operator": "equals", "value": "NEW"},
            {"field": "state", "operator": "regex", "value": "C."}
        ]
    });
    std::fs::write(&rules, group.to_string()).expect("write rules");

    let output = mailcast(&home)
        .args(["preview", "--tenant", "t1", "--rules"])
        .arg(&rules)
        .output()
        .expect("run");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("matching contacts: 0"));
    assert!(stdout.contains("unsupported operator"));
}

#[test]
fn cancel_unknown_campaign_fails() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let home = tmp.path().join("mc");
    assert!(mailcast(&home).arg("init").output().expect("init").status.success());

    let output = mailcast(&home).args(["cancel", "missing"]).output().expect("run");
    assert!(!output.status.success());
}

#[test]
fn dispatch_unknown_campaign_fails() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let home = tmp.path().join("mc");
    assert!(mailcast(&home).arg("init").output().expect("init").status.success());

    let output = mailcast(&home).args(["dispatch", "missing"]).output().expect("run");
    assert!(!output.status.success());
}
