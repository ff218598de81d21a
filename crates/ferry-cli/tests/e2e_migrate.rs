//! E2E tests for `ferry migrate` and `ferry history` over a JSON export.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn ferry_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("ferry"));
    cmd.current_dir(dir);
    cmd.env("FERRY_LOG", "error");
    cmd.env("HOME", dir);
    cmd.env("XDG_CONFIG_HOME", dir.join(".config"));
    cmd.env_remove("FORMAT");
    cmd
}

/// Two cases: 6 is a parent created the day before its child 5 links to it.
fn write_export(dir: &Path) -> PathBuf {
    fs::create_dir(dir.join("files")).unwrap();
    fs::write(dir.join("files/12.log"), b"stack trace").unwrap();

    let export = json!({
        "people": [
            {"ixPerson": 3, "sFullName": "Ada Lovelace", "sEmail": "ada@example.com"},
            {"ixPerson": 4, "sFullName": "Grace Hopper", "sEmail": "grace@example.com"}
        ],
        "projects": [{"ixProject": 1, "sProject": "Core", "ixPersonOwner": 3}],
        "attachments": {
            "default.asp?pg=pgDownload&amp;pgType=pgFile&amp;ixAttachment=12": "files/12.log"
        },
        "cases": [
            {
                "ixBug": 6,
                "sTitle": "Parent",
                "sStatus": "Active",
                "ixPriority": 2,
                "sCategory": "Bug",
                "ixPersonAssignedTo": 3,
                "sProject": "Core",
                "ixBugParent": 0,
                "tags": ["crash"],
                "events": [
                    {"dt": "2011-02-28T09:00:00Z", "ixPerson": 3, "ixPersonAssignedTo": 3,
                     "sVerb": "Opened", "s": "It crashes on start.",
                     "rgAttachments": [{
                        "sFileName": "trace.log",
                        "sURL": "default.asp?pg=pgDownload&amp;pgType=pgFile&amp;ixAttachment=12"
                     }]}
                ]
            },
            {
                "ixBug": 5,
                "sTitle": "Child",
                "sStatus": "Closed (Fixed)",
                "ixPriority": 3,
                "sCategory": "Feature",
                "ixPersonAssignedTo": 4,
                "sProject": "Core",
                "ixBugParent": 6,
                "tags": [],
                "events": [
                    {"dt": "2011-03-01T09:00:00Z", "ixPerson": 3, "ixPersonAssignedTo": 4,
                     "sVerb": "Opened", "s": "Please split this out."},
                    {"dt": "2011-03-02T09:00:00Z", "ixPerson": 3, "ixPersonAssignedTo": 4,
                     "sVerb": "Edited",
                     "sChanges": "Parent changed from (None) to Case 6.\nEstimate set to '2 hours'"},
                    {"dt": "2011-03-03T09:00:00Z", "ixPerson": 4, "ixPersonAssignedTo": 4,
                     "sVerb": "Resolved",
                     "sChanges": "Status changed from 'Active' to 'Resolved (Fixed)'."},
                    {"dt": "2011-03-04T09:00:00Z", "ixPerson": 4, "ixPersonAssignedTo": 4,
                     "sVerb": "Closed", "s": "Shipped."}
                ]
            }
        ]
    });
    let path = dir.join("export.json");
    fs::write(&path, serde_json::to_string_pretty(&export).unwrap()).unwrap();
    path
}

fn stdout_json(cmd: &mut Command) -> Value {
    let output = cmd.output().expect("ferry should not crash");
    assert!(
        output.status.success(),
        "ferry failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid JSON on stdout")
}

#[test]
fn dry_run_migration_reports_counts() {
    let dir = TempDir::new().unwrap();
    let export = write_export(dir.path());

    let report = stdout_json(
        ferry_cmd(dir.path())
            .args(["migrate", "--export"])
            .arg(&export)
            .arg("--json"),
    );

    assert_eq!(report["dry_run"], true);
    assert_eq!(report["destination"], "dry run");
    assert_eq!(report["cases_loaded"], 2);
    assert_eq!(report["commands"]["new"], 2);
    assert_eq!(report["commands"]["resolve"], 1);
    assert_eq!(report["users_created"], 2);
    assert_eq!(report["projects_created"], 1);
    assert_eq!(report["attachments_uploaded"], 1);
    // 6: new. 5: new, edit (parent), resolve, close.
    assert_eq!(report["commands_planned"], 5);
    assert_eq!(report["commands_total"], 5);
    assert_eq!(report["commands"]["edit"], 1);
    assert_eq!(report["commands"]["close"], 1);
}

#[test]
fn dry_run_text_output_is_line_oriented() {
    let dir = TempDir::new().unwrap();
    let export = write_export(dir.path());

    ferry_cmd(dir.path())
        .env("FORMAT", "text")
        .args(["migrate", "--export"])
        .arg(&export)
        .assert()
        .success()
        .stdout(predicate::str::contains("cases_loaded 2"))
        .stdout(predicate::str::contains("commands.new 2"))
        .stdout(predicate::str::contains("commands_total 5\n"))
        .stdout(predicate::str::contains("destination dry run"));
}

#[test]
fn history_shows_coalesced_snapshots() {
    let dir = TempDir::new().unwrap();
    let export = write_export(dir.path());

    let rows = stdout_json(
        ferry_cmd(dir.path())
            .args(["history", "--export"])
            .arg(&export)
            .args(["--case", "5", "--json"]),
    );
    let rows = rows.as_array().expect("history JSON is an array");

    // Opening message folds into the initial state.
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0]["case"], 5);
    assert_eq!(rows[0]["status"], "Active");
    assert!(rows[0]["parent"].is_null());
    assert_eq!(rows[0]["message"], "Please split this out.");
    assert_eq!(rows[1]["parent"], 6);
    assert_eq!(rows[3]["status"], "Closed (Fixed)");
    assert_eq!(rows[3]["message"], "Shipped.");
}

#[test]
fn history_text_prints_headers() {
    let dir = TempDir::new().unwrap();
    let export = write_export(dir.path());

    ferry_cmd(dir.path())
        .env("FORMAT", "text")
        .args(["history", "--export"])
        .arg(&export)
        .args(["--case", "6"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("CASE  STEP  TIMESTAMP"))
        .stdout(predicate::str::contains("Parent"));
}

#[test]
fn project_config_mapping_must_exist_in_destination() {
    let dir = TempDir::new().unwrap();
    let export = write_export(dir.path());
    fs::write(
        dir.path().join("ferry.toml"),
        "[mapping.users]\n\"Ada Lovelace\" = \"Ada L.\"\n",
    )
    .unwrap();

    ferry_cmd(dir.path())
        .env("FORMAT", "text")
        .args(["migrate", "--export"])
        .arg(&export)
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[F2001]"));
}

#[test]
fn broken_config_is_f1001() {
    let dir = TempDir::new().unwrap();
    let export = write_export(dir.path());
    let config = dir.path().join("broken.toml");
    fs::write(&config, "[replay\norder = ").unwrap();

    ferry_cmd(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["migrate", "--export"])
        .arg(&export)
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[F1001]"))
        .stderr(predicate::str::contains("hint:"));
}

#[test]
fn missing_source_is_reported() {
    let dir = TempDir::new().unwrap();

    ferry_cmd(dir.path())
        .arg("migrate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("give a source tracker URL"));
}

#[test]
fn missing_export_file_is_reported_as_json() {
    let dir = TempDir::new().unwrap();

    let output = ferry_cmd(dir.path())
        .args(["migrate", "--export", "nope.json", "--json"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let err: Value = serde_json::from_slice(&output.stderr).expect("JSON error on stderr");
    assert!(
        err["error"]["message"]
            .as_str()
            .unwrap()
            .contains("nope.json")
    );
}

#[test]
fn completions_emit_script() {
    let dir = TempDir::new().unwrap();

    ferry_cmd(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ferry"));
}
