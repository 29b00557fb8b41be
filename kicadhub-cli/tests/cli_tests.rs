//! CLI integration tests

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Build command for the kicadhub binary (finds it in target/debug when run via cargo test).
fn kicadhub_cli() -> Command {
    cargo_bin_cmd!("kicadhub")
}

/// Path to kicadhub library test fixtures (relative to workspace).
fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("kicadhub")
        .join("tests")
        .join("fixtures")
}

/// Settings pointing at the fixture libraries with MPN and tolerance rules.
fn write_settings(dir: &Path) -> PathBuf {
    let libs = fixtures_dir().join("libs");
    let settings = serde_json::json!({
        "path_root": libs.to_string_lossy(),
        "symbol_path": "${BASE_DIR}/symbols",
        "footprint_path": "${BASE_DIR}/footprints",
        "global_rules": {"MPN": "^[A-Z0-9-]+$"},
        "library_rules": {"Resistors": {"Tolerance": ""}},
        "exemptions": {
            "libraries": {"Resistors": ["MPN"]},
            "parts": {"Caps:C0402_10nF": ["Tolerance"]}
        },
        "backup": {"path": dir.join("backups").to_string_lossy()}
    });
    let path = dir.join("settings.json");
    std::fs::write(&path, serde_json::to_string_pretty(&settings).unwrap()).unwrap();
    path
}

fn with_settings(path: &Path) -> Command {
    let mut cmd = kicadhub_cli();
    cmd.arg("--settings").arg(path);
    cmd
}

#[test]
fn test_cli_help() {
    let mut cmd = kicadhub_cli();

    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("KiCad"));
}

#[test]
fn test_cli_version() {
    let mut cmd = kicadhub_cli();

    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_scan() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(dir.path());

    with_settings(&settings)
        .arg("scan")
        .assert()
        .success()
        .stdout(predicate::str::contains("3 parts in 2 libraries"))
        .stdout(predicate::str::contains("2 footprints in 2 libraries"));
}

#[test]
fn test_cli_scan_json() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(dir.path());

    let output = with_settings(&settings)
        .args(["scan", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["symbols"]["parts"], 3);
    assert_eq!(json["footprints"]["libraries"], 2);
}

#[test]
fn test_cli_validate_reports_unexempted_failure() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(dir.path());

    with_settings(&settings)
        .args(["validate", "--show-exempted"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Caps:C0402_10nF  Invalid 'MPN': value doesn't match pattern",
        ))
        .stdout(predicate::str::contains("Exempted:"))
        .stdout(predicate::str::contains("Resistors:R0603_bad"))
        .stdout(predicate::str::contains("Checked 3 parts, 1 failures"));
}

#[test]
fn test_cli_validate_fail_exit_code() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(dir.path());

    with_settings(&settings)
        .args(["validate", "--fail"])
        .assert()
        .code(1);

    with_settings(&settings)
        .args(["validate", "--fail", "--scope", "Resistors"])
        .assert()
        .code(0);
}

#[test]
fn test_cli_exempt_persists() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(dir.path());

    with_settings(&settings)
        .args(["exempt", "--part", "Caps:C0402_10nF", "--rule", "MPN"])
        .assert()
        .success();

    with_settings(&settings)
        .args(["validate", "--fail"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No rule failures"));
}

#[test]
fn test_cli_bom_from_schematic() {
    let mut cmd = kicadhub_cli();
    let dir = TempDir::new().unwrap();
    let settings = write_settings(dir.path());

    cmd.arg("--settings")
        .arg(&settings)
        .arg("bom")
        .arg("--schematic")
        .arg(fixtures_dir().join("board").join("top.kicad_sch"));

    cmd.assert()
        .success()
        .stdout(predicate::str::starts_with("Qty,DNP,Excluded,Value"))
        .stdout(predicate::str::contains("3,C3,,10uF,0603,\"C1,C2,C3\""));
}

#[test]
fn test_cli_project_bom_uses_pricing() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(dir.path());
    let top = fixtures_dir().join("board").join("top.kicad_sch");

    with_settings(&settings)
        .args(["project", "set-schematic", "Board"])
        .arg(&top)
        .assert()
        .success();

    let mut doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&settings).unwrap()).unwrap();
    doc["project_registry"]["Board"]["bom_pricing"] = serde_json::json!({"10uF|0603": 0.04});
    std::fs::write(&settings, doc.to_string()).unwrap();

    let out = dir.path().join("bom.csv");
    with_settings(&settings)
        .args(["bom", "--project", "Board", "--output"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote 2 rows (4 parts, 0.12 total)"));
    let csv = std::fs::read_to_string(&out).unwrap();
    assert!(csv.contains(",0.0400,0.1200"));
}

#[test]
fn test_cli_missing_schematic() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(dir.path());

    with_settings(&settings)
        .args(["bom", "--schematic", "does_not_exist.kicad_sch"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_cli_project_pin_and_list() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(dir.path());
    let top = fixtures_dir().join("board").join("top.kicad_sch");

    for name in ["Alpha", "Beta"] {
        with_settings(&settings)
            .args(["project", "set-schematic", name])
            .arg(&top)
            .assert()
            .success();
    }
    with_settings(&settings)
        .args(["project", "pin", "Beta"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Beta pinned"));
    with_settings(&settings)
        .args(["project", "archive", "Alpha"])
        .assert()
        .success();

    let output = with_settings(&settings).args(["project", "list"]).output().unwrap();
    let text = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines, vec!["* Beta [Planning]", "  Alpha [Archived]"]);
}

#[test]
fn test_cli_xref() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(dir.path());
    let schematic = dir.path().join("uses_caps.kicad_sch");
    std::fs::write(
        &schematic,
        "(kicad_sch (uuid \"r\")\n  (symbol (lib_id \"Caps:C0402_10nF\") (property \"Reference\" \"C1\") (property \"Value\" \"10nF\"))\n  (symbol (lib_id \"Caps:C0402_10nF\") (property \"Reference\" \"C2\") (property \"Value\" \"10nF\")))\n",
    )
    .unwrap();

    with_settings(&settings)
        .args(["project", "set-schematic", "Sensor"])
        .arg(&schematic)
        .assert()
        .success();

    with_settings(&settings)
        .args(["xref", "Caps:C0402_10nF"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Sensor: 2 instances"));
    with_settings(&settings)
        .args(["xref", "Resistors:R0603_10k"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not used"));
}

#[test]
fn test_cli_backup_and_restore() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(dir.path());

    with_settings(&settings)
        .args(["backup", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("symbols:"))
        .stdout(predicate::str::contains("app_data:"));

    let output = with_settings(&settings)
        .args(["snapshots", "app-data"])
        .output()
        .unwrap();
    let name = String::from_utf8(output.stdout).unwrap().lines().next().unwrap().to_string();
    assert!(name.ends_with(".zip"));

    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&settings).unwrap()).unwrap();
    assert!(doc["backup"]["symbols"]["last_run"].is_string());

    with_settings(&settings)
        .args(["restore", "app-data"])
        .arg(&name)
        .assert()
        .success()
        .stdout(predicate::str::contains("Restored 1 files"));
}

#[test]
fn test_cli_resolve() {
    let dir = TempDir::new().unwrap();
    let settings = dir.path().join("settings.json");
    std::fs::write(&settings, r#"{"path_root": "/proj/home"}"#).unwrap();

    with_settings(&settings)
        .args(["resolve", "${BASE_DIR}/libs/sym"])
        .assert()
        .success()
        .stdout("/proj/home/libs/sym\n${BASE_DIR}/libs/sym\n");
}

#[test]
fn test_cli_report_log() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(dir.path());

    with_settings(&settings)
        .args(["report", "bug", "Scan ignores nested libraries"])
        .assert()
        .success();
    let log = std::fs::read_to_string(dir.path().join("bugs.txt")).unwrap();
    assert!(log.contains("Scan ignores nested libraries"));
}
