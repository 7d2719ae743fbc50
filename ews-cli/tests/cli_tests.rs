//! End-to-end tests for the `ews` binary

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn ews(args: &[&str], cwd: &std::path::Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ews"))
        .args(args)
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to spawn ews")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_run_prints_json_summary() {
    let dir = tempfile::tempdir().unwrap();
    let input = fixture_path("weekly_districts.csv");
    let output = ews(
        &["run", input.to_str().unwrap(), "--format", "json"],
        dir.path(),
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let summary: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(summary["rows"], 36);
    assert_eq!(summary["districts"], 6);
    assert_eq!(summary["weeks"], 6);
    // round(0.10 * 36)
    assert_eq!(summary["anomalies"], 4);
}

#[test]
fn test_run_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let input = fixture_path("weekly_districts.csv");
    let args = ["run", input.to_str().unwrap(), "--format", "json", "--rows"];
    let first = stdout(&ews(&args, dir.path()));
    let second = stdout(&ews(&args, dir.path()));
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn test_run_writes_exports() {
    let dir = tempfile::tempdir().unwrap();
    let input = fixture_path("weekly_districts.csv");
    let out_dir = dir.path().join("exports");
    let output = ews(
        &["run", input.to_str().unwrap(), "--out-dir", out_dir.to_str().unwrap()],
        dir.path(),
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    for name in [
        "ews_weekly_district.csv",
        "district_forecasts.csv",
        "weight_justification.csv",
        "data_quality_warnings.json",
    ] {
        assert!(out_dir.join(name).exists(), "{} missing", name);
    }
    let forecasts = fs::read_to_string(out_dir.join("district_forecasts.csv")).unwrap();
    assert_eq!(forecasts.lines().count(), 7);
}

#[test]
fn test_schema_violation_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bad.csv");
    fs::write(
        &input,
        "week_start,state,district,enrol_total,demo_total,bio_total\n\
         2025-03-03,GOA,NORTH GOA,4,-5,6\n\
         2025-03-05,GOA,SOUTH GOA,4,5,6\n",
    )
    .unwrap();

    let output = ews(&["run", input.to_str().unwrap()], dir.path());
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Schema validation failed (2 violations)"), "{}", stderr);
}

#[test]
fn test_aggregate_daily_fixtures() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("weekly.csv");
    let geo = dir.path().join("geo.csv");
    let daily = |name: &str| fixture_path("daily").join(name);
    let output = ews(
        &[
            "aggregate",
            "--enrol",
            daily("enrolment.csv").to_str().unwrap(),
            "--demo",
            daily("demographic.csv").to_str().unwrap(),
            "--bio",
            daily("biometric.csv").to_str().unwrap(),
            "--pincode",
            daily("pincode.csv").to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
            "--geo-summary",
            geo.to_str().unwrap(),
        ],
        dir.path(),
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let weekly = fs::read_to_string(&out).unwrap();
    assert_eq!(weekly.lines().count(), 6);
    assert!(weekly.contains("2025-03-03,KARNATAKA,BENGALURU URBAN,20,5,3,12,20,6,14,7,3,4"));
    assert!(weekly.contains("2025-03-10,ODISHA,PURI,3,1,0,2,0,0,0,3,2,1"));
    assert!(!weekly.contains("560001"));

    let geo = fs::read_to_string(&geo).unwrap();
    assert!(geo.contains("enrolment,7,1,1,2,2,5,4"), "{}", geo);

    // The aggregated table feeds straight into `run`
    let run = ews(&["run", out.to_str().unwrap()], dir.path());
    assert!(run.status.success(), "{}", String::from_utf8_lossy(&run.stderr));
}

#[test]
fn test_config_validate_rejects_bad_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join(".ewsrc.json"),
        r#"{"risk": {"critical": 50, "emerging_risk": 75, "watchlist": 60}}"#,
    )
    .unwrap();

    let output = ews(&["config", "validate"], dir.path());
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Config validation failed"));
}

#[test]
fn test_config_show_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let output = ews(&["config", "show"], dir.path());
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("defaults (no config file found)"));
    assert!(text.contains("seed: 42"));
}
