// Contract tests for the `plotcheck` binary: exit codes, the --json stdout
// contract and the report directory.
//
// Run with: cargo test -p plotcheck-cli --test cli_tests

use std::path::PathBuf;
use std::process::{Command, Output};

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../audit/tests/fixtures")
}

fn fixture(name: &str) -> String {
    fixtures().join(name).to_str().unwrap().to_string()
}

fn plotcheck() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_plotcheck"));
    cmd.current_dir(env!("CARGO_MANIFEST_DIR"));
    for var in ["PLOTCHECK_PRODUCERS", "PLOTCHECK_PLANTATIONS", "PLOTCHECK_PARCELS", "RUST_LOG"] {
        cmd.env_remove(var);
    }
    cmd
}

fn run(args: &[&str]) -> Output {
    plotcheck().args(args).output().expect("spawn plotcheck")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// stdout must be exactly one JSON value.
fn single_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim())
        .unwrap_or_else(|e| panic!("stdout must be one JSON value: {e}\nstdout:\n{stdout}"))
}

/// Config with inputs pointing at the shared fixtures, plus `extra` TOML.
fn temp_config(dir: &tempfile::TempDir, extra: &str) -> String {
    let body = format!(
        "name = \"tmp\"\n{extra}\n[inputs]\nproducers = {:?}\nplantations = {:?}\nparcels = {:?}\n",
        fixture("producers.csv"),
        fixture("plantations.csv"),
        fixture("parcels.geojson"),
    );
    let path = dir.path().join("audit.toml");
    std::fs::write(&path, body).unwrap();
    path.to_str().unwrap().to_string()
}

// ===========================================================================
// plotcheck run
// ===========================================================================

#[test]
fn run_json_emits_one_document() {
    let output = run(&["run", &fixture("audit.toml"), "--json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let doc = single_json(&output);
    assert_eq!(doc["meta"]["config_name"], "Fixture coop audit");
    assert_eq!(doc["summary"]["total_anomalies"], 12);
    assert_eq!(doc["summary"]["overlaps"], 1);
    assert_eq!(doc["summary"]["projection_epsg"], 32630);
    assert!(stderr(&output).contains("12 anomalies"));
}

#[test]
fn findings_exit_zero_by_default() {
    let output = run(&["run", &fixture("audit.toml")]);
    assert_eq!(output.status.code(), Some(0));
    assert!(output.stdout.is_empty(), "no --json means nothing on stdout");
}

#[test]
fn fail_on_findings_exits_one() {
    let output = run(&["run", &fixture("audit.toml"), "--fail-on-findings"]);
    assert_eq!(output.status.code(), Some(1), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("error: 12 anomalies and 1 overlaps found"));
}

#[test]
fn overlap_threshold_flag_overrides_config() {
    let output = run(&["run", &fixture("audit.toml"), "--json", "--overlap-threshold", "0.3"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let doc = single_json(&output);
    assert_eq!(doc["summary"]["overlaps"], 0);
    assert_eq!(doc["meta"]["overlap_threshold"], 0.3);
}

#[test]
fn exhaustive_strategy_reports_same_pairs() {
    let indexed = single_json(&run(&["run", &fixture("audit.toml"), "--json"]));
    let exhaustive = single_json(&run(&[
        "run",
        &fixture("audit.toml"),
        "--json",
        "--strategy",
        "exhaustive",
        "--sequential",
    ]));
    assert_eq!(exhaustive["overlaps"]["strategy"], "exhaustive");
    assert_eq!(indexed["overlaps"]["records"], exhaustive["overlaps"]["records"]);
}

#[test]
fn output_dir_gets_every_report() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("reports");
    let output = run(&["run", &fixture("audit.toml"), "--output", out.to_str().unwrap()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    for name in [
        "audit.json",
        "anomalies.csv",
        "surfaces.csv",
        "overlaps.csv",
        "rollup_producers.csv",
        "rollup_cooperatives.csv",
        "overlaps.geojson",
    ] {
        assert!(out.join(name).is_file(), "{name} missing");
    }

    let anomalies = std::fs::read_to_string(out.join("anomalies.csv")).unwrap();
    assert_eq!(anomalies.lines().count(), 13);

    let overlaps = std::fs::read_to_string(out.join("overlaps.csv")).unwrap();
    let mut lines = overlaps.lines();
    assert_eq!(lines.next(), Some("id_1,id_2,overlap_ratio,intersection_area_m2"));
    assert!(lines.next().unwrap().starts_with("C001-P001,C001-P002,0.25,"));

    let geo: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("overlaps.geojson")).unwrap()).unwrap();
    assert!(geo.get("crs").is_none());
    assert_eq!(geo["features"].as_array().unwrap().len(), 1);
    let lon = geo["features"][0]["geometry"]["coordinates"][0][0][0][0].as_f64().unwrap();
    assert!((-4.9986..=-4.9979).contains(&lon), "lon {lon}");
}

#[test]
fn input_flags_replace_config_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("bare.toml");
    std::fs::write(&config, "name = \"bare\"\n").unwrap();

    let output = run(&[
        "run",
        config.to_str().unwrap(),
        "--json",
        "--producers",
        &fixture("producers.csv"),
        "--plantations",
        &fixture("plantations.csv"),
        "--parcels",
        &fixture("parcels.geojson"),
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(single_json(&output)["meta"]["config_name"], "bare");
}

// ===========================================================================
// Exit codes
// ===========================================================================

#[test]
fn missing_inputs_exit_usage() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("bare.toml");
    std::fs::write(&config, "name = \"bare\"\n").unwrap();

    let output = run(&["run", config.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("hint:"));
}

#[test]
fn unknown_flag_exits_usage() {
    let output = run(&["run", &fixture("audit.toml"), "--no-such-flag"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn invalid_threshold_exits_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = temp_config(&dir, "[thresholds]\ndeviation = 1.5\n");
    let output = run(&["run", &config]);
    assert_eq!(output.status.code(), Some(3), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("config validation error"));
}

#[test]
fn out_of_range_flag_exits_config() {
    let output = run(&["run", &fixture("audit.toml"), "--deviation-threshold", "0"]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn unreadable_dataset_exits_input() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(&[
        "run",
        &fixture("audit.toml"),
        "--parcels",
        dir.path().join("nope.geojson").to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(4));
    assert!(stderr(&output).contains("parcels: cannot read"));
}

#[test]
fn missing_identifier_column_exits_input() {
    let dir = tempfile::tempdir().unwrap();
    let producers = dir.path().join("producers.csv");
    std::fs::write(&producers, "id,annee_naissance\nC001,1970\n").unwrap();

    let output = run(&["run", &fixture("audit.toml"), "--producers", producers.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(4));
    assert!(stderr(&output).contains("code_producteur"));
}

// ===========================================================================
// plotcheck validate
// ===========================================================================

#[test]
fn validate_accepts_fixture_config() {
    let output = run(&["validate", &fixture("audit.toml")]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("config 'Fixture coop audit' ok"));
}

#[test]
fn validate_rejects_inverted_range() {
    let dir = tempfile::tempdir().unwrap();
    let config = temp_config(&dir, "[ranges.producers]\ntaille_menage = [20, 1]\n");
    let output = run(&["validate", &config]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn validate_reports_missing_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("audit.toml");
    std::fs::write(
        &config,
        "[inputs]\nproducers = \"p.csv\"\nplantations = \"pl.csv\"\nparcels = \"parcels.geojson\"\n",
    )
    .unwrap();
    let output = run(&["validate", config.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(4));
    assert!(stderr(&output).contains("producers:"));
}
