use assert_cmd::cargo::cargo_bin_cmd;
use obp_lib::PressureEstimate;
use serde::Deserialize;
use std::{error::Error, fs, path::Path};
use tempfile::tempdir;

#[derive(Deserialize)]
struct EstimateOutput {
    estimate: PressureEstimate,
    sample_rate_hz: f64,
    maxima: usize,
    envelope_points: usize,
}

fn simulate(out: &Path, extra: &[&str]) {
    let mut cmd = cargo_bin_cmd!("obp");
    cmd.args(["simulate", "--out", out.to_str().expect("utf8 path")])
        .args(extra);
    cmd.assert().success();
}

fn estimate_json(input: &Path, extra: &[&str]) -> Result<EstimateOutput, Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("obp");
    cmd.args(["estimate", "--input", input.to_str().expect("utf8 path")])
        .args(extra);
    let output = cmd.assert().success().get_output().stdout.clone();
    Ok(serde_json::from_slice(&output)?)
}

#[test]
fn simulated_recording_estimates_map() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let recording = dir.path().join("cuff.dat");
    simulate(&recording, &[]);

    let out = estimate_json(&recording, &[])?;
    assert!((out.estimate.map - 95.0).abs() <= 2.0, "MAP {}", out.estimate.map);
    assert!(out.estimate.sbp > out.estimate.map && out.estimate.map > out.estimate.dbp);
    assert!((out.estimate.pulse_rate_bpm - 72.0).abs() < 1.0);
    assert!((out.sample_rate_hz - 1000.0).abs() < 1e-3);
    assert!(out.maxima > 20);
    assert!(out.envelope_points > 5);
    Ok(())
}

#[test]
fn raw_codes_are_detected() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let recording = dir.path().join("cuff_raw.dat");
    simulate(&recording, &["--raw-codes"]);
    let out = estimate_json(&recording, &[])?;
    assert!((out.estimate.map - 95.0).abs() <= 2.0, "MAP {}", out.estimate.map);
    Ok(())
}

#[test]
fn text_report_and_envelope_csv() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let recording = dir.path().join("cuff.dat");
    let envelope = dir.path().join("envelope.csv");
    simulate(&recording, &["--noise-mmhg", "0.1", "--seed", "3"]);

    let mut cmd = cargo_bin_cmd!("obp");
    cmd.args([
        "estimate",
        "--input",
        recording.to_str().expect("utf8 path"),
        "--format",
        "text",
        "--smoothing",
        "polynomial",
        "--envelope-out",
        envelope.to_str().expect("utf8 path"),
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let text = String::from_utf8(output)?;
    assert!(text.contains("MAP"), "{text}");
    assert!(text.contains("bpm"), "{text}");

    let csv = fs::read_to_string(&envelope)?;
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("index,t,cuff_pressure,amplitude"));
    assert!(lines.count() > 1000);
    Ok(())
}

#[test]
fn config_file_and_flags_are_applied() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let recording = dir.path().join("cuff.dat");
    let config = dir.path().join("obp.toml");
    simulate(&recording, &[]);
    fs::write(&config, "[estimator]\nratio_sbp = 0.5\nratio_dbp = 0.8\n")?;

    let base = estimate_json(&recording, &[])?;
    let tuned = estimate_json(
        &recording,
        &["--config", config.to_str().expect("utf8 path")],
    )?;
    // lower systolic ratio crosses earlier, higher diastolic ratio crosses earlier
    assert!(tuned.estimate.sbp > base.estimate.sbp);
    assert!(tuned.estimate.dbp > base.estimate.dbp);
    assert_eq!(tuned.estimate.map, base.estimate.map);

    let flagged = estimate_json(
        &recording,
        &[
            "--config",
            config.to_str().expect("utf8 path"),
            "--ratio-sbp",
            "0.55",
        ],
    )?;
    assert_eq!(flagged.estimate.sbp, base.estimate.sbp);
    Ok(())
}

#[test]
fn malformed_input_fails() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let recording = dir.path().join("bad.dat");
    fs::write(&recording, "0 0.7 1\n0.001 0.7 1\n")?;
    let mut cmd = cargo_bin_cmd!("obp");
    cmd.args(["estimate", "--input", recording.to_str().expect("utf8 path")]);
    let output = cmd.assert().failure().get_output().stderr.clone();
    let stderr = String::from_utf8(output)?;
    assert!(stderr.contains("columns"), "{stderr}");
    Ok(())
}

#[test]
fn invalid_ratio_is_rejected() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let recording = dir.path().join("cuff.dat");
    simulate(&recording, &[]);
    let mut cmd = cargo_bin_cmd!("obp");
    cmd.args([
        "estimate",
        "--input",
        recording.to_str().expect("utf8 path"),
        "--ratio-dbp",
        "1.2",
    ]);
    cmd.assert().failure();
    Ok(())
}
