use std::fs;
use std::process::Command;

use approx::assert_abs_diff_eq;
use tempfile::tempdir;
use transition_matrix::{TemporalType, TransitionMatrix, TransitionMatrixSet};

fn exe() -> &'static str {
    env!("CARGO_BIN_EXE_transition-matrix")
}

#[test]
fn cohort_command_writes_matrix_set() {
    let tmp = tempdir().expect("temporary directory");
    let events_path = tmp.path().join("ratings.csv");
    let config_path = tmp.path().join("analysis.toml");
    let output_path = tmp.path().join("matrices.json");
    let cohorted_path = tmp.path().join("cohorted.csv");

    let data = "Entity,Time,Rating\n\
1,0.0,A\n1,1.0,A\n1,2.0,B\n\
2,0.0,A\n2,0.9,B\n2,2.0,B\n\
3,0.0,B\n3,1.0,D\n3,2.0,D\n\
4,0.0,B\n4,1.0,B\n4,2.0,D\n";
    fs::write(&events_path, data).expect("write events");
    fs::write(
        &config_path,
        "[states]\nlabels = [\"A\", \"B\", \"D\"]\nabsorbing = [2]\n\n\
         [columns]\nid = \"Entity\"\nstate = \"Rating\"\n\n\
         [confidence]\nmethod = \"goodman\"\nalpha = 0.05\n\n\
         [cohorts]\nbounds = [0.0, 1.0, 2.0]\n",
    )
    .expect("write config");

    let output = Command::new(exe())
        .args([
            "cohort",
            events_path.to_str().expect("path str"),
            "--config",
            config_path.to_str().expect("path str"),
            "--output",
            output_path.to_str().expect("path str"),
            "--cohorted",
            cohorted_path.to_str().expect("path str"),
        ])
        .output()
        .expect("run transition-matrix cli");
    assert!(output.status.success(), "CLI failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Dataset contains the expected states."));
    assert!(stdout.contains("Lower Bound"));

    let set = TransitionMatrixSet::read_json(&output_path, TemporalType::Incremental)
        .expect("read matrix set");
    assert_eq!(set.len(), 2);
    let first = &set.entries()[0];
    assert_abs_diff_eq!(first[(0, 0)], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(first[(1, 2)], 0.5, epsilon = 1e-6);

    let cohorted = fs::read_to_string(&cohorted_path).expect("read cohorted grid");
    assert!(cohorted.starts_with("ID,Cohort,State,EventTime,Count"));
    assert_eq!(cohorted.lines().count(), 1 + 4 * 3);
}

#[test]
fn generate_then_estimate_aalen_johansen() {
    let tmp = tempdir().expect("temporary directory");
    let matrix_path = tmp.path().join("matrix.json");
    let events_path = tmp.path().join("events.csv");
    let output_path = tmp.path().join("etm.json");
    fs::write(&matrix_path, "[[0.5, 0.5], [0.0, 1.0]]").expect("write matrix");

    let status = Command::new(exe())
        .args([
            "generate",
            matrix_path.to_str().expect("path str"),
            "--entities",
            "2000",
            "--timesteps",
            "2",
            "--layout",
            "canonical",
            "--output",
            events_path.to_str().expect("path str"),
        ])
        .status()
        .expect("run generate");
    assert!(status.success());

    let status = Command::new(exe())
        .args([
            "aalen-johansen",
            events_path.to_str().expect("path str"),
            "--output",
            output_path.to_str().expect("path str"),
        ])
        .status()
        .expect("run aalen-johansen");
    assert!(status.success());

    let etm = TransitionMatrix::read_json(&output_path).expect("read estimate");
    assert_eq!(etm[(1, 1)], 1.0);
    assert_abs_diff_eq!(etm[(0, 0)], 0.5, epsilon = 0.06);
}

#[test]
fn validate_reports_invalid_matrix() {
    let tmp = tempdir().expect("temporary directory");
    let matrix_path = tmp.path().join("bad.json");
    fs::write(&matrix_path, "[[0.7, 0.4], [-0.1, 1.1]]").expect("write matrix");

    let output = Command::new(exe())
        .args(["validate", matrix_path.to_str().expect("path str")])
        .output()
        .expect("run validate");
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Negative Probabilities"));
    assert!(stdout.contains("Rowsum not equal to one"));
}

#[test]
fn curves_command_writes_csv() {
    let tmp = tempdir().expect("temporary directory");
    let matrix_path = tmp.path().join("matrix.json");
    let curves_path = tmp.path().join("curves.csv");
    fs::write(
        &matrix_path,
        "[[0.8, 0.15, 0.05], [0.1, 0.7, 0.2], [0.0, 0.0, 1.0]]",
    )
    .expect("write matrix");

    let status = Command::new(exe())
        .args([
            "curves",
            matrix_path.to_str().expect("path str"),
            "--periods",
            "4",
            "--output",
            curves_path.to_str().expect("path str"),
        ])
        .status()
        .expect("run curves");
    assert!(status.success());
    let text = fs::read_to_string(&curves_path).expect("read curves");
    assert_eq!(text.lines().count(), 3);
}
