use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use tempfile::tempdir;

fn panelreg() -> Command {
    Command::cargo_bin("panelreg").unwrap()
}

#[test]
fn test_pooled_regression() {
    let mut cmd = panelreg();
    cmd.arg("--data")
        .arg("tests/data/investment.csv")
        .arg("--formula")
        .arg("inv ~ value + capital");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Pooled OLS Regression"))
        .stdout(predicate::str::contains("Observations: 24"))
        .stdout(predicate::str::contains("Residual DoF: 21"))
        .stdout(predicate::str::contains("capital"));
}

#[test]
fn test_fixed_effects_with_summary() {
    let mut cmd = panelreg();
    cmd.arg("--data")
        .arg("tests/data/investment.csv")
        .arg("--entity")
        .arg("firm")
        .arg("--time")
        .arg("year")
        .arg("--outcome")
        .arg("inv")
        .arg("--predictors")
        .arg("value,capital")
        .arg("--model")
        .arg("fe")
        .arg("--vce")
        .arg("robust")
        .arg("--summary");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Balanced panel."))
        .stdout(predicate::str::contains("Fixed-Effects (Within) Regression"))
        .stdout(predicate::str::contains("Residual DoF: 18"))
        .stdout(predicate::str::contains("clustered on firm (4 clusters)"));
}

#[test]
fn test_fixed_effects_without_key_fails() {
    let mut cmd = panelreg();
    cmd.arg("--data")
        .arg("tests/data/investment.csv")
        .arg("--formula")
        .arg("inv ~ value")
        .arg("--model")
        .arg("fe");

    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Error: Panel not configured"));
}

#[test]
fn test_unsupported_model() {
    let mut cmd = panelreg();
    cmd.arg("--data")
        .arg("tests/data/investment.csv")
        .arg("--entity")
        .arg("firm")
        .arg("--time")
        .arg("year")
        .arg("--formula")
        .arg("inv ~ value")
        .arg("--model")
        .arg("be");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported regression type: 'be'"));
}

#[test]
fn test_spec_file_and_exports() {
    let dir = tempdir().unwrap();
    let spec_path = dir.path().join("spec.json");
    let json_path = dir.path().join("fit.json");
    let md_path = dir.path().join("fit.md");
    std::fs::write(
        &spec_path,
        r#"{"formula": "inv ~ value + capital", "regression_type": "fe", "vce": "nonrobust"}"#,
    )
    .unwrap();

    let mut cmd = panelreg();
    cmd.arg("--data")
        .arg("tests/data/investment.csv")
        .arg("--entity")
        .arg("firm")
        .arg("--time")
        .arg("year")
        .arg("--spec")
        .arg(&spec_path)
        .arg("--output-json")
        .arg(&json_path)
        .arg("--output-markdown")
        .arg(&md_path);
    cmd.assert().success();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(json["residual_degrees_of_freedom"], 18);
    assert_eq!(json["regression_type"], "fixed_effects");
    let capital = json["coefficients"]["capital"].as_f64().unwrap();
    assert!((capital - 0.7339295194).abs() < 1e-7);

    let md = std::fs::read_to_string(&md_path).unwrap();
    assert!(md.starts_with("|  | (1) |"));
}

#[test]
fn test_spec_with_unknown_key_is_rejected() {
    let dir = tempdir().unwrap();
    let spec_path = dir.path().join("spec.json");
    std::fs::write(&spec_path, r#"{"formula": "inv ~ value", "robust_se": true}"#).unwrap();

    let mut cmd = panelreg();
    cmd.arg("--data")
        .arg("tests/data/investment.csv")
        .arg("--spec")
        .arg(&spec_path);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("JSON error"));
}

#[test]
fn test_entity_requires_time() {
    let mut cmd = panelreg();
    cmd.arg("--data")
        .arg("tests/data/investment.csv")
        .arg("--entity")
        .arg("firm")
        .arg("--formula")
        .arg("inv ~ value");

    cmd.assert().failure();
}
