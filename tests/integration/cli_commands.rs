//! Integration tests for the outlet-analyzer binary (no network access)

use assert_cmd::Command;
use outlet_facility_analyzer::resume::ProgressState;
use tempfile::TempDir;

fn analyzer() -> Command {
    Command::cargo_bin("outlet-analyzer").unwrap()
}

#[test]
fn test_categories_json_lists_all_categories() {
    let output = analyzer()
        .args(["categories", "--output-format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 9);
    assert_eq!(rows[0]["category"], "residential");
    assert_eq!(rows[0]["radius_m"], 100);
}

#[test]
fn test_categories_respect_config_radius() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("analyzer.toml");
    std::fs::write(
        &config,
        "[categories.culinary]\nradius_m = 150\nescalated_radius_m = 300\n",
    )
    .unwrap();

    let output = analyzer()
        .arg("--config")
        .arg(&config)
        .args(["categories", "--output-format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let culinary = rows
        .as_array()
        .unwrap()
        .iter()
        .find(|row| row["category"] == "culinary")
        .unwrap();
    assert_eq!(culinary["radius_m"], 150);
    assert_eq!(culinary["escalated_radius_m"], 300);
}

#[test]
fn test_validate_config_accepts_valid_file() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("analyzer.toml");
    std::fs::write(
        &config,
        "endpoints = [\"https://overpass.example.org/api/interpreter\"]\nescalation = \"never\"\n",
    )
    .unwrap();

    analyzer()
        .arg("validate")
        .arg("config")
        .arg(&config)
        .assert()
        .success();
}

#[test]
fn test_validate_config_rejects_bad_radius() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("analyzer.toml");
    std::fs::write(
        &config,
        "[categories.education]\nradius_m = 300\nescalated_radius_m = 200\n",
    )
    .unwrap();

    analyzer()
        .arg("validate")
        .arg("config")
        .arg(&config)
        .assert()
        .failure();
}

#[test]
fn test_validate_progress() {
    let dir = TempDir::new().unwrap();
    let progress = dir.path().join("progress.json");

    analyzer()
        .arg("validate")
        .arg("progress")
        .arg(&progress)
        .assert()
        .failure();

    ProgressState::new("abc123").save(&progress).unwrap();
    let output = analyzer()
        .args(["--output-format", "json", "validate", "progress"])
        .arg(&progress)
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["run_fingerprint"], "abc123");
    assert_eq!(value["completed"], 0);

    std::fs::write(&progress, "{ not json").unwrap();
    analyzer()
        .arg("validate")
        .arg("progress")
        .arg(&progress)
        .assert()
        .failure();
}

#[test]
fn test_validate_cache_flags_corrupt_lines() {
    let dir = TempDir::new().unwrap();
    let cache = dir.path().join("cache.jsonl");
    std::fs::write(&cache, "garbage\n").unwrap();

    analyzer()
        .arg("validate")
        .arg("cache")
        .arg(&cache)
        .assert()
        .failure();
}

#[test]
fn test_analyze_rejects_empty_outlet_list() {
    let dir = TempDir::new().unwrap();
    let outlets = dir.path().join("outlets.csv");
    std::fs::write(&outlets, "id,name,latitude,longitude\n").unwrap();

    analyzer()
        .current_dir(dir.path())
        .arg("analyze")
        .arg("--outlets")
        .arg(&outlets)
        .arg("--no-cache")
        .assert()
        .failure();
}

#[test]
fn test_analyze_rejects_zero_workers() {
    analyzer()
        .args(["analyze", "--outlets", "outlets.csv", "--workers", "0"])
        .assert()
        .failure();
}
