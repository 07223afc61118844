//! CLI integration tests for ragroute
//!
//! Tests the ragroute CLI commands end-to-end using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command with config and data isolated in `home`
#[allow(deprecated)]
fn ragroute_cmd(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ragroute").unwrap();
    cmd.env("RAGROUTE_CONFIG_DIR", home.path().join("config"));
    cmd.env("RAGROUTE_DATA_DIR", home.path().join("data"));
    cmd.env("RUST_LOG", "ragroute=warn");
    cmd
}

fn route_json(home: &TempDir, args: &[&str]) -> serde_json::Value {
    let output = ragroute_cmd(home)
        .args(["--format", "json", "route"])
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).unwrap()
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    ragroute_cmd(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("route"))
        .stdout(predicate::str::contains("feedback"))
        .stdout(predicate::str::contains("optimize"));
}

#[test]
fn test_classify() {
    let home = TempDir::new().unwrap();
    ragroute_cmd(&home)
        .args(["classify", "Show me the architecture picture"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("visual"));

    ragroute_cmd(&home)
        .args(["-q", "classify", "hello"])
        .assert()
        .success()
        .stdout("vague\n");
}

#[test]
fn test_handlers_lists_defaults() {
    let home = TempDir::new().unwrap();
    ragroute_cmd(&home)
        .arg("handlers")
        .assert()
        .success()
        .stdout(predicate::str::contains("table_rag"))
        .stdout(predicate::str::contains("graph_rag"))
        .stdout(predicate::str::contains("hyde_rag"));
}

#[test]
fn test_route_then_feedback_persists() {
    let home = TempDir::new().unwrap();

    let routed = route_json(
        &home,
        &["Compare revenue by region", "--handler", "table_rag"],
    );
    assert_eq!(routed["category"], "analytical");
    assert_eq!(routed["handler"], "table_rag");
    assert_eq!(routed["manual_override"], true);
    let interaction_id = routed["interaction_id"].as_str().unwrap().to_string();

    assert!(home.path().join("data").join("interactions.jsonl").exists());

    ragroute_cmd(&home)
        .args(["feedback", &interaction_id, "1.0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("analytical / table_rag"));

    let output = ragroute_cmd(&home)
        .args(["--format", "json", "stats", "--category", "analytical"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stats: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let arm = &stats["analytical"]["table_rag"];
    assert_eq!(arm["pulls"], 3);
    assert!((arm["total_reward"].as_f64().unwrap() - 3.4).abs() < 1e-9);
    assert!(stats.get("factual").is_none());
}

#[test]
fn test_feedback_rejects_bad_input() {
    let home = TempDir::new().unwrap();
    ragroute_cmd(&home)
        .args(["feedback", "does-not-exist", "0.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));

    let routed = route_json(&home, &["What is RAG?"]);
    let interaction_id = routed["interaction_id"].as_str().unwrap().to_string();
    ragroute_cmd(&home)
        .args(["feedback", &interaction_id, "1.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid reward"));
}

#[test]
fn test_compare_records_nothing() {
    let home = TempDir::new().unwrap();
    ragroute_cmd(&home)
        .args([
            "compare",
            "What is RAG?",
            "--handlers",
            "naive_rag,hybrid_rag,bogus_rag",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("[naive_rag]"))
        .stdout(predicate::str::contains("[bogus_rag] error E202"));

    let ledger = home.path().join("data").join("interactions.jsonl");
    let contents = std::fs::read_to_string(&ledger).unwrap_or_default();
    assert!(contents.is_empty());
}

#[test]
fn test_optimize_without_data() {
    let home = TempDir::new().unwrap();
    ragroute_cmd(&home)
        .arg("optimize")
        .assert()
        .success()
        .stdout(predicate::str::contains("Need at least 10"));
}

#[test]
fn test_leaderboard_json() {
    let home = TempDir::new().unwrap();
    let output = ragroute_cmd(&home)
        .args(["--format", "json", "leaderboard"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let board: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(board.as_array().unwrap().len(), 11);
}

#[test]
fn test_reset_requires_force() {
    let home = TempDir::new().unwrap();
    ragroute_cmd(&home)
        .arg("reset")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    ragroute_cmd(&home)
        .args(["reset", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("reset to priors"));
}

#[test]
fn test_config_set_get_and_path() {
    let home = TempDir::new().unwrap();

    ragroute_cmd(&home)
        .args(["config", "set", "orchestrator.default_top_k", "7"])
        .assert()
        .success();

    ragroute_cmd(&home)
        .args(["config", "get", "orchestrator.default_top_k"])
        .assert()
        .success()
        .stdout("7\n");

    ragroute_cmd(&home)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));

    ragroute_cmd(&home)
        .args(["config", "set", "analyzer.margin", "3"])
        .assert()
        .failure();

    let routed = route_json(&home, &["What is RAG?"]);
    assert_eq!(routed["top_k"], 7);
}
