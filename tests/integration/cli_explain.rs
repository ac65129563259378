#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use docql_optimizer::catalog::{CollectionInfo, IndexDescriptor, IndexKind};
use docql_optimizer::{Expr, PlanBuilder, RuleId};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    plan: PathBuf,
    catalog: PathBuf,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = dir.path().to_path_buf();

        let mut b = PlanBuilder::new();
        let p = b.enumerate_collection("products", "p");
        b.filter(
            Expr::path(p, "price")
                .less_than(Expr::lit(10))
                .or(Expr::path(p, "price").less_equal(Expr::lit(25))),
        );
        let name = b.calculate("name", Expr::path(p, "name"));
        b.sort([(name, true)]);
        b.return_var(name);
        let plan = b.build().expect("valid plan");
        let plan_path = root.join("plan.json");
        fs::write(&plan_path, serde_json::to_string(&plan).expect("plan json")).expect("write plan");

        let products = CollectionInfo::new("products", 1000)
            .with_index(IndexDescriptor::new(3, IndexKind::Persistent, &["name"]).named("by_name"));
        let catalog_path = root.join("catalog.json");
        let catalog = serde_json::json!({ "collections": [products] });
        fs::write(&catalog_path, catalog.to_string()).expect("write catalog");

        Self {
            _dir: dir,
            plan: plan_path,
            catalog: catalog_path,
            root,
        }
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.root.join(name);
        fs::write(&path, contents).expect("write file");
        path
    }
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("utf-8 path")
}

#[test]
fn text_output_lists_plan_and_rules() {
    let fx = Fixture::new();
    let output = cargo_bin_cmd!("docql-explain")
        .args(["--plan", path_arg(&fx.plan), "--catalog", path_arg(&fx.catalog)])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).expect("utf-8 output");

    assert!(stdout.starts_with("Execution plan:\n"));
    assert!(stdout.contains("persistent index scan using by_name"));
    assert!(stdout.contains("FILTER p.price <= 25"));
    assert!(!stdout.contains("SortNode"));
    assert!(stdout.contains("remove-redundant-or"));
    assert!(stdout.contains("use-index-for-sort"));
}

#[test]
fn json_output_respects_rule_directives() {
    let fx = Fixture::new();
    let output = cargo_bin_cmd!("docql-explain")
        .args([
            "--plan",
            path_arg(&fx.plan),
            "--catalog",
            path_arg(&fx.catalog),
            "--format",
            "json",
            "--rule",
            "-use-index-for-sort",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).expect("json output");

    let rules: Vec<&str> = json["rules"]
        .as_array()
        .expect("rules")
        .iter()
        .filter_map(|r| r.as_str())
        .collect();
    assert!(rules.contains(&"remove-redundant-or"));
    assert!(!rules.contains(&"use-index-for-sort"));
    let types: Vec<&str> = json["nodes"]
        .as_array()
        .expect("nodes")
        .iter()
        .filter_map(|n| n["type"].as_str())
        .collect();
    assert!(types.contains(&"SortNode"));
    assert!(types.contains(&"EnumerateCollectionNode"));
}

#[test]
fn config_rules_come_before_command_line_rules() {
    let fx = Fixture::new();
    let config = fx.write(
        "optimizer.toml",
        "[optimizer]\nrules = [\"-all\"]\nmax_passes = 8\n",
    );
    let output = cargo_bin_cmd!("docql-explain")
        .args([
            "--plan",
            path_arg(&fx.plan),
            "--config",
            path_arg(&config),
            "--rule",
            "+remove-redundant-or",
            "--format",
            "json",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(json["rules"], serde_json::json!(["remove-redundant-or"]));
}

#[test]
fn command_line_rules_override_config_rules() {
    let fx = Fixture::new();
    let config = fx.write(
        "optimizer.toml",
        "[optimizer]\nrules = [\"-remove-redundant-or\", \"-use-index-for-sort\"]\n",
    );
    let output = cargo_bin_cmd!("docql-explain")
        .args([
            "--plan",
            path_arg(&fx.plan),
            "--catalog",
            path_arg(&fx.catalog),
            "--config",
            path_arg(&config),
            "--rule",
            "+remove-redundant-or",
            "--format",
            "json",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).expect("json output");
    let rules: Vec<&str> = json["rules"]
        .as_array()
        .expect("rules")
        .iter()
        .filter_map(|r| r.as_str())
        .collect();
    assert!(rules.contains(&"remove-redundant-or"));
    assert!(!rules.contains(&"use-index-for-sort"));

    cargo_bin_cmd!("docql-explain")
        .args([
            "--plan",
            path_arg(&fx.plan),
            "--rule",
            "+use-indexes",
            "--rule",
            "-use-indexes",
        ])
        .assert()
        .failure();
}

#[test]
fn list_rules_prints_registry_order() {
    let output = cargo_bin_cmd!("docql-explain")
        .arg("--list-rules")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).expect("utf-8 output");
    let names: Vec<&str> = stdout
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect();
    let expected: Vec<&str> = RuleId::ALL.iter().map(|id| id.name()).collect();
    assert_eq!(names, expected);
}

#[test]
fn bad_input_fails_with_a_message() {
    let fx = Fixture::new();
    let assert = cargo_bin_cmd!("docql-explain")
        .args(["--plan", path_arg(&fx.plan), "--rule", "+no-such-rule"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert!(stderr.contains("unknown optimizer rule 'no-such-rule'"));

    let broken = fx.write("broken.json", "{ \"sink\": 1 ");
    cargo_bin_cmd!("docql-explain")
        .args(["--plan", path_arg(&broken)])
        .assert()
        .failure();

    cargo_bin_cmd!("docql-explain").assert().failure();
}
