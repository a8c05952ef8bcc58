//! End-to-end tests that exercise the `weave` binary as a subprocess against
//! real recipe files on disk, covering the scenarios spelled out in the
//! execution model's testable-properties section.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn weave() -> Command {
    Command::cargo_bin("weave").expect("weave binary should build")
}

fn write_recipe(dir: &TempDir, name: &str, contents: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path.display().to_string()
}

#[test]
fn scenario_1_loop_fan_out_preserves_order() {
    let dir = TempDir::new().unwrap();
    let recipe = write_recipe(
        &dir,
        "greet.json",
        r#"{
          "steps": [
            {"type": "set_context", "config": {"key": "names", "value": ["a", "b", "c"]}},
            {"type": "loop", "config": {
              "items": "names", "item_key": "n", "result_key": "greetings",
              "max_concurrency": 3,
              "substeps": [
                {"type": "set_context", "config": {"key": "n", "value": "Hello, {{n}}!"}}
              ]
            }},
            {"type": "write_files", "config": {
              "files": [{"path": "out.json", "content": "{{ greetings | json }}"}]
            }}
          ]
        }"#,
    );

    weave().args(["run", &recipe]).current_dir(dir.path()).assert().success();

    let out = fs::read_to_string(dir.path().join("out.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(parsed, serde_json::json!(["Hello, a!", "Hello, b!", "Hello, c!"]));
}

#[test]
fn scenario_2_conditional_branch_selects_true_branch() {
    let dir = TempDir::new().unwrap();
    let recipe = write_recipe(
        &dir,
        "cond.json",
        r#"{
          "steps": [
            {"type": "set_context", "config": {"key": "x", "value": "7"}},
            {"type": "conditional", "config": {
              "condition": "{{x}} == 7",
              "if_true": {"steps": [{"type": "set_context", "config": {"key": "y", "value": "yes"}}]},
              "if_false": {"steps": [{"type": "set_context", "config": {"key": "y", "value": "no"}}]}
            }},
            {"type": "write_files", "config": {"files": [{"path": "y.txt", "content": "{{y}}"}]}}
          ]
        }"#,
    );

    weave().args(["run", &recipe]).current_dir(dir.path()).assert().success();
    assert_eq!(fs::read_to_string(dir.path().join("y.txt")).unwrap(), "yes");
}

#[test]
fn scenario_3_fail_fast_loop_fails_the_process() {
    let dir = TempDir::new().unwrap();
    let recipe = write_recipe(
        &dir,
        "fail_fast.json",
        r#"{
          "steps": [
            {"type": "loop", "config": {
              "items": [1, 2, 3, 4, 5], "item_key": "n", "result_key": "out",
              "max_concurrency": 2, "fail_fast": true,
              "substeps": [
                {"type": "conditional", "config": {
                  "condition": "{{n}} == 3",
                  "if_true": {"steps": [{"type": "shell", "config": {"command": "exit 1"}}]}
                }}
              ]
            }}
          ]
        }"#,
    );

    weave()
        .args(["run", &recipe])
        .current_dir(dir.path())
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("loop error"));
}

#[test]
fn scenario_4_set_context_merge_appends_to_list() {
    let dir = TempDir::new().unwrap();
    let recipe = write_recipe(
        &dir,
        "merge.json",
        r#"{
          "steps": [
            {"type": "set_context", "config": {"key": "tags", "value": ["a", "b"]}},
            {"type": "set_context", "config": {"key": "tags", "value": ["c"], "if_exists": "merge"}},
            {"type": "write_files", "config": {"files": [{"path": "tags.json", "content": "{{ tags | json }}"}]}}
          ]
        }"#,
    );

    weave().args(["run", &recipe]).current_dir(dir.path()).assert().success();
    let out = fs::read_to_string(dir.path().join("tags.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(parsed, serde_json::json!(["a", "b", "c"]));
}

#[test]
fn scenario_5_execute_recipe_parses_json_overrides() {
    let dir = TempDir::new().unwrap();
    write_recipe(
        &dir,
        "sub.json",
        r#"{"steps": [
          {"type": "write_files", "config": {"files": [{"path": "extras.json", "content": "{{ extras | json }}"}]}}
        ]}"#,
    );
    let recipe = write_recipe(
        &dir,
        "parent.json",
        r#"{
          "steps": [
            {"type": "execute_recipe", "config": {
              "recipe_path": "sub.json",
              "context_overrides": {"extras": "[1,2,3]"}
            }}
          ]
        }"#,
    );

    weave().args(["run", &recipe]).current_dir(dir.path()).assert().success();
    let out = fs::read_to_string(dir.path().join("extras.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(parsed, serde_json::json!([1, 2, 3]));
}

#[test]
fn scenario_6_read_then_write_files_round_trips_with_headers() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("x.md"), "alpha").unwrap();
    fs::write(dir.path().join("y.md"), "beta").unwrap();
    let recipe = write_recipe(
        &dir,
        "roundtrip.json",
        r#"{
          "steps": [
            {"type": "read_files", "config": {"path": "x.md,y.md", "content_key": "blob", "merge_mode": "concat"}},
            {"type": "write_files", "config": {"files": [{"path": "out.md", "content": "{{blob}}"}]}}
          ]
        }"#,
    );

    weave().args(["run", &recipe]).current_dir(dir.path()).assert().success();
    let out = fs::read_to_string(dir.path().join("out.md")).unwrap();
    assert!(out.starts_with("File: x.md\nalpha"));
    assert!(out.contains("File: y.md\nbeta"));
}

#[test]
fn context_flag_seeds_artifacts_as_json_when_possible() {
    let dir = TempDir::new().unwrap();
    let recipe = write_recipe(
        &dir,
        "ctx.json",
        r#"{"steps": [{"type": "write_files", "config": {"files": [{"path": "out.txt", "content": "{{n}}-{{label}}"}]}}]}"#,
    );

    weave()
        .args(["run", &recipe, "--context", "n=3", "--context", "label=hi"])
        .current_dir(dir.path())
        .assert()
        .success();
    assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "3-hi");
}

#[test]
fn unknown_step_type_fails_with_exit_code_one() {
    let dir = TempDir::new().unwrap();
    let recipe = write_recipe(
        &dir,
        "bad.json",
        r#"{"steps": [{"type": "not_a_real_step", "config": {}}]}"#,
    );

    weave()
        .args(["run", &recipe])
        .current_dir(dir.path())
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("not_a_real_step"));
}

#[test]
fn missing_recipe_file_fails_with_exit_code_one() {
    weave()
        .args(["run", "/definitely/missing/recipe.json"])
        .assert()
        .failure()
        .code(1);
}
