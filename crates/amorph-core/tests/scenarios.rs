//! End-to-end scenarios exercising the full pipeline the way the CLI does:
//! parse, analyze, edit, rewrite, run.

use amorph_core::diag::{ValidationReport, codes};
use amorph_core::vm::VmConfig;
use amorph_core::{
    QuietBackend, Value, Vm, apply_edits, apply_rewrite, find_variable_references, validate_all,
};
use pretty_assertions::assert_eq;
use serde_json::{Value as Json, json};

fn run_capturing(program: &Json) -> (Result<Value, amorph_core::RuntimeError>, String) {
    let mut io = QuietBackend::new();
    let out = Vm::new(&mut io, VmConfig::default()).run(program);
    let mut stdout = io.outputs.join("\n");
    if !io.outputs.is_empty() {
        stdout.push('\n');
    }
    (out, stdout)
}

#[test]
fn arithmetic_and_function_prints_six() {
    let program = json!([
        {"let": {"name": "x", "value": {"add": [1, 2]}}},
        {"def": {"name": "double", "params": ["n"], "body": [
            {"return": {"mul": [{"var": "n"}, 2]}}
        ]}},
        {"let": {"name": "y", "value": {"call": {"name": "double", "args": [{"var": "x"}]}}}},
        {"print": [{"var": "y"}]}
    ]);
    let (out, stdout) = run_capturing(&program);
    out.unwrap();
    assert_eq!(stdout, "6\n");
}

#[test]
fn type_mismatch_report_shape() {
    let program = json!([{"let": {"name": "x", "value": {"add": [1, "text"]}}}]);
    let report = ValidationReport::from_issues(validate_all(&program, false, true));
    assert!(!report.ok);
    let issue = report
        .issues
        .iter()
        .find(|i| i.code == codes::E_TYPE_MISMATCH)
        .expect("type mismatch issue");
    assert_eq!(issue.path, "/$[0]/let/value");
    assert!(issue.is_error());
    assert_eq!(issue.hint.as_deref(), Some("Convert arguments to same type"));

    let encoded = serde_json::to_value(&report).unwrap();
    assert_eq!(encoded["ok"], json!(false));
    assert_eq!(encoded["issues"][0]["severity"], json!("error"));
}

#[test]
fn undefined_variable_report_shape() {
    let program = json!([{"let": {"name": "y", "value": {"var": "undefined"}}}]);
    let report = ValidationReport::from_issues(validate_all(&program, true, false));
    assert!(!report.ok);
    let issue = report
        .issues
        .iter()
        .find(|i| i.code == codes::E_UNDEFINED_VAR)
        .expect("undefined variable issue");
    assert_eq!(issue.path, "/$[0]/let/value");
}

#[test]
fn rename_variable_scenario() {
    let mut program = json!([
        {"let": {"name": "x", "value": 10}},
        {"let": {"name": "y", "value": {"mul": [{"var": "x"}, 2]}}},
        {"print": [{"var": "x"}]}
    ])
    .as_array()
    .unwrap()
    .clone();

    let edits = [json!({"op": "rename_variable", "old_name": "x", "new_name": "count", "scope": "all"})];
    let report = apply_edits(&mut program, &edits).unwrap();
    assert_eq!(report.details[0].changed, Some(3));

    let report = apply_edits(&mut program, &edits).unwrap();
    assert_eq!(report.details[0].changed, Some(0));
    assert!(find_variable_references(&program, "x", "all").is_empty());
    assert_eq!(find_variable_references(&program, "count", "all").len(), 3);
}

#[test]
fn rewrite_arithmetic_identity_scenario() {
    let mut program = json!([
        {"let": {"name": "a", "value": {"add": [{"var": "v"}, 0]}}}
    ])
    .as_array()
    .unwrap()
    .clone();
    let rules = [json!({"match": {"add": ["$x", 0]}, "replace": "$x"})];
    let report = apply_rewrite(&mut program, &rules, None);
    assert_eq!(report.replacements, 1);
    assert_eq!(program[0]["let"]["value"], json!({"var": "v"}));
}

#[test]
fn recursive_factorial_prints_120() {
    let program = json!([
        {"def": {"name": "fact", "id": "fn_fact", "params": ["n"], "body": [
            {"if": {"cond": {"le": [{"var": "n"}, 1]},
                    "then": [{"return": 1}],
                    "else": [{"return": {"mul": [{"var": "n"},
                        {"call": {"id": "fn_fact", "args": [{"sub": [{"var": "n"}, 1]}]}}]}}]}}
        ]}},
        {"print": [{"call": {"id": "fn_fact", "args": [5]}}]}
    ]);
    let (out, stdout) = run_capturing(&program);
    out.unwrap();
    assert_eq!(stdout, "120\n");
}

#[test]
fn validation_composes_all_three_passes() {
    let program = json!([
        {"let": {"name": "x", "value": {"add": [1, "text"]}}},
        {"set": {"name": "missing", "value": 1}},
        {"expr": {"call": {"name": "ghost", "args": []}}}
    ]);
    let issues = validate_all(&program, true, true);
    let codes_seen: Vec<&str> = issues.iter().map(|i| i.code.as_str()).collect();
    assert!(codes_seen.contains(&codes::E_UNKNOWN_FUNC));
    assert!(codes_seen.contains(&codes::E_UNDEFINED_VAR));
    assert!(codes_seen.contains(&codes::E_TYPE_MISMATCH));
}
