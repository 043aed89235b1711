//! Declarative edit engine.
//!
//! Operations apply to a working copy of the program; the first failing
//! operation aborts the whole batch and leaves the caller's tree untouched.

use crate::ast;
use crate::diag::codes;
use crate::refactor::{op_extract_function, op_rename_variable};
use crate::uid::find_stmt_by_id;
use serde::Serialize;
use serde_json::{Value as Json, json};
use std::fmt;

/// Failure raised by an edit operation.
#[derive(Debug, Clone, Serialize)]
pub struct EditError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl EditError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            path: None,
        }
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for EditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for EditError {}

#[derive(Debug, Clone, Serialize)]
pub struct EditDetail {
    pub op: String,
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<usize>,
}

/// Per-batch application report.
#[derive(Debug, Clone, Serialize)]
pub struct EditReport {
    pub applied: usize,
    pub details: Vec<EditDetail>,
}

fn bad_spec(message: impl Into<String>) -> EditError {
    EditError::new(codes::E_BAD_SPEC, message)
}

fn bad_path(message: impl Into<String>) -> EditError {
    EditError::new(codes::E_BAD_PATH, message)
}

/// Apply an ordered edit list transactionally. On error the program is
/// left exactly as it was and the first failure is returned.
pub fn apply_edits(program: &mut Vec<Json>, edits: &[Json]) -> Result<EditReport, EditError> {
    let mut work = program.clone();
    let mut report = EditReport {
        applied: 0,
        details: Vec::new(),
    };

    for (index, edit) in edits.iter().enumerate() {
        let op = edit
            .get("op")
            .and_then(Json::as_str)
            .ok_or_else(|| bad_spec(format!("edit {index} is missing an op")))?;
        let changed = match op {
            "add_function" => {
                op_add_function(&mut work, edit)?;
                None
            }
            "rename_function" => Some(op_rename_function(&mut work, edit)?),
            "insert_before" => {
                op_insert(&mut work, edit, 0)?;
                None
            }
            "insert_after" => {
                op_insert(&mut work, edit, 1)?;
                None
            }
            "replace_call" => Some(op_replace_call(&mut work, edit)?),
            "delete_node" => {
                op_delete_node(&mut work, edit)?;
                None
            }
            "rename_variable" => Some(op_rename_variable(&mut work, edit)?),
            "extract_function" => {
                op_extract_function(&mut work, edit)?;
                None
            }
            other => {
                return Err(EditError::new(
                    codes::E_UNKNOWN_OP,
                    format!("Unknown edit op: {other}"),
                ));
            }
        };
        report.details.push(EditDetail {
            op: op.to_string(),
            index,
            changed,
        });
        report.applied += 1;
    }

    *program = work;
    Ok(report)
}

fn op_add_function(program: &mut Vec<Json>, spec: &Json) -> Result<(), EditError> {
    let name = spec
        .get("name")
        .and_then(Json::as_str)
        .ok_or_else(|| bad_spec("add_function requires {name, params, body}"))?;
    let params = spec.get("params").cloned().unwrap_or_else(|| json!([]));
    let body = spec.get("body").cloned().unwrap_or_else(|| json!([]));
    if !params.is_array() || !body.is_array() {
        return Err(bad_spec("add_function params and body must be lists"));
    }
    let mut def = json!({"name": name, "params": params, "body": body});
    if let Some(id) = spec.get("id").and_then(Json::as_str) {
        def["id"] = json!(id);
    }
    program.push(json!({ "def": def }));
    Ok(())
}

fn op_rename_function(program: &mut Vec<Json>, spec: &Json) -> Result<usize, EditError> {
    let to = spec
        .get("to")
        .and_then(Json::as_str)
        .ok_or_else(|| bad_spec("rename_function requires {to} and either {id} or {from}"))?
        .to_string();
    let fn_id = spec.get("id").and_then(Json::as_str).map(str::to_string);
    let from = spec.get("from").and_then(Json::as_str).map(str::to_string);

    let mut targets: Vec<usize> = Vec::new();
    match (&fn_id, &from) {
        (Some(id), _) => {
            for (i, stmt) in program.iter().enumerate() {
                let matched = stmt
                    .get("def")
                    .and_then(Json::as_object)
                    .and_then(|d| d.get("id"))
                    .and_then(Json::as_str)
                    == Some(id);
                if matched {
                    targets.push(i);
                }
            }
        }
        (None, Some(from)) => {
            for (i, stmt) in program.iter().enumerate() {
                let matched = stmt
                    .get("def")
                    .and_then(Json::as_object)
                    .and_then(|d| d.get("name"))
                    .and_then(Json::as_str)
                    == Some(from);
                if matched {
                    targets.push(i);
                }
            }
            if targets.len() > 1 {
                return Err(bad_spec(format!(
                    "multiple functions named '{from}' found; address the target by id"
                )));
            }
        }
        (None, None) => return Err(bad_spec("rename_function requires id or from")),
    }
    if targets.is_empty() {
        return Err(EditError::new(codes::E_UNKNOWN_FUNC, "function not found"));
    }

    // name rewritten at call sites; id-addressed calls stay valid untouched
    let old_call_name = match &from {
        Some(from) => Some(from.clone()),
        None => targets
            .first()
            .and_then(|i| program[*i]["def"]["name"].as_str().map(str::to_string)),
    };

    let mut changed = 0usize;
    for i in &targets {
        program[*i]["def"]["name"] = json!(to.clone());
        changed += 1;
    }

    if let Some(old) = old_call_name {
        for stmt in program.iter_mut() {
            walk_exprs_mut(stmt, &mut |node| {
                let Some(call) = node.get_mut("call").and_then(Json::as_object_mut) else {
                    return;
                };
                if call.get("id").is_some() {
                    return;
                }
                if call.get("name").and_then(Json::as_str) == Some(&old) {
                    call.insert("name".to_string(), json!(to.clone()));
                }
            });
        }
    }
    Ok(changed)
}

fn op_insert(program: &mut Vec<Json>, spec: &Json, offset: usize) -> Result<(), EditError> {
    let node = spec
        .get("node")
        .filter(|n| n.is_object())
        .cloned()
        .ok_or_else(|| bad_spec("insert requires {node} and a target or path"))?;
    let (seq, idx) = locate_slot(program, spec)?;
    seq.insert(idx + offset, node);
    Ok(())
}

fn op_delete_node(program: &mut Vec<Json>, spec: &Json) -> Result<(), EditError> {
    let (seq, idx) = locate_slot(program, spec)?;
    seq.remove(idx);
    Ok(())
}

/// Resolve `target` (statement id) or `path` to an existing sequence slot.
fn locate_slot<'a>(
    program: &'a mut Vec<Json>,
    spec: &Json,
) -> Result<(&'a mut Vec<Json>, usize), EditError> {
    if let Some(target) = spec.get("target") {
        let target = target
            .as_str()
            .ok_or_else(|| bad_spec("target must be a string id"))?;
        let idx = find_stmt_by_id(program, target)
            .ok_or_else(|| bad_spec(format!("statement id not found: {target}")))?;
        return Ok((program, idx));
    }
    if let Some(path) = spec.get("path") {
        let path = path
            .as_str()
            .ok_or_else(|| bad_path("path must be a string"))?;
        let segs = ast::parse_path(path).map_err(bad_path)?;
        let (seq, idx) = ast::resolve_seq_slot(program, &segs).map_err(bad_path)?;
        if idx >= seq.len() {
            return Err(bad_path(format!(
                "index {idx} out of range (sequence length {})",
                seq.len()
            )));
        }
        return Ok((seq, idx));
    }
    Err(bad_spec("operation requires a target or a path"))
}

fn op_replace_call(program: &mut Vec<Json>, spec: &Json) -> Result<usize, EditError> {
    let matcher = spec
        .get("match")
        .and_then(Json::as_object)
        .ok_or_else(|| bad_spec("replace_call requires {match:{}, set:{}}"))?
        .clone();
    let setter = spec
        .get("set")
        .and_then(Json::as_object)
        .ok_or_else(|| bad_spec("replace_call requires {match:{}, set:{}}"))?
        .clone();
    let m_name = matcher.get("name").and_then(Json::as_str).map(str::to_string);
    let m_id = matcher.get("id").and_then(Json::as_str).map(str::to_string);
    if m_name.is_none() && m_id.is_none() {
        return Err(bad_spec("replace_call match must include name or id"));
    }

    let mut changed = 0usize;
    for stmt in program.iter_mut() {
        walk_exprs_mut(stmt, &mut |node| {
            let Some(call) = node.get_mut("call").and_then(Json::as_object_mut) else {
                return;
            };
            let id_hit = m_id.as_deref().is_some()
                && call.get("id").and_then(Json::as_str) == m_id.as_deref();
            let name_hit = m_name.as_deref().is_some()
                && call.get("name").and_then(Json::as_str) == m_name.as_deref();
            if !id_hit && !name_hit {
                return;
            }
            if let Some(name) = setter.get("name") {
                call.insert("name".to_string(), name.clone());
                call.remove("id");
            }
            if let Some(id) = setter.get("id") {
                call.insert("id".to_string(), id.clone());
                call.remove("name");
            }
            if let Some(args) = setter.get("args") {
                call.insert("args".to_string(), args.clone());
            }
            changed += 1;
        });
    }
    Ok(changed)
}

/// Visit every object node in a statement tree, parents before children.
pub(crate) fn walk_exprs_mut(node: &mut Json, f: &mut impl FnMut(&mut Json)) {
    if node.is_object() {
        f(node);
    }
    match node {
        Json::Object(obj) => {
            for (_, v) in obj.iter_mut() {
                walk_exprs_mut(v, f);
            }
        }
        Json::Array(xs) => {
            for x in xs.iter_mut() {
                walk_exprs_mut(x, f);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn program() -> Vec<Json> {
        json!([
            {"id": "s0", "let": {"name": "x", "value": 1}},
            {"def": {"name": "double", "id": "fn_double", "params": ["n"], "body": [
                {"return": {"mul": [{"var": "n"}, 2]}}
            ]}},
            {"id": "s2", "print": [{"call": {"name": "double", "args": [{"var": "x"}]}}]}
        ])
        .as_array()
        .unwrap()
        .clone()
    }

    #[test]
    fn add_function_appends() {
        let mut p = program();
        let report = apply_edits(
            &mut p,
            &[json!({"op": "add_function", "name": "noop", "params": [], "body": [{"return": null}], "id": "fn_noop"})],
        )
        .unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(p.len(), 4);
        assert_eq!(p[3]["def"]["id"], "fn_noop");
    }

    #[test]
    fn rename_function_rewrites_name_calls() {
        let mut p = program();
        apply_edits(
            &mut p,
            &[json!({"op": "rename_function", "id": "fn_double", "to": "twice"})],
        )
        .unwrap();
        assert_eq!(p[1]["def"]["name"], "twice");
        assert_eq!(p[2]["print"][0]["call"]["name"], "twice");
    }

    #[test]
    fn rename_function_leaves_id_calls_alone() {
        let mut p = json!([
            {"def": {"name": "f", "id": "fn_f", "params": [], "body": []}},
            {"expr": {"call": {"id": "fn_f", "args": []}}}
        ])
        .as_array()
        .unwrap()
        .clone();
        apply_edits(&mut p, &[json!({"op": "rename_function", "id": "fn_f", "to": "g"})]).unwrap();
        assert_eq!(p[1]["expr"]["call"]["id"], "fn_f");
        assert!(p[1]["expr"]["call"].get("name").is_none());
    }

    #[test]
    fn insert_by_target_and_path() {
        let mut p = program();
        apply_edits(
            &mut p,
            &[
                json!({"op": "insert_before", "target": "s0", "node": {"print": ["first"]}}),
                json!({"op": "insert_after", "path": "/$[3]", "node": {"print": ["last"]}}),
            ],
        )
        .unwrap();
        assert_eq!(p.len(), 5);
        assert_eq!(p[0], json!({"print": ["first"]}));
        assert_eq!(p[4], json!({"print": ["last"]}));
    }

    #[test]
    fn insert_into_function_body_by_path() {
        let mut p = program();
        apply_edits(
            &mut p,
            &[json!({"op": "insert_before", "path": "/fn[fn_double]/body/$[0]",
                     "node": {"print": ["called"]}})],
        )
        .unwrap();
        assert_eq!(p[1]["def"]["body"][0], json!({"print": ["called"]}));
        assert_eq!(p[1]["def"]["body"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn delete_node_by_path() {
        let mut p = program();
        apply_edits(&mut p, &[json!({"op": "delete_node", "path": "/$[2]"})]).unwrap();
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn replace_call_retargets_to_id() {
        let mut p = program();
        let report = apply_edits(
            &mut p,
            &[json!({"op": "replace_call", "match": {"name": "double"},
                     "set": {"id": "fn_double"}})],
        )
        .unwrap();
        assert_eq!(report.details[0].changed, Some(1));
        assert_eq!(p[2]["print"][0]["call"]["id"], "fn_double");
        assert!(p[2]["print"][0]["call"].get("name").is_none());
    }

    #[test]
    fn batch_is_transactional() {
        let mut p = program();
        let before = p.clone();
        let err = apply_edits(
            &mut p,
            &[
                json!({"op": "delete_node", "path": "/$[0]"}),
                json!({"op": "delete_node", "path": "/$[99]"}),
            ],
        )
        .unwrap_err();
        assert_eq!(err.code, codes::E_BAD_PATH);
        assert_eq!(p, before);
    }

    #[test]
    fn invalid_path_grammar_fails_before_mutation() {
        let mut p = program();
        let before = p.clone();
        let err = apply_edits(
            &mut p,
            &[json!({"op": "insert_before", "path": "$[0]", "node": {"print": [1]}})],
        )
        .unwrap_err();
        assert_eq!(err.code, codes::E_BAD_PATH);
        assert_eq!(p, before);
    }

    #[test]
    fn unknown_op_is_rejected() {
        let mut p = program();
        let err = apply_edits(&mut p, &[json!({"op": "explode"})]).unwrap_err();
        assert_eq!(err.code, codes::E_UNKNOWN_OP);
    }

    #[test]
    fn rename_variable_flows_through_the_edit_engine() {
        let mut p = json!([
            {"let": {"name": "x", "value": 10}},
            {"let": {"name": "y", "value": {"mul": [{"var": "x"}, 2]}}},
            {"print": [{"var": "x"}]}
        ])
        .as_array()
        .unwrap()
        .clone();
        let report = apply_edits(
            &mut p,
            &[json!({"op": "rename_variable", "old_name": "x", "new_name": "count", "scope": "all"})],
        )
        .unwrap();
        assert_eq!(report.details[0].changed, Some(3));
    }
}
