//! Refactoring primitives: variable reference tracking, variable rename,
//! function extraction, and free-variable analysis.

use crate::ast::{PathSeg, path_to_string};
use crate::diag::codes;
use crate::edits::EditError;
use serde::Serialize;
use serde_json::{Value as Json, json};
use std::collections::BTreeSet;

/// How a variable occurrence participates in the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Definition,
    Write,
    Read,
    Parameter,
}

/// One occurrence of a variable name. The path addresses the name string
/// itself (e.g. `/$[0]/let/name`, `/$[1]/print/$[0]/var`).
#[derive(Debug, Clone, Serialize)]
pub struct VariableReference {
    pub var_name: String,
    pub path: String,
    pub kind: RefKind,
    pub scope_id: String,
}

struct RefCollector {
    refs: Vec<VariableReference>,
}

impl RefCollector {
    fn add(&mut self, name: &str, path: &[PathSeg], kind: RefKind, scope: &str) {
        self.refs.push(VariableReference {
            var_name: name.to_string(),
            path: path_to_string(path),
            kind,
            scope_id: scope.to_string(),
        });
    }

    fn expr(&mut self, expr: &Json, scope: &str, path: &[PathSeg]) {
        match expr {
            Json::Object(obj) => {
                if let Some(name) = obj.get("var").and_then(Json::as_str) {
                    let p = extend(path, [PathSeg::Key("var".into())]);
                    self.add(name, &p, RefKind::Read, scope);
                }
                for (k, v) in obj {
                    if k == "var" {
                        continue;
                    }
                    let p = extend(path, [PathSeg::Key(k.clone())]);
                    self.expr(v, scope, &p);
                }
            }
            Json::Array(xs) => {
                for (i, x) in xs.iter().enumerate() {
                    let p = extend(path, [PathSeg::Seq(i)]);
                    self.expr(x, scope, &p);
                }
            }
            _ => {}
        }
    }

    fn stmt(&mut self, stmt: &Json, scope: &str, path: &[PathSeg]) {
        let Some(obj) = stmt.as_object() else {
            return;
        };

        if let Some(spec) = obj.get("let").and_then(Json::as_object) {
            if let Some(name) = spec.get("name").and_then(Json::as_str) {
                let p = extend(path, [PathSeg::Key("let".into()), PathSeg::Key("name".into())]);
                self.add(name, &p, RefKind::Definition, scope);
            }
            if let Some(value) = spec.get("value") {
                let p = extend(path, [PathSeg::Key("let".into()), PathSeg::Key("value".into())]);
                self.expr(value, scope, &p);
            }
        }
        if let Some(spec) = obj.get("set").and_then(Json::as_object) {
            if let Some(name) = spec.get("name").and_then(Json::as_str) {
                let p = extend(path, [PathSeg::Key("set".into()), PathSeg::Key("name".into())]);
                self.add(name, &p, RefKind::Write, scope);
            }
            if let Some(value) = spec.get("value") {
                let p = extend(path, [PathSeg::Key("set".into()), PathSeg::Key("value".into())]);
                self.expr(value, scope, &p);
            }
        }
        if let Some(spec) = obj.get("def").and_then(Json::as_object) {
            let fn_scope = spec
                .get("id")
                .or_else(|| spec.get("name"))
                .and_then(Json::as_str)
                .unwrap_or("anonymous")
                .to_string();
            if let Some(params) = spec.get("params").and_then(Json::as_array) {
                for (j, param) in params.iter().enumerate() {
                    if let Some(name) = param.as_str() {
                        let p = extend(
                            path,
                            [
                                PathSeg::Key("def".into()),
                                PathSeg::Key("params".into()),
                                PathSeg::Seq(j),
                            ],
                        );
                        self.add(name, &p, RefKind::Parameter, &fn_scope);
                    }
                }
            }
            if let Some(body) = spec.get("body").and_then(Json::as_array) {
                for (j, s) in body.iter().enumerate() {
                    let p = extend(
                        path,
                        [
                            PathSeg::Key("def".into()),
                            PathSeg::Key("body".into()),
                            PathSeg::Seq(j),
                        ],
                    );
                    self.stmt(s, &fn_scope, &p);
                }
            }
        }
        if let Some(spec) = obj.get("if").and_then(Json::as_object) {
            if let Some(cond) = spec.get("cond") {
                let p = extend(path, [PathSeg::Key("if".into()), PathSeg::Key("cond".into())]);
                self.expr(cond, scope, &p);
            }
            for branch_key in ["then", "else"] {
                let Some(block) = spec.get(branch_key).and_then(Json::as_array) else {
                    continue;
                };
                for (j, s) in block.iter().enumerate() {
                    let p = extend(
                        path,
                        [
                            PathSeg::Key("if".into()),
                            PathSeg::Key(branch_key.into()),
                            PathSeg::Seq(j),
                        ],
                    );
                    self.stmt(s, scope, &p);
                }
            }
        }
        if let Some(value) = obj.get("return") {
            let p = extend(path, [PathSeg::Key("return".into())]);
            self.expr(value, scope, &p);
        }
        if let Some(value) = obj.get("expr") {
            let p = extend(path, [PathSeg::Key("expr".into())]);
            self.expr(value, scope, &p);
        }
        if let Some(payload) = obj.get("print") {
            let items: Vec<&Json> = match payload {
                Json::Array(xs) => xs.iter().collect(),
                other => vec![other],
            };
            for (i, item) in items.into_iter().enumerate() {
                let p = extend(path, [PathSeg::Key("print".into()), PathSeg::Seq(i)]);
                self.expr(item, scope, &p);
            }
        }
    }
}

fn extend(path: &[PathSeg], tail: impl IntoIterator<Item = PathSeg>) -> Vec<PathSeg> {
    let mut out = path.to_vec();
    out.extend(tail);
    out
}

/// Every reference to `name`, optionally filtered to one function scope.
/// `scope` is `"all"`, `"global"`, or a function id/name.
pub fn find_variable_references(
    program: &[Json],
    name: &str,
    scope: &str,
) -> Vec<VariableReference> {
    let mut collector = RefCollector { refs: Vec::new() };
    for (i, stmt) in program.iter().enumerate() {
        collector.stmt(stmt, "global", &[PathSeg::Seq(i)]);
    }
    collector
        .refs
        .into_iter()
        .filter(|r| r.var_name == name)
        .filter(|r| scope == "all" || r.scope_id == scope)
        .collect()
}

/// Names read or written inside the block without a `let` definition there.
/// These are the candidate parameters when extracting the block.
pub fn analyze_free_variables(statements: &[Json]) -> BTreeSet<String> {
    let mut collector = RefCollector { refs: Vec::new() };
    for (i, stmt) in statements.iter().enumerate() {
        collector.stmt(stmt, "global", &[PathSeg::Seq(i)]);
    }
    let mut defined = BTreeSet::new();
    let mut used = BTreeSet::new();
    for r in &collector.refs {
        match r.kind {
            RefKind::Definition | RefKind::Parameter => {
                defined.insert(r.var_name.clone());
            }
            RefKind::Read | RefKind::Write => {
                used.insert(r.var_name.clone());
            }
        }
    }
    used.difference(&defined).cloned().collect()
}

fn bad_spec(message: impl Into<String>) -> EditError {
    EditError::new(codes::E_BAD_SPEC, message)
}

/// `rename_variable` edit operation. Returns the number of rewritten
/// references; zero when nothing in scope matches.
pub fn op_rename_variable(program: &mut Vec<Json>, spec: &Json) -> Result<usize, EditError> {
    let old_name = spec
        .get("old_name")
        .and_then(Json::as_str)
        .ok_or_else(|| bad_spec("rename_variable requires old_name and new_name"))?;
    let new_name = spec
        .get("new_name")
        .and_then(Json::as_str)
        .ok_or_else(|| bad_spec("rename_variable requires old_name and new_name"))?;
    let scope = spec.get("scope").and_then(Json::as_str).unwrap_or("all");
    let limit_path = spec.get("path").and_then(Json::as_str);
    if let Some(p) = limit_path {
        crate::ast::parse_path(p).map_err(|m| EditError::new(codes::E_BAD_PATH, m))?;
    }

    let refs: Vec<VariableReference> = find_variable_references(program, old_name, scope)
        .into_iter()
        .filter(|r| limit_path.map_or(true, |p| r.path.starts_with(p)))
        .collect();

    for r in &refs {
        let segs = crate::ast::parse_path(&r.path)
            .map_err(|m| EditError::new(codes::E_BAD_PATH, m))?;
        let slot = name_slot_mut(program, &segs)
            .ok_or_else(|| EditError::new(codes::E_BAD_PATH, format!("stale reference path: {}", r.path)))?;
        *slot = Json::String(new_name.to_string());
    }
    Ok(refs.len())
}

/// Navigate to the name-string slot a reference path addresses.
fn name_slot_mut<'a>(program: &'a mut Vec<Json>, segs: &[PathSeg]) -> Option<&'a mut Json> {
    let mut segs = segs.iter();
    let first = segs.next()?;
    let PathSeg::Seq(i) = first else {
        return None;
    };
    let mut cur = program.get_mut(*i)?;
    for seg in segs {
        cur = match seg {
            PathSeg::Seq(i) => cur.as_array_mut()?.get_mut(*i)?,
            PathSeg::Key(k) => cur.as_object_mut()?.get_mut(k.as_str())?,
            PathSeg::Fn(_) => return None,
        };
    }
    Some(cur)
}

/// `extract_function` edit operation: move a consecutive statement range
/// into a new top-level def, optionally replacing the range with a call.
pub fn op_extract_function(program: &mut Vec<Json>, spec: &Json) -> Result<(), EditError> {
    let fn_name = spec
        .get("function_name")
        .and_then(Json::as_str)
        .ok_or_else(|| bad_spec("extract_function requires function_name"))?;
    let fn_id = spec.get("function_id").and_then(Json::as_str);
    let replace_with_call = spec
        .get("replace_with_call")
        .and_then(Json::as_bool)
        .unwrap_or(true);
    let insert_at = spec
        .get("insert_at")
        .and_then(Json::as_u64)
        .unwrap_or(0) as usize;

    let indices = spec
        .get("statements")
        .and_then(Json::as_array)
        .filter(|xs| !xs.is_empty())
        .ok_or_else(|| bad_spec("extract_function requires a non-empty statements list"))?;
    let mut indices: Vec<usize> = indices
        .iter()
        .map(|v| {
            v.as_u64()
                .map(|n| n as usize)
                .filter(|n| *n < program.len())
                .ok_or_else(|| bad_spec(format!("invalid statement index: {v}")))
        })
        .collect::<Result<_, _>>()?;
    indices.sort_unstable();
    if indices.windows(2).any(|w| w[1] != w[0] + 1) {
        return Err(bad_spec("statement indices must be consecutive"));
    }
    if insert_at > program.len() {
        return Err(bad_spec(format!("invalid insert_at index: {insert_at}")));
    }

    let parameters: Vec<String> = match spec.get("parameters") {
        None => analyze_free_variables(&program[indices[0]..=indices[indices.len() - 1]])
            .into_iter()
            .collect(),
        Some(raw) => raw
            .as_array()
            .ok_or_else(|| bad_spec("parameters must be a list"))?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| bad_spec("parameters must be strings"))
            })
            .collect::<Result<_, _>>()?,
    };

    let body: Vec<Json> = indices.iter().map(|i| program[*i].clone()).collect();

    let mut def = json!({
        "name": fn_name,
        "params": parameters,
        "body": body,
    });
    if let Some(id) = fn_id {
        def["id"] = json!(id);
    }
    program.insert(insert_at, json!({ "def": def }));

    if replace_with_call {
        let call = if let Some(id) = fn_id {
            json!({"call": {"id": id, "args": parameters.iter().map(|p| json!({"var": p})).collect::<Vec<_>>()}})
        } else {
            json!({"call": {"name": fn_name, "args": parameters.iter().map(|p| json!({"var": p})).collect::<Vec<_>>()}})
        };
        let adjusted: Vec<usize> = indices
            .iter()
            .map(|i| if *i >= insert_at { *i + 1 } else { *i })
            .collect();
        program[adjusted[0]] = json!({ "expr": call });
        for i in adjusted[1..].iter().rev() {
            program.remove(*i);
        }
    }
    Ok(())
}

/// Rename candidates: single-letter variables referenced more than a few
/// times read better with a descriptive name.
pub fn suggest_variable_renames(program: &[Json]) -> Vec<Json> {
    let mut collector = RefCollector { refs: Vec::new() };
    for (i, stmt) in program.iter().enumerate() {
        collector.stmt(stmt, "global", &[PathSeg::Seq(i)]);
    }
    let mut names: Vec<String> = collector
        .refs
        .iter()
        .map(|r| r.var_name.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    names.sort();

    let mut out = Vec::new();
    for name in names {
        let uses = collector.refs.iter().filter(|r| r.var_name == name).count();
        if name.chars().count() == 1 && uses > 3 {
            out.push(json!({
                "op": "rename_variable",
                "old_name": name,
                "new_name": format!("{name}_descriptive"),
                "scope": "all",
                "reason": format!("Single-letter variable '{name}' used {uses} times"),
                "priority": "medium",
            }));
        }
    }
    out
}

/// Extract candidates: runs of plain statements long enough to name.
pub fn suggest_extract_functions(program: &[Json], min_statements: usize) -> Vec<Json> {
    let mut out = Vec::new();
    if program.len() < min_statements {
        return out;
    }
    for start in 0..=(program.len() - min_statements) {
        let window = &program[start..start + min_statements];
        if window.iter().any(|stmt| stmt.get("def").is_some()) {
            continue;
        }
        let free: Vec<String> = analyze_free_variables(window).into_iter().collect();
        out.push(json!({
            "op": "extract_function",
            "function_name": format!("extracted_function_{start}"),
            "statements": (start..start + min_statements).collect::<Vec<_>>(),
            "parameters": free,
            "insert_at": start,
            "replace_with_call": true,
            "reason": format!(
                "Sequence of {min_statements} statements at /$[{start}] could be extracted"
            ),
            "priority": "low",
        }));
    }
    out
}
