//! Semantic validator: program shape, symbol resolution, call-style and
//! operator-arity checks. Collects diagnostics without stopping at the
//! first issue.

use crate::ast::{self, PathSeg, path_to_string};
use crate::diag::{Diagnostic, codes};
use crate::ops::OpRegistry;
use serde_json::{Map, Value as Json};
use std::collections::{HashMap, HashSet};

/// Run the structural validator alone.
pub fn validate(doc: &Json) -> Vec<Diagnostic> {
    let mut checker = Checker::new();
    checker.run(doc);
    checker.issues
}

/// Validation entry point composing the optional passes.
pub fn validate_all(doc: &Json, check_scopes: bool, check_types: bool) -> Vec<Diagnostic> {
    let mut issues = validate(doc);
    if let Ok(program) = ast::program_statements(doc) {
        if check_scopes {
            issues.extend(crate::scopes::analyze_scopes(program));
        }
        if check_types {
            issues.extend(crate::types::check_types(program));
        }
    }
    issues
}

struct Checker {
    issues: Vec<Diagnostic>,
    ops: OpRegistry,
    fn_names: HashSet<String>,
    fn_ids: HashSet<String>,
    name_to_id: HashMap<String, String>,
    dup_names: HashSet<String>,
    saw_name_call: bool,
    saw_id_call: bool,
    seen_ids: HashSet<String>,
}

impl Checker {
    fn new() -> Self {
        Self {
            issues: Vec::new(),
            ops: OpRegistry::new(),
            fn_names: HashSet::new(),
            fn_ids: HashSet::new(),
            name_to_id: HashMap::new(),
            dup_names: HashSet::new(),
            saw_name_call: false,
            saw_id_call: false,
            seen_ids: HashSet::new(),
        }
    }

    fn run(&mut self, doc: &Json) {
        let program = match ast::program_statements(doc) {
            Ok(p) => p,
            Err(msg) => {
                self.issues.push(Diagnostic::error(codes::E_SHAPE, "/", msg));
                return;
            }
        };

        self.collect_functions(program);

        for (i, stmt) in program.iter().enumerate() {
            let path = vec![PathSeg::Seq(i)];
            self.check_stmt(stmt, &path, true);
        }

        if self.saw_name_call && self.saw_id_call {
            self.issues.push(
                Diagnostic::warning(
                    codes::W_MIXED_CALL_STYLE,
                    "/",
                    "Mixed call styles (name and id) found",
                )
                .with_hint("Unify with: amorph migrate-calls <file> --to id"),
            );
        }
    }

    fn collect_functions(&mut self, program: &[Json]) {
        for (i, stmt) in program.iter().enumerate() {
            let Some(def) = stmt.get("def").and_then(Json::as_object) else {
                continue;
            };
            let name = def.get("name").and_then(Json::as_str);
            let id = def.get("id").and_then(Json::as_str);
            if let Some(name) = name {
                if !self.fn_names.insert(name.to_string()) {
                    self.dup_names.insert(name.to_string());
                    self.name_to_id.remove(name);
                    self.issues.push(Diagnostic::warning(
                        codes::W_DUPLICATE_NAME,
                        path_to_string(&[PathSeg::Seq(i)]),
                        format!("Duplicate function name: {name}"),
                    ));
                } else if let Some(id) = id {
                    self.name_to_id.insert(name.to_string(), id.to_string());
                }
            }
            if let Some(id) = id {
                self.fn_ids.insert(id.to_string());
            }
        }
    }

    fn note_id(&mut self, obj: &Map<String, Json>, path: &[PathSeg]) {
        let Some(id) = obj.get("id").and_then(Json::as_str) else {
            return;
        };
        if !self.seen_ids.insert(id.to_string()) {
            self.issues.push(Diagnostic::error(
                codes::E_DUPLICATE_ID,
                path_to_string(path),
                format!("Duplicate id: {id}"),
            ));
        }
    }

    fn error(&mut self, code: &str, path: &[PathSeg], message: impl Into<String>) {
        self.issues
            .push(Diagnostic::error(code, path_to_string(path), message));
    }

    fn check_stmt(&mut self, stmt: &Json, path: &[PathSeg], top_level: bool) {
        let Some(obj) = stmt.as_object() else {
            self.error(codes::E_SHAPE, path, "Statement must be an object");
            return;
        };
        self.note_id(obj, path);
        let Some(kind) = ast::stmt_kind(obj) else {
            let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
            self.error(
                codes::E_SHAPE,
                path,
                format!("Unknown statement: {{{}}}", keys.join(", ")),
            );
            return;
        };

        match kind {
            "let" | "set" => {
                let Some(spec) = obj[kind].as_object() else {
                    self.error(codes::E_SHAPE, path, format!("{kind} requires {{name, value}}"));
                    return;
                };
                if spec.get("name").and_then(Json::as_str).is_none() {
                    self.error(codes::E_SHAPE, path, format!("{kind} name must be a string"));
                }
                match spec.get("value") {
                    Some(value) => {
                        let p = extend(path, [PathSeg::Key(kind.into()), PathSeg::Key("value".into())]);
                        self.check_expr(value, &p);
                    }
                    None => self.error(codes::E_SHAPE, path, format!("{kind} requires a value")),
                }
            }
            "return" => {
                let p = extend(path, [PathSeg::Key("return".into())]);
                self.check_expr(&obj["return"], &p);
            }
            "expr" => {
                let p = extend(path, [PathSeg::Key("expr".into())]);
                self.check_expr(&obj["expr"], &p);
            }
            "print" => {
                let items: Vec<&Json> = match &obj["print"] {
                    Json::Array(xs) => xs.iter().collect(),
                    other => vec![other],
                };
                for (i, item) in items.into_iter().enumerate() {
                    let p = extend(path, [PathSeg::Key("print".into()), PathSeg::Seq(i)]);
                    match item.as_object().filter(|o| o.len() == 1).and_then(|o| o.get("spread")) {
                        Some(inner) => self.check_expr(inner, &p),
                        None => self.check_expr(item, &p),
                    }
                }
            }
            "if" => {
                let Some(spec) = obj["if"].as_object() else {
                    self.error(codes::E_SHAPE, path, "if requires {cond, then?, else?}");
                    return;
                };
                match spec.get("cond") {
                    Some(cond) => {
                        let p = extend(path, [PathSeg::Key("if".into()), PathSeg::Key("cond".into())]);
                        self.check_expr(cond, &p);
                    }
                    None => self.error(codes::E_SHAPE, path, "if requires a cond expression"),
                }
                for branch_key in ["then", "else"] {
                    let Some(branch) = spec.get(branch_key) else {
                        continue;
                    };
                    let Some(block) = branch.as_array() else {
                        self.error(codes::E_SHAPE, path, "then/else must be a list of statements");
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
                        self.check_stmt(s, &p, false);
                    }
                }
            }
            "def" => {
                let Some(spec) = obj["def"].as_object() else {
                    self.error(codes::E_SHAPE, path, "def requires {name, params?, body?}");
                    return;
                };
                let name = spec.get("name").and_then(Json::as_str);
                if name.is_none() {
                    self.error(codes::E_SHAPE, path, "def name must be a string");
                }
                if let Some(id_obj) = spec.get("id").and_then(Json::as_str) {
                    // def ids share the program-wide id namespace
                    if !self.seen_ids.insert(id_obj.to_string()) {
                        self.issues.push(Diagnostic::error(
                            codes::E_DUPLICATE_ID,
                            path_to_string(path),
                            format!("Duplicate id: {id_obj}"),
                        ));
                    }
                }
                if let Some(params) = spec.get("params") {
                    if !params
                        .as_array()
                        .is_some_and(|xs| xs.iter().all(Json::is_string))
                    {
                        self.error(codes::E_SHAPE, path, "def params must be a list of strings");
                    }
                }
                let body = match spec.get("body") {
                    None => return,
                    Some(Json::Array(body)) => body,
                    Some(_) => {
                        self.error(codes::E_SHAPE, path, "def body must be a list of statements");
                        return;
                    }
                };
                let fn_key = spec
                    .get("id")
                    .and_then(Json::as_str)
                    .or(name)
                    .unwrap_or("?")
                    .to_string();
                for (j, s) in body.iter().enumerate() {
                    let base = if top_level {
                        vec![PathSeg::Fn(fn_key.clone()), PathSeg::Key("body".into())]
                    } else {
                        extend(path, [PathSeg::Key("def".into()), PathSeg::Key("body".into())])
                    };
                    let p = extend(&base, [PathSeg::Seq(j)]);
                    self.check_stmt(s, &p, false);
                }
            }
            _ => unreachable!("stmt_kind returned an unregistered discriminator"),
        }
    }

    fn check_expr(&mut self, node: &Json, path: &[PathSeg]) {
        match node {
            Json::Object(obj) => {
                if let Some(call) = obj.get("call") {
                    self.check_call(call, path);
                } else if ast::is_op_node(obj) {
                    let (op, payload) = obj.iter().next().expect("single-key object");
                    let count = ast::op_operands(payload).len();
                    match self.ops.arity(op) {
                        None => self.error(
                            codes::E_UNKNOWN_OP,
                            path,
                            format!("Unknown operator: {op}"),
                        ),
                        Some(arity) if !arity.accepts(count) => self.error(
                            codes::E_OP_ARITY,
                            path,
                            format!(
                                "Operator {op} expects {} operands, got {count}",
                                arity.describe()
                            ),
                        ),
                        Some(_) => {}
                    }
                }
                for (k, v) in obj {
                    if k == "var" {
                        continue;
                    }
                    let p = extend(path, [PathSeg::Key(k.clone())]);
                    self.check_expr(v, &p);
                }
            }
            Json::Array(xs) => {
                for (i, x) in xs.iter().enumerate() {
                    let p = extend(path, [PathSeg::Seq(i)]);
                    self.check_expr(x, &p);
                }
            }
            _ => {}
        }
    }

    fn check_call(&mut self, call: &Json, path: &[PathSeg]) {
        let Some(spec) = call.as_object() else {
            self.error(codes::E_SHAPE, path, "call requires {name|id, args?}");
            return;
        };
        let id = spec.get("id").and_then(Json::as_str);
        let name = spec.get("name").and_then(Json::as_str);
        match (id, name) {
            (Some(id), _) => {
                self.saw_id_call = true;
                if !self.fn_ids.contains(id) {
                    self.error(
                        codes::E_UNKNOWN_FUNC,
                        path,
                        format!("Unknown function id in call: {id}"),
                    );
                }
            }
            (None, Some(name)) => {
                self.saw_name_call = true;
                if !self.fn_names.contains(name) {
                    self.error(
                        codes::E_UNKNOWN_FUNC,
                        path,
                        format!("Unknown function name in call: {name}"),
                    );
                } else if let Some(fn_id) = self.name_to_id.get(name) {
                    self.issues.push(
                        Diagnostic::warning(
                            codes::W_PREFER_ID,
                            path_to_string(path),
                            format!("Call by name can use id {fn_id}"),
                        )
                        .with_hint("Run: amorph migrate-calls <file> --to id"),
                    );
                }
            }
            (None, None) => {
                self.error(codes::E_SHAPE, path, "call requires a name or an id");
            }
        }
    }
}

fn extend(path: &[PathSeg], tail: impl IntoIterator<Item = PathSeg>) -> Vec<PathSeg> {
    let mut out = path.to_vec();
    out.extend(tail);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codes_of(issues: &[Diagnostic]) -> Vec<&str> {
        issues.iter().map(|i| i.code.as_str()).collect()
    }

    #[test]
    fn clean_program_validates() {
        let doc = json!([
            {"def": {"name": "f", "id": "fn_f", "params": ["x"], "body": [{"return": {"var": "x"}}]}},
            {"print": [{"call": {"id": "fn_f", "args": [1]}}]}
        ]);
        assert!(validate(&doc).is_empty());
    }

    #[test]
    fn shape_errors() {
        assert_eq!(codes_of(&validate(&json!("nope"))), vec![codes::E_SHAPE]);
        assert_eq!(codes_of(&validate(&json!([42]))), vec![codes::E_SHAPE]);
        let doc = json!([{"frobnicate": {}}]);
        assert_eq!(codes_of(&validate(&doc)), vec![codes::E_SHAPE]);
    }

    #[test]
    fn unknown_function_and_operator() {
        let doc = json!([
            {"expr": {"call": {"name": "missing", "args": []}}},
            {"expr": {"frob": [1, 2]}}
        ]);
        let issues = validate(&doc);
        assert_eq!(codes_of(&issues), vec![codes::E_UNKNOWN_FUNC, codes::E_UNKNOWN_OP]);
        assert_eq!(issues[0].path, "/$[0]/expr");
        assert_eq!(issues[1].path, "/$[1]/expr");
    }

    #[test]
    fn operator_arity_and_namespacing() {
        let doc = json!([
            {"expr": {"len": [1, 2]}},
            {"expr": {"math.add": [1, 2]}}
        ]);
        let issues = validate(&doc);
        assert_eq!(codes_of(&issues), vec![codes::E_OP_ARITY]);
    }

    #[test]
    fn duplicate_ids_and_names() {
        let doc = json!([
            {"id": "s1", "let": {"name": "a", "value": 1}},
            {"id": "s1", "let": {"name": "b", "value": 2}},
            {"def": {"name": "f", "body": []}},
            {"def": {"name": "f", "body": []}}
        ]);
        let issues = validate(&doc);
        assert!(codes_of(&issues).contains(&codes::E_DUPLICATE_ID));
        assert!(codes_of(&issues).contains(&codes::W_DUPLICATE_NAME));
    }

    #[test]
    fn call_style_warnings() {
        let doc = json!([
            {"def": {"name": "f", "id": "fn_f", "body": []}},
            {"def": {"name": "g", "id": "fn_g", "body": []}},
            {"expr": {"call": {"name": "f", "args": []}}},
            {"expr": {"call": {"id": "fn_g", "args": []}}}
        ]);
        let issues = validate(&doc);
        let codes_seen = codes_of(&issues);
        assert!(codes_seen.contains(&codes::W_PREFER_ID));
        assert!(codes_seen.contains(&codes::W_MIXED_CALL_STYLE));
        assert!(issues.iter().all(|i| !i.is_error()));
    }

    #[test]
    fn walker_reaches_nested_positions() {
        let doc = json!([
            {"if": {"cond": {"bogus_op": 1},
                    "then": [{"expr": {"call": {"name": "nope", "args": []}}}]}}
        ]);
        let issues = validate(&doc);
        assert_eq!(issues[0].code, codes::E_UNKNOWN_OP);
        assert_eq!(issues[0].path, "/$[0]/if/cond");
        assert_eq!(issues[1].code, codes::E_UNKNOWN_FUNC);
        assert_eq!(issues[1].path, "/$[0]/if/then/$[0]/expr");
    }

    #[test]
    fn def_body_paths_use_fn_segment() {
        let doc = json!([
            {"def": {"name": "f", "id": "fn_f", "params": [], "body": [
                {"expr": {"call": {"name": "missing", "args": []}}}
            ]}}
        ]);
        let issues = validate(&doc);
        assert_eq!(issues[0].path, "/fn[fn_f]/body/$[0]/expr");
    }
}
