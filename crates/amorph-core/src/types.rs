//! Optional type inference pass: bottom-up expression typing with operator
//! compatibility checks. `Any` absorbs silently; `Unknown` records a gap
//! without cascading errors downstream.

use crate::diag::{Diagnostic, codes};
use crate::ops::normalize;
use serde_json::Value as Json;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Int,
    Float,
    Str,
    Bool,
    Null,
    List(Box<Type>),
    Function(usize),
    Any,
    Unknown,
}

impl Type {
    fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float)
    }

    /// Conservative gaps never produce downstream errors.
    fn is_opaque(&self) -> bool {
        matches!(self, Type::Any | Type::Unknown)
    }

    /// Broad class used by the `eq`/`ne` compatibility check.
    fn class(&self) -> &'static str {
        match self {
            Type::Int | Type::Float => "numeric",
            Type::Str => "string",
            Type::Bool => "bool",
            Type::Null => "null",
            Type::List(_) => "list",
            Type::Function(_) => "function",
            Type::Any | Type::Unknown => "opaque",
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Str => write!(f, "str"),
            Type::Bool => write!(f, "bool"),
            Type::Null => write!(f, "null"),
            Type::List(t) => write!(f, "list[{t}]"),
            Type::Function(n) => write!(f, "function/{n}"),
            Type::Any => write!(f, "any"),
            Type::Unknown => write!(f, "unknown"),
        }
    }
}

/// Join of two element types for list construction; falls back to `Any`.
fn join(a: &Type, b: &Type) -> Type {
    if a == b {
        a.clone()
    } else if matches!(a, Type::Unknown) {
        b.clone()
    } else if matches!(b, Type::Unknown) {
        a.clone()
    } else {
        Type::Any
    }
}

struct TypeEnv {
    vars: HashMap<String, Type>,
    parent: Option<usize>,
}

struct Inferencer {
    envs: Vec<TypeEnv>,
    issues: Vec<Diagnostic>,
}

/// Check types in a whole program.
pub fn check_types(program: &[Json]) -> Vec<Diagnostic> {
    let mut inf = Inferencer {
        envs: vec![TypeEnv {
            vars: HashMap::new(),
            parent: None,
        }],
        issues: Vec::new(),
    };
    for (i, stmt) in program.iter().enumerate() {
        inf.stmt(stmt, 0, &format!("/$[{i}]"));
    }
    inf.issues
}

impl Inferencer {
    fn push_env(&mut self, parent: usize) -> usize {
        self.envs.push(TypeEnv {
            vars: HashMap::new(),
            parent: Some(parent),
        });
        self.envs.len() - 1
    }

    fn lookup(&self, env: usize, name: &str) -> Type {
        let mut cursor = Some(env);
        while let Some(i) = cursor {
            if let Some(t) = self.envs[i].vars.get(name) {
                return t.clone();
            }
            cursor = self.envs[i].parent;
        }
        Type::Unknown
    }

    fn mismatch(&mut self, path: &str, message: String) {
        self.issues.push(
            Diagnostic::error(codes::E_TYPE_MISMATCH, path, message)
                .with_hint("Convert arguments to same type"),
        );
    }

    fn stmt(&mut self, stmt: &Json, env: usize, path: &str) {
        let Some(obj) = stmt.as_object() else {
            return;
        };

        if let Some(spec) = obj.get("let").and_then(Json::as_object) {
            if let Some(value) = spec.get("value") {
                let t = self.expr(value, env, &format!("{path}/let/value"));
                if let Some(name) = spec.get("name").and_then(Json::as_str) {
                    self.envs[env].vars.insert(name.to_string(), t);
                }
            }
        }
        if let Some(spec) = obj.get("set").and_then(Json::as_object) {
            if let Some(value) = spec.get("value") {
                let t = self.expr(value, env, &format!("{path}/set/value"));
                if let Some(name) = spec.get("name").and_then(Json::as_str) {
                    self.envs[env].vars.insert(name.to_string(), t);
                }
            }
        }
        if let Some(value) = obj.get("return") {
            self.expr(value, env, &format!("{path}/return"));
        }
        if let Some(value) = obj.get("expr") {
            self.expr(value, env, &format!("{path}/expr"));
        }
        if let Some(payload) = obj.get("print") {
            match payload {
                Json::Array(xs) => {
                    for (i, x) in xs.iter().enumerate() {
                        self.expr(x, env, &format!("{path}/print/$[{i}]"));
                    }
                }
                other => {
                    self.expr(other, env, &format!("{path}/print"));
                }
            }
        }
        if let Some(spec) = obj.get("if").and_then(Json::as_object) {
            if let Some(cond) = spec.get("cond") {
                self.expr(cond, env, &format!("{path}/if/cond"));
            }
            for branch_key in ["then", "else"] {
                let Some(block) = spec.get(branch_key).and_then(Json::as_array) else {
                    continue;
                };
                let branch_env = self.push_env(env);
                for (j, s) in block.iter().enumerate() {
                    self.stmt(s, branch_env, &format!("{path}/if/{branch_key}/$[{j}]"));
                }
            }
        }
        if let Some(spec) = obj.get("def").and_then(Json::as_object) {
            let fn_env = self.push_env(0);
            if let Some(params) = spec.get("params").and_then(Json::as_array) {
                for p in params.iter().filter_map(Json::as_str) {
                    self.envs[fn_env].vars.insert(p.to_string(), Type::Any);
                }
            }
            if let Some(body) = spec.get("body").and_then(Json::as_array) {
                let fn_key = spec
                    .get("id")
                    .or_else(|| spec.get("name"))
                    .and_then(Json::as_str)
                    .unwrap_or("?");
                for (j, s) in body.iter().enumerate() {
                    self.stmt(s, fn_env, &format!("/fn[{fn_key}]/body/$[{j}]"));
                }
            }
        }
    }

    fn expr(&mut self, expr: &Json, env: usize, path: &str) -> Type {
        match expr {
            Json::Null => Type::Null,
            Json::Bool(_) => Type::Bool,
            Json::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Type::Int
                } else {
                    Type::Float
                }
            }
            Json::String(_) => Type::Str,
            Json::Array(xs) => {
                let mut elem = Type::Unknown;
                for (i, x) in xs.iter().enumerate() {
                    let t = self.expr(x, env, &format!("{path}/$[{i}]"));
                    elem = join(&elem, &t);
                }
                Type::List(Box::new(elem))
            }
            Json::Object(obj) => {
                if let Some(name) = obj.get("var").and_then(Json::as_str) {
                    return self.lookup(env, name);
                }
                if let Some(spec) = obj.get("call") {
                    // cross-function inference is out of scope; still type
                    // the argument expressions
                    if let Some(args) = spec.get("args").and_then(Json::as_array) {
                        for (i, a) in args.iter().enumerate() {
                            self.expr(a, env, &format!("{path}/call/args/$[{i}]"));
                        }
                    }
                    return Type::Unknown;
                }
                if obj.len() == 1 {
                    let (op, payload) = obj.iter().next().expect("single-key object");
                    return self.operator(op, payload, env, path);
                }
                Type::Unknown
            }
        }
    }

    fn operand_types(&mut self, payload: &Json, env: usize, path: &str) -> Vec<Type> {
        match payload {
            Json::Array(xs) => xs
                .iter()
                .enumerate()
                .map(|(i, x)| self.expr(x, env, &format!("{path}/$[{i}]")))
                .collect(),
            other => vec![self.expr(other, env, path)],
        }
    }

    fn operator(&mut self, op: &str, payload: &Json, env: usize, path: &str) -> Type {
        let op = normalize(op);
        let args = self.operand_types(payload, env, path);
        let listed = |ts: &[Type]| {
            ts.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", ")
        };

        match op {
            "add" | "sub" | "mul" | "div" | "mod" | "pow" => {
                if op == "add" && !args.is_empty() && args.iter().all(|t| *t == Type::Str) {
                    return Type::Str;
                }
                if args.iter().any(|t| !t.is_numeric() && !t.is_opaque()) {
                    let msg = if op == "add" {
                        format!("add expects all numeric or all string, got [{}]", listed(&args))
                    } else {
                        format!("{op} expects numeric arguments, got [{}]", listed(&args))
                    };
                    self.mismatch(path, msg);
                    return Type::Unknown;
                }
                if args.iter().any(|t| *t == Type::Float) {
                    Type::Float
                } else if args.iter().any(Type::is_opaque) {
                    Type::Unknown
                } else {
                    Type::Int
                }
            }
            "eq" | "ne" => {
                if let [a, b] = args.as_slice() {
                    let compatible = a.is_opaque()
                        || b.is_opaque()
                        || a.class() == b.class()
                        || a.class() == "null"
                        || b.class() == "null";
                    if !compatible {
                        self.issues.push(Diagnostic::warning(
                            codes::W_TYPE_SUSPICIOUS,
                            path,
                            format!("{op} compares {a} with {b}; result is always {}", op == "ne"),
                        ));
                    }
                }
                Type::Bool
            }
            "lt" | "le" | "gt" | "ge" => {
                if let [a, b] = args.as_slice() {
                    let ordered = (a.is_numeric() && b.is_numeric())
                        || (*a == Type::Str && *b == Type::Str)
                        || a.is_opaque()
                        || b.is_opaque();
                    if !ordered {
                        self.mismatch(
                            path,
                            format!("{op} orders numerics or strings, got [{}]", listed(&args)),
                        );
                    }
                }
                Type::Bool
            }
            "and" | "or" | "not" => Type::Bool,
            "list" => {
                let elem = args.iter().fold(Type::Unknown, |acc, t| join(&acc, t));
                Type::List(Box::new(elem))
            }
            "len" => {
                if let [t] = args.as_slice() {
                    if !matches!(t, Type::List(_) | Type::Str) && !t.is_opaque() {
                        self.mismatch(path, format!("len expects a list or string, got [{t}]"));
                    }
                }
                Type::Int
            }
            "get" => match args.as_slice() {
                [Type::List(elem), idx] => {
                    if !matches!(idx, Type::Int) && !idx.is_opaque() {
                        self.mismatch(path, format!("get index must be int, got [{idx}]"));
                    }
                    (**elem).clone()
                }
                [Type::Str, _] => Type::Str,
                [t, _] if !t.is_opaque() => {
                    self.mismatch(path, format!("get expects a list or string, got [{t}]"));
                    Type::Unknown
                }
                _ => Type::Unknown,
            },
            "has" => {
                if let [t, _] = args.as_slice() {
                    if !matches!(t, Type::List(_) | Type::Str) && !t.is_opaque() {
                        self.mismatch(path, format!("has expects a list or string, got [{t}]"));
                    }
                }
                Type::Bool
            }
            "concat" => {
                if !args.is_empty() && args.iter().all(|t| *t == Type::Str) {
                    Type::Str
                } else if args.iter().all(|t| matches!(t, Type::List(_)) || t.is_opaque()) {
                    let elem = args.iter().fold(Type::Unknown, |acc, t| match t {
                        Type::List(e) => join(&acc, e),
                        _ => acc,
                    });
                    Type::List(Box::new(elem))
                } else if args.iter().all(|t| *t == Type::Str || t.is_opaque()) {
                    Type::Str
                } else {
                    self.mismatch(
                        path,
                        format!("concat expects all lists or all strings, got [{}]", listed(&args)),
                    );
                    Type::Unknown
                }
            }
            "range" => {
                for t in &args {
                    if !t.is_numeric() && !t.is_opaque() {
                        self.mismatch(path, format!("range expects numeric arguments, got [{t}]"));
                    }
                }
                Type::List(Box::new(Type::Int))
            }
            "input" => {
                if let [t] = args.as_slice() {
                    if *t != Type::Str && !t.is_opaque() {
                        self.mismatch(path, format!("input prompt must be a string, got [{t}]"));
                    }
                }
                Type::Str
            }
            "int" => Type::Int,
            _ => Type::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(doc: Json) -> Vec<Diagnostic> {
        check_types(doc.as_array().expect("array program"))
    }

    #[test]
    fn mixed_add_is_reported_with_hint() {
        let issues = check(json!([
            {"let": {"name": "x", "value": {"add": [1, "text"]}}}
        ]));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, codes::E_TYPE_MISMATCH);
        assert_eq!(issues[0].path, "/$[0]/let/value");
        assert_eq!(issues[0].hint.as_deref(), Some("Convert arguments to same type"));
    }

    #[test]
    fn string_add_is_fine() {
        assert!(check(json!([
            {"let": {"name": "s", "value": {"add": ["a", "b"]}}}
        ]))
        .is_empty());
    }

    #[test]
    fn let_types_flow_into_later_expressions() {
        let issues = check(json!([
            {"let": {"name": "s", "value": "text"}},
            {"let": {"name": "x", "value": {"mul": [{"var": "s"}, 2]}}}
        ]));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, codes::E_TYPE_MISMATCH);
        assert_eq!(issues[0].path, "/$[1]/let/value");
    }

    #[test]
    fn unknown_call_results_do_not_cascade() {
        assert!(check(json!([
            {"def": {"name": "f", "params": [], "body": [{"return": 1}]}},
            {"let": {"name": "x", "value": {"call": {"name": "f", "args": []}}}},
            {"let": {"name": "y", "value": {"add": [{"var": "x"}, 1]}}}
        ]))
        .is_empty());
    }

    #[test]
    fn suspicious_equality_warns() {
        let issues = check(json!([
            {"let": {"name": "b", "value": {"eq": [1, "one"]}}}
        ]));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, codes::W_TYPE_SUSPICIOUS);
        assert!(!issues[0].is_error());
    }

    #[test]
    fn ordering_rejects_mixed() {
        let issues = check(json!([
            {"let": {"name": "b", "value": {"lt": [1, "one"]}}}
        ]));
        assert_eq!(issues[0].code, codes::E_TYPE_MISMATCH);
    }

    #[test]
    fn list_join_and_get_element_types() {
        let issues = check(json!([
            {"let": {"name": "xs", "value": {"list": [1, 2, 3]}}},
            {"let": {"name": "x", "value": {"get": [{"var": "xs"}, 0]}}},
            {"let": {"name": "y", "value": {"add": [{"var": "x"}, 1]}}}
        ]));
        assert!(issues.is_empty());
    }

    #[test]
    fn len_of_int_is_a_mismatch() {
        let issues = check(json!([
            {"let": {"name": "n", "value": {"len": [3]}}}
        ]));
        assert_eq!(issues[0].code, codes::E_TYPE_MISMATCH);
    }

    #[test]
    fn params_are_any_inside_bodies() {
        assert!(check(json!([
            {"def": {"name": "f", "params": ["n"], "body": [
                {"return": {"mul": [{"var": "n"}, 2]}}
            ]}}
        ]))
        .is_empty());
    }

    #[test]
    fn range_yields_int_list() {
        let issues = check(json!([
            {"let": {"name": "xs", "value": {"range": [1, 10]}}},
            {"let": {"name": "x", "value": {"add": [{"get": [{"var": "xs"}, 0]}, 1]}}}
        ]));
        assert!(issues.is_empty());
    }
}
