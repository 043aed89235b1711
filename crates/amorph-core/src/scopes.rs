//! Static scope analysis: undefined-variable and shadowing detection over
//! the lexical chain global → function → if-branch.

use crate::ast::{PathSeg, path_to_string};
use crate::diag::{Diagnostic, codes};
use serde_json::Value as Json;
use std::collections::HashSet;

struct Scope {
    names: HashSet<String>,
    parent: Option<usize>,
}

struct Analyzer {
    scopes: Vec<Scope>,
    issues: Vec<Diagnostic>,
}

/// Analyze a program for scope issues.
pub fn analyze_scopes(program: &[Json]) -> Vec<Diagnostic> {
    let mut a = Analyzer {
        scopes: vec![Scope {
            names: HashSet::new(),
            parent: None,
        }],
        issues: Vec::new(),
    };
    for (i, stmt) in program.iter().enumerate() {
        a.stmt(stmt, 0, &[PathSeg::Seq(i)], true);
    }
    a.issues
}

impl Analyzer {
    fn push_scope(&mut self, parent: usize) -> usize {
        self.scopes.push(Scope {
            names: HashSet::new(),
            parent: Some(parent),
        });
        self.scopes.len() - 1
    }

    fn is_defined(&self, scope: usize, name: &str) -> bool {
        let mut cursor = Some(scope);
        while let Some(i) = cursor {
            if self.scopes[i].names.contains(name) {
                return true;
            }
            cursor = self.scopes[i].parent;
        }
        false
    }

    fn stmt(&mut self, stmt: &Json, scope: usize, path: &[PathSeg], top_level: bool) {
        let Some(obj) = stmt.as_object() else {
            return;
        };

        if let Some(spec) = obj.get("let").and_then(Json::as_object) {
            let name = spec.get("name").and_then(Json::as_str);
            if let Some(name) = name {
                if self.is_defined(scope, name) {
                    self.issues.push(
                        Diagnostic::warning(
                            codes::W_VARIABLE_SHADOW,
                            path_to_string(path),
                            format!("Variable '{name}' shadows an existing definition"),
                        )
                        .with_hint("Use a different name or rename the outer variable"),
                    );
                }
            }
            if let Some(value) = spec.get("value") {
                let p = sub(path, &["let", "value"]);
                self.expr(value, scope, &p);
            }
            // defined after its own initializer is analyzed
            if let Some(name) = name {
                self.scopes[scope].names.insert(name.to_string());
            }
        }

        if let Some(spec) = obj.get("set").and_then(Json::as_object) {
            if let Some(name) = spec.get("name").and_then(Json::as_str) {
                if !self.is_defined(scope, name) {
                    self.issues.push(
                        Diagnostic::error(
                            codes::E_UNDEFINED_VAR,
                            path_to_string(path),
                            format!("Cannot set undefined variable '{name}'"),
                        )
                        .with_hint(format!("Use 'let' to define '{name}' first")),
                    );
                }
            }
            if let Some(value) = spec.get("value") {
                let p = sub(path, &["set", "value"]);
                self.expr(value, scope, &p);
            }
        }

        if let Some(spec) = obj.get("def").and_then(Json::as_object) {
            // function bodies do not inherit the enclosing scope chain
            let fn_scope = self.push_scope(0);
            if let Some(params) = spec.get("params").and_then(Json::as_array) {
                for p in params.iter().filter_map(Json::as_str) {
                    self.scopes[fn_scope].names.insert(p.to_string());
                }
            }
            if let Some(body) = spec.get("body").and_then(Json::as_array) {
                let fn_key = spec
                    .get("id")
                    .or_else(|| spec.get("name"))
                    .and_then(Json::as_str)
                    .unwrap_or("?")
                    .to_string();
                for (j, s) in body.iter().enumerate() {
                    let p = if top_level {
                        vec![
                            PathSeg::Fn(fn_key.clone()),
                            PathSeg::Key("body".into()),
                            PathSeg::Seq(j),
                        ]
                    } else {
                        let mut p = sub(path, &["def", "body"]);
                        p.push(PathSeg::Seq(j));
                        p
                    };
                    self.stmt(s, fn_scope, &p, false);
                }
            }
        }

        if let Some(spec) = obj.get("if").and_then(Json::as_object) {
            if let Some(cond) = spec.get("cond") {
                let p = sub(path, &["if", "cond"]);
                self.expr(cond, scope, &p);
            }
            for branch_key in ["then", "else"] {
                let Some(block) = spec.get(branch_key).and_then(Json::as_array) else {
                    continue;
                };
                let branch_scope = self.push_scope(scope);
                for (j, s) in block.iter().enumerate() {
                    let mut p = sub(path, &["if", branch_key]);
                    p.push(PathSeg::Seq(j));
                    self.stmt(s, branch_scope, &p, false);
                }
            }
        }

        if let Some(value) = obj.get("return") {
            let p = sub(path, &["return"]);
            self.expr(value, scope, &p);
        }

        if let Some(value) = obj.get("expr") {
            let p = sub(path, &["expr"]);
            self.expr(value, scope, &p);
        }

        if let Some(payload) = obj.get("print") {
            match payload {
                Json::Array(xs) => {
                    for (i, item) in xs.iter().enumerate() {
                        let mut p = sub(path, &["print"]);
                        p.push(PathSeg::Seq(i));
                        self.expr(item, scope, &p);
                    }
                }
                other => {
                    let p = sub(path, &["print"]);
                    self.expr(other, scope, &p);
                }
            }
        }
    }

    fn expr(&mut self, expr: &Json, scope: usize, path: &[PathSeg]) {
        match expr {
            Json::Object(obj) => {
                if let Some(name) = obj.get("var").and_then(Json::as_str) {
                    if !self.is_defined(scope, name) {
                        self.issues.push(
                            Diagnostic::error(
                                codes::E_UNDEFINED_VAR,
                                path_to_string(path),
                                format!("Variable '{name}' used before definition"),
                            )
                            .with_hint(format!(
                                "Add 'let {name}' before use or check for typos"
                            )),
                        );
                    }
                }
                for (k, v) in obj {
                    if k == "var" {
                        continue;
                    }
                    let mut p = path.to_vec();
                    p.push(PathSeg::Key(k.clone()));
                    self.expr(v, scope, &p);
                }
            }
            Json::Array(xs) => {
                for (i, x) in xs.iter().enumerate() {
                    let mut p = path.to_vec();
                    p.push(PathSeg::Seq(i));
                    self.expr(x, scope, &p);
                }
            }
            _ => {}
        }
    }
}

fn sub(path: &[PathSeg], keys: &[&str]) -> Vec<PathSeg> {
    let mut out = path.to_vec();
    out.extend(keys.iter().map(|k| PathSeg::Key((*k).to_string())));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn analyze(doc: Json) -> Vec<Diagnostic> {
        analyze_scopes(doc.as_array().expect("array program"))
    }

    #[test]
    fn undefined_variable_read() {
        let issues = analyze(json!([
            {"let": {"name": "y", "value": {"var": "undefined"}}}
        ]));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, codes::E_UNDEFINED_VAR);
        assert_eq!(issues[0].path, "/$[0]/let/value");
        assert_eq!(
            issues[0].hint.as_deref(),
            Some("Add 'let undefined' before use or check for typos")
        );
    }

    #[test]
    fn set_requires_definition() {
        let issues = analyze(json!([
            {"set": {"name": "x", "value": 1}}
        ]));
        assert_eq!(issues[0].code, codes::E_UNDEFINED_VAR);
    }

    #[test]
    fn shadowing_warns() {
        let issues = analyze(json!([
            {"let": {"name": "x", "value": 1}},
            {"if": {"cond": true, "then": [
                {"let": {"name": "x", "value": 2}}
            ]}}
        ]));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, codes::W_VARIABLE_SHADOW);
    }

    #[test]
    fn params_are_in_scope_and_bodies_are_isolated() {
        let issues = analyze(json!([
            {"let": {"name": "outer", "value": 1}},
            {"def": {"name": "f", "id": "fn_f", "params": ["a"], "body": [
                {"return": {"add": [{"var": "a"}, {"var": "outer"}]}}
            ]}}
        ]));
        assert!(issues.is_empty());
    }

    #[test]
    fn body_does_not_see_branch_locals() {
        let issues = analyze(json!([
            {"if": {"cond": true, "then": [{"let": {"name": "tmp", "value": 1}}]}},
            {"def": {"name": "f", "params": [], "body": [
                {"return": {"var": "tmp"}}
            ]}}
        ]));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, codes::E_UNDEFINED_VAR);
    }

    #[test]
    fn self_referential_initializer_is_undefined() {
        let issues = analyze(json!([
            {"let": {"name": "x", "value": {"var": "x"}}}
        ]));
        assert_eq!(issues[0].code, codes::E_UNDEFINED_VAR);
    }
}
