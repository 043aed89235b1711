//! Improvement suggestions: missing ids, mixed call style, rename and
//! extract candidates. Each suggestion carries a ready-to-apply edit spec.

use crate::refactor::{suggest_extract_functions, suggest_variable_renames};
use serde::Serialize;
use serde_json::{Value as Json, json};

#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub operation: String,
    pub reason: String,
    pub edit_spec: Json,
    pub priority: String,
    pub estimated_impact: String,
}

/// Analyze a program and list actionable improvements.
pub fn suggest_improvements(program: &[Json]) -> Vec<Suggestion> {
    let mut out = Vec::new();

    for (i, stmt) in program.iter().enumerate() {
        let Some(def) = stmt.get("def").and_then(Json::as_object) else {
            continue;
        };
        if !def.contains_key("id") {
            let fn_name = def.get("name").and_then(Json::as_str).unwrap_or("anonymous");
            out.push(Suggestion {
                operation: "add_uid".to_string(),
                reason: format!("Function '{fn_name}' lacks a stable id for robust references"),
                edit_spec: json!({"op": "add_uid", "path": format!("/$[{i}]/def"), "deep": false}),
                priority: "medium".to_string(),
                estimated_impact: "Safe".to_string(),
            });
        }
    }

    let missing_ids = program
        .iter()
        .filter(|stmt| stmt.get("id").is_none())
        .count();
    if missing_ids > 0 {
        out.push(Suggestion {
            operation: "add_uid_all".to_string(),
            reason: format!("{missing_ids} statements lack ids for precise targeting"),
            edit_spec: json!({"op": "add_uid", "deep": true}),
            priority: "low".to_string(),
            estimated_impact: "Safe".to_string(),
        });
    }

    let (mut saw_name, mut saw_id) = (false, false);
    for stmt in program {
        mark_call_styles(stmt, &mut saw_name, &mut saw_id);
    }
    if saw_name && saw_id {
        out.push(Suggestion {
            operation: "migrate_calls".to_string(),
            reason: "Mixed call styles (name and id) found - inconsistent references".to_string(),
            edit_spec: json!({"op": "migrate_calls", "to": "id"}),
            priority: "medium".to_string(),
            estimated_impact: "Safe".to_string(),
        });
    }

    for spec in suggest_variable_renames(program) {
        out.push(Suggestion {
            operation: "rename_variable".to_string(),
            reason: spec["reason"].as_str().unwrap_or_default().to_string(),
            priority: spec["priority"].as_str().unwrap_or("low").to_string(),
            edit_spec: spec,
            estimated_impact: "Safe".to_string(),
        });
    }

    for spec in suggest_extract_functions(program, 3) {
        out.push(Suggestion {
            operation: "extract_function".to_string(),
            reason: spec["reason"].as_str().unwrap_or_default().to_string(),
            priority: spec["priority"].as_str().unwrap_or("low").to_string(),
            edit_spec: spec,
            estimated_impact: "Optimization".to_string(),
        });
    }

    out
}

fn mark_call_styles(node: &Json, saw_name: &mut bool, saw_id: &mut bool) {
    match node {
        Json::Object(obj) => {
            if let Some(call) = obj.get("call").and_then(Json::as_object) {
                if call.contains_key("name") {
                    *saw_name = true;
                }
                if call.contains_key("id") {
                    *saw_id = true;
                }
            }
            for (_, v) in obj {
                mark_call_styles(v, saw_name, saw_id);
            }
        }
        Json::Array(xs) => {
            for x in xs {
                mark_call_styles(x, saw_name, saw_id);
            }
        }
        _ => {}
    }
}
