//! Call-style migration: normalize `call` nodes to id-based or name-based
//! references where the mapping is unambiguous.

use crate::edits::walk_exprs_mut;
use crate::uid::add_uids;
use serde_json::{Value as Json, json};
use std::collections::{HashMap, HashSet};

/// Rewrite name-style calls to id-style. Stamps missing ids first so every
/// definition is addressable. Ambiguous names are left untouched.
/// Returns the number of rewritten calls.
pub fn migrate_calls_to_id(program: &mut Vec<Json>) -> usize {
    add_uids(program, true);

    let mut by_name: HashMap<String, String> = HashMap::new();
    let mut dup_names: HashSet<String> = HashSet::new();
    for stmt in program.iter() {
        let Some(def) = stmt.get("def").and_then(Json::as_object) else {
            continue;
        };
        let (Some(name), Some(id)) = (
            def.get("name").and_then(Json::as_str),
            def.get("id").and_then(Json::as_str),
        ) else {
            continue;
        };
        if let Some(existing) = by_name.get(name) {
            if existing != id {
                dup_names.insert(name.to_string());
            }
        } else {
            by_name.insert(name.to_string(), id.to_string());
        }
    }

    let mut changed = 0usize;
    for stmt in program.iter_mut() {
        walk_exprs_mut(stmt, &mut |node| {
            let Some(call) = node.get_mut("call").and_then(Json::as_object_mut) else {
                return;
            };
            if call.contains_key("id") {
                return;
            }
            let Some(name) = call.get("name").and_then(Json::as_str).map(str::to_string) else {
                return;
            };
            if dup_names.contains(&name) {
                return;
            }
            if let Some(id) = by_name.get(&name) {
                call.insert("id".to_string(), json!(id));
                call.remove("name");
                changed += 1;
            }
        });
    }
    changed
}

/// Rewrite id-style calls back to name-style where the id maps to a def.
pub fn migrate_calls_to_name(program: &mut Vec<Json>) -> usize {
    let mut by_id: HashMap<String, String> = HashMap::new();
    for stmt in program.iter() {
        let Some(def) = stmt.get("def").and_then(Json::as_object) else {
            continue;
        };
        if let (Some(id), Some(name)) = (
            def.get("id").and_then(Json::as_str),
            def.get("name").and_then(Json::as_str),
        ) {
            by_id.insert(id.to_string(), name.to_string());
        }
    }

    let mut changed = 0usize;
    for stmt in program.iter_mut() {
        walk_exprs_mut(stmt, &mut |node| {
            let Some(call) = node.get_mut("call").and_then(Json::as_object_mut) else {
                return;
            };
            let Some(id) = call.get("id").and_then(Json::as_str).map(str::to_string) else {
                return;
            };
            if let Some(name) = by_id.get(&id) {
                call.insert("name".to_string(), json!(name));
                call.remove("id");
                changed += 1;
            }
        });
    }
    changed
}
