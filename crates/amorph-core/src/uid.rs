//! Uid stamping for statements and function definitions.
//!
//! Ids derive from a sha-256 digest of the statement's canonical bytes plus
//! its path, so stamping the same program always yields the same ids.

use serde_json::Value as Json;
use sha2::{Digest, Sha256};

/// `<prefix>_<hex8>` digest id for a statement at a given path.
pub fn gen_uid(prefix: &str, stmt: &Json, path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update(stmt.to_string().as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
    format!("{prefix}_{hex}")
}

/// Stamp missing `id` fields on statements and function defs.
/// With `deep`, recurse into function bodies and `if` branches.
/// Returns the number of ids added.
pub fn add_uids(program: &mut [Json], deep: bool) -> usize {
    add_in_block(program, "", deep)
}

fn add_in_block(block: &mut [Json], base: &str, deep: bool) -> usize {
    let mut added = 0;
    for (i, stmt) in block.iter_mut().enumerate() {
        let path = format!("{base}/$[{i}]");
        let Some(obj) = stmt.as_object() else {
            continue;
        };
        if !obj.contains_key("id") {
            let id = gen_uid("amr", stmt, &path);
            if let Some(obj) = stmt.as_object_mut() {
                obj.insert("id".to_string(), Json::String(id));
                added += 1;
            }
        }
        let Some(obj) = stmt.as_object_mut() else {
            continue;
        };
        if let Some(def) = obj.get_mut("def") {
            if let Some(spec) = def.as_object_mut() {
                if !spec.contains_key("id") {
                    let seed = Json::Object(spec.clone());
                    let id = gen_uid("fn", &seed, &format!("{path}/def"));
                    spec.insert("id".to_string(), Json::String(id));
                    added += 1;
                }
                if deep {
                    if let Some(body) = spec.get_mut("body").and_then(Json::as_array_mut) {
                        added += add_in_block(body, &format!("{path}/def/body"), deep);
                    }
                }
            }
        }
        if deep {
            if let Some(spec) = obj.get_mut("if").and_then(Json::as_object_mut) {
                for branch_key in ["then", "else"] {
                    if let Some(block) = spec.get_mut(branch_key).and_then(Json::as_array_mut) {
                        added += add_in_block(block, &format!("{path}/if/{branch_key}"), deep);
                    }
                }
            }
        }
    }
    added
}

/// Index of the top-level statement carrying `id`.
pub fn find_stmt_by_id(program: &[Json], id: &str) -> Option<usize> {
    program
        .iter()
        .position(|stmt| stmt.get("id").and_then(Json::as_str) == Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stamping_is_deterministic() {
        let mut a = json!([{"let": {"name": "x", "value": 1}}]);
        let mut b = a.clone();
        add_uids(a.as_array_mut().unwrap(), false);
        add_uids(b.as_array_mut().unwrap(), false);
        assert_eq!(a, b);
        assert!(a[0]["id"].as_str().unwrap().starts_with("amr_"));
    }

    #[test]
    fn identical_statements_get_distinct_ids() {
        let mut doc = json!([
            {"print": [1]},
            {"print": [1]}
        ]);
        add_uids(doc.as_array_mut().unwrap(), false);
        assert_ne!(doc[0]["id"], doc[1]["id"]);
    }

    #[test]
    fn deep_stamps_bodies_and_branches() {
        let mut doc = json!([
            {"def": {"name": "f", "params": [], "body": [{"return": 1}]}},
            {"if": {"cond": true, "then": [{"print": [1]}]}}
        ]);
        let added = add_uids(doc.as_array_mut().unwrap(), true);
        // 2 statements + def id + body stmt + branch stmt
        assert_eq!(added, 5);
        assert!(doc[0]["def"]["id"].as_str().unwrap().starts_with("fn_"));
        assert!(doc[0]["def"]["body"][0]["id"].is_string());
        assert!(doc[1]["if"]["then"][0]["id"].is_string());
    }

    #[test]
    fn existing_ids_are_preserved() {
        let mut doc = json!([{"id": "keep_me", "print": [1]}]);
        let added = add_uids(doc.as_array_mut().unwrap(), true);
        assert_eq!(added, 0);
        assert_eq!(doc[0]["id"], "keep_me");
    }

    #[test]
    fn lookup_by_id() {
        let mut doc = json!([
            {"id": "a", "print": [1]},
            {"id": "b", "print": [2]}
        ]);
        let program = doc.as_array_mut().unwrap();
        assert_eq!(find_stmt_by_id(program, "b"), Some(1));
        assert_eq!(find_stmt_by_id(program, "zzz"), None);
    }
}
