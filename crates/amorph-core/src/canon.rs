//! Canonical serialization: deterministic pretty form and the bijective
//! short-key minifier.

use crate::ast::STMT_KEYS;
use serde_json::{Map, Value as Json};

/// Long-key → short-key table. `minify_keys` and `unminify_keys` are exact
/// inverses over programs that stay off the short tokens.
pub const KEYMAP: [(&str, &str); 17] = [
    ("let", "l"),
    ("set", "s"),
    ("def", "d"),
    ("if", "i"),
    ("then", "t"),
    ("else", "e"),
    ("return", "r"),
    ("print", "p"),
    ("expr", "x"),
    ("var", "v"),
    ("call", "c"),
    ("name", "n"),
    ("value", "val"),
    ("params", "pa"),
    ("body", "b"),
    ("cond", "co"),
    ("id", "id"),
];

/// Deterministic pretty form: two-space indent, LF, `id` first, then the
/// discriminator, then remaining keys in lexicographic order. Idempotent:
/// canonicalizing a canonical document reproduces it byte for byte.
pub fn canonicalize(value: &Json) -> String {
    let mut out = String::new();
    write_value(value, 0, &mut out);
    out
}

fn write_value(value: &Json, indent: usize, out: &mut String) {
    match value {
        Json::Array(xs) => {
            if xs.is_empty() {
                out.push_str("[]");
                return;
            }
            out.push_str("[\n");
            for (i, x) in xs.iter().enumerate() {
                push_indent(indent + 1, out);
                write_value(x, indent + 1, out);
                if i + 1 < xs.len() {
                    out.push(',');
                }
                out.push('\n');
            }
            push_indent(indent, out);
            out.push(']');
        }
        Json::Object(obj) => {
            if obj.is_empty() {
                out.push_str("{}");
                return;
            }
            out.push_str("{\n");
            let keys = ordered_keys(obj);
            for (i, k) in keys.iter().enumerate() {
                push_indent(indent + 1, out);
                out.push_str(&Json::String((*k).to_string()).to_string());
                out.push_str(": ");
                write_value(&obj[*k], indent + 1, out);
                if i + 1 < keys.len() {
                    out.push(',');
                }
                out.push('\n');
            }
            push_indent(indent, out);
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn push_indent(indent: usize, out: &mut String) {
    for _ in 0..indent {
        out.push_str("  ");
    }
}

/// Structured nodes order `id`, then the discriminator, then the rest
/// lexicographically. Every other object sorts purely lexicographically,
/// so an `id` inside a payload (e.g. a def's own id) gets no special rank.
fn ordered_keys(obj: &Map<String, Json>) -> Vec<&str> {
    let discriminator = discriminator_key(obj);
    let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
    keys.sort_by_key(|k| {
        let rank = if discriminator.is_none() {
            2
        } else if *k == "id" {
            0
        } else if Some(*k) == discriminator {
            1
        } else {
            2
        };
        (rank, *k)
    });
    keys
}

fn discriminator_key(obj: &Map<String, Json>) -> Option<&str> {
    let non_id: Vec<&str> = obj.keys().map(String::as_str).filter(|k| *k != "id").collect();
    if non_id.len() == 1 {
        return Some(non_id[0]);
    }
    STMT_KEYS
        .iter()
        .copied()
        .chain(["var", "call"])
        .find(|k| obj.contains_key(*k))
}

/// Rewrite keys through the keymap, recursively.
fn transform_keys(value: &Json, map: impl Fn(&str) -> String + Copy) -> Json {
    match value {
        Json::Object(obj) => {
            let mut out = Map::new();
            for (k, v) in obj {
                out.insert(map(k), transform_keys(v, map));
            }
            Json::Object(out)
        }
        Json::Array(xs) => Json::Array(xs.iter().map(|x| transform_keys(x, map)).collect()),
        scalar => scalar.clone(),
    }
}

pub fn minify_keys(value: &Json) -> Json {
    transform_keys(value, |k| {
        KEYMAP
            .iter()
            .find(|(long, _)| *long == k)
            .map(|(_, short)| (*short).to_string())
            .unwrap_or_else(|| k.to_string())
    })
}

pub fn unminify_keys(value: &Json) -> Json {
    transform_keys(value, |k| {
        KEYMAP
            .iter()
            .find(|(_, short)| *short == k)
            .map(|(long, _)| (*long).to_string())
            .unwrap_or_else(|| k.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn canonical_key_order() {
        let doc = json!([{"let": {"value": 1, "name": "x"}, "id": "s0"}]);
        let text = canonicalize(&doc);
        assert_eq!(
            text,
            "[\n  {\n    \"id\": \"s0\",\n    \"let\": {\n      \"name\": \"x\",\n      \"value\": 1\n    }\n  }\n]"
        );
    }

    #[test]
    fn def_payload_keys_stay_lexicographic() {
        // the payload is not a structured node, so its id gets no
        // special rank: body < id < name < params
        let doc = json!([{"def": {"name": "f", "id": "fn_f", "params": [], "body": []}}]);
        let text = canonicalize(&doc);
        assert_eq!(
            text,
            "[\n  {\n    \"def\": {\n      \"body\": [],\n      \"id\": \"fn_f\",\n      \"name\": \"f\",\n      \"params\": []\n    }\n  }\n]"
        );
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let doc = json!([
            {"id": "a", "def": {"name": "f", "params": ["x"], "body": [
                {"return": {"mul": [{"var": "x"}, 2]}}
            ]}},
            {"print": [{"call": {"name": "f", "args": [3]}}]}
        ]);
        let once = canonicalize(&doc);
        let reparsed: Json = serde_json::from_str(&once).unwrap();
        assert_eq!(canonicalize(&reparsed), once);
    }

    #[test]
    fn minify_round_trips() {
        let doc = json!([
            {"id": "s0", "let": {"name": "x", "value": {"add": [1, 2]}}},
            {"def": {"name": "f", "id": "fn_f", "params": ["n"], "body": [
                {"if": {"cond": {"le": [{"var": "n"}, 1]},
                        "then": [{"return": 1}],
                        "else": [{"return": {"var": "n"}}]}}
            ]}},
            {"print": [{"call": {"id": "fn_f", "args": [5]}}]}
        ]);
        let min = minify_keys(&doc);
        assert_eq!(unminify_keys(&min), doc);
        assert_eq!(min[0]["l"]["n"], "x");
        assert_eq!(min[1]["d"]["b"][0]["i"]["co"]["le"][0]["v"], "n");

        // and the inverse direction is bijective too
        assert_eq!(minify_keys(&unminify_keys(&min)), min);
    }

    #[test]
    fn minified_form_is_smaller() {
        let doc = json!([
            {"let": {"name": "total", "value": 0}},
            {"def": {"name": "main", "params": [], "body": [
                {"set": {"name": "total", "value": {"add": [{"var": "total"}, 1]}}},
                {"return": {"var": "total"}}
            ]}}
        ]);
        let canon = canonicalize(&doc);
        let min = minify_keys(&doc).to_string();
        assert!(min.len() < canon.len());
    }

    #[test]
    fn empty_containers() {
        assert_eq!(canonicalize(&json!([])), "[]");
        assert_eq!(canonicalize(&json!({})), "{}");
        assert_eq!(canonicalize(&json!({"a": [], "b": {}})), "{\n  \"a\": [],\n  \"b\": {}\n}");
    }
}
