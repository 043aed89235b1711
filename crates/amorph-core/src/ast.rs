//! Canonical AST helpers: program envelope, structured-node discrimination,
//! and the canonical path grammar (`/$[n]/fn[id]/key/...`).

use regex::Regex;
use serde_json::{Map, Value as Json};
use std::fmt;
use std::sync::OnceLock;

/// Statement discriminators, in canonical order.
pub const STMT_KEYS: [&str; 7] = ["let", "set", "def", "if", "return", "print", "expr"];

/// Accept a raw document in either the bare-sequence or the
/// `{version?, program: [...]}` wrapper form.
pub fn program_statements(doc: &Json) -> Result<&Vec<Json>, String> {
    let body = match doc {
        Json::Object(obj) if obj.contains_key("program") => &obj["program"],
        other => other,
    };
    body.as_array()
        .ok_or_else(|| "program must be a JSON array of statements or a {program:[...]} wrapper".to_string())
}

pub fn program_statements_mut(doc: &mut Json) -> Result<&mut Vec<Json>, String> {
    let is_program_wrapper = matches!(doc, Json::Object(obj) if obj.contains_key("program"));
    let body = if is_program_wrapper {
        match doc {
            Json::Object(obj) => obj.get_mut("program").unwrap(),
            _ => unreachable!(),
        }
    } else {
        doc
    };
    body.as_array_mut()
        .ok_or_else(|| "program must be a JSON array of statements or a {program:[...]} wrapper".to_string())
}

/// The statement discriminator of a node, if it carries one.
pub fn stmt_kind(stmt: &Map<String, Json>) -> Option<&'static str> {
    STMT_KEYS.iter().copied().find(|k| stmt.contains_key(*k))
}

/// An expression node is an operator application when it has exactly one key
/// and that key is neither `var` nor `call`.
pub fn is_op_node(obj: &Map<String, Json>) -> bool {
    obj.len() == 1 && !obj.contains_key("var") && !obj.contains_key("call")
}

/// Operator arguments in normalized list form: a list payload is the operand
/// list, anything else is a single operand.
pub fn op_operands(payload: &Json) -> Vec<&Json> {
    match payload {
        Json::Array(xs) => xs.iter().collect(),
        other => vec![other],
    }
}

/// One segment of a canonical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    /// `$[n]` — index into a statement sequence or operand list.
    Seq(usize),
    /// `fn[id-or-name]` — top-level function definition payload.
    Fn(String),
    /// A field key such as `then`, `body`, `value`.
    Key(String),
}

impl fmt::Display for PathSeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSeg::Seq(i) => write!(f, "$[{i}]"),
            PathSeg::Fn(id) => write!(f, "fn[{id}]"),
            PathSeg::Key(k) => write!(f, "{k}"),
        }
    }
}

/// Render segments as the canonical `/`-separated form.
pub fn path_to_string(segs: &[PathSeg]) -> String {
    let mut out = String::from("/");
    for (i, seg) in segs.iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(&seg.to_string());
    }
    out
}

fn key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"))
}

fn fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^fn\[([A-Za-z0-9_.-]+)\]$").expect("static regex"))
}

fn seq_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\$\[(\d+)\]$").expect("static regex"))
}

/// Parse and grammar-check a canonical path string.
pub fn parse_path(path: &str) -> Result<Vec<PathSeg>, String> {
    if !path.starts_with('/') {
        return Err("path must start with '/'".to_string());
    }
    let mut out = Vec::new();
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        if let Some(caps) = seq_re().captures(seg) {
            let idx = caps[1]
                .parse::<usize>()
                .map_err(|_| format!("invalid index in path segment: {seg}"))?;
            out.push(PathSeg::Seq(idx));
        } else if let Some(caps) = fn_re().captures(seg) {
            out.push(PathSeg::Fn(caps[1].to_string()));
        } else if key_re().is_match(seg) {
            out.push(PathSeg::Key(seg.to_string()));
        } else {
            return Err(format!("invalid path segment: {seg}"));
        }
    }
    if out.is_empty() {
        return Err("empty path".to_string());
    }
    Ok(out)
}

/// Locate the top-level `def` payload addressed by a `fn[...]` segment:
/// id match first, else a unique name match.
fn find_def_payload_index(program: &[Json], key: &str) -> Result<usize, String> {
    let mut by_name: Vec<usize> = Vec::new();
    for (i, stmt) in program.iter().enumerate() {
        let Some(def) = stmt.get("def").and_then(Json::as_object) else {
            continue;
        };
        if def.get("id").and_then(Json::as_str) == Some(key) {
            return Ok(i);
        }
        if def.get("name").and_then(Json::as_str) == Some(key) {
            by_name.push(i);
        }
    }
    match by_name.as_slice() {
        [i] => Ok(*i),
        [] => Err(format!("no function matches fn[{key}]")),
        _ => Err(format!("function name '{key}' is ambiguous; address it by id")),
    }
}

/// Resolve a path to the sequence slot it addresses: the owning sequence and
/// the element index. The final segment must be `$[n]`.
pub fn resolve_seq_slot<'a>(
    program: &'a mut Vec<Json>,
    segs: &[PathSeg],
) -> Result<(&'a mut Vec<Json>, usize), String> {
    match segs {
        [] => Err("empty path".to_string()),
        [PathSeg::Seq(i)] => Ok((program, *i)),
        [PathSeg::Seq(i), rest @ ..] => {
            let len = program.len();
            let node = program
                .get_mut(*i)
                .ok_or_else(|| format!("index {i} out of range (sequence length {len})"))?;
            slot_in(node, rest)
        }
        [PathSeg::Fn(key), rest @ ..] => {
            let idx = find_def_payload_index(program, key)?;
            let def = program[idx]
                .get_mut("def")
                .ok_or_else(|| "def payload missing".to_string())?;
            if rest.is_empty() {
                return Err("path must end with a sequence index like $[n]".to_string());
            }
            slot_in(def, rest)
        }
        [PathSeg::Key(k), ..] => Err(format!("key segment '{k}' is not valid at the program root")),
    }
}

fn slot_in<'a>(node: &'a mut Json, segs: &[PathSeg]) -> Result<(&'a mut Vec<Json>, usize), String> {
    match segs {
        [] => Err("path must end with a sequence index like $[n]".to_string()),
        [PathSeg::Seq(i)] => {
            let arr = node
                .as_array_mut()
                .ok_or_else(|| "expected a sequence at the final path step".to_string())?;
            Ok((arr, *i))
        }
        [PathSeg::Seq(i), rest @ ..] => {
            let arr = node
                .as_array_mut()
                .ok_or_else(|| "expected a sequence at an intermediate path step".to_string())?;
            let len = arr.len();
            let child = arr
                .get_mut(*i)
                .ok_or_else(|| format!("index {i} out of range (sequence length {len})"))?;
            slot_in(child, rest)
        }
        [PathSeg::Key(k)] => Err(format!(
            "path must end with a sequence index like $[n], not key '{k}'"
        )),
        [PathSeg::Key(k), rest @ ..] => {
            let obj = node
                .as_object_mut()
                .ok_or_else(|| format!("expected an object before key '{k}'"))?;
            let child = obj
                .get_mut(k)
                .ok_or_else(|| format!("key missing in path: {k}"))?;
            slot_in(child, rest)
        }
        [PathSeg::Fn(_), ..] => Err("fn[...] segments are only valid at the program root".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_round_trip() {
        let segs = parse_path("/$[1]/def/body/$[0]").unwrap();
        assert_eq!(
            segs,
            vec![
                PathSeg::Seq(1),
                PathSeg::Key("def".into()),
                PathSeg::Key("body".into()),
                PathSeg::Seq(0)
            ]
        );
        assert_eq!(path_to_string(&segs), "/$[1]/def/body/$[0]");
    }

    #[test]
    fn path_grammar_rejections() {
        assert!(parse_path("$[0]").is_err());
        assert!(parse_path("/$[x]").is_err());
        assert!(parse_path("/then?").is_err());
        assert!(parse_path("/").is_err());
    }

    #[test]
    fn fn_segment_resolution() {
        let mut program = vec![
            json!({"let": {"name": "x", "value": 1}}),
            json!({"def": {"name": "f", "id": "fn_f", "params": [], "body": [{"return": 1}]}}),
        ];
        let segs = parse_path("/fn[fn_f]/body/$[0]").unwrap();
        let (seq, idx) = resolve_seq_slot(&mut program, &segs).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(seq[0], json!({"return": 1}));

        let segs = parse_path("/fn[f]/body/$[0]").unwrap();
        assert!(resolve_seq_slot(&mut program, &segs).is_ok());

        let segs = parse_path("/fn[missing]/body/$[0]").unwrap();
        assert!(resolve_seq_slot(&mut program, &segs).is_err());
    }

    #[test]
    fn slot_must_end_in_sequence_index() {
        let mut program = vec![json!({"let": {"name": "x", "value": 1}})];
        let segs = parse_path("/$[0]/let").unwrap();
        assert!(resolve_seq_slot(&mut program, &segs).is_err());
    }
}
