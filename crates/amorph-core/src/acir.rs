//! ACIR: the compact binary packing.
//!
//! Layout: magic `ACIR` + one version byte + a CBOR document
//! `{v: <version>, s: <string table>, p: <program>}` where every string in
//! `p` (object keys and string values, ids included) is CBOR tag 25
//! (stringref) wrapped around its index into `s`. The JSON fallback carries
//! the same envelope with an empty table and plain strings.

use ciborium::value::{Integer, Value as Cbor};
use serde_json::{Map, Number, Value as Json};
use std::collections::BTreeSet;

pub const MAGIC: &[u8; 4] = b"ACIR";
pub const VERSION: u8 = 1;

/// CBOR tag 25: reference into the string table.
const TAG_STRINGREF: u64 = 25;

/// Output format selector for `pack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackFormat {
    Cbor,
    Json,
}

fn unwrap_program(doc: &Json) -> Result<&Vec<Json>, String> {
    crate::ast::program_statements(doc)
}

fn collect_strings(node: &Json, acc: &mut BTreeSet<String>) {
    match node {
        Json::String(s) => {
            acc.insert(s.clone());
        }
        Json::Array(xs) => {
            for x in xs {
                collect_strings(x, acc);
            }
        }
        Json::Object(obj) => {
            for (k, v) in obj {
                acc.insert(k.clone());
                collect_strings(v, acc);
            }
        }
        _ => {}
    }
}

fn intern(s: &str, table: &[String]) -> Result<Cbor, String> {
    let idx = table
        .binary_search_by(|probe| probe.as_str().cmp(s))
        .map_err(|_| format!("string missing from intern table: {s}"))?;
    Ok(Cbor::Tag(
        TAG_STRINGREF,
        Box::new(Cbor::Integer(Integer::from(idx as u64))),
    ))
}

fn encode(node: &Json, table: &[String]) -> Result<Cbor, String> {
    match node {
        Json::Null => Ok(Cbor::Null),
        Json::Bool(b) => Ok(Cbor::Bool(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Cbor::Integer(Integer::from(i)))
            } else if let Some(f) = n.as_f64() {
                Ok(Cbor::Float(f))
            } else {
                Err("unrepresentable number".to_string())
            }
        }
        Json::String(s) => intern(s, table),
        Json::Array(xs) => {
            let mut out = Vec::with_capacity(xs.len());
            for x in xs {
                out.push(encode(x, table)?);
            }
            Ok(Cbor::Array(out))
        }
        Json::Object(obj) => {
            let mut out = Vec::with_capacity(obj.len());
            for (k, v) in obj {
                out.push((intern(k, table)?, encode(v, table)?));
            }
            Ok(Cbor::Map(out))
        }
    }
}

fn decode(node: &Cbor, table: &[String]) -> Result<Json, String> {
    match node {
        Cbor::Null => Ok(Json::Null),
        Cbor::Bool(b) => Ok(Json::Bool(*b)),
        Cbor::Integer(i) => {
            let i: i64 = (*i)
                .try_into()
                .map_err(|_| "integer out of range".to_string())?;
            Ok(Json::Number(Number::from(i)))
        }
        Cbor::Float(f) => Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| "non-finite float".to_string()),
        Cbor::Tag(TAG_STRINGREF, inner) => {
            let Cbor::Integer(idx) = inner.as_ref() else {
                return Err("stringref must wrap an index".to_string());
            };
            let idx: u64 = (*idx)
                .try_into()
                .map_err(|_| "stringref index out of range".to_string())?;
            table
                .get(idx as usize)
                .map(|s| Json::String(s.clone()))
                .ok_or_else(|| format!("stringref index {idx} outside table"))
        }
        Cbor::Text(s) => Ok(Json::String(s.clone())),
        Cbor::Array(xs) => {
            let mut out = Vec::with_capacity(xs.len());
            for x in xs {
                out.push(decode(x, table)?);
            }
            Ok(Json::Array(out))
        }
        Cbor::Map(entries) => {
            let mut out = Map::new();
            for (k, v) in entries {
                let Json::String(key) = decode(k, table)? else {
                    return Err("object key must decode to a string".to_string());
                };
                out.insert(key, decode(v, table)?);
            }
            Ok(Json::Object(out))
        }
        other => Err(format!("unsupported CBOR node: {other:?}")),
    }
}

/// Pack a program document into ACIR bytes.
pub fn pack(doc: &Json, format: PackFormat) -> Result<Vec<u8>, String> {
    let program = unwrap_program(doc)?;
    match format {
        PackFormat::Cbor => {
            let mut strings = BTreeSet::new();
            for stmt in program {
                collect_strings(stmt, &mut strings);
            }
            let table: Vec<String> = strings.into_iter().collect();

            let mut encoded = Vec::with_capacity(program.len());
            for stmt in program {
                encoded.push(encode(stmt, &table)?);
            }
            let doc = Cbor::Map(vec![
                (
                    Cbor::Text("v".to_string()),
                    Cbor::Integer(Integer::from(VERSION)),
                ),
                (
                    Cbor::Text("s".to_string()),
                    Cbor::Array(table.into_iter().map(Cbor::Text).collect()),
                ),
                (Cbor::Text("p".to_string()), Cbor::Array(encoded)),
            ]);

            let mut buf = Vec::new();
            buf.extend_from_slice(MAGIC);
            buf.push(VERSION);
            ciborium::ser::into_writer(&doc, &mut buf).map_err(|e| e.to_string())?;
            Ok(buf)
        }
        PackFormat::Json => {
            let doc = serde_json::json!({
                "v": VERSION,
                "s": [],
                "p": program,
            });
            Ok(doc.to_string().into_bytes())
        }
    }
}

/// Unpack ACIR bytes (either format) back into the canonical program array.
pub fn unpack(buf: &[u8]) -> Result<Json, String> {
    if buf.starts_with(MAGIC) {
        if buf.len() < 5 {
            return Err("truncated ACIR header".to_string());
        }
        let version = buf[4];
        if version != VERSION {
            return Err(format!("unsupported ACIR version: {version}"));
        }
        let doc: Cbor =
            ciborium::de::from_reader(&buf[5..]).map_err(|e| format!("bad ACIR body: {e}"))?;
        let Cbor::Map(entries) = doc else {
            return Err("ACIR body must be a map".to_string());
        };
        let mut table: Vec<String> = Vec::new();
        let mut program: Option<Cbor> = None;
        for (k, v) in entries {
            match k {
                Cbor::Text(ref key) if key == "s" => {
                    let Cbor::Array(items) = v else {
                        return Err("string table must be an array".to_string());
                    };
                    for item in items {
                        let Cbor::Text(s) = item else {
                            return Err("string table entries must be text".to_string());
                        };
                        table.push(s);
                    }
                }
                Cbor::Text(ref key) if key == "p" => program = Some(v),
                _ => {}
            }
        }
        let program = program.ok_or_else(|| "ACIR body missing program".to_string())?;
        decode(&program, &table)
    } else {
        let doc: Json =
            serde_json::from_slice(buf).map_err(|e| format!("bad ACIR JSON fallback: {e}"))?;
        doc.get("p")
            .cloned()
            .ok_or_else(|| "ACIR JSON fallback missing program".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> Json {
        json!([
            {"id": "s0", "let": {"name": "x", "value": {"add": [1, 2.5]}}},
            {"def": {"name": "fact", "id": "fn_fact", "params": ["n"], "body": [
                {"if": {"cond": {"le": [{"var": "n"}, 1]},
                        "then": [{"return": 1}],
                        "else": [{"return": {"mul": [{"var": "n"},
                            {"call": {"id": "fn_fact", "args": [{"sub": [{"var": "n"}, 1]}]}}]}}]}}
            ]}},
            {"print": [{"call": {"id": "fn_fact", "args": [5]}}, null, true]}
        ])
    }

    #[test]
    fn cbor_round_trip_preserves_ids() {
        let doc = sample();
        let bytes = pack(&doc, PackFormat::Cbor).unwrap();
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(bytes[4], VERSION);
        let back = unpack(&bytes).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn json_fallback_round_trip() {
        let doc = sample();
        let bytes = pack(&doc, PackFormat::Json).unwrap();
        let back = unpack(&bytes).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn wrapper_form_packs_the_program() {
        let doc = json!({"version": "0.1", "program": [{"print": [1]}]});
        let bytes = pack(&doc, PackFormat::Cbor).unwrap();
        assert_eq!(unpack(&bytes).unwrap(), json!([{"print": [1]}]));
    }

    #[test]
    fn packing_is_deterministic() {
        let doc = sample();
        assert_eq!(
            pack(&doc, PackFormat::Cbor).unwrap(),
            pack(&doc, PackFormat::Cbor).unwrap()
        );
    }

    #[test]
    fn repeated_strings_are_interned_once() {
        let doc = json!([
            {"print": ["repeated_literal", "repeated_literal", "repeated_literal"]}
        ]);
        let bytes = pack(&doc, PackFormat::Cbor).unwrap();
        let needle = b"repeated_literal";
        let hits = bytes
            .windows(needle.len())
            .filter(|w| w == needle)
            .count();
        assert_eq!(hits, 1);
    }

    #[test]
    fn bad_inputs_are_rejected() {
        assert!(unpack(b"ACIR").is_err());
        assert!(unpack(b"ACIR\x02rest").is_err());
        assert!(unpack(b"{\"v\":1}").is_err());
        assert!(pack(&json!("not a program"), PackFormat::Cbor).is_err());
    }
}
