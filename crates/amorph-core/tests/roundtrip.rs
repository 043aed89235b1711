//! Round-trip laws and determinism properties over a pool of representative
//! programs.

use amorph_core::vm::VmConfig;
use amorph_core::{
    PackFormat, ScriptedBackend, Vm, apply_edits, apply_rewrite, canonicalize, minify_keys, pack,
    unminify_keys, unpack,
};
use pretty_assertions::assert_eq;
use serde_json::{Value as Json, json};

fn program_pool() -> Vec<Json> {
    vec![
        json!([]),
        json!([{"let": {"name": "x", "value": 1}}]),
        json!([
            {"id": "s0", "let": {"name": "x", "value": {"add": [1, 2.5]}}},
            {"id": "s1", "if": {"cond": {"gt": [{"var": "x"}, 0]},
                "then": [{"print": ["positive"]}],
                "else": [{"print": ["negative", {"var": "x"}]}]}}
        ]),
        json!([
            {"def": {"name": "fact", "id": "fn_fact", "params": ["n"], "body": [
                {"if": {"cond": {"le": [{"var": "n"}, 1]},
                        "then": [{"return": 1}],
                        "else": [{"return": {"mul": [{"var": "n"},
                            {"call": {"id": "fn_fact", "args": [{"sub": [{"var": "n"}, 1]}]}}]}}]}}
            ]}},
            {"print": [{"call": {"id": "fn_fact", "args": [5]}}]}
        ]),
        json!([
            {"let": {"name": "xs", "value": {"list": [1, 2, 3]}}},
            {"print": [{"spread": {"var": "xs"}}, {"len": [{"var": "xs"}]},
                       {"concat": [["a"], ["b"]]}, null, true, {"range": [3, 1]}]}
        ]),
    ]
}

#[test]
fn canonicalize_is_idempotent_across_pool() {
    for program in program_pool() {
        let once = canonicalize(&program);
        let reparsed: Json = serde_json::from_str(&once).unwrap();
        assert_eq!(canonicalize(&reparsed), once);
    }
}

#[test]
fn canonical_def_payload_keys_are_lexicographic() {
    // the factorial program's def payload carries its own id next to
    // name/params/body; it is not a structured node, so the canonical
    // form keeps pure lexicographic order there: body, id, name, params
    let program = &program_pool()[3];
    let text = canonicalize(program);
    assert!(
        text.contains(
            "      ],\n      \"id\": \"fn_fact\",\n      \"name\": \"fact\",\n      \"params\": ["
        ),
        "def payload lost its lexicographic key order:\n{text}"
    );
    let reparsed: Json = serde_json::from_str(&text).unwrap();
    assert_eq!(&reparsed, program);
}

#[test]
fn minify_is_bijective_across_pool() {
    for program in program_pool() {
        let minified = minify_keys(&program);
        assert_eq!(unminify_keys(&minified), program);
        assert_eq!(minify_keys(&unminify_keys(&minified)), minified);
    }
}

#[test]
fn pack_is_lossless_across_pool() {
    for program in program_pool() {
        for format in [PackFormat::Cbor, PackFormat::Json] {
            let bytes = pack(&program, format).unwrap();
            assert_eq!(unpack(&bytes).unwrap(), program, "format {format:?}");
        }
    }
}

#[test]
fn execution_is_deterministic_with_scripted_stdin() {
    let program = json!([
        {"let": {"name": "who", "value": {"input": ["name? "]}}},
        {"def": {"name": "greet", "id": "fn_greet", "params": ["name"], "body": [
            {"return": {"add": ["hello ", {"var": "name"}]}}
        ]}},
        {"print": [{"call": {"id": "fn_greet", "args": [{"var": "who"}]}}]}
    ]);
    let cfg = VmConfig {
        trace_json: true,
        ..VmConfig::default()
    };

    let mut io1 = ScriptedBackend::new(["world"]);
    Vm::new(&mut io1, cfg.clone()).run(&program).unwrap();
    let mut io2 = ScriptedBackend::new(["world"]);
    Vm::new(&mut io2, cfg).run(&program).unwrap();

    assert_eq!(io1.outputs, vec!["hello world"]);
    assert_eq!(io1.outputs, io2.outputs);
    assert_eq!(io1.trace, io2.trace);
}

#[test]
fn trace_events_carry_the_ndjson_shape() {
    let program = json!([
        {"def": {"name": "f", "id": "fn_f", "params": [], "body": [{"return": 1}]}},
        {"print": [{"call": {"id": "fn_f", "args": []}}]}
    ]);
    let cfg = VmConfig {
        trace_json: true,
        ..VmConfig::default()
    };
    let mut io = ScriptedBackend::new(Vec::<String>::new());
    Vm::new(&mut io, cfg).run(&program).unwrap();

    let mut kinds = Vec::new();
    for line in &io.trace {
        let event: Json = serde_json::from_str(line).expect("one JSON event per line");
        assert!(event["ts"].is_number());
        assert!(event["call_id"].is_number());
        assert!(event["path"].as_str().unwrap().starts_with('/'));
        kinds.push(event["kind"].as_str().unwrap().to_string());
    }
    assert!(kinds.contains(&"enter".to_string()));
    assert!(kinds.contains(&"exit".to_string()));
    assert!(kinds.contains(&"eval".to_string()));
    assert!(kinds.contains(&"effect".to_string()));
}

#[test]
fn edit_batches_are_atomic() {
    let mut program = json!([
        {"id": "s0", "let": {"name": "x", "value": 1}},
        {"id": "s1", "print": [{"var": "x"}]}
    ])
    .as_array()
    .unwrap()
    .clone();
    let before = program.clone();

    let edits = [
        json!({"op": "add_function", "name": "f", "params": [], "body": []}),
        json!({"op": "rename_variable", "old_name": "x", "new_name": "y", "scope": "all"}),
        json!({"op": "delete_node", "path": "/$[0]/let"}),
    ];
    let err = apply_edits(&mut program, &edits).unwrap_err();
    assert_eq!(err.code, "E_BAD_PATH");
    assert_eq!(program, before);
}

#[test]
fn rewrite_respects_the_fuel_limit() {
    // grows without bound unless the fuel limit stops it
    let rules = [json!({"match": {"grow": "$x"}, "replace": {"grow": ["$x"]}})];
    let mut program = json!([{"expr": {"grow": 0}}]).as_array().unwrap().clone();
    let report = apply_rewrite(&mut program, &rules, Some(10));
    assert_eq!(report.replacements, 10);
}

#[test]
fn packed_ids_survive_the_codec() {
    let program = json!([
        {"id": "stmt_a", "let": {"name": "x", "value": 1}},
        {"def": {"name": "f", "id": "fn_f", "params": [], "body": [
            {"id": "inner", "return": {"var": "x"}}
        ]}}
    ]);
    let bytes = pack(&program, PackFormat::Cbor).unwrap();
    let back = unpack(&bytes).unwrap();
    assert_eq!(back[0]["id"], "stmt_a");
    assert_eq!(back[1]["def"]["id"], "fn_f");
    assert_eq!(back[1]["def"]["body"][0]["id"], "inner");
}
