//! Command-line front-end for Amorph.
//!
//! Thin shell over `amorph-core`: argument parsing, file I/O, and exit-code
//! mapping. Exit codes: 0 success, 1 static or runtime error, 2 usage or
//! I/O error.

use amorph_core::diag::ValidationReport;
use amorph_core::vm::VmConfig;
use amorph_core::{
    PackFormat, QuietBackend, StdBackend, Value, add_uids, apply_edits, apply_rewrite,
    canonicalize, migrate_calls_to_id, migrate_calls_to_name, minify_keys, pack,
    suggest_improvements, unminify_keys, unpack, validate_all,
};
use serde_json::{Value as Json, json};
use std::fs;
use std::path::PathBuf;

const EXIT_OK: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

#[derive(Debug, Clone)]
enum Command {
    Run {
        path: PathBuf,
        cfg: VmConfig,
        quiet: bool,
    },
    Validate {
        path: PathBuf,
        json: bool,
        check_types: bool,
        check_scopes: bool,
    },
    Fmt {
        path: PathBuf,
        in_place: bool,
    },
    Minify {
        input: PathBuf,
        output: PathBuf,
    },
    Unminify {
        input: PathBuf,
        output: PathBuf,
    },
    Pack {
        input: PathBuf,
        output: PathBuf,
        format: PackFormat,
    },
    Unpack {
        input: PathBuf,
        output: PathBuf,
    },
    Edit {
        program: PathBuf,
        edits: PathBuf,
        dry_run: bool,
        json_errors: bool,
    },
    Rewrite {
        program: PathBuf,
        rules: PathBuf,
        dry_run: bool,
        limit: Option<usize>,
    },
    AddUid {
        path: PathBuf,
        in_place: bool,
        deep: bool,
    },
    MigrateCalls {
        program: PathBuf,
        to_id: bool,
        dry_run: bool,
    },
    Suggest {
        path: PathBuf,
        json: bool,
    },
}

pub fn run_from_args(args: Vec<String>) -> i32 {
    let command = match parse_command(args) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return EXIT_USAGE;
        }
    };
    match dispatch(command) {
        Ok(code) => code,
        Err(msg) => {
            eprintln!("Error: {msg}");
            EXIT_USAGE
        }
    }
}

fn help_text() -> String {
    [
        "amorph - structured-AST language tooling",
        "",
        "Usage: amorph <command> [options]",
        "",
        "Commands:",
        "  run <file>            Execute a program",
        "                        [--trace] [--trace-json] [--quiet] [--deny-input] [--deny-print] [--rich-errors]",
        "  validate <file>       Validate a program [--json] [--check-types] [--check-scopes]",
        "  fmt <file>            Canonicalize [-i]",
        "  minify <in> -o <out>  Short-key form",
        "  unminify <in> -o <out> Restore canonical keys",
        "  pack <in> -o <out>    Binary ACIR [--format cbor|json]",
        "  unpack <in> -o <out>  ACIR back to canonical JSON",
        "  edit <prog> <edits>   Apply declarative edits [--dry-run] [--json-errors]",
        "  rewrite <prog> <rules> Apply pattern rules [--dry-run] [--limit N]",
        "  add-uid <file>        Stamp missing ids [-i] [--deep]",
        "  migrate-calls <file>  Normalize call style [--to id|name] [--dry-run]",
        "  suggest <file>        Improvement suggestions [--json]",
    ]
    .join("\n")
}

fn parse_command(args: Vec<String>) -> Result<Command, String> {
    if args.is_empty() {
        return Err(help_text());
    }
    let cmd = args[0].as_str();
    match cmd {
        "run" => parse_run(&args[1..]),
        "validate" => parse_validate(&args[1..]),
        "fmt" => {
            let (positional, flags) = split_args(&args[1..], &[])?;
            let path = one_positional(positional, "fmt requires FILE")?;
            Ok(Command::Fmt {
                path,
                in_place: flags.contains(&"-i".to_string()) || flags.contains(&"--in-place".to_string()),
            })
        }
        "minify" | "unminify" => {
            let (input, output) = parse_in_out(&args[1..], cmd)?;
            if cmd == "minify" {
                Ok(Command::Minify { input, output })
            } else {
                Ok(Command::Unminify { input, output })
            }
        }
        "pack" => {
            let mut format = PackFormat::Cbor;
            let mut rest: Vec<String> = Vec::new();
            let mut i = 0usize;
            while i < args[1..].len() {
                let token = &args[1..][i];
                if token == "--format" {
                    i += 1;
                    let value = args[1..]
                        .get(i)
                        .ok_or_else(|| "--format requires a value".to_string())?;
                    format = match value.as_str() {
                        "cbor" => PackFormat::Cbor,
                        "json" => PackFormat::Json,
                        other => return Err(format!("unknown pack format: {other}")),
                    };
                } else {
                    rest.push(token.clone());
                }
                i += 1;
            }
            let (input, output) = parse_in_out(&rest, "pack")?;
            Ok(Command::Pack {
                input,
                output,
                format,
            })
        }
        "unpack" => {
            let filtered: Vec<String> = args[1..]
                .iter()
                .filter(|a| !a.starts_with("--format"))
                .filter(|a| *a != "cbor" && *a != "json")
                .cloned()
                .collect();
            let (input, output) = parse_in_out(&filtered, "unpack")?;
            Ok(Command::Unpack { input, output })
        }
        "edit" => {
            let (positional, flags) =
                split_args(&args[1..], &["--dry-run", "--json-errors"])?;
            let [program, edits] = two_positionals(positional, "edit requires PROGRAM and EDITS")?;
            Ok(Command::Edit {
                program,
                edits,
                dry_run: flags.contains(&"--dry-run".to_string()),
                json_errors: flags.contains(&"--json-errors".to_string()),
            })
        }
        "rewrite" => parse_rewrite(&args[1..]),
        "add-uid" => {
            let (positional, flags) = split_args(&args[1..], &["--deep"])?;
            let path = one_positional(positional, "add-uid requires FILE")?;
            Ok(Command::AddUid {
                path,
                in_place: flags.contains(&"-i".to_string()) || flags.contains(&"--in-place".to_string()),
                deep: flags.contains(&"--deep".to_string()),
            })
        }
        "migrate-calls" => parse_migrate(&args[1..]),
        "suggest" => {
            let (positional, flags) = split_args(&args[1..], &["--json"])?;
            let path = one_positional(positional, "suggest requires FILE")?;
            Ok(Command::Suggest {
                path,
                json: flags.contains(&"--json".to_string()),
            })
        }
        "help" | "--help" | "-h" => Err(help_text()),
        other => Err(format!("unknown command: {other}\n\n{}", help_text())),
    }
}

fn parse_run(args: &[String]) -> Result<Command, String> {
    let mut path: Option<PathBuf> = None;
    let mut cfg = VmConfig::default();
    let mut quiet = false;
    for token in args {
        match token.as_str() {
            "--trace" => cfg.trace = true,
            "--trace-json" => cfg.trace_json = true,
            "--quiet" => quiet = true,
            "--deny-input" => cfg.allow_input = false,
            "--deny-print" => cfg.allow_print = false,
            "--rich-errors" => cfg.rich_errors = true,
            x if x.starts_with("--") => return Err(format!("unknown flag: {x}")),
            _ => {
                if path.is_some() {
                    return Err("only one FILE positional argument is allowed".to_string());
                }
                path = Some(PathBuf::from(token));
            }
        }
    }
    let path = path.ok_or_else(|| "run requires FILE".to_string())?;
    Ok(Command::Run { path, cfg, quiet })
}

fn parse_validate(args: &[String]) -> Result<Command, String> {
    let (positional, flags) =
        split_args(args, &["--json", "--check-types", "--check-scopes"])?;
    let path = one_positional(positional, "validate requires FILE")?;
    Ok(Command::Validate {
        path,
        json: flags.contains(&"--json".to_string()),
        check_types: flags.contains(&"--check-types".to_string()),
        check_scopes: flags.contains(&"--check-scopes".to_string()),
    })
}

fn parse_rewrite(args: &[String]) -> Result<Command, String> {
    let mut positional: Vec<PathBuf> = Vec::new();
    let mut dry_run = false;
    let mut limit: Option<usize> = None;
    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--dry-run" => dry_run = true,
            "--limit" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| "--limit requires a value".to_string())?;
                limit = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| format!("invalid limit: {value}"))?,
                );
            }
            x if x.starts_with("--") => return Err(format!("unknown flag: {x}")),
            other => positional.push(PathBuf::from(other)),
        }
        i += 1;
    }
    let [program, rules] = two_positionals(positional, "rewrite requires PROGRAM and RULES")?;
    Ok(Command::Rewrite {
        program,
        rules,
        dry_run,
        limit,
    })
}

fn parse_migrate(args: &[String]) -> Result<Command, String> {
    let mut positional: Vec<PathBuf> = Vec::new();
    let mut to_id = true;
    let mut dry_run = false;
    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--dry-run" => dry_run = true,
            "--to" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| "--to requires id or name".to_string())?;
                to_id = match value.as_str() {
                    "id" => true,
                    "name" => false,
                    other => return Err(format!("unknown call style: {other}")),
                };
            }
            x if x.starts_with("--") => return Err(format!("unknown flag: {x}")),
            other => positional.push(PathBuf::from(other)),
        }
        i += 1;
    }
    let program = one_positional(positional, "migrate-calls requires FILE")?;
    Ok(Command::MigrateCalls {
        program,
        to_id,
        dry_run,
    })
}

fn split_args(args: &[String], known_flags: &[&str]) -> Result<(Vec<PathBuf>, Vec<String>), String> {
    let mut positional = Vec::new();
    let mut flags = Vec::new();
    for token in args {
        if token.starts_with('-') {
            let known = known_flags.contains(&token.as_str())
                || matches!(token.as_str(), "-i" | "--in-place");
            if !known {
                return Err(format!("unknown flag: {token}"));
            }
            flags.push(token.clone());
        } else {
            positional.push(PathBuf::from(token));
        }
    }
    Ok((positional, flags))
}

fn one_positional(mut positional: Vec<PathBuf>, msg: &str) -> Result<PathBuf, String> {
    if positional.len() != 1 {
        return Err(msg.to_string());
    }
    Ok(positional.remove(0))
}

fn two_positionals(positional: Vec<PathBuf>, msg: &str) -> Result<[PathBuf; 2], String> {
    <[PathBuf; 2]>::try_from(positional).map_err(|_| msg.to_string())
}

fn parse_in_out(args: &[String], cmd: &str) -> Result<(PathBuf, PathBuf), String> {
    let mut input: Option<PathBuf> = None;
    let mut output: Option<PathBuf> = None;
    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "-o" | "--output" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| "-o requires a value".to_string())?;
                output = Some(PathBuf::from(value));
            }
            x if x.starts_with('-') => return Err(format!("unknown flag: {x}")),
            other => {
                if input.is_some() {
                    return Err("only one INPUT positional argument is allowed".to_string());
                }
                input = Some(PathBuf::from(other));
            }
        }
        i += 1;
    }
    let input = input.ok_or_else(|| format!("{cmd} requires INPUT"))?;
    let output = output.ok_or_else(|| format!("{cmd} requires -o OUTPUT"))?;
    Ok((input, output))
}

// ─── dispatch ────────────────────────────────────────────────────────────

fn dispatch(command: Command) -> Result<i32, String> {
    match command {
        Command::Run { path, cfg, quiet } => Ok(cmd_run(&path, cfg, quiet)?),
        Command::Validate {
            path,
            json,
            check_types,
            check_scopes,
        } => cmd_validate(&path, json, check_scopes, check_types),
        Command::Fmt { path, in_place } => {
            let doc = read_doc(&path)?;
            let text = canonicalize(&doc);
            if in_place {
                write_text(&path, &text)?;
            } else {
                println!("{text}");
            }
            Ok(EXIT_OK)
        }
        Command::Minify { input, output } => {
            let doc = read_doc(&input)?;
            write_text(&output, &minify_keys(&doc).to_string())?;
            Ok(EXIT_OK)
        }
        Command::Unminify { input, output } => {
            let doc = read_doc(&input)?;
            write_text(&output, &canonicalize(&unminify_keys(&doc)))?;
            Ok(EXIT_OK)
        }
        Command::Pack {
            input,
            output,
            format,
        } => {
            let doc = read_doc(&input)?;
            let bytes = pack(&doc, format)?;
            fs::write(&output, &bytes).map_err(|e| format!("{}: {e}", output.display()))?;
            let fmt_name = match format {
                PackFormat::Cbor => "cbor",
                PackFormat::Json => "json",
            };
            println!("wrote {} ({fmt_name}, {} bytes)", output.display(), bytes.len());
            Ok(EXIT_OK)
        }
        Command::Unpack { input, output } => {
            let bytes = fs::read(&input).map_err(|e| format!("{}: {e}", input.display()))?;
            let program = unpack(&bytes)?;
            write_text(&output, &canonicalize(&program))?;
            println!("wrote {}", output.display());
            Ok(EXIT_OK)
        }
        Command::Edit {
            program,
            edits,
            dry_run,
            json_errors,
        } => cmd_edit(&program, &edits, dry_run, json_errors),
        Command::Rewrite {
            program,
            rules,
            dry_run,
            limit,
        } => cmd_rewrite(&program, &rules, dry_run, limit),
        Command::AddUid {
            path,
            in_place,
            deep,
        } => {
            let mut doc = read_doc(&path)?;
            let statements = statements_mut(&mut doc)?;
            let added = add_uids(statements, deep);
            if in_place {
                write_text(&path, &canonicalize(&doc))?;
            } else {
                println!("{}", canonicalize(&doc));
            }
            eprintln!("Added {added} uid(s)");
            Ok(EXIT_OK)
        }
        Command::MigrateCalls {
            program,
            to_id,
            dry_run,
        } => {
            let mut doc = read_doc(&program)?;
            let statements = statements_mut(&mut doc)?;
            let changed = if to_id {
                migrate_calls_to_id(statements)
            } else {
                migrate_calls_to_name(statements)
            };
            if dry_run {
                print_json(&json!({"changed": changed, "preview": doc}));
            } else {
                write_text(&program, &canonicalize(&doc))?;
                println!("{}", json!({ "changed": changed }));
            }
            Ok(EXIT_OK)
        }
        Command::Suggest { path, json } => {
            let doc = read_doc(&path)?;
            let statements = amorph_core::ast::program_statements(&doc)?;
            let suggestions = suggest_improvements(statements);
            if json {
                let payload = json!({
                    "total": suggestions.len(),
                    "suggestions": suggestions,
                });
                print_json(&payload);
            } else if suggestions.is_empty() {
                println!("No suggestions found. Program looks good!");
            } else {
                println!("Found {} suggestions:\n", suggestions.len());
                for (i, s) in suggestions.iter().enumerate() {
                    println!("{}. [{}] {}", i + 1, s.priority.to_uppercase(), s.operation);
                    println!("   Reason: {}", s.reason);
                    println!("   Impact: {}", s.estimated_impact);
                    println!();
                }
            }
            Ok(EXIT_OK)
        }
    }
}

fn cmd_run(path: &PathBuf, cfg: VmConfig, quiet: bool) -> Result<i32, String> {
    let doc = read_doc(path)?;
    let rich = cfg.rich_errors;
    let outcome = if quiet {
        let mut io = QuietBackend::new();
        amorph_core::run_program_with(&doc, &mut io, cfg)
    } else {
        let mut io = StdBackend;
        amorph_core::run_program_with(&doc, &mut io, cfg)
    };
    match outcome {
        Ok(result) => {
            if result != Value::Null && !quiet {
                println!("{}", result.display_string());
            }
            Ok(EXIT_OK)
        }
        Err(err) => {
            if rich && err.context.is_some() {
                eprintln!("{}", err.format_rich());
            } else {
                eprintln!("Error: {err}");
            }
            Ok(EXIT_ERROR)
        }
    }
}

fn cmd_validate(
    path: &PathBuf,
    json: bool,
    check_scopes: bool,
    check_types: bool,
) -> Result<i32, String> {
    let doc = read_doc(path)?;
    let issues = validate_all(&doc, check_scopes, check_types);
    let report = ValidationReport::from_issues(issues);
    if json {
        print_json(&serde_json::to_value(&report).map_err(|e| e.to_string())?);
        return Ok(if report.ok { EXIT_OK } else { EXIT_ERROR });
    }
    if report.ok {
        println!("OK");
        Ok(EXIT_OK)
    } else {
        let first = report
            .issues
            .iter()
            .find(|i| i.is_error())
            .map(|i| format!("[{}] {} at {}", i.code, i.message, i.path))
            .unwrap_or_default();
        eprintln!("Invalid: {first}");
        Ok(EXIT_ERROR)
    }
}

fn cmd_edit(
    program_path: &PathBuf,
    edits_path: &PathBuf,
    dry_run: bool,
    json_errors: bool,
) -> Result<i32, String> {
    let mut doc = read_doc(program_path)?;
    let edits_doc = read_doc(edits_path)?;
    let edits = edits_doc
        .as_array()
        .ok_or_else(|| "edits must be a JSON array".to_string())?;
    let statements = statements_mut(&mut doc)?;
    add_uids(statements, true);

    match apply_edits(statements, edits) {
        Ok(report) => {
            if dry_run {
                print_json(&json!({"report": report, "preview": doc}));
            } else {
                write_text(program_path, &canonicalize(&doc))?;
                print_json(&serde_json::to_value(&report).map_err(|e| e.to_string())?);
            }
            Ok(EXIT_OK)
        }
        Err(err) => {
            if json_errors {
                print_json(&json!({ "error": err }));
            } else {
                eprintln!("Error [{}]: {}", err.code, err.message);
            }
            Ok(EXIT_ERROR)
        }
    }
}

fn cmd_rewrite(
    program_path: &PathBuf,
    rules_path: &PathBuf,
    dry_run: bool,
    limit: Option<usize>,
) -> Result<i32, String> {
    let mut doc = read_doc(program_path)?;
    let rules_doc = read_doc(rules_path)?;
    let rules = rules_doc
        .as_array()
        .ok_or_else(|| "rules must be a JSON array".to_string())?;
    let statements = statements_mut(&mut doc)?;
    add_uids(statements, true);

    let report = apply_rewrite(statements, rules, limit);
    for warning in &report.warnings {
        log::warn!("{warning}");
    }
    if dry_run {
        print_json(&json!({"replacements": report.replacements, "preview": doc}));
    } else {
        write_text(program_path, &canonicalize(&doc))?;
        println!("{}", json!({"replacements": report.replacements}));
    }
    Ok(EXIT_OK)
}

// ─── file plumbing ───────────────────────────────────────────────────────

fn read_doc(path: &PathBuf) -> Result<Json, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    serde_json::from_str(&text).map_err(|e| format!("{}: invalid JSON: {e}", path.display()))
}

fn write_text(path: &PathBuf, text: &str) -> Result<(), String> {
    fs::write(path, format!("{text}\n")).map_err(|e| format!("{}: {e}", path.display()))
}

fn statements_mut(doc: &mut Json) -> Result<&mut Vec<Json>, String> {
    amorph_core::ast::program_statements_mut(doc)
}

fn print_json(value: &Json) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}
