//! # amorph-core
//!
//! Core engines for **Amorph**, a language whose programs are canonical
//! JSON abstract syntax trees rather than free text: every node is
//! addressable, every edit is declarative and dry-runnable, and every
//! serialized form round-trips losslessly.
//!
//! ## Module Roles
//!
//! | Module | Responsibility | Public Entry Points |
//! |---|---|---|
//! | `vm` | Tree-walking evaluator with frames, tracing, capability gates | [`Vm`], [`VmConfig`], [`RuntimeError`] |
//! | `ops` | Operator identity, arity class, and pure evaluators | [`OpRegistry`], [`Arity`] |
//! | `validate` | Symbol/arity validation, diagnostic collection | [`validate`], [`validate_all`] |
//! | `scopes` | Lexical scope analysis (undefined/shadow) | [`analyze_scopes`] |
//! | `types` | Bottom-up type inference | [`check_types`] |
//! | `edits` | Transactional declarative edit operations | [`apply_edits`] |
//! | `refactor` | Reference tracking, rename, extract | [`find_variable_references`] |
//! | `rewrite` | Pattern match/replace to a fixed point | [`apply_rewrite`] |
//! | `canon` | Canonical pretty form + bijective minifier | [`canonicalize`], [`minify_keys`] |
//! | `acir` | Compact binary packing | [`pack`], [`unpack`] |
//! | `uid` | Deterministic id stamping | [`add_uids`] |
//! | `migrate` | Call-style normalization | [`migrate_calls_to_id`] |
//! | `suggest` | Improvement suggestions | [`suggest_improvements`] |
//!
//! ## Hello World
//!
//! ```no_run
//! use amorph_core::{run_program, QuietBackend};
//! use serde_json::json;
//!
//! let program = json!([
//!     {"let": {"name": "x", "value": {"add": [1, 2]}}},
//!     {"print": [{"var": "x"}]}
//! ]);
//! let mut io = QuietBackend::new();
//! run_program(&program, &mut io).expect("run");
//! assert_eq!(io.outputs, vec!["3"]);
//! ```

pub mod acir;
pub mod ast;
pub mod canon;
pub mod diag;
pub mod edits;
pub mod io;
pub mod migrate;
pub mod ops;
pub mod refactor;
pub mod rewrite;
pub mod scopes;
pub mod suggest;
pub mod types;
pub mod uid;
pub mod validate;
pub mod value;
pub mod vm;

pub use acir::{PackFormat, pack, unpack};
pub use canon::{canonicalize, minify_keys, unminify_keys};
pub use diag::{Diagnostic, Severity, ValidationReport, codes};
pub use edits::{EditError, EditReport, apply_edits};
pub use io::{IoBackend, QuietBackend, ScriptedBackend, StdBackend};
pub use migrate::{migrate_calls_to_id, migrate_calls_to_name};
pub use ops::{Arity, OpRegistry};
pub use refactor::{
    RefKind, VariableReference, analyze_free_variables, find_variable_references,
};
pub use rewrite::{RewriteReport, apply_rewrite};
pub use scopes::analyze_scopes;
pub use suggest::{Suggestion, suggest_improvements};
pub use types::check_types;
pub use uid::{add_uids, find_stmt_by_id};
pub use validate::{validate, validate_all};
pub use value::Value;
pub use vm::{ErrorContext, RuntimeError, Vm, VmConfig};

use serde_json::Value as Json;

/// Execute a program document with the default configuration.
pub fn run_program(doc: &Json, io: &mut dyn IoBackend) -> Result<Value, RuntimeError> {
    Vm::new(io, VmConfig::default()).run(doc)
}

/// Execute with an explicit configuration (capabilities, tracing, errors).
pub fn run_program_with(
    doc: &Json,
    io: &mut dyn IoBackend,
    cfg: VmConfig,
) -> Result<Value, RuntimeError> {
    Vm::new(io, cfg).run(doc)
}
