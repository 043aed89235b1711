use serde::{Deserialize, Serialize};

/// Diagnostic and runtime error codes. Static passes emit `E_*`/`W_*`
/// diagnostics; the VM reuses the `E_*` runtime subset.
pub mod codes {
    // static
    pub const E_SHAPE: &str = "E_SHAPE";
    pub const E_UNKNOWN_OP: &str = "E_UNKNOWN_OP";
    pub const E_OP_ARITY: &str = "E_OP_ARITY";
    pub const E_DUPLICATE_ID: &str = "E_DUPLICATE_ID";
    pub const E_TYPE_MISMATCH: &str = "E_TYPE_MISMATCH";
    pub const E_BAD_PATH: &str = "E_BAD_PATH";
    pub const E_BAD_SPEC: &str = "E_BAD_SPEC";
    pub const W_PREFER_ID: &str = "W_PREFER_ID";
    pub const W_MIXED_CALL_STYLE: &str = "W_MIXED_CALL_STYLE";
    pub const W_VARIABLE_SHADOW: &str = "W_VARIABLE_SHADOW";
    pub const W_DUPLICATE_NAME: &str = "W_DUPLICATE_NAME";
    pub const W_TYPE_SUSPICIOUS: &str = "W_TYPE_SUSPICIOUS";
    // static and runtime
    pub const E_UNDEFINED_VAR: &str = "E_UNDEFINED_VAR";
    pub const E_UNKNOWN_FUNC: &str = "E_UNKNOWN_FUNC";
    // runtime
    pub const E_ARG_COUNT: &str = "E_ARG_COUNT";
    pub const E_TYPE_RUNTIME: &str = "E_TYPE_RUNTIME";
    pub const E_DIV_ZERO: &str = "E_DIV_ZERO";
    pub const E_INDEX: &str = "E_INDEX";
    pub const E_CAP_DENIED: &str = "E_CAP_DENIED";
    pub const E_RECURSION: &str = "E_RECURSION";
    pub const E_RETURN_OUTSIDE_FN: &str = "E_RETURN_OUTSIDE_FN";
    pub const E_OVERFLOW: &str = "E_OVERFLOW";
}

/// Diagnostic severity. Serialized lowercase to match the report schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Structured finding produced by the static passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: Severity,
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn error(code: impl Into<String>, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            severity: Severity::Error,
            path: path.into(),
            message: message.into(),
            hint: None,
        }
    }

    pub fn warning(
        code: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            severity: Severity::Warning,
            path: path.into(),
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Aggregate report shape emitted by `validate --json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub issues: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn from_issues(issues: Vec<Diagnostic>) -> Self {
        let ok = !issues.iter().any(Diagnostic::is_error);
        Self { ok, issues }
    }
}
