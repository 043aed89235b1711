//! Tree-walking evaluator.
//!
//! Executes a program document against a capability profile through an
//! [`IoBackend`], producing a result value, a stdout stream, and optional
//! NDJSON trace events. Strictly sequential and deterministic: the same
//! program, stdin script, and capability profile yield byte-identical
//! stdout and trace output.

use crate::ast::{self, PathSeg, path_to_string};
use crate::diag::codes;
use crate::io::IoBackend;
use crate::ops::{OpRegistry, normalize};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Context attached to runtime errors in rich-error mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub path: String,
    pub call_stack: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// Runtime evaluation error: a taxonomy code, a message, and optional
/// rich context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,
}

impl RuntimeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: None,
        }
    }

    /// Multi-line form with path and call stack, innermost call first.
    pub fn format_rich(&self) -> String {
        let mut lines = vec![format!("RuntimeError [{}]: {}", self.code, self.message)];
        if let Some(ctx) = &self.context {
            lines.push(format!("  at {}", ctx.path));
            if !ctx.call_stack.is_empty() {
                lines.push("  Call stack:".to_string());
                for name in ctx.call_stack.iter().rev() {
                    lines.push(format!("    {name}"));
                }
            }
            if let Some(excerpt) = &ctx.excerpt {
                lines.push("  Node:".to_string());
                lines.push(format!("    {excerpt}"));
            }
        }
        lines.join("\n")
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for RuntimeError {}

/// A user-defined function: a closed `(params, body)` pair.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub id: Option<String>,
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Json>,
}

/// Lexical scope: bindings plus a parent pointer into the frame arena.
#[derive(Debug, Default)]
struct Frame {
    vars: HashMap<String, Value>,
    fns_by_name: HashMap<String, Rc<FunctionDef>>,
    fns_by_id: HashMap<String, Rc<FunctionDef>>,
    parent: Option<usize>,
}

impl Frame {
    fn with_parent(parent: Option<usize>) -> Self {
        Self {
            parent,
            ..Self::default()
        }
    }
}

/// VM configuration: capability profile, trace switches, error verbosity.
///
/// `trace` and `trace_json` are independent: the first writes terse
/// human-readable lines, the second NDJSON events, both on the trace channel.
#[derive(Debug, Clone)]
pub struct VmConfig {
    pub trace: bool,
    pub trace_json: bool,
    pub allow_print: bool,
    pub allow_input: bool,
    pub rich_errors: bool,
    pub max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            trace: false,
            trace_json: false,
            allow_print: true,
            allow_input: true,
            rich_errors: false,
            max_call_depth: 256,
        }
    }
}

/// Statement outcome: fall through with a value, or unwind with `return`.
enum Flow {
    Normal(Value),
    Return(Value),
}

#[derive(Serialize)]
struct TraceEvent<'a> {
    ts: f64,
    call_id: u64,
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    op: Option<&'a str>,
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
}

pub struct Vm<'io> {
    io: &'io mut dyn IoBackend,
    ops: OpRegistry,
    cfg: VmConfig,
    frames: Vec<Frame>,
    current: usize,
    path: Vec<PathSeg>,
    call_stack_names: Vec<String>,
    call_seq: u64,
    current_call_id: u64,
    call_depth: usize,
}

impl<'io> Vm<'io> {
    pub fn new(io: &'io mut dyn IoBackend, cfg: VmConfig) -> Self {
        Self {
            io,
            ops: OpRegistry::new(),
            cfg,
            frames: vec![Frame::default()],
            current: 0,
            path: Vec::new(),
            call_stack_names: Vec::new(),
            call_seq: 0,
            current_call_id: 0,
            call_depth: 0,
        }
    }

    /// Execute a program document (bare sequence or `{program:[...]}`).
    ///
    /// Returns the value of the last value-producing statement, or the first
    /// runtime error. The VM resets its frames on entry, so an instance can
    /// run several programs in sequence.
    pub fn run(&mut self, doc: &Json) -> Result<Value, RuntimeError> {
        self.frames = vec![Frame::default()];
        self.current = 0;
        self.path.clear();
        self.call_stack_names.clear();
        self.call_seq = 0;
        self.current_call_id = 0;
        self.call_depth = 0;

        let program = ast::program_statements(doc)
            .map_err(|m| RuntimeError::new(codes::E_TYPE_RUNTIME, m))?
            .clone();

        // Top-level functions are discoverable before execution begins.
        for stmt in &program {
            if let Some(def) = stmt.get("def") {
                let fun = self.parse_def(def)?;
                self.register_def(0, fun);
            }
        }

        let mut result = Value::Null;
        for (i, stmt) in program.iter().enumerate() {
            self.path = vec![PathSeg::Seq(i)];
            match self.exec_stmt(stmt)? {
                Flow::Normal(v) => result = v,
                Flow::Return(_) => {
                    return Err(self.rt(
                        codes::E_RETURN_OUTSIDE_FN,
                        "return outside of a function body",
                        Some(stmt),
                    ));
                }
            }
        }
        Ok(result)
    }

    // ─── frames ──────────────────────────────────────────────────────────

    fn define_var(&mut self, name: &str, value: Value) {
        self.frames[self.current].vars.insert(name.to_string(), value);
    }

    fn assign_var(&mut self, name: &str, value: Value) -> bool {
        let mut cursor = Some(self.current);
        while let Some(i) = cursor {
            if self.frames[i].vars.contains_key(name) {
                self.frames[i].vars.insert(name.to_string(), value);
                return true;
            }
            cursor = self.frames[i].parent;
        }
        false
    }

    fn lookup_var(&self, name: &str) -> Option<Value> {
        let mut cursor = Some(self.current);
        while let Some(i) = cursor {
            if let Some(v) = self.frames[i].vars.get(name) {
                return Some(v.clone());
            }
            cursor = self.frames[i].parent;
        }
        None
    }

    fn register_def(&mut self, frame: usize, fun: Rc<FunctionDef>) {
        if let Some(id) = &fun.id {
            self.frames[frame].fns_by_id.insert(id.clone(), fun.clone());
        }
        self.frames[frame]
            .fns_by_name
            .insert(fun.name.clone(), fun);
    }

    fn lookup_fn(&self, id: Option<&str>, name: Option<&str>) -> Option<Rc<FunctionDef>> {
        let mut cursor = Some(self.current);
        while let Some(i) = cursor {
            let frame = &self.frames[i];
            if let Some(id) = id {
                if let Some(f) = frame.fns_by_id.get(id) {
                    return Some(f.clone());
                }
            } else if let Some(name) = name {
                if let Some(f) = frame.fns_by_name.get(name) {
                    return Some(f.clone());
                }
            }
            cursor = frame.parent;
        }
        None
    }

    // ─── statements ──────────────────────────────────────────────────────

    fn exec_stmt(&mut self, stmt: &Json) -> Result<Flow, RuntimeError> {
        let Some(obj) = stmt.as_object() else {
            return Err(self.rt(codes::E_TYPE_RUNTIME, "statement must be an object", Some(stmt)));
        };
        let Some(kind) = ast::stmt_kind(obj) else {
            let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
            return Err(self.rt(
                codes::E_TYPE_RUNTIME,
                format!("unknown statement: {{{}}}", keys.join(", ")),
                Some(stmt),
            ));
        };
        self.emit("eval", Some(kind), None);

        match kind {
            "let" => {
                let (name, value) = self.binding_parts(&obj["let"], "let")?;
                let value = self.eval_in(&[PathSeg::Key("let".into()), PathSeg::Key("value".into())], &value)?;
                self.log(|| format!("let {name} = {}", value.display_string()));
                self.define_var(&name, value);
                Ok(Flow::Normal(Value::Null))
            }
            "set" => {
                let (name, value) = self.binding_parts(&obj["set"], "set")?;
                let value = self.eval_in(&[PathSeg::Key("set".into()), PathSeg::Key("value".into())], &value)?;
                self.log(|| format!("set {name} = {}", value.display_string()));
                if !self.assign_var(&name, value) {
                    return Err(self.rt(
                        codes::E_UNDEFINED_VAR,
                        format!("Variable not found: {name}"),
                        Some(stmt),
                    ));
                }
                Ok(Flow::Normal(Value::Null))
            }
            "def" => {
                let fun = self.parse_def(&obj["def"])?;
                self.log(|| format!("def {} params={:?}", fun.name, fun.params));
                self.register_def(self.current, fun);
                Ok(Flow::Normal(Value::Null))
            }
            "if" => self.exec_if(&obj["if"]),
            "return" => {
                let v = self.eval_in(&[PathSeg::Key("return".into())], &obj["return"].clone())?;
                Ok(Flow::Return(v))
            }
            "print" => {
                self.exec_print(&obj["print"].clone())?;
                Ok(Flow::Normal(Value::Null))
            }
            "expr" => {
                let v = self.eval_in(&[PathSeg::Key("expr".into())], &obj["expr"].clone())?;
                Ok(Flow::Normal(v))
            }
            _ => unreachable!("stmt_kind returned an unregistered discriminator"),
        }
    }

    fn binding_parts(&mut self, payload: &Json, kind: &str) -> Result<(String, Json), RuntimeError> {
        let Some(spec) = payload.as_object() else {
            return Err(self.rt(
                codes::E_TYPE_RUNTIME,
                format!("{kind} requires {{name, value}}"),
                Some(payload),
            ));
        };
        let name = spec
            .get("name")
            .and_then(Json::as_str)
            .ok_or_else(|| RuntimeError::new(codes::E_TYPE_RUNTIME, format!("{kind} name must be a string")))?;
        let value = spec
            .get("value")
            .cloned()
            .ok_or_else(|| RuntimeError::new(codes::E_TYPE_RUNTIME, format!("{kind} requires a value")))?;
        Ok((name.to_string(), value))
    }

    fn parse_def(&mut self, payload: &Json) -> Result<Rc<FunctionDef>, RuntimeError> {
        let Some(spec) = payload.as_object() else {
            return Err(self.rt(
                codes::E_TYPE_RUNTIME,
                "def requires {name, params?, body?}",
                Some(payload),
            ));
        };
        let name = spec
            .get("name")
            .and_then(Json::as_str)
            .ok_or_else(|| RuntimeError::new(codes::E_TYPE_RUNTIME, "def name must be a string"))?;
        let mut params = Vec::new();
        if let Some(raw) = spec.get("params") {
            let list = raw.as_array().ok_or_else(|| {
                RuntimeError::new(codes::E_TYPE_RUNTIME, "def params must be a list of strings")
            })?;
            for p in list {
                let p = p.as_str().ok_or_else(|| {
                    RuntimeError::new(codes::E_TYPE_RUNTIME, "def params must be a list of strings")
                })?;
                params.push(p.to_string());
            }
        }
        let body = match spec.get("body") {
            None => Vec::new(),
            Some(raw) => raw
                .as_array()
                .ok_or_else(|| {
                    RuntimeError::new(codes::E_TYPE_RUNTIME, "def body must be a list of statements")
                })?
                .clone(),
        };
        Ok(Rc::new(FunctionDef {
            id: spec.get("id").and_then(Json::as_str).map(str::to_string),
            name: name.to_string(),
            params,
            body,
        }))
    }

    fn exec_if(&mut self, payload: &Json) -> Result<Flow, RuntimeError> {
        let Some(spec) = payload.as_object().cloned() else {
            return Err(self.rt(
                codes::E_TYPE_RUNTIME,
                "if requires {cond, then?, else?}",
                Some(payload),
            ));
        };
        let Some(cond) = spec.get("cond") else {
            return Err(self.rt(codes::E_TYPE_RUNTIME, "if requires a cond expression", Some(payload)));
        };
        let cond = self.eval_in(&[PathSeg::Key("if".into()), PathSeg::Key("cond".into())], cond)?;
        let branch_key = if cond.is_truthy() { "then" } else { "else" };
        let Some(branch) = spec.get(branch_key) else {
            return Ok(Flow::Normal(Value::Null));
        };
        let Some(block) = branch.as_array() else {
            return Err(self.rt(
                codes::E_TYPE_RUNTIME,
                "then/else must be a list of statements",
                Some(branch),
            ));
        };
        let base = {
            let mut p = self.path.clone();
            p.push(PathSeg::Key("if".into()));
            p.push(PathSeg::Key(branch_key.into()));
            p
        };
        self.exec_block(block, &base)
    }

    /// Run a block in a freshly pushed frame whose parent is the current one.
    fn exec_block(&mut self, block: &[Json], base: &[PathSeg]) -> Result<Flow, RuntimeError> {
        let frames_len = self.frames.len();
        let prev = self.current;
        self.frames.push(Frame::with_parent(Some(prev)));
        self.current = self.frames.len() - 1;

        let mut out = Ok(Flow::Normal(Value::Null));
        for (i, stmt) in block.iter().enumerate() {
            let mut p = base.to_vec();
            p.push(PathSeg::Seq(i));
            self.path = p;
            match self.exec_stmt(stmt) {
                Ok(Flow::Normal(v)) => out = Ok(Flow::Normal(v)),
                Ok(Flow::Return(v)) => {
                    out = Ok(Flow::Return(v));
                    break;
                }
                Err(e) => {
                    out = Err(e);
                    break;
                }
            }
        }

        self.current = prev;
        self.frames.truncate(frames_len);
        out
    }

    fn exec_print(&mut self, payload: &Json) -> Result<(), RuntimeError> {
        if !self.cfg.allow_print {
            return Err(self.rt(codes::E_CAP_DENIED, "Effect denied: print", None));
        }
        let items: Vec<Json> = match payload {
            Json::Array(xs) => xs.clone(),
            other => vec![other.clone()],
        };
        let mut vals: Vec<Value> = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let segs = vec![PathSeg::Key("print".into()), PathSeg::Seq(i)];
            let spread = item
                .as_object()
                .filter(|o| o.len() == 1)
                .and_then(|o| o.get("spread"));
            if let Some(inner) = spread {
                let seq = self.eval_in(&segs, inner)?;
                let Value::List(xs) = seq else {
                    return Err(self.rt(
                        codes::E_TYPE_RUNTIME,
                        "spread expects a list expression",
                        Some(item),
                    ));
                };
                vals.extend(xs);
            } else {
                let v = self.eval_in(&segs, item)?;
                vals.push(v);
            }
        }
        let line = vals
            .iter()
            .map(Value::display_string)
            .collect::<Vec<_>>()
            .join(" ");
        self.emit("effect", Some("print"), Some("stdout"));
        self.io.write_line(&line);
        Ok(())
    }

    // ─── expressions ─────────────────────────────────────────────────────

    /// Evaluate with extra path segments pushed for the duration.
    fn eval_in(&mut self, segs: &[PathSeg], expr: &Json) -> Result<Value, RuntimeError> {
        let depth = self.path.len();
        self.path.extend_from_slice(segs);
        let out = self.eval_expr(expr);
        self.path.truncate(depth);
        out
    }

    fn eval_expr(&mut self, expr: &Json) -> Result<Value, RuntimeError> {
        match expr {
            Json::Null | Json::Bool(_) | Json::Number(_) | Json::String(_) => {
                Value::try_from(expr).map_err(|m| self.rt(codes::E_TYPE_RUNTIME, m, Some(expr)))
            }
            Json::Array(xs) => {
                let mut out = Vec::with_capacity(xs.len());
                for (i, x) in xs.iter().enumerate() {
                    out.push(self.eval_in(&[PathSeg::Seq(i)], x)?);
                }
                Ok(Value::List(out))
            }
            Json::Object(obj) => {
                if let Some(name) = obj.get("var") {
                    let Some(name) = name.as_str() else {
                        return Err(self.rt(codes::E_TYPE_RUNTIME, "var name must be a string", Some(expr)));
                    };
                    return self.lookup_var(name).ok_or_else(|| {
                        self.rt(
                            codes::E_UNDEFINED_VAR,
                            format!("Variable not found: {name}"),
                            Some(expr),
                        )
                    });
                }
                if let Some(spec) = obj.get("call") {
                    return self.eval_call(spec);
                }
                if ast::is_op_node(obj) {
                    let (op_key, payload) = obj.iter().next().expect("single-key object");
                    return self.eval_op(op_key, payload, expr);
                }
                Err(self.rt(
                    codes::E_TYPE_RUNTIME,
                    "object is not a valid expression (expected a single discriminator)",
                    Some(expr),
                ))
            }
        }
    }

    fn eval_op(&mut self, op_key: &str, payload: &Json, whole: &Json) -> Result<Value, RuntimeError> {
        let name = normalize(op_key).to_string();
        let Some(entry) = self.ops.get(&name) else {
            return Err(self.rt(
                codes::E_TYPE_RUNTIME,
                format!("unknown operator: {op_key}"),
                Some(whole),
            ));
        };
        let arity = entry.arity;
        let eval_fn = entry.eval;
        let operands: Vec<Json> = ast::op_operands(payload).into_iter().cloned().collect();
        if !arity.accepts(operands.len()) {
            return Err(self.rt(
                codes::E_TYPE_RUNTIME,
                format!(
                    "operator {name} expects {} operands, got {}",
                    arity.describe(),
                    operands.len()
                ),
                Some(whole),
            ));
        }
        self.emit("eval", Some(name.as_str()), None);

        let seg_for = |i: usize, listed: bool| -> Vec<PathSeg> {
            let mut segs = vec![PathSeg::Key(op_key.to_string())];
            if listed {
                segs.push(PathSeg::Seq(i));
            }
            segs
        };
        let listed = payload.is_array();

        let Some(eval_fn) = eval_fn else {
            return match name.as_str() {
                "and" => {
                    for (i, operand) in operands.iter().enumerate() {
                        let v = self.eval_in(&seg_for(i, listed), operand)?;
                        if !v.is_truthy() {
                            return Ok(Value::Bool(false));
                        }
                    }
                    Ok(Value::Bool(true))
                }
                "or" => {
                    for (i, operand) in operands.iter().enumerate() {
                        let v = self.eval_in(&seg_for(i, listed), operand)?;
                        if v.is_truthy() {
                            return Ok(Value::Bool(true));
                        }
                    }
                    Ok(Value::Bool(false))
                }
                "input" => {
                    if !self.cfg.allow_input {
                        return Err(self.rt(codes::E_CAP_DENIED, "Effect denied: input", None));
                    }
                    let prompt = match operands.first() {
                        None => None,
                        Some(p) => {
                            let v = self.eval_in(&seg_for(0, listed), p)?;
                            let Value::Str(s) = v else {
                                return Err(self.rt(
                                    codes::E_TYPE_RUNTIME,
                                    "input prompt must be a string",
                                    Some(whole),
                                ));
                            };
                            Some(s)
                        }
                    };
                    self.emit("effect", Some("input"), Some("stdin"));
                    Ok(Value::Str(self.io.read_line(prompt.as_deref())))
                }
                other => unreachable!("unregistered special form: {other}"),
            };
        };

        let mut args = Vec::with_capacity(operands.len());
        for (i, operand) in operands.iter().enumerate() {
            args.push(self.eval_in(&seg_for(i, listed), operand)?);
        }
        self.log(|| {
            let shown = args
                .iter()
                .map(Value::display_string)
                .collect::<Vec<_>>()
                .join(", ");
            format!("op {name} [{shown}]")
        });
        eval_fn(&args).map_err(|e| self.contextualize(e, Some(whole)))
    }

    fn eval_call(&mut self, spec: &Json) -> Result<Value, RuntimeError> {
        let Some(spec) = spec.as_object().cloned() else {
            return Err(self.rt(codes::E_TYPE_RUNTIME, "call requires {name|id, args?}", Some(spec)));
        };
        let id = spec.get("id").and_then(Json::as_str).map(str::to_string);
        let name = spec.get("name").and_then(Json::as_str).map(str::to_string);
        if id.is_none() && name.is_none() {
            return Err(self.rt(codes::E_TYPE_RUNTIME, "call requires a name or an id", None));
        }

        let raw_args: Vec<Json> = match spec.get("args") {
            None => Vec::new(),
            Some(raw) => raw
                .as_array()
                .ok_or_else(|| RuntimeError::new(codes::E_TYPE_RUNTIME, "call args must be a list"))?
                .clone(),
        };
        let mut args = Vec::with_capacity(raw_args.len());
        for (i, a) in raw_args.iter().enumerate() {
            let segs = vec![
                PathSeg::Key("call".into()),
                PathSeg::Key("args".into()),
                PathSeg::Seq(i),
            ];
            args.push(self.eval_in(&segs, a)?);
        }

        let fun = self
            .lookup_fn(id.as_deref(), name.as_deref())
            .ok_or_else(|| {
                let what = match (&id, &name) {
                    (Some(id), _) => format!("Function id not defined: {id}"),
                    (None, Some(name)) => format!("Function not defined: {name}"),
                    (None, None) => unreachable!("checked above"),
                };
                self.rt(codes::E_UNKNOWN_FUNC, what, None)
            })?;
        let display = name.or(id).unwrap_or_else(|| fun.name.clone());
        self.call_function(fun, args, display)
    }

    fn call_function(
        &mut self,
        fun: Rc<FunctionDef>,
        args: Vec<Value>,
        display: String,
    ) -> Result<Value, RuntimeError> {
        if self.call_depth >= self.cfg.max_call_depth {
            return Err(self.rt(
                codes::E_RECURSION,
                format!("call depth exceeded {}", self.cfg.max_call_depth),
                None,
            ));
        }
        if fun.params.len() != args.len() {
            return Err(self.rt(
                codes::E_ARG_COUNT,
                format!(
                    "Function {} expects {} args, got {}",
                    fun.name,
                    fun.params.len(),
                    args.len()
                ),
                None,
            ));
        }

        self.call_seq += 1;
        let prev_call_id = self.current_call_id;
        self.current_call_id = self.call_seq;
        self.call_depth += 1;
        self.call_stack_names.push(display);

        let fn_key = fun.id.clone().unwrap_or_else(|| fun.name.clone());
        let fn_base = vec![PathSeg::Fn(fn_key), PathSeg::Key("body".into())];
        let prev_path = std::mem::take(&mut self.path);
        self.path = fn_base[..1].to_vec();
        self.emit("enter", Some(fun.name.as_str()), None);

        // Callee frames parent to the global frame, not the caller's.
        let frames_len = self.frames.len();
        let prev_frame = self.current;
        let mut frame = Frame::with_parent(Some(0));
        for (param, arg) in fun.params.iter().zip(args) {
            frame.vars.insert(param.clone(), arg);
        }
        self.frames.push(frame);
        self.current = self.frames.len() - 1;

        let mut out = Ok(Value::Null);
        for (i, stmt) in fun.body.iter().enumerate() {
            let mut p = fn_base.clone();
            p.push(PathSeg::Seq(i));
            self.path = p;
            match self.exec_stmt(stmt) {
                Ok(Flow::Normal(_)) => {}
                Ok(Flow::Return(v)) => {
                    out = Ok(v);
                    break;
                }
                Err(e) => {
                    out = Err(e);
                    break;
                }
            }
        }

        self.current = prev_frame;
        self.frames.truncate(frames_len);
        self.path = fn_base[..1].to_vec();
        self.emit("exit", Some(fun.name.as_str()), None);
        self.path = prev_path;
        self.call_stack_names.pop();
        self.call_depth -= 1;
        self.current_call_id = prev_call_id;
        out
    }

    // ─── errors & tracing ────────────────────────────────────────────────

    fn rt(&mut self, code: &str, message: impl Into<String>, node: Option<&Json>) -> RuntimeError {
        self.contextualize(RuntimeError::new(code, message), node)
    }

    fn contextualize(&mut self, mut err: RuntimeError, node: Option<&Json>) -> RuntimeError {
        if self.cfg.rich_errors && err.context.is_none() {
            err.context = Some(ErrorContext {
                path: path_to_string(&self.path),
                call_stack: self.call_stack_names.clone(),
                excerpt: node.map(excerpt_of),
            });
        }
        err
    }

    /// Plain human-readable trace line, gated on `trace`.
    fn log(&mut self, message: impl FnOnce() -> String) {
        if self.cfg.trace {
            let line = format!("[trace] {}", message());
            self.io.write_trace(&line);
        }
    }

    fn emit(&mut self, kind: &str, op: Option<&str>, channel: Option<&str>) {
        if !self.cfg.trace_json {
            return;
        }
        let path = path_to_string(&self.path);
        let event = TraceEvent {
            ts: self.io.now(),
            call_id: self.current_call_id,
            kind,
            op,
            path: &path,
            channel,
        };
        if let Ok(line) = serde_json::to_string(&event) {
            self.io.write_trace(&line);
        }
    }
}

fn excerpt_of(node: &Json) -> String {
    let s = node.to_string();
    if s.chars().count() <= 120 {
        s
    } else {
        let cut: String = s.chars().take(117).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{QuietBackend, ScriptedBackend};
    use serde_json::json;

    fn run_quiet(program: Json) -> (Result<Value, RuntimeError>, Vec<String>) {
        let mut io = QuietBackend::new();
        let out = Vm::new(&mut io, VmConfig::default()).run(&program);
        (out, io.outputs)
    }

    #[test]
    fn arithmetic_and_function() {
        let program = json!([
            {"let": {"name": "x", "value": {"add": [1, 2]}}},
            {"def": {"name": "double", "params": ["n"], "body": [
                {"return": {"mul": [{"var": "n"}, 2]}}
            ]}},
            {"let": {"name": "y", "value": {"call": {"name": "double", "args": [{"var": "x"}]}}}},
            {"print": [{"var": "y"}]}
        ]);
        let (out, lines) = run_quiet(program);
        out.unwrap();
        assert_eq!(lines, vec!["6"]);
    }

    #[test]
    fn recursive_factorial_by_id() {
        let program = json!([
            {"def": {"name": "fact", "id": "fn_fact", "params": ["n"], "body": [
                {"if": {"cond": {"le": [{"var": "n"}, 1]},
                        "then": [{"return": 1}],
                        "else": [{"return": {"mul": [{"var": "n"},
                            {"call": {"id": "fn_fact", "args": [{"sub": [{"var": "n"}, 1]}]}}]}}]}}
            ]}},
            {"print": [{"call": {"id": "fn_fact", "args": [5]}}]}
        ]);
        let (out, lines) = run_quiet(program);
        out.unwrap();
        assert_eq!(lines, vec!["120"]);
    }

    #[test]
    fn functions_do_not_see_caller_locals() {
        let program = json!([
            {"def": {"name": "probe", "params": [], "body": [
                {"return": {"var": "local_only"}}
            ]}},
            {"def": {"name": "caller", "params": [], "body": [
                {"let": {"name": "local_only", "value": 1}},
                {"return": {"call": {"name": "probe", "args": []}}}
            ]}},
            {"expr": {"call": {"name": "caller", "args": []}}}
        ]);
        let (out, _) = run_quiet(program);
        assert_eq!(out.unwrap_err().code, codes::E_UNDEFINED_VAR);
    }

    #[test]
    fn functions_see_globals() {
        let program = json!([
            {"let": {"name": "base", "value": 10}},
            {"def": {"name": "bump", "params": [], "body": [
                {"return": {"add": [{"var": "base"}, 1]}}
            ]}},
            {"print": [{"call": {"name": "bump", "args": []}}]}
        ]);
        let (out, lines) = run_quiet(program);
        out.unwrap();
        assert_eq!(lines, vec!["11"]);
    }

    #[test]
    fn set_updates_nearest_enclosing_binding() {
        let program = json!([
            {"let": {"name": "n", "value": 1}},
            {"if": {"cond": true, "then": [
                {"set": {"name": "n", "value": 2}}
            ]}},
            {"print": [{"var": "n"}]}
        ]);
        let (out, lines) = run_quiet(program);
        out.unwrap();
        assert_eq!(lines, vec!["2"]);
    }

    #[test]
    fn branch_scoped_let_does_not_leak() {
        let program = json!([
            {"if": {"cond": true, "then": [
                {"let": {"name": "inner", "value": 1}}
            ]}},
            {"print": [{"var": "inner"}]}
        ]);
        let (out, _) = run_quiet(program);
        assert_eq!(out.unwrap_err().code, codes::E_UNDEFINED_VAR);
    }

    #[test]
    fn short_circuit_skips_poison_operand() {
        let program = json!([
            {"let": {"name": "ok", "value": {"or": [true, {"div": [1, 0]}]}}},
            {"print": [{"var": "ok"}]}
        ]);
        let (out, lines) = run_quiet(program);
        out.unwrap();
        assert_eq!(lines, vec!["true"]);
    }

    #[test]
    fn print_spread_expands_lists() {
        let program = json!([
            {"let": {"name": "xs", "value": {"list": [1, 2, 3]}}},
            {"print": [0, {"spread": {"var": "xs"}}, 4]}
        ]);
        let (out, lines) = run_quiet(program);
        out.unwrap();
        assert_eq!(lines, vec!["0 1 2 3 4"]);
    }

    #[test]
    fn capability_gates() {
        let program = json!([{"print": [1]}]);
        let mut io = QuietBackend::new();
        let cfg = VmConfig {
            allow_print: false,
            ..VmConfig::default()
        };
        let err = Vm::new(&mut io, cfg).run(&program).unwrap_err();
        assert_eq!(err.code, codes::E_CAP_DENIED);

        let program = json!([{"let": {"name": "x", "value": {"input": []}}}]);
        let mut io = QuietBackend::new();
        let cfg = VmConfig {
            allow_input: false,
            ..VmConfig::default()
        };
        let err = Vm::new(&mut io, cfg).run(&program).unwrap_err();
        assert_eq!(err.code, codes::E_CAP_DENIED);
    }

    #[test]
    fn scripted_input_round_trip() {
        let program = json!([
            {"let": {"name": "who", "value": {"input": ["name? "]}}},
            {"print": [{"add": [{"var": "who"}, "!"]}]}
        ]);
        let mut io = ScriptedBackend::new(["world"]);
        Vm::new(&mut io, VmConfig::default()).run(&program).unwrap();
        assert_eq!(io.outputs, vec!["world!"]);
    }

    #[test]
    fn recursion_guard_fires() {
        let program = json!([
            {"def": {"name": "spin", "params": [], "body": [
                {"return": {"call": {"name": "spin", "args": []}}}
            ]}},
            {"expr": {"call": {"name": "spin", "args": []}}}
        ]);
        let (out, _) = run_quiet(program);
        assert_eq!(out.unwrap_err().code, codes::E_RECURSION);
    }

    #[test]
    fn top_level_return_is_an_error() {
        let (out, _) = run_quiet(json!([{"return": 1}]));
        assert_eq!(out.unwrap_err().code, codes::E_RETURN_OUTSIDE_FN);
    }

    #[test]
    fn wrapper_form_and_result_value() {
        let doc = json!({"version": "0.1", "program": [
            {"expr": {"add": [1, 2]}}
        ]});
        let (out, _) = run_quiet(doc);
        assert_eq!(out.unwrap(), Value::Int(3));
    }

    #[test]
    fn arg_count_mismatch() {
        let program = json!([
            {"def": {"name": "f", "params": ["a", "b"], "body": []}},
            {"expr": {"call": {"name": "f", "args": [1]}}}
        ]);
        let (out, _) = run_quiet(program);
        assert_eq!(out.unwrap_err().code, codes::E_ARG_COUNT);
    }

    #[test]
    fn trace_events_are_deterministic() {
        let program = json!([
            {"def": {"name": "id", "id": "fn_id", "params": ["x"], "body": [{"return": {"var": "x"}}]}},
            {"print": [{"call": {"id": "fn_id", "args": [7]}}]}
        ]);
        let cfg = VmConfig {
            trace_json: true,
            ..VmConfig::default()
        };
        let mut io1 = QuietBackend::new();
        Vm::new(&mut io1, cfg.clone()).run(&program).unwrap();
        let mut io2 = QuietBackend::new();
        Vm::new(&mut io2, cfg).run(&program).unwrap();
        assert_eq!(io1.trace, io2.trace);
        assert!(!io1.trace.is_empty());
        let first: Json = serde_json::from_str(&io1.trace[0]).unwrap();
        assert!(first.get("ts").is_some());
        assert!(first.get("kind").is_some());
        assert!(first.get("path").is_some());
        let enter = io1
            .trace
            .iter()
            .map(|l| serde_json::from_str::<Json>(l).unwrap())
            .find(|e| e["kind"] == "enter")
            .expect("enter event");
        assert_eq!(enter["call_id"], json!(1));
        assert_eq!(enter["path"], json!("/fn[fn_id]"));
    }

    #[test]
    fn plain_trace_lines_are_emitted() {
        let program = json!([
            {"let": {"name": "x", "value": {"add": [1, 2]}}},
            {"def": {"name": "f", "params": ["n"], "body": []}},
            {"set": {"name": "x", "value": 9}}
        ]);
        let mut io = QuietBackend::new();
        let cfg = VmConfig {
            trace: true,
            ..VmConfig::default()
        };
        Vm::new(&mut io, cfg).run(&program).unwrap();
        assert!(io.trace.contains(&"[trace] op add [1, 2]".to_string()));
        assert!(io.trace.contains(&"[trace] let x = 3".to_string()));
        assert!(io.trace.contains(&"[trace] def f params=[\"n\"]".to_string()));
        assert!(io.trace.contains(&"[trace] set x = 9".to_string()));
        assert!(io.outputs.is_empty());
    }

    #[test]
    fn plain_and_json_trace_are_independent() {
        let program = json!([{"let": {"name": "x", "value": 1}}]);
        let mut io = QuietBackend::new();
        let cfg = VmConfig {
            trace_json: true,
            ..VmConfig::default()
        };
        Vm::new(&mut io, cfg).run(&program).unwrap();
        assert!(io.trace.iter().all(|l| !l.starts_with("[trace]")));

        let mut io = QuietBackend::new();
        let cfg = VmConfig {
            trace: true,
            ..VmConfig::default()
        };
        Vm::new(&mut io, cfg).run(&program).unwrap();
        assert!(io.trace.iter().all(|l| l.starts_with("[trace]")));
    }

    #[test]
    fn rich_errors_carry_path_and_stack() {
        let program = json!([
            {"def": {"name": "boom", "id": "fn_boom", "params": [], "body": [
                {"return": {"div": [1, 0]}}
            ]}},
            {"expr": {"call": {"name": "boom", "args": []}}}
        ]);
        let mut io = QuietBackend::new();
        let cfg = VmConfig {
            rich_errors: true,
            ..VmConfig::default()
        };
        let err = Vm::new(&mut io, cfg).run(&program).unwrap_err();
        assert_eq!(err.code, codes::E_DIV_ZERO);
        let ctx = err.context.expect("rich context");
        assert!(ctx.path.starts_with("/fn[fn_boom]/body/$[0]"));
        assert_eq!(ctx.call_stack, vec!["boom".to_string()]);
    }
}
