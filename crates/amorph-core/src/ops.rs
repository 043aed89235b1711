//! Operator registry: identity, arity class, and evaluator for every
//! built-in operator.
//!
//! Evaluators are pure functions over already-evaluated argument values.
//! `and`/`or` (short-circuit) and `input` (effectful) are registered for
//! arity checking but evaluated as special forms inside the VM.

use crate::diag::codes;
use crate::value::Value;
use crate::vm::RuntimeError;
use std::collections::HashMap;

/// How many operands an operator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Ranged(usize, usize),
    Variadic(usize),
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match self {
            Arity::Fixed(k) => n == *k,
            Arity::Ranged(lo, hi) => n >= *lo && n <= *hi,
            Arity::Variadic(min) => n >= *min,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Arity::Fixed(k) => format!("exactly {k}"),
            Arity::Ranged(lo, hi) => format!("{lo} to {hi}"),
            Arity::Variadic(min) => format!("at least {min}"),
        }
    }
}

/// Pure evaluator signature used by the registry.
pub type OpFn = fn(&[Value]) -> Result<Value, RuntimeError>;

pub struct OpEntry {
    pub arity: Arity,
    /// `None` marks a VM-level special form (`and`, `or`, `input`).
    pub eval: Option<OpFn>,
}

/// Canonical operator registry.
pub struct OpRegistry {
    ops: HashMap<&'static str, OpEntry>,
}

/// Namespaced operators (`ns.op`) dispatch on their suffix.
pub fn normalize(op: &str) -> &str {
    op.rsplit('.').next().unwrap_or(op)
}

impl OpRegistry {
    pub fn new() -> Self {
        let mut ops: HashMap<&'static str, OpEntry> = HashMap::new();
        let mut put = |name: &'static str, arity: Arity, eval: Option<OpFn>| {
            ops.insert(name, OpEntry { arity, eval });
        };

        put("add", Arity::Variadic(2), Some(op_add as OpFn));
        put("sub", Arity::Fixed(2), Some(op_sub as OpFn));
        put("mul", Arity::Variadic(2), Some(op_mul as OpFn));
        put("div", Arity::Fixed(2), Some(op_div as OpFn));
        put("mod", Arity::Fixed(2), Some(op_mod as OpFn));
        put("pow", Arity::Fixed(2), Some(op_pow as OpFn));
        put("eq", Arity::Fixed(2), Some(op_eq as OpFn));
        put("ne", Arity::Fixed(2), Some(op_ne as OpFn));
        put("lt", Arity::Fixed(2), Some(op_lt as OpFn));
        put("le", Arity::Fixed(2), Some(op_le as OpFn));
        put("gt", Arity::Fixed(2), Some(op_gt as OpFn));
        put("ge", Arity::Fixed(2), Some(op_ge as OpFn));
        put("not", Arity::Fixed(1), Some(op_not as OpFn));
        put("and", Arity::Variadic(1), None);
        put("or", Arity::Variadic(1), None);
        put("list", Arity::Variadic(0), Some(op_list as OpFn));
        put("len", Arity::Fixed(1), Some(op_len as OpFn));
        put("get", Arity::Fixed(2), Some(op_get as OpFn));
        put("has", Arity::Fixed(2), Some(op_has as OpFn));
        put("concat", Arity::Variadic(2), Some(op_concat as OpFn));
        put("range", Arity::Ranged(1, 2), Some(op_range as OpFn));
        put("input", Arity::Ranged(0, 1), None);
        put("int", Arity::Fixed(1), Some(op_int as OpFn));

        Self { ops }
    }

    /// Lookup by raw (possibly namespaced) operator key.
    pub fn get(&self, op: &str) -> Option<&OpEntry> {
        self.ops.get(normalize(op))
    }

    pub fn contains(&self, op: &str) -> bool {
        self.ops.contains_key(normalize(op))
    }

    /// Arity class of a known operator.
    pub fn arity(&self, op: &str) -> Option<Arity> {
        self.get(op).map(|e| e.arity)
    }
}

impl Default for OpRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn type_err(msg: impl Into<String>) -> RuntimeError {
    RuntimeError::new(codes::E_TYPE_RUNTIME, msg)
}

fn all_strings(args: &[Value]) -> bool {
    args.iter().all(|v| matches!(v, Value::Str(_)))
}

fn all_numeric(args: &[Value]) -> bool {
    args.iter().all(Value::is_numeric)
}

fn all_ints(args: &[Value]) -> bool {
    args.iter().all(|v| matches!(v, Value::Int(_)))
}

fn kinds_of(args: &[Value]) -> String {
    args.iter()
        .map(Value::kind_name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn checked_fold(
    args: &[Value],
    init: i64,
    op_name: &str,
    f: fn(i64, i64) -> Option<i64>,
) -> Result<Value, RuntimeError> {
    let mut acc = init;
    for v in args {
        let Value::Int(n) = v else { unreachable!() };
        acc = f(acc, *n).ok_or_else(|| {
            RuntimeError::new(codes::E_OVERFLOW, format!("{op_name} overflowed 64-bit integer"))
        })?;
    }
    Ok(Value::Int(acc))
}

fn op_add(args: &[Value]) -> Result<Value, RuntimeError> {
    if all_strings(args) {
        let mut out = String::new();
        for v in args {
            if let Value::Str(s) = v {
                out.push_str(s);
            }
        }
        return Ok(Value::Str(out));
    }
    if all_ints(args) {
        return checked_fold(args, 0, "add", i64::checked_add);
    }
    if all_numeric(args) {
        let sum: f64 = args.iter().filter_map(|v| v.as_f64()).sum();
        return Ok(Value::Float(sum));
    }
    Err(type_err(format!(
        "add expects all numeric or all string arguments, got: {}",
        kinds_of(args)
    )))
}

fn op_mul(args: &[Value]) -> Result<Value, RuntimeError> {
    if all_ints(args) {
        return checked_fold(args, 1, "mul", i64::checked_mul);
    }
    if all_numeric(args) {
        let product: f64 = args.iter().filter_map(|v| v.as_f64()).product();
        return Ok(Value::Float(product));
    }
    Err(type_err(format!(
        "mul expects numeric arguments, got: {}",
        kinds_of(args)
    )))
}

fn numeric_pair(args: &[Value], op_name: &str) -> Result<(Value, Value), RuntimeError> {
    match args {
        [a, b] if a.is_numeric() && b.is_numeric() => Ok((a.clone(), b.clone())),
        [a, b] => Err(type_err(format!(
            "{op_name} expects numeric arguments, got: {}, {}",
            a.kind_name(),
            b.kind_name()
        ))),
        _ => Err(type_err(format!("{op_name} expects 2 arguments"))),
    }
}

fn op_sub(args: &[Value]) -> Result<Value, RuntimeError> {
    match numeric_pair(args, "sub")? {
        (Value::Int(a), Value::Int(b)) => a
            .checked_sub(b)
            .map(Value::Int)
            .ok_or_else(|| RuntimeError::new(codes::E_OVERFLOW, "sub overflowed 64-bit integer")),
        (a, b) => Ok(Value::Float(a.as_f64().unwrap() - b.as_f64().unwrap())),
    }
}

fn op_div(args: &[Value]) -> Result<Value, RuntimeError> {
    match numeric_pair(args, "div")? {
        (Value::Int(a), Value::Int(b)) => {
            if b == 0 {
                return Err(RuntimeError::new(codes::E_DIV_ZERO, "division by zero"));
            }
            if a % b == 0 {
                a.checked_div(b).map(Value::Int).ok_or_else(|| {
                    RuntimeError::new(codes::E_OVERFLOW, "div overflowed 64-bit integer")
                })
            } else {
                Ok(Value::Float(a as f64 / b as f64))
            }
        }
        (a, b) => {
            let d = b.as_f64().unwrap();
            if d == 0.0 {
                return Err(RuntimeError::new(codes::E_DIV_ZERO, "division by zero"));
            }
            Ok(Value::Float(a.as_f64().unwrap() / d))
        }
    }
}

fn op_mod(args: &[Value]) -> Result<Value, RuntimeError> {
    match numeric_pair(args, "mod")? {
        (Value::Int(a), Value::Int(b)) => {
            if b == 0 {
                return Err(RuntimeError::new(codes::E_DIV_ZERO, "modulo by zero"));
            }
            a.checked_rem(b).map(Value::Int).ok_or_else(|| {
                RuntimeError::new(codes::E_OVERFLOW, "mod overflowed 64-bit integer")
            })
        }
        (a, b) => {
            let d = b.as_f64().unwrap();
            if d == 0.0 {
                return Err(RuntimeError::new(codes::E_DIV_ZERO, "modulo by zero"));
            }
            Ok(Value::Float(a.as_f64().unwrap() % d))
        }
    }
}

fn op_pow(args: &[Value]) -> Result<Value, RuntimeError> {
    match numeric_pair(args, "pow")? {
        (Value::Int(a), Value::Int(b)) => {
            if b >= 0 {
                let exp = u32::try_from(b).ok().and_then(|e| a.checked_pow(e));
                exp.map(Value::Int).ok_or_else(|| {
                    RuntimeError::new(codes::E_OVERFLOW, "pow overflowed 64-bit integer")
                })
            } else {
                Ok(Value::Float((a as f64).powf(b as f64)))
            }
        }
        (a, b) => Ok(Value::Float(a.as_f64().unwrap().powf(b.as_f64().unwrap()))),
    }
}

fn op_eq(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(args[0] == args[1]))
}

fn op_ne(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(args[0] != args[1]))
}

fn ordering(args: &[Value], op_name: &str) -> Result<std::cmp::Ordering, RuntimeError> {
    args[0].cmp_ordered(&args[1]).ok_or_else(|| {
        type_err(format!(
            "{op_name} is defined between numerics or between strings, got: {}, {}",
            args[0].kind_name(),
            args[1].kind_name()
        ))
    })
}

fn op_lt(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(ordering(args, "lt")?.is_lt()))
}

fn op_le(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(ordering(args, "le")?.is_le()))
}

fn op_gt(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(ordering(args, "gt")?.is_gt()))
}

fn op_ge(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(ordering(args, "ge")?.is_ge()))
}

fn op_not(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(!args[0].is_truthy()))
}

fn op_list(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::List(args.to_vec()))
}

fn op_len(args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::List(xs) => Ok(Value::Int(xs.len() as i64)),
        other => Err(type_err(format!(
            "len expects a list or string, got: {}",
            other.kind_name()
        ))),
    }
}

fn op_get(args: &[Value]) -> Result<Value, RuntimeError> {
    let idx = match &args[1] {
        Value::Int(i) => *i,
        other => {
            return Err(type_err(format!(
                "get index must be an int, got: {}",
                other.kind_name()
            )));
        }
    };
    let out_of_range = |len: usize| {
        RuntimeError::new(
            codes::E_INDEX,
            format!("index {idx} out of range for length {len}"),
        )
    };
    match &args[0] {
        Value::List(xs) => usize::try_from(idx)
            .ok()
            .and_then(|i| xs.get(i).cloned())
            .ok_or_else(|| out_of_range(xs.len())),
        Value::Str(s) => usize::try_from(idx)
            .ok()
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::Str(c.to_string()))
            .ok_or_else(|| out_of_range(s.chars().count())),
        other => Err(type_err(format!(
            "get expects a list or string, got: {}",
            other.kind_name()
        ))),
    }
}

fn op_has(args: &[Value]) -> Result<Value, RuntimeError> {
    match (&args[0], &args[1]) {
        (Value::List(xs), needle) => Ok(Value::Bool(xs.iter().any(|x| x == needle))),
        (Value::Str(s), Value::Str(needle)) => Ok(Value::Bool(s.contains(needle.as_str()))),
        (a, b) => Err(type_err(format!(
            "has expects (list, value) or (string, string), got: {}, {}",
            a.kind_name(),
            b.kind_name()
        ))),
    }
}

fn op_concat(args: &[Value]) -> Result<Value, RuntimeError> {
    if all_strings(args) {
        let mut out = String::new();
        for v in args {
            if let Value::Str(s) = v {
                out.push_str(s);
            }
        }
        return Ok(Value::Str(out));
    }
    if args.iter().all(|v| matches!(v, Value::List(_))) {
        let mut out = Vec::new();
        for v in args {
            if let Value::List(xs) = v {
                out.extend(xs.iter().cloned());
            }
        }
        return Ok(Value::List(out));
    }
    Err(type_err(format!(
        "concat expects all lists or all strings, got: {}",
        kinds_of(args)
    )))
}

fn as_range_bound(v: &Value, op_name: &str) -> Result<i64, RuntimeError> {
    match v {
        Value::Int(n) => Ok(*n),
        Value::Float(f) => Ok(*f as i64),
        other => Err(type_err(format!(
            "{op_name} expects numeric arguments, got: {}",
            other.kind_name()
        ))),
    }
}

fn op_range(args: &[Value]) -> Result<Value, RuntimeError> {
    let make = |it: Box<dyn Iterator<Item = i64>>| Value::List(it.map(Value::Int).collect());
    match args {
        [n] => {
            let n = as_range_bound(n, "range")?;
            if n < 1 {
                Ok(Value::List(Vec::new()))
            } else {
                Ok(make(Box::new(1..=n)))
            }
        }
        [a, b] => {
            let a = as_range_bound(a, "range")?;
            let b = as_range_bound(b, "range")?;
            if a <= b {
                Ok(make(Box::new(a..=b)))
            } else {
                Ok(make(Box::new((b..=a).rev())))
            }
        }
        _ => Err(type_err("range expects 1 or 2 arguments")),
    }
}

fn op_int(args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(f) => {
            let t = f.trunc();
            if t.is_finite() && t >= i64::MIN as f64 && t <= i64::MAX as f64 {
                Ok(Value::Int(t as i64))
            } else {
                Err(RuntimeError::new(
                    codes::E_OVERFLOW,
                    "float does not fit a 64-bit integer",
                ))
            }
        }
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| type_err(format!("int parse failed for '{s}': {e}"))),
        other => Err(type_err(format!(
            "int expects a number, bool, or string, got: {}",
            other.kind_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(op: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        let reg = OpRegistry::new();
        let entry = reg.get(op).expect("known operator");
        (entry.eval.expect("pure operator"))(args)
    }

    #[test]
    fn add_splits_on_operand_class() {
        assert_eq!(eval("add", &[Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(3));
        assert_eq!(
            eval("add", &[Value::Int(1), Value::Float(0.5)]).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            eval("add", &[Value::Str("a".into()), Value::Str("b".into())]).unwrap(),
            Value::Str("ab".into())
        );
        let err = eval("add", &[Value::Int(1), Value::Str("x".into())]).unwrap_err();
        assert_eq!(err.code, codes::E_TYPE_RUNTIME);
    }

    #[test]
    fn div_is_exact_or_float() {
        assert_eq!(eval("div", &[Value::Int(6), Value::Int(3)]).unwrap(), Value::Int(2));
        assert_eq!(
            eval("div", &[Value::Int(7), Value::Int(2)]).unwrap(),
            Value::Float(3.5)
        );
        let err = eval("div", &[Value::Int(1), Value::Int(0)]).unwrap_err();
        assert_eq!(err.code, codes::E_DIV_ZERO);
    }

    #[test]
    fn mod_truncates_toward_zero() {
        assert_eq!(eval("mod", &[Value::Int(-7), Value::Int(2)]).unwrap(), Value::Int(-1));
        assert_eq!(eval("mod", &[Value::Int(7), Value::Int(-2)]).unwrap(), Value::Int(1));
    }

    #[test]
    fn overflow_is_a_deterministic_error() {
        let err = eval("mul", &[Value::Int(i64::MAX), Value::Int(2)]).unwrap_err();
        assert_eq!(err.code, codes::E_OVERFLOW);
        let err = eval("pow", &[Value::Int(10), Value::Int(40)]).unwrap_err();
        assert_eq!(err.code, codes::E_OVERFLOW);
    }

    #[test]
    fn range_directions() {
        assert_eq!(
            eval("range", &[Value::Int(3)]).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(eval("range", &[Value::Int(0)]).unwrap(), Value::List(vec![]));
        assert_eq!(
            eval("range", &[Value::Int(3), Value::Int(1)]).unwrap(),
            Value::List(vec![Value::Int(3), Value::Int(2), Value::Int(1)])
        );
    }

    #[test]
    fn collection_errors() {
        let err = eval("get", &[Value::List(vec![Value::Int(1)]), Value::Int(5)]).unwrap_err();
        assert_eq!(err.code, codes::E_INDEX);
        let err = eval(
            "concat",
            &[Value::Str("a".into()), Value::List(vec![])],
        )
        .unwrap_err();
        assert_eq!(err.code, codes::E_TYPE_RUNTIME);
    }

    #[test]
    fn namespaced_lookup_normalizes() {
        let reg = OpRegistry::new();
        assert!(reg.contains("math.add"));
        assert_eq!(reg.arity("str.concat"), Some(Arity::Variadic(2)));
        assert!(!reg.contains("frobnicate"));
    }

    #[test]
    fn ordering_rejects_mixed_classes() {
        let err = eval("lt", &[Value::Int(1), Value::Str("a".into())]).unwrap_err();
        assert_eq!(err.code, codes::E_TYPE_RUNTIME);
        assert_eq!(
            eval("lt", &[Value::Str("apple".into()), Value::Str("pear".into())]).unwrap(),
            Value::Bool(true)
        );
    }
}
