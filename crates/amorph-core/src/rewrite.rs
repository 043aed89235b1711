//! Pattern rewrite engine: match/replace rules with named placeholders and
//! list wildcards, applied bottom-up to a fixed point or a replacement
//! budget, with guards evaluated over matched subtrees or the program root.

use serde_json::{Map, Value as Json};
use std::collections::HashMap;

type Bindings = HashMap<String, Json>;

/// Result of a rewrite run.
#[derive(Debug, Clone)]
pub struct RewriteReport {
    pub replacements: usize,
    /// One-time notes about rules that were skipped (e.g. bad guards).
    pub warnings: Vec<String>,
}

fn is_placeholder(v: &Json) -> Option<&str> {
    let s = v.as_str()?;
    if s.len() > 1 && s.starts_with('$') && !s.starts_with("$*") {
        Some(&s[1..])
    } else {
        None
    }
}

fn is_star_placeholder(v: &Json) -> Option<&str> {
    let s = v.as_str()?;
    if s.len() > 2 && s.starts_with("$*") {
        Some(&s[2..])
    } else {
        None
    }
}

/// Structural match of `node` against `pattern`, extending `env`.
fn match_node(node: &Json, pattern: &Json, env: &mut Bindings) -> bool {
    if let Some(name) = is_placeholder(pattern) {
        if let Some(bound) = env.get(name) {
            return bound == node;
        }
        env.insert(name.to_string(), node.clone());
        return true;
    }
    match pattern {
        Json::Array(pat) => {
            let Some(items) = node.as_array() else {
                return false;
            };
            let stars: Vec<usize> = pat
                .iter()
                .enumerate()
                .filter_map(|(i, p)| is_star_placeholder(p).map(|_| i))
                .collect();
            match stars.as_slice() {
                [] => {
                    pat.len() == items.len()
                        && pat.iter().zip(items).all(|(p, n)| match_node(n, p, env))
                }
                [pos] => {
                    let pos = *pos;
                    let name = is_star_placeholder(&pat[pos]).expect("star at recorded position");
                    let tail_len = pat.len() - pos - 1;
                    if items.len() + 1 < pat.len() {
                        return false;
                    }
                    let middle_len = items.len() - pos - tail_len;
                    for (p, n) in pat[..pos].iter().zip(&items[..pos]) {
                        if !match_node(n, p, env) {
                            return false;
                        }
                    }
                    for (p, n) in pat[pos + 1..].iter().zip(&items[pos + middle_len..]) {
                        if !match_node(n, p, env) {
                            return false;
                        }
                    }
                    let middle = Json::Array(items[pos..pos + middle_len].to_vec());
                    if let Some(bound) = env.get(name) {
                        return *bound == middle;
                    }
                    env.insert(name.to_string(), middle);
                    true
                }
                _ => false,
            }
        }
        Json::Object(pat) => {
            // subset match: extra keys in the node are preserved
            let Some(obj) = node.as_object() else {
                return false;
            };
            pat.iter().all(|(k, p)| {
                obj.get(k).is_some_and(|n| {
                    let mut scratch = env.clone();
                    if match_node(n, p, &mut scratch) {
                        *env = scratch;
                        true
                    } else {
                        false
                    }
                })
            })
        }
        scalar => node == scalar,
    }
}

/// Instantiate a replacement template with bindings. `$name` inserts the
/// bound subtree; `$*name` splices a bound list into the enclosing array.
fn substitute(template: &Json, env: &Bindings) -> Json {
    if let Some(name) = is_placeholder(template) {
        return env.get(name).cloned().unwrap_or(Json::Null);
    }
    match template {
        Json::Array(xs) => {
            let mut out = Vec::with_capacity(xs.len());
            for x in xs {
                if let Some(name) = is_star_placeholder(x) {
                    match env.get(name) {
                        Some(Json::Array(vals)) => out.extend(vals.iter().cloned()),
                        Some(other) => out.push(other.clone()),
                        None => {}
                    }
                } else {
                    out.push(substitute(x, env));
                }
            }
            Json::Array(out)
        }
        Json::Object(obj) => {
            let mut out = Map::new();
            for (k, v) in obj {
                out.insert(k.clone(), substitute(v, env));
            }
            Json::Object(out)
        }
        scalar => scalar.clone(),
    }
}

// ─── guard expression language ───────────────────────────────────────────
//
// Minimal subset over JSON: dot/index field access rooted at the guarded
// document, literals (numbers, 'strings', true/false/null), `==`/`!=`,
// `&&`/`||`, `!`, and parentheses. An unparseable guard disables its rule.

#[derive(Debug, Clone, PartialEq)]
enum Guard {
    Literal(Json),
    Path(Vec<GuardSeg>),
    Eq(Box<Guard>, Box<Guard>),
    Ne(Box<Guard>, Box<Guard>),
    And(Box<Guard>, Box<Guard>),
    Or(Box<Guard>, Box<Guard>),
    Not(Box<Guard>),
}

#[derive(Debug, Clone, PartialEq)]
enum GuardSeg {
    Key(String),
    Index(usize),
}

struct GuardParser<'a> {
    chars: Vec<char>,
    pos: usize,
    src: &'a str,
}

impl<'a> GuardParser<'a> {
    fn parse(src: &'a str) -> Result<Guard, String> {
        let mut p = GuardParser {
            chars: src.chars().collect(),
            pos: 0,
            src,
        };
        let expr = p.or_expr()?;
        p.skip_ws();
        if p.pos != p.chars.len() {
            return Err(format!("trailing input in guard: {}", p.src));
        }
        Ok(expr)
    }

    fn skip_ws(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        let t: Vec<char> = token.chars().collect();
        if self.chars[self.pos..].starts_with(&t) {
            self.pos += t.len();
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Guard, String> {
        let mut left = self.and_expr()?;
        while self.eat("||") {
            let right = self.and_expr()?;
            left = Guard::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Guard, String> {
        let mut left = self.cmp_expr()?;
        while self.eat("&&") {
            let right = self.cmp_expr()?;
            left = Guard::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn cmp_expr(&mut self) -> Result<Guard, String> {
        let left = self.unary()?;
        if self.eat("==") {
            let right = self.unary()?;
            return Ok(Guard::Eq(Box::new(left), Box::new(right)));
        }
        if self.eat("!=") {
            let right = self.unary()?;
            return Ok(Guard::Ne(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Guard, String> {
        self.skip_ws();
        if self.pos < self.chars.len() && self.chars[self.pos] == '!' {
            // not `!=`
            if self.chars.get(self.pos + 1) != Some(&'=') {
                self.pos += 1;
                return Ok(Guard::Not(Box::new(self.unary()?)));
            }
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Guard, String> {
        self.skip_ws();
        let Some(&c) = self.chars.get(self.pos) else {
            return Err("unexpected end of guard".to_string());
        };
        if c == '(' {
            self.pos += 1;
            let inner = self.or_expr()?;
            if !self.eat(")") {
                return Err("unclosed parenthesis in guard".to_string());
            }
            return Ok(inner);
        }
        if c == '\'' {
            self.pos += 1;
            let start = self.pos;
            while self.pos < self.chars.len() && self.chars[self.pos] != '\'' {
                self.pos += 1;
            }
            if self.pos >= self.chars.len() {
                return Err("unterminated string in guard".to_string());
            }
            let s: String = self.chars[start..self.pos].iter().collect();
            self.pos += 1;
            return Ok(Guard::Literal(Json::String(s)));
        }
        if c == '@' {
            // the guarded document itself
            self.pos += 1;
            return Ok(Guard::Path(Vec::new()));
        }
        if c.is_ascii_digit() || c == '-' {
            let start = self.pos;
            self.pos += 1;
            while self
                .chars
                .get(self.pos)
                .is_some_and(|c| c.is_ascii_digit() || *c == '.')
            {
                self.pos += 1;
            }
            let text: String = self.chars[start..self.pos].iter().collect();
            let n = if let Ok(i) = text.parse::<i64>() {
                serde_json::Number::from(i)
            } else {
                text.parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .ok_or_else(|| format!("bad number in guard: {text}"))?
            };
            return Ok(Guard::Literal(Json::Number(n)));
        }
        // bare word: keyword or field path
        let start = self.pos;
        while self.chars.get(self.pos).is_some_and(|c| {
            c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '[' | ']')
        }) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(format!("unexpected character in guard: {c}"));
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "true" => Ok(Guard::Literal(Json::Bool(true))),
            "false" => Ok(Guard::Literal(Json::Bool(false))),
            "null" => Ok(Guard::Literal(Json::Null)),
            _ => Ok(Guard::Path(parse_guard_path(&word)?)),
        }
    }
}

fn parse_guard_path(word: &str) -> Result<Vec<GuardSeg>, String> {
    let mut out = Vec::new();
    for part in word.split('.') {
        if part.is_empty() {
            return Err(format!("empty path segment in guard: {word}"));
        }
        let mut rest = part;
        if let Some(open) = rest.find('[') {
            let (key, idx_part) = rest.split_at(open);
            if !key.is_empty() {
                out.push(GuardSeg::Key(key.to_string()));
            }
            rest = idx_part;
            while let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped
                    .find(']')
                    .ok_or_else(|| format!("unclosed index in guard path: {word}"))?;
                let idx = stripped[..close]
                    .parse::<usize>()
                    .map_err(|_| format!("bad index in guard path: {word}"))?;
                out.push(GuardSeg::Index(idx));
                rest = &stripped[close + 1..];
            }
            if !rest.is_empty() {
                return Err(format!("bad path segment in guard: {word}"));
            }
        } else {
            out.push(GuardSeg::Key(rest.to_string()));
        }
    }
    Ok(out)
}

fn guard_lookup(doc: &Json, segs: &[GuardSeg]) -> Json {
    let mut cur = doc;
    for seg in segs {
        let next = match seg {
            GuardSeg::Key(k) => cur.as_object().and_then(|o| o.get(k)),
            GuardSeg::Index(i) => cur.as_array().and_then(|a| a.get(*i)),
        };
        match next {
            Some(v) => cur = v,
            None => return Json::Null,
        }
    }
    cur.clone()
}

fn guard_truthy(v: &Json) -> bool {
    match v {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Json::String(s) => !s.is_empty(),
        Json::Array(a) => !a.is_empty(),
        Json::Object(o) => !o.is_empty(),
    }
}

fn guard_eval(guard: &Guard, doc: &Json) -> Json {
    match guard {
        Guard::Literal(v) => v.clone(),
        Guard::Path(segs) => guard_lookup(doc, segs),
        Guard::Eq(a, b) => Json::Bool(guard_eval(a, doc) == guard_eval(b, doc)),
        Guard::Ne(a, b) => Json::Bool(guard_eval(a, doc) != guard_eval(b, doc)),
        Guard::And(a, b) => {
            Json::Bool(guard_truthy(&guard_eval(a, doc)) && guard_truthy(&guard_eval(b, doc)))
        }
        Guard::Or(a, b) => {
            Json::Bool(guard_truthy(&guard_eval(a, doc)) || guard_truthy(&guard_eval(b, doc)))
        }
        Guard::Not(a) => Json::Bool(!guard_truthy(&guard_eval(a, doc))),
    }
}

// ─── rules ───────────────────────────────────────────────────────────────

struct Rule {
    pattern: Json,
    replace: Json,
    selects: Vec<Guard>,
    program_selects: Vec<Guard>,
    placeholder_guards: Vec<(String, Guard)>,
    apply_to: Vec<Vec<GuardSeg>>,
    has_apply_to: bool,
}

fn parse_rules(raw: &[Json], warnings: &mut Vec<String>) -> Vec<Rule> {
    let mut out = Vec::new();
    for (i, rule) in raw.iter().enumerate() {
        let (Some(pattern), Some(replace)) = (rule.get("match"), rule.get("replace")) else {
            warnings.push(format!("rule {i} skipped: match and replace are required"));
            continue;
        };

        let mut broken = false;
        let mut collect = |out_vec: &mut Vec<Guard>, raw: Option<&Json>, broken: &mut bool| {
            let exprs: Vec<&str> = match raw {
                None => Vec::new(),
                Some(Json::String(s)) => vec![s.as_str()],
                Some(Json::Array(xs)) => xs.iter().filter_map(Json::as_str).collect(),
                Some(_) => Vec::new(),
            };
            for e in exprs {
                match GuardParser::parse(e) {
                    Ok(g) => out_vec.push(g),
                    Err(msg) => {
                        warnings.push(format!("rule {i} skipped: {msg}"));
                        *broken = true;
                    }
                }
            }
        };

        let mut selects = Vec::new();
        collect(&mut selects, rule.get("select"), &mut broken);
        collect(&mut selects, rule.get("where"), &mut broken);
        let mut program_selects = Vec::new();
        collect(&mut program_selects, rule.get("program_select"), &mut broken);
        collect(&mut program_selects, rule.get("program_where"), &mut broken);

        let mut placeholder_guards = Vec::new();
        if let Some(map) = rule.get("where_placeholders").and_then(Json::as_object) {
            for (name, expr) in map {
                let Some(expr) = expr.as_str() else {
                    continue;
                };
                match GuardParser::parse(expr) {
                    Ok(g) => placeholder_guards.push((name.clone(), g)),
                    Err(msg) => {
                        warnings.push(format!("rule {i} skipped: {msg}"));
                        broken = true;
                    }
                }
            }
        }

        let mut apply_to = Vec::new();
        let has_apply_to = rule.get("apply_to").is_some();
        let apply_exprs: Vec<&str> = match rule.get("apply_to") {
            None => Vec::new(),
            Some(Json::String(s)) => vec![s.as_str()],
            Some(Json::Array(xs)) => xs.iter().filter_map(Json::as_str).collect(),
            Some(_) => Vec::new(),
        };
        for e in apply_exprs {
            match parse_guard_path(e) {
                Ok(p) => apply_to.push(p),
                Err(msg) => {
                    warnings.push(format!("rule {i} skipped: {msg}"));
                    broken = true;
                }
            }
        }

        if broken {
            continue;
        }
        out.push(Rule {
            pattern: pattern.clone(),
            replace: replace.clone(),
            selects,
            program_selects,
            placeholder_guards,
            apply_to,
            has_apply_to,
        });
    }
    out
}

fn rule_applies(rule: &Rule, node: &Json, env: &Bindings, root: &Json) -> bool {
    for g in &rule.selects {
        if !guard_truthy(&guard_eval(g, node)) {
            return false;
        }
    }
    for g in &rule.program_selects {
        if !guard_truthy(&guard_eval(g, root)) {
            return false;
        }
    }
    for (name, g) in &rule.placeholder_guards {
        let Some(bound) = env.get(name) else {
            return false;
        };
        if !guard_truthy(&guard_eval(g, bound)) {
            return false;
        }
    }
    if rule.has_apply_to {
        let mut allowed = false;
        for selector in &rule.apply_to {
            match guard_lookup(root, selector) {
                Json::Array(nodes) => {
                    if nodes.iter().any(|n| n == node) {
                        allowed = true;
                    }
                }
                Json::Null => {}
                single => {
                    if single == *node {
                        allowed = true;
                    }
                }
            }
        }
        if !allowed {
            return false;
        }
    }
    true
}

struct Rewriter<'a> {
    rules: &'a [Rule],
    root: Json,
    budget: Option<usize>,
    replacements: usize,
}

impl Rewriter<'_> {
    fn exhausted(&self) -> bool {
        self.budget.is_some_and(|b| self.replacements >= b)
    }

    /// Bottom-up: rewrite children first so inner rewrites are visible to
    /// outer matches within the same pass.
    fn rewrite(&mut self, node: &Json) -> Json {
        let node = match node {
            Json::Array(xs) => Json::Array(xs.iter().map(|x| self.rewrite(x)).collect()),
            Json::Object(obj) => {
                let mut out = Map::new();
                for (k, v) in obj {
                    out.insert(k.clone(), self.rewrite(v));
                }
                Json::Object(out)
            }
            scalar => scalar.clone(),
        };
        if self.exhausted() {
            return node;
        }
        for rule in self.rules {
            let mut env = Bindings::new();
            if match_node(&node, &rule.pattern, &mut env)
                && rule_applies(rule, &node, &env, &self.root)
            {
                self.replacements += 1;
                return substitute(&rule.replace, &env);
            }
        }
        node
    }
}

/// Apply rules to a fixed point, or until `limit` total replacements.
pub fn apply_rewrite(
    program: &mut Vec<Json>,
    rules: &[Json],
    limit: Option<usize>,
) -> RewriteReport {
    let mut warnings = Vec::new();
    let parsed = parse_rules(rules, &mut warnings);

    let mut total = 0usize;
    loop {
        let mut rewriter = Rewriter {
            rules: &parsed,
            root: Json::Array(program.clone()),
            budget: limit.map(|l| l - total),
            replacements: 0,
        };
        let next: Vec<Json> = program.iter().map(|stmt| rewriter.rewrite(stmt)).collect();
        let changed = rewriter.replacements;
        *program = next;
        total += changed;
        if changed == 0 || limit.is_some_and(|l| total >= l) {
            break;
        }
    }

    RewriteReport {
        replacements: total,
        warnings,
    }
}
