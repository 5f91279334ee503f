//! Template expression compiler.
//!
//! Parses the small expression grammar used inside `{...}` placeholders into
//! a tagged-variant AST bound to named context roots, and evaluates that AST
//! against an evaluation context. Pure: parsing and evaluation have no side
//! effects, and no textual source is ever generated for dynamic evaluation.
//!
//! Grammar: identifiers (dashes allowed inside member names), dotted and
//! bracket member access, calls, object and array literals, single- or
//! double-quoted strings, and numbers. A root-symbol table maps magic
//! prefixes to named accessor roots:
//!
//! | prefix           | root                        |
//! |------------------|-----------------------------|
//! | `$`, `$root`     | root model                  |
//! | `$data`          | current data model          |
//! | `$parent`        | nearest enclosing model     |
//! | `$parents`       | enclosing model sequence    |
//! | `$parentContext` | parent context record       |
//! | `$index`         | iteration index             |
//! | `$context`       | context record              |
//! | `$rawData`       | raw data model              |
//! | `$$`             | built-in function namespace |
//!
//! Un-prefixed identifiers resolve against the root model first and fall
//! back to the current data model, which gives string templates their short
//! notation (`{request.method}`, `{simple}`).
//!
//! Evaluation yields `Option<Value>`: `None` is the missing-sentinel for
//! "field not present", distinct from an explicit `Some(Value::Null)`, so
//! `default()` can tell absent from present-but-null.

use serde_json::{Map, Number, Value};

use super::TemplateError;

/// Named accessor root an expression is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    /// `$` / `$root`: the root model (request, additional context, ...).
    Model,
    /// `$data`: the current data model (field scope).
    Data,
    /// `$parent`: the nearest enclosing parent model.
    Parent,
    /// `$parents`: the ordered sequence of enclosing parent models.
    Parents,
    /// `$parentContext`: the enclosing context record.
    ParentContext,
    /// `$index`: the current iteration index.
    Index,
    /// `$context`: the context record itself.
    Context,
    /// `$rawData`: the raw data model.
    RawData,
    /// `$$`: the built-in function namespace (`default`, `merge`, `strip`).
    Builtins,
    /// Un-prefixed identifier: root model first, then the data model.
    Scope,
}

/// One step of a member-access chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// `.name` or a bracket access with a constant key.
    Member(String),
    /// `[expr]` dynamic access.
    Index(Box<Expr>),
    /// `(args...)` call applied to the preceding member.
    Call(Vec<Expr>),
}

/// Compiled expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Object literal; insertion order is preserved.
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    /// Member-access chain from a named root.
    Access { root: Root, path: Vec<Segment> },
}

/// Evaluation context an expression tree is applied to.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Root model: named context roots such as `request`.
    pub root: &'a Value,
    /// Current data model (field scope).
    pub data: &'a Value,
    /// Enclosing parent models, nearest first.
    pub parents: &'a [Value],
    /// Iteration index, when iterating.
    pub index: Option<u64>,
}

impl Expr {
    /// Parse an expression from source text.
    pub fn parse(input: &str) -> Result<Expr, TemplateError> {
        let tokens = lex(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expression()?;
        parser.expect_end()?;
        Ok(expr)
    }

    /// Parse a structured literal.
    ///
    /// The literal is first canonicalized to literal-source text, so inline
    /// literal defaults share the same grammar as string templates. Strings
    /// inside the structure are expression sources, not string literals.
    pub fn parse_value(input: &Value) -> Result<Expr, TemplateError> {
        match input {
            Value::String(s) => Expr::parse(s),
            other => Expr::parse(&canonicalize(other)),
        }
    }

    /// Evaluate the expression against a context.
    ///
    /// `None` is the missing-sentinel, distinct from `Some(Value::Null)`.
    #[must_use]
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Option<Value> {
        match self {
            Expr::Literal(v) => Some(v.clone()),
            Expr::Object(fields) => {
                let mut out = Map::new();
                for (key, expr) in fields {
                    if let Some(v) = expr.eval(ctx) {
                        out.insert(key.clone(), v);
                    }
                }
                Some(Value::Object(out))
            }
            Expr::Array(items) => Some(Value::Array(
                items.iter().filter_map(|e| e.eval(ctx)).collect(),
            )),
            Expr::Access { root, path } => eval_access(*root, path, ctx),
        }
    }
}

/// Canonicalize a structured literal into literal-source text.
///
/// Identifier-safe keys stay unquoted, all others are single-quoted with
/// escaping. Strings are emitted raw because they are expression sources.
#[must_use]
pub fn canonicalize(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Object(fields) => {
            let mut out = String::from("{");
            for (i, (key, child)) in fields.iter().enumerate() {
                if i != 0 {
                    out.push(',');
                }
                if is_identifier_safe(key) {
                    out.push_str(key);
                } else {
                    out.push('\'');
                    out.push_str(&key.replace('\'', "\\'"));
                    out.push('\'');
                }
                out.push(':');
                out.push_str(&canonicalize(child));
            }
            out.push('}');
            out
        }
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
    }
}

fn is_identifier_safe(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$')
}

fn root_for(ident: &str) -> Option<Root> {
    match ident {
        "$" | "$root" => Some(Root::Model),
        "$data" => Some(Root::Data),
        "$parent" => Some(Root::Parent),
        "$parents" => Some(Root::Parents),
        "$parentContext" => Some(Root::ParentContext),
        "$index" => Some(Root::Index),
        "$context" => Some(Root::Context),
        "$rawData" => Some(Root::RawData),
        "$$" => Some(Root::Builtins),
        _ => None,
    }
}

fn is_builtin(name: &str) -> bool {
    matches!(name, "default" | "merge" | "strip")
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Num(Number),
    Str(String),
    LBrace,
    RBrace,
    LBrack,
    RBrack,
    LParen,
    RParen,
    Comma,
    Colon,
    Dot,
}

fn ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '-'
}

fn lex(input: &str) -> Result<Vec<(usize, Tok)>, TemplateError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '{' => {
                tokens.push((start, Tok::LBrace));
                i += 1;
            }
            '}' => {
                tokens.push((start, Tok::RBrace));
                i += 1;
            }
            '[' => {
                tokens.push((start, Tok::LBrack));
                i += 1;
            }
            ']' => {
                tokens.push((start, Tok::RBrack));
                i += 1;
            }
            '(' => {
                tokens.push((start, Tok::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((start, Tok::RParen));
                i += 1;
            }
            ',' => {
                tokens.push((start, Tok::Comma));
                i += 1;
            }
            ':' => {
                tokens.push((start, Tok::Colon));
                i += 1;
            }
            '.' => {
                tokens.push((start, Tok::Dot));
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                let mut s = String::new();
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(TemplateError::Syntax {
                                pos: start,
                                message: "unterminated string literal".to_string(),
                            })
                        }
                        Some('\\') => {
                            if let Some(&escaped) = chars.get(i + 1) {
                                s.push(escaped);
                                i += 2;
                            } else {
                                i += 1;
                            }
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push((start, Tok::Str(s)));
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                while let Some(&ch) = chars.get(i) {
                    let fraction_dot = ch == '.'
                        && !text.contains('.')
                        && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
                    if ch.is_ascii_digit() || fraction_dot {
                        text.push(ch);
                        i += 1;
                    } else {
                        break;
                    }
                }
                let num = if let Ok(n) = text.parse::<i64>() {
                    Number::from(n)
                } else {
                    text.parse::<f64>()
                        .ok()
                        .and_then(Number::from_f64)
                        .ok_or(TemplateError::Syntax {
                            pos: start,
                            message: format!("invalid number literal `{text}`"),
                        })?
                };
                tokens.push((start, Tok::Num(num)));
            }
            c if ident_start(c) => {
                let mut name = String::new();
                while let Some(&ch) = chars.get(i) {
                    if ident_continue(ch) {
                        name.push(ch);
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push((start, Tok::Ident(name)));
            }
            other => {
                return Err(TemplateError::Syntax {
                    pos: start,
                    message: format!("unexpected character `{other}`"),
                })
            }
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<(usize, Tok)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |(p, _)| *p)
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::Syntax {
            pos: self.offset(),
            message: message.into(),
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<(), TemplateError> {
        match self.next() {
            Some(ref t) if t == tok => Ok(()),
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn expect_end(&self) -> Result<(), TemplateError> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(self.error("trailing input after expression"))
        }
    }

    fn expression(&mut self) -> Result<Expr, TemplateError> {
        match self.peek() {
            Some(Tok::LBrace) => self.object(),
            Some(Tok::LBrack) => self.array(),
            Some(Tok::Str(_)) => {
                let Some(Tok::Str(s)) = self.next() else {
                    unreachable!()
                };
                Ok(Expr::Literal(Value::String(s)))
            }
            Some(Tok::Num(_)) => {
                let Some(Tok::Num(n)) = self.next() else {
                    unreachable!()
                };
                Ok(Expr::Literal(Value::Number(n)))
            }
            Some(Tok::Ident(_)) => self.access(),
            _ => Err(self.error("expected an expression")),
        }
    }

    fn object(&mut self) -> Result<Expr, TemplateError> {
        self.expect(&Tok::LBrace, "`{`")?;
        let mut fields = Vec::new();
        if self.peek() == Some(&Tok::RBrace) {
            self.pos += 1;
            return Ok(Expr::Object(fields));
        }
        loop {
            let key = match self.next() {
                Some(Tok::Ident(name)) => name,
                Some(Tok::Str(s)) => s,
                _ => return Err(self.error("expected an object key")),
            };
            self.expect(&Tok::Colon, "`:` after object key")?;
            fields.push((key, self.expression()?));
            match self.next() {
                Some(Tok::Comma) => continue,
                Some(Tok::RBrace) => break,
                _ => return Err(self.error("expected `,` or `}` in object literal")),
            }
        }
        Ok(Expr::Object(fields))
    }

    fn array(&mut self) -> Result<Expr, TemplateError> {
        self.expect(&Tok::LBrack, "`[`")?;
        let mut items = Vec::new();
        if self.peek() == Some(&Tok::RBrack) {
            self.pos += 1;
            return Ok(Expr::Array(items));
        }
        loop {
            items.push(self.expression()?);
            match self.next() {
                Some(Tok::Comma) => continue,
                Some(Tok::RBrack) => break,
                _ => return Err(self.error("expected `,` or `]` in array literal")),
            }
        }
        Ok(Expr::Array(items))
    }

    fn access(&mut self) -> Result<Expr, TemplateError> {
        let base = match self.next() {
            Some(Tok::Ident(name)) => name,
            _ => return Err(self.error("expected an identifier")),
        };
        // Keyword literals share the identifier token space.
        match base.as_str() {
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            "null" => return Ok(Expr::Literal(Value::Null)),
            _ => {}
        }
        let (root, mut path) = match root_for(&base) {
            Some(root) => (root, Vec::new()),
            None => (Root::Scope, vec![Segment::Member(base)]),
        };
        loop {
            match self.peek() {
                Some(Tok::Dot) => {
                    self.pos += 1;
                    match self.next() {
                        Some(Tok::Ident(name)) => path.push(Segment::Member(name)),
                        _ => return Err(self.error("expected a member name after `.`")),
                    }
                }
                Some(Tok::LBrack) => {
                    self.pos += 1;
                    let key = self.expression()?;
                    self.expect(&Tok::RBrack, "`]` after bracket access")?;
                    path.push(Segment::Index(Box::new(key)));
                }
                Some(Tok::LParen) => {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() == Some(&Tok::RParen) {
                        self.pos += 1;
                    } else {
                        loop {
                            args.push(self.expression()?);
                            match self.next() {
                                Some(Tok::Comma) => continue,
                                Some(Tok::RParen) => break,
                                _ => {
                                    return Err(
                                        self.error("expected `,` or `)` in argument list")
                                    )
                                }
                            }
                        }
                    }
                    path.push(Segment::Call(args));
                }
                _ => break,
            }
        }
        Ok(Expr::Access { root, path })
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval_access(root: Root, path: &[Segment], ctx: &EvalContext<'_>) -> Option<Value> {
    // Built-in calls: `$$.name(args)` and the bare-call short form
    // `name(args)`, with optional trailing member access on the result.
    if let [Segment::Member(name), Segment::Call(args), rest @ ..] = path {
        let is_builtin_call = match root {
            Root::Builtins => true,
            Root::Scope => is_builtin(name),
            _ => false,
        };
        if is_builtin_call {
            let value = eval_builtin(name, args, ctx)?;
            return walk(&value, rest, ctx);
        }
    }
    match root {
        Root::Builtins => None,
        Root::Model | Root::Context => walk(ctx.root, path, ctx),
        Root::Data | Root::RawData => walk(ctx.data, path, ctx),
        Root::Parent => walk(ctx.parents.first()?, path, ctx),
        Root::Parents => {
            let parents = Value::Array(ctx.parents.to_vec());
            walk(&parents, path, ctx)
        }
        Root::ParentContext => {
            let record = parent_context_record(ctx);
            walk(&record, path, ctx)
        }
        Root::Index => {
            let index = Value::Number(Number::from(ctx.index?));
            walk(&index, path, ctx)
        }
        Root::Scope => {
            // Context-root names win; otherwise fall back to the data model.
            let Some(Segment::Member(first)) = path.first() else {
                return None;
            };
            if ctx.root.get(first).is_some() {
                walk(ctx.root, path, ctx)
            } else {
                walk(ctx.data, path, ctx)
            }
        }
    }
}

/// Materialized `$parentContext` record: the evaluation context one nesting
/// level up, exposed as a plain object so member access stays uniform.
fn parent_context_record(ctx: &EvalContext<'_>) -> Value {
    let mut record = Map::new();
    if let Some(parent) = ctx.parents.first() {
        record.insert("$data".to_string(), parent.clone());
        record.insert("$rawData".to_string(), parent.clone());
    }
    if let Some(grandparent) = ctx.parents.get(1) {
        record.insert("$parent".to_string(), grandparent.clone());
    }
    record.insert(
        "$parents".to_string(),
        Value::Array(ctx.parents.iter().skip(1).cloned().collect()),
    );
    Value::Object(record)
}

fn walk(start: &Value, path: &[Segment], ctx: &EvalContext<'_>) -> Option<Value> {
    let mut cur = start;
    for segment in path {
        match segment {
            Segment::Member(name) => {
                cur = cur.get(name.as_str())?;
            }
            Segment::Index(expr) => {
                let key = expr.eval(ctx)?;
                cur = index_into(cur, &key)?;
            }
            // The data model holds no callables; only built-ins are
            // invocable, and those are handled before the walk.
            Segment::Call(_) => return None,
        }
    }
    Some(cur.clone())
}

fn index_into<'v>(value: &'v Value, key: &Value) -> Option<&'v Value> {
    match (value, key) {
        (Value::Array(items), Value::Number(n)) => items.get(n.as_u64()? as usize),
        (Value::Object(map), Value::String(s)) => map.get(s),
        (Value::Object(map), Value::Number(n)) => map.get(&n.to_string()),
        _ => None,
    }
}

fn eval_builtin(name: &str, args: &[Expr], ctx: &EvalContext<'_>) -> Option<Value> {
    match name {
        // Fallback applies only to the missing-sentinel, never to explicit
        // null.
        "default" => args
            .first()?
            .eval(ctx)
            .or_else(|| args.get(1).and_then(|fallback| fallback.eval(ctx))),
        "merge" => {
            let a = args.first().and_then(|e| e.eval(ctx));
            let b = args.get(1).and_then(|e| e.eval(ctx));
            match (a, b) {
                (Some(Value::Object(a)), Some(Value::Object(b))) => {
                    let mut merged = a;
                    for (key, value) in b {
                        merged.entry(key).or_insert(value);
                    }
                    Some(Value::Object(merged))
                }
                (Some(a), _) => Some(a),
                (None, b) => b,
            }
        }
        "strip" => {
            let obj = args.first()?.eval(ctx)?;
            let keys = args.get(1)?.eval(ctx)?;
            let Value::Object(mut map) = obj else {
                return Some(obj);
            };
            match keys {
                Value::String(key) => {
                    map.remove(&key);
                }
                Value::Array(keys) => {
                    for key in keys {
                        if let Value::String(key) = key {
                            map.remove(&key);
                        }
                    }
                }
                _ => {}
            }
            Some(Value::Object(map))
        }
        _ => None,
    }
}
