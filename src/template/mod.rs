//! Request/response template engine.
//!
//! Templates are JSON-shaped values compiled once and expanded many times.
//! Strings may embed `{...}` expression placeholders; objects and arrays
//! are expanded structurally. Compilation produces an immutable tree that
//! is memoized process-wide by template source, so repeated construction of
//! the same template is a cache hit.
//!
//! Expansion resolves short-notation names against a field scope: at the
//! top level of a template object, expressions under `uri` resolve against
//! the request's path parameters, under `headers` against its headers,
//! under `query` against its query and under `body` against its body.
//! Everything else sees the root model (`request`, `additional_context`).
//!
//! Missing values follow the missing-sentinel discipline: a missing object
//! field omits its key, a missing array element is dropped, and a missing
//! interpolation part renders as the empty string.

pub mod expression;
pub mod uri;

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use thiserror::Error;

use self::expression::{EvalContext, Expr};
use self::uri::UriTemplate;

/// Template compilation failure.
#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("syntax error at offset {pos}: {message}")]
    Syntax { pos: usize, message: String },
    #[error("unbalanced braces in template string")]
    UnbalancedBraces,
}

/// One slice of a string template: literal text or placeholder contents.
#[derive(Debug, PartialEq)]
pub(crate) enum Part {
    Lit(String),
    Placeholder(String),
}

/// Split a string template on `{...}` placeholders.
///
/// Placeholders may nest braces (object literals in expressions) and may
/// contain quoted strings in which braces do not count.
pub(crate) fn split_placeholders(source: &str) -> Result<Vec<Part>, TemplateError> {
    let mut parts = Vec::new();
    let mut lit = String::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        if chars[i] != '{' {
            if chars[i] == '}' {
                return Err(TemplateError::UnbalancedBraces);
            }
            lit.push(chars[i]);
            i += 1;
            continue;
        }
        if !lit.is_empty() {
            parts.push(Part::Lit(std::mem::take(&mut lit)));
        }
        let mut depth = 1usize;
        let mut inner = String::new();
        let mut quote: Option<char> = None;
        i += 1;
        loop {
            let Some(&c) = chars.get(i) else {
                return Err(TemplateError::UnbalancedBraces);
            };
            i += 1;
            match quote {
                Some(q) => {
                    inner.push(c);
                    if c == '\\' {
                        if let Some(&escaped) = chars.get(i) {
                            inner.push(escaped);
                            i += 1;
                        }
                    } else if c == q {
                        quote = None;
                    }
                }
                None => match c {
                    '\'' | '"' => {
                        quote = Some(c);
                        inner.push(c);
                    }
                    '{' => {
                        depth += 1;
                        inner.push(c);
                    }
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                        inner.push(c);
                    }
                    other => inner.push(other),
                },
            }
        }
        parts.push(Part::Placeholder(inner));
    }
    if !lit.is_empty() {
        parts.push(Part::Lit(lit));
    }
    Ok(parts)
}

#[derive(Debug)]
enum InterpPart {
    Lit(String),
    Expr(Expr),
}

#[derive(Debug)]
enum Node {
    Literal(Value),
    /// A string that is exactly one placeholder; expands to the value
    /// itself, preserving its type.
    Single(Expr),
    /// A string mixing literal text and placeholders; expands to a string.
    Interp(Vec<InterpPart>),
    Object(Vec<(String, Node)>),
    Array(Vec<Node>),
    Uri(UriTemplate),
}

static TEMPLATE_CACHE: Lazy<DashMap<String, Arc<Node>>> = Lazy::new(DashMap::new);

/// A compiled template.
#[derive(Debug, Clone)]
pub struct Template {
    node: Arc<Node>,
}

impl Template {
    /// Compile a template, reusing a previously compiled tree when the same
    /// source was seen before.
    ///
    /// # Errors
    ///
    /// [`TemplateError`] on malformed placeholder syntax.
    pub fn new(source: &Value) -> Result<Self, TemplateError> {
        let key = source.to_string();
        if let Some(node) = TEMPLATE_CACHE.get(&key) {
            return Ok(Self {
                node: Arc::clone(&node),
            });
        }
        let node = Arc::new(compile(source, true)?);
        TEMPLATE_CACHE.insert(key, Arc::clone(&node));
        Ok(Self { node })
    }

    /// Expand the template against a context.
    ///
    /// `None` means the whole template evaluated to the missing-sentinel.
    #[must_use]
    pub fn expand(&self, ctx: &ExpansionContext) -> Option<Value> {
        let root = ctx.root_model();
        expand_node(&self.node, &root, &root, ctx, true)
    }
}

/// Context a template is expanded against.
#[derive(Debug, Clone, Default)]
pub struct ExpansionContext {
    /// Request model: `method`, `uri`, `params`, `headers`, `query`, `body`.
    pub request: Value,
    /// Enclosing request models, nearest first.
    pub parents: Vec<Value>,
    /// Caller-supplied extras, exposed as `additional_context`.
    pub additional_context: Value,
}

impl ExpansionContext {
    #[must_use]
    pub fn new(request: Value) -> Self {
        Self {
            request,
            parents: Vec::new(),
            additional_context: Value::Null,
        }
    }

    #[must_use]
    pub fn with_parents(mut self, parents: Vec<Value>) -> Self {
        self.parents = parents;
        self
    }

    #[must_use]
    pub fn with_additional(mut self, additional: Value) -> Self {
        self.additional_context = additional;
        self
    }

    fn root_model(&self) -> Value {
        let mut root = Map::new();
        root.insert("request".to_string(), self.request.clone());
        root.insert(
            "additional_context".to_string(),
            self.additional_context.clone(),
        );
        Value::Object(root)
    }
}

fn compile(source: &Value, top: bool) -> Result<Node, TemplateError> {
    match source {
        Value::String(s) => compile_string(s),
        Value::Object(fields) => {
            let mut out = Vec::with_capacity(fields.len());
            for (key, child) in fields {
                let node = match child {
                    // The `uri` field of a request template gets URI
                    // placeholder semantics.
                    Value::String(s) if top && key == "uri" => {
                        Node::Uri(UriTemplate::parse(s)?)
                    }
                    other => compile(other, false)?,
                };
                out.push((key.clone(), node));
            }
            Ok(Node::Object(out))
        }
        Value::Array(items) => {
            let nodes = items
                .iter()
                .map(|item| compile(item, false))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Node::Array(nodes))
        }
        other => Ok(Node::Literal(other.clone())),
    }
}

fn compile_string(source: &str) -> Result<Node, TemplateError> {
    let mut parts = split_placeholders(source)?;
    match parts.len() {
        0 => Ok(Node::Literal(Value::String(String::new()))),
        1 => match parts.remove(0) {
            Part::Lit(_) => Ok(Node::Literal(Value::String(source.to_string()))),
            Part::Placeholder(inner) => Ok(Node::Single(Expr::parse(&inner)?)),
        },
        _ => {
            let mut interp = Vec::with_capacity(parts.len());
            for part in parts {
                interp.push(match part {
                    Part::Lit(text) => InterpPart::Lit(text),
                    Part::Placeholder(inner) => InterpPart::Expr(Expr::parse(&inner)?),
                });
            }
            Ok(Node::Interp(interp))
        }
    }
}

/// Field scope: the data model short notation resolves against, per
/// top-level template field.
fn scope_model<'a>(key: &str, root: &'a Value) -> Option<&'a Value> {
    let request = root.get("request")?;
    match key {
        "uri" | "params" => request.get("params"),
        "headers" => request.get("headers"),
        "query" => request.get("query"),
        "body" => request.get("body"),
        _ => None,
    }
}

fn expand_node(
    node: &Node,
    root: &Value,
    data: &Value,
    ctx: &ExpansionContext,
    top: bool,
) -> Option<Value> {
    let eval_ctx = EvalContext {
        root,
        data,
        parents: &ctx.parents,
        index: None,
    };
    match node {
        Node::Literal(v) => Some(v.clone()),
        Node::Single(expr) => expr.eval(&eval_ctx),
        Node::Interp(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    InterpPart::Lit(text) => out.push_str(text),
                    InterpPart::Expr(expr) => {
                        if let Some(value) = expr.eval(&eval_ctx) {
                            out.push_str(&stringify(&value));
                        }
                    }
                }
            }
            Some(Value::String(out))
        }
        Node::Object(fields) => {
            let mut out = Map::new();
            for (key, child) in fields {
                let child_data = if top {
                    scope_model(key, root).unwrap_or(data)
                } else {
                    data
                };
                if let Some(value) = expand_node(child, root, child_data, ctx, false) {
                    out.insert(key.clone(), value);
                }
            }
            Some(Value::Object(out))
        }
        Node::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter_map(|item| expand_node(item, root, data, ctx, false))
                .collect(),
        )),
        Node::Uri(template) => {
            let uri_ctx = EvalContext {
                root,
                data: scope_model("uri", root).unwrap_or(data),
                parents: &ctx.parents,
                index: None,
            };
            template.expand(&uri_ctx)
        }
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
