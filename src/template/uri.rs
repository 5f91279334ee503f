//! URI templates.
//!
//! A `uri` template field gets dedicated treatment: `{name}` placeholders
//! percent-encode their expansion, `{/name}` emits a slash-prefixed segment
//! only when the value is present, and `{+name}` substitutes reserved
//! characters unencoded (arrays joined with `/`). When the whole template is
//! a single placeholder, its value passes through natively so structured
//! URI values survive expansion.

use serde_json::Value;

use super::expression::{EvalContext, Expr, Root, Segment};
use super::{split_placeholders, Part, TemplateError};

#[derive(Debug, Clone, PartialEq)]
enum UriPart {
    Lit(String),
    /// `{expr}`: percent-encoded substitution.
    Simple(Expr),
    /// `{/name}`: optional slash-prefixed segment, omitted when missing.
    OptionalSegment(String),
    /// `{+name}`: reserved substitution, emitted unencoded.
    Reserved(String),
}

/// A compiled URI template.
#[derive(Debug, Clone, PartialEq)]
pub struct UriTemplate {
    parts: Vec<UriPart>,
}

impl UriTemplate {
    /// Compile a URI template from source.
    ///
    /// # Errors
    ///
    /// [`TemplateError`] on unbalanced braces or a malformed placeholder
    /// expression.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut parts = Vec::new();
        for part in split_placeholders(source)? {
            match part {
                Part::Lit(text) => parts.push(UriPart::Lit(text)),
                Part::Placeholder(inner) => {
                    if let Some(name) = inner.strip_prefix('/') {
                        parts.push(UriPart::OptionalSegment(name.trim().to_string()));
                    } else if let Some(name) = inner.strip_prefix('+') {
                        parts.push(UriPart::Reserved(name.trim().to_string()));
                    } else {
                        parts.push(UriPart::Simple(Expr::parse(&inner)?));
                    }
                }
            }
        }
        Ok(Self { parts })
    }

    /// Expand the template against a context.
    ///
    /// Returns `None` only when a whole-template placeholder is missing;
    /// missing values inside a larger template expand to nothing.
    #[must_use]
    pub fn expand(&self, ctx: &EvalContext<'_>) -> Option<Value> {
        // Whole-template placeholders pass their value through natively.
        if let [UriPart::Simple(expr)] = self.parts.as_slice() {
            return expr.eval(ctx);
        }
        let mut out = String::new();
        for part in &self.parts {
            match part {
                UriPart::Lit(text) => out.push_str(text),
                UriPart::Simple(expr) => {
                    if let Some(value) = expr.eval(ctx) {
                        out.push_str(&urlencoding::encode(&coerce(&value)));
                    }
                }
                UriPart::OptionalSegment(name) => {
                    if let Some(value) = lookup(name, ctx) {
                        out.push('/');
                        out.push_str(&urlencoding::encode(&coerce(&value)));
                    }
                }
                UriPart::Reserved(name) => match lookup(name, ctx) {
                    Some(Value::Array(items)) => {
                        let joined: Vec<String> = items.iter().map(coerce).collect();
                        out.push_str(&joined.join("/"));
                    }
                    Some(value) => out.push_str(&coerce(&value)),
                    None => {}
                },
            }
        }
        Some(Value::String(out))
    }
}

fn lookup(name: &str, ctx: &EvalContext<'_>) -> Option<Value> {
    let expr = Expr::Access {
        root: Root::Scope,
        path: vec![Segment::Member(name.to_string())],
    };
    expr.eval(ctx)
}

fn coerce(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn expand(template: &str, data: &Value) -> Option<Value> {
        let ctx = EvalContext {
            root: &Value::Null,
            data,
            parents: &[],
            index: None,
        };
        UriTemplate::parse(template).unwrap().expand(&ctx)
    }

    #[test]
    fn simple_placeholders_are_percent_encoded() {
        let data = json!({ "title": "Tall grass", "domain": "x.org" });
        assert_eq!(
            expand("/{domain}/v1/page/{title}", &data),
            Some(json!("/x.org/v1/page/Tall%20grass"))
        );
    }

    #[test]
    fn optional_segment_is_omitted_when_missing() {
        let data = json!({ "title": "Foo" });
        assert_eq!(
            expand("/page/{title}{/revision}", &data),
            Some(json!("/page/Foo"))
        );
        let data = json!({ "title": "Foo", "revision": 42 });
        assert_eq!(
            expand("/page/{title}{/revision}", &data),
            Some(json!("/page/Foo/42"))
        );
    }

    #[test]
    fn reserved_substitution_joins_arrays_unencoded() {
        let data = json!({ "path": ["a b", "c/d"] });
        assert_eq!(expand("/base/{+path}", &data), Some(json!("/base/a b/c/d")));
        let data = json!({ "path": "x/y z" });
        assert_eq!(expand("/base/{+path}", &data), Some(json!("/base/x/y z")));
    }

    #[test]
    fn whole_template_placeholder_passes_values_through() {
        let data = json!({ "location": { "host": "h", "path": "/p" } });
        assert_eq!(
            expand("{location}", &data),
            Some(json!({ "host": "h", "path": "/p" }))
        );
        assert_eq!(expand("{missing}", &data), None);
    }
}
