//! Routing seam and the pattern-based reference router.
//!
//! The dispatcher treats routing as an injected capability: anything that
//! can turn a normalized path into a [`RouteMatch`] works. [`PatternRouter`]
//! is the built-in implementation, compiling every registered path template
//! into a single [`PatternSwitch`](crate::pattern::PatternSwitch) pass.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use serde_json::{Map, Value};

use crate::dispatcher::Handler;
use crate::error::GatewayError;
use crate::pattern::{self, PatternSwitch};

/// Injected routing capability.
pub trait Router: Send + Sync {
    /// Resolve a normalized path to a route, or `None` when nothing matches.
    fn route(&self, path: &str) -> Option<RouteMatch>;
}

/// Optional per-route request validation, run after routing and before the
/// handler.
pub trait RequestValidator: Send + Sync {
    /// # Errors
    ///
    /// [`GatewayError::Validation`] describing the failed constraint.
    fn validate(&self, req: &crate::dispatcher::Request) -> Result<(), GatewayError>;
}

/// A successful routing decision: extracted path parameters plus the
/// matched route's handler table and metadata.
#[derive(Clone)]
pub struct RouteMatch {
    /// Path parameters extracted from the URI, by template variable name.
    pub params: Map<String, Value>,
    pub value: Arc<RouteValue>,
}

/// Everything registered against one path template.
pub struct RouteValue {
    /// The path template, used as the base of the route's stat name.
    pub path: String,
    pub methods: MethodTable,
    /// Root of the API spec that declared this route, when one did. Drives
    /// `?spec` listing responses and auth binding.
    pub spec_root: Option<Value>,
    /// Permissions the access-control middleware must verify.
    pub permissions: Vec<String>,
    pub validator: Option<Arc<dyn RequestValidator>>,
}

/// Per-method handler slots with an optional catch-all.
#[derive(Default, Clone)]
pub struct MethodTable {
    pub get: Option<Arc<dyn Handler>>,
    pub head: Option<Arc<dyn Handler>>,
    pub post: Option<Arc<dyn Handler>>,
    pub put: Option<Arc<dyn Handler>>,
    pub delete: Option<Arc<dyn Handler>>,
    pub options: Option<Arc<dyn Handler>>,
    /// Fallback handler for any method without an explicit slot.
    pub all: Option<Arc<dyn Handler>>,
}

impl MethodTable {
    /// Exact-method lookup; the catch-all and HEAD-to-GET fallbacks are the
    /// dispatcher's concern, not the table's.
    #[must_use]
    pub fn get_exact(&self, method: &Method) -> Option<Arc<dyn Handler>> {
        let slot = match *method {
            Method::GET => &self.get,
            Method::HEAD => &self.head,
            Method::POST => &self.post,
            Method::PUT => &self.put,
            Method::DELETE => &self.delete,
            Method::OPTIONS => &self.options,
            _ => &None,
        };
        slot.clone()
    }

    pub fn insert(&mut self, method: Method, handler: Arc<dyn Handler>) {
        match method {
            Method::GET => self.get = Some(handler),
            Method::HEAD => self.head = Some(handler),
            Method::POST => self.post = Some(handler),
            Method::PUT => self.put = Some(handler),
            Method::DELETE => self.delete = Some(handler),
            Method::OPTIONS => self.options = Some(handler),
            _ => self.all = Some(handler),
        }
    }

    pub fn insert_all(&mut self, handler: Arc<dyn Handler>) {
        self.all = Some(handler);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.get.is_none()
            && self.head.is_none()
            && self.post.is_none()
            && self.put.is_none()
            && self.delete.is_none()
            && self.options.is_none()
            && self.all.is_none()
    }
}

struct PatternEntry {
    /// Template variable names in capture order.
    names: Vec<String>,
    /// Child segment names for the listing of this route's directory form,
    /// when the route was registered with one.
    listing: Option<Vec<String>>,
    value: Arc<RouteValue>,
}

/// Builder-side registration record for [`PatternRouter`].
pub struct RouteSpec {
    pub path: String,
    pub methods: MethodTable,
    pub spec_root: Option<Value>,
    pub permissions: Vec<String>,
    pub validator: Option<Arc<dyn RequestValidator>>,
    pub listing: Option<Vec<String>>,
}

impl RouteSpec {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            methods: MethodTable::default(),
            spec_root: None,
            permissions: Vec::new(),
            validator: None,
            listing: None,
        }
    }

    #[must_use]
    pub fn on(mut self, method: Method, handler: Arc<dyn Handler>) -> Self {
        self.methods.insert(method, handler);
        self
    }

    #[must_use]
    pub fn on_all(mut self, handler: Arc<dyn Handler>) -> Self {
        self.methods.insert_all(handler);
        self
    }

    #[must_use]
    pub fn with_spec_root(mut self, spec_root: Value) -> Self {
        self.spec_root = Some(spec_root);
        self
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn RequestValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Register the child segments listed for the directory form of this
    /// route (trailing-slash GET without a handler).
    #[must_use]
    pub fn with_listing(mut self, children: Vec<String>) -> Self {
        self.listing = Some(children);
        self
    }
}

/// Reference router: all registered path templates compiled into one
/// combined regex pass.
///
/// Templates use `{name}` segments, e.g. `/{domain}/v1/page/{title}`. Each
/// `{name}` matches one path segment; literal text is regex-escaped.
pub struct PatternRouter {
    switch: PatternSwitch<PatternEntry>,
}

impl PatternRouter {
    /// Compile a set of route registrations.
    ///
    /// Registration order is match priority.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Internal`] when a generated pattern does not compile,
    /// which indicates a malformed template.
    pub fn compile(routes: Vec<RouteSpec>) -> Result<Self, GatewayError> {
        let mut patterns = Vec::with_capacity(routes.len());
        for spec in routes {
            let (source, names) = template_to_pattern(&spec.path);
            let entry = PatternEntry {
                names,
                listing: spec.listing,
                value: Arc::new(RouteValue {
                    path: spec.path,
                    methods: spec.methods,
                    spec_root: spec.spec_root,
                    permissions: spec.permissions,
                    validator: spec.validator,
                }),
            };
            patterns.push((source, entry));
        }
        let switch = PatternSwitch::compile(patterns).map_err(|e| GatewayError::Internal {
            message: format!("route template failed to compile: {e}"),
        })?;
        Ok(Self { switch })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.switch.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.switch.is_empty()
    }
}

impl Router for PatternRouter {
    fn route(&self, path: &str) -> Option<RouteMatch> {
        let m = self.switch.match_input(path)?;
        let entry = m.value;
        let mut params = Map::new();
        for (name, capture) in entry.names.iter().zip(m.captures.iter().skip(1)) {
            if let Some(text) = *capture {
                let decoded = urlencoding::decode(text)
                    .map_or_else(|_| text.to_string(), |d| d.into_owned());
                params.insert(name.clone(), Value::String(decoded));
            }
        }
        if let Some(children) = &entry.listing {
            params.insert(
                "_ls".to_string(),
                Value::Array(children.iter().cloned().map(Value::String).collect()),
            );
        }
        Some(RouteMatch {
            params,
            value: Arc::clone(&entry.value),
        })
    }
}

/// Translate a `{name}`-style path template into an anchored regex source
/// plus the variable names in capture order.
fn template_to_pattern(template: &str) -> (String, Vec<String>) {
    let mut source = String::from("^");
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        source.push_str(&pattern::escape(&rest[..open]));
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                names.push(after[..close].to_string());
                source.push_str("([^/]+)");
                rest = &after[close + 1..];
            }
            None => {
                // Unbalanced brace: treat the remainder literally.
                source.push_str(&pattern::escape(&rest[open..]));
                rest = "";
            }
        }
    }
    source.push_str(&pattern::escape(rest));
    source.push('$');
    (source, names)
}

/// Normalize a request path for routing: strip the query string and any
/// trailing slash (the dispatcher re-reads the raw URI for listing
/// detection).
#[must_use]
pub fn normalize_path(uri: &str) -> &str {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

/// Split the query string of a URI into a map. Later duplicates win.
#[must_use]
pub fn parse_query(uri: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Some((_, query)) = uri.split_once('?') else {
        return out;
    };
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode(key).map_or_else(|_| key.to_string(), |d| d.into_owned());
        let value =
            urlencoding::decode(value).map_or_else(|_| value.to_string(), |d| d.into_owned());
        out.insert(key, value);
    }
    out
}
