//! Gateway dispatch core.
//!
//! A [`Gateway`] routes requests to handlers, and hands handlers a child
//! gateway so they can issue sub-requests through the same pipeline. Each
//! dispatch level records its position in a context arena; the chain of
//! frames reconstructs the full ancestor path when the recursion bound is
//! exceeded, and the bound itself turns accidental dispatch cycles into a
//! clean 500 instead of a stack overflow.
//!
//! Requests with absolute URIs bypass routing and go to the outbound
//! transport. Everything else is matched against the router, checked
//! against the reserved `/sys` namespace at the external boundary, wrapped
//! in access-control and metrics middleware, and executed.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use http::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{AncestorInfo, GatewayError};
use crate::ids::{RequestId, REQUEST_ID_HEADER};
use crate::metrics::{Metrics, NullMetrics};
use crate::middleware;
use crate::router::{self, RouteMatch, RouteValue, Router};
use crate::security::{AuthBackend, AuthService, TokenCodec};
use crate::transport::OutboundTransport;

/// An in-flight request.
///
/// Headers and query keys are lowercase by convention; bodies are JSON
/// values, with [`Value::Null`] meaning no body.
#[derive(Debug, Clone)]
pub struct Request {
    pub uri: String,
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Value,
    /// Path parameters; populated by routing, but callers may pre-set them.
    pub params: Map<String, Value>,
}

impl Request {
    #[must_use]
    pub fn builder(uri: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(uri)
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Whether the URI is absolute and therefore an outbound request.
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        self.uri.starts_with("http://") || self.uri.starts_with("https://")
    }

    /// Whether the request targets the reserved internal namespace, either
    /// by extracted `api` parameter or by raw path shape
    /// (`/{domain}/sys/...`).
    #[must_use]
    pub fn targets_reserved_namespace(&self) -> bool {
        if self.params.get("api").and_then(Value::as_str) == Some("sys") {
            return true;
        }
        let path = self.uri.split(['?', '#']).next().unwrap_or("");
        path.split('/').filter(|s| !s.is_empty()).nth(1) == Some("sys")
    }

    /// Model of this request for template expansion.
    #[must_use]
    pub fn to_model(&self) -> Value {
        json!({
            "method": self.method.as_str().to_lowercase(),
            "uri": self.uri,
            "params": Value::Object(self.params.clone()),
            "headers": self.headers,
            "query": self.query,
            "body": self.body,
        })
    }
}

/// Builder filling in the fixed defaults every dispatched request carries:
/// GET, empty headers, empty query, no body, no params.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    uri: String,
    method: Method,
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
    body: Value,
    params: Map<String, Value>,
}

impl RequestBuilder {
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            method: Method::GET,
            headers: HashMap::new(),
            query: HashMap::new(),
            body: Value::Null,
            params: Map::new(),
        }
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn build(self) -> Request {
        Request {
            uri: self.uri,
            method: self.method,
            headers: self.headers,
            query: self.query,
            body: self.body,
            params: self.params,
        }
    }
}

/// A handler's response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl Response {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Value::Null,
        }
    }

    /// A JSON response with `content-type` set.
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        let mut resp = Self::new(status);
        resp.headers.insert(
            "content-type".to_string(),
            "application/json".to_string(),
        );
        resp.body = body;
        resp
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_lowercase(), value.into());
        self
    }
}

/// A request handler.
///
/// Handlers receive the gateway bound to their dispatch level; sub-requests
/// issued through it count against the recursion bound. `Ok(None)` means
/// the handler produced nothing, which the dispatcher rejects as an
/// internal error.
pub trait Handler: Send + Sync {
    fn handle(&self, gateway: &Gateway, req: Request) -> Result<Option<Response>, GatewayError>;
}

impl<F> Handler for F
where
    F: Fn(&Gateway, Request) -> Result<Option<Response>, GatewayError> + Send + Sync,
{
    fn handle(&self, gateway: &Gateway, req: Request) -> Result<Option<Response>, GatewayError> {
        self(gateway, req)
    }
}

/// Wrap a closure as a shared [`Handler`].
#[must_use]
pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn(&Gateway, Request) -> Result<Option<Response>, GatewayError> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Clone)]
struct ContextFrame {
    parent: Option<usize>,
    uri: String,
    method: String,
}

/// Append-only store of dispatch frames for one dispatch tree. Every level
/// of the tree shares the same arena; it drops with the tree, so frames
/// never outlive the top-level request that created them.
#[derive(Debug, Default)]
struct ContextArena {
    frames: Mutex<Vec<ContextFrame>>,
}

impl ContextArena {
    fn push(&self, parent: Option<usize>, uri: &str, method: &Method) -> usize {
        let mut frames = self
            .frames
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        frames.push(ContextFrame {
            parent,
            uri: uri.to_string(),
            method: method.as_str().to_string(),
        });
        frames.len() - 1
    }

    /// Ancestor chain from a frame to the root, nearest first.
    fn ancestors(&self, from: Option<usize>) -> Vec<AncestorInfo> {
        let frames = self
            .frames
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut out = Vec::new();
        let mut cursor = from;
        while let Some(idx) = cursor {
            let Some(frame) = frames.get(idx) else { break };
            out.push(AncestorInfo {
                uri: frame.uri.clone(),
                method: frame.method.clone(),
            });
            cursor = frame.parent;
        }
        out
    }
}

struct GatewayInner {
    config: GatewayConfig,
    router: Arc<dyn Router>,
    transport: Option<Arc<dyn OutboundTransport>>,
    metrics: Arc<dyn Metrics>,
    auth_backend: Option<Arc<dyn AuthBackend>>,
    codec: TokenCodec,
}

/// The dispatch entry point.
///
/// Cloning is cheap; a clone shares routing state and configuration but
/// keeps its own dispatch position. Handlers receive a child gateway one
/// level deeper than their caller, bound to the context arena of its
/// dispatch tree.
pub struct Gateway {
    inner: Arc<GatewayInner>,
    arena: Arc<ContextArena>,
    ctx: Option<usize>,
    depth: u32,
    request_id: Option<RequestId>,
    root_request: Option<Arc<Request>>,
    auth: Mutex<Option<Arc<dyn AuthService>>>,
}

impl Clone for Gateway {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            arena: Arc::clone(&self.arena),
            ctx: self.ctx,
            depth: self.depth,
            request_id: self.request_id,
            root_request: self.root_request.clone(),
            auth: Mutex::new(self.auth_service()),
        }
    }
}

struct NoRoutes;

impl Router for NoRoutes {
    fn route(&self, _path: &str) -> Option<RouteMatch> {
        None
    }
}

/// Builder wiring a [`Gateway`] from its collaborators.
pub struct GatewayBuilder {
    config: GatewayConfig,
    router: Option<Arc<dyn Router>>,
    transport: Option<Arc<dyn OutboundTransport>>,
    metrics: Option<Arc<dyn Metrics>>,
    auth_backend: Option<Arc<dyn AuthBackend>>,
}

impl GatewayBuilder {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            router: None,
            transport: None,
            metrics: None,
            auth_backend: None,
        }
    }

    #[must_use]
    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn OutboundTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn auth_backend(mut self, backend: Arc<dyn AuthBackend>) -> Self {
        self.auth_backend = Some(backend);
        self
    }

    #[must_use]
    pub fn build(self) -> Gateway {
        let codec = TokenCodec::new(self.config.salt.clone());
        Gateway {
            inner: Arc::new(GatewayInner {
                config: self.config,
                router: self.router.unwrap_or_else(|| Arc::new(NoRoutes)),
                transport: self.transport,
                metrics: self.metrics.unwrap_or_else(|| Arc::new(NullMetrics)),
                auth_backend: self.auth_backend,
                codec,
            }),
            arena: Arc::new(ContextArena::default()),
            ctx: None,
            depth: 0,
            request_id: None,
            root_request: None,
            auth: Mutex::new(None),
        }
    }
}

impl Gateway {
    #[must_use]
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Current dispatch depth; 0 at the external boundary.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Request id of the dispatch tree, once one has been adopted.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }

    /// The request that entered the dispatch tree at depth 0.
    #[must_use]
    pub fn root_request(&self) -> Option<&Request> {
        self.root_request.as_deref()
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub(crate) fn metrics(&self) -> &dyn Metrics {
        self.inner.metrics.as_ref()
    }

    /// Sign a paging continuation value into an opaque token.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Internal`] when the value cannot be signed.
    pub fn encode_token(&self, value: &Value) -> Result<String, GatewayError> {
        self.inner.codec.encode_token(value)
    }

    /// Verify and decode a paging token.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidPagingToken`] on malformed or tampered input.
    pub fn decode_token(&self, token: &str) -> Result<Value, GatewayError> {
        self.inner.codec.decode_token(token)
    }

    pub(crate) fn auth_service(&self) -> Option<Arc<dyn AuthService>> {
        self.auth
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// The bound auth service, binding one lazily from the backend against
    /// the declaring spec the first time a route needs it.
    pub(crate) fn bind_auth(&self, spec_root: Option<&Value>) -> Option<Arc<dyn AuthService>> {
        let mut slot = self
            .auth
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if slot.is_none() {
            if let Some(backend) = &self.inner.auth_backend {
                *slot = Some(backend.bind(spec_root));
            }
        }
        slot.clone()
    }

    /// Dispatch a request through the gateway.
    ///
    /// # Errors
    ///
    /// Any [`GatewayError`]; use [`GatewayError::to_response`] to render the
    /// canonical error body at the outer edge.
    pub fn dispatch(&self, req: Request) -> Result<Response, GatewayError> {
        if req.is_absolute() {
            return self.dispatch_outbound(req);
        }
        if self.depth > self.inner.config.max_depth {
            let ancestors = self.arena.ancestors(self.ctx);
            warn!(
                uri = %req.uri,
                method = %req.method,
                depth = self.depth,
                "request recursion depth exceeded"
            );
            return Err(GatewayError::RecursionDepthExceeded {
                uri: req.uri,
                method: req.method.as_str().to_string(),
                depth: self.depth,
                ancestors,
            });
        }

        let mut req = req;
        if req.query.is_empty() {
            req.query = router::parse_query(&req.uri);
        }

        // The internal namespace is reachable only from within a dispatch
        // tree, never from the external boundary. Denied before routing, so
        // the answer does not leak whether such a route exists.
        if self.depth == 0 && req.targets_reserved_namespace() {
            return Err(GatewayError::ReservedNamespaceDenied { uri: req.uri });
        }

        let path = router::normalize_path(&req.uri).to_string();
        let Some(matched) = self.inner.router.route(&path) else {
            return Err(GatewayError::NotFound {
                uri: req.uri,
                method: req.method.as_str().to_string(),
                depth: self.depth,
            });
        };
        req.params = matched.params.clone();

        let Some(handler) = self.resolve_handler(&matched, &req) else {
            return Err(GatewayError::NotFound {
                uri: req.uri,
                method: req.method.as_str().to_string(),
                depth: self.depth,
            });
        };

        let child = self.make_child(&req);
        debug!(
            request_id = %child.request_id.unwrap_or_default(),
            uri = %req.uri,
            method = %req.method,
            depth = child.depth,
            route = %matched.value.path,
            "dispatching"
        );

        let value = Arc::clone(&matched.value);
        let method = req.method.clone();
        middleware::access::enforce(&child, &value, req, |req| {
            middleware::metrics::timed(&child, &value.path, &method, || {
                Self::invoke(&handler, &child, &value, req)
            })
        })
    }

    /// GET convenience verb.
    ///
    /// # Errors
    ///
    /// See [`Gateway::dispatch`].
    pub fn get(&self, uri: impl Into<String>) -> Result<Response, GatewayError> {
        self.dispatch(Request::builder(uri).build())
    }

    /// HEAD convenience verb.
    ///
    /// # Errors
    ///
    /// See [`Gateway::dispatch`].
    pub fn head(&self, uri: impl Into<String>) -> Result<Response, GatewayError> {
        self.dispatch(Request::builder(uri).method(Method::HEAD).build())
    }

    /// POST convenience verb.
    ///
    /// # Errors
    ///
    /// See [`Gateway::dispatch`].
    pub fn post(&self, uri: impl Into<String>, body: Value) -> Result<Response, GatewayError> {
        self.dispatch(Request::builder(uri).method(Method::POST).body(body).build())
    }

    /// PUT convenience verb.
    ///
    /// # Errors
    ///
    /// See [`Gateway::dispatch`].
    pub fn put(&self, uri: impl Into<String>, body: Value) -> Result<Response, GatewayError> {
        self.dispatch(Request::builder(uri).method(Method::PUT).body(body).build())
    }

    /// DELETE convenience verb.
    ///
    /// # Errors
    ///
    /// See [`Gateway::dispatch`].
    pub fn delete(&self, uri: impl Into<String>) -> Result<Response, GatewayError> {
        self.dispatch(Request::builder(uri).method(Method::DELETE).build())
    }

    /// OPTIONS convenience verb.
    ///
    /// # Errors
    ///
    /// See [`Gateway::dispatch`].
    pub fn options(&self, uri: impl Into<String>) -> Result<Response, GatewayError> {
        self.dispatch(Request::builder(uri).method(Method::OPTIONS).build())
    }

    fn resolve_handler(&self, matched: &RouteMatch, req: &Request) -> Option<Arc<dyn Handler>> {
        let methods = &matched.value.methods;
        let mut handler = methods.get_exact(&req.method).or_else(|| methods.all.clone());
        // HEAD falls back to the GET handler, also for sub-requests of a
        // HEAD chain; the outer edge strips the body.
        let head_chain = req.method == Method::HEAD
            || self
                .root_request
                .as_ref()
                .is_some_and(|root| root.method == Method::HEAD);
        if handler.is_none() && head_chain {
            handler = methods.get.clone();
        }
        // GET on a trailing-slash URI without its own handler gets the
        // synthesized listing.
        if handler.is_none() && req.method == Method::GET {
            let raw_path = req.uri.split(['?', '#']).next().unwrap_or("");
            if raw_path.ends_with('/') {
                handler = Some(Arc::new(ListingHandler {
                    value: Arc::clone(&matched.value),
                }));
            }
        }
        handler
    }

    fn make_child(&self, req: &Request) -> Gateway {
        // Each top-level dispatch gets a fresh arena; sub-requests join the
        // arena of their tree.
        let arena = if self.depth == 0 {
            Arc::new(ContextArena::default())
        } else {
            Arc::clone(&self.arena)
        };
        let frame = arena.push(self.ctx, &req.uri, &req.method);
        let request_id = self
            .request_id
            .unwrap_or_else(|| RequestId::from_header_or_new(req.header(REQUEST_ID_HEADER)));
        Gateway {
            inner: Arc::clone(&self.inner),
            arena,
            ctx: Some(frame),
            depth: self.depth + 1,
            request_id: Some(request_id),
            root_request: self
                .root_request
                .clone()
                .or_else(|| Some(Arc::new(req.clone()))),
            auth: Mutex::new(self.auth_service()),
        }
    }

    /// Run the handler with validation, panic isolation and result checks.
    fn invoke(
        handler: &Arc<dyn Handler>,
        gateway: &Gateway,
        value: &Arc<RouteValue>,
        req: Request,
    ) -> Result<Response, GatewayError> {
        if let Some(validator) = &value.validator {
            validator.validate(&req)?;
        }
        let uri = req.uri.clone();
        let method = req.method.as_str().to_string();
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(gateway, req)));
        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(uri = %uri, method = %method, "handler panicked");
                Err(GatewayError::Internal {
                    message: format!("handler panicked while serving {method} {uri}"),
                })
            }
        };
        match result? {
            None => Err(GatewayError::EmptyResponse { uri, method }),
            Some(resp) if !(100..400).contains(&resp.status) => {
                Err(GatewayError::InvalidUpstreamResponse {
                    status: resp.status,
                    uri,
                    method,
                    body: resp.body,
                })
            }
            Some(resp) => Ok(resp),
        }
    }

    /// Send a request with an absolute URI through the outbound transport,
    /// stamping the default user agent, the request id and auth credentials.
    fn dispatch_outbound(&self, mut req: Request) -> Result<Response, GatewayError> {
        req.headers
            .entry("user-agent".to_string())
            .or_insert_with(|| self.inner.config.user_agent.clone());
        let request_id = self.request_id.unwrap_or_default();
        req.headers
            .entry(REQUEST_ID_HEADER.to_string())
            .or_insert_with(|| request_id.to_string());
        if let Some(auth) = self.auth_service() {
            auth.prepare_request(self, &mut req);
        }
        debug!(
            request_id = %request_id,
            uri = %req.uri,
            method = %req.method,
            "outbound request"
        );
        match &self.inner.transport {
            Some(transport) => transport.send(&req),
            None => Err(GatewayError::Internal {
                message: format!("no outbound transport configured for {}", req.uri),
            }),
        }
    }
}

/// Synthesized GET handler for trailing-slash URIs without one of their
/// own: `?spec` returns the declaring spec rooted at the listing path,
/// anything else returns the registered child segments.
struct ListingHandler {
    value: Arc<RouteValue>,
}

impl Handler for ListingHandler {
    fn handle(&self, _gateway: &Gateway, req: Request) -> Result<Option<Response>, GatewayError> {
        if req.query.contains_key("spec") {
            if let Some(spec_root) = &self.value.spec_root {
                let mut spec = spec_root.clone();
                if let Value::Object(map) = &mut spec {
                    let base = req
                        .uri
                        .split(['?', '#'])
                        .next()
                        .unwrap_or("")
                        .trim_end_matches('/');
                    map.insert("basePath".to_string(), json!(base));
                }
                return Ok(Some(Response::json(200, spec)));
            }
        }
        let items = req.params.get("_ls").cloned().unwrap_or_else(|| json!([]));
        Ok(Some(Response::json(200, json!({ "items": items }))))
    }
}
