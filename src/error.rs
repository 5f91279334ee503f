//! Gateway error taxonomy.
//!
//! Every dispatch failure maps to one [`GatewayError`] variant carrying the
//! context a client (or an operator reading logs) needs: the failing URI and
//! method, the dispatch depth, and for recursion failures the whole ancestor
//! chain. [`GatewayError::to_response`] renders the canonical JSON error
//! body with a stable machine-readable `type` tag.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::dispatcher::Response;

/// One entry in the ancestor chain of a failed recursive dispatch.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AncestorInfo {
    pub uri: String,
    pub method: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The dispatch chain exceeded the configured recursion bound. The
    /// ancestor chain is ordered nearest-first and names every request that
    /// led here.
    #[error("request recursion depth {depth} exceeded at {method} {uri}")]
    RecursionDepthExceeded {
        uri: String,
        method: String,
        depth: u32,
        ancestors: Vec<AncestorInfo>,
    },

    /// No registered route matched, or the matched route has no handler for
    /// the method.
    #[error("no handler for {method} {uri}")]
    NotFound {
        uri: String,
        method: String,
        depth: u32,
    },

    /// A required permission was not granted.
    #[error("access denied: {title}")]
    AccessDenied { title: String },

    /// External entry into the internal `/sys` namespace.
    #[error("access to the sys namespace denied for {uri}")]
    ReservedNamespaceDenied { uri: String },

    /// A handler completed without producing a response.
    #[error("handler returned no response for {method} {uri}")]
    EmptyResponse { uri: String, method: String },

    /// An internal handler or upstream produced an error-range response; the
    /// original status and body are preserved.
    #[error("upstream returned status {status} for {method} {uri}")]
    InvalidUpstreamResponse {
        status: u16,
        uri: String,
        method: String,
        body: Value,
    },

    /// A paging token failed signature verification or decoding.
    #[error("invalid paging token")]
    InvalidPagingToken,

    /// Request validation rejected the request before the handler ran.
    #[error("validation failed: {detail}")]
    Validation { detail: String },

    /// Unexpected internal failure, including handler panics.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    /// HTTP status the error renders as.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::RecursionDepthExceeded { .. }
            | GatewayError::EmptyResponse { .. }
            | GatewayError::Internal { .. } => 500,
            GatewayError::NotFound { .. } => 404,
            GatewayError::AccessDenied { .. }
            | GatewayError::ReservedNamespaceDenied { .. } => 403,
            GatewayError::InvalidUpstreamResponse { status, .. } => *status,
            GatewayError::InvalidPagingToken | GatewayError::Validation { .. } => 400,
        }
    }

    /// Stable machine-readable error tag used in the response body.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::RecursionDepthExceeded { .. } => "request_recursion_depth_exceeded",
            GatewayError::NotFound { .. } => "not_found#route",
            GatewayError::AccessDenied { .. } => "access_denied#permissions",
            GatewayError::ReservedNamespaceDenied { .. } => "access_denied#sys",
            GatewayError::EmptyResponse { .. } => "empty_response",
            GatewayError::InvalidUpstreamResponse { .. } => "invalid_upstream_response",
            GatewayError::InvalidPagingToken => "invalid_paging_token",
            GatewayError::Validation { .. } => "validation_error",
            GatewayError::Internal { .. } => "internal_error",
        }
    }

    /// Render the canonical JSON error response.
    ///
    /// Upstream error responses pass their original body through unchanged;
    /// every other variant produces a `{type, title, ...}` body.
    #[must_use]
    pub fn to_response(&self) -> Response {
        if let GatewayError::InvalidUpstreamResponse { status, body, .. } = self {
            return Response::json(*status, body.clone());
        }
        let mut body = json!({
            "type": self.error_type(),
            "title": self.to_string(),
        });
        if let Value::Object(map) = &mut body {
            match self {
                GatewayError::RecursionDepthExceeded {
                    uri,
                    method,
                    depth,
                    ancestors,
                } => {
                    map.insert("uri".to_string(), json!(uri));
                    map.insert("method".to_string(), json!(method));
                    map.insert("depth".to_string(), json!(depth));
                    map.insert("parents".to_string(), json!(ancestors));
                }
                GatewayError::NotFound { uri, method, depth } => {
                    map.insert("uri".to_string(), json!(uri));
                    map.insert("method".to_string(), json!(method));
                    map.insert("depth".to_string(), json!(depth));
                }
                GatewayError::EmptyResponse { uri, method } => {
                    map.insert("uri".to_string(), json!(uri));
                    map.insert("method".to_string(), json!(method));
                }
                GatewayError::ReservedNamespaceDenied { uri } => {
                    map.insert("uri".to_string(), json!(uri));
                }
                GatewayError::Validation { detail } => {
                    map.insert("detail".to_string(), json!(detail));
                }
                _ => {}
            }
        }
        Response::json(self.status(), body)
    }
}
