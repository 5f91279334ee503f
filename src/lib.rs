//! relaygate: recursive request dispatch and templating for internal API
//! gateways.
//!
//! The crate has two halves:
//!
//! - **Dispatch core** ([`dispatcher`], [`router`], [`pattern`]): a
//!   [`Gateway`] matches requests against route templates compiled into a
//!   single combined-regex pass, runs the matched handler behind
//!   access-control and metrics middleware, and hands the handler a child
//!   gateway so sub-requests flow through the same pipeline with a shared
//!   request id and a bounded recursion depth.
//! - **Template engine** ([`template`]): JSON-shaped request/response
//!   templates with `{...}` expression placeholders, compiled once and
//!   memoized, with URI-specific placeholder semantics and a
//!   missing-sentinel discipline that keeps absent values distinct from
//!   explicit nulls.
//!
//! External concerns are injected at the seams: routing ([`router::Router`]),
//! outbound HTTP ([`transport::OutboundTransport`]), authorization
//! ([`security::AuthBackend`]) and metrics ([`metrics::Metrics`]).
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use relaygate::{handler_fn, Gateway, GatewayConfig, PatternRouter, Response, RouteSpec};
//! use http::Method;
//! use serde_json::json;
//!
//! let route = RouteSpec::new("/{domain}/v1/echo/{word}").on(
//!     Method::GET,
//!     handler_fn(|_gw, req| {
//!         Ok(Some(Response::json(200, json!({ "word": req.params["word"] }))))
//!     }),
//! );
//! let router = PatternRouter::compile(vec![route]).unwrap();
//! let gateway = Gateway::builder(GatewayConfig::new("secret").unwrap())
//!     .router(Arc::new(router))
//!     .build();
//!
//! let resp = gateway.get("/x.org/v1/echo/hello").unwrap();
//! assert_eq!(resp.body, json!({ "word": "hello" }));
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ids;
pub mod metrics;
mod middleware;
pub mod pattern;
pub mod router;
pub mod security;
pub mod template;
pub mod transport;

pub use config::{ConfigError, GatewayConfig};
pub use dispatcher::{
    handler_fn, Gateway, GatewayBuilder, Handler, Request, RequestBuilder, Response,
};
pub use error::{AncestorInfo, GatewayError};
pub use ids::{RequestId, REQUEST_ID_HEADER};
pub use pattern::{PatternSwitch, SwitchMatch};
pub use router::{MethodTable, PatternRouter, RouteMatch, RouteSpec, RouteValue, Router};
pub use template::{ExpansionContext, Template, TemplateError};
