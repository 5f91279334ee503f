//! Recursive request dispatch.

pub mod core;

pub use core::{
    handler_fn, Gateway, GatewayBuilder, Handler, Request, RequestBuilder, Response,
};
