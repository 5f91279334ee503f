//! Dispatch middleware.
//!
//! Every routed request passes through the access-control and metrics
//! layers; neither is optional or externally configurable, which keeps the
//! enforcement and reporting story uniform across handlers.

pub(crate) mod access;
pub(crate) mod metrics;
