//! Outbound transport seam.
//!
//! Requests whose URI is absolute (`http://` or `https://`) bypass routing
//! entirely and are handed to the injected transport after the dispatcher
//! stamps the default user agent, the request id and auth credentials.
//! Retry policy belongs to the transport, never to the dispatcher.

use crate::dispatcher::{Request, Response};
use crate::error::GatewayError;

/// Injected outbound HTTP capability.
pub trait OutboundTransport: Send + Sync {
    /// Send an outbound request and return the upstream response.
    fn send(&self, req: &Request) -> Result<Response, GatewayError>;
}
