//! Authorization seam and paging-token codec.
//!
//! Permission enforcement is delegated to an injected [`AuthBackend`] that
//! binds an [`AuthService`] to the spec declaring a route. The dispatcher
//! registers the route's required permissions with the bound service and
//! decides *when* the check runs relative to handler execution (see the
//! access-control middleware).
//!
//! The paging-token codec signs opaque continuation values with the
//! configured salt so clients cannot forge or tamper with paging state.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatcher::{Gateway, Request};
use crate::error::GatewayError;

/// Authorization capability bound to one declaring spec.
pub trait AuthService: Send + Sync {
    /// Stamp outbound credentials onto a request leaving the gateway.
    fn prepare_request(&self, gateway: &Gateway, req: &mut Request);

    /// Register permissions required by a matched route. Requirements
    /// accumulate across the request chain.
    fn add_requirements(&self, permissions: &[String]);

    /// Check the accumulated requirements against the request.
    ///
    /// # Errors
    ///
    /// [`GatewayError::AccessDenied`] when any requirement is not met.
    fn check_permissions(&self, gateway: &Gateway, req: &Request) -> Result<(), GatewayError>;
}

/// Factory producing an [`AuthService`] bound to a route's declaring spec.
///
/// Binding is lazy: the dispatcher only binds when it first meets a route
/// that declares permissions, and the bound service is inherited by child
/// dispatch contexts.
pub trait AuthBackend: Send + Sync {
    fn bind(&self, spec_root: Option<&Value>) -> std::sync::Arc<dyn AuthService>;
}

#[derive(Serialize, Deserialize)]
struct PagingClaims {
    next: Value,
}

/// Signs and verifies paging tokens with the configured salt (HS256).
#[derive(Clone)]
pub struct TokenCodec {
    salt: String,
}

impl TokenCodec {
    #[must_use]
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    /// Sign a continuation value into an opaque token.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Internal`] if signing fails, which only happens on
    /// unserializable values.
    pub fn encode_token(&self, value: &Value) -> Result<String, GatewayError> {
        let claims = PagingClaims {
            next: value.clone(),
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.salt.as_bytes()),
        )
        .map_err(|e| GatewayError::Internal {
            message: format!("failed to sign paging token: {e}"),
        })
    }

    /// Verify a signed token and return the original continuation value.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidPagingToken`] on any malformed, tampered or
    /// differently signed input.
    pub fn decode_token(&self, token: &str) -> Result<Value, GatewayError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Paging tokens carry no registered claims; only the signature counts.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        jsonwebtoken::decode::<PagingClaims>(
            token,
            &DecodingKey::from_secret(self.salt.as_bytes()),
            &validation,
        )
        .map(|data| data.claims.next)
        .map_err(|_| GatewayError::InvalidPagingToken)
    }
}
