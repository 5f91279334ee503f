//! Access-control enforcement.
//!
//! Routes declaring permissions are checked through the bound auth service.
//! For side-effect-free methods (GET, HEAD) the check runs concurrently
//! with the handler and its verdict is applied before the response leaves
//! the gateway; a denial always wins over a successful handler. Mutating
//! methods are checked strictly before the handler runs, so a denied
//! request can never cause a side effect.
//!
//! Requests inside the internal namespace skip the check: they can only
//! originate from handlers that already passed the external boundary.

use std::sync::Arc;

use http::Method;
use tracing::warn;

use crate::dispatcher::{Gateway, Request, Response};
use crate::error::GatewayError;
use crate::router::RouteValue;

pub(crate) fn enforce<F>(
    gateway: &Gateway,
    value: &Arc<RouteValue>,
    req: Request,
    invoke: F,
) -> Result<Response, GatewayError>
where
    F: FnOnce(Request) -> Result<Response, GatewayError>,
{
    if value.permissions.is_empty() || req.targets_reserved_namespace() {
        return invoke(req);
    }
    let Some(auth) = gateway.bind_auth(value.spec_root.as_ref()) else {
        // Declared permissions with nothing to check them against: fail
        // closed rather than silently serving.
        warn!(route = %value.path, "permissions declared but no authorization backend configured");
        return Err(GatewayError::AccessDenied {
            title: format!(
                "permissions declared for {} but no authorization backend is configured",
                value.path
            ),
        });
    };
    auth.add_requirements(&value.permissions);

    if req.method == Method::GET || req.method == Method::HEAD {
        concurrent_check(gateway, &auth, req, invoke)
    } else {
        auth.check_permissions(gateway, &req)?;
        invoke(req)
    }
}

/// Overlap the permission check with the handler. The handler result is
/// only returned once the check has passed; a check failure discards it.
fn concurrent_check<F>(
    gateway: &Gateway,
    auth: &Arc<dyn crate::security::AuthService>,
    req: Request,
    invoke: F,
) -> Result<Response, GatewayError>
where
    F: FnOnce(Request) -> Result<Response, GatewayError>,
{
    let gw = gateway.clone();
    let check_req = req.clone();
    let check_auth = Arc::clone(auth);
    // SAFETY: the closure owns its captures (cloned gateway, request and
    // auth service, all Send + 'static) and its result flows back through
    // the join handle, which we always join before returning.
    let spawned = unsafe {
        may::coroutine::Builder::new()
            .name("permission-check".to_string())
            .spawn(move || check_auth.check_permissions(&gw, &check_req))
    };
    match spawned {
        Ok(handle) => {
            let result = invoke(req);
            match handle.join() {
                Ok(Ok(())) => result,
                Ok(Err(denied)) => Err(denied),
                Err(_) => Err(GatewayError::Internal {
                    message: "permission check panicked".to_string(),
                }),
            }
        }
        // Could not spawn; degrade to a sequential check.
        Err(_) => {
            auth.check_permissions(gateway, &req)?;
            invoke(req)
        }
    }
}
