//! Per-route request timing.
//!
//! Each routed request is timed under a stat name derived from the route's
//! path template, not the concrete URI, so one route aggregates into one
//! metric family regardless of parameter values. The leading domain segment
//! is stripped; the method and outcome are appended:
//!
//! `v1_page__title_.GET.200`, `v1_page__title_.GET.2xx`,
//! `v1_page__title_.GET.ALL`

use std::time::Instant;

use http::Method;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::dispatcher::{Gateway, Response};
use crate::error::GatewayError;

static FIRST_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/[^/]+/").expect("static regex"));

/// Stat-name base for a route and method: path template minus the leading
/// segment, normalized, with the uppercased method appended.
pub(crate) fn stat_base(gateway: &Gateway, route_path: &str, method: &Method) -> String {
    let trimmed = FIRST_SEGMENT.replace(route_path, "");
    gateway
        .metrics()
        .normalize_name(&format!("{trimmed}.{}.", method.as_str().to_uppercase()))
}

/// Run `f` and record its duration under status, status-class and `ALL`
/// stat names. Failures are timed too, under the error's mapped status.
pub(crate) fn timed<F>(
    gateway: &Gateway,
    route_path: &str,
    method: &Method,
    f: F,
) -> Result<Response, GatewayError>
where
    F: FnOnce() -> Result<Response, GatewayError>,
{
    let start = Instant::now();
    let base = stat_base(gateway, route_path, method);
    let result = f();
    let status = match &result {
        Ok(resp) => resp.status,
        Err(err) => err.status(),
    };
    let names = [
        format!("{base}{status}"),
        format!("{base}{}xx", status / 100),
        format!("{base}ALL"),
    ];
    gateway.metrics().end_timing(&names, start);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    #[test]
    fn stat_base_strips_the_domain_segment() {
        let gateway = Gateway::builder(GatewayConfig::new("secret").unwrap()).build();
        let base = stat_base(&gateway, "/{domain}/v1/page/{title}", &Method::GET);
        assert_eq!(base, "v1_page__title_.GET.");
    }

    #[test]
    fn root_level_routes_keep_their_name() {
        let gateway = Gateway::builder(GatewayConfig::new("secret").unwrap()).build();
        let base = stat_base(&gateway, "/{domain}", &Method::POST);
        assert_eq!(base, "__domain_.POST.");
    }
}
