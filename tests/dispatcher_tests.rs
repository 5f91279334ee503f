
use std::sync::{Arc, Mutex};

use http::Method;
use relaygate::metrics::{Metrics, RecordingMetrics};
use relaygate::transport::OutboundTransport;
use relaygate::{
    handler_fn, Gateway, GatewayConfig, GatewayError, PatternRouter, Request, Response,
    RouteSpec,
};
use serde_json::{json, Value};

fn config() -> GatewayConfig {
    GatewayConfig::new("test-salt").unwrap()
}

fn gateway_with(routes: Vec<RouteSpec>) -> Gateway {
    Gateway::builder(config())
        .router(Arc::new(PatternRouter::compile(routes).unwrap()))
        .build()
}

#[test]
fn dispatch_routes_to_the_registered_handler() {
    let _guard = tracing_util::init_test_tracing();
    let route = RouteSpec::new("/{domain}/v1/page/{title}").on(
        Method::GET,
        handler_fn(|_gw: &Gateway, req: Request| {
            Ok(Some(Response::json(
                200,
                json!({ "title": req.params["title"], "domain": req.params["domain"] }),
            )))
        }),
    );
    let gateway = gateway_with(vec![route]);
    let resp = gateway.get("/en.wikipedia.org/v1/page/Main_Page").unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(
        resp.body,
        json!({ "title": "Main_Page", "domain": "en.wikipedia.org" })
    );
}

#[test]
fn unknown_paths_are_not_found() {
    let gateway = gateway_with(vec![RouteSpec::new("/{domain}/v1/page/{title}")]);
    let err = gateway.get("/x.org/v2/other").unwrap_err();
    assert!(matches!(err, GatewayError::NotFound { depth: 0, .. }));
    assert_eq!(err.status(), 404);
}

#[test]
fn handlers_issue_sub_requests_through_their_child_gateway() {
    let _guard = tracing_util::init_test_tracing();
    let backend = RouteSpec::new("/{domain}/sys/storage/{key}").on(
        Method::GET,
        handler_fn(|gw: &Gateway, req: Request| {
            assert_eq!(gw.depth(), 2);
            Ok(Some(Response::json(
                200,
                json!({ "stored": req.params["key"] }),
            )))
        }),
    );
    let public = RouteSpec::new("/{domain}/v1/page/{title}").on(
        Method::GET,
        handler_fn(|gw: &Gateway, req: Request| {
            assert_eq!(gw.depth(), 1);
            let domain = req.params["domain"].as_str().unwrap_or_default().to_string();
            let title = req.params["title"].as_str().unwrap_or_default().to_string();
            let inner = gw.get(format!("/{domain}/sys/storage/{title}"))?;
            Ok(Some(Response::json(200, json!({ "wrapped": inner.body }))))
        }),
    );
    let gateway = gateway_with(vec![backend, public]);
    let resp = gateway.get("/x.org/v1/page/Foo").unwrap();
    assert_eq!(resp.body, json!({ "wrapped": { "stored": "Foo" } }));
}

#[test]
fn recursion_bound_reports_the_full_ancestor_chain() {
    let _guard = tracing_util::init_test_tracing();
    let route = RouteSpec::new("/{domain}/v1/loop").on(
        Method::GET,
        handler_fn(|gw: &Gateway, req: Request| {
            let domain = req.params["domain"].as_str().unwrap_or_default().to_string();
            gw.get(format!("/{domain}/v1/loop")).map(Some)
        }),
    );
    let gateway = Gateway::builder(config().with_max_depth(3))
        .router(Arc::new(PatternRouter::compile(vec![route]).unwrap()))
        .build();
    let err = gateway.get("/x.org/v1/loop").unwrap_err();
    let GatewayError::RecursionDepthExceeded {
        depth, ancestors, ..
    } = &err
    else {
        panic!("expected recursion failure, got {err:?}");
    };
    assert_eq!(*depth, 4);
    assert_eq!(ancestors.len(), 4);
    assert!(ancestors.iter().all(|a| a.uri == "/x.org/v1/loop"));
    assert_eq!(err.status(), 500);
    assert_eq!(
        err.to_response().body["type"],
        json!("request_recursion_depth_exceeded")
    );
}

#[test]
fn sys_namespace_is_denied_externally_but_reachable_internally() {
    let secret = RouteSpec::new("/{domain}/sys/secret").on(
        Method::GET,
        handler_fn(|_gw: &Gateway, _req: Request| Ok(Some(Response::json(200, json!("ok"))))),
    );
    let public = RouteSpec::new("/{domain}/v1/front").on(
        Method::GET,
        handler_fn(|gw: &Gateway, req: Request| {
            let domain = req.params["domain"].as_str().unwrap_or_default().to_string();
            gw.get(format!("/{domain}/sys/secret")).map(Some)
        }),
    );
    let gateway = gateway_with(vec![secret, public]);

    let err = gateway.get("/x.org/sys/secret").unwrap_err();
    assert!(matches!(err, GatewayError::ReservedNamespaceDenied { .. }));
    assert_eq!(err.status(), 403);
    assert_eq!(err.to_response().body["type"], json!("access_denied#sys"));

    let resp = gateway.get("/x.org/v1/front").unwrap();
    assert_eq!(resp.body, json!("ok"));
}

#[test]
fn sys_namespace_is_denied_even_without_a_matching_route() {
    let gateway = gateway_with(vec![RouteSpec::new("/{domain}/v1/page")]);
    let err = gateway.get("/x.org/sys/unregistered").unwrap_err();
    assert!(matches!(err, GatewayError::ReservedNamespaceDenied { .. }));
}

#[test]
fn validators_reject_before_the_handler_runs() {
    use relaygate::router::RequestValidator;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RejectAll;
    impl RequestValidator for RejectAll {
        fn validate(&self, _req: &Request) -> Result<(), GatewayError> {
            Err(GatewayError::Validation {
                detail: "body must be an object".to_string(),
            })
        }
    }

    let ran = Arc::new(AtomicBool::new(false));
    let ran_in_handler = Arc::clone(&ran);
    let route = RouteSpec::new("/{domain}/v1/strict")
        .with_validator(Arc::new(RejectAll))
        .on(
            Method::POST,
            handler_fn(move |_gw, _req| {
                ran_in_handler.store(true, Ordering::SeqCst);
                Ok(Some(Response::json(200, Value::Null)))
            }),
        );
    let gateway = gateway_with(vec![route]);
    let err = gateway.post("/x.org/v1/strict", json!("scalar")).unwrap_err();
    assert!(matches!(err, GatewayError::Validation { .. }));
    assert_eq!(err.status(), 400);
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn head_falls_back_to_the_get_handler() {
    let route = RouteSpec::new("/{domain}/v1/page/{title}").on(
        Method::GET,
        handler_fn(|_gw: &Gateway, _req: Request| Ok(Some(Response::json(200, json!("page"))))),
    );
    let gateway = gateway_with(vec![route]);
    let resp = gateway.head("/x.org/v1/page/Foo").unwrap();
    assert_eq!(resp.status, 200);
}

#[test]
fn trailing_slash_get_without_handler_lists_children() {
    let route = RouteSpec::new("/{domain}/v1/page")
        .with_listing(vec!["html".to_string(), "title".to_string()]);
    let gateway = gateway_with(vec![route]);
    let resp = gateway.get("/x.org/v1/page/").unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, json!({ "items": ["html", "title"] }));
}

#[test]
fn spec_query_returns_the_declaring_spec_with_base_path() {
    let route = RouteSpec::new("/{domain}/v1/page")
        .with_spec_root(json!({ "swagger": "2.0", "paths": {} }))
        .with_listing(vec!["html".to_string()]);
    let gateway = gateway_with(vec![route]);
    let resp = gateway.get("/x.org/v1/page/?spec").unwrap();
    assert_eq!(resp.body["swagger"], json!("2.0"));
    assert_eq!(resp.body["basePath"], json!("/x.org/v1/page"));
}

#[test]
fn empty_handler_responses_are_internal_errors() {
    let route = RouteSpec::new("/{domain}/v1/void").on(
        Method::GET,
        handler_fn(|_gw: &Gateway, _req: Request| Ok(None)),
    );
    let gateway = gateway_with(vec![route]);
    let err = gateway.get("/x.org/v1/void").unwrap_err();
    assert!(matches!(err, GatewayError::EmptyResponse { .. }));
    assert_eq!(err.status(), 500);
}

#[test]
fn error_range_responses_become_errors_with_the_body_preserved() {
    let route = RouteSpec::new("/{domain}/v1/broken").on(
        Method::GET,
        handler_fn(|_gw: &Gateway, _req: Request| {
            Ok(Some(Response::json(503, json!({ "type": "backend_down" }))))
        }),
    );
    let gateway = gateway_with(vec![route]);
    let err = gateway.get("/x.org/v1/broken").unwrap_err();
    let GatewayError::InvalidUpstreamResponse { status, body, .. } = &err else {
        panic!("expected upstream error, got {err:?}");
    };
    assert_eq!(*status, 503);
    assert_eq!(*body, json!({ "type": "backend_down" }));
    let rendered = err.to_response();
    assert_eq!(rendered.status, 503);
    assert_eq!(rendered.body, json!({ "type": "backend_down" }));
}

#[test]
fn handler_panics_are_contained_as_internal_errors() {
    let route = RouteSpec::new("/{domain}/v1/crash").on(
        Method::GET,
        handler_fn(|_gw: &Gateway, _req: Request| panic!("boom")),
    );
    let gateway = gateway_with(vec![route]);
    let err = gateway.get("/x.org/v1/crash").unwrap_err();
    assert!(matches!(err, GatewayError::Internal { .. }));
    assert_eq!(err.status(), 500);
}

#[test]
fn request_id_is_adopted_from_the_header_and_propagated() {
    const RID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen_inner = Arc::clone(&seen);
    let seen_outer = Arc::clone(&seen);
    let inner = RouteSpec::new("/{domain}/sys/inner").on(
        Method::GET,
        handler_fn(move |gw: &Gateway, _req: Request| {
            seen_inner
                .lock()
                .unwrap()
                .push(gw.request_id().unwrap().to_string());
            Ok(Some(Response::json(200, Value::Null)))
        }),
    );
    let outer = RouteSpec::new("/{domain}/v1/outer").on(
        Method::GET,
        handler_fn(move |gw: &Gateway, req: Request| {
            seen_outer
                .lock()
                .unwrap()
                .push(gw.request_id().unwrap().to_string());
            let domain = req.params["domain"].as_str().unwrap_or_default().to_string();
            gw.get(format!("/{domain}/sys/inner")).map(Some)
        }),
    );
    let gateway = gateway_with(vec![inner, outer]);
    let req = Request::builder("/x.org/v1/outer")
        .header("x-request-id", RID)
        .build();
    gateway.dispatch(req).unwrap();
    let ids = seen.lock().unwrap();
    assert_eq!(ids.as_slice(), [RID, RID]);
}

struct RecordingTransport {
    sent: Mutex<Vec<Request>>,
}

impl OutboundTransport for RecordingTransport {
    fn send(&self, req: &Request) -> Result<Response, GatewayError> {
        self.sent.lock().unwrap().push(req.clone());
        Ok(Response::json(200, json!({ "from": "upstream" })))
    }
}

#[test]
fn absolute_uris_go_to_the_transport_with_stamped_headers() {
    let transport = Arc::new(RecordingTransport {
        sent: Mutex::new(Vec::new()),
    });
    let route = RouteSpec::new("/{domain}/v1/proxy").on(
        Method::GET,
        handler_fn(|gw: &Gateway, _req: Request| {
            gw.dispatch(Request::builder("https://upstream.example/api").build())
                .map(Some)
        }),
    );
    let gateway = Gateway::builder(config().with_user_agent("relaygate-test"))
        .router(Arc::new(PatternRouter::compile(vec![route]).unwrap()))
        .transport(Arc::clone(&transport) as Arc<dyn OutboundTransport>)
        .build();
    let resp = gateway.get("/x.org/v1/proxy").unwrap();
    assert_eq!(resp.body, json!({ "from": "upstream" }));
    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].header("user-agent"), Some("relaygate-test"));
    assert!(sent[0].header("x-request-id").is_some());
}

#[test]
fn outbound_without_transport_is_an_internal_error() {
    let gateway = Gateway::builder(config()).build();
    let err = gateway.get("https://upstream.example/api").unwrap_err();
    assert!(matches!(err, GatewayError::Internal { .. }));
}

#[test]
fn timings_are_recorded_per_route_method_and_status() {
    let metrics = Arc::new(RecordingMetrics::new());
    let route = RouteSpec::new("/{domain}/v1/page/{title}").on(
        Method::GET,
        handler_fn(|_gw: &Gateway, _req: Request| Ok(Some(Response::json(200, Value::Null)))),
    );
    let gateway = Gateway::builder(config())
        .router(Arc::new(PatternRouter::compile(vec![route]).unwrap()))
        .metrics(Arc::clone(&metrics) as Arc<dyn Metrics>)
        .build();
    gateway.get("/x.org/v1/page/Foo").unwrap();
    assert_eq!(metrics.count("v1_page__title_.GET.200"), 1);
    assert_eq!(metrics.count("v1_page__title_.GET.2xx"), 1);
    assert_eq!(metrics.count("v1_page__title_.GET.ALL"), 1);
}

#[test]
fn failed_dispatches_are_timed_under_the_error_status() {
    let metrics = Arc::new(RecordingMetrics::new());
    let route = RouteSpec::new("/{domain}/v1/void").on(
        Method::GET,
        handler_fn(|_gw: &Gateway, _req: Request| Ok(None)),
    );
    let gateway = Gateway::builder(config())
        .router(Arc::new(PatternRouter::compile(vec![route]).unwrap()))
        .metrics(Arc::clone(&metrics) as Arc<dyn Metrics>)
        .build();
    assert!(gateway.get("/x.org/v1/void").is_err());
    assert_eq!(metrics.count("v1_void.GET.500"), 1);
    assert_eq!(metrics.count("v1_void.GET.5xx"), 1);
    assert_eq!(metrics.count("v1_void.GET.ALL"), 1);
}

#[test]
fn post_bodies_reach_the_handler() {
    let route = RouteSpec::new("/{domain}/v1/echo").on(
        Method::POST,
        handler_fn(|_gw: &Gateway, req: Request| Ok(Some(Response::json(200, req.body)))),
    );
    let gateway = gateway_with(vec![route]);
    let resp = gateway
        .post("/x.org/v1/echo", json!({ "hello": "world" }))
        .unwrap();
    assert_eq!(resp.body, json!({ "hello": "world" }));
}

#[test]
fn catch_all_handlers_serve_unlisted_methods() {
    let route = RouteSpec::new("/{domain}/v1/any").on_all(Arc::new(
        |_gw: &Gateway, req: Request| {
            Ok(Some(Response::json(
                200,
                json!({ "method": req.method.as_str() }),
            )))
        },
    ));
    let gateway = gateway_with(vec![route]);
    assert_eq!(
        gateway.delete("/x.org/v1/any").unwrap().body,
        json!({ "method": "DELETE" })
    );
    assert_eq!(
        gateway.options("/x.org/v1/any").unwrap().body,
        json!({ "method": "OPTIONS" })
    );
}
