
use http::Method;
use relaygate::{ExpansionContext, Request, Template, TemplateError};
use serde_json::json;

fn incoming_request() -> Request {
    Request::builder("/en.wikipedia.org/v1/page/Main_Page")
        .method(Method::POST)
        .header("x-request-id", "abc-123")
        .header("content-type", "application/json")
        .query_param("limit", "10")
        .body(json!({ "comment": "edit summary", "nested": { "deep": true } }))
        .param("domain", json!("en.wikipedia.org"))
        .param("title", json!("Main_Page"))
        .build()
}

#[test]
fn backend_request_templates_rewrite_incoming_requests() {
    let _guard = tracing_util::init_test_tracing();
    let template = Template::new(&json!({
        "uri": "/{domain}/sys/page_store/{title}",
        "method": "put",
        "headers": {
            "x-request-id": "{x-request-id}",
            "if-match": "{etag}",
        },
        "body": {
            "comment": "{comment}",
            "deep": "{$.request.body.nested.deep}",
            "limit": "{$.request.query.limit}",
        },
    }))
    .unwrap();
    let ctx = ExpansionContext::new(incoming_request().to_model());
    assert_eq!(
        template.expand(&ctx),
        Some(json!({
            "uri": "/en.wikipedia.org/sys/page_store/Main_Page",
            "method": "put",
            "headers": { "x-request-id": "abc-123" },
            "body": { "comment": "edit summary", "deep": true, "limit": "10" },
        }))
    );
}

#[test]
fn parent_models_are_reachable_from_sub_request_templates() {
    let template = Template::new(&json!({
        "body": {
            "original_method": "{$parent.method}",
            "own_method": "{$.request.method}",
        },
    }))
    .unwrap();
    let sub_request = Request::builder("/x.org/sys/inner").build();
    let ctx = ExpansionContext::new(sub_request.to_model())
        .with_parents(vec![incoming_request().to_model()]);
    assert_eq!(
        template.expand(&ctx),
        Some(json!({ "body": { "original_method": "post", "own_method": "get" } }))
    );
}

#[test]
fn whole_uri_placeholders_pass_structured_values_through() {
    let template = Template::new(&json!({ "uri": "{$.request.body.nested}" })).unwrap();
    let ctx = ExpansionContext::new(incoming_request().to_model());
    assert_eq!(
        template.expand(&ctx),
        Some(json!({ "uri": { "deep": true } }))
    );
}

#[test]
fn uri_placeholders_percent_encode_parameter_values() {
    let template = Template::new(&json!({ "uri": "/{domain}/v1/page/{title}" })).unwrap();
    let request = Request::builder("/x.org/v1/page/Tall%20grass")
        .param("domain", json!("x.org"))
        .param("title", json!("Tall grass"))
        .build();
    let ctx = ExpansionContext::new(request.to_model());
    assert_eq!(
        template.expand(&ctx),
        Some(json!({ "uri": "/x.org/v1/page/Tall%20grass" }))
    );
}

#[test]
fn merge_builds_bodies_from_defaults_and_overrides() {
    let template = Template::new(&json!({
        "body": "{$$.merge($.request.body, {comment: 'fallback', flag: 'on'})}",
    }))
    .unwrap();
    let ctx = ExpansionContext::new(incoming_request().to_model());
    let expanded = template.expand(&ctx).unwrap();
    // Left side wins; missing keys fill in from the right.
    assert_eq!(expanded["body"]["comment"], json!("edit summary"));
    assert_eq!(expanded["body"]["flag"], json!("on"));
    assert_eq!(expanded["body"]["nested"], json!({ "deep": true }));
}

#[test]
fn placeholder_free_templates_expand_to_a_deep_copy() {
    let source = json!({
        "uri": "/fixed/path",
        "headers": { "accept": "application/json" },
        "body": { "list": [1, 2, { "deep": null }] },
    });
    let template = Template::new(&source).unwrap();
    let ctx = ExpansionContext::new(incoming_request().to_model());
    assert_eq!(template.expand(&ctx), Some(source));
}

#[test]
fn malformed_templates_fail_compilation() {
    assert!(matches!(
        Template::new(&json!({ "body": "{unclosed" })),
        Err(TemplateError::UnbalancedBraces)
    ));
    assert!(matches!(
        Template::new(&json!({ "body": "{$.request..double}" })),
        Err(TemplateError::Syntax { .. })
    ));
}
