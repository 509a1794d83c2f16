//! Integration tests for per-route audit options
//!
//! These tests verify:
//! - Disabled routes pass through without records or errors
//! - Action routes, update-like verbs and custom fetch paths
//! - Route extensions and their diff projections
//! - Route table validation at build time

mod common;

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};

use common::{entity_routes, request, TestApp};
use rest_audit::{
    audit::{AuditLayer, DiffOptions, FetchPath, RecordOverride, RouteOptions, RouteTable},
    config::AuditConfig,
    error::AuditError,
};

fn app_with_routes(routes: RouteTable) -> TestApp {
    TestApp::with(AuditConfig::default(), |builder| builder.routes(routes))
}

#[tokio::test]
async fn test_disabled_route_emits_nothing() {
    let app = app_with_routes(
        RouteTable::new()
            .route(Method::GET, "/api/test/{id}", false)
            .route(Method::PUT, "/api/test/{id}", false),
    );

    let (status, _) = app.get("/api/test/5").await;
    assert_eq!(status, StatusCode::OK);
    app.call(Method::PUT, "/api/test/5", json!({"a": "a"})).await;

    assert!(app.records().is_empty());
    assert!(app.errors().is_empty());
    assert_eq!(app.injected_reads(), 0);
    assert!(app.layer.cache().is_empty());
}

#[tokio::test]
async fn test_literal_route_overrides_parameterized_one() {
    let app = app_with_routes(
        RouteTable::new()
            .route(Method::GET, "/api/test/{id}", true)
            .route(Method::GET, "/api/test/7", false),
    );

    app.get("/api/test/7").await;
    assert!(app.records().is_empty());

    app.get("/api/test/5").await;
    assert_eq!(app.single_record()["body"]["entityId"], "5");
}

#[tokio::test]
async fn test_action_route_records_payload() {
    let app = app_with_routes(entity_routes().route(
        Method::POST,
        "/api/test/{id}/approve",
        RouteOptions::action()
            .with_ext(|_| async { anyhow::Ok(Some(RecordOverride::new().action("approve"))) }),
    ));

    let (status, _) = app
        .call(Method::POST, "/api/test/5/approve", json!({"note": "ok"}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let record = app.single_record();
    assert_eq!(record["type"], "SEARCH");
    assert_eq!(record["body"]["action"], "APPROVE");
    assert_eq!(record["body"]["entity"], "test");
    assert_eq!(record["body"]["entityId"], "5");
    assert_eq!(record["body"]["data"], json!({"note": "ok"}));

    assert_eq!(app.injected_reads(), 0);
}

#[tokio::test]
async fn test_delete_on_action_route_is_an_action() {
    let app = app_with_routes(
        RouteTable::new()
            .route(Method::GET, "/api/test/{id}", true)
            .route(Method::DELETE, "/api/test/{id}", RouteOptions::action()),
    );

    let (status, _) = app.send(request(Method::DELETE, "/api/test/5", None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let record = app.single_record();
    assert_eq!(record["type"], "SEARCH");
    assert_eq!(record["body"]["action"], "SEARCH");
    assert_eq!(record["body"]["entityId"], "5");
    assert_eq!(record["body"]["data"], Value::Null);

    assert_eq!(app.injected_reads(), 0);
    assert!(app.errors().is_empty());
}

#[tokio::test]
async fn test_patch_audited_as_update() {
    let app = app_with_routes(entity_routes().route(
        Method::PATCH,
        "/api/test/{id}",
        RouteOptions::as_update().fetch_path(FetchPath::template("/api/test/{id}")),
    ));

    let (status, _) = app.call(Method::PATCH, "/api/test/5", json!({"a": "p"})).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert_eq!(app.injected_reads(), 1);
    let record = app.single_record();
    assert_eq!(record["body"]["action"], "UPDATE");
    assert_eq!(record["body"]["entityId"], "5");
    assert_eq!(record["body"]["originalValues"], json!({"id": 5, "a": "old"}));
    assert_eq!(record["body"]["newValues"], json!({"a": "p"}));
}

#[tokio::test]
async fn test_fetch_new_values_reads_after_the_handler() {
    let app = app_with_routes(entity_routes().route(
        Method::PATCH,
        "/api/test/{id}",
        RouteOptions::as_update()
            .fetch_path(FetchPath::template("/api/test/{id}"))
            .fetch_new_values(),
    ));

    app.call(Method::PATCH, "/api/test/5", json!({"a": "p"})).await;

    assert_eq!(app.injected_reads(), 2);
    let record = app.single_record();
    assert_eq!(record["body"]["originalValues"], json!({"id": 5, "a": "old"}));
    assert_eq!(record["body"]["newValues"], json!({"id": 5, "a": "p"}));
}

#[tokio::test]
async fn test_patch_without_options_reports_null_record() {
    let app = TestApp::new(AuditConfig::default());

    let (status, _) = app.call(Method::PATCH, "/api/test/5", json!({"a": "p"})).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert!(app.records().is_empty());
    assert_eq!(app.injected_reads(), 0);
    assert_eq!(
        app.errors(),
        vec![AuditError::Build("Null audit record for endpoint: patch:/api/test/5".to_string())]
    );
}

#[tokio::test]
async fn test_named_source_parameter() {
    let app = app_with_routes(RouteTable::new().route(
        Method::PUT,
        "/api/test/{key}",
        RouteOptions::new().fetch_path(FetchPath::template_with_source("/api/test/{key}", "key")),
    ));

    app.call(Method::PUT, "/api/test/5", json!({"a": "a"})).await;

    assert_eq!(app.injected_reads(), 1);
    let record = app.single_record();
    assert_eq!(record["body"]["entityId"], "5");
    assert_eq!(record["body"]["originalValues"], json!({"id": 5, "a": "old"}));
}

#[tokio::test]
async fn test_custom_fetch_path() {
    let app = app_with_routes(entity_routes().route(
        Method::POST,
        "/api/test/{id}/approve",
        RouteOptions::as_update().fetch_path(FetchPath::custom(|ctx| {
            ctx.param("id").map(|id| format!("/api/test/{}", id))
        })),
    ));

    app.call(Method::POST, "/api/test/7/approve", json!({"b": "approved"})).await;

    assert_eq!(app.injected_reads(), 1);
    let record = app.single_record();
    assert_eq!(record["body"]["action"], "UPDATE");
    assert_eq!(record["body"]["entityId"], "7");
    assert_eq!(record["body"]["originalValues"], json!({"id": 7, "a": "a", "b": "b", "c": "c"}));
    assert_eq!(record["body"]["newValues"], json!({"b": "approved"}));
}

#[tokio::test]
async fn test_ext_keep_only() {
    let app = app_with_routes(
        RouteTable::new().route(Method::GET, "/api/test/{id}", true).route(
            Method::PUT,
            "/api/test/{id}",
            RouteOptions::new().with_ext(|ctx| async move {
                let (old, new) = ctx.diff(&DiffOptions::keep_only(["b"]));
                anyhow::Ok(Some(RecordOverride::new().original_values(old).new_values(new)))
            }),
        ),
    );

    app.get("/api/test/7").await;
    app.call(Method::PUT, "/api/test/7", json!({"b": "bb", "c": "cc"})).await;

    let update = serde_json::to_value(&app.records()[1]).unwrap();
    assert_eq!(update["body"]["originalValues"], json!({"b": "b"}));
    assert_eq!(update["body"]["newValues"], json!({"b": "bb"}));
}

#[tokio::test]
async fn test_ext_drop_keys() {
    let app = app_with_routes(RouteTable::new().route(
        Method::PUT,
        "/api/test/{id}",
        RouteOptions::new().with_ext(|ctx| async move {
            let (old, new) = ctx.diff(&DiffOptions::drop_keys(["id", "a"]));
            anyhow::Ok(Some(RecordOverride::new().original_values(old).new_values(new)))
        }),
    ));

    app.call(Method::PUT, "/api/test/7", json!({"b": "bb", "c": "cc"})).await;

    let record = app.single_record();
    assert_eq!(record["body"]["originalValues"], json!({"b": "b", "c": "c"}));
    assert_eq!(record["body"]["newValues"], json!({"b": "bb", "c": "cc"}));
}

#[tokio::test]
async fn test_ext_sees_request_parts() {
    let app = app_with_routes(RouteTable::new().route(
        Method::GET,
        "/api/test/{id}",
        RouteOptions::new().with_ext(|ctx| async move {
            let data = json!({
                "id": ctx.params.get("id"),
                "q": ctx.query.get("q"),
                "trace": ctx.headers.get("x-trace").and_then(|v| v.to_str().ok()),
            });
            anyhow::Ok(Some(RecordOverride::new().data(data)))
        }),
    ));

    let mut req = request(Method::GET, "/api/test/5?q=term", None);
    req.headers_mut().insert("x-trace", "abc".parse().unwrap());
    app.send(req).await;

    assert_eq!(
        app.single_record()["body"]["data"],
        json!({"id": "5", "q": "term", "trace": "abc"})
    );
}

#[tokio::test]
async fn test_ext_returning_none_keeps_record() {
    let app = app_with_routes(RouteTable::new().route(
        Method::GET,
        "/api/test/{id}",
        RouteOptions::new().with_ext(|_| async { anyhow::Ok(None::<RecordOverride>) }),
    ));

    app.get("/api/test/5").await;

    let record = app.single_record();
    assert_eq!(record["body"]["action"], "SEARCH");
    assert_eq!(record["body"]["entityId"], "5");
}

#[tokio::test]
async fn test_ext_failure_is_reported() {
    let app = app_with_routes(RouteTable::new().route(
        Method::PUT,
        "/api/test/{id}",
        RouteOptions::new().with_ext(|_| async {
            Err::<Option<RecordOverride>, _>(anyhow::anyhow!("boom"))
        }),
    ));

    let (status, _) = app.call(Method::PUT, "/api/test/5", json!({"a": "a"})).await;
    assert_eq!(status, StatusCode::OK);

    assert!(app.records().is_empty());
    assert_eq!(
        app.errors(),
        vec![AuditError::Build("Route extension failed on put:/api/test/5: boom".to_string())]
    );
    assert!(app.layer.cache().is_empty());
}

#[tokio::test]
async fn test_ext_cannot_blank_entity() {
    let app = app_with_routes(RouteTable::new().route(
        Method::GET,
        "/api/test/{id}",
        RouteOptions::new().with_ext(|_| async { anyhow::Ok(Some(RecordOverride::new().entity(""))) }),
    ));

    app.get("/api/test/5").await;

    assert!(app.records().is_empty());
    assert_eq!(app.errors().len(), 1);
    assert!(matches!(app.errors()[0], AuditError::Build(_)));
}

#[test]
fn test_action_and_update_are_exclusive() {
    let routes = RouteTable::new().route(
        Method::POST,
        "/api/test/{id}/approve",
        RouteOptions {
            is_action: true,
            audit_as_update: true,
            ..RouteOptions::default()
        },
    );

    let err = AuditLayer::builder(AuditConfig::default())
        .routes(routes)
        .build()
        .unwrap_err();
    assert!(matches!(err, AuditError::Configuration(_)));
    assert!(err.message().contains("/api/test/{id}/approve"));
}

#[test]
fn test_invalid_route_tables() {
    let tables = vec![
        RouteTable::new().route(Method::GET, "/api/test/{id", true),
        RouteTable::new()
            .route(Method::GET, "/api/test/{id}", true)
            .route(Method::GET, "/api/test/:key", false),
        RouteTable::new().route(
            Method::PUT,
            "/api/test/{id}",
            RouteOptions::new().fetch_path(FetchPath::template("api/test/{id}")),
        ),
        RouteTable::new().route(
            Method::PUT,
            "/api/test/{id}",
            RouteOptions::new().fetch_path(FetchPath::template_with_source("/api/test/{id}", " ")),
        ),
    ];

    for routes in tables {
        let result = AuditLayer::builder(AuditConfig::default()).routes(routes).build();
        assert!(
            matches!(result, Err(AuditError::Configuration(_))),
            "expected a configuration error, got {:?}",
            result.map(|_| ())
        );
    }
}

#[test]
fn test_same_template_on_different_verbs_is_valid() {
    let routes = entity_routes().route(Method::PATCH, "/api/test/{id}", RouteOptions::as_update());
    assert!(AuditLayer::builder(AuditConfig::default()).routes(routes).build().is_ok());
}

#[tokio::test]
async fn test_unmatched_route_uses_defaults() {
    let app = app_with_routes(RouteTable::new());

    app.get("/api/test/5").await;

    // without a registered template there is no id parameter
    assert_eq!(app.single_record()["body"]["entityId"], Value::Null);
}
