use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, patch};
use serde_json::json;

use super::*;

// =============================================================
// parse_envelope
// =============================================================

#[test]
fn success_envelope_yields_data() {
    let data = parse_envelope(200, r#"{"success": true, "data": [{"id": 1}]}"#).unwrap();
    assert_eq!(data, json!([{"id": 1}]));
}

#[test]
fn failure_envelope_carries_message_and_field_errors() {
    let err = parse_envelope(422, r#"{"success": false, "message": "invalid", "data": {"x": ["required"]}}"#)
        .unwrap_err();
    match err {
        ApiError::Http { status, message, field_errors } => {
            assert_eq!(status, Some(422));
            assert_eq!(message, "invalid");
            assert_eq!(field_errors, Some(json!({"x": ["required"]})));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn success_false_on_2xx_is_an_http_error() {
    let err = parse_envelope(200, r#"{"success": false, "message": "nope"}"#).unwrap_err();
    assert_eq!(err.status(), Some(200));
    assert!(matches!(err, ApiError::Http { field_errors: None, .. }));
}

#[test]
fn malformed_2xx_body_is_a_decode_error() {
    let err = parse_envelope(200, "<html>").unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
    assert_eq!(err.status(), None);
}

#[test]
fn malformed_error_body_keeps_status() {
    let err = parse_envelope(502, "Bad Gateway").unwrap_err();
    assert_eq!(err.status(), Some(502));
    assert!(err.retryable());
    assert_eq!(err.to_string(), "request rejected with status 502: request failed with status 502");
}

#[test]
fn empty_2xx_body_is_null_data() {
    assert_eq!(parse_envelope(204, "").unwrap(), Value::Null);
}

// =============================================================
// HttpBackend against an in-process server
// =============================================================

fn timeouts() -> HttpTimeouts {
    HttpTimeouts { request: Duration::from_secs(5), connect: Duration::from_secs(5) }
}

async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/api/")
}

fn app() -> Router {
    Router::new()
        .route(
            "/api/items",
            get(|| async {
                Json(json!({"success": true, "data": [{"id": 7, "x": 100, "updated_at": 5}]}))
            })
            .post(|Json(mut body): Json<Value>| async move {
                body["id"] = json!(42);
                Json(json!({"success": true, "data": body}))
            }),
        )
        .route(
            "/api/items/{id}",
            patch(|Path(id): Path<i64>| async move {
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({"success": false, "message": format!("item {id} invalid"), "data": {"x": ["bad"]}})),
                )
            })
            .delete(|| async { StatusCode::NO_CONTENT }),
        )
        .route("/api/seats", get(|| async { "not json" }))
        .route(
            "/api/guests",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
}

#[tokio::test]
async fn http_backend_lists_and_creates() {
    let base = spawn_server(app()).await;
    let backend = HttpBackend::new(&base, timeouts()).unwrap();

    let records = backend.list(EntityKind::Item).await.unwrap();
    assert_eq!(records, vec![json!({"id": 7, "x": 100, "updated_at": 5})]);

    let mut fields = Map::new();
    fields.insert("x".into(), json!(3));
    let created = backend.create(EntityKind::Item, fields).await.unwrap();
    assert_eq!(created, json!({"x": 3, "id": 42}));
}

#[tokio::test]
async fn http_backend_maps_rejections_and_empty_deletes() {
    let base = spawn_server(app()).await;
    let backend = HttpBackend::new(&base, timeouts()).unwrap();

    let err = backend
        .update(EntityKind::Item, EntityId(9), Map::new())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(422));
    assert!(err.to_string().contains("item 9 invalid"));
    assert!(!err.retryable());

    backend.delete(EntityKind::Item, EntityId(9)).await.unwrap();
}

#[tokio::test]
async fn http_backend_reports_decode_and_server_errors() {
    let base = spawn_server(app()).await;
    let backend = HttpBackend::new(&base, timeouts()).unwrap();

    let decode = backend.list(EntityKind::Seat).await.unwrap_err();
    assert!(matches!(decode, ApiError::Decode(_)));

    let server = backend.list(EntityKind::Guest).await.unwrap_err();
    assert_eq!(server.status(), Some(500));
    assert!(server.retryable());
}

#[tokio::test]
async fn http_backend_reports_network_errors() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let backend = HttpBackend::new(&format!("http://{addr}/api"), timeouts()).unwrap();
    let err = backend.list(EntityKind::Item).await.unwrap_err();
    assert!(matches!(err, ApiError::Network(_)));
    assert!(err.retryable());
}
