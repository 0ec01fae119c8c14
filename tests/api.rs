//! API endpoint integration tests

use actuator_bridge::api::ApiServerBuilder;
use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use tower::ServiceExt;

mod common;
use common::{Harness, blind, switch};

const KEY: &str = "test-api-key";

/// Build a test API router over a simulated manager
fn build_test_router(h: &Harness) -> axum::Router {
    ApiServerBuilder::new(h.manager.clone(), 0)
        .api_key(Some(KEY.to_string()))
        .build()
        .router()
}

fn authed(method: &str, uri: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {KEY}"))
        .body(body)
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = Harness::new(false);
    let app = build_test_router(&h);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_ready_reports_device_counts() {
    let h = Harness::new(false);
    h.define_connected(switch("lamp", "10.0.0.7")).await;
    let app = build_test_router(&h);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/ready")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["devices"]["defined"], 1);
    assert_eq!(json["devices"]["connected"], 1);
}

#[tokio::test]
async fn test_device_routes_require_auth() {
    let h = Harness::new(false);
    let app = build_test_router(&h);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/devices")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/devices")
                .header(header::AUTHORIZATION, "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    assert_eq!(body_text(response).await, "wrong API key");
}

#[tokio::test]
async fn test_bearer_scheme_is_case_insensitive() {
    let h = Harness::new(false);
    let app = build_test_router(&h);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/devices")
                .header(header::AUTHORIZATION, format!("bearer {KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_define_then_list() {
    let h = Harness::new(false);
    let app = build_test_router(&h);

    let define = Request::builder()
        .method("POST")
        .uri("/api/devices")
        .header(header::AUTHORIZATION, format!("Bearer {KEY}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            r#"{"name": "blind1", "kind": "blind", "id": "bf01", "key": "k", "properties": {"1": "control"}}"#,
        ))
        .unwrap();
    let response = app.clone().oneshot(define).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "defined 'blind1'");

    let response = app
        .oneshot(authed("GET", "/api/devices", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json[0]["name"], "blind1");
    assert_eq!(json[0]["kind"], "blind");
    assert_eq!(json[0]["calibrating"], false);
}

#[tokio::test]
async fn test_delete_of_initialized_device_conflicts() {
    let h = Harness::new(false);
    h.define_connected(switch("lamp", "10.0.0.7")).await;
    let app = build_test_router(&h);

    let response = app
        .clone()
        .oneshot(authed("DELETE", "/api/devices/lamp", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(authed("POST", "/api/devices/lamp/undefine", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "undefined 'lamp'");

    let response = app
        .oneshot(authed("DELETE", "/api/devices/lamp", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_device_is_not_found() {
    let h = Harness::new(false);
    let app = build_test_router(&h);

    let response = app
        .oneshot(authed("GET", "/api/devices/ghost/props/power", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_property_write_and_read() {
    let h = Harness::new(false);
    h.define_connected(switch("lamp", "10.0.0.7")).await;
    let app = build_test_router(&h);

    let response = app
        .clone()
        .oneshot(authed("PUT", "/api/devices/lamp/props/power", Body::from("true")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "true");

    let response = app
        .oneshot(authed("GET", "/api/devices/lamp/props/power", Body::empty()))
        .await
        .unwrap();
    assert_eq!(body_text(response).await, "true");
}

#[tokio::test]
async fn test_percentage_requires_calibration() {
    let h = Harness::new(false);
    h.define_connected(blind("blind1", "bf01")).await;
    let app = build_test_router(&h);

    let response = app
        .clone()
        .oneshot(authed("PUT", "/api/devices/blind1/percentage", Body::from("40")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("calibrated"));

    let response = app
        .oneshot(authed("PUT", "/api/devices/blind1/percentage", Body::from("half")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
