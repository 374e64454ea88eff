mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use courier::api::{ApiServer, ApiServerConfig, AppState};
use courier::database::models::UserContactDbModel;
use courier::database::repositories::{SqlxUserDirectory, UserDirectory};
use courier::gateway::Identity;

use common::{Harness, token_for};

fn router(h: &Harness) -> Router {
    let state = AppState::new(
        h.dispatcher.clone(),
        h.gateway.clone(),
        h.orchestrator.clone(),
    );
    ApiServer::new(ApiServerConfig::default(), state).build_router()
}

async fn call(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health_is_public() {
    let h = Harness::new().await;
    let router = router(&h);

    let (status, body) = call(&router, Method::GET, "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["connections"], 0);
    assert_eq!(body["queue"]["total"], 0);
}

#[tokio::test]
async fn test_admin_routes_require_a_valid_token() {
    let h = Harness::new().await;
    let router = router(&h);

    let (status, body) = call(&router, Method::GET, "/api/mail-queue/stats", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = call(
        &router,
        Method::GET,
        "/api/gateway/online",
        Some("not-a-jwt"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = token_for("admin");
    let (status, _) = call(
        &router,
        Method::GET,
        "/api/mail-queue/stats",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_mail_queue_lifecycle_over_http() {
    let h = Harness::new().await;
    let router = router(&h);
    let token = token_for("admin");

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/mail-queue",
        Some(&token),
        Some(json!({
            "to": "ada@example.com",
            "subject": "Hello",
            "content": "<p>Hi</p>",
            "priority": "low"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &router,
        Method::GET,
        &format!("/api/mail-queue/{}", id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["recipient"], "ada@example.com");

    let (_, stats) = call(&router, Method::GET, "/api/mail-queue/stats", Some(&token), None).await;
    assert_eq!(stats["pending"], 1);

    let (status, report) = call(
        &router,
        Method::POST,
        "/api/mail-queue/process",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["sent"], 1);
    assert_eq!(h.transport.sent()[0].to, "ada@example.com");

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/mail-queue/retry",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["affected"], 0);

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/mail-queue/cleanup",
        Some(&token),
        Some(json!({ "olderThanDays": 30 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["affected"], 0);

    let (status, body) = call(
        &router,
        Method::GET,
        "/api/mail-queue/does-not-exist",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_enqueue_validation_is_422() {
    let h = Harness::new().await;
    let router = router(&h);
    let token = token_for("admin");

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/mail-queue",
        Some(&token),
        Some(json!({ "to": "ada@example.com", "subject": "No body" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_notification_ingress() {
    let h = Harness::new().await;
    let router = router(&h);
    let token = token_for("admin");
    SqlxUserDirectory::new(h.pool.clone())
        .upsert_contact(&UserContactDbModel {
            user_id: "u1".to_string(),
            display_name: "Ada".to_string(),
            email: Some("ada@example.com".to_string()),
        })
        .await
        .unwrap();

    let (_conn, mut rx) = h.gateway.connect(&Identity {
        user_id: "u1".to_string(),
        username: "Ada".to_string(),
    });
    rx.try_recv().unwrap();

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/notifications",
        Some(&token),
        Some(json!({
            "userId": "u1",
            "title": "Build failed",
            "content": "main is red",
            "priority": "high"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["failures"], json!([]));
    let report = &body["reports"][0];
    assert_eq!(report["liveConnections"], 1);
    assert_eq!(report["mail"]["status"], "queued");
    assert_eq!(report["notification"]["sender_id"], "admin");

    let pushed = rx.try_recv().unwrap();
    assert_eq!(pushed.data["title"], "Build failed");
    assert_eq!(pushed.data["senderId"], "admin");

    let (status, history) = call(
        &router,
        Method::GET,
        "/api/notifications/users/u1?limit=5",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/notifications",
        Some(&token),
        Some(json!({ "title": "Nobody", "content": "no targets" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"]["fields"][0], "userId");

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/notifications",
        Some(&token),
        Some(json!({ "kind": "announcement", "title": "Hi all", "content": "Welcome" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["reports"][0]["mail"]["status"], "not_required");
    assert_eq!(rx.try_recv().unwrap().event, "new_announcement");
}

#[tokio::test]
async fn test_gateway_admin() {
    let h = Harness::new().await;
    let router = router(&h);
    let token = token_for("admin");

    let identity = Identity {
        user_id: "u7".to_string(),
        username: "u7".to_string(),
    };
    let (_a, _a_rx) = h.gateway.connect(&identity);
    let (_b, _b_rx) = h.gateway.connect(&identity);

    let (status, body) = call(&router, Method::GET, "/api/gateway/online", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["onlineUsers"], 1);
    assert_eq!(body["connections"], 2);
    assert_eq!(body["userIds"], json!(["u7"]));

    let (_, body) = call(&router, Method::GET, "/api/gateway/users/u7", Some(&token), None).await;
    assert_eq!(body["online"], true);
    assert_eq!(body["connections"], 2);

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/gateway/rooms/lobby/emit",
        Some(&token),
        Some(json!({ "event": "poll_opened", "data": { "id": 1 } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/gateway/users/u7/disconnect",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert!(!h.gateway.is_user_online("u7"));

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/gateway/maintenance",
        Some(&token),
        Some(json!({ "message": "Deploying" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_logging_routes_without_logging_config() {
    let h = Harness::new().await;
    let router = router(&h);
    let token = token_for("admin");

    let (status, body) = call(&router, Method::GET, "/api/logging", Some(&token), None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
}
