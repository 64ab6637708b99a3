//! Admission and renewal-on-use behavior of the internal validator.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Duration;
use tower::ServiceExt;

use vaultgate_downstream::auth::TokenRenewer;
use vaultgate_downstream::config::DownstreamConfig;
use vaultgate_downstream::{build_router, AppState};
use vaultgate_token::{TokenEngine, TokenEngineConfig, VaultKeyStore};
use vaultgate_types::{
    AuditEventType, Clock, GatewayError, ManualClock, RecordingAuditSink,
};
use vaultgate_vault::{paths, MemoryVault, SecretsVault};

struct LocalRenewer {
    engine: Arc<TokenEngine>,
}

#[async_trait]
impl TokenRenewer for LocalRenewer {
    async fn renew(&self, raw: &str) -> Result<String, GatewayError> {
        let view = self.engine.parse(raw).map_err(GatewayError::InvalidToken)?;
        let minted = self
            .engine
            .renew_from(&view.claims)
            .await
            .map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
        Ok(minted.raw)
    }
}

struct TestService {
    router: Router,
    engine: Arc<TokenEngine>,
    audit: Arc<RecordingAuditSink>,
    clock: ManualClock,
}

async fn service() -> TestService {
    service_with(DownstreamConfig::default()).await
}

async fn service_with(config: DownstreamConfig) -> TestService {
    let clock = ManualClock::from_system();
    let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
    let audit = Arc::new(RecordingAuditSink::default());

    let vault = Arc::new(MemoryVault::with_clock(clock_arc.clone()));
    let key_doc = serde_json::json!({ "kid": "kid-1", "key": BASE64.encode([7u8; 32]) });
    vault
        .put_secret(paths::TOKEN_SIGNING_KEY, key_doc.to_string().as_bytes())
        .await
        .unwrap();
    vault
        .put_secret(
            paths::TOKEN_VERIFICATION_KEY,
            serde_json::json!([key_doc]).to_string().as_bytes(),
        )
        .await
        .unwrap();

    let vault_dyn: Arc<dyn SecretsVault> = vault;
    let keys = Arc::new(VaultKeyStore::new(
        vault_dyn,
        Duration::seconds(300),
        clock_arc.clone(),
    ));
    let engine = Arc::new(TokenEngine::new(
        TokenEngineConfig::new("vaultgate", "payments-internal"),
        keys,
        clock_arc.clone(),
    ));

    let state = AppState {
        config: Arc::new(config),
        engine: engine.clone(),
        renewer: Arc::new(LocalRenewer {
            engine: engine.clone(),
        }),
        audit: audit.clone(),
        clock: clock_arc,
    };
    TestService {
        router: build_router(state),
        engine,
        audit,
        clock,
    }
}

async fn mint(service: &TestService, permissions: &[&str]) -> String {
    service
        .engine
        .mint(
            "vendor-A",
            permissions.iter().map(|p| p.to_string()).collect(),
            None,
        )
        .await
        .unwrap()
        .raw
}

async fn request(
    router: &Router,
    method: &str,
    path: &str,
    bearer: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, Option<String>, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(bearer) = bearer {
        builder = builder.header(AUTHORIZATION, format!("Bearer {bearer}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let renewed = response
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, renewed, value)
}

fn payment_body() -> serde_json::Value {
    serde_json::json!({ "amount": 1250, "currency": "EUR", "reference": "order-77" })
}

#[tokio::test]
async fn capable_token_is_admitted() {
    let s = service().await;
    let token = mint(&s, &["process_payment"]).await;

    let (status, _, body) = request(
        &s.router,
        "POST",
        "/internal/v1/payments",
        Some(&token),
        Some(payment_body()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "ACCEPTED");
    assert_eq!(body["clientId"], "vendor-A");
    assert_eq!(s.audit.of_type(AuditEventType::TokenValidated).len(), 1);
}

#[tokio::test]
async fn status_reads_need_the_view_capability() {
    let s = service().await;
    let token = mint(&s, &["view_status"]).await;
    let id = uuid::Uuid::new_v4();

    let (status, _, body) = request(
        &s.router,
        "GET",
        &format!("/internal/v1/payments/{id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["paymentId"], serde_json::json!(id.to_string()));
    assert_eq!(body["status"], "SETTLED");
}

#[tokio::test]
async fn missing_capability_is_403() {
    let s = service().await;
    let token = mint(&s, &["view_status"]).await;

    let (status, _, body) = request(
        &s.router,
        "POST",
        "/internal/v1/payments",
        Some(&token),
        Some(payment_body()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["errorCode"], "INSUFFICIENT_PERMISSIONS");
}

#[tokio::test]
async fn capability_match_is_case_sensitive() {
    let s = service().await;
    let token = mint(&s, &["Process_Payment"]).await;

    let (status, _, _) = request(
        &s.router,
        "POST",
        "/internal/v1/payments",
        Some(&token),
        Some(payment_body()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn missing_bearer_is_401() {
    let s = service().await;
    let (status, _, body) = request(
        &s.router,
        "POST",
        "/internal/v1/payments",
        None,
        Some(payment_body()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["errorCode"], "INVALID_TOKEN");
}

#[tokio::test]
async fn garbage_token_is_401() {
    let s = service().await;
    let (status, _, body) = request(
        &s.router,
        "POST",
        "/internal/v1/payments",
        Some("not.a.token"),
        Some(payment_body()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["errorCode"], "INVALID_TOKEN");
}

#[tokio::test]
async fn near_expiry_token_is_renewed_on_use() {
    let s = service().await;
    let token = mint(&s, &["view_status"]).await;
    let id = uuid::Uuid::new_v4();

    // Inside the renewal threshold but still valid.
    s.clock.advance(Duration::seconds(3600 - 120));
    let (status, renewed, _) = request(
        &s.router,
        "GET",
        &format!("/internal/v1/payments/{id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let renewed = renewed.expect("response must carry a fresh bearer");
    let renewed_token = renewed.strip_prefix("Bearer ").unwrap();
    assert_ne!(renewed_token, token);
    assert_eq!(s.audit.of_type(AuditEventType::TokenRenewed).len(), 1);
}

#[tokio::test]
async fn freshly_expired_token_gets_one_renewal() {
    let s = service().await;
    let token = mint(&s, &["view_status"]).await;
    let id = uuid::Uuid::new_v4();

    // Past expiry and grace, inside the renewal window.
    s.clock.advance(Duration::seconds(3600 + 60));
    let (status, renewed, _) = request(
        &s.router,
        "GET",
        &format!("/internal/v1/payments/{id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(renewed.is_some(), "renewed token must be attached");
    assert_eq!(s.audit.of_type(AuditEventType::TokenRenewed).len(), 1);
}

#[tokio::test]
async fn expired_token_with_renewal_disabled_is_401() {
    let mut config = DownstreamConfig::default();
    config.token.renewal.enabled = false;
    let s = service_with(config).await;
    let token = mint(&s, &["view_status"]).await;
    let id = uuid::Uuid::new_v4();

    s.clock.advance(Duration::seconds(3600 + 60));
    let (status, _, body) = request(
        &s.router,
        "GET",
        &format!("/internal/v1/payments/{id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["errorCode"], "INVALID_TOKEN");
}

#[tokio::test]
async fn validate_endpoint_reports_the_outcome() {
    let s = service().await;
    let token = mint(&s, &["process_payment"]).await;

    let response = s
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/internal/v1/tokens/validate")
                .header("X-Required-Permission", "process_payment")
                .body(Body::from(token))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["valid"], true);
    assert_eq!(value["subject"], "vendor-A");
}

#[tokio::test]
async fn renew_endpoint_returns_a_fresh_token() {
    let s = service().await;
    let token = mint(&s, &["view_status"]).await;

    let response = s
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/internal/v1/tokens/renew")
                .body(Body::from(token.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["tokenType"], "Bearer");
    assert_ne!(value["token"], serde_json::json!(token));
}

#[tokio::test]
async fn unknown_body_fields_are_rejected() {
    let s = service().await;
    let token = mint(&s, &["process_payment"]).await;

    let mut body = payment_body();
    body["surprise"] = serde_json::json!("field");
    let (status, _, _) = request(
        &s.router,
        "POST",
        "/internal/v1/payments",
        Some(&token),
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
