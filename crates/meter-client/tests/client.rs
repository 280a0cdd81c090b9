//! Client SDK tests against a mock meter service.

use meter_client::{ClientError, ClientOptions, MeterClient};
use meter_core::{BillingEvent, EventSequence, IdentityField, SubscriptionState, UserId};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

fn event(user_id: &str, seq: i64) -> BillingEvent {
    BillingEvent {
        user_id: user(user_id),
        billing_customer_id: "C1".parse().unwrap(),
        billing_subscription_id: "S1".parse().unwrap(),
        plan_id: Some("pro".into()),
        current_period_end: None,
        event_sequence: EventSequence(seq),
    }
}

// ============================================================================
// Quota
// ============================================================================

#[tokio::test]
async fn try_consume_sends_key_and_parses_decision() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/quota/consume"))
        .and(header("x-api-key", "svc-key"))
        .and(body_json(json!({ "user_id": "u1", "limit": 2 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "allowed": true,
            "remaining_before_call": 2,
            "count": 1,
            "limit": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = MeterClient::new(&server.uri(), "svc-key").unwrap();
    let decision = client.try_consume(&user("u1"), Some(2)).await.unwrap();

    assert!(decision.allowed);
    assert_eq!(decision.remaining_before_call, 2);
    assert_eq!(decision.count, 1);
}

#[tokio::test]
async fn is_allowed_reflects_denial() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/quota/consume"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "allowed": false,
            "remaining_before_call": 0,
            "count": 5,
            "limit": 5
        })))
        .mount(&server)
        .await;

    let client = MeterClient::new(&server.uri(), "svc-key").unwrap();
    assert!(!client.is_allowed(&user("u1"), None).await);
}

#[tokio::test]
async fn store_outage_maps_to_store_unavailable_and_denies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/quota/consume"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": { "code": "store_unavailable", "message": "Store unavailable, retry later" }
        })))
        .mount(&server)
        .await;

    let client = MeterClient::new(&server.uri(), "svc-key").unwrap();

    let err = client.try_consume(&user("u1"), Some(3)).await.unwrap_err();
    assert!(matches!(err, ClientError::StoreUnavailable { .. }));
    assert!(err.is_retryable());

    assert!(!client.is_allowed(&user("u1"), Some(3)).await);
}

#[tokio::test]
async fn unreachable_service_denies() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let client = MeterClient::new(&uri, "svc-key").unwrap();
    assert!(!client.is_allowed(&user("u1"), Some(3)).await);
}

#[tokio::test]
async fn reset_requires_admin_key_option() {
    let server = MockServer::start().await;
    let client = MeterClient::new(&server.uri(), "svc-key").unwrap();

    let err = client.reset_quota(&user("u1")).await.unwrap_err();
    assert!(matches!(err, ClientError::Configuration(_)));
}

#[tokio::test]
async fn reset_sends_admin_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/quota/u1/reset"))
        .and(header("x-admin-key", "admin-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user_id": "u1",
            "count": 0,
            "limit": 100,
            "remaining": 100,
            "updated_at": "2026-01-01T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let options = ClientOptions::default().admin_key("admin-key");
    let client = MeterClient::with_options(&server.uri(), "svc-key", options).unwrap();
    let usage = client.reset_quota(&user("u1")).await.unwrap();

    assert_eq!(usage.count, 0);
    assert_eq!(usage.remaining, 100);
}

// ============================================================================
// Billing
// ============================================================================

#[tokio::test]
async fn stale_event_is_ok_not_applied() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/billing/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "applied": false,
            "reason": { "kind": "stale", "last_sequence": 10 }
        })))
        .mount(&server)
        .await;

    let client = MeterClient::new(&server.uri(), "svc-key").unwrap();
    let outcome = client.apply_event(&event("u1", 5)).await.unwrap();

    assert!(!outcome.applied);
    assert!(outcome.is_stale());
}

#[tokio::test]
async fn conflict_maps_to_identity_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/billing/events"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": {
                "code": "identity_conflict",
                "message": "identity conflict on billing_customer_id",
                "details": {
                    "field": "customer",
                    "owner": "u1",
                    "existing": "C1",
                    "incoming": "C1"
                }
            }
        })))
        .mount(&server)
        .await;

    let client = MeterClient::new(&server.uri(), "svc-key").unwrap();
    let err = client.apply_event(&event("u2", 1)).await.unwrap_err();

    match err {
        ClientError::IdentityConflict(conflict) => {
            assert_eq!(conflict.field, IdentityField::Customer);
            assert_eq!(conflict.owner, user("u1"));
        }
        other => panic!("expected identity conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn subscription_parses_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/subscriptions/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user_id": "u1",
            "state": "free",
            "active_paid": false,
            "evaluated_at": "2026-01-01T00:00:00Z",
            "record": null
        })))
        .mount(&server)
        .await;

    let client = MeterClient::new(&server.uri(), "svc-key").unwrap();
    let status = client.subscription(&user("u1")).await.unwrap();

    assert_eq!(status.state, SubscriptionState::Free);
    assert!(!status.active_paid);
    assert!(status.record.is_none());
}

#[tokio::test]
async fn unauthorized_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/quota/u1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "code": "unauthorized", "message": "unauthorized" }
        })))
        .mount(&server)
        .await;

    let client = MeterClient::new(&server.uri(), "wrong").unwrap();
    let err = client.quota(&user("u1")).await.unwrap_err();

    assert!(matches!(err, ClientError::Api { status: 401, .. }));
    assert!(!err.is_retryable());
}
