mod common;

use common::{bank_path, error_body, TestApp, TEST_COMPANY_ID};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, ResponseTemplate};

async fn mount_grant_and_consent(app: &TestApp) {
    Mock::given(method("POST"))
        .and(path(bank_path("/auth/oauth/v2/token")))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "grant-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&app.bank)
        .await;

    Mock::given(method("POST"))
        .and(path(bank_path("/v3/consents")))
        .and(header("authorization", "Bearer grant-token"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "consentId": "consent-1",
            "consentStatus": "received"
        })))
        .expect(1)
        .mount(&app.bank)
        .await;
}

#[tokio::test]
async fn authorize_creates_pending_grant() {
    let app = TestApp::spawn().await;
    app.seed_company(TEST_COMPANY_ID, true).await;
    mount_grant_and_consent(&app).await;

    let response = app
        .post_json("/authorize", &json!({ "companyId": TEST_COMPANY_ID }), None)
        .await;

    assert_eq!(response.status().as_u16(), 201);

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    let token = body["token"].as_str().expect("token missing");
    let expires_at = body["expiresAt"].as_str().expect("expiresAt missing");
    assert!(chrono::DateTime::parse_from_rfc3339(expires_at).is_ok());

    let url = reqwest::Url::parse(body["url"].as_str().expect("url missing")).unwrap();
    assert_eq!(url.path(), bank_path("/auth/oauth/v2/authorize"));
    let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
    assert_eq!(params["scope"], "PREMIUM_AIS:consent-1");
    assert_eq!(params["client_id"], "test-client");
    assert_eq!(params["code_challenge"], "test-challenge");
    assert_eq!(params["code_challenge_method"], "S256");

    let grant = app.grant_for_token(token).await.expect("grant not stored");
    assert_eq!(grant.company_id, TEST_COMPANY_ID);
    assert_eq!(grant.consent_id, "consent-1");
    assert_eq!(grant.state, params["state"]);
    assert!(grant.access_token.is_none());
    assert_ne!(grant.token_hash, token);
}

#[tokio::test]
async fn authorize_sends_request_id_to_bank() {
    let app = TestApp::spawn().await;
    app.seed_company(TEST_COMPANY_ID, true).await;
    mount_grant_and_consent(&app).await;

    app.post_json("/authorize", &json!({ "companyId": TEST_COMPANY_ID }), None)
        .await;

    let requests = app.bank.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    for request in requests {
        assert!(request.headers.get("x-request-id").is_some());
    }
}

#[tokio::test]
async fn authorize_unknown_company_is_not_found() {
    let app = TestApp::spawn().await;

    let response = app
        .post_json("/authorize", &json!({ "companyId": "NOPE" }), None)
        .await;

    let (status, error) = error_body(response).await;
    assert_eq!(status, 404);
    assert_eq!(error, "company with ID 'NOPE' not found");
    assert_eq!(app.bank_requests().await, 0);
}

#[tokio::test]
async fn authorize_disabled_company_is_not_found() {
    let app = TestApp::spawn().await;
    app.seed_company(TEST_COMPANY_ID, false).await;

    let response = app
        .post_json("/authorize", &json!({ "companyId": TEST_COMPANY_ID }), None)
        .await;

    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(app.bank_requests().await, 0);
}

#[tokio::test]
async fn authorize_rejects_invalid_body() {
    let app = TestApp::spawn().await;

    let response = app
        .post_json("/authorize", &json!({ "companyId": "" }), None)
        .await;
    let (status, error) = error_body(response).await;
    assert_eq!(status, 400);
    assert!(error.starts_with("bad request"));

    let response = app.post_json("/authorize", &json!({}), None).await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn authorize_consent_failure_persists_nothing() {
    let app = TestApp::spawn().await;
    app.seed_company(TEST_COMPANY_ID, true).await;

    Mock::given(method("POST"))
        .and(path(bank_path("/auth/oauth/v2/token")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "grant-token"
        })))
        .mount(&app.bank)
        .await;

    Mock::given(method("POST"))
        .and(path(bank_path("/v3/consents")))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&app.bank)
        .await;

    let response = app
        .post_json("/authorize", &json!({ "companyId": TEST_COMPANY_ID }), None)
        .await;

    let (status, error) = error_body(response).await;
    assert_eq!(status, 500);
    assert_eq!(
        error,
        "failed to get consent id: bank returned a non-OK status code: 503"
    );
    assert!(!error.contains("maintenance"));
    assert_eq!(app.store.access_grant_count(), 0);
}

#[tokio::test]
async fn authorize_malformed_grant_response_is_reported() {
    let app = TestApp::spawn().await;
    app.seed_company(TEST_COMPANY_ID, true).await;

    Mock::given(method("POST"))
        .and(path(bank_path("/auth/oauth/v2/token")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": 1 })))
        .mount(&app.bank)
        .await;

    let response = app
        .post_json("/authorize", &json!({ "companyId": TEST_COMPANY_ID }), None)
        .await;

    let (status, error) = error_body(response).await;
    assert_eq!(status, 500);
    assert!(error.starts_with("failed to get client credentials grant token"));
    assert_eq!(app.store.access_grant_count(), 0);
}

#[tokio::test]
async fn authorize_unreachable_bank_is_reported_without_details() {
    let app = TestApp::spawn_with_unreachable_bank().await;
    app.seed_company(TEST_COMPANY_ID, true).await;

    let response = app
        .post_json("/authorize", &json!({ "companyId": TEST_COMPANY_ID }), None)
        .await;

    let (status, error) = error_body(response).await;
    assert_eq!(status, 500);
    assert_eq!(
        error,
        "failed to get client credentials grant token: failed to execute request"
    );
    assert!(!error.contains("127.0.0.1"));
    assert_eq!(app.store.access_grant_count(), 0);
}
