#![allow(dead_code)]

use chrono::{Duration, Utc};
use openbanking_service::config::{BankConfig, DatabaseConfig, GatewayConfig};
use openbanking_service::models::{AccessGrant, Company, Payment};
use openbanking_service::services::{GatewayStore, MemoryStore};
use openbanking_service::startup::Application;
use openbanking_service::utils::hash_token;
use secrecy::Secret;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;
use wiremock::MockServer;

pub const TEST_COMPANY_ID: &str = "ACME0001";
/// Path prefix of the mocked bank API, mirroring the real deployment layout.
pub const BANK_BASE_PATH: &str = "/premium/sandbox";

pub fn bank_path(path: &str) -> String {
    format!("{}{}", BANK_BASE_PATH, path)
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: Arc<MemoryStore>,
    pub bank: MockServer,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::start(None).await
    }

    /// Spawn with the bank API pointed at a local port nothing listens on.
    pub async fn spawn_with_unreachable_bank() -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
        let port = listener.local_addr().expect("Failed to read port").port();
        drop(listener);

        Self::start(Some(format!("http://127.0.0.1:{}{}", port, BANK_BASE_PATH))).await
    }

    async fn start(bank_url: Option<String>) -> Self {
        let bank = MockServer::start().await;
        let store = Arc::new(MemoryStore::new());

        let config = GatewayConfig {
            common: service_core::config::Config {
                port: 0, // Random port
                allowed_origins: vec!["http://localhost:3000".to_string()],
            },
            service_name: "openbanking-service".to_string(),
            service_version: "test".to_string(),
            log_level: "debug".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 1,
                min_connections: 1,
            },
            bank: BankConfig {
                api_url: bank_url.unwrap_or_else(|| format!("{}{}", bank.uri(), BANK_BASE_PATH)),
                client_id: "test-client".to_string(),
                client_secret: Secret::new("test-secret".to_string()),
                redirect_uri: "https://app.example/callback".to_string(),
                code_challenge: "test-challenge".to_string(),
                code_challenge_verifier: Secret::new("test-verifier".to_string()),
            },
        };

        let app = Application::build_with_store(config, store.clone())
            .await
            .expect("Failed to build test application");

        let port = app.http_port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            store,
            bank,
            client,
        }
    }

    pub async fn seed_company(&self, company_id: &str, enabled: bool) {
        self.store
            .insert_company(&Company {
                company_id: company_id.to_string(),
                company_name: format!("{} s.r.o.", company_id),
                enabled,
                created_utc: Utc::now(),
            })
            .await
            .expect("Failed to seed company");
    }

    /// Store an access grant for `token`. `access_token: None` leaves it pending.
    pub async fn seed_grant(
        &self,
        token: &str,
        state: &str,
        access_token: Option<&str>,
    ) -> AccessGrant {
        let now = Utc::now();
        let grant = AccessGrant {
            grant_id: Uuid::new_v4(),
            token_hash: hash_token(token),
            company_id: TEST_COMPANY_ID.to_string(),
            grant_token: "grant-token".to_string(),
            consent_id: "consent-1".to_string(),
            state: state.to_string(),
            access_token: access_token.map(str::to_string),
            refresh_token: access_token.map(|_| "refresh-token".to_string()),
            expires_utc: now + Duration::minutes(15),
            created_utc: now,
            updated_utc: now,
        };

        self.store
            .insert_access_grant(&grant)
            .await
            .expect("Failed to seed access grant");
        grant
    }

    pub async fn seed_payment(&self, grant: &AccessGrant, payment_id: &str) -> Payment {
        let payment = Payment {
            payment_row_id: Uuid::new_v4(),
            grant_id: grant.grant_id,
            amount: "25.00".to_string(),
            currency: "EUR".to_string(),
            debtor_iban: "SK3112000000198742637541".to_string(),
            creditor_iban: "SK6909000000001234567890".to_string(),
            creditor_name: "Jane Doe".to_string(),
            note: "invoice 42".to_string(),
            payment_type: "sepa-credit-transfers".to_string(),
            instant_payment_flow: None,
            charge_bearer: None,
            payment_id: payment_id.to_string(),
            authorization_id: "auth-1".to_string(),
            created_utc: Utc::now(),
        };

        self.store
            .insert_payment(&payment)
            .await
            .expect("Failed to seed payment");
        payment
    }

    pub async fn grant_for_token(&self, token: &str) -> Option<AccessGrant> {
        self.store
            .find_access_grant_by_token_hash(&hash_token(token))
            .await
            .expect("Failed to query access grant")
    }

    pub async fn get(&self, path: &str, api_key: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(format!("{}{}", self.address, path));
        if let Some(key) = api_key {
            request = request.header("X-Api-Key", key);
        }
        request.send().await.expect("Failed to execute request")
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: &Value,
        api_key: Option<&str>,
    ) -> reqwest::Response {
        let mut request = self
            .client
            .post(format!("{}{}", self.address, path))
            .json(body);
        if let Some(key) = api_key {
            request = request.header("X-Api-Key", key);
        }
        request.send().await.expect("Failed to execute request")
    }

    /// Number of requests the mocked bank has received.
    pub async fn bank_requests(&self) -> usize {
        self.bank
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }
}

/// Parse an error response and check its shape.
pub async fn error_body(response: reqwest::Response) -> (u16, String) {
    let status = response.status().as_u16();
    let body: Value = response.json().await.expect("Failed to parse JSON");

    let trace_id = body["traceId"].as_str().expect("traceId missing");
    assert!(!trace_id.is_empty());

    let error = body["error"].as_str().expect("error missing").to_string();
    (status, error)
}
