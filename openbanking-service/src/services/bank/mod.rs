//! Bank API client.
//!
//! Every call runs in its own step (`bank.<operation>`), carries a fresh
//! `X-Request-ID` and the W3C trace context of that step, and decodes the body
//! into a typed schema. Failures are recorded on the step, with the upstream
//! status and raw body attached to the trace only.

pub mod types;

use reqwest::{header::HeaderMap, Client, RequestBuilder, StatusCode, Url};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use service_core::observability::{inject_trace_headers, StepStack};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::BankConfig;
use crate::dtos::TransactionFilters;
use crate::error::GatewayError;
use crate::models::{InstantPaymentFlow, Payment, PaymentType};
use crate::services::metrics::{record_upstream_request, UPSTREAM_REQUEST_DURATION};
use types::{
    AccountList, AuthorizationTokens, ConsentRequest, ConsentResponse, GrantTokenResponse,
    PaymentInitRequest, PaymentInitResponse, PaymentRejection, ScaStatusResponse,
    TransactionList, TransactionStatusResponse,
};

/// Scope of the account-information product.
pub const AIS_SCOPE: &str = "PREMIUM_AIS";

const INSTANT_PAYMENT_FLOW_HEADER: &str = "Instant-Payment-Flow";

/// Raw upstream response, body already drained.
struct UpstreamResponse {
    status: StatusCode,
    body: String,
}

pub fn is_success(status: StatusCode) -> bool {
    matches!(status.as_u16(), 200 | 201 | 204)
}

/// Decode a successful body. An empty body is only accepted for 204, and only
/// by types that can be built from `null`.
pub fn decode<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, GatewayError> {
    if body.trim().is_empty() {
        if status == StatusCode::NO_CONTENT {
            return serde_json::from_value(serde_json::Value::Null).map_err(|e| {
                GatewayError::Decode(format!("unexpected empty response body: {}", e))
            });
        }
        return Err(GatewayError::Decode(format!(
            "empty response body with status {}",
            status.as_u16()
        )));
    }

    serde_json::from_str(body)
        .map_err(|e| GatewayError::Decode(format!("could not decode response body: {}", e)))
}

fn non_ok(status: StatusCode) -> GatewayError {
    GatewayError::UpstreamUnavailable(format!(
        "bank returned a non-OK status code: {}",
        status.as_u16()
    ))
}

/// Classify a refused payment initiation. Explicit rejections keep their
/// reason; anything else is a generic non-OK failure.
pub fn classify_payment_rejection(status: StatusCode, body: &str) -> GatewayError {
    serde_json::from_str::<PaymentRejection>(body)
        .ok()
        .and_then(|rejection| rejection.reason())
        .map(|reason| GatewayError::UpstreamRejected(reason.to_string()))
        .unwrap_or_else(|| non_ok(status))
}

/// Token endpoints return credentials; their bodies stay out of traces.
fn records_body(operation: &str) -> bool {
    !matches!(operation, "grant_token" | "exchange_code")
}

#[derive(Clone)]
pub struct BankClient {
    client: Client,
    config: BankConfig,
}

impl BankClient {
    pub fn new(config: BankConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Absolute URL of an API path given as segments. Segments are escaped.
    fn endpoint(&self, steps: &mut StepStack, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&self.config.api_url).map_err(|e| {
            steps.fail(GatewayError::UpstreamUnavailable(format!(
                "invalid bank API url: {}",
                e
            )))
        })?;

        match url.path_segments_mut() {
            Ok(mut path) => {
                path.pop_if_empty().extend(segments);
            }
            Err(()) => {
                return Err(steps.fail(GatewayError::UpstreamUnavailable(
                    "bank API url cannot be a base".to_string(),
                )))
            }
        }

        Ok(url)
    }

    /// Send the request from the current step and drain the body.
    async fn execute(
        &self,
        steps: &mut StepStack,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<UpstreamResponse, GatewayError> {
        let request_id = Uuid::new_v4().to_string();
        steps.record("upstream.request_id", request_id.as_str());

        let mut headers = HeaderMap::new();
        inject_trace_headers(&mut headers, &steps.current_context(), &request_id);

        let timer = UPSTREAM_REQUEST_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let result = async {
            let response = request.headers(headers).send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>(UpstreamResponse { status, body })
        }
        .instrument(steps.current_span())
        .await;

        timer.observe_duration();

        match result {
            Ok(response) => {
                steps.record("upstream.status", response.status.as_u16());
                tracing::debug!(
                    operation,
                    request_id = %request_id,
                    status = %response.status,
                    "Bank API responded"
                );
                Ok(response)
            }
            Err(e) => {
                record_upstream_request(operation, "transport_error");
                steps.record("upstream.response", e.to_string().as_str());
                tracing::warn!(
                    operation,
                    request_id = %request_id,
                    error = %e,
                    "Bank API request failed"
                );
                Err(steps.fail(GatewayError::UpstreamUnavailable(
                    "failed to execute request".to_string(),
                )))
            }
        }
    }

    /// Fail the current step with `err`, attaching the upstream response.
    fn reject(
        &self,
        steps: &mut StepStack,
        operation: &'static str,
        response: &UpstreamResponse,
        err: GatewayError,
    ) -> GatewayError {
        record_upstream_request(operation, "rejected");
        steps.fail_upstream(response.status.as_u16(), &response.body, err)
    }

    /// Apply the default classification and decode the body.
    fn finish<T: DeserializeOwned>(
        &self,
        steps: &mut StepStack,
        operation: &'static str,
        response: UpstreamResponse,
    ) -> Result<T, GatewayError> {
        if !is_success(response.status) {
            let err = non_ok(response.status);
            return Err(self.reject(steps, operation, &response, err));
        }

        match decode(response.status, &response.body) {
            Ok(value) => {
                if records_body(operation) {
                    steps.record("upstream.response", response.body.as_str());
                }
                record_upstream_request(operation, "success");
                Ok(value)
            }
            Err(e) => {
                record_upstream_request(operation, "decode_error");
                Err(steps.fail_upstream(response.status.as_u16(), &response.body, e))
            }
        }
    }

    /// Client-credentials grant for the account-information scope.
    pub async fn grant_token(&self, steps: &mut StepStack) -> Result<String, GatewayError> {
        let mut step = steps.enter("bank.grant_token");
        let url = self.endpoint(&mut step, &["auth", "oauth", "v2", "token"])?;

        let request = self.client.post(url).form(&[
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret().as_str()),
            ("grant_type", "client_credentials"),
            ("scope", AIS_SCOPE),
        ]);

        let response = self.execute(&mut step, "grant_token", request).await?;
        let token: GrantTokenResponse = self.finish(&mut step, "grant_token", response)?;
        Ok(token.access_token)
    }

    pub async fn create_consent(
        &self,
        steps: &mut StepStack,
        grant_token: &str,
    ) -> Result<String, GatewayError> {
        let mut step = steps.enter("bank.create_consent");
        let url = self.endpoint(&mut step, &["v3", "consents"])?;

        let request = self
            .client
            .post(url)
            .bearer_auth(grant_token)
            .json(&ConsentRequest {
                combined_service_indicator: true,
            });

        let response = self.execute(&mut step, "create_consent", request).await?;
        let consent: ConsentResponse = self.finish(&mut step, "create_consent", response)?;
        Ok(consent.consent_id)
    }

    /// Hosted-consent page the account holder is redirected to.
    pub fn authorization_url(
        &self,
        steps: &mut StepStack,
        consent_id: &str,
        state: &str,
    ) -> Result<String, GatewayError> {
        let mut step = steps.enter("bank.authorization_url");
        let mut url = self.endpoint(&mut step, &["auth", "oauth", "v2", "authorize"])?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("scope", &format!("{}:{}", AIS_SCOPE, consent_id))
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("state", state)
            .append_pair("code_challenge", &self.config.code_challenge)
            .append_pair("code_challenge_method", "S256");

        Ok(url.to_string())
    }

    /// Exchange an authorization code for access and refresh tokens.
    pub async fn exchange_code(
        &self,
        steps: &mut StepStack,
        code: &str,
    ) -> Result<AuthorizationTokens, GatewayError> {
        let mut step = steps.enter("bank.exchange_code");
        let url = self.endpoint(&mut step, &["auth", "oauth", "v2", "token"])?;

        let request = self
            .client
            .post(url)
            .basic_auth(
                &self.config.client_id,
                Some(self.config.client_secret.expose_secret()),
            )
            .form(&[
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", AIS_SCOPE),
                (
                    "code_verifier",
                    self.config.code_challenge_verifier.expose_secret().as_str(),
                ),
            ]);

        let response = self.execute(&mut step, "exchange_code", request).await?;

        if response.status == StatusCode::BAD_REQUEST {
            let err = GatewayError::CodeRejected(
                "authorization code was rejected by the bank".to_string(),
            );
            return Err(self.reject(&mut step, "exchange_code", &response, err));
        }

        self.finish(&mut step, "exchange_code", response)
    }

    pub async fn list_accounts(
        &self,
        steps: &mut StepStack,
        access_token: &str,
    ) -> Result<AccountList, GatewayError> {
        let mut step = steps.enter("bank.list_accounts");
        let url = self.endpoint(&mut step, &["v3", "accounts"])?;

        let request = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .query(&[("withBalance", "true")]);

        let response = self.execute(&mut step, "list_accounts", request).await?;

        if response.status == StatusCode::UNAUTHORIZED {
            return Err(self.reject(&mut step, "list_accounts", &response, revoked()));
        }

        self.finish(&mut step, "list_accounts", response)
    }

    pub async fn list_transactions(
        &self,
        steps: &mut StepStack,
        access_token: &str,
        account_id: &str,
        filters: &TransactionFilters,
    ) -> Result<TransactionList, GatewayError> {
        let mut step = steps.enter("bank.list_transactions");
        let url = self.endpoint(&mut step, &["v5", "accounts", account_id, "transactions"])?;

        let request = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .query(&filters.to_query());

        let response = self.execute(&mut step, "list_transactions", request).await?;

        match response.status {
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => {
                let err = GatewayError::AccountNotFound("account not found".to_string());
                Err(self.reject(&mut step, "list_transactions", &response, err))
            }
            StatusCode::UNAUTHORIZED => {
                Err(self.reject(&mut step, "list_transactions", &response, revoked()))
            }
            _ => self.finish(&mut step, "list_transactions", response),
        }
    }

    /// Submit a payment. Only `201 Created` is a success; any other status is
    /// classified through [`classify_payment_rejection`].
    pub async fn init_payment(
        &self,
        steps: &mut StepStack,
        access_token: &str,
        payment_type: PaymentType,
        instant_payment_flow: Option<InstantPaymentFlow>,
        body: &PaymentInitRequest,
    ) -> Result<PaymentInitResponse, GatewayError> {
        let mut step = steps.enter("bank.init_payment");
        let url = self.endpoint(&mut step, &["v3", "payments", payment_type.as_str()])?;

        let mut request = self.client.post(url).bearer_auth(access_token).json(body);
        if let Some(flow) = instant_payment_flow {
            request = request.header(INSTANT_PAYMENT_FLOW_HEADER, flow.as_str());
        }

        let response = self.execute(&mut step, "init_payment", request).await?;

        if response.status != StatusCode::CREATED {
            let err = classify_payment_rejection(response.status, &response.body);
            return Err(self.reject(&mut step, "init_payment", &response, err));
        }

        self.finish(&mut step, "init_payment", response)
    }

    /// SCA status of a payment's authorization.
    pub async fn authorization_status(
        &self,
        steps: &mut StepStack,
        access_token: &str,
        payment: &Payment,
    ) -> Result<String, GatewayError> {
        let mut step = steps.enter("bank.authorization_status");
        let url = self.endpoint(
            &mut step,
            &[
                "v1",
                "payments",
                &payment.payment_type,
                &payment.payment_id,
                "authorizations",
                &payment.authorization_id,
            ],
        )?;

        let request = self.client.get(url).bearer_auth(access_token);
        let response = self
            .execute(&mut step, "authorization_status", request)
            .await?;
        let status: ScaStatusResponse =
            self.finish(&mut step, "authorization_status", response)?;
        Ok(status.sca_status)
    }

    /// Settlement status of a payment.
    pub async fn transaction_status(
        &self,
        steps: &mut StepStack,
        access_token: &str,
        payment: &Payment,
    ) -> Result<String, GatewayError> {
        let mut step = steps.enter("bank.transaction_status");
        let url = self.endpoint(
            &mut step,
            &[
                "v3",
                "payments",
                &payment.payment_type,
                &payment.payment_id,
                "status",
            ],
        )?;

        let request = self.client.get(url).bearer_auth(access_token);
        let response = self
            .execute(&mut step, "transaction_status", request)
            .await?;
        let status: TransactionStatusResponse =
            self.finish(&mut step, "transaction_status", response)?;
        Ok(status.transaction_status)
    }
}

fn revoked() -> GatewayError {
    GatewayError::Forbidden("bank session has been revoked, reauthorization required".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;
    use serde::Deserialize;

    fn test_config() -> BankConfig {
        BankConfig {
            api_url: "https://bank.example/premium/sandbox".to_string(),
            client_id: "client-1".to_string(),
            client_secret: Secret::new("secret".to_string()),
            redirect_uri: "https://app.example/callback".to_string(),
            code_challenge: "challenge".to_string(),
            code_challenge_verifier: Secret::new("verifier".to_string()),
        }
    }

    #[derive(Debug, Deserialize)]
    struct Status {
        status: String,
    }

    #[test]
    fn test_success_statuses() {
        assert!(is_success(StatusCode::OK));
        assert!(is_success(StatusCode::CREATED));
        assert!(is_success(StatusCode::NO_CONTENT));
        assert!(!is_success(StatusCode::ACCEPTED));
        assert!(!is_success(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_decode_fails_closed() {
        let ok: Status = decode(StatusCode::OK, r#"{"status":"ok"}"#).unwrap();
        assert_eq!(ok.status, "ok");

        let empty: Option<Status> = decode(StatusCode::NO_CONTENT, "").unwrap();
        assert!(empty.is_none());

        assert!(matches!(
            decode::<Status>(StatusCode::OK, ""),
            Err(GatewayError::Decode(_))
        ));
        assert!(matches!(
            decode::<Status>(StatusCode::OK, r#"{"other":1}"#),
            Err(GatewayError::Decode(_))
        ));
        assert!(matches!(
            decode::<Status>(StatusCode::OK, "<html>"),
            Err(GatewayError::Decode(_))
        ));
    }

    #[test]
    fn test_format_error_rejection_keeps_detail() {
        let err = classify_payment_rejection(
            StatusCode::BAD_REQUEST,
            r#"{"transactionStatus":"RJCT","errorCode":"FORMAT_ERROR","additionalInformation":"bad iban"}"#,
        );

        assert!(matches!(err, GatewayError::UpstreamRejected(_)));
        assert_eq!(err.to_string(), "transaction data badly formatted: bad iban");
    }

    #[test]
    fn test_generic_rejections() {
        let with_info = classify_payment_rejection(
            StatusCode::BAD_REQUEST,
            r#"{"transactionStatus":"RJCT","additionalInformation":"limit exceeded"}"#,
        );
        assert_eq!(with_info.to_string(), "transaction was rejected: limit exceeded");

        let bare = classify_payment_rejection(
            StatusCode::BAD_REQUEST,
            r#"{"transactionStatus":"RJCT"}"#,
        );
        assert_eq!(bare.to_string(), "transaction was rejected");
    }

    #[test]
    fn test_unclassified_failures_are_generic() {
        let pending = classify_payment_rejection(
            StatusCode::BAD_GATEWAY,
            r#"{"transactionStatus":"PDNG"}"#,
        );
        assert!(matches!(pending, GatewayError::UpstreamUnavailable(_)));
        assert_eq!(pending.to_string(), "bank returned a non-OK status code: 502");

        let garbage = classify_payment_rejection(StatusCode::INTERNAL_SERVER_ERROR, "oops");
        assert!(matches!(garbage, GatewayError::UpstreamUnavailable(_)));
    }

    #[test]
    fn test_authorization_url() {
        let client = BankClient::new(test_config());
        let mut steps = StepStack::new("test");

        let url = client
            .authorization_url(&mut steps, "consent-42", "state-xyz")
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert_eq!(parsed.path(), "/premium/sandbox/auth/oauth/v2/authorize");
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["scope"], "PREMIUM_AIS:consent-42");
        assert_eq!(params["redirect_uri"], "https://app.example/callback");
        assert_eq!(params["state"], "state-xyz");
        assert_eq!(params["code_challenge"], "challenge");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(steps.depth(), 0);
    }

    #[test]
    fn test_endpoint_escapes_segments() {
        let client = BankClient::new(test_config());
        let mut steps = StepStack::new("test");

        let url = client
            .endpoint(&mut steps, &["v5", "accounts", "a/b c", "transactions"])
            .unwrap();

        assert_eq!(
            url.as_str(),
            "https://bank.example/premium/sandbox/v5/accounts/a%2Fb%20c/transactions"
        );
    }

    /// Base URL on a local port nothing listens on.
    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}/premium/sandbox", port)
    }

    #[tokio::test]
    async fn test_transport_failure_hides_upstream_details() {
        let client = BankClient::new(BankConfig {
            api_url: closed_port_url(),
            ..test_config()
        });
        let mut steps = StepStack::new("POST /authorize");

        let err = client.grant_token(&mut steps).await.unwrap_err();

        assert!(matches!(err, GatewayError::UpstreamUnavailable(_)));
        assert_eq!(err.to_string(), "failed to execute request");
        assert_eq!(steps.error(), Some("failed to execute request"));
        assert_eq!(steps.depth(), 0);
    }
}
