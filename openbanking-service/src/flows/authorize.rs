//! Consent authorization: grant token, consent, redirect URL and a pending
//! access grant the bank callback completes later.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use service_core::observability::StepStack;
use uuid::Uuid;

use super::fail_flow;
use crate::dtos::AuthorizeResponse;
use crate::error::GatewayError;
use crate::models::{AccessGrant, Company};
use crate::startup::AppState;
use crate::utils::{generate_state, generate_token, hash_token};

/// Time the account holder has to complete the bank redirect.
pub const PENDING_AUTHORIZATION_TTL_MINUTES: i64 = 15;

pub async fn authorize(
    steps: &mut StepStack,
    state: &AppState,
    company_id: &str,
) -> Result<AuthorizeResponse, GatewayError> {
    let mut flow = steps.enter("authorize");
    match run(&mut flow, state, company_id).await {
        Ok(response) => Ok(response),
        Err(e) => Err(fail_flow(flow, "authorize", e)),
    }
}

async fn run(
    steps: &mut StepStack,
    state: &AppState,
    company_id: &str,
) -> Result<AuthorizeResponse, GatewayError> {
    find_company(steps, state, company_id).await?;

    let grant_token = state
        .bank
        .grant_token(steps)
        .await
        .map_err(|e| e.context("failed to get client credentials grant token"))?;

    let consent_id = state
        .bank
        .create_consent(steps, &grant_token)
        .await
        .map_err(|e| e.context("failed to get consent id"))?;

    let redirect_state = generate_state();
    let url = state
        .bank
        .authorization_url(steps, &consent_id, &redirect_state)
        .map_err(|e| e.context("failed to create auth url"))?;

    let token = generate_token();
    let expires_utc = persist(
        steps,
        state,
        PendingGrant {
            company_id,
            token: &token,
            grant_token,
            consent_id,
            state: redirect_state,
        },
    )
    .await?;

    Ok(AuthorizeResponse {
        token,
        url,
        expires_at: expires_utc.to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}

/// Disabled companies are reported exactly like unknown ones.
async fn find_company(
    steps: &mut StepStack,
    state: &AppState,
    company_id: &str,
) -> Result<Company, GatewayError> {
    let step = steps.enter("authorize.company");

    match state.store.find_company(company_id).await {
        Ok(Some(company)) if company.enabled => Ok(company),
        Ok(_) => Err(step.fail(GatewayError::NotFound(format!(
            "company with ID '{}' not found",
            company_id
        )))),
        Err(e) => Err(step.fail(GatewayError::from(e).context("failed to query company"))),
    }
}

struct PendingGrant<'a> {
    company_id: &'a str,
    token: &'a str,
    grant_token: String,
    consent_id: String,
    state: String,
}

async fn persist(
    steps: &mut StepStack,
    state: &AppState,
    pending: PendingGrant<'_>,
) -> Result<DateTime<Utc>, GatewayError> {
    let step = steps.enter("authorize.persist");

    let now = Utc::now();
    let grant = AccessGrant {
        grant_id: Uuid::new_v4(),
        token_hash: hash_token(pending.token),
        company_id: pending.company_id.to_string(),
        grant_token: pending.grant_token,
        consent_id: pending.consent_id,
        state: pending.state,
        access_token: None,
        refresh_token: None,
        expires_utc: now + Duration::minutes(PENDING_AUTHORIZATION_TTL_MINUTES),
        created_utc: now,
        updated_utc: now,
    };

    match state.store.insert_access_grant(&grant).await {
        Ok(()) => {
            tracing::info!(
                grant_id = %grant.grant_id,
                company_id = %grant.company_id,
                "Pending authorization created"
            );
            Ok(grant.expires_utc)
        }
        Err(e) => Err(step.fail(GatewayError::from(e).context("failed to save to database"))),
    }
}
