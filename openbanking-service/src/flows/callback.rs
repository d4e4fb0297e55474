//! Completion of a pending authorization from the bank redirect.

use chrono::Utc;
use service_core::observability::StepStack;

use super::fail_flow;
use crate::dtos::CallbackRequest;
use crate::error::GatewayError;
use crate::models::AccessGrant;
use crate::services::bank::types::AuthorizationTokens;
use crate::startup::AppState;

/// The `state` value alone selects the grant the exchanged tokens are attached to.
pub async fn callback(
    steps: &mut StepStack,
    state: &AppState,
    request: &CallbackRequest,
) -> Result<(), GatewayError> {
    let mut flow = steps.enter("callback");
    match run(&mut flow, state, request).await {
        Ok(()) => Ok(()),
        Err(e) => Err(fail_flow(flow, "callback", e)),
    }
}

async fn run(
    steps: &mut StepStack,
    state: &AppState,
    request: &CallbackRequest,
) -> Result<(), GatewayError> {
    let grant = find_pending(steps, state, &request.state).await?;

    if grant.is_expired(Utc::now()) {
        tracing::warn!(
            grant_id = %grant.grant_id,
            expired_at = %grant.expires_utc,
            "Callback received after the authorization window"
        );
    }

    let tokens = state
        .bank
        .exchange_code(steps, &request.code)
        .await
        .map_err(|e| e.context("failed to exchange authorization code"))?;

    complete(steps, state, &grant, &tokens).await
}

async fn find_pending(
    steps: &mut StepStack,
    state: &AppState,
    redirect_state: &str,
) -> Result<AccessGrant, GatewayError> {
    let step = steps.enter("callback.lookup");

    match state.store.find_access_grant_by_state(redirect_state).await {
        Ok(Some(grant)) => Ok(grant),
        Ok(None) => Err(step.fail(GatewayError::NotFound(format!(
            "token with state '{}' not found",
            redirect_state
        )))),
        Err(e) => Err(step.fail(GatewayError::from(e).context("failed to query token"))),
    }
}

async fn complete(
    steps: &mut StepStack,
    state: &AppState,
    grant: &AccessGrant,
    tokens: &AuthorizationTokens,
) -> Result<(), GatewayError> {
    let step = steps.enter("callback.persist");

    match state
        .store
        .complete_access_grant(grant.grant_id, &tokens.access_token, &tokens.refresh_token)
        .await
    {
        Ok(completed) => {
            tracing::info!(
                grant_id = %completed.grant_id,
                company_id = %completed.company_id,
                "Authorization completed"
            );
            Ok(())
        }
        Err(e) => Err(step.fail(GatewayError::from(e).context("failed to save tokens"))),
    }
}
