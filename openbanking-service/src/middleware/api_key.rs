//! Bearer token authentication for account and payment routes.
//!
//! Clients present the opaque token returned by `POST /authorize` in the
//! `X-Api-Key` header. Only its digest is stored, so the lookup hashes the
//! presented value and matches it against the stored hash.

use axum::http::HeaderMap;
use service_core::observability::StepStack;

use crate::error::GatewayError;
use crate::models::AccessGrant;
use crate::services::GatewayStore;
use crate::utils::hash_token;

pub const API_KEY_HEADER: &str = "x-api-key";

/// A completed access grant and its upstream access token.
#[derive(Debug, Clone)]
pub struct Session {
    pub grant: AccessGrant,
    pub access_token: String,
}

pub async fn authenticate(
    steps: &mut StepStack,
    store: &dyn GatewayStore,
    headers: &HeaderMap,
) -> Result<Session, GatewayError> {
    let step = steps.enter("middleware.token");

    let token = match headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        Some(token) => token,
        None => return Err(step.fail(GatewayError::Unauthorized("no auth header".to_string()))),
    };

    let grant = match store.find_access_grant_by_token_hash(&hash_token(token)).await {
        Ok(Some(grant)) => grant,
        Ok(None) => return Err(step.fail(GatewayError::Unauthorized("invalid token".to_string()))),
        Err(e) => {
            return Err(step.fail(GatewayError::from(e).context("failed to look up token")));
        }
    };

    match grant.access_token.clone() {
        Some(access_token) => {
            tracing::debug!(company_id = %grant.company_id, "Request authenticated");
            Ok(Session {
                grant,
                access_token,
            })
        }
        None => Err(step.fail(GatewayError::Unauthorized(
            "authorization has not been completed".to_string(),
        ))),
    }
}
