use axum::{extract::State, http::StatusCode, Json};

use crate::dtos::{AuthorizeRequest, AuthorizeResponse, CallbackRequest};
use crate::error::{ApiError, GatewayError};
use crate::flows;
use crate::middleware::steps::RequestSteps;
use crate::startup::AppState;
use crate::utils::ValidatedJson;

/// Start a consent authorization for a company.
pub async fn authorize(
    RequestSteps(mut steps): RequestSteps,
    State(state): State<AppState>,
    payload: Result<ValidatedJson<AuthorizeRequest>, GatewayError>,
) -> Result<(StatusCode, Json<AuthorizeResponse>), ApiError> {
    let ValidatedJson(request) = payload.map_err(|e| ApiError::fail(&mut steps, e))?;

    tracing::info!(company_id = %request.company_id, "Starting authorization");

    let response = flows::authorize::authorize(&mut steps, &state, &request.company_id)
        .await
        .map_err(|e| ApiError::fail(&mut steps, e))?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Bank redirect callback carrying the authorization code.
pub async fn callback(
    RequestSteps(mut steps): RequestSteps,
    State(state): State<AppState>,
    payload: Result<ValidatedJson<CallbackRequest>, GatewayError>,
) -> Result<StatusCode, ApiError> {
    let ValidatedJson(request) = payload.map_err(|e| ApiError::fail(&mut steps, e))?;

    flows::callback::callback(&mut steps, &state, &request)
        .await
        .map_err(|e| ApiError::fail(&mut steps, e))?;

    Ok(StatusCode::NO_CONTENT)
}
