use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::dtos::{InitPaymentRequest, InitPaymentResponse, PaymentStatusResponse};
use crate::error::{ApiError, GatewayError};
use crate::flows;
use crate::middleware::{api_key::authenticate, steps::RequestSteps};
use crate::startup::AppState;
use crate::utils::ValidatedJson;

pub async fn init_payment(
    RequestSteps(mut steps): RequestSteps,
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<ValidatedJson<InitPaymentRequest>, GatewayError>,
) -> Result<(StatusCode, Json<InitPaymentResponse>), ApiError> {
    let session = authenticate(&mut steps, state.store.as_ref(), &headers)
        .await
        .map_err(|e| ApiError::fail(&mut steps, e))?;

    let ValidatedJson(request) = payload.map_err(|e| ApiError::fail(&mut steps, e))?;

    let response = flows::payment::init_payment(&mut steps, &state, &session, &request)
        .await
        .map_err(|e| ApiError::fail(&mut steps, e))?;

    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn payment_status(
    RequestSteps(mut steps): RequestSteps,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<String>,
) -> Result<Json<PaymentStatusResponse>, ApiError> {
    let session = authenticate(&mut steps, state.store.as_ref(), &headers)
        .await
        .map_err(|e| ApiError::fail(&mut steps, e))?;

    let status = flows::payment::payment_status(&mut steps, &state, &session, &payment_id)
        .await
        .map_err(|e| ApiError::fail(&mut steps, e))?;

    Ok(Json(status))
}
