use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::HeaderMap,
    Json,
};

use crate::dtos::TransactionsQuery;
use crate::error::{ApiError, GatewayError};
use crate::flows;
use crate::middleware::{api_key::authenticate, steps::RequestSteps};
use crate::services::bank::types::{AccountList, TransactionList};
use crate::startup::AppState;

pub async fn list_accounts(
    RequestSteps(mut steps): RequestSteps,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AccountList>, ApiError> {
    let session = authenticate(&mut steps, state.store.as_ref(), &headers)
        .await
        .map_err(|e| ApiError::fail(&mut steps, e))?;

    let accounts = flows::accounts::list_accounts(&mut steps, &state, &session)
        .await
        .map_err(|e| ApiError::fail(&mut steps, e))?;

    Ok(Json(accounts))
}

pub async fn list_transactions(
    RequestSteps(mut steps): RequestSteps,
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<TransactionsQuery>, QueryRejection>,
) -> Result<Json<TransactionList>, ApiError> {
    let session = authenticate(&mut steps, state.store.as_ref(), &headers)
        .await
        .map_err(|e| ApiError::fail(&mut steps, e))?;

    let Query(query) = query.map_err(|e| {
        ApiError::fail(
            &mut steps,
            GatewayError::Validation(format!("bad request: {}", e.body_text())),
        )
    })?;

    let transactions = flows::accounts::list_transactions(&mut steps, &state, &session, &query)
        .await
        .map_err(|e| ApiError::fail(&mut steps, e))?;

    Ok(Json(transactions))
}
