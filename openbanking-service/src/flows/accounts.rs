use service_core::observability::StepStack;

use super::fail_flow;
use crate::dtos::TransactionsQuery;
use crate::error::GatewayError;
use crate::middleware::api_key::Session;
use crate::services::bank::types::{AccountList, TransactionList};
use crate::startup::AppState;

pub async fn list_accounts(
    steps: &mut StepStack,
    state: &AppState,
    session: &Session,
) -> Result<AccountList, GatewayError> {
    let mut flow = steps.enter("accounts");
    match state
        .bank
        .list_accounts(&mut flow, &session.access_token)
        .await
    {
        Ok(accounts) => Ok(accounts),
        Err(e) => Err(fail_flow(flow, "accounts", e.context("failed to list accounts"))),
    }
}

pub async fn list_transactions(
    steps: &mut StepStack,
    state: &AppState,
    session: &Session,
    query: &TransactionsQuery,
) -> Result<TransactionList, GatewayError> {
    let mut flow = steps.enter("transactions");
    match run_transactions(&mut flow, state, session, query).await {
        Ok(transactions) => Ok(transactions),
        Err(e) => Err(fail_flow(flow, "transactions", e)),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

async fn run_transactions(
    steps: &mut StepStack,
    state: &AppState,
    session: &Session,
    query: &TransactionsQuery,
) -> Result<TransactionList, GatewayError> {
    let account_id = match (non_empty(&query.account_id), non_empty(&query.iban)) {
        (Some(_), Some(_)) => {
            return Err(GatewayError::Validation(
                "only account id or iban can be provided".to_string(),
            ))
        }
        (None, None) => {
            return Err(GatewayError::Validation(
                "account id or iban is required".to_string(),
            ))
        }
        (Some(account_id), None) => account_id.to_string(),
        (None, Some(iban)) => resolve_account_id(steps, state, session, iban).await?,
    };

    state
        .bank
        .list_transactions(steps, &session.access_token, &account_id, &query.filters)
        .await
        .map_err(|e| e.context("failed to list transactions"))
}

async fn resolve_account_id(
    steps: &mut StepStack,
    state: &AppState,
    session: &Session,
    iban: &str,
) -> Result<String, GatewayError> {
    let accounts = state
        .bank
        .list_accounts(steps, &session.access_token)
        .await
        .map_err(|e| e.context("failed to list accounts"))?;

    accounts
        .find_by_iban(iban)
        .map(|account| account.account_id.clone())
        .ok_or_else(|| GatewayError::AccountNotFound(format!("account with IBAN '{}' not found", iban)))
}
