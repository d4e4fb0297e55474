//! Payment initiation and status polling.

use chrono::Utc;
use service_core::observability::StepStack;
use uuid::Uuid;

use super::fail_flow;
use crate::dtos::{InitPaymentRequest, InitPaymentResponse, PaymentStatusResponse};
use crate::error::GatewayError;
use crate::middleware::api_key::Session;
use crate::models::{ChargeBearer, InstantPaymentFlow, Payment, PaymentType};
use crate::services::bank::types::{IbanAccount, InstructedAmount, PaymentInitRequest};
use crate::startup::AppState;

/// Type-specific options of a payment after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentOptions {
    pub payment_type: PaymentType,
    /// Set for instant transfers only.
    pub instant_payment_flow: Option<InstantPaymentFlow>,
    /// Set for cross-border transfers only.
    pub charge_bearer: Option<ChargeBearer>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Check the payment type and the fields it requires. Runs before any call to
/// the bank.
pub fn validate_options(request: &InitPaymentRequest) -> Result<PaymentOptions, GatewayError> {
    let payment_type = PaymentType::parse(&request.payment_type).ok_or_else(|| {
        GatewayError::Validation(format!(
            "invalid payment type, options: {}",
            PaymentType::options()
        ))
    })?;

    let mut options = PaymentOptions {
        payment_type,
        instant_payment_flow: None,
        charge_bearer: None,
    };

    match payment_type {
        PaymentType::Sepa => {}
        PaymentType::CrossBorder => {
            let value = non_empty(&request.charge_bearer).ok_or_else(|| {
                GatewayError::Validation(format!(
                    "bad request: charge bearer required, options: {}",
                    ChargeBearer::options()
                ))
            })?;
            let bearer = ChargeBearer::parse(value).ok_or_else(|| {
                GatewayError::Validation(format!(
                    "bad request: invalid charge bearer value, options: {}",
                    ChargeBearer::options()
                ))
            })?;
            options.charge_bearer = Some(bearer);
        }
        PaymentType::SepaInstant => {
            let flow = match non_empty(&request.instant_payment_flow) {
                None => InstantPaymentFlow::default(),
                Some(value) => InstantPaymentFlow::parse(value).ok_or_else(|| {
                    GatewayError::Validation(format!(
                        "bad request: invalid instant payment flow value, options: {}",
                        InstantPaymentFlow::options()
                    ))
                })?,
            };
            options.instant_payment_flow = Some(flow);
        }
    }

    Ok(options)
}

pub async fn init_payment(
    steps: &mut StepStack,
    state: &AppState,
    session: &Session,
    request: &InitPaymentRequest,
) -> Result<InitPaymentResponse, GatewayError> {
    let mut flow = steps.enter("payment_init");
    match run_init(&mut flow, state, session, request).await {
        Ok(response) => Ok(response),
        Err(e) => Err(fail_flow(flow, "payment_init", e)),
    }
}

async fn run_init(
    steps: &mut StepStack,
    state: &AppState,
    session: &Session,
    request: &InitPaymentRequest,
) -> Result<InitPaymentResponse, GatewayError> {
    let options = validate_options(request)?;

    let body = PaymentInitRequest {
        instructed_amount: InstructedAmount {
            amount: request.amount.clone(),
            currency: request.currency.clone(),
        },
        debtor_account: IbanAccount {
            iban: request.debtor_iban.clone(),
        },
        creditor_account: IbanAccount {
            iban: request.creditor_iban.clone(),
        },
        creditor_name: request.creditor_name.clone(),
        remittance_information_unstructured: request.note.clone(),
        charge_bearer: options.charge_bearer.map(|c| c.as_str().to_string()),
    };

    let created = state
        .bank
        .init_payment(
            steps,
            &session.access_token,
            options.payment_type,
            options.instant_payment_flow,
            &body,
        )
        .await
        .map_err(|e| e.context("failed to initialize payment"))?;

    let payment = Payment {
        payment_row_id: Uuid::new_v4(),
        grant_id: session.grant.grant_id,
        amount: request.amount.clone(),
        currency: request.currency.clone(),
        debtor_iban: request.debtor_iban.clone(),
        creditor_iban: request.creditor_iban.clone(),
        creditor_name: request.creditor_name.clone(),
        note: request.note.clone(),
        payment_type: options.payment_type.as_str().to_string(),
        instant_payment_flow: options.instant_payment_flow.map(|f| f.as_str().to_string()),
        charge_bearer: options.charge_bearer.map(|c| c.as_str().to_string()),
        payment_id: created.payment_id.clone(),
        authorization_id: created.authorization_id.clone(),
        created_utc: Utc::now(),
    };

    save_payment(steps, state, &payment).await?;

    Ok(InitPaymentResponse {
        payment_id: created.payment_id,
        url: created.links.sca_redirect.href,
        transaction_status: created.transaction_status,
    })
}

async fn save_payment(
    steps: &mut StepStack,
    state: &AppState,
    payment: &Payment,
) -> Result<(), GatewayError> {
    let step = steps.enter("payment_init.persist");

    match state.store.insert_payment(payment).await {
        Ok(()) => {
            tracing::info!(
                payment_id = %payment.payment_id,
                payment_type = %payment.payment_type,
                "Payment initiated"
            );
            Ok(())
        }
        Err(e) => Err(step.fail(GatewayError::from(e).context("failed to save payment"))),
    }
}

/// Authorization and settlement status of a payment owned by the caller. Both
/// reads are attempted; the first failure is returned.
pub async fn payment_status(
    steps: &mut StepStack,
    state: &AppState,
    session: &Session,
    payment_id: &str,
) -> Result<PaymentStatusResponse, GatewayError> {
    let mut flow = steps.enter("payment_status");
    match run_status(&mut flow, state, session, payment_id).await {
        Ok(response) => Ok(response),
        Err(e) => Err(fail_flow(flow, "payment_status", e)),
    }
}

async fn run_status(
    steps: &mut StepStack,
    state: &AppState,
    session: &Session,
    payment_id: &str,
) -> Result<PaymentStatusResponse, GatewayError> {
    let payment = find_owned_payment(steps, state, session, payment_id).await?;

    let authorization = state
        .bank
        .authorization_status(steps, &session.access_token, &payment)
        .await
        .map_err(|e| e.context("failed to check authorization status"));

    let transaction = state
        .bank
        .transaction_status(steps, &session.access_token, &payment)
        .await
        .map_err(|e| e.context("failed to check transaction status"));

    match (authorization, transaction) {
        (Ok(authorization_status), Ok(transaction_status)) => Ok(PaymentStatusResponse {
            authorization_status,
            transaction_status,
        }),
        (Err(e), transaction) => {
            if let Err(second) = transaction {
                tracing::warn!(error = %second, "Transaction status check failed as well");
            }
            Err(e)
        }
        (Ok(_), Err(e)) => Err(e),
    }
}

/// A payment of another grant is reported exactly like a missing one.
async fn find_owned_payment(
    steps: &mut StepStack,
    state: &AppState,
    session: &Session,
    payment_id: &str,
) -> Result<Payment, GatewayError> {
    let step = steps.enter("payment_status.lookup");

    match state.store.find_payment_by_payment_id(payment_id).await {
        Ok(Some(payment)) if payment.grant_id == session.grant.grant_id => Ok(payment),
        Ok(_) => Err(step.fail(GatewayError::NotFound(format!(
            "payment with ID '{}' not found",
            payment_id
        )))),
        Err(e) => Err(step.fail(GatewayError::from(e).context("failed to query payment"))),
    }
}
