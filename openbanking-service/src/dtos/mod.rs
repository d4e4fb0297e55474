use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    #[validate(length(min = 1, max = 8, message = "companyId must be 1 to 8 characters"))]
    pub company_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    /// Opaque bearer token. Shown once, only its hash is stored.
    pub token: String,
    pub url: String,
    /// RFC 3339 timestamp.
    pub expires_at: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CallbackRequest {
    #[validate(length(min = 1, message = "code is required"))]
    pub code: String,
    #[validate(length(min = 1, message = "state is required"))]
    pub state: String,
}

/// Query of `GET /transactions`. Exactly one of `iban` / `account_id` is required,
/// the remaining filters are forwarded to the bank as given.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsQuery {
    pub iban: Option<String>,
    pub account_id: Option<String>,
    #[serde(flatten)]
    pub filters: TransactionFilters,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFilters {
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub variable_symbol: Option<String>,
    pub constant_symbol: Option<String>,
    pub specific_symbol: Option<String>,
    #[serde(rename = "e2ereference")]
    pub e2e_reference: Option<String>,
    pub amount_from: Option<String>,
    pub amount_to: Option<String>,
    pub booking_status: Option<String>,
    pub transaction_direction: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

impl TransactionFilters {
    /// Non-empty filters as upstream query pairs.
    pub fn to_query(&self) -> Vec<(&'static str, &str)> {
        [
            ("dateFrom", &self.date_from),
            ("dateTo", &self.date_to),
            ("variableSymbol", &self.variable_symbol),
            ("constantSymbol", &self.constant_symbol),
            ("specificSymbol", &self.specific_symbol),
            ("e2ereference", &self.e2e_reference),
            ("amountFrom", &self.amount_from),
            ("amountTo", &self.amount_to),
            ("bookingStatus", &self.booking_status),
            ("transactionDirection", &self.transaction_direction),
            ("page", &self.page),
            ("pageSize", &self.page_size),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| (key, v))
        })
        .collect()
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitPaymentRequest {
    #[validate(length(min = 1, message = "amount is required"))]
    pub amount: String,
    #[validate(length(equal = 3, message = "currency must be a 3-letter code"))]
    pub currency: String,
    #[validate(length(min = 1, message = "debtorIban is required"))]
    pub debtor_iban: String,
    #[validate(length(min = 1, message = "creditorIban is required"))]
    pub creditor_iban: String,
    #[validate(length(min = 1, message = "creditorName is required"))]
    pub creditor_name: String,
    #[validate(length(min = 1, message = "note is required"))]
    pub note: String,
    #[serde(rename = "type")]
    #[validate(length(min = 1, message = "type is required"))]
    pub payment_type: String,
    pub instant_payment_flow: Option<String>,
    pub charge_bearer: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPaymentResponse {
    pub payment_id: String,
    /// SCA redirect for the account holder.
    pub url: String,
    pub transaction_status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub authorization_status: String,
    pub transaction_status: String,
}
