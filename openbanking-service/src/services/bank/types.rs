//! Typed request and response bodies of the bank API.
//!
//! Response types only make the fields the gateway relies on mandatory. A body
//! missing one of them fails to decode instead of being accepted half-empty.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Client-credentials grant. Only good for creating a consent.
#[derive(Debug, Deserialize)]
pub struct GrantTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Tokens issued for an authorization code.
#[derive(Debug, Deserialize)]
pub struct AuthorizationTokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRequest {
    pub combined_service_indicator: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentResponse {
    pub consent_id: String,
    #[serde(default)]
    pub consent_status: Option<String>,
}

// ============================================================================
// Accounts and transactions
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountReference {
    pub iban: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Amount {
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub balance_amount: Amount,
    pub balance_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_id: String,
    pub account_reference: AccountReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cash_account_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_expiration_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_updated: Option<String>,
    #[serde(default)]
    pub balances: Vec<Balance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountList {
    pub accounts: Vec<Account>,
}

impl AccountList {
    pub fn find_by_iban(&self, iban: &str) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|a| a.account_reference.iban == iban)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_identification: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: String,
    pub transaction_amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_to_end_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creditor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creditor_account: Option<AccountReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creditor_agent: Option<Agent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debtor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debtor_account: Option<AccountReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debtor_agent: Option<Agent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remittance_information_unstructured: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_information: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_transaction_code: Option<String>,
    #[serde(default)]
    pub is_reversal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionList {
    pub account: AccountReference,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

// ============================================================================
// Payments
// ============================================================================

#[derive(Debug, Serialize)]
pub struct IbanAccount {
    pub iban: String,
}

#[derive(Debug, Serialize)]
pub struct InstructedAmount {
    pub amount: String,
    pub currency: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitRequest {
    pub instructed_amount: InstructedAmount,
    pub debtor_account: IbanAccount,
    pub creditor_account: IbanAccount,
    pub creditor_name: String,
    pub remittance_information_unstructured: String,
    /// Only sent for cross-border transfers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_bearer: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Href {
    pub href: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLinks {
    pub sca_redirect: Href,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitResponse {
    pub payment_id: String,
    pub authorization_id: String,
    #[serde(rename = "_links")]
    pub links: PaymentLinks,
    pub transaction_status: String,
}

/// Body of a refused payment initiation.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRejection {
    #[serde(default)]
    pub transaction_status: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub additional_information: Option<String>,
}

impl PaymentRejection {
    /// Reason of an explicit rejection (`RJCT`), `None` for any other body.
    pub fn reason(&self) -> Option<RejectionReason> {
        if self.transaction_status.as_deref() != Some("RJCT") {
            return None;
        }

        let info = self.additional_information.clone();
        Some(match self.error_code.as_deref() {
            Some("FORMAT_ERROR") => RejectionReason::FormatError(info),
            _ => RejectionReason::Rejected(info),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    /// The bank could not parse the payment data.
    FormatError(Option<String>),
    Rejected(Option<String>),
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (message, info) = match self {
            Self::FormatError(info) => ("transaction data badly formatted", info),
            Self::Rejected(info) => ("transaction was rejected", info),
        };
        match info {
            Some(info) => write!(f, "{}: {}", message, info),
            None => f.write_str(message),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaStatusResponse {
    pub sca_status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatusResponse {
    pub transaction_status: String,
}
