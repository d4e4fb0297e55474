//! Domain models for openbanking-service.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Company
// ============================================================================

/// A client company. Managed outside this service.
#[derive(Debug, Clone, FromRow)]
pub struct Company {
    pub company_id: String,
    pub company_name: String,
    pub enabled: bool,
    pub created_utc: DateTime<Utc>,
}

// ============================================================================
// Access grants
// ============================================================================

/// An authorization record. Pending until the bank callback attaches the
/// access and refresh tokens, completed afterwards. Rows are never deleted.
#[derive(Debug, Clone, FromRow)]
pub struct AccessGrant {
    pub grant_id: Uuid,
    /// SHA-512 of the opaque bearer token handed to the client.
    pub token_hash: String,
    pub company_id: String,
    pub grant_token: String,
    pub consent_id: String,
    /// Correlation key carried back by the bank's redirect.
    pub state: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl AccessGrant {
    pub fn is_completed(&self) -> bool {
        self.access_token.is_some()
    }

    /// Whether the redirect window has passed. Advisory only.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_utc
    }
}

// ============================================================================
// Payments
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct Payment {
    pub payment_row_id: Uuid,
    pub grant_id: Uuid,
    pub amount: String,
    pub currency: String,
    pub debtor_iban: String,
    pub creditor_iban: String,
    pub creditor_name: String,
    pub note: String,
    pub payment_type: String,
    pub instant_payment_flow: Option<String>,
    pub charge_bearer: Option<String>,
    /// Upstream identifiers, fixed once the payment is created.
    pub payment_id: String,
    pub authorization_id: String,
    pub created_utc: DateTime<Utc>,
}

/// Joins allowed values for validation messages.
fn options<T: fmt::Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentType {
    Sepa,
    SepaInstant,
    CrossBorder,
}

impl PaymentType {
    pub const ALL: [PaymentType; 3] = [Self::Sepa, Self::SepaInstant, Self::CrossBorder];

    /// Path segment used by the bank API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sepa => "sepa-credit-transfers",
            Self::SepaInstant => "instant-sepa-credit-transfers",
            Self::CrossBorder => "cross-border-credit-transfers",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    pub fn options() -> String {
        options(&Self::ALL)
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeBearer {
    Debt,
    Cred,
    Shar,
    Slev,
}

impl ChargeBearer {
    pub const ALL: [ChargeBearer; 4] = [Self::Debt, Self::Cred, Self::Shar, Self::Slev];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debt => "DEBT",
            Self::Cred => "CRED",
            Self::Shar => "SHAR",
            Self::Slev => "SLEV",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == value)
    }

    pub fn options() -> String {
        options(&Self::ALL)
    }
}

impl fmt::Display for ChargeBearer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstantPaymentFlow {
    #[default]
    Optional,
    Mandatory,
}

impl InstantPaymentFlow {
    pub const ALL: [InstantPaymentFlow; 2] = [Self::Optional, Self::Mandatory];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Optional => "OPTIONAL",
            Self::Mandatory => "MANDATORY",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == value)
    }

    pub fn options() -> String {
        options(&Self::ALL)
    }
}

impl fmt::Display for InstantPaymentFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_payment_type_wire_values() {
        assert_eq!(
            PaymentType::parse("cross-border-credit-transfers"),
            Some(PaymentType::CrossBorder)
        );
        assert_eq!(PaymentType::parse("sepa"), None);
        assert_eq!(
            PaymentType::options(),
            "sepa-credit-transfers, instant-sepa-credit-transfers, cross-border-credit-transfers"
        );
    }

    #[test]
    fn test_charge_bearer_and_flow_parsing() {
        assert_eq!(ChargeBearer::parse("SHAR"), Some(ChargeBearer::Shar));
        assert_eq!(ChargeBearer::parse("shar"), None);
        assert_eq!(InstantPaymentFlow::default().as_str(), "OPTIONAL");
        assert_eq!(
            InstantPaymentFlow::parse("MANDATORY"),
            Some(InstantPaymentFlow::Mandatory)
        );
    }

    #[test]
    fn test_access_grant_state() {
        let now = Utc::now();
        let mut grant = AccessGrant {
            grant_id: Uuid::new_v4(),
            token_hash: "hash".to_string(),
            company_id: "ACME0001".to_string(),
            grant_token: "grant".to_string(),
            consent_id: "consent".to_string(),
            state: "state".to_string(),
            access_token: None,
            refresh_token: None,
            expires_utc: now + Duration::minutes(15),
            created_utc: now,
            updated_utc: now,
        };

        assert!(!grant.is_completed());
        assert!(!grant.is_expired(now));
        assert!(grant.is_expired(now + Duration::minutes(16)));

        grant.access_token = Some("access".to_string());
        assert!(grant.is_completed());
    }
}
