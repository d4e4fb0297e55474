//! Persistence contract used by the flows.

use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{AccessGrant, Company, Payment};

#[async_trait]
pub trait GatewayStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    async fn find_company(&self, company_id: &str) -> Result<Option<Company>, AppError>;

    async fn insert_company(&self, company: &Company) -> Result<(), AppError>;

    /// Persist a pending grant. `state` and `token_hash` are unique; a duplicate
    /// yields [`AppError::Conflict`].
    async fn insert_access_grant(&self, grant: &AccessGrant) -> Result<(), AppError>;

    async fn find_access_grant_by_state(&self, state: &str)
        -> Result<Option<AccessGrant>, AppError>;

    async fn find_access_grant_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<AccessGrant>, AppError>;

    /// Attach the exchanged tokens to an existing grant. Never creates a row.
    async fn complete_access_grant(
        &self,
        grant_id: Uuid,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<AccessGrant, AppError>;

    async fn insert_payment(&self, payment: &Payment) -> Result<(), AppError>;

    async fn find_payment_by_payment_id(&self, payment_id: &str)
        -> Result<Option<Payment>, AppError>;
}
