//! In-memory store backed by `DashMap`. Used by tests and local runs without
//! PostgreSQL.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{AccessGrant, Company, Payment};
use crate::services::store::GatewayStore;

#[derive(Default)]
pub struct MemoryStore {
    companies: DashMap<String, Company>,
    grants: DashMap<Uuid, AccessGrant>,
    grants_by_state: DashMap<String, Uuid>,
    grants_by_hash: DashMap<String, Uuid>,
    payments: DashMap<Uuid, Payment>,
    payments_by_payment_id: DashMap<String, Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access_grant_count(&self) -> usize {
        self.grants.len()
    }

    pub fn payment_count(&self) -> usize {
        self.payments.len()
    }

    fn grant_by_index(&self, index: &DashMap<String, Uuid>, key: &str) -> Option<AccessGrant> {
        let grant_id = *index.get(key)?;
        self.grants.get(&grant_id).map(|g| g.clone())
    }
}

#[async_trait]
impl GatewayStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn find_company(&self, company_id: &str) -> Result<Option<Company>, AppError> {
        Ok(self.companies.get(company_id).map(|c| c.clone()))
    }

    async fn insert_company(&self, company: &Company) -> Result<(), AppError> {
        match self.companies.entry(company.company_id.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict(anyhow::anyhow!(
                "Company {} already exists",
                company.company_id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(company.clone());
                Ok(())
            }
        }
    }

    async fn insert_access_grant(&self, grant: &AccessGrant) -> Result<(), AppError> {
        match self.grants_by_state.entry(grant.state.clone()) {
            Entry::Occupied(_) => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Access grant with this state already exists"
                )))
            }
            Entry::Vacant(entry) => {
                entry.insert(grant.grant_id);
            }
        }

        match self.grants_by_hash.entry(grant.token_hash.clone()) {
            Entry::Occupied(_) => {
                self.grants_by_state.remove(&grant.state);
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Access grant with this token already exists"
                )));
            }
            Entry::Vacant(entry) => {
                entry.insert(grant.grant_id);
            }
        }

        self.grants.insert(grant.grant_id, grant.clone());
        Ok(())
    }

    async fn find_access_grant_by_state(
        &self,
        state: &str,
    ) -> Result<Option<AccessGrant>, AppError> {
        Ok(self.grant_by_index(&self.grants_by_state, state))
    }

    async fn find_access_grant_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<AccessGrant>, AppError> {
        Ok(self.grant_by_index(&self.grants_by_hash, token_hash))
    }

    async fn complete_access_grant(
        &self,
        grant_id: Uuid,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<AccessGrant, AppError> {
        let mut grant = self.grants.get_mut(&grant_id).ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Access grant {} not found", grant_id))
        })?;

        grant.access_token = Some(access_token.to_string());
        grant.refresh_token = Some(refresh_token.to_string());
        grant.updated_utc = Utc::now();
        Ok(grant.clone())
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), AppError> {
        match self.payments_by_payment_id.entry(payment.payment_id.clone()) {
            Entry::Occupied(_) => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Payment {} already exists",
                    payment.payment_id
                )))
            }
            Entry::Vacant(entry) => {
                entry.insert(payment.payment_row_id);
            }
        }

        self.payments
            .insert(payment.payment_row_id, payment.clone());
        Ok(())
    }

    async fn find_payment_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<Payment>, AppError> {
        let Some(row_id) = self.payments_by_payment_id.get(payment_id).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.payments.get(&row_id).map(|p| p.clone()))
    }
}
