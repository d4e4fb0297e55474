//! PostgreSQL store for openbanking-service.

use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{AccessGrant, Company, Payment};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::GatewayStore;

const ACCESS_GRANT_COLUMNS: &str = "grant_id, token_hash, company_id, grant_token, consent_id, state, access_token, refresh_token, expires_utc, created_utc, updated_utc";

const PAYMENT_COLUMNS: &str = "payment_row_id, grant_id, amount, currency, debtor_iban, creditor_iban, creditor_name, note, payment_type, instant_payment_flow, charge_bearer, payment_id, authorization_id, created_utc";

fn db_error(context: &str, e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(anyhow::anyhow!("{}: {}", context, db.message()))
        }
        _ => AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e)),
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "openbanking-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl GatewayStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_company(&self, company_id: &str) -> Result<Option<Company>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_company"])
            .start_timer();

        let company = sqlx::query_as::<_, Company>(
            r#"
            SELECT company_id, company_name, enabled, created_utc
            FROM companies
            WHERE company_id = $1
            "#,
        )
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get company", e))?;

        timer.observe_duration();
        Ok(company)
    }

    #[instrument(skip(self, company), fields(company_id = %company.company_id))]
    async fn insert_company(&self, company: &Company) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_company"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO companies (company_id, company_name, enabled, created_utc)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&company.company_id)
        .bind(&company.company_name)
        .bind(company.enabled)
        .bind(company.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to create company", e))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, grant), fields(grant_id = %grant.grant_id, company_id = %grant.company_id))]
    async fn insert_access_grant(&self, grant: &AccessGrant) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_access_grant"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO access_grants (grant_id, token_hash, company_id, grant_token, consent_id, state, access_token, refresh_token, expires_utc, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(grant.grant_id)
        .bind(&grant.token_hash)
        .bind(&grant.company_id)
        .bind(&grant.grant_token)
        .bind(&grant.consent_id)
        .bind(&grant.state)
        .bind(&grant.access_token)
        .bind(&grant.refresh_token)
        .bind(grant.expires_utc)
        .bind(grant.created_utc)
        .bind(grant.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to save access grant", e))?;

        timer.observe_duration();
        info!("Access grant created");
        Ok(())
    }

    #[instrument(skip(self, state))]
    async fn find_access_grant_by_state(
        &self,
        state: &str,
    ) -> Result<Option<AccessGrant>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_access_grant_by_state"])
            .start_timer();

        let grant = sqlx::query_as::<_, AccessGrant>(&format!(
            "SELECT {} FROM access_grants WHERE state = $1",
            ACCESS_GRANT_COLUMNS
        ))
        .bind(state)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get access grant", e))?;

        timer.observe_duration();
        Ok(grant)
    }

    #[instrument(skip(self, token_hash))]
    async fn find_access_grant_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<AccessGrant>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_access_grant_by_token_hash"])
            .start_timer();

        let grant = sqlx::query_as::<_, AccessGrant>(&format!(
            "SELECT {} FROM access_grants WHERE token_hash = $1",
            ACCESS_GRANT_COLUMNS
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get access grant", e))?;

        timer.observe_duration();
        Ok(grant)
    }

    #[instrument(skip(self, access_token, refresh_token))]
    async fn complete_access_grant(
        &self,
        grant_id: Uuid,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<AccessGrant, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["complete_access_grant"])
            .start_timer();

        let grant = sqlx::query_as::<_, AccessGrant>(&format!(
            r#"
            UPDATE access_grants
            SET access_token = $2, refresh_token = $3, updated_utc = NOW()
            WHERE grant_id = $1
            RETURNING {}
            "#,
            ACCESS_GRANT_COLUMNS
        ))
        .bind(grant_id)
        .bind(access_token)
        .bind(refresh_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to save access grant", e))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Access grant {} not found", grant_id)))?;

        timer.observe_duration();
        info!("Access grant completed");
        Ok(grant)
    }

    #[instrument(skip(self, payment), fields(payment_id = %payment.payment_id))]
    async fn insert_payment(&self, payment: &Payment) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_payment"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO payments (payment_row_id, grant_id, amount, currency, debtor_iban, creditor_iban, creditor_name, note, payment_type, instant_payment_flow, charge_bearer, payment_id, authorization_id, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(payment.payment_row_id)
        .bind(payment.grant_id)
        .bind(&payment.amount)
        .bind(&payment.currency)
        .bind(&payment.debtor_iban)
        .bind(&payment.creditor_iban)
        .bind(&payment.creditor_name)
        .bind(&payment.note)
        .bind(&payment.payment_type)
        .bind(&payment.instant_payment_flow)
        .bind(&payment.charge_bearer)
        .bind(&payment.payment_id)
        .bind(&payment.authorization_id)
        .bind(payment.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to save payment", e))?;

        timer.observe_duration();
        info!("Payment saved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_payment_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_payment_by_payment_id"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE payment_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get payment", e))?;

        timer.observe_duration();
        Ok(payment)
    }
}
