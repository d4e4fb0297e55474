//! Configuration module for openbanking-service.

use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub bank: BankConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Credentials and endpoints of the upstream bank API.
#[derive(Debug, Clone)]
pub struct BankConfig {
    /// Base URL every upstream path is appended to, without a trailing slash.
    pub api_url: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_uri: String,
    /// PKCE challenge sent with every redirect. Static for the deployment.
    pub code_challenge: String,
    pub code_challenge_verifier: Secret<String>,
}

fn required(key: &str) -> Result<String, AppError> {
    env::var(key).map_err(|_| AppError::ConfigError(anyhow::anyhow!("{} is required", key)))
}

fn default_api_url(environment: &str) -> String {
    format!("https://api.tatrabanka.sk/premium/{}", environment)
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let bank_env = env::var("BANK_API_ENV").unwrap_or_else(|_| "sandbox".to_string());
        let api_url = env::var("BANK_API_URL").unwrap_or_else(|_| default_api_url(&bank_env));

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "openbanking-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            },
            bank: BankConfig {
                api_url: api_url.trim_end_matches('/').to_string(),
                client_id: required("BANK_CLIENT_ID")?,
                client_secret: Secret::new(required("BANK_CLIENT_SECRET")?),
                redirect_uri: required("BANK_REDIRECT_URI")?,
                code_challenge: required("BANK_CODE_CHALLENGE")?,
                code_challenge_verifier: Secret::new(required("BANK_CODE_CHALLENGE_VERIFIER")?),
            },
        })
    }
}
