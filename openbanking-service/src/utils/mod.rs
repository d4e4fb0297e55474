//! Token hashing, random identifiers and request body validation.

use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use rand::{distributions::Alphanumeric, Rng};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha512};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::error::GatewayError;

/// Length of the `state` value sent through the bank redirect.
pub const STATE_LENGTH: usize = 32;

/// One-way digest used to store and look up bearer tokens.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha512::digest(token.as_bytes()))
}

/// New opaque bearer token for a client.
pub fn generate_token() -> String {
    Uuid::new_v4().to_string()
}

/// Unguessable correlation value for the authorization redirect.
pub fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LENGTH)
        .map(char::from)
        .collect()
}

fn validation_message(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{} is invalid", field))
            })
        })
        .collect();
    messages.sort();
    format!("bad request: {}", messages.join(", "))
}

/// JSON body that has been deserialized and validated.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| GatewayError::Validation(format!("invalid request body: {}", e.body_text())))?;

        value
            .validate()
            .map_err(|e| GatewayError::Validation(validation_message(&e)))?;

        Ok(ValidatedJson(value))
    }
}
