use axum::{
    async_trait,
    extract::{FromRequestParts, MatchedPath},
    http::request::Parts,
};
use service_core::observability::StepStack;
use std::convert::Infallible;
use std::ops::{Deref, DerefMut};

/// Step stack of the current request. Its root frame is named after the route
/// (`GET /accounts`) and nests under the request span.
pub struct RequestSteps(pub StepStack);

#[async_trait]
impl<S> FromRequestParts<S> for RequestSteps
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let path = parts
            .extensions
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        Ok(RequestSteps(StepStack::new(format!(
            "{} {}",
            parts.method, path
        ))))
    }
}

impl Deref for RequestSteps {
    type Target = StepStack;

    fn deref(&self) -> &StepStack {
        &self.0
    }
}

impl DerefMut for RequestSteps {
    fn deref_mut(&mut self) -> &mut StepStack {
        &mut self.0
    }
}
