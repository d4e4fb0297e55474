//! HTTP handlers for openbanking-service.
//!
//! Each handler owns the request's step stack. Failures, including rejected
//! request bodies, are recorded on it and rendered as `{ error, traceId }`.

pub mod accounts;
pub mod authorize;
pub mod payments;
