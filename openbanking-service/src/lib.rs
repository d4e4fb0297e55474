//! Open banking gateway: consent authorization, account and transaction reads
//! and payment initiation against a PSD2 bank API.

pub mod config;
pub mod dtos;
pub mod error;
pub mod flows;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;

pub use startup::{AppState, Application};
