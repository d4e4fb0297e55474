//! Multi-step operations behind the HTTP routes.
//!
//! Every public flow opens its own step under the request root and fails that
//! step with the (contextualised) error, so a failed flow always leaves the
//! request stack back at its root.

pub mod accounts;
pub mod authorize;
pub mod callback;
pub mod payment;

use service_core::observability::Step;

use crate::error::GatewayError;
use crate::services::metrics::record_flow_failure;

fn fail_flow(flow: Step<'_>, name: &str, err: GatewayError) -> GatewayError {
    record_flow_failure(name);
    flow.fail(err)
}
