pub mod logging;
pub mod step_stack;
pub mod trace_context;

pub use logging::{init_tracing, shutdown_tracing};
pub use step_stack::{Step, StepStack};
pub use trace_context::{
    REQUEST_ID_HEADER, TRACEPARENT_HEADER, TRACESTATE_HEADER,
    inject_trace_context, inject_trace_headers,
};
