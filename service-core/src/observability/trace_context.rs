//! W3C Trace Context propagation for calls to upstream APIs.
//!
//! Upstream requests are issued from inside a step whose OpenTelemetry context is
//! held by the [`StepStack`](super::StepStack), so injection takes the context
//! explicitly instead of reading the ambient span.
//!
//! See: https://www.w3.org/TR/trace-context/

use opentelemetry::Context;
use opentelemetry::trace::TraceContextExt;
use reqwest::header::HeaderMap;

/// Header name for W3C traceparent
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Header name for W3C tracestate
pub const TRACESTATE_HEADER: &str = "tracestate";

/// Header name for request correlation ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Inject the given trace context into HTTP request headers.
///
/// Nothing is written when the context carries no valid span (for example when
/// no OpenTelemetry layer is installed).
pub fn inject_trace_context(headers: &mut HeaderMap, context: &Context) {
    let span = context.span();
    let span_context = span.span_context();

    if span_context.is_valid() {
        // Format: version-trace_id-span_id-trace_flags
        let traceparent = format!(
            "00-{}-{}-{:02x}",
            span_context.trace_id(),
            span_context.span_id(),
            span_context.trace_flags().to_u8()
        );

        if let Ok(value) = traceparent.parse() {
            headers.insert(TRACEPARENT_HEADER, value);
        }

        let tracestate = span_context.trace_state().header();
        if !tracestate.is_empty()
            && let Ok(value) = tracestate.parse()
        {
            headers.insert(TRACESTATE_HEADER, value);
        }
    }
}

/// Inject trace context and a request correlation ID into headers.
pub fn inject_trace_headers(headers: &mut HeaderMap, context: &Context, request_id: &str) {
    inject_trace_context(headers, context);

    if let Ok(value) = request_id.parse() {
        headers.insert(REQUEST_ID_HEADER, value);
    }
}
