//! Request-scoped stack of traced steps.
//!
//! A [`StepStack`] is created once per inbound request. Every logical operation
//! pushes a frame (a child `tracing` span of the frame below it) and pops it when
//! it is done. Frames always terminate in LIFO order, and a failure recorded with
//! [`StepStack::fail`] closes exactly one frame.
//!
//! Prefer [`StepStack::enter`], which returns a [`Step`] guard that unwinds its
//! frame (and anything left above it) when it goes out of scope:
//!
//! ```ignore
//! let mut steps = StepStack::new("POST /authorize");
//! {
//!     let mut step = steps.enter("bank.grant_token");
//!     let token = match client.grant_token(&mut step).await {
//!         Ok(token) => token,
//!         Err(e) => return Err(step.fail(e)),
//!     };
//! } // frame closed here
//! ```

use std::fmt::Display;
use std::ops::{Deref, DerefMut};

use opentelemetry::trace::TraceContextExt;
use tracing::Span;
use tracing::field::Empty;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

struct StepFrame {
    name: String,
    /// `None` once the frame has been ended.
    span: Option<Span>,
    /// OpenTelemetry context of the frame, kept after the span ends so that
    /// children can still be parented to it.
    context: opentelemetry::Context,
}

fn open_span(name: &str, parent: Option<&StepFrame>) -> Span {
    let step_span = |parent_span: &Span| {
        tracing::info_span!(
            parent: parent_span,
            "step",
            otel.name = %name,
            step = %name,
            otel.status_code = Empty,
            otel.status_message = Empty,
            error = Empty,
            upstream.request_id = Empty,
            upstream.status = Empty,
            upstream.response = Empty,
        )
    };

    match parent {
        Some(StepFrame {
            span: Some(parent_span),
            ..
        }) => step_span(parent_span),
        Some(StepFrame {
            span: None,
            context,
            ..
        }) => {
            let span = step_span(&Span::none());
            span.set_parent(context.clone());
            span
        }
        None => step_span(&Span::current()),
    }
}

pub struct StepStack {
    frames: Vec<StepFrame>,
    error: Option<String>,
    fallback_trace_id: String,
}

impl StepStack {
    /// Create the root frame as a child of the currently entered span (usually the
    /// `http_request` span opened by the trace layer).
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let span = open_span(&name, None);
        let context = span.context();

        tracing::debug!(step = %name, "-> stepping into");

        Self {
            frames: vec![StepFrame {
                name,
                span: Some(span),
                context,
            }],
            error: None,
            fallback_trace_id: Uuid::new_v4().simple().to_string(),
        }
    }

    /// Number of frames above the root. The root frame is depth 0.
    pub fn depth(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    pub fn current_name(&self) -> &str {
        self.frames.last().map(|f| f.name.as_str()).unwrap_or("")
    }

    /// Span of the current frame, or a disabled span if the frame has been ended.
    pub fn current_span(&self) -> Span {
        self.frames
            .last()
            .and_then(|f| f.span.clone())
            .unwrap_or_else(Span::none)
    }

    /// OpenTelemetry context to propagate to any operation started from the
    /// current frame.
    pub fn current_context(&self) -> opentelemetry::Context {
        self.frames
            .last()
            .map(|f| f.context.clone())
            .unwrap_or_default()
    }

    /// Trace id reported to clients. Falls back to a per-request id when no
    /// OpenTelemetry tracer is installed.
    pub fn trace_id(&self) -> String {
        let context = self.current_context();
        let span = context.span();
        let span_context = span.span_context();

        if span_context.is_valid() {
            span_context.trace_id().to_string()
        } else {
            self.fallback_trace_id.clone()
        }
    }

    /// Last error recorded through [`fail`](Self::fail).
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Record a value on a field declared by step spans
    /// (`upstream.request_id`, `upstream.status`, `upstream.response`, `error`).
    pub fn record(&self, field: &str, value: impl tracing::Value) {
        if let Some(span) = self.frames.last().and_then(|f| f.span.as_ref()) {
            span.record(field, value);
        }
    }

    pub fn step_into(&mut self, name: impl Into<String>) {
        let name = name.into();
        let span = open_span(&name, self.frames.last());
        let context = span.context();

        tracing::debug!(
            step = %name,
            "{}-> stepping into",
            "| ".repeat(self.frames.len())
        );

        self.frames.push(StepFrame {
            name,
            span: Some(span),
            context,
        });
    }

    /// Close the current frame and make its parent current. At the root this is
    /// a no-op.
    pub fn step_back(&mut self) {
        if self.frames.len() <= 1 {
            tracing::debug!(step = %self.current_name(), "step back requested at root, ignoring");
            return;
        }

        if let Some(frame) = self.frames.pop() {
            tracing::debug!(
                step = %frame.name,
                "{}<- stepping back",
                "| ".repeat(self.frames.len())
            );
            drop(frame.span);
        }
    }

    /// Step back until the current frame is at `depth`.
    pub fn skip_back_to(&mut self, depth: usize) {
        while self.depth() > depth {
            self.step_back();
        }
    }

    /// Close the current frame's span without popping it.
    pub fn end(&mut self) {
        let indent = "| ".repeat(self.depth());
        if let Some(frame) = self.frames.last_mut()
            && let Some(span) = frame.span.take()
        {
            tracing::debug!(step = %frame.name, "{}* ending", indent);
            drop(span);
        }
    }

    /// Open a scoped step. The frame is closed when the returned guard drops.
    pub fn enter(&mut self, name: impl Into<String>) -> Step<'_> {
        self.step_into(name);
        let depth = self.depth();
        Step { stack: self, depth }
    }

    /// Record `err` on the current frame, mark it as failed, end it, store the
    /// error and step back one level. Returns `err` so callers can propagate it.
    pub fn fail<E: Display>(&mut self, err: E) -> E {
        let message = err.to_string();

        if let Some(span) = self.frames.last().and_then(|f| f.span.as_ref()) {
            span.record("otel.status_code", "ERROR");
            span.record("otel.status_message", message.as_str());
            span.record("error", message.as_str());
        }

        tracing::warn!(
            step = %self.current_name(),
            trace_id = %self.trace_id(),
            error = %message,
            "step failed"
        );

        self.end();
        self.error = Some(message);
        self.step_back();
        err
    }

    /// Formatted convenience form of [`fail`](Self::fail).
    pub fn fail_message(&mut self, message: impl Into<String>) -> String {
        self.fail(message.into())
    }

    /// Fail after attaching the upstream status and raw body to the current frame.
    /// The body stays in the trace and is never part of the returned error.
    pub fn fail_upstream<E: Display>(&mut self, status: u16, body: &str, err: E) -> E {
        self.record("upstream.status", status);
        self.record("upstream.response", body);
        self.fail(err)
    }
}

impl Drop for StepStack {
    fn drop(&mut self) {
        self.skip_back_to(0);
        self.end();
    }
}

/// Guard returned by [`StepStack::enter`].
pub struct Step<'a> {
    stack: &'a mut StepStack,
    depth: usize,
}

impl Step<'_> {
    /// Fail this step, closing any frames still open above it first.
    pub fn fail<E: Display>(self, err: E) -> E {
        if self.stack.depth() >= self.depth {
            self.stack.skip_back_to(self.depth);
            self.stack.fail(err)
        } else {
            self.stack.error = Some(err.to_string());
            err
        }
    }
}

impl Deref for Step<'_> {
    type Target = StepStack;

    fn deref(&self) -> &StepStack {
        self.stack
    }
}

impl DerefMut for Step<'_> {
    fn deref_mut(&mut self) -> &mut StepStack {
        self.stack
    }
}

impl Drop for Step<'_> {
    fn drop(&mut self) {
        if self.stack.depth() >= self.depth {
            self.stack.skip_back_to(self.depth - 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::{Arc, Mutex};
    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id};
    use tracing::Subscriber;
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
    use tracing_subscriber::registry::LookupSpan;

    struct StepName(String);

    #[derive(Default)]
    struct StepVisitor(Option<String>);

    impl Visit for StepVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "step" {
                self.0 = Some(format!("{:?}", value));
            }
        }

        fn record_str(&mut self, field: &Field, value: &str) {
            if field.name() == "step" {
                self.0 = Some(value.to_string());
            }
        }
    }

    /// Records the name of every step span in the order it closes.
    #[derive(Clone, Default)]
    struct ClosedSteps(Arc<Mutex<Vec<String>>>);

    impl ClosedSteps {
        fn names(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl<S> Layer<S> for ClosedSteps
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
            let mut visitor = StepVisitor::default();
            attrs.record(&mut visitor);
            if let (Some(name), Some(span)) = (visitor.0, ctx.span(id)) {
                span.extensions_mut().insert(StepName(name));
            }
        }

        fn on_close(&self, id: Id, ctx: Context<'_, S>) {
            if let Some(span) = ctx.span(&id)
                && let Some(name) = span.extensions().get::<StepName>()
            {
                self.0.lock().unwrap().push(name.0.clone());
            }
        }
    }

    fn with_closed_steps(f: impl FnOnce()) -> Vec<String> {
        let closed = ClosedSteps::default();
        let subscriber = tracing_subscriber::registry().with(closed.clone());
        tracing::subscriber::with_default(subscriber, f);
        closed.names()
    }

    #[test]
    fn test_balanced_steps_return_to_root() {
        let closed = with_closed_steps(|| {
            let mut stack = StepStack::new("root");
            stack.step_into("a");
            stack.step_into("b");
            assert_eq!(stack.depth(), 2);
            assert_eq!(stack.current_name(), "b");
            stack.step_back();
            stack.step_into("c");
            stack.step_back();
            stack.step_back();

            assert_eq!(stack.depth(), 0);
            assert_eq!(stack.current_name(), "root");
        });

        assert_eq!(closed, vec!["b", "c", "a", "root"]);
    }

    #[test]
    fn test_step_back_at_root_is_noop() {
        let closed = with_closed_steps(|| {
            let mut stack = StepStack::new("root");
            stack.step_back();
            stack.step_back();

            assert_eq!(stack.depth(), 0);
            assert_eq!(stack.current_name(), "root");
            assert!(stack.error().is_none());
        });

        assert_eq!(closed, vec!["root"]);
    }

    #[test]
    fn test_skip_back_to_depth() {
        let closed = with_closed_steps(|| {
            let mut stack = StepStack::new("root");
            stack.step_into("a");
            stack.step_into("b");
            stack.step_into("c");
            stack.skip_back_to(1);

            assert_eq!(stack.depth(), 1);
            assert_eq!(stack.current_name(), "a");
        });

        assert_eq!(closed, vec!["c", "b", "a", "root"]);
    }

    #[test]
    fn test_fail_unwinds_one_level() {
        let closed = with_closed_steps(|| {
            let mut stack = StepStack::new("root");
            stack.step_into("a");
            stack.step_into("b");

            let err = stack.fail_message(format!("boom {}", 42));

            assert_eq!(err, "boom 42");
            assert_eq!(stack.error(), Some("boom 42"));
            assert_eq!(stack.depth(), 1);
            assert_eq!(stack.current_name(), "a");
        });

        assert_eq!(closed, vec!["b", "a", "root"]);
    }

    #[test]
    fn test_guard_unwinds_on_early_return() {
        fn work(stack: &mut StepStack) -> Result<(), String> {
            let mut step = stack.enter("outer");
            step.step_into("inner");
            step.step_into("innermost");
            Err("left without stepping back".to_string())
        }

        let closed = with_closed_steps(|| {
            let mut stack = StepStack::new("root");
            assert!(work(&mut stack).is_err());
            assert_eq!(stack.depth(), 0);
        });

        assert_eq!(closed, vec!["innermost", "inner", "outer", "root"]);
    }

    #[test]
    fn test_guard_fail_closes_frames_above_it() {
        let closed = with_closed_steps(|| {
            let mut stack = StepStack::new("root");
            {
                let mut step = stack.enter("flow");
                step.step_into("upstream");
                let err = step.fail("upstream down");
                assert_eq!(err, "upstream down");
            }

            assert_eq!(stack.depth(), 0);
            assert_eq!(stack.error(), Some("upstream down"));
        });

        assert_eq!(closed, vec!["upstream", "flow", "root"]);
    }

    #[test]
    fn test_end_then_step_into_child() {
        let closed = with_closed_steps(|| {
            let mut stack = StepStack::new("root");
            stack.step_into("a");
            stack.end();
            assert!(stack.current_span().is_none());

            stack.step_into("b");
            assert_eq!(stack.depth(), 2);
            assert!(!stack.current_span().is_none());
            stack.skip_back_to(0);
        });

        assert_eq!(closed, vec!["a", "b", "root"]);
    }

    #[test]
    fn test_drop_closes_all_frames_in_order() {
        let closed = with_closed_steps(|| {
            let mut stack = StepStack::new("root");
            stack.step_into("a");
            stack.step_into("b");
        });

        assert_eq!(closed, vec!["b", "a", "root"]);
    }

    #[test]
    fn test_trace_id_fallback_is_stable() {
        let stack = StepStack::new("root");
        let first = stack.trace_id();

        assert_eq!(first.len(), 32);
        assert_eq!(first, stack.trace_id());
    }
}
