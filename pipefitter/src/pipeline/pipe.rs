//! Compiled pipes and the execution state machine.

use crate::context::Context;
use crate::errors::FittingError;
use crate::events::{EventSink, PipeEvent, PipeEventKind};
use crate::fittings::{Fitting, FittingResult};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// A fitting together with its pre-flight and post-flight bindings.
#[derive(Clone)]
pub struct StageBinding {
    label: String,
    fitting: Arc<dyn Fitting>,
    input: Option<Value>,
    output: Option<String>,
}

impl StageBinding {
    /// Binds a fitting with no input or output mapping.
    #[must_use]
    pub fn new(label: impl Into<String>, fitting: Arc<dyn Fitting>) -> Self {
        Self {
            label: label.into(),
            fitting,
            input: None,
            output: None,
        }
    }

    /// Sets the input binding: a context key, or an object of keys.
    #[must_use]
    pub fn with_input(mut self, input: Option<Value>) -> Self {
        self.input = input;
        self
    }

    /// Sets the output target.
    #[must_use]
    pub fn with_output(mut self, output: Option<String>) -> Self {
        self.output = output;
        self
    }

    /// The step label used in logs and events.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The bound fitting.
    #[must_use]
    pub fn fitting(&self) -> Arc<dyn Fitting> {
        self.fitting.clone()
    }

    /// Runs pre-flight, the fitting and post-flight.
    ///
    /// A panicking fitting is reported as an unexpected failure.
    async fn invoke(&self, ctx: &mut Context) -> Result<(), FittingError> {
        if let Some(binding) = &self.input {
            ctx.input = resolve_input(ctx, binding);
        }

        let result: FittingResult = AssertUnwindSafe(self.fitting.call(ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(FittingError::unexpected(format!("Fitting '{}' panicked", self.label))
                    .with_cause(panic_message(panic.as_ref())))
            });

        let value = result?;
        match self.output.as_deref() {
            None | Some("output") => ctx.output = value,
            Some("input") => ctx.input = value,
            Some(key) => {
                if let Some(value) = value {
                    ctx.set_value(key, value);
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for StageBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageBinding")
            .field("label", &self.label)
            .field("fitting", &self.fitting.name())
            .field("input", &self.input)
            .field("output", &self.output)
            .finish()
    }
}

fn resolve_input(ctx: &Context, binding: &Value) -> Option<Value> {
    match binding {
        Value::String(key) => ctx.lookup(key),
        Value::Object(keys) => Some(Value::Object(
            keys.iter()
                .map(|(name, key)| {
                    let value = key
                        .as_str()
                        .and_then(|key| ctx.lookup(key))
                        .unwrap_or(Value::Null);
                    (name.clone(), value)
                })
                .collect::<Map<String, Value>>(),
        )),
        literal => Some(literal.clone()),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

/// A step and the error handler in scope at its position.
#[derive(Debug, Clone)]
pub struct Stage {
    /// The step itself.
    pub binding: StageBinding,
    /// Handler installed by the closest preceding `onError`.
    pub on_error: Option<StageBinding>,
}

/// How a run of the stage list ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Every stage succeeded.
    Completed,
    /// A stage failed and the handler in scope ran.
    Handled,
    /// A stage failed with no handler in scope.
    Unhandled,
}

/// What an error handler did with the pending error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerOutcome {
    Ran,
    PassedOn,
    Failed,
}

/// An immutable, compiled pipe shared by all requests.
#[derive(Debug)]
pub struct CompiledPipe {
    name: String,
    stages: Vec<Stage>,
    events: Arc<dyn EventSink>,
}

impl CompiledPipe {
    /// Creates a pipe from bound stages.
    #[must_use]
    pub fn new(name: impl Into<String>, stages: Vec<Stage>, events: Arc<dyn EventSink>) -> Self {
        Self {
            name: name.into(),
            stages,
            events,
        }
    }

    /// The pipe name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stages, not counting error handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipe has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage labels in order.
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.binding.label()).collect()
    }

    /// The stages with their error scopes.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Executes the pipe for one request, then invokes the finish callback.
    ///
    /// An error with no handler in scope goes to the context's default
    /// error handler. The finish callback runs exactly once either way.
    pub async fn play(&self, ctx: &mut Context) {
        let span = info_span!("pipe", pipe = %self.name, request_id = %ctx.request_id());
        async {
            if self.run(ctx).await == Flow::Unhandled {
                match ctx.error_handler() {
                    Some(handler) => {
                        let binding = StageBinding::new(handler.name().to_string(), handler);
                        self.handle_error(ctx, &binding).await;
                    }
                    None => debug!("no default error handler installed"),
                }
            }

            let failed = ctx.error.is_some();
            ctx.finish();
            self.events
                .emit(
                    PipeEvent::new(PipeEventKind::PipeFinished, &self.name, ctx.request_id())
                        .with_data(json!({"error": failed})),
                )
                .await;
        }
        .instrument(span)
        .await;
    }

    /// Runs the stages without the default handler or finish.
    pub async fn run(&self, ctx: &mut Context) -> Flow {
        for stage in &self.stages {
            let label = stage.binding.label();
            debug!(fitting = label, "fitting started");
            self.emit(PipeEventKind::FittingStarted, ctx.request_id(), label).await;

            match stage.binding.invoke(ctx).await {
                Ok(()) => {
                    self.emit(PipeEventKind::FittingCompleted, ctx.request_id(), label)
                        .await;
                }
                Err(err) => {
                    debug!(fitting = label, error = %err, "fitting failed");
                    self.events
                        .emit(
                            PipeEvent::new(PipeEventKind::FittingFailed, &self.name, ctx.request_id())
                                .with_fitting(label)
                                .with_data(json!({"message": err.message, "kind": err.kind})),
                        )
                        .await;
                    ctx.error = Some(err);

                    return match &stage.on_error {
                        Some(handler) => {
                            self.handle_error(ctx, handler).await;
                            Flow::Handled
                        }
                        None => Flow::Unhandled,
                    };
                }
            }
        }
        Flow::Completed
    }

    /// Invokes an error handler; if it fails the original error stays.
    async fn handle_error(&self, ctx: &mut Context, handler: &StageBinding) -> HandlerOutcome {
        self.emit(PipeEventKind::ErrorHandlerInvoked, ctx.request_id(), handler.label())
            .await;
        let original = ctx.error.clone();

        match handler.invoke(ctx).await {
            Ok(()) => HandlerOutcome::Ran,
            Err(passed_on) if original.as_ref() == Some(&passed_on) => {
                debug!(handler = handler.label(), error = %passed_on, "error handler passed the error on");
                ctx.error = original;
                HandlerOutcome::PassedOn
            }
            Err(handler_err) => {
                warn!(
                    handler = handler.label(),
                    error = %handler_err,
                    "error handler failed; keeping original error"
                );
                if original.is_some() {
                    ctx.error = original;
                }
                HandlerOutcome::Failed
            }
        }
    }

    async fn emit(&self, kind: PipeEventKind, request_id: Uuid, fitting: &str) {
        self.events
            .emit(PipeEvent::new(kind, &self.name, request_id).with_fitting(fitting))
            .await;
    }
}

/// Runs a whole pipe as one fitting, for `onError` targets naming a pipe.
///
/// Pipes referenced as steps are inlined by the builder instead. An error
/// the pipe does not clear is returned as the call's error.
#[derive(Debug)]
pub struct PipeFitting {
    pipe: Arc<CompiledPipe>,
}

impl PipeFitting {
    /// Wraps a compiled pipe.
    #[must_use]
    pub fn new(pipe: Arc<CompiledPipe>) -> Self {
        Self { pipe }
    }
}

#[async_trait]
impl Fitting for PipeFitting {
    fn name(&self) -> &str {
        self.pipe.name()
    }

    async fn call(&self, ctx: &mut Context) -> FittingResult {
        self.pipe.run(ctx).await;
        match ctx.error.take() {
            Some(err) => Err(err),
            None => Ok(ctx.output.take()),
        }
    }
}
