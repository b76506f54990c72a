//! Mock fittings for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::errors::FittingError;
use crate::fittings::{Fitting, FittingResult};

/// Call order shared between several fittings.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// A fitting that records each call and returns a fixed output.
#[derive(Debug)]
pub struct RecordingFitting {
    name: String,
    output: Option<Value>,
    log: Option<CallLog>,
    seen_outputs: Mutex<Vec<Option<Value>>>,
    calls: AtomicUsize,
}

impl RecordingFitting {
    /// Creates a fitting whose output is its own name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            output: Some(Value::String(name.clone())),
            name,
            log: None,
            seen_outputs: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Sets the output to return.
    #[must_use]
    pub fn with_output(mut self, output: Option<Value>) -> Self {
        self.output = output;
        self
    }

    /// Appends the fitting name to `log` on every call.
    #[must_use]
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `ctx.output` as observed at the start of each call.
    #[must_use]
    pub fn seen_outputs(&self) -> Vec<Option<Value>> {
        self.seen_outputs.lock().clone()
    }
}

#[async_trait]
impl Fitting for RecordingFitting {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &mut Context) -> FittingResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_outputs.lock().push(ctx.output.clone());
        if let Some(log) = &self.log {
            log.lock().push(self.name.clone());
        }
        Ok(self.output.clone())
    }
}

/// A fitting that always fails.
#[derive(Debug)]
pub struct FailingFitting {
    name: String,
    error: FittingError,
    calls: AtomicUsize,
}

impl FailingFitting {
    /// Creates a fitting failing with `error`.
    #[must_use]
    pub fn new(name: impl Into<String>, error: FittingError) -> Self {
        Self {
            name: name.into(),
            error,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails with a 400 validation error.
    #[must_use]
    pub fn validation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, FittingError::validation(message, Vec::new()))
    }

    /// Fails with an unexpected error.
    #[must_use]
    pub fn unexpected(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, FittingError::unexpected(message))
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fitting for FailingFitting {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, _ctx: &mut Context) -> FittingResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// A fitting that sleeps before passing the output through.
#[derive(Debug)]
pub struct SlowFitting {
    name: String,
    delay: Duration,
}

impl SlowFitting {
    /// Creates a slow fitting with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(name: impl Into<String>, ms: u64) -> Self {
        Self {
            name: name.into(),
            delay: Duration::from_millis(ms),
        }
    }
}

#[async_trait]
impl Fitting for SlowFitting {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &mut Context) -> FittingResult {
        tokio::time::sleep(self.delay).await;
        Ok(ctx.output.take())
    }
}
