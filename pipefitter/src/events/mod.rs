//! Lifecycle events emitted while pipes run.
//!
//! The pipe engine reports every fitting start, completion and failure and
//! every pipe finish to an [`EventSink`]. With `validateResponse` on, the
//! adapter also reports responses that do not match the contract. The runner defaults to
//! [`NoOpEventSink`]; [`LoggingEventSink`] forwards events to `tracing` and
//! [`CollectingEventSink`] keeps them in memory for tests.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipeEventKind {
    /// A fitting is about to be called.
    #[serde(rename = "fitting.started")]
    FittingStarted,
    /// A fitting returned a result.
    #[serde(rename = "fitting.completed")]
    FittingCompleted,
    /// A fitting returned an error or panicked.
    #[serde(rename = "fitting.failed")]
    FittingFailed,
    /// An error handler ran for a failed fitting.
    #[serde(rename = "error_handler.invoked")]
    ErrorHandlerInvoked,
    /// The pipe reached its finish callback.
    #[serde(rename = "pipe.finished")]
    PipeFinished,
    /// A finished response did not match its declared response.
    #[serde(rename = "response.validation_error")]
    ResponseValidationError,
}

impl PipeEventKind {
    /// Dotted event name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FittingStarted => "fitting.started",
            Self::FittingCompleted => "fitting.completed",
            Self::FittingFailed => "fitting.failed",
            Self::ErrorHandlerInvoked => "error_handler.invoked",
            Self::PipeFinished => "pipe.finished",
            Self::ResponseValidationError => "response.validation_error",
        }
    }
}

impl fmt::Display for PipeEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeEvent {
    /// Event kind.
    pub kind: PipeEventKind,
    /// The pipe being executed.
    pub pipe: String,
    /// The fitting involved, for fitting-level events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fitting: Option<String>,
    /// The execution this event belongs to.
    pub request_id: Uuid,
    /// Extra detail such as an error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl PipeEvent {
    /// Creates a pipe-level event.
    #[must_use]
    pub fn new(kind: PipeEventKind, pipe: impl Into<String>, request_id: Uuid) -> Self {
        Self {
            kind,
            pipe: pipe.into(),
            fitting: None,
            request_id,
            data: None,
        }
    }

    /// Sets the fitting name.
    #[must_use]
    pub fn with_fitting(mut self, fitting: impl Into<String>) -> Self {
        self.fitting = Some(fitting.into());
        self
    }

    /// Sets the detail payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_names() {
        assert_eq!(PipeEventKind::FittingFailed.to_string(), "fitting.failed");
        assert_eq!(
            serde_json::to_value(PipeEventKind::PipeFinished).unwrap(),
            serde_json::json!("pipe.finished")
        );
        assert_eq!(
            serde_json::to_value(PipeEventKind::ResponseValidationError).unwrap(),
            serde_json::json!(PipeEventKind::ResponseValidationError.as_str())
        );
    }

    #[test]
    fn test_event_builder() {
        let id = Uuid::new_v4();
        let event = PipeEvent::new(PipeEventKind::FittingStarted, "main", id)
            .with_fitting("swagger_router")
            .with_data(serde_json::json!({"index": 2}));

        assert_eq!(event.fitting.as_deref(), Some("swagger_router"));
        assert_eq!(event.request_id, id);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "fitting.started");
    }
}
