//! Event sink trait and implementations.

use super::{PipeEvent, PipeEventKind};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

/// Receives pipe lifecycle events.
///
/// `try_emit` serves synchronous callers such as the adapter's finish
/// callback, so it must not block or fail.
#[async_trait]
pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Emits an event asynchronously.
    async fn emit(&self, event: PipeEvent);

    /// Emits an event without waiting.
    fn try_emit(&self, event: PipeEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: PipeEvent) {}

    fn try_emit(&self, _event: PipeEvent) {}
}

/// Logs events through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at the given level.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub const fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &PipeEvent) {
        let fitting = event.fitting.as_deref().unwrap_or("-");
        if self.level == Level::DEBUG {
            debug!(
                event = %event.kind,
                pipe = %event.pipe,
                fitting,
                request_id = %event.request_id,
                data = ?event.data,
                "pipe event"
            );
        } else {
            info!(
                event = %event.kind,
                pipe = %event.pipe,
                fitting,
                request_id = %event.request_id,
                data = ?event.data,
                "pipe event"
            );
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: PipeEvent) {
        self.log_event(&event);
    }

    fn try_emit(&self, event: PipeEvent) {
        self.log_event(&event);
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<PipeEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected events, in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<PipeEvent> {
        self.events.read().clone()
    }

    /// Number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Whether nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Drops all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Events of one kind.
    #[must_use]
    pub fn events_of_kind(&self, kind: PipeEventKind) -> Vec<PipeEvent> {
        self.events
            .read()
            .iter()
            .filter(|event| event.kind == kind)
            .cloned()
            .collect()
    }

    /// Names of the fittings that started, in order.
    #[must_use]
    pub fn started_fittings(&self) -> Vec<String> {
        self.events_of_kind(PipeEventKind::FittingStarted)
            .into_iter()
            .filter_map(|event| event.fitting)
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: PipeEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: PipeEvent) {
        self.events.write().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event(kind: PipeEventKind, fitting: &str) -> PipeEvent {
        PipeEvent::new(kind, "main", Uuid::new_v4()).with_fitting(fitting)
    }

    #[tokio::test]
    async fn test_noop_and_logging_sinks() {
        NoOpEventSink.emit(event(PipeEventKind::FittingStarted, "a")).await;
        let sink = LoggingEventSink::debug();
        sink.emit(event(PipeEventKind::FittingCompleted, "a")).await;
        sink.try_emit(event(PipeEventKind::PipeFinished, "a"));
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(event(PipeEventKind::FittingStarted, "parser")).await;
        sink.try_emit(event(PipeEventKind::FittingStarted, "router"));
        sink.try_emit(event(PipeEventKind::FittingFailed, "router"));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.started_fittings(), vec!["parser", "router"]);
        assert_eq!(sink.events_of_kind(PipeEventKind::FittingFailed).len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }
}
