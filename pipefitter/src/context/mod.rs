//! The per-request context threaded through every fitting of a pipe.
//!
//! This module provides:
//! - [`Context`], the mutable record a pipe execution owns for one request
//! - [`NativeRequest`]/[`NativeResponse`], the host-side request pair that
//!   carries the second data channel (parsed query, body, swagger metadata)

mod native;

pub use native::{NativeRequest, NativeResponse, SwaggerMetadata};

use crate::errors::FittingError;
use crate::fittings::Fitting;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::HeaderMap;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Completion callback installed by a host adapter.
pub type FinishFn = Box<dyn FnOnce(&mut Context) + Send + Sync>;

/// Mutable state for one pipe execution.
pub struct Context {
    /// The native request; fittings attach parsed data to it.
    pub request: NativeRequest,
    /// The native response; native-style controllers write to it directly.
    pub response: NativeResponse,
    /// Payload for the next fitting, set by an `input` binding or a prior output.
    pub input: Option<Value>,
    /// Response status; last writer wins.
    pub status_code: Option<u16>,
    /// Response headers accumulated by fittings.
    pub headers: HeaderMap,
    /// Response body.
    pub output: Option<Value>,
    /// Set while the pipe is short-circuiting.
    pub error: Option<FittingError>,
    request_id: Uuid,
    values: HashMap<String, Value>,
    error_handler: Option<Arc<dyn Fitting>>,
    finish: Option<FinishFn>,
}

impl Context {
    /// Creates a context owning the native request/response pair.
    #[must_use]
    pub fn new(request: NativeRequest, response: NativeResponse) -> Self {
        Self {
            request,
            response,
            input: None,
            status_code: None,
            headers: HeaderMap::new(),
            output: None,
            error: None,
            request_id: Uuid::new_v4(),
            values: HashMap::new(),
            error_handler: None,
            finish: None,
        }
    }

    /// Sets the fallback error handler.
    #[must_use]
    pub fn with_error_handler(mut self, handler: Arc<dyn Fitting>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Sets the finish callback.
    #[must_use]
    pub fn with_finish(mut self, finish: FinishFn) -> Self {
        self.finish = Some(finish);
        self
    }

    /// Identifier of this execution.
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// The fallback error handler, if one was installed.
    #[must_use]
    pub fn error_handler(&self) -> Option<Arc<dyn Fitting>> {
        self.error_handler.clone()
    }

    /// Replaces the finish callback.
    pub fn set_finish(&mut self, finish: FinishFn) {
        self.finish = Some(finish);
    }

    /// Whether a finish callback is still pending.
    #[must_use]
    pub const fn has_finish(&self) -> bool {
        self.finish.is_some()
    }

    /// Invokes the finish callback. Returns `false` if it already ran or was never set.
    pub fn finish(&mut self) -> bool {
        match self.finish.take() {
            Some(finish) => {
                finish(self);
                true
            }
            None => false,
        }
    }

    /// Sets a response header.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Sets a response header from strings, rejecting invalid names or values.
    pub fn try_set_header(&mut self, name: &str, value: &str) -> Result<(), FittingError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| FittingError::unexpected(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| FittingError::unexpected(format!("invalid header value '{value}': {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// The `Content-Type` accumulated so far.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Reads a named value written by an `output` binding.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Writes a named value.
    pub fn set_value(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Resolves a context key for an `input` binding.
    ///
    /// Built-in keys (`output`, `input`, `statusCode`, `request.query`,
    /// `request.body`, `request.params`) are consulted before named values.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<Value> {
        match key {
            "output" => self.output.clone(),
            "input" => self.input.clone(),
            "statusCode" => self.status_code.map(Value::from),
            "request.query" => self.request.query.clone().map(Value::Object),
            "request.body" => self.request.body.clone(),
            "request.params" => self
                .request
                .swagger
                .as_ref()
                .map(|swagger| Value::Object(swagger.params.clone())),
            other => self.values.get(other).cloned(),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request_id)
            .field("method", &self.request.method)
            .field("uri", &self.request.uri)
            .field("status_code", &self.status_code)
            .field("headers", &self.headers)
            .field("output", &self.output)
            .field("error", &self.error)
            .field("has_finish", &self.finish.is_some())
            .finish_non_exhaustive()
    }
}
