//! Renders `ctx.error` as a JSON response body.

use super::{Fitting, FittingDef, FittingResult, PipelineRuntime};
use crate::config::JsonErrorConfig;
use crate::context::Context;
use crate::errors::{FittingError, PipeConfigError};
use async_trait::async_trait;
use http::header::{HeaderValue, CONTENT_TYPE};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

/// Registered factory name.
pub const NAME: &str = "json_error_handler";

/// Factory for [`JsonErrorHandler`].
pub fn create(def: &FittingDef, _runtime: &PipelineRuntime) -> Result<Arc<dyn Fitting>, PipeConfigError> {
    let config: JsonErrorConfig = def.config_as()?;
    Ok(Arc::new(JsonErrorHandler::new(def.name.clone(), config)))
}

/// Error handler that turns the pending error into a JSON body and clears it.
///
/// With `handle500Errors` off, a 500 is handed back untouched so it reaches
/// the host's error channel.
#[derive(Debug, Clone)]
pub struct JsonErrorHandler {
    name: String,
    config: JsonErrorConfig,
    write_body: BodyWriter,
}

/// Turns the assembled body into the response text.
type BodyWriter = fn(&Value) -> Result<String, serde_json::Error>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    #[serde(skip_serializing_if = "is_empty")]
    errors: &'a [Value],
    #[serde(skip_serializing_if = "is_empty")]
    allowed_methods: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<&'a str>,
}

fn is_empty<T>(items: &&[T]) -> bool {
    items.is_empty()
}

impl JsonErrorHandler {
    /// Creates a handler.
    #[must_use]
    pub fn new(name: impl Into<String>, config: JsonErrorConfig) -> Self {
        Self {
            name: name.into(),
            config,
            write_body: serde_json::to_string::<Value>,
        }
    }

    fn render(&self, err: &FittingError) -> Result<String, serde_json::Error> {
        let body = ErrorBody {
            message: self.config.include_message.then_some(err.message.as_str()),
            code: err.code.as_deref(),
            status_code: err.status_code,
            errors: &err.errors,
            allowed_methods: &err.allowed_methods,
            stack: if self.config.include_err_stack {
                err.cause.as_deref()
            } else {
                None
            },
        };
        let body = serde_json::to_value(&body)?;
        (self.write_body)(&body)
    }
}

/// Picks the response status: a context status ≥ 400, else a native
/// response status ≥ 400, else the error's hint ≥ 400, else 500.
///
/// The flag reports whether the error's hint was consumed.
fn resolve_status(ctx_status: Option<u16>, response_status: u16, err: &FittingError) -> (u16, bool) {
    match (ctx_status, err.status_code) {
        (Some(status), _) if status >= 400 => (status, false),
        _ if response_status >= 400 => (response_status, false),
        (_, Some(hint)) if hint >= 400 => (hint, true),
        _ => (500, false),
    }
}

#[async_trait]
impl Fitting for JsonErrorHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &mut Context) -> FittingResult {
        let Some(pending) = ctx.error.as_ref() else {
            return Ok(ctx.output.take());
        };

        let (status, hint_consumed) =
            resolve_status(ctx.status_code, ctx.response.status.as_u16(), pending);
        if status == 500 && !self.config.handle_500_errors {
            debug!(error = %pending, "leaving 500 error for the host");
            return Err(pending.clone());
        }

        let Some(mut err) = ctx.error.take() else {
            return Ok(None);
        };
        if hint_consumed {
            err.status_code = None;
        }
        debug!(error = %err, status, "rendering error as json");

        ctx.status_code = Some(status);
        ctx.set_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if status == 500 {
            error!(error = %err, cause = ?err.cause, "request failed");
        }

        match self.render(&err) {
            Ok(body) => Ok(Some(Value::String(body))),
            Err(stringify_err) => {
                error!(error = %stringify_err, original = %err, "unable to stringify error");
                ctx.status_code = Some(500);
                let fallback = json!({
                    "message": "unable to stringify error properly",
                    "stringifyErr": stringify_err.to_string(),
                    "originalErrInstance": err.field_names(),
                });
                Ok(Some(Value::String(fallback.to_string())))
            }
        }
    }
}
