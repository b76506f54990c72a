//! Reference host adapter on `http` request/response types.
//!
//! [`ConnectAdapter::handle`] matches the request against the contract,
//! runs the selected pipe and maps the finished context onto an
//! `http::Response`. Requests for paths the contract does not know are
//! handed back untouched so the host can route them elsewhere. With
//! `validateResponse` on, every successfully finished response is checked
//! against the operation and mismatches go to the runner's event sink.

use crate::context::{Context, NativeRequest, NativeResponse, SwaggerMetadata};
use crate::contract::SWAGGER_SELECTED_PIPE;
use crate::errors::FittingError;
use crate::events::{EventSink, PipeEvent, PipeEventKind};
use crate::fittings::validator::validate_response;
use crate::runner::Runner;
use bytes::Bytes;
use http::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

const NO_IMPLEMENTATION: &str = "No implementation found for this path.";

/// What the host should do with a request.
#[derive(Debug)]
pub enum AdapterOutcome {
    /// Send this response.
    Respond(Response<Bytes>),
    /// The contract does not know the path; continue with the host's own routing.
    PassThrough(Request<Bytes>),
    /// Forward the error to the host's error channel. `response` carries
    /// whatever status and headers were set before the failure.
    Failed {
        /// The error left on the context.
        error: FittingError,
        /// The response built so far.
        response: Response<Bytes>,
    },
}

impl AdapterOutcome {
    /// The response, if the request was handled either way.
    #[must_use]
    pub fn into_response(self) -> Option<Response<Bytes>> {
        match self {
            Self::Respond(response) | Self::Failed { response, .. } => Some(response),
            Self::PassThrough(_) => None,
        }
    }
}

/// Result of mapping a finished context onto the native response.
type FinishSignal = Result<(), FittingError>;

/// Runs requests through a [`Runner`].
#[derive(Debug, Clone)]
pub struct ConnectAdapter {
    runner: Arc<Runner>,
}

impl ConnectAdapter {
    /// Creates an adapter.
    #[must_use]
    pub fn new(runner: Arc<Runner>) -> Self {
        Self { runner }
    }

    /// Handles one request.
    pub async fn handle(&self, request: Request<Bytes>) -> AdapterOutcome {
        let mut native = NativeRequest::from_http(request);
        let route = self.runner.route(&native);

        let allowed = route
            .path
            .as_ref()
            .map(|path| path.allowed_methods())
            .unwrap_or_default();

        if route.operation.is_none() {
            let Some(path) = route.path.as_ref() else {
                debug!(path = native.path(), "path not in contract");
                return AdapterOutcome::PassThrough(native.into_http());
            };
            let has_pipe = path
                .extension(SWAGGER_SELECTED_PIPE)
                .and_then(Value::as_str)
                .is_some_and(|pipe| !pipe.is_empty());
            if !has_pipe && native.method != Method::OPTIONS {
                let message = format!(
                    "Path [{}] defined in Swagger, but {} operation is not.",
                    path.path, native.method
                );
                return method_not_allowed(FittingError::method_not_allowed(message, allowed));
            }
        }

        native.swagger = Some(SwaggerMetadata::from(route.clone()));

        let pipe = match self.runner.select_pipe(&route) {
            Ok(Some(pipe)) => pipe,
            Ok(None) => {
                return method_not_allowed(FittingError::method_not_allowed(NO_IMPLEMENTATION, allowed));
            }
            Err(err) => {
                error!(error = %err, "pipe selection failed");
                let error = FittingError::configuration(err.to_string());
                let response = status_response(error.effective_status());
                return AdapterOutcome::Failed { error, response };
            }
        };

        let ctx = self.runner.build_context(native, NativeResponse::new());
        let check = self.runner.config().validate_response.then(|| ResponseCheck {
            events: self.runner.events().clone(),
            pipe: pipe.name().to_string(),
        });
        let (tx, rx) = oneshot::channel::<FinishSignal>();
        let ctx = self
            .runner
            .run_pipe(
                &pipe,
                ctx,
                Box::new(move |ctx: &mut Context| {
                    let signal = finish(ctx);
                    if let (Ok(()), Some(check)) = (&signal, &check) {
                        check.inspect(ctx);
                    }
                    // The receiver is held by this call until the pipe returns.
                    let _ = tx.send(signal);
                }),
            )
            .await;

        let signal = rx.await.unwrap_or_else(|_| {
            Err(FittingError::unexpected("pipe completed without finishing"))
        });
        let mut response = ctx.response;
        match signal {
            Ok(()) => AdapterOutcome::Respond(response.into_http()),
            Err(error) => {
                if let Ok(status) = StatusCode::from_u16(error.effective_status()) {
                    response.status = status;
                }
                AdapterOutcome::Failed {
                    error,
                    response: response.into_http(),
                }
            }
        }
    }
}

fn status_response(status: u16) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response
}

fn method_not_allowed(error: FittingError) -> AdapterOutcome {
    debug!(error = %error, "method not allowed");
    let mut response = status_response(error.effective_status());
    if !error.allowed_methods.is_empty() {
        if let Ok(allow) = HeaderValue::from_str(&error.allowed_methods.join(", ")) {
            response.headers_mut().insert(ALLOW, allow);
        }
    }
    AdapterOutcome::Failed { error, response }
}

/// Maps the finished context onto its native response.
///
/// A pending error is returned instead and nothing is written.
fn finish(ctx: &mut Context) -> FinishSignal {
    if let Some(err) = ctx.error.clone() {
        debug!(error = %err, "pipe finished with error");
        return Err(err);
    }

    if let Some(status) = ctx.status_code {
        ctx.response.status = StatusCode::from_u16(status)
            .map_err(|e| FittingError::unexpected(format!("invalid status code {status}: {e}")))?;
    }
    for (name, value) in &ctx.headers {
        ctx.response.set_header(name.clone(), value.clone());
    }

    if let Some(output) = ctx.output.take() {
        if ctx.response.header(CONTENT_TYPE.as_str()).is_none() {
            ctx.response
                .set_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        let body = translate(&output, ctx.response.header(CONTENT_TYPE.as_str()))?;
        ctx.response.end(body);
    }
    Ok(())
}

/// Reports finished responses that do not match the contract.
struct ResponseCheck {
    events: Arc<dyn EventSink>,
    pipe: String,
}

impl ResponseCheck {
    fn inspect(&self, ctx: &Context) {
        let Some(operation) = ctx.request.operation() else {
            return;
        };
        let status = ctx.response.status.as_u16();
        let body = written_body(ctx.response.body(), ctx.response.header(CONTENT_TYPE.as_str()));
        let report = validate_response(operation, status, &ctx.response.headers, body.as_ref());
        if report.is_clean() {
            return;
        }

        warn!(
            method = %ctx.request.method,
            path = ctx.request.path(),
            status,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "response does not match the contract"
        );
        self.events.try_emit(
            PipeEvent::new(PipeEventKind::ResponseValidationError, &self.pipe, ctx.request_id()).with_data(
                json!({
                    "method": ctx.request.method.as_str(),
                    "path": ctx.request.path(),
                    "statusCode": status,
                    "errors": report.errors,
                    "warnings": report.warnings,
                }),
            ),
        );
    }
}

/// Reads back a written body in the shape the contract describes it.
fn written_body(body: &[u8], content_type: Option<&str>) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    let content_type = content_type.unwrap_or_default();
    let parsed: Option<Value> = if content_type.contains("json") {
        serde_json::from_slice(body).ok()
    } else if content_type.contains("yaml") {
        serde_yaml::from_slice(body).ok()
    } else {
        None
    };
    Some(parsed.unwrap_or_else(|| Value::String(String::from_utf8_lossy(body).into_owned())))
}

/// Serializes an output value for the given content type.
///
/// Strings are written as-is.
pub fn translate(output: &Value, content_type: Option<&str>) -> Result<Bytes, FittingError> {
    let content_type = content_type.unwrap_or_default();
    let body = match output {
        Value::String(text) => text.clone(),
        other if content_type.contains("json") => serde_json::to_string(other)?,
        other if content_type.contains("yaml") => serde_yaml::to_string(other)
            .map_err(|e| FittingError::unexpected(format!("YAML error: {e}")))?,
        other => serde_json::to_string_pretty(other)?,
    };
    Ok(Bytes::from(body))
}

#[cfg(test)]
mod tests;
