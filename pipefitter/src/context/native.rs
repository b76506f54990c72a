//! Host-side request and response handles.

use crate::contract::{Operation, PathItem, RouteMatch};
use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Routing metadata attached to a request by the adapter.
#[derive(Debug, Clone, Default)]
pub struct SwaggerMetadata {
    /// The matched operation.
    pub operation: Option<Arc<Operation>>,
    /// The matched path.
    pub path: Option<Arc<PathItem>>,
    /// Values captured from path template segments.
    pub path_params: HashMap<String, String>,
    /// Resolved parameter values, filled in by the params parser.
    pub params: Map<String, Value>,
}

impl From<RouteMatch> for SwaggerMetadata {
    fn from(route: RouteMatch) -> Self {
        Self {
            operation: route.operation,
            path: route.path,
            path_params: route.path_params,
            params: Map::new(),
        }
    }
}

/// The inbound request plus data parsed from it by fittings.
#[derive(Debug, Clone, Default)]
pub struct NativeRequest {
    /// HTTP method.
    pub method: Method,
    /// Request URI.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
    /// Unparsed body.
    pub raw_body: Bytes,
    /// Parsed query string.
    pub query: Option<Map<String, Value>>,
    /// Parsed body.
    pub body: Option<Value>,
    /// Routing metadata.
    pub swagger: Option<SwaggerMetadata>,
}

impl NativeRequest {
    /// Creates a request with an empty body.
    #[must_use]
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            ..Self::default()
        }
    }

    /// Splits an `http::Request` into a native request.
    #[must_use]
    pub fn from_http(request: Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            raw_body: body,
            query: None,
            body: None,
            swagger: None,
        }
    }

    /// Rebuilds an `http::Request`, used when the adapter passes a request through.
    #[must_use]
    pub fn into_http(self) -> Request<Bytes> {
        let mut request = Request::new(self.raw_body);
        *request.method_mut() = self.method;
        *request.uri_mut() = self.uri;
        *request.headers_mut() = self.headers;
        request
    }

    /// The request path without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Reads a header as a string.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `Content-Type` header.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// The `Accept` header.
    #[must_use]
    pub fn accept(&self) -> Option<&str> {
        self.headers.get(ACCEPT).and_then(|v| v.to_str().ok())
    }

    /// The matched operation, if any.
    #[must_use]
    pub fn operation(&self) -> Option<&Arc<Operation>> {
        self.swagger.as_ref().and_then(|s| s.operation.as_ref())
    }
}

/// The outbound response under construction.
#[derive(Debug, Clone, Default)]
pub struct NativeResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    body: BytesMut,
    ended: bool,
}

impl NativeResponse {
    /// Creates an empty 200 response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Reads a header as a string.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Appends to the body. Ignored once the response has ended.
    pub fn write(&mut self, chunk: impl AsRef<[u8]>) {
        if !self.ended {
            self.body.extend_from_slice(chunk.as_ref());
        }
    }

    /// Appends a final chunk and marks the response ended.
    pub fn end(&mut self, chunk: impl AsRef<[u8]>) {
        self.write(chunk);
        self.ended = true;
    }

    /// Writes a JSON body with a JSON content type and ends the response.
    pub fn json(&mut self, value: &Value) -> Result<(), serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.end(body);
        Ok(())
    }

    /// Whether `end` was called.
    #[must_use]
    pub const fn is_ended(&self) -> bool {
        self.ended
    }

    /// The body written so far.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Converts into an `http::Response`.
    #[must_use]
    pub fn into_http(self) -> Response<Bytes> {
        let mut response = Response::new(self.body.freeze());
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
