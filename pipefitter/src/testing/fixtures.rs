//! Request, context and runtime fixtures.

use crate::config::RunnerConfig;
use crate::context::{Context, NativeRequest, NativeResponse, SwaggerMetadata};
use crate::contract::ApiContract;
use crate::fittings::PipelineRuntime;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Uri};
use serde_json::{json, Value};
use std::sync::Arc;

/// A context for a bare `GET` with no routing metadata.
#[must_use]
pub fn test_context(path: &str) -> Context {
    TestRequest::get(path).context()
}

/// A runtime over an empty contract with default configuration.
#[must_use]
pub fn test_runtime() -> PipelineRuntime {
    let contract = ApiContract::from_value(json!({"swagger": "2.0", "paths": {}}))
        .unwrap_or_else(|e| panic!("empty test contract: {e}"));
    test_runtime_with(contract)
}

/// A runtime over `contract` with default configuration.
#[must_use]
pub fn test_runtime_with(contract: ApiContract) -> PipelineRuntime {
    PipelineRuntime::new(Arc::new(RunnerConfig::default()), Arc::new(contract))
}

/// Builds requests and contexts for tests.
#[derive(Debug, Clone)]
pub struct TestRequest {
    method: Method,
    uri: String,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl TestRequest {
    /// A request with the given method and URI.
    #[must_use]
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// A `GET` request.
    #[must_use]
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    /// A `POST` request.
    #[must_use]
    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(Method::POST, uri)
    }

    /// A `PUT` request.
    #[must_use]
    pub fn put(uri: impl Into<String>) -> Self {
        Self::new(Method::PUT, uri)
    }

    /// A `DELETE` request.
    #[must_use]
    pub fn delete(uri: impl Into<String>) -> Self {
        Self::new(Method::DELETE, uri)
    }

    /// An `OPTIONS` request.
    #[must_use]
    pub fn options(uri: impl Into<String>) -> Self {
        Self::new(Method::OPTIONS, uri)
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a JSON body and content type.
    #[must_use]
    pub fn json_body(self, body: &Value) -> Self {
        self.header(CONTENT_TYPE.as_str(), "application/json")
            .body(body.to_string())
    }

    /// Sets the raw body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Builds the `http` request.
    ///
    /// # Panics
    ///
    /// Panics on an invalid URI or header.
    #[must_use]
    pub fn build(&self) -> Request<Bytes> {
        let mut request = Request::new(self.body.clone());
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self
            .uri
            .parse::<Uri>()
            .unwrap_or_else(|e| panic!("invalid test uri '{}': {e}", self.uri));
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .unwrap_or_else(|e| panic!("invalid test header name '{name}': {e}"));
            let value = HeaderValue::from_str(value)
                .unwrap_or_else(|e| panic!("invalid test header value '{value}': {e}"));
            request.headers_mut().append(name, value);
        }
        request
    }

    /// The native request, without routing metadata.
    #[must_use]
    pub fn native(&self) -> NativeRequest {
        NativeRequest::from_http(self.build())
    }

    /// A context with no routing metadata.
    #[must_use]
    pub fn context(&self) -> Context {
        Context::new(self.native(), NativeResponse::new())
    }

    /// A context routed against a YAML contract.
    ///
    /// # Panics
    ///
    /// Panics if the contract does not parse.
    #[must_use]
    pub fn context_for(&self, contract_yaml: &str) -> Context {
        let contract = ApiContract::from_yaml_str(contract_yaml)
            .unwrap_or_else(|e| panic!("invalid test contract: {e}"));
        self.context_with(&contract)
    }

    /// A context routed against `contract`.
    #[must_use]
    pub fn context_with(&self, contract: &ApiContract) -> Context {
        let mut native = self.native();
        let route = contract.match_request(&native.method, native.path());
        native.swagger = Some(SwaggerMetadata::from(route));
        Context::new(native, NativeResponse::new())
    }
}
