//! Read-only view of the API contract document.
//!
//! The runtime consumes a Swagger 2.0 document only through the types in
//! this module: [`Operation`] and [`PathItem`] records, extension directives
//! that cascade document → path → operation, and example/sample lookup for
//! mock responses. [`ApiContract::lint`] covers the structural checks the
//! runner needs at startup; full document validation is left to dedicated
//! tooling.

mod lint;
mod sample;

pub use lint::{
    ContractIssue, ContractReport, DUPLICATE_OPERATIONID, UNRESOLVABLE_REFERENCE, UNUSED_DEFINITION,
};
pub use sample::generate_sample;

use crate::errors::ContractError;
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

/// Directive naming the pipe that should process a request.
pub const SWAGGER_SELECTED_PIPE: &str = "x-swagger-pipe";
/// Directive naming the controller bound to an operation or path.
pub const SWAGGER_ROUTER_CONTROLLER: &str = "x-swagger-router-controller";
/// Directive choosing the controller calling convention.
pub const CONTROLLER_INTERFACE: &str = "x-controller-interface";

const HTTP_METHODS: [&str; 7] = ["get", "put", "post", "delete", "options", "head", "patch"];

/// How a controller handler is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerInterface {
    /// `(context, next)`: the handler receives the pipe [`Context`](crate::context::Context).
    #[serde(rename = "pipe")]
    Pipe,
    /// `(request, response, next)`: the handler receives the native pair.
    #[serde(rename = "middleware")]
    Middleware,
    /// Decide from the handler's declared arity.
    #[serde(rename = "auto-detect")]
    AutoDetect,
}

impl FromStr for ControllerInterface {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pipe" => Ok(Self::Pipe),
            "middleware" => Ok(Self::Middleware),
            "auto-detect" | "auto_detect" => Ok(Self::AutoDetect),
            other => Err(format!("unknown controller interface '{other}'")),
        }
    }
}

impl fmt::Display for ControllerInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipe => write!(f, "pipe"),
            Self::Middleware => write!(f, "middleware"),
            Self::AutoDetect => write!(f, "auto-detect"),
        }
    }
}

/// Where a parameter is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamLocation {
    /// Query string.
    Query,
    /// Path template segment.
    Path,
    /// Request header.
    Header,
    /// Whole request body.
    Body,
    /// Form field.
    FormData,
}

impl fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Path => write!(f, "path"),
            Self::Header => write!(f, "header"),
            Self::Body => write!(f, "body"),
            Self::FormData => write!(f, "formData"),
        }
    }
}

/// A declared operation parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    /// Parameter name.
    pub name: String,
    /// Where the parameter is carried.
    #[serde(rename = "in")]
    pub location: ParamLocation,
    /// Whether the parameter must be present.
    #[serde(default)]
    pub required: bool,
    /// Primitive type for non-body parameters.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub param_type: Option<String>,
    /// Item schema for array parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
    /// Array serialization (`csv`, `ssv`, `tsv`, `pipes`, `multi`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_format: Option<String>,
    /// Allowed values.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,
    /// Value used when the parameter is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Body schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// A declared response.
#[derive(Debug, Clone, Default)]
pub struct ResponseDef {
    /// Response body schema.
    pub schema: Option<Value>,
    /// Examples keyed by MIME type.
    pub examples: Map<String, Value>,
    /// Declared response headers keyed by name.
    pub headers: Map<String, Value>,
}

/// A security scheme from `securityDefinitions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityScheme {
    /// `apiKey`, `basic` or `oauth2`.
    #[serde(rename = "type")]
    pub scheme_type: String,
    /// Header or query name for `apiKey` schemes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `header` or `query` for `apiKey` schemes.
    #[serde(rename = "in", default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// One security requirement object: scheme name → scopes.
pub type SecurityRequirement = BTreeMap<String, Vec<String>>;

/// One HTTP method on one path.
#[derive(Debug)]
pub struct Operation {
    /// HTTP method.
    pub method: Method,
    /// The path template this operation is declared on.
    pub path: String,
    /// The declared `operationId`.
    pub operation_id: Option<String>,
    /// Path-level and operation-level parameters, merged.
    pub parameters: Vec<Parameter>,
    /// Effective security requirements (operation-level, else document-level).
    pub security: Vec<SecurityRequirement>,
    /// Effective produced MIME types.
    pub produces: Vec<String>,
    /// Responses keyed by status code string or `default`.
    pub responses: BTreeMap<String, ResponseDef>,
    /// `x-` extension directives declared on the operation.
    pub extensions: Map<String, Value>,
    definitions: Arc<Value>,
    detected_interface: OnceLock<ControllerInterface>,
}

impl Operation {
    /// The operation id, or the lowercase method name when none is declared.
    #[must_use]
    pub fn handler_name(&self) -> String {
        self.operation_id
            .clone()
            .unwrap_or_else(|| self.method.as_str().to_lowercase())
    }

    /// Returns an extension directive declared on this operation.
    #[must_use]
    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }

    /// Returns the contract-declared example for a status and MIME type.
    #[must_use]
    pub fn example(&self, status: u16, mime: &str) -> Option<&Value> {
        self.responses
            .get(&status.to_string())
            .and_then(|response| response.examples.get(mime))
    }

    /// Generates a sample body from the response schema for a status,
    /// falling back to the `default` response.
    #[must_use]
    pub fn sample(&self, status: u16) -> Option<Value> {
        let response = self
            .responses
            .get(&status.to_string())
            .or_else(|| self.responses.get("default"))?;
        let schema = response.schema.as_ref()?;
        Some(generate_sample(schema, &self.definitions))
    }

    /// Follows a local `#/definitions/...` reference, if the schema is one.
    #[must_use]
    pub fn resolve_schema<'a>(&'a self, schema: &'a Value) -> &'a Value {
        schema
            .get("$ref")
            .and_then(Value::as_str)
            .and_then(|reference| reference.rsplit('/').next())
            .and_then(|name| self.definitions.get(name))
            .unwrap_or(schema)
    }

    /// The memoized calling convention, computing it on first use.
    pub fn detected_interface(&self, detect: impl FnOnce() -> ControllerInterface) -> ControllerInterface {
        *self.detected_interface.get_or_init(detect)
    }
}

/// A path template and its declared operations.
#[derive(Debug)]
pub struct PathItem {
    /// The path template, e.g. `/pets/{id}`.
    pub path: String,
    /// Declared operations.
    pub operations: Vec<Arc<Operation>>,
    /// `x-` extension directives declared on the path.
    pub extensions: Map<String, Value>,
}

impl PathItem {
    /// Returns the operation for a method, if declared.
    #[must_use]
    pub fn operation(&self, method: &Method) -> Option<&Arc<Operation>> {
        self.operations.iter().find(|op| &op.method == method)
    }

    /// Returns an extension directive declared on this path.
    #[must_use]
    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }

    /// Declared methods, uppercase and sorted.
    #[must_use]
    pub fn allowed_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self
            .operations
            .iter()
            .map(|op| op.method.as_str().to_uppercase())
            .collect();
        methods.sort();
        methods
    }
}

/// The result of matching a request against the contract.
#[derive(Debug, Clone, Default)]
pub struct RouteMatch {
    /// The matched path, if any.
    pub path: Option<Arc<PathItem>>,
    /// The matched operation, if the method is declared on the path.
    pub operation: Option<Arc<Operation>>,
    /// Values captured from path template segments.
    pub path_params: HashMap<String, String>,
}

impl RouteMatch {
    /// Reads a string directive from the operation, then the path.
    #[must_use]
    pub fn directive(&self, key: &str) -> Option<&str> {
        self.operation
            .as_ref()
            .and_then(|op| op.extension(key))
            .or_else(|| self.path.as_ref().and_then(|path| path.extension(key)))
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// A parsed Swagger 2.0 contract document.
#[derive(Debug)]
pub struct ApiContract {
    document: Value,
    base_path: String,
    paths: Vec<Arc<PathItem>>,
    extensions: Map<String, Value>,
    security_definitions: HashMap<String, SecurityScheme>,
}

impl ApiContract {
    /// Parses a YAML document.
    pub fn from_yaml_str(source: &str) -> Result<Self, ContractError> {
        let document: Value =
            serde_yaml::from_str(source).map_err(|e| ContractError::Parse(e.to_string()))?;
        Self::from_value(document)
    }

    /// Parses a JSON document.
    pub fn from_json_str(source: &str) -> Result<Self, ContractError> {
        let document: Value =
            serde_json::from_str(source).map_err(|e| ContractError::Parse(e.to_string()))?;
        Self::from_value(document)
    }

    /// Builds the contract view from an already-parsed document.
    pub fn from_value(document: Value) -> Result<Self, ContractError> {
        let root = document
            .as_object()
            .ok_or_else(|| ContractError::invalid("#", "document must be an object"))?;

        let base_path = root
            .get("basePath")
            .and_then(Value::as_str)
            .unwrap_or("/")
            .trim_end_matches('/')
            .to_string();
        let extensions = extension_map(root);
        let definitions = Arc::new(root.get("definitions").cloned().unwrap_or(Value::Null));
        let global_produces = string_list(root.get("produces"));
        let global_security = match root.get("security") {
            Some(value) => security_list(value, "#/security")?,
            None => Vec::new(),
        };

        let mut security_definitions = HashMap::new();
        if let Some(Value::Object(defs)) = root.get("securityDefinitions") {
            for (name, def) in defs {
                let scheme: SecurityScheme = serde_json::from_value(def.clone()).map_err(|e| {
                    ContractError::invalid(format!("#/securityDefinitions/{name}"), e.to_string())
                })?;
                security_definitions.insert(name.clone(), scheme);
            }
        }

        let mut paths = Vec::new();
        if let Some(Value::Object(path_map)) = root.get("paths") {
            for (template, item) in path_map {
                let location = format!("#/paths/{template}");
                let item = item
                    .as_object()
                    .ok_or_else(|| ContractError::invalid(&location, "path item must be an object"))?;

                let shared_params = parameter_list(&document, item.get("parameters"), &location)?;
                let mut operations = Vec::new();

                for method_name in HTTP_METHODS {
                    let Some(op) = item.get(method_name).and_then(Value::as_object) else {
                        continue;
                    };
                    let op_location = format!("{location}/{method_name}");
                    let method = Method::from_bytes(method_name.to_uppercase().as_bytes())
                        .map_err(|e| ContractError::invalid(&op_location, e.to_string()))?;

                    let mut parameters = shared_params.clone();
                    for param in parameter_list(&document, op.get("parameters"), &op_location)? {
                        parameters.retain(|p| !(p.name == param.name && p.location == param.location));
                        parameters.push(param);
                    }

                    let security = match op.get("security") {
                        Some(value) => security_list(value, &op_location)?,
                        None => global_security.clone(),
                    };
                    let produces = match op.get("produces") {
                        Some(value) => string_list(Some(value)),
                        None => global_produces.clone(),
                    };

                    operations.push(Arc::new(Operation {
                        method,
                        path: template.clone(),
                        operation_id: op.get("operationId").and_then(Value::as_str).map(String::from),
                        parameters,
                        security,
                        produces,
                        responses: response_map(op.get("responses")),
                        extensions: extension_map(op),
                        definitions: definitions.clone(),
                        detected_interface: OnceLock::new(),
                    }));
                }

                paths.push(Arc::new(PathItem {
                    path: template.clone(),
                    operations,
                    extensions: extension_map(item),
                }));
            }
        }

        Ok(Self {
            document,
            base_path,
            paths,
            extensions,
            security_definitions,
        })
    }

    /// The raw document.
    #[must_use]
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// The declared paths.
    #[must_use]
    pub fn paths(&self) -> &[Arc<PathItem>] {
        &self.paths
    }

    /// Returns a document-level extension directive.
    #[must_use]
    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }

    /// Looks up a security scheme by name.
    #[must_use]
    pub fn security_scheme(&self, name: &str) -> Option<&SecurityScheme> {
        self.security_definitions.get(name)
    }

    /// Reads a string directive with full cascade: operation, then path,
    /// then document.
    #[must_use]
    pub fn cascaded_directive<'a>(
        &'a self,
        operation: Option<&'a Operation>,
        path: Option<&'a PathItem>,
        key: &str,
    ) -> Option<&'a str> {
        operation
            .and_then(|op| op.extension(key))
            .or_else(|| path.and_then(|path| path.extension(key)))
            .or_else(|| self.extension(key))
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Finds the path and operation for a request.
    ///
    /// Static segments win over template segments when several paths match.
    #[must_use]
    pub fn match_request(&self, method: &Method, request_path: &str) -> RouteMatch {
        let request_path = request_path.split('?').next().unwrap_or_default();
        let Some(relative) = self.strip_base_path(request_path) else {
            return RouteMatch::default();
        };
        let segments: Vec<&str> = split_segments(relative);

        let mut best: Option<(usize, &Arc<PathItem>, HashMap<String, String>)> = None;
        for item in &self.paths {
            if let Some((score, params)) = match_template(&item.path, &segments) {
                if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
                    best = Some((score, item, params));
                }
            }
        }

        match best {
            Some((_, item, path_params)) => RouteMatch {
                operation: item.operation(method).cloned(),
                path: Some(item.clone()),
                path_params,
            },
            None => RouteMatch::default(),
        }
    }

    fn strip_base_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.base_path.is_empty() {
            return Some(path);
        }
        let rest = path.strip_prefix(&self.base_path)?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn match_template(template: &str, segments: &[&str]) -> Option<(usize, HashMap<String, String>)> {
    let parts = split_segments(template);
    if parts.len() != segments.len() {
        return None;
    }

    let mut score = 0;
    let mut params = HashMap::new();
    for (part, segment) in parts.iter().zip(segments) {
        if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            let value = urlencoding::decode(segment).map_or_else(|_| (*segment).to_string(), Cow::into_owned);
            params.insert(name.to_string(), value);
        } else if part == segment {
            score += 1;
        } else {
            return None;
        }
    }
    Some((score, params))
}

fn extension_map(object: &Map<String, Value>) -> Map<String, Value> {
    object
        .iter()
        .filter(|(key, _)| key.starts_with("x-"))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default()
}

fn security_list(value: &Value, location: &str) -> Result<Vec<SecurityRequirement>, ContractError> {
    serde_json::from_value(value.clone())
        .map_err(|e| ContractError::invalid(format!("{location}/security"), e.to_string()))
}

fn parameter_list(
    document: &Value,
    value: Option<&Value>,
    location: &str,
) -> Result<Vec<Parameter>, ContractError> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let item_location = format!("{location}/parameters/{index}");
            let resolved = match item.get("$ref").and_then(Value::as_str) {
                Some(reference) => document
                    .pointer(reference.trim_start_matches('#'))
                    .ok_or_else(|| {
                        ContractError::invalid(&item_location, format!("unresolved reference {reference}"))
                    })?,
                None => item,
            };
            serde_json::from_value(resolved.clone())
                .map_err(|e| ContractError::invalid(&item_location, e.to_string()))
        })
        .collect()
}

fn response_map(value: Option<&Value>) -> BTreeMap<String, ResponseDef> {
    let Some(Value::Object(responses)) = value else {
        return BTreeMap::new();
    };

    responses
        .iter()
        .filter(|(key, _)| !key.starts_with("x-"))
        .map(|(status, response)| {
            let def = ResponseDef {
                schema: response.get("schema").cloned(),
                examples: response
                    .get("examples")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
                headers: response
                    .get("headers")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            };
            (status.clone(), def)
        })
        .collect()
}
