//! Request parameter validation against the operation's declarations, plus
//! the response check the adapter runs when `validateResponse` is on.

use super::params_parser::parse_and_resolve;
use super::{Fitting, FittingDef, FittingResult, PipelineRuntime};
use crate::context::Context;
use crate::contract::{Operation, ParamLocation, Parameter};
use crate::errors::{FittingError, PipeConfigError};
use async_trait::async_trait;
use http::HeaderMap;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Registered factory name.
pub const NAME: &str = "swagger_validator";

/// Factory for [`Validator`].
pub fn create(def: &FittingDef, _runtime: &PipelineRuntime) -> Result<Arc<dyn Fitting>, PipeConfigError> {
    Ok(Arc::new(Validator {
        name: def.name.clone(),
    }))
}

/// Fails with a 400 listing every parameter problem; otherwise leaves the
/// running output untouched.
#[derive(Debug, Clone)]
pub struct Validator {
    name: String,
}

#[async_trait]
impl Fitting for Validator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &mut Context) -> FittingResult {
        let Some(operation) = ctx.request.operation().cloned() else {
            return Ok(ctx.output.take());
        };

        let params = match ctx.request.swagger.as_ref() {
            Some(swagger) if !swagger.params.is_empty() => swagger.params.clone(),
            _ => parse_and_resolve(&mut ctx.request)?,
        };

        let errors = validate(&operation, &params);
        if errors.is_empty() {
            Ok(ctx.output.take())
        } else {
            debug!(count = errors.len(), "request failed validation");
            Err(FittingError::validation("Validation errors", errors))
        }
    }
}

/// Checks presence, type and enum membership for every declared parameter.
pub fn validate(operation: &Operation, params: &Map<String, Value>) -> Vec<Value> {
    let mut errors = Vec::new();

    for param in &operation.parameters {
        let value = params.get(&param.name).filter(|v| !v.is_null());
        let Some(value) = value else {
            if param.required {
                errors.push(error_entry(
                    "REQUIRED",
                    format!("Missing required {} parameter: {}", param.location, param.name),
                    param,
                ));
            }
            continue;
        };

        if param.location == ParamLocation::Body {
            if let Some(schema) = &param.schema {
                check_body(operation.resolve_schema(schema), value, param, &mut errors);
            }
            continue;
        }

        if let Some(expected) = param.param_type.as_deref() {
            let item_type = param.items.as_ref().and_then(|i| i.get("type")).and_then(Value::as_str);
            if !matches_type(expected, item_type, value) {
                errors.push(error_entry(
                    "INVALID_TYPE",
                    format!("Expected type {expected} but found type {}", type_name(value)),
                    param,
                ));
                continue;
            }
        }

        if let Some(allowed) = &param.allowed_values {
            if !allowed.contains(value) {
                errors.push(error_entry(
                    "ENUM_MISMATCH",
                    format!("No enum match for: {value}"),
                    param,
                ));
            }
        }
    }

    errors
}

/// Problems found in a finished response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseReport {
    /// Mismatches against the declared response.
    pub errors: Vec<Value>,
    /// Suspicious but permitted differences.
    pub warnings: Vec<Value>,
}

impl ResponseReport {
    /// Whether nothing was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

/// Checks a finished response against the operation's declared responses.
///
/// An undeclared status falls back to `default`. Declared header types and
/// the top level of the response schema are checked; `body` is `None` when
/// nothing was written.
#[must_use]
pub fn validate_response(
    operation: &Operation,
    status: u16,
    headers: &HeaderMap,
    body: Option<&Value>,
) -> ResponseReport {
    let mut report = ResponseReport::default();
    let declared = operation
        .responses
        .get(&status.to_string())
        .or_else(|| operation.responses.get("default"));
    let Some(declared) = declared else {
        report.errors.push(response_entry(
            "INVALID_RESPONSE_CODE",
            format!("This is not a valid response code: {status}"),
            "statusCode",
        ));
        return report;
    };

    for (name, header) in &declared.headers {
        let Some(expected) = header.get("type").and_then(Value::as_str) else {
            continue;
        };
        let Some(raw) = headers.get(name.as_str()).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        if !header_matches(expected, raw) {
            report.errors.push(response_entry(
                "INVALID_RESPONSE_HEADER",
                format!("Expected type {expected} but found value {raw}"),
                &format!("headers/{name}"),
            ));
        }
    }

    let Some(schema) = declared.schema.as_ref() else {
        return report;
    };
    let schema = operation.resolve_schema(schema);
    let Some(body) = body else {
        report.warnings.push(response_entry(
            "MISSING_RESPONSE_BODY",
            "Response declares a schema but no body was written".to_string(),
            "body",
        ));
        return report;
    };

    let expected = schema
        .get("type")
        .and_then(Value::as_str)
        .or_else(|| schema.get("properties").map(|_| "object"));
    if let Some(expected) = expected {
        let item_type = schema.get("items").and_then(|i| i.get("type")).and_then(Value::as_str);
        if !matches_type(expected, item_type, body) {
            report.errors.push(response_entry(
                "INVALID_TYPE",
                format!("Expected type {expected} but found type {}", type_name(body)),
                "body",
            ));
            return report;
        }
    }

    if let Some(object) = body.as_object() {
        let required = schema.get("required").and_then(Value::as_array);
        for property in required.into_iter().flatten().filter_map(Value::as_str) {
            if !object.contains_key(property) {
                report.errors.push(response_entry(
                    "OBJECT_MISSING_REQUIRED_PROPERTY",
                    format!("Missing required property: {property}"),
                    "body",
                ));
            }
        }
    }
    report
}

fn header_matches(expected: &str, raw: &str) -> bool {
    match expected {
        "integer" => raw.parse::<i64>().is_ok(),
        "number" => raw.parse::<f64>().is_ok(),
        "boolean" => matches!(raw, "true" | "false"),
        _ => true,
    }
}

fn response_entry(code: &str, message: String, path: &str) -> Value {
    json!({
        "code": code,
        "message": message,
        "path": path,
    })
}

fn check_body(schema: &Value, body: &Value, param: &Parameter, errors: &mut Vec<Value>) {
    let expects_object = schema.get("type").and_then(Value::as_str) == Some("object")
        || schema.get("properties").is_some();
    if !expects_object {
        return;
    }

    let Some(object) = body.as_object() else {
        errors.push(error_entry(
            "INVALID_TYPE",
            format!("Expected type object but found type {}", type_name(body)),
            param,
        ));
        return;
    };

    let required = schema.get("required").and_then(Value::as_array);
    for property in required.into_iter().flatten().filter_map(Value::as_str) {
        if !object.contains_key(property) {
            errors.push(error_entry(
                "OBJECT_MISSING_REQUIRED_PROPERTY",
                format!("Missing required property: {property}"),
                param,
            ));
        }
    }
}

fn matches_type(expected: &str, item_type: Option<&str>, value: &Value) -> bool {
    match expected {
        "array" => value.as_array().is_some_and(|items| {
            items
                .iter()
                .all(|item| item_type.map_or(true, |t| matches_type(t, None, item)))
        }),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "string" => value.is_string(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn error_entry(code: &str, message: String, param: &Parameter) -> Value {
    json!({
        "code": code,
        "message": message,
        "in": param.location,
        "name": param.name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ApiContract;
    use crate::testing::TestRequest;
    use http::{HeaderValue, Method};
    use pretty_assertions::assert_eq;

    const CONTRACT: &str = r##"
swagger: "2.0"
paths:
  /hello:
    get:
      parameters:
        - { name: name, in: query, required: true, type: string }
        - { name: count, in: query, type: integer }
        - { name: mood, in: query, type: string, enum: [happy, sad] }
      responses: {}
  /pets:
    post:
      parameters:
        - { name: pet, in: body, required: true, schema: { $ref: "#/definitions/Pet" } }
      responses: {}
    get:
      responses:
        "200":
          description: ok
          headers:
            X-Rate-Limit: { type: integer }
          schema:
            type: array
            items: { $ref: "#/definitions/Pet" }
        "201":
          description: created
          schema: { $ref: "#/definitions/Pet" }
definitions:
  Pet:
    type: object
    required: [name]
    properties:
      name: { type: string }
"##;

    async fn run(request: TestRequest) -> Result<Option<Value>, FittingError> {
        let mut ctx = request.context_for(CONTRACT);
        Validator { name: NAME.into() }.call(&mut ctx).await
    }

    #[tokio::test]
    async fn test_missing_required_query_parameter() {
        let err = run(TestRequest::get("/hello")).await.unwrap_err();

        assert_eq!(err.status_code, Some(400));
        assert_eq!(err.message, "Validation errors");
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0]["code"], "REQUIRED");
        assert_eq!(err.errors[0]["name"], "name");
        assert_eq!(err.errors[0]["in"], "query");
    }

    #[tokio::test]
    async fn test_type_and_enum_errors() {
        let err = run(TestRequest::get("/hello?name=a&count=many&mood=angry")).await.unwrap_err();

        let codes: Vec<&str> = err.errors.iter().filter_map(|e| e["code"].as_str()).collect();
        assert_eq!(codes, vec!["INVALID_TYPE", "ENUM_MISMATCH"]);
    }

    #[tokio::test]
    async fn test_valid_request_passes_output_through() {
        let mut ctx = TestRequest::get("/hello?name=Scott&count=2&mood=happy").context_for(CONTRACT);
        ctx.output = Some(json!("kept"));

        let out = Validator { name: NAME.into() }.call(&mut ctx).await.unwrap();
        assert_eq!(out, Some(json!("kept")));
    }

    #[tokio::test]
    async fn test_body_schema_required_property() {
        let err = run(TestRequest::post("/pets").json_body(&json!({"age": 3}))).await.unwrap_err();
        assert_eq!(err.errors[0]["code"], "OBJECT_MISSING_REQUIRED_PROPERTY");

        assert!(run(TestRequest::post("/pets").json_body(&json!({"name": "Rex"}))).await.is_ok());

        let missing = run(TestRequest::post("/pets")).await.unwrap_err();
        assert_eq!(missing.errors[0]["code"], "REQUIRED");
    }

    fn list_pets() -> Arc<Operation> {
        let contract = ApiContract::from_yaml_str(CONTRACT).unwrap();
        contract.match_request(&Method::GET, "/pets").operation.unwrap()
    }

    #[test]
    fn test_valid_response_is_clean() {
        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit", HeaderValue::from_static("10"));

        let report = validate_response(&list_pets(), 200, &headers, Some(&json!([{"name": "Rex"}])));
        assert!(report.is_clean());
    }

    #[test]
    fn test_undeclared_status_is_an_error() {
        let report = validate_response(&list_pets(), 404, &HeaderMap::new(), None);

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0]["code"], "INVALID_RESPONSE_CODE");
        assert_eq!(report.errors[0]["message"], "This is not a valid response code: 404");
    }

    #[test]
    fn test_response_header_and_body_mismatches() {
        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit", HeaderValue::from_static("lots"));

        let report = validate_response(&list_pets(), 200, &headers, Some(&json!({"name": "Rex"})));
        let codes: Vec<&str> = report.errors.iter().filter_map(|e| e["code"].as_str()).collect();
        assert_eq!(codes, vec!["INVALID_RESPONSE_HEADER", "INVALID_TYPE"]);
        assert_eq!(report.errors[0]["path"], "headers/X-Rate-Limit");

        let report = validate_response(&list_pets(), 201, &HeaderMap::new(), Some(&json!({"age": 2})));
        assert_eq!(report.errors[0]["code"], "OBJECT_MISSING_REQUIRED_PROPERTY");
    }

    #[test]
    fn test_missing_body_is_a_warning() {
        let report = validate_response(&list_pets(), 201, &HeaderMap::new(), None);

        assert!(report.errors.is_empty());
        assert_eq!(report.warnings[0]["code"], "MISSING_RESPONSE_BODY");
    }

    #[test]
    fn test_matches_type() {
        assert!(matches_type("array", Some("integer"), &json!([1, 2])));
        assert!(!matches_type("array", Some("integer"), &json!([1, "x"])));
        assert!(matches_type("number", None, &json!(1)));
        assert!(!matches_type("integer", None, &json!(1.5)));
    }
}
