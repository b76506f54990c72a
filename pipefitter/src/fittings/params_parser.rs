//! Parses the query string and body and resolves declared parameters.
//!
//! Results go onto the native request (`request.query`, `request.body`,
//! `request.swagger.params`), not into the context.

use super::{Fitting, FittingDef, FittingResult, PipelineRuntime};
use crate::context::{Context, NativeRequest};
use crate::contract::{Operation, ParamLocation, Parameter};
use crate::errors::{FittingError, PipeConfigError};
use async_trait::async_trait;
use serde_json::{Map, Number, Value};
use std::sync::Arc;
use tracing::debug;

/// Registered factory name.
pub const NAME: &str = "swagger_params_parser";

/// Factory for [`ParamsParser`].
pub fn create(def: &FittingDef, _runtime: &PipelineRuntime) -> Result<Arc<dyn Fitting>, PipeConfigError> {
    Ok(Arc::new(ParamsParser {
        name: def.name.clone(),
    }))
}

/// Fitting returning the resolved parameter map.
#[derive(Debug, Clone)]
pub struct ParamsParser {
    name: String,
}

#[async_trait]
impl Fitting for ParamsParser {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &mut Context) -> FittingResult {
        let params = parse_and_resolve(&mut ctx.request)?;
        Ok(Some(Value::Object(params)))
    }
}

/// Parses what the matched operation needs and stores the resolved parameters.
pub(crate) fn parse_and_resolve(request: &mut NativeRequest) -> Result<Map<String, Value>, FittingError> {
    let Some(operation) = request.operation().cloned() else {
        return Ok(Map::new());
    };

    parse_request(request, &operation)?;
    let params = resolve_parameters(request, &operation);
    debug!(count = params.len(), "resolved parameters");

    if let Some(swagger) = request.swagger.as_mut() {
        swagger.params = params.clone();
    }
    Ok(params)
}

fn parse_request(request: &mut NativeRequest, operation: &Operation) -> Result<(), FittingError> {
    let declares = |location: ParamLocation| operation.parameters.iter().any(|p| p.location == location);

    if request.query.is_none() && declares(ParamLocation::Query) {
        request.query = Some(parse_pairs(request.uri.query().unwrap_or_default())?);
    }

    let wants_form = declares(ParamLocation::FormData);
    if request.body.is_some() || request.raw_body.is_empty() || !(wants_form || declares(ParamLocation::Body)) {
        return Ok(());
    }

    let content_type = request.content_type().unwrap_or_default().to_ascii_lowercase();
    let body = if wants_form && content_type.starts_with("application/x-www-form-urlencoded") {
        let text = String::from_utf8_lossy(&request.raw_body);
        Value::Object(parse_pairs(&text)?)
    } else if content_type.contains("json") {
        serde_json::from_slice(&request.raw_body).map_err(|e| {
            FittingError::validation(format!("Unable to parse JSON body: {e}"), Vec::new())
        })?
    } else {
        Value::String(String::from_utf8_lossy(&request.raw_body).into_owned())
    };
    request.body = Some(body);
    Ok(())
}

/// Decodes `a=1&b=2&b=3`; repeated keys become arrays.
fn parse_pairs(encoded: &str) -> Result<Map<String, Value>, FittingError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(encoded)
        .map_err(|e| FittingError::validation(format!("Unable to parse query: {e}"), Vec::new()))?;

    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                map.insert(key, Value::String(value));
            }
        }
    }
    Ok(map)
}

fn resolve_parameters(request: &NativeRequest, operation: &Operation) -> Map<String, Value> {
    let mut params = Map::new();
    for param in &operation.parameters {
        let raw = match param.location {
            ParamLocation::Query => request.query.as_ref().and_then(|q| q.get(&param.name)).cloned(),
            ParamLocation::Path => request
                .swagger
                .as_ref()
                .and_then(|s| s.path_params.get(&param.name))
                .map(|v| Value::String(v.clone())),
            ParamLocation::Header => request.header(&param.name).map(|v| Value::String(v.to_string())),
            ParamLocation::Body => request.body.clone(),
            ParamLocation::FormData => request.body.as_ref().and_then(|b| b.get(&param.name)).cloned(),
        };

        if let Some(value) = raw.or_else(|| param.default.clone()) {
            params.insert(param.name.clone(), coerce(param, value));
        }
    }
    params
}

fn coerce(param: &Parameter, value: Value) -> Value {
    if param.location == ParamLocation::Body {
        return value;
    }

    match param.param_type.as_deref() {
        Some("array") => {
            let item_type = param
                .items
                .as_ref()
                .and_then(|items| items.get("type"))
                .and_then(Value::as_str);
            let items = match value {
                Value::Array(items) => items,
                Value::String(text) => split_collection(&text, param.collection_format.as_deref()),
                other => vec![other],
            };
            Value::Array(items.into_iter().map(|item| coerce_primitive(item_type, item)).collect())
        }
        other => coerce_primitive(other, value),
    }
}

fn split_collection(text: &str, format: Option<&str>) -> Vec<Value> {
    if text.is_empty() {
        return Vec::new();
    }
    let separator = match format {
        Some("ssv") => ' ',
        Some("tsv") => '\t',
        Some("pipes") => '|',
        Some("multi") => return vec![Value::String(text.to_string())],
        _ => ',',
    };
    text.split(separator).map(|part| Value::String(part.to_string())).collect()
}

/// Converts strings to the declared primitive; unparseable values are left
/// as-is for the validator to report.
fn coerce_primitive(param_type: Option<&str>, value: Value) -> Value {
    let Value::String(text) = &value else {
        return value;
    };
    match param_type {
        Some("integer") => text.parse::<i64>().map_or(value, Value::from),
        Some("number") => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map_or(value, Value::Number),
        Some("boolean") => match text.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => value,
        },
        _ => value,
    }
}
