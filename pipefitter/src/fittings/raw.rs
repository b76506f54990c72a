//! Serves the contract document itself.

use super::{Fitting, FittingDef, FittingResult, PipelineRuntime};
use crate::config::RawConfig;
use crate::context::Context;
use crate::errors::PipeConfigError;
use async_trait::async_trait;
use http::header::{HeaderValue, CONTENT_TYPE};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Registered factory name.
pub const NAME: &str = "swagger_raw";

/// Factory for [`RawDocument`]. Both renderings are prepared up front.
pub fn create(def: &FittingDef, runtime: &PipelineRuntime) -> Result<Arc<dyn Fitting>, PipeConfigError> {
    let config: RawConfig = def.config_as()?;
    let keep: Box<dyn Fn(&str) -> bool> = match config.filter {
        Some(pattern) => {
            let regex = Regex::new(&pattern)
                .map_err(|e| PipeConfigError::fitting_config(&def.name, format!("invalid filter: {e}")))?;
            Box::new(move |key: &str| regex.is_match(key))
        }
        None => Box::new(|key: &str| !key.starts_with("x-")),
    };

    let filtered = filter_keys(runtime.contract.document(), &*keep);
    let json = serde_json::to_string_pretty(&filtered)
        .map_err(|e| PipeConfigError::fitting_config(&def.name, e.to_string()))?;
    let yaml = serde_yaml::to_string(&filtered)
        .map_err(|e| PipeConfigError::fitting_config(&def.name, e.to_string()))?;

    Ok(Arc::new(RawDocument {
        name: def.name.clone(),
        json,
        yaml,
    }))
}

/// Returns the filtered document as YAML when the client asks for it, JSON otherwise.
#[derive(Debug, Clone)]
pub struct RawDocument {
    name: String,
    json: String,
    yaml: String,
}

/// Keeps object keys accepted by `keep`, recursing through objects only.
fn filter_keys(value: &Value, keep: &dyn Fn(&str) -> bool) -> Value {
    match value {
        Value::Object(object) => Value::Object(
            object
                .iter()
                .filter(|(key, _)| keep(key))
                .map(|(key, value)| (key.clone(), filter_keys(value, keep)))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

#[async_trait]
impl Fitting for RawDocument {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &mut Context) -> FittingResult {
        let wants_yaml = ctx.request.accept().is_some_and(|accept| accept.contains("yaml"));
        let (content_type, body) = if wants_yaml {
            ("application/yaml", &self.yaml)
        } else {
            ("application/json", &self.json)
        };
        ctx.set_header(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Ok(Some(Value::String(body.clone())))
    }
}
