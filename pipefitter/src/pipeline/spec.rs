//! Pipe and step specifications parsed from the `bagpipes` config map.

use crate::errors::PipeConfigError;
use crate::fittings::FittingDef;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Directive key installing a local error handler.
pub const ON_ERROR: &str = "onError";

/// One element of a pipe definition.
#[derive(Debug, Clone, PartialEq)]
pub enum StepSpec {
    /// A named definition, another pipe, or a registered fitting.
    Reference(String),
    /// A definition written in place.
    Inline(FittingDef),
    /// Installs an error handler for the steps that follow.
    OnError(HandlerSpec),
}

/// The target of an `onError` directive.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerSpec {
    /// A named definition, another pipe, or a registered fitting.
    Reference(String),
    /// A definition written in place.
    Inline(FittingDef),
}

impl StepSpec {
    /// Parses one step.
    ///
    /// Accepted shapes: `"name"`, `{onError: ...}`, `{name: ..., ...config}`
    /// and the shorthand `{fittingName: config}`, where a non-object value
    /// becomes the fitting's `input` binding.
    pub fn parse(pipe: &str, value: &Value) -> Result<Self, PipeConfigError> {
        match value {
            Value::String(name) => Ok(Self::Reference(name.clone())),
            Value::Object(object) => {
                if let Some(handler) = object.get(ON_ERROR) {
                    if object.len() != 1 {
                        return Err(PipeConfigError::invalid_step(
                            pipe,
                            "onError must be the only key of its step",
                        ));
                    }
                    return HandlerSpec::parse(pipe, handler).map(Self::OnError);
                }
                parse_definition(pipe, object).map(Self::Inline)
            }
            other => Err(PipeConfigError::invalid_step(
                pipe,
                format!("expected a string or an object, found {other}"),
            )),
        }
    }

    /// The referenced name or the inline definition's name.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Reference(name) | Self::OnError(HandlerSpec::Reference(name)) => name,
            Self::Inline(def) | Self::OnError(HandlerSpec::Inline(def)) => &def.name,
        }
    }
}

impl HandlerSpec {
    fn parse(pipe: &str, value: &Value) -> Result<Self, PipeConfigError> {
        match value {
            Value::String(name) => Ok(Self::Reference(name.clone())),
            Value::Object(object) => parse_definition(pipe, object).map(Self::Inline),
            other => Err(PipeConfigError::invalid_step(
                pipe,
                format!("onError expects a fitting name or definition, found {other}"),
            )),
        }
    }
}

fn parse_definition(pipe: &str, object: &Map<String, Value>) -> Result<FittingDef, PipeConfigError> {
    if object.contains_key("name") {
        return FittingDef::from_value(Value::Object(object.clone()))
            .map_err(|e| PipeConfigError::invalid_step(pipe, e.message));
    }

    let mut entries = object.iter();
    let (Some((name, value)), None) = (entries.next(), entries.next()) else {
        return Err(PipeConfigError::invalid_step(
            pipe,
            "inline fitting needs a 'name' key or a single {fittingName: config} entry",
        ));
    };

    match value {
        Value::Object(config) => {
            let mut config = config.clone();
            config.insert("name".to_string(), Value::String(name.clone()));
            FittingDef::from_value(Value::Object(config))
                .map_err(|e| PipeConfigError::invalid_step(pipe, e.message))
        }
        input => {
            let mut def = FittingDef::named(name.clone());
            def.input = Some(input.clone());
            Ok(def)
        }
    }
}

/// Every pipe and named fitting definition from the config map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipesConfig {
    /// Pipes by name, in step order.
    pub pipes: BTreeMap<String, Vec<StepSpec>>,
    /// Named fitting definitions.
    pub definitions: BTreeMap<String, FittingDef>,
}

impl PipesConfig {
    /// Splits a config map into pipes and fitting definitions.
    ///
    /// Arrays are pipes, objects are fitting definitions (named after their
    /// key unless they carry a `name`), and a bare string is a one-step pipe.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, PipeConfigError> {
        let mut config = Self::default();

        for (key, value) in map {
            match value {
                Value::Array(steps) => {
                    let steps = steps
                        .iter()
                        .map(|step| StepSpec::parse(key, step))
                        .collect::<Result<Vec<_>, _>>()?;
                    config.pipes.insert(key.clone(), steps);
                }
                Value::Object(object) => {
                    let mut object = object.clone();
                    object
                        .entry("name")
                        .or_insert_with(|| Value::String(key.clone()));
                    let def = FittingDef::from_value(Value::Object(object))?;
                    config.definitions.insert(key.clone(), def);
                }
                Value::String(name) => {
                    config
                        .pipes
                        .insert(key.clone(), vec![StepSpec::Reference(name.clone())]);
                }
                other => {
                    return Err(PipeConfigError::invalid_step(
                        key,
                        format!("expected a pipe array or a fitting definition, found {other}"),
                    ));
                }
            }
        }

        Ok(config)
    }

    /// Whether a pipe with this name is defined.
    #[must_use]
    pub fn has_pipe(&self, name: &str) -> bool {
        self.pipes.contains_key(name)
    }
}
