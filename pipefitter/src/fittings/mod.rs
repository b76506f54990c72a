//! Fitting trait, definitions and the factory registry.
//!
//! A fitting is the unit of work in a pipe. Factories turn an immutable
//! [`FittingDef`] into an executable [`Fitting`] once, at compile time.

pub mod json_error_handler;
pub mod params_parser;
pub mod raw;
pub mod router;
pub mod security;
pub mod validator;

pub use security::{SecurityHandler, SecurityHandlers};

use crate::config::RunnerConfig;
use crate::context::Context;
use crate::contract::ApiContract;
use crate::controllers::ControllerRegistry;
use crate::errors::{FittingError, PipeConfigError};
use crate::events::{EventSink, NoOpEventSink};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// What a fitting hands to the next one.
///
/// `Ok(result)` continues the pipe with `result` as the running output;
/// `Err(err)` short-circuits to the error handler in scope.
pub type FittingResult = Result<Option<Value>, FittingError>;

/// A processing stage within a pipe.
#[async_trait]
pub trait Fitting: Send + Sync + Debug {
    /// Returns the name of the fitting.
    fn name(&self) -> &str;

    /// Runs the fitting against the request context.
    async fn call(&self, ctx: &mut Context) -> FittingResult;
}

/// A fitting backed by a synchronous closure.
pub struct FnFitting<F>
where
    F: Fn(&mut Context) -> FittingResult + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnFitting<F>
where
    F: Fn(&mut Context) -> FittingResult + Send + Sync,
{
    /// Creates a new closure-backed fitting.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnFitting<F>
where
    F: Fn(&mut Context) -> FittingResult + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnFitting").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Fitting for FnFitting<F>
where
    F: Fn(&mut Context) -> FittingResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &mut Context) -> FittingResult {
        (self.func)(ctx)
    }
}

/// A fitting backed by an async closure returning a boxed future.
pub struct AsyncFnFitting<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, FittingResult> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> AsyncFnFitting<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, FittingResult> + Send + Sync,
{
    /// Creates a new async closure-backed fitting.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for AsyncFnFitting<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, FittingResult> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnFitting").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Fitting for AsyncFnFitting<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, FittingResult> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &mut Context) -> FittingResult {
        (self.func)(ctx).await
    }
}

/// Static configuration of one fitting instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FittingDef {
    /// Fitting name; also the factory key unless `type` is given.
    pub name: String,
    /// Factory discriminator.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub fitting_type: Option<String>,
    /// Context key(s) resolved into `ctx.input` before the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Context key receiving the result instead of `output`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Everything else.
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

impl FittingDef {
    /// Creates a definition with no configuration.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parses a definition object; `name` is required.
    pub fn from_value(value: Value) -> Result<Self, PipeConfigError> {
        serde_json::from_value(value)
            .map_err(|e| PipeConfigError::new(format!("Invalid fitting definition: {e}")))
    }

    /// Key used to find the factory.
    #[must_use]
    pub fn factory_key(&self) -> &str {
        self.fitting_type.as_deref().unwrap_or(&self.name)
    }

    /// Deserializes the free-form config into a typed struct.
    pub fn config_as<T: DeserializeOwned>(&self) -> Result<T, PipeConfigError> {
        serde_json::from_value(Value::Object(self.config.clone()))
            .map_err(|e| PipeConfigError::fitting_config(&self.name, e.to_string()))
    }
}

/// Shared, read-only collaborators handed to factories.
#[derive(Debug, Clone)]
pub struct PipelineRuntime {
    /// Runner configuration.
    pub config: Arc<RunnerConfig>,
    /// The API contract.
    pub contract: Arc<ApiContract>,
    /// Controller directories.
    pub controllers: Arc<ControllerRegistry>,
    /// Security handlers by scheme name.
    pub security_handlers: Arc<SecurityHandlers>,
    /// Lifecycle event sink.
    pub events: Arc<dyn EventSink>,
}

impl PipelineRuntime {
    /// Creates a runtime with empty registries and a no-op sink.
    #[must_use]
    pub fn new(config: Arc<RunnerConfig>, contract: Arc<ApiContract>) -> Self {
        Self {
            config,
            contract,
            controllers: Arc::new(ControllerRegistry::new()),
            security_handlers: Arc::new(SecurityHandlers::new()),
            events: Arc::new(NoOpEventSink),
        }
    }
}

/// Creates fittings from definitions.
pub trait FittingFactory: Send + Sync {
    /// Builds a fitting; rejects bad configuration at compile time.
    fn create(&self, def: &FittingDef, runtime: &PipelineRuntime) -> Result<Arc<dyn Fitting>, PipeConfigError>;
}

impl<F> FittingFactory for F
where
    F: Fn(&FittingDef, &PipelineRuntime) -> Result<Arc<dyn Fitting>, PipeConfigError> + Send + Sync,
{
    fn create(&self, def: &FittingDef, runtime: &PipelineRuntime) -> Result<Arc<dyn Fitting>, PipeConfigError> {
        self(def, runtime)
    }
}

/// Factories by name.
#[derive(Clone, Default)]
pub struct FittingRegistry {
    factories: BTreeMap<String, Arc<dyn FittingFactory>>,
}

impl FittingRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in fittings.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(json_error_handler::NAME, json_error_handler::create);
        registry.register(params_parser::NAME, params_parser::create);
        registry.register(raw::NAME, raw::create);
        registry.register(router::NAME, router::create);
        registry.register(security::NAME, security::create);
        registry.register(validator::NAME, validator::create);
        registry
    }

    /// Registers a factory, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, factory: impl FittingFactory + 'static) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Registers a ready-made fitting under its own name.
    pub fn register_fitting(&mut self, fitting: Arc<dyn Fitting>) {
        let name = fitting.name().to_string();
        self.register(
            name,
            move |_: &FittingDef, _: &PipelineRuntime| -> Result<Arc<dyn Fitting>, PipeConfigError> {
                Ok(fitting.clone())
            },
        );
    }

    /// Whether a factory is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Builds a fitting for a definition.
    pub fn create(
        &self,
        pipe: &str,
        def: &FittingDef,
        runtime: &PipelineRuntime,
    ) -> Result<Arc<dyn Fitting>, PipeConfigError> {
        let factory = self
            .factories
            .get(def.factory_key())
            .ok_or_else(|| PipeConfigError::unknown_fitting(pipe, def.factory_key()))?;
        factory.create(def, runtime)
    }

    /// Registered names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Debug for FittingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FittingRegistry")
            .field("factories", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_context, test_runtime};
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_fitting() {
        let fitting = FnFitting::new("greeter", |ctx: &mut Context| {
            ctx.status_code = Some(201);
            Ok(Some(json!("hi")))
        });
        let mut ctx = test_context("/hello");

        assert_eq!(fitting.name(), "greeter");
        assert_eq!(fitting.call(&mut ctx).await.unwrap(), Some(json!("hi")));
        assert_eq!(ctx.status_code, Some(201));
    }

    #[tokio::test]
    async fn test_async_fn_fitting() {
        let fitting = AsyncFnFitting::new("delayed", |ctx| {
            Box::pin(async move {
                tokio::task::yield_now().await;
                ctx.input = Some(json!(1));
                Ok(None)
            })
        });
        let mut ctx = test_context("/hello");

        assert_eq!(fitting.call(&mut ctx).await.unwrap(), None);
        assert_eq!(ctx.input, Some(json!(1)));
    }

    #[test]
    fn test_fitting_def_parsing() {
        let def = FittingDef::from_value(json!({
            "name": "swagger_router",
            "type": "router",
            "output": "routed",
            "mockMode": true,
        }))
        .unwrap();

        assert_eq!(def.factory_key(), "router");
        assert_eq!(def.output.as_deref(), Some("routed"));
        assert_eq!(def.config.get("mockMode"), Some(&json!(true)));
        assert!(!def.config.contains_key("name"));

        assert!(FittingDef::from_value(json!({"mockMode": true})).is_err());
    }

    #[test]
    fn test_registry_builtins_and_unknown() {
        let registry = FittingRegistry::with_builtins();
        assert!(registry.contains("swagger_router"));
        assert!(registry.contains("json_error_handler"));

        let err = registry
            .create("main", &FittingDef::named("nope"), &test_runtime())
            .unwrap_err();
        assert_eq!(err.error_info.unwrap().code, "PIPE-001-UNKNOWN_FITTING");
    }

    #[test]
    fn test_register_fitting_reuses_instance() {
        let mut registry = FittingRegistry::new();
        let fitting: Arc<dyn Fitting> = Arc::new(FnFitting::new("noop", |_: &mut Context| Ok(None)));
        registry.register_fitting(fitting.clone());

        let created = registry
            .create("main", &FittingDef::named("noop"), &test_runtime())
            .unwrap();
        assert!(Arc::ptr_eq(&created, &fitting));
    }
}
