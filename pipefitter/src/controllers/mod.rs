//! Controllers and the handlers they expose.
//!
//! A [`ControllerRegistry`] maps directory name → controller name →
//! [`Controller`], and a controller maps operation id → [`Handler`]. Handlers
//! come in two calling conventions: pipe style receives the whole
//! [`Context`]; native style receives the request/response pair.

mod cache;
pub mod mock;

pub use cache::ControllerCache;

use crate::context::{Context, NativeRequest, NativeResponse};
use crate::errors::{ControllerLookupError, FittingError};
use crate::fittings::FittingResult;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The arguments a handler is invoked with.
pub enum HandlerCall<'a> {
    /// Pipe style: `(context, next)`.
    Pipe(&'a mut Context),
    /// Native style: `(request, response, next)`.
    Native {
        /// The native request.
        request: &'a mut NativeRequest,
        /// The native response.
        response: &'a mut NativeResponse,
    },
}

/// A controller operation.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Number of declared parameters including the continuation:
    /// 2 for pipe style, 3 for native style.
    fn arity(&self) -> usize;

    /// Invokes the handler.
    async fn call(&self, call: HandlerCall<'_>) -> FittingResult;
}

/// A pipe-style handler backed by an async closure.
pub struct PipeFn<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, FittingResult> + Send + Sync,
{
    func: F,
}

impl<F> PipeFn<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, FittingResult> + Send + Sync,
{
    /// Wraps a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Handler for PipeFn<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, FittingResult> + Send + Sync,
{
    fn arity(&self) -> usize {
        2
    }

    async fn call(&self, call: HandlerCall<'_>) -> FittingResult {
        match call {
            HandlerCall::Pipe(ctx) => (self.func)(ctx).await,
            HandlerCall::Native { .. } => Err(FittingError::configuration(
                "pipe-style handler cannot be called with the middleware interface",
            )),
        }
    }
}

/// A native-style handler backed by an async closure.
pub struct NativeFn<F>
where
    F: for<'a> Fn(&'a mut NativeRequest, &'a mut NativeResponse) -> BoxFuture<'a, FittingResult> + Send + Sync,
{
    func: F,
}

impl<F> NativeFn<F>
where
    F: for<'a> Fn(&'a mut NativeRequest, &'a mut NativeResponse) -> BoxFuture<'a, FittingResult> + Send + Sync,
{
    /// Wraps a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Handler for NativeFn<F>
where
    F: for<'a> Fn(&'a mut NativeRequest, &'a mut NativeResponse) -> BoxFuture<'a, FittingResult> + Send + Sync,
{
    fn arity(&self) -> usize {
        3
    }

    async fn call(&self, call: HandlerCall<'_>) -> FittingResult {
        match call {
            HandlerCall::Pipe(ctx) => (self.func)(&mut ctx.request, &mut ctx.response).await,
            HandlerCall::Native { request, response } => (self.func)(request, response).await,
        }
    }
}

/// A named set of handlers keyed by operation id.
#[derive(Clone, Default)]
pub struct Controller {
    name: String,
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Controller {
    /// Creates an empty controller.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: HashMap::new(),
        }
    }

    /// Adds a handler.
    #[must_use]
    pub fn with_handler(mut self, operation: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(operation.into(), handler);
        self
    }

    /// Adds a pipe-style handler.
    #[must_use]
    pub fn with_pipe_handler<F>(self, operation: impl Into<String>, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, FittingResult> + Send + Sync + 'static,
    {
        self.with_handler(operation, Arc::new(PipeFn::new(func)))
    }

    /// Adds a native-style handler.
    #[must_use]
    pub fn with_native_handler<F>(self, operation: impl Into<String>, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut NativeRequest, &'a mut NativeResponse) -> BoxFuture<'a, FittingResult>
            + Send
            + Sync
            + 'static,
    {
        self.with_handler(operation, Arc::new(NativeFn::new(func)))
    }

    /// The controller name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a handler by operation id.
    #[must_use]
    pub fn handler(&self, operation: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(operation)
    }

    /// Whether the controller has no handlers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut operations: Vec<&String> = self.handlers.keys().collect();
        operations.sort();
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("operations", &operations)
            .finish()
    }
}

/// Controllers grouped by directory name.
#[derive(Debug, Clone, Default)]
pub struct ControllerRegistry {
    directories: HashMap<String, HashMap<String, Arc<Controller>>>,
}

impl ControllerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a controller to a directory, creating the directory if needed.
    #[must_use]
    pub fn with_controller(mut self, directory: impl Into<String>, controller: Controller) -> Self {
        self.register(directory, controller);
        self
    }

    /// Adds a controller to a directory, creating the directory if needed.
    pub fn register(&mut self, directory: impl Into<String>, controller: Controller) {
        self.directories
            .entry(directory.into())
            .or_default()
            .insert(controller.name.clone(), Arc::new(controller));
    }

    /// Looks up one controller in one directory.
    pub fn lookup(&self, directory: &str, controller: &str) -> Result<Arc<Controller>, ControllerLookupError> {
        let dir = self
            .directories
            .get(directory)
            .ok_or_else(|| ControllerLookupError::DirectoryNotFound {
                directory: directory.to_string(),
            })?;
        dir.get(controller)
            .cloned()
            .ok_or_else(|| ControllerLookupError::ControllerNotFound {
                directory: directory.to_string(),
                controller: controller.to_string(),
            })
    }

    /// Tries each directory in order; the first hit wins, otherwise the
    /// last failure is returned.
    pub fn scan(&self, directories: &[String], controller: &str) -> Result<Arc<Controller>, ControllerLookupError> {
        let mut last_error = ControllerLookupError::NoDirectories {
            controller: controller.to_string(),
        };
        for directory in directories {
            match self.lookup(directory, controller) {
                Ok(found) => return Ok(found),
                Err(err) => last_error = err,
            }
        }
        Err(last_error)
    }
}
