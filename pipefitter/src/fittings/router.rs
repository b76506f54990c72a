//! Terminal fitting dispatching to controller handlers.

use super::{Fitting, FittingDef, FittingResult, PipelineRuntime};
use crate::config::RouterConfig;
use crate::context::Context;
use crate::contract::{
    ApiContract, ControllerInterface, Operation, CONTROLLER_INTERFACE, SWAGGER_ROUTER_CONTROLLER,
};
use crate::controllers::{mock, ControllerCache, ControllerRegistry, Handler, HandlerCall};
use crate::errors::{FittingError, PipeConfigError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Registered factory name.
pub const NAME: &str = "swagger_router";

/// Factory for [`Router`].
///
/// Mock mode is on if either the fitting or the runner asks for it, and
/// selects the mock controller directories.
pub fn create(def: &FittingDef, runtime: &PipelineRuntime) -> Result<Arc<dyn Fitting>, PipeConfigError> {
    let config: RouterConfig = def.config_as()?;
    let mock_mode = config.mock_mode || runtime.config.mock_mode;
    let directories = if mock_mode {
        config.mock_controllers_dirs.clone()
    } else {
        config.controllers_dirs.clone()
    };
    debug!(name = %def.name, mock_mode, ?directories, "router config");

    Ok(Arc::new(Router {
        name: def.name.clone(),
        mock_mode,
        directories,
        default_interface: config.controllers_interface,
        contract: runtime.contract.clone(),
        controllers: runtime.controllers.clone(),
        cache: ControllerCache::new(),
    }))
}

/// Resolves the controller and handler for the matched operation and calls it.
#[derive(Debug)]
pub struct Router {
    name: String,
    mock_mode: bool,
    directories: Vec<String>,
    default_interface: ControllerInterface,
    contract: Arc<ApiContract>,
    controllers: Arc<ControllerRegistry>,
    cache: ControllerCache,
}

impl Router {
    /// Number of controller directory scans so far.
    #[must_use]
    pub fn scan_count(&self) -> usize {
        self.cache.scan_count()
    }

    fn controller_name(ctx: &Context, operation: &Operation) -> Option<String> {
        operation
            .extension(SWAGGER_ROUTER_CONTROLLER)
            .or_else(|| {
                ctx.request
                    .swagger
                    .as_ref()
                    .and_then(|s| s.path.as_ref())
                    .and_then(|path| path.extension(SWAGGER_ROUTER_CONTROLLER))
            })
            .and_then(Value::as_str)
            .map(String::from)
    }

    /// Operation, then path, then document directive, then the fitting default.
    fn interface(&self, ctx: &Context, operation: &Operation) -> Result<ControllerInterface, FittingError> {
        let path = ctx.request.swagger.as_ref().and_then(|s| s.path.as_deref());
        let directive = self
            .contract
            .cascaded_directive(Some(operation), path, CONTROLLER_INTERFACE);

        match directive {
            Some(value) => value.parse().map_err(FittingError::configuration),
            None => Ok(self.default_interface),
        }
    }

    async fn invoke(
        &self,
        ctx: &mut Context,
        operation: &Operation,
        handler: &Arc<dyn Handler>,
    ) -> FittingResult {
        let interface = match self.interface(ctx, operation)? {
            ControllerInterface::AutoDetect => operation.detected_interface(|| {
                if handler.arity() == 3 {
                    ControllerInterface::Middleware
                } else {
                    ControllerInterface::Pipe
                }
            }),
            chosen => chosen,
        };
        debug!(operation = %operation.handler_name(), %interface, "invoking handler");

        match interface {
            ControllerInterface::Middleware => {
                handler
                    .call(HandlerCall::Native {
                        request: &mut ctx.request,
                        response: &mut ctx.response,
                    })
                    .await
            }
            _ => handler.call(HandlerCall::Pipe(ctx)).await,
        }
    }
}

#[async_trait]
impl Fitting for Router {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &mut Context) -> FittingResult {
        let Some(operation) = ctx.request.operation().cloned() else {
            return Err(FittingError::configuration(format!(
                "No operation matched {} {}",
                ctx.request.method,
                ctx.request.path()
            )));
        };

        let Some(controller_name) = Self::controller_name(ctx, &operation) else {
            if self.mock_mode {
                return mock::mock_response(ctx, &operation);
            }
            return Err(FittingError::configuration(format!(
                "No controller bound to {} {}",
                operation.method, operation.path
            )));
        };

        let controller = self
            .cache
            .resolve(&self.controllers, &self.directories, &controller_name, self.mock_mode)
            .map_err(|e| FittingError::configuration(e.to_string()))?;

        let handler_name = operation.handler_name();
        match controller.handler(&handler_name) {
            Some(handler) => self.invoke(ctx, &operation, handler).await,
            None if self.mock_mode => mock::mock_response(ctx, &operation),
            None => Err(FittingError::configuration(format!(
                "Handler '{handler_name}' not found in controller '{controller_name}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunnerConfig;
    use crate::controllers::Controller;
    use crate::errors::FailureKind;
    use crate::fittings::FittingResult;
    use crate::testing::TestRequest;
    use futures::future::BoxFuture;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CONTRACT: &str = r#"
swagger: "2.0"
paths:
  /hello:
    x-swagger-router-controller: hello_world
    get:
      operationId: hello
      responses:
        "201":
          description: created
          examples:
            application/json: { message: mocked }
  /native:
    x-swagger-router-controller: hello_world
    get:
      operationId: native
      responses: {}
  /forced:
    x-swagger-router-controller: hello_world
    x-controller-interface: pipe
    get:
      operationId: native
      responses: {}
  /unbound:
    get:
      responses: {}
  /missing:
    x-swagger-router-controller: hello_world
    delete:
      responses: {}
"#;

    #[derive(Debug, Default)]
    struct CountingNative {
        arity_checks: AtomicUsize,
    }

    #[async_trait]
    impl Handler for CountingNative {
        fn arity(&self) -> usize {
            self.arity_checks.fetch_add(1, Ordering::SeqCst);
            3
        }

        async fn call(&self, call: HandlerCall<'_>) -> FittingResult {
            match call {
                HandlerCall::Native { response, .. } => {
                    response.end("native");
                    Ok(None)
                }
                HandlerCall::Pipe(_) => Ok(Some(json!("called as pipe"))),
            }
        }
    }

    fn hello(ctx: &mut Context) -> BoxFuture<'_, FittingResult> {
        Box::pin(async move {
            let name = ctx
                .request
                .swagger
                .as_ref()
                .and_then(|s| s.params.get("name"))
                .and_then(Value::as_str)
                .unwrap_or("stranger")
                .to_string();
            Ok(Some(json!(format!("Hello, {name}!"))))
        })
    }

    fn router(mock_mode: bool, native: Arc<CountingNative>) -> Router {
        let registry = ControllerRegistry::new().with_controller(
            "api/controllers",
            Controller::new("hello_world")
                .with_pipe_handler("hello", hello)
                .with_handler("native", native),
        );
        Router {
            name: NAME.to_string(),
            mock_mode,
            directories: vec!["api/controllers".to_string()],
            default_interface: ControllerInterface::AutoDetect,
            contract: Arc::new(ApiContract::from_yaml_str(CONTRACT).unwrap()),
            controllers: Arc::new(registry),
            cache: ControllerCache::new(),
        }
    }

    #[tokio::test]
    async fn test_dispatches_pipe_handler() {
        let router = router(false, Arc::default());
        let mut ctx = TestRequest::get("/hello").context_for(CONTRACT);

        let out = router.call(&mut ctx).await.unwrap();
        assert_eq!(out, Some(json!("Hello, stranger!")));
    }

    #[tokio::test]
    async fn test_auto_detect_is_memoized() {
        let native = Arc::new(CountingNative::default());
        let router = router(false, native.clone());
        let contract = router.contract.clone();

        for _ in 0..2 {
            let mut ctx = TestRequest::get("/native").context_with(&contract);
            let out = router.call(&mut ctx).await.unwrap();
            assert_eq!(out, None);
            assert_eq!(ctx.response.body(), b"native");
        }

        assert_eq!(native.arity_checks.load(Ordering::SeqCst), 1);
        assert_eq!(router.scan_count(), 1);
    }

    #[tokio::test]
    async fn test_directive_overrides_detection() {
        let router = router(false, Arc::default());
        let mut ctx = TestRequest::get("/forced").context_for(CONTRACT);

        let out = router.call(&mut ctx).await.unwrap();
        assert_eq!(out, Some(json!("called as pipe")));
    }

    #[tokio::test]
    async fn test_missing_handler_is_fatal_outside_mock_mode() {
        let router = router(false, Arc::default());
        let mut ctx = TestRequest::delete("/missing").context_for(CONTRACT);

        let err = router.call(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Configuration);
        assert!(err.message.contains("'delete'"));
    }

    #[tokio::test]
    async fn test_unbound_operation_is_fatal_outside_mock_mode() {
        let router = router(false, Arc::default());
        let mut ctx = TestRequest::get("/unbound").context_for(CONTRACT);

        assert!(router.call(&mut ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_mode_synthesizes_missing_handlers() {
        let router = router(true, Arc::default());

        let mut ctx = TestRequest::delete("/missing").context_for(CONTRACT);
        assert_eq!(router.call(&mut ctx).await.unwrap(), None);
        assert_eq!(ctx.status_code, Some(200));

        let mut ctx = TestRequest::get("/unbound").context_for(CONTRACT);
        assert!(router.call(&mut ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_factory_respects_runner_mock_mode() {
        let mut runtime = crate::testing::test_runtime_with(ApiContract::from_yaml_str(CONTRACT).unwrap());
        runtime.config = Arc::new(RunnerConfig {
            mock_mode: true,
            ..RunnerConfig::default()
        });
        let fitting = create(&FittingDef::named(NAME), &runtime).unwrap();

        let mut ctx = TestRequest::get("/hello")
            .header(mock::MOCK_STATUS_HEADER, "201")
            .context_with(&runtime.contract);
        let out = fitting.call(&mut ctx).await.unwrap();

        assert_eq!(ctx.status_code, Some(201));
        assert_eq!(out, Some(json!({"message": "mocked"})));
    }
}
