//! Process-wide assembly of contract, configuration and compiled pipes.

use crate::adapter::ConnectAdapter;
use crate::config::RunnerConfig;
use crate::context::{Context, FinishFn, NativeRequest, NativeResponse};
use crate::contract::{ApiContract, RouteMatch, DUPLICATE_OPERATIONID};
use crate::controllers::ControllerRegistry;
use crate::errors::{ContractError, PipefitterError, RoutingError};
use crate::events::{EventSink, NoOpEventSink};
use crate::fittings::{
    Fitting, FittingFactory, FittingRegistry, FnFitting, PipelineRuntime, SecurityHandlers,
};
use crate::pipeline::{CompiledPipe, PipeBuilder, PipeRegistry, PipesConfig};
use serde_json::Map;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Name of the fallback error handler installed on every context.
pub const DEFAULT_ERROR_HANDLER: &str = "defaultErrorHandler";

/// Compiled pipes plus everything needed to run them.
#[derive(Debug)]
pub struct Runner {
    config: Arc<RunnerConfig>,
    contract: Arc<ApiContract>,
    pipes: PipeRegistry,
    events: Arc<dyn EventSink>,
    default_error_handler: Arc<dyn Fitting>,
}

impl Runner {
    /// Starts building a runner for a contract.
    #[must_use]
    pub fn builder(contract: ApiContract) -> RunnerBuilder {
        RunnerBuilder::new(contract)
    }

    /// The effective configuration.
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The contract.
    #[must_use]
    pub fn contract(&self) -> &Arc<ApiContract> {
        &self.contract
    }

    /// The compiled pipes.
    #[must_use]
    pub fn pipes(&self) -> &PipeRegistry {
        &self.pipes
    }

    /// The lifecycle event sink.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Matches a request against the contract.
    #[must_use]
    pub fn route(&self, request: &NativeRequest) -> RouteMatch {
        self.contract.match_request(&request.method, request.path())
    }

    /// Creates a context with the default error handler installed.
    #[must_use]
    pub fn build_context(&self, request: NativeRequest, response: NativeResponse) -> Context {
        Context::new(request, response).with_error_handler(self.default_error_handler.clone())
    }

    /// Resolves the pipe for a route.
    pub fn select_pipe(&self, route: &RouteMatch) -> Result<Option<Arc<CompiledPipe>>, RoutingError> {
        self.pipes.select(route)
    }

    /// Runs `pipe` with `on_finish` as the completion callback and hands the
    /// context back once it has finished.
    pub async fn run_pipe(&self, pipe: &CompiledPipe, mut ctx: Context, on_finish: FinishFn) -> Context {
        ctx.set_finish(on_finish);
        pipe.play(&mut ctx).await;
        ctx
    }

    /// Wraps the runner in the reference `http` adapter.
    #[must_use]
    pub fn connect_adapter(self: &Arc<Self>) -> ConnectAdapter {
        ConnectAdapter::new(self.clone())
    }
}

fn default_error_handler() -> Arc<dyn Fitting> {
    Arc::new(FnFitting::new(DEFAULT_ERROR_HANDLER, |ctx: &mut Context| {
        if let Some(err) = &ctx.error {
            debug!(error = %err, "default error handler");
        }
        Ok(ctx.output.take())
    }))
}

/// Lints the contract and applies the `startWith*` policy.
fn check_contract(contract: &ApiContract, config: &RunnerConfig) -> Result<(), ContractError> {
    let mut report = contract.lint();
    if !config.enforce_unique_operation_id {
        report.ignore(DUPLICATE_OPERATIONID);
    }

    if !report.errors.is_empty() {
        if !config.start_with_errors {
            return Err(ContractError::ValidationErrors(report.errors));
        }
        for issue in &report.errors {
            error!(code = %issue.code, path = %issue.path, "{}", issue.message);
        }
    }

    if !report.warnings.is_empty() {
        if !config.start_with_warnings {
            return Err(ContractError::ValidationWarnings(report.warnings));
        }
        for issue in &report.warnings {
            warn!(code = %issue.code, path = %issue.path, "{}", issue.message);
        }
    }
    Ok(())
}

/// Builder for [`Runner`].
#[derive(Debug)]
pub struct RunnerBuilder {
    contract: ApiContract,
    config: RunnerConfig,
    fittings: FittingRegistry,
    controllers: ControllerRegistry,
    security_handlers: SecurityHandlers,
    events: Arc<dyn EventSink>,
}

impl RunnerBuilder {
    /// Creates a builder with default configuration and the built-in fittings.
    #[must_use]
    pub fn new(contract: ApiContract) -> Self {
        Self {
            contract,
            config: RunnerConfig::default(),
            fittings: FittingRegistry::with_builtins(),
            controllers: ControllerRegistry::new(),
            security_handlers: SecurityHandlers::new(),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the configuration, typically from [`crate::config::ConfigLoader`].
    #[must_use]
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the controller registry.
    #[must_use]
    pub fn with_controllers(mut self, controllers: ControllerRegistry) -> Self {
        self.controllers = controllers;
        self
    }

    /// Sets the security handlers.
    #[must_use]
    pub fn with_security_handlers(mut self, handlers: SecurityHandlers) -> Self {
        self.security_handlers = handlers;
        self
    }

    /// Registers a fitting factory, replacing a built-in of the same name.
    #[must_use]
    pub fn with_fitting_factory(mut self, name: impl Into<String>, factory: impl FittingFactory + 'static) -> Self {
        self.fittings.register(name, factory);
        self
    }

    /// Registers a ready-made fitting under its own name.
    #[must_use]
    pub fn with_fitting(mut self, fitting: Arc<dyn Fitting>) -> Self {
        self.fittings.register_fitting(fitting);
        self
    }

    /// Sets the lifecycle event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Checks the contract and compiles every configured pipe.
    ///
    /// # Errors
    ///
    /// Returns an error if the contract fails its startup checks or a pipe
    /// fails to compile.
    pub fn build(self) -> Result<Runner, PipefitterError> {
        let mut config = self.config;
        config.apply_legacy_defaults();
        check_contract(&self.contract, &config)?;
        let config = Arc::new(config);
        let contract = Arc::new(self.contract);

        let runtime = PipelineRuntime {
            config: config.clone(),
            contract: contract.clone(),
            controllers: Arc::new(self.controllers),
            security_handlers: Arc::new(self.security_handlers),
            events: self.events.clone(),
        };

        let pipes_config = match config.bagpipes.as_ref() {
            Some(map) => PipesConfig::from_map(map)?,
            None => PipesConfig::from_map(&Map::new())?,
        };
        let compiled = PipeBuilder::new(&pipes_config, &self.fittings, &runtime).build()?;

        for name in [&config.swagger_controller_pipe, &config.default_pipe]
            .into_iter()
            .flatten()
        {
            if !compiled.contains_key(name) {
                warn!(pipe = %name, "configured pipe is not defined");
            }
        }

        let pipes = PipeRegistry::new(compiled)
            .with_controller_pipe(config.swagger_controller_pipe.clone())
            .with_default_pipe(config.default_pipe.clone());
        info!(pipes = ?pipes.names(), mock_mode = config.mock_mode, "runner ready");

        Ok(Runner {
            config,
            contract,
            pipes,
            events: self.events,
            default_error_handler: default_error_handler(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CONTROLLER_PIPE;
    use crate::contract::tests::HELLO_YAML;
    use crate::testing::TestRequest;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn contract() -> ApiContract {
        ApiContract::from_yaml_str(HELLO_YAML).unwrap()
    }

    #[test]
    fn test_legacy_defaults_compile() {
        let runner = Runner::builder(contract()).build().unwrap();

        assert_eq!(
            runner.pipes().names(),
            vec![DEFAULT_CONTROLLER_PIPE]
        );
        let pipe = runner.pipes().get(DEFAULT_CONTROLLER_PIPE).unwrap();
        assert_eq!(
            pipe.labels(),
            vec!["swagger_params_parser", "swagger_security", "swagger_validator", "swagger_router"]
        );
    }

    #[test]
    fn test_bad_pipe_config_fails_build() {
        let config = RunnerConfig {
            bagpipes: Some(json!({"main": ["missing_fitting"]}).as_object().unwrap().clone()),
            ..RunnerConfig::default()
        };
        let err = Runner::builder(contract()).with_config(config).build().unwrap_err();
        assert!(matches!(err, PipefitterError::PipeConfig(_)));
    }

    const LINT_YAML: &str = r##"
swagger: "2.0"
paths:
  /a:
    get:
      operationId: same
      responses: {}
  /b:
    get:
      operationId: same
      responses: {}
definitions:
  Unused:
    type: object
"##;

    fn lint_contract() -> ApiContract {
        ApiContract::from_yaml_str(LINT_YAML).unwrap()
    }

    #[test]
    fn test_duplicate_operation_id_only_fails_when_enforced() {
        assert!(Runner::builder(lint_contract()).build().is_ok());

        let config = RunnerConfig {
            enforce_unique_operation_id: true,
            ..RunnerConfig::default()
        };
        let err = Runner::builder(lint_contract()).with_config(config).build().unwrap_err();
        assert!(matches!(
            err,
            PipefitterError::Contract(ContractError::ValidationErrors(ref issues))
                if issues[0].code == DUPLICATE_OPERATIONID
        ));
    }

    #[test]
    fn test_start_with_errors_logs_instead() {
        let config = RunnerConfig {
            enforce_unique_operation_id: true,
            start_with_errors: true,
            ..RunnerConfig::default()
        };
        assert!(Runner::builder(lint_contract()).with_config(config).build().is_ok());
    }

    #[test]
    fn test_warnings_fail_without_start_with_warnings() {
        let config = RunnerConfig {
            start_with_warnings: false,
            ..RunnerConfig::default()
        };
        let err = Runner::builder(lint_contract()).with_config(config).build().unwrap_err();
        assert!(matches!(
            err,
            PipefitterError::Contract(ContractError::ValidationWarnings(ref issues)) if issues.len() == 1
        ));
        assert!(err.to_string().contains("Definition is not used: Unused"));
    }

    #[tokio::test]
    async fn test_run_pipe_invokes_finish_once() {
        let config = RunnerConfig {
            default_pipe: Some("main".into()),
            bagpipes: Some(json!({"main": []}).as_object().unwrap().clone()),
            ..RunnerConfig::default()
        };
        let runner = Runner::builder(contract()).with_config(config).build().unwrap();
        let request = TestRequest::get("/hello").build();
        let native = NativeRequest::from_http(request);
        let route = runner.route(&native);
        let pipe = runner.select_pipe(&route).unwrap().unwrap();

        let finished = Arc::new(AtomicUsize::new(0));
        let seen = finished.clone();
        let ctx = runner.build_context(native, NativeResponse::new());
        let mut ctx = runner
            .run_pipe(&pipe, ctx, Box::new(move |_: &mut Context| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(!ctx.finish());
    }

    #[tokio::test]
    async fn test_default_error_handler_keeps_error() {
        let handler = default_error_handler();
        let mut ctx = TestRequest::get("/hello").context();
        ctx.error = Some(crate::errors::FittingError::unexpected("boom"));

        assert_eq!(handler.name(), DEFAULT_ERROR_HANDLER);
        handler.call(&mut ctx).await.unwrap();
        assert!(ctx.error.is_some());
    }
}
