//! # Pipefitter
//!
//! Contract-driven request pipelines for HTTP services.
//!
//! A Swagger 2.0 contract describes the API; configuration describes named
//! pipes of *fittings*. For each request the runner picks a pipe from the
//! contract's directives and plays it over a shared [`Context`](context::Context):
//!
//! - **Fittings**: composable steps (params parsing, security, validation,
//!   routing to controllers, JSON error rendering, raw contract output)
//! - **Pipes**: ordered steps with scoped `onError` handlers, compiled once
//!   at start-up with cycle detection
//! - **Controllers**: handlers resolved by operation id, with a mock mode
//! - **Adapter**: maps `http` requests and responses onto pipe runs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipefitter::prelude::*;
//!
//! let contract = ApiContract::from_yaml_str(&std::fs::read_to_string("api/swagger.yaml")?)?;
//! let config = ConfigLoader::new()
//!     .with_file("config/default.yaml")?
//!     .with_env_prefix("SWAGGER")
//!     .load()?;
//!
//! let runner = Runner::builder(contract)
//!     .with_config(config)
//!     .with_controllers(controllers)
//!     .build()?;
//! let adapter = Arc::new(runner).connect_adapter();
//!
//! match adapter.handle(request).await {
//!     AdapterOutcome::Respond(response) => send(response),
//!     AdapterOutcome::PassThrough(request) => next(request),
//!     AdapterOutcome::Failed { error, response } => report(error, response),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod adapter;
pub mod config;
pub mod context;
pub mod contract;
pub mod controllers;
pub mod errors;
pub mod events;
pub mod fittings;
pub mod observability;
pub mod pipeline;
pub mod runner;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::adapter::{AdapterOutcome, ConnectAdapter};
    pub use crate::config::{ConfigLoader, RunnerConfig};
    pub use crate::context::{Context, NativeRequest, NativeResponse};
    pub use crate::contract::{ApiContract, ControllerInterface};
    pub use crate::controllers::{Controller, ControllerRegistry, Handler, HandlerCall};
    pub use crate::errors::{
        FailureKind, FittingError, PipeConfigError, PipefitterError, RoutingError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::fittings::{
        Fitting, FittingDef, FittingFactory, FittingResult, FnFitting, PipelineRuntime,
    };
    pub use crate::observability::{init_tracing, LogConfig};
    pub use crate::pipeline::CompiledPipe;
    pub use crate::runner::{Runner, RunnerBuilder};
}
