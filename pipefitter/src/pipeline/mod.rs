//! Pipe compilation, execution and selection.
//!
//! This module provides:
//! - Pipe and step specifications parsed from configuration
//! - A builder that compiles them with error-handler scopes
//! - The execution state machine
//! - Pipe selection from contract directives

mod builder;
mod pipe;
mod selector;
mod spec;

pub use builder::PipeBuilder;
pub use pipe::{CompiledPipe, Flow, PipeFitting, Stage, StageBinding};
pub use selector::PipeRegistry;
pub use spec::{HandlerSpec, PipesConfig, StepSpec, ON_ERROR};
