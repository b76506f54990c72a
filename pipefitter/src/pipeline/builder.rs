//! Compiles pipe specifications into executable pipes.

use super::pipe::{CompiledPipe, PipeFitting, Stage, StageBinding};
use super::spec::{HandlerSpec, PipesConfig, StepSpec};
use crate::errors::{CycleDetectedError, PipeConfigError};
use crate::fittings::{FittingDef, FittingRegistry, PipelineRuntime};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::info;

/// Builds every pipe of a [`PipesConfig`] once, at start-up.
///
/// A string reference resolves to a named fitting definition first, then to
/// another pipe, then to a registered fitting factory.
#[derive(Debug)]
pub struct PipeBuilder<'a> {
    config: &'a PipesConfig,
    registry: &'a FittingRegistry,
    runtime: &'a PipelineRuntime,
    compiled: BTreeMap<String, Arc<CompiledPipe>>,
}

impl<'a> PipeBuilder<'a> {
    /// Creates a builder over parsed pipe definitions.
    #[must_use]
    pub fn new(config: &'a PipesConfig, registry: &'a FittingRegistry, runtime: &'a PipelineRuntime) -> Self {
        Self {
            config,
            registry,
            runtime,
            compiled: BTreeMap::new(),
        }
    }

    /// Compiles all pipes.
    ///
    /// # Errors
    ///
    /// Returns an error for reference cycles, malformed steps, unknown
    /// fittings, and fitting configuration rejected by its factory.
    pub fn build(mut self) -> Result<BTreeMap<String, Arc<CompiledPipe>>, PipeConfigError> {
        self.detect_cycles()?;

        let config = self.config;
        for name in config.pipes.keys() {
            self.compile(name)?;
        }

        info!(pipes = self.compiled.len(), "compiled pipes");
        Ok(self.compiled)
    }

    fn compile(&mut self, name: &str) -> Result<Arc<CompiledPipe>, PipeConfigError> {
        if let Some(pipe) = self.compiled.get(name) {
            return Ok(pipe.clone());
        }

        let config = self.config;
        let steps = config
            .pipes
            .get(name)
            .ok_or_else(|| PipeConfigError::unknown_fitting(name, name))?;

        let mut scope: Option<StageBinding> = None;
        let mut stages = Vec::with_capacity(steps.len());
        for step in steps {
            match step {
                StepSpec::OnError(HandlerSpec::Reference(reference)) => {
                    scope = Some(self.bind_reference(name, reference)?);
                }
                StepSpec::OnError(HandlerSpec::Inline(def)) => {
                    scope = Some(self.bind_definition(name, def)?);
                }
                StepSpec::Reference(reference) => match self.nested_pipe(reference)? {
                    Some(nested) => stages.extend(nested.stages().iter().map(|stage| Stage {
                        binding: stage.binding.clone(),
                        on_error: stage.on_error.clone().or_else(|| scope.clone()),
                    })),
                    None => stages.push(Stage {
                        binding: self.bind_reference(name, reference)?,
                        on_error: scope.clone(),
                    }),
                },
                StepSpec::Inline(def) => stages.push(Stage {
                    binding: self.bind_definition(name, def)?,
                    on_error: scope.clone(),
                }),
            }
        }

        let pipe = Arc::new(CompiledPipe::new(name, stages, self.runtime.events.clone()));
        info!(pipe = name, fittings = ?pipe.labels(), "compiled pipe");
        self.compiled.insert(name.to_string(), pipe.clone());
        Ok(pipe)
    }

    /// A referenced pipe, compiled; its stages are inlined at the reference
    /// and keep their own scopes, inheriting the outer one where they have none.
    fn nested_pipe(&mut self, reference: &str) -> Result<Option<Arc<CompiledPipe>>, PipeConfigError> {
        let config = self.config;
        if config.definitions.contains_key(reference) || !config.has_pipe(reference) {
            return Ok(None);
        }
        self.compile(reference).map(Some)
    }

    /// Resolves a reference to a single fitting. A pipe named here, which
    /// only happens for `onError` targets, runs as one [`PipeFitting`].
    fn bind_reference(&mut self, pipe: &str, reference: &str) -> Result<StageBinding, PipeConfigError> {
        let config = self.config;
        if let Some(def) = config.definitions.get(reference) {
            return self.bind_definition(pipe, def);
        }
        if config.has_pipe(reference) {
            let nested = self.compile(reference)?;
            return Ok(StageBinding::new(reference, Arc::new(PipeFitting::new(nested))));
        }
        self.bind_definition(pipe, &FittingDef::named(reference))
    }

    fn bind_definition(&self, pipe: &str, def: &FittingDef) -> Result<StageBinding, PipeConfigError> {
        let fitting = self.registry.create(pipe, def, self.runtime)?;
        Ok(StageBinding::new(def.name.clone(), fitting)
            .with_input(def.input.clone())
            .with_output(def.output.clone()))
    }

    /// Pipes a pipe refers to by name; definitions shadow pipes.
    fn pipe_references(&self, pipe: &str) -> Vec<&'a str> {
        let config = self.config;
        config
            .pipes
            .get(pipe)
            .into_iter()
            .flatten()
            .filter_map(|step| match step {
                StepSpec::Reference(name) | StepSpec::OnError(HandlerSpec::Reference(name)) => {
                    Some(name.as_str())
                }
                _ => None,
            })
            .filter(|name| !config.definitions.contains_key(*name) && config.has_pipe(name))
            .collect()
    }

    fn detect_cycles(&self) -> Result<(), CycleDetectedError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        let config = self.config;
        for name in config.pipes.keys() {
            if !visited.contains(name.as_str()) {
                if let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut rec_stack, &mut path) {
                    return Err(CycleDetectedError::new(cycle));
                }
            }
        }

        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        rec_stack.insert(node);
        path.push(node);

        for next in self.pipe_references(node) {
            if !visited.contains(next) {
                if let Some(cycle) = self.dfs_cycle(next, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(next) {
                let start = path.iter().position(|n| *n == next).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(ToString::to_string).collect();
                cycle.push(next.to_string());
                return Some(cycle);
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }
}
