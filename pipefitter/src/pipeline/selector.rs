//! Chooses the pipe that runs for a matched request.

use super::pipe::CompiledPipe;
use crate::contract::{RouteMatch, SWAGGER_ROUTER_CONTROLLER, SWAGGER_SELECTED_PIPE};
use crate::errors::RoutingError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Compiled pipes plus the names used when no directive picks one.
#[derive(Debug, Clone, Default)]
pub struct PipeRegistry {
    pipes: BTreeMap<String, Arc<CompiledPipe>>,
    controller_pipe: Option<String>,
    default_pipe: Option<String>,
}

impl PipeRegistry {
    /// Wraps compiled pipes.
    #[must_use]
    pub fn new(pipes: BTreeMap<String, Arc<CompiledPipe>>) -> Self {
        Self {
            pipes,
            controller_pipe: None,
            default_pipe: None,
        }
    }

    /// Sets the pipe used for controller-bound operations.
    #[must_use]
    pub fn with_controller_pipe(mut self, name: Option<String>) -> Self {
        self.controller_pipe = name.filter(|n| !n.is_empty());
        self
    }

    /// Sets the fallback pipe.
    #[must_use]
    pub fn with_default_pipe(mut self, name: Option<String>) -> Self {
        self.default_pipe = name.filter(|n| !n.is_empty());
        self
    }

    /// Looks up a compiled pipe.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<CompiledPipe>> {
        self.pipes.get(name)
    }

    /// Names of all compiled pipes.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.pipes.keys().map(String::as_str).collect()
    }

    /// Resolves the pipe name for a route.
    ///
    /// Precedence: operation `x-swagger-pipe`, path `x-swagger-pipe`, the
    /// controller pipe when a controller is bound, then the default pipe.
    #[must_use]
    pub fn select_name<'a>(&'a self, route: &'a RouteMatch) -> Option<&'a str> {
        if let Some(explicit) = route.directive(SWAGGER_SELECTED_PIPE) {
            return Some(explicit);
        }
        if route.directive(SWAGGER_ROUTER_CONTROLLER).is_some() {
            if let Some(controller_pipe) = self.controller_pipe.as_deref() {
                return Some(controller_pipe);
            }
        }
        self.default_pipe.as_deref()
    }

    /// Resolves the pipe for a route.
    ///
    /// `Ok(None)` means nothing is configured for it; a name that resolves
    /// to no compiled pipe is a configuration error.
    pub fn select(&self, route: &RouteMatch) -> Result<Option<Arc<CompiledPipe>>, RoutingError> {
        let Some(name) = self.select_name(route) else {
            debug!("no pipe selected");
            return Ok(None);
        };

        match self.pipes.get(name) {
            Some(pipe) => {
                info!(pipe = name, "selected pipe");
                Ok(Some(pipe.clone()))
            }
            None => Err(RoutingError::UnknownPipe {
                name: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ApiContract;
    use crate::events::NoOpEventSink;
    use http::Method;
    use pretty_assertions::assert_eq;

    const CONTRACT: &str = r#"
swagger: "2.0"
paths:
  /both:
    x-swagger-pipe: path_pipe
    get:
      x-swagger-pipe: op_pipe
      responses: {}
    put:
      responses: {}
  /controller:
    x-swagger-router-controller: hello_world
    get:
      responses: {}
  /plain:
    get:
      responses: {}
  /typo:
    get:
      x-swagger-pipe: missing_pipe
      responses: {}
"#;

    fn registry(default_pipe: Option<&str>) -> PipeRegistry {
        let pipes = ["op_pipe", "path_pipe", "controllers", "fallback"]
            .into_iter()
            .map(|name| {
                (
                    name.to_string(),
                    Arc::new(CompiledPipe::new(name, Vec::new(), Arc::new(NoOpEventSink))),
                )
            })
            .collect();
        PipeRegistry::new(pipes)
            .with_controller_pipe(Some("controllers".into()))
            .with_default_pipe(default_pipe.map(String::from))
    }

    fn route(method: Method, path: &str) -> RouteMatch {
        ApiContract::from_yaml_str(CONTRACT)
            .unwrap()
            .match_request(&method, path)
    }

    #[test]
    fn test_selection_precedence() {
        let pipes = registry(Some("fallback"));

        assert_eq!(pipes.select_name(&route(Method::GET, "/both")), Some("op_pipe"));
        assert_eq!(pipes.select_name(&route(Method::PUT, "/both")), Some("path_pipe"));
        assert_eq!(
            pipes.select_name(&route(Method::GET, "/controller")),
            Some("controllers")
        );
        assert_eq!(pipes.select_name(&route(Method::GET, "/plain")), Some("fallback"));
    }

    #[test]
    fn test_no_default_yields_none() {
        let pipes = registry(None);
        assert!(pipes.select(&route(Method::GET, "/plain")).unwrap().is_none());
    }

    #[test]
    fn test_unknown_pipe_is_an_error() {
        let err = registry(None)
            .select(&route(Method::GET, "/typo"))
            .unwrap_err();
        assert_eq!(
            err,
            RoutingError::UnknownPipe {
                name: "missing_pipe".into()
            }
        );
    }

    #[test]
    fn test_selects_compiled_pipe() {
        let selected = registry(None)
            .select(&route(Method::GET, "/both"))
            .unwrap()
            .unwrap();
        assert_eq!(selected.name(), "op_pipe");
    }
}
