//! Typed configuration for the runner and its built-in fittings.
//!
//! Configuration is assembled once by [`ConfigLoader`] and shared by `Arc`
//! afterwards. Keys are camelCase to stay compatible with existing
//! `swagger:` config sections.

mod loader;

pub use loader::ConfigLoader;

use crate::contract::ControllerInterface;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Name of the pipe installed by the legacy defaults.
pub const DEFAULT_CONTROLLER_PIPE: &str = "swagger_controllers";

/// Process-wide runner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunnerConfig {
    /// Serve mock responses instead of calling controllers.
    pub mock_mode: bool,
    /// Pipe used when no directive selects one.
    pub default_pipe: Option<String>,
    /// Pipe used for operations bound to a controller.
    pub swagger_controller_pipe: Option<String>,
    /// Install `json_error_handler` in the legacy default pipe.
    pub map_errors_to_json: bool,
    /// Pipe and fitting definitions, keyed by name.
    pub bagpipes: Option<Map<String, Value>>,
    /// Treat duplicate `operationId`s as a startup error.
    pub enforce_unique_operation_id: bool,
    /// Log contract errors at startup instead of failing.
    pub start_with_errors: bool,
    /// Log contract warnings at startup instead of failing.
    pub start_with_warnings: bool,
    /// Check finished responses against the contract and report mismatches
    /// as `response.validation_error` events.
    pub validate_response: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mock_mode: false,
            default_pipe: None,
            swagger_controller_pipe: None,
            map_errors_to_json: false,
            bagpipes: None,
            enforce_unique_operation_id: false,
            start_with_errors: false,
            start_with_warnings: true,
            validate_response: false,
        }
    }
}

impl RunnerConfig {
    /// Fills in the legacy controller pipe when no `bagpipes` section exists.
    pub fn apply_legacy_defaults(&mut self) {
        if self.bagpipes.is_some() {
            return;
        }

        let mut controllers = vec![
            json!("swagger_params_parser"),
            json!("swagger_security"),
            json!("_swagger_validate"),
            json!("_router"),
        ];
        if self.map_errors_to_json {
            controllers.insert(0, json!({"onError": "json_error_handler"}));
        }

        let mut bagpipes = Map::new();
        bagpipes.insert(
            "_router".into(),
            json!({
                "name": "swagger_router",
                "mockMode": false,
                "mockControllersDirs": ["api/mocks"],
                "controllersDirs": ["api/controllers"],
            }),
        );
        bagpipes.insert("_swagger_validate".into(), json!({"name": "swagger_validator"}));
        bagpipes.insert(DEFAULT_CONTROLLER_PIPE.into(), Value::Array(controllers));

        self.bagpipes = Some(bagpipes);
        self.swagger_controller_pipe = Some(DEFAULT_CONTROLLER_PIPE.to_string());
    }
}

/// Settings for the `swagger_router` fitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterConfig {
    /// Serve mocks; combined with the runner-wide flag.
    pub mock_mode: bool,
    /// Controller directories searched in normal mode.
    pub controllers_dirs: Vec<String>,
    /// Controller directories searched in mock mode.
    pub mock_controllers_dirs: Vec<String>,
    /// Calling convention when no directive chooses one.
    pub controllers_interface: ControllerInterface,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mock_mode: false,
            controllers_dirs: vec!["api/controllers".to_string()],
            mock_controllers_dirs: vec!["api/mocks".to_string()],
            controllers_interface: ControllerInterface::AutoDetect,
        }
    }
}

/// Settings for the `json_error_handler` fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonErrorConfig {
    /// Render 500s instead of re-raising them to the host.
    #[serde(rename = "handle500Errors")]
    pub handle_500_errors: bool,
    /// Include the error cause in the body.
    #[serde(rename = "includeErrStack")]
    pub include_err_stack: bool,
    /// Include the error message in the body.
    #[serde(rename = "includeMessage")]
    pub include_message: bool,
}

impl Default for JsonErrorConfig {
    fn default() -> Self {
        Self {
            handle_500_errors: false,
            include_err_stack: false,
            include_message: true,
        }
    }
}

/// Settings for the `swagger_raw` fitting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    /// Regex of keys to keep; without it every `x-` extension key is dropped.
    pub filter: Option<String>,
}
