//! Error types for the pipefitter runtime.
//!
//! Two families live here: [`FittingError`], the per-request failure a stage
//! reports through the pipe, and the start-up errors raised while loading
//! configuration, parsing the contract and compiling pipes.

use crate::contract::ContractIssue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for pipefitter start-up operations.
#[derive(Debug, Error)]
pub enum PipefitterError {
    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The contract document is unusable.
    #[error("{0}")]
    Contract(#[from] ContractError),

    /// A pipe or fitting definition failed to compile.
    #[error("{0}")]
    PipeConfig(#[from] PipeConfigError),

    /// A pipe reference cycle was found.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// Request routing failed in a way that indicates misconfiguration.
    #[error("{0}")]
    Routing(#[from] RoutingError),

    /// The tracing subscriber could not be installed.
    #[error("Failed to initialize tracing: {0}")]
    Tracing(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classifies a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Client-caused failure, maps to 4xx.
    Validation,
    /// Fitting or controller misconfiguration.
    Configuration,
    /// No route or method for the request.
    Routing,
    /// Bugs, panics and anything else, maps to 5xx.
    Unexpected,
}

impl FailureKind {
    /// Status code used when the error carries no explicit hint.
    #[must_use]
    pub const fn default_status(self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Routing => 405,
            Self::Configuration | Self::Unexpected => 500,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Configuration => write!(f, "configuration"),
            Self::Routing => write!(f, "routing"),
            Self::Unexpected => write!(f, "unexpected"),
        }
    }
}

/// A failure reported by a fitting or controller.
///
/// Stored in `Context::error` while the pipe short-circuits to the error
/// handler in scope.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct FittingError {
    /// Failure classification.
    pub kind: FailureKind,
    /// Client-facing message.
    pub message: String,
    /// Status-code hint; the JSON error handler clears it once consumed.
    pub status_code: Option<u16>,
    /// Machine-readable error code (e.g. `server_error`).
    pub code: Option<String>,
    /// Structured detail entries, e.g. one per failed parameter.
    pub errors: Vec<serde_json::Value>,
    /// Methods the matched path does declare (routing failures only).
    pub allowed_methods: Vec<String>,
    /// Server-side diagnostic such as a source chain or panic payload.
    pub cause: Option<String>,
}

impl FittingError {
    /// Creates an error of the given kind.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            code: None,
            errors: Vec::new(),
            allowed_methods: Vec::new(),
            cause: None,
        }
    }

    /// Creates a 400 validation failure carrying detail entries.
    #[must_use]
    pub fn validation(message: impl Into<String>, errors: Vec<serde_json::Value>) -> Self {
        let mut err = Self::new(FailureKind::Validation, message).with_status(400);
        err.errors = errors;
        err
    }

    /// Creates a configuration failure.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Configuration, message)
    }

    /// Creates an unexpected failure.
    #[must_use]
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unexpected, message)
    }

    /// Creates a 405 routing failure listing the allowed methods.
    #[must_use]
    pub fn method_not_allowed(message: impl Into<String>, allowed: Vec<String>) -> Self {
        let mut err = Self::new(FailureKind::Routing, message).with_status(405);
        err.allowed_methods = allowed;
        err
    }

    /// Sets the status-code hint.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Sets the error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Sets the server-side cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// The status to report: the hint if present, else the kind's default.
    #[must_use]
    pub fn effective_status(&self) -> u16 {
        self.status_code
            .unwrap_or_else(|| self.kind.default_status())
    }

    /// Names of the populated fields, used in diagnostics when the body
    /// cannot be rendered.
    #[must_use]
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = vec!["kind", "message"];
        if self.status_code.is_some() {
            names.push("statusCode");
        }
        if self.code.is_some() {
            names.push("code");
        }
        if !self.errors.is_empty() {
            names.push("errors");
        }
        if !self.allowed_methods.is_empty() {
            names.push("allowedMethods");
        }
        if self.cause.is_some() {
            names.push("cause");
        }
        names
    }
}

impl From<anyhow::Error> for FittingError {
    fn from(err: anyhow::Error) -> Self {
        Self::unexpected(err.to_string()).with_cause(format!("{err:?}"))
    }
}

impl From<serde_json::Error> for FittingError {
    fn from(err: serde_json::Error) -> Self {
        Self::unexpected(format!("JSON error: {err}"))
    }
}

/// Metadata about a configuration error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorInfo {
    /// Error code (e.g., "PIPE-002-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipe or fitting definition cannot be compiled.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipeConfigError {
    /// The error message.
    pub message: String,
    /// The pipes involved in the error.
    pub pipes: Vec<String>,
    /// Optional diagnostic info.
    pub error_info: Option<ErrorInfo>,
}

impl PipeConfigError {
    /// Creates a new pipe configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            pipes: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the pipes involved.
    #[must_use]
    pub fn with_pipes(mut self, pipes: Vec<String>) -> Self {
        self.pipes = pipes;
        self
    }

    /// Sets the diagnostic info.
    #[must_use]
    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Error for a step naming no known fitting, definition or pipe.
    #[must_use]
    pub fn unknown_fitting(pipe: &str, name: &str) -> Self {
        Self::new(format!("Pipe '{pipe}' references unknown fitting '{name}'"))
            .with_pipes(vec![pipe.to_string()])
            .with_error_info(
                ErrorInfo::new("PIPE-001-UNKNOWN_FITTING", format!("No fitting named '{name}'"))
                    .with_fix_hint("Register a fitting factory with this name or define it in the pipe config map.")
                    .with_context_entry("fitting", name),
            )
    }

    /// Error for a step whose shape is not recognised.
    #[must_use]
    pub fn invalid_step(pipe: &str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::new(format!("Pipe '{pipe}' has an invalid step: {detail}"))
            .with_pipes(vec![pipe.to_string()])
            .with_error_info(ErrorInfo::new("PIPE-003-INVALID_STEP", detail))
    }

    /// Error for a fitting whose factory rejected its configuration.
    #[must_use]
    pub fn fitting_config(fitting: &str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::new(format!("Fitting '{fitting}' is misconfigured: {detail}"))
            .with_error_info(
                ErrorInfo::new("PIPE-004-FITTING_CONFIG", detail)
                    .with_context_entry("fitting", fitting),
            )
    }
}

/// Error raised when pipes reference each other in a cycle.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipe references: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of pipes forming the cycle.
    pub cycle_path: Vec<String>,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ErrorInfo::new(
            "PIPE-002-CYCLE",
            format!("Pipes reference each other in a cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the pipe references in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for PipeConfigError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            pipes: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}

/// Pipe selection failures that indicate misconfiguration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    /// A directive named a pipe that was never compiled.
    #[error("Pipe '{name}' is selected for this request but is not defined")]
    UnknownPipe {
        /// The selected pipe name.
        name: String,
    },
}

/// Controller lookup failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControllerLookupError {
    /// No controller directory is registered under this name.
    #[error("Controller directory not found: {directory}")]
    DirectoryNotFound {
        /// The directory name.
        directory: String,
    },

    /// The directory exists but has no such controller.
    #[error("Controller '{controller}' not found in {directory}")]
    ControllerNotFound {
        /// The directory name.
        directory: String,
        /// The controller name.
        controller: String,
    },

    /// No directories were configured at all.
    #[error("No controller directories configured for '{controller}'")]
    NoDirectories {
        /// The controller name.
        controller: String,
    },
}

/// Errors reading the contract document.
#[derive(Debug, Clone, Error)]
pub enum ContractError {
    /// The document could not be parsed.
    #[error("Unable to parse contract document: {0}")]
    Parse(String),

    /// The document parsed but is structurally invalid.
    #[error("Invalid contract document at {location}: {message}")]
    Invalid {
        /// JSON-pointer-like location.
        location: String,
        /// What is wrong.
        message: String,
    },

    /// Startup checks found errors and `startWithErrors` is off.
    #[error("Contract validation errors: {}", join_issues(.0))]
    ValidationErrors(Vec<ContractIssue>),

    /// Startup checks found warnings and `startWithWarnings` is off.
    #[error("Contract validation warnings: {}", join_issues(.0))]
    ValidationWarnings(Vec<ContractIssue>),
}

fn join_issues(issues: &[ContractIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ContractError {
    /// Creates an invalid-document error.
    #[must_use]
    pub fn invalid(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// The file path.
        path: String,
        /// The IO error.
        #[source]
        source: std::io::Error,
    },

    /// Content could not be parsed.
    #[error("Failed to parse {format} config: {message}")]
    Parse {
        /// `yaml` or `json`.
        format: String,
        /// Parser message.
        message: String,
    },

    /// The merged tree does not match the config schema.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_info_creation() {
        let info = ErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("pipe", "my_pipe");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("pipe"), Some(&"my_pipe".to_string()));
    }

    #[test]
    fn test_validation_error_defaults() {
        let err = FittingError::validation("Validation errors", vec![serde_json::json!({"code": "REQUIRED"})]);

        assert_eq!(err.kind, FailureKind::Validation);
        assert_eq!(err.status_code, Some(400));
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.to_string(), "Validation errors");
    }

    #[test]
    fn test_effective_status_falls_back_to_kind() {
        assert_eq!(FittingError::unexpected("boom").effective_status(), 500);
        assert_eq!(FittingError::configuration("bad").with_status(404).effective_status(), 404);
        assert_eq!(
            FittingError::method_not_allowed("nope", vec!["GET".into()]).effective_status(),
            405
        );
    }

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec!["a".to_string(), "b".to_string(), "a".to_string()]);

        assert!(err.to_string().contains("a -> b -> a"));
        assert_eq!(err.error_info.code, "PIPE-002-CYCLE");

        let config_err: PipeConfigError = err.into();
        assert_eq!(config_err.pipes.len(), 3);
    }

    #[test]
    fn test_unknown_fitting_error_info() {
        let err = PipeConfigError::unknown_fitting("main", "nope");
        assert_eq!(err.error_info.unwrap().code, "PIPE-001-UNKNOWN_FITTING");
    }

    #[test]
    fn test_anyhow_conversion_is_unexpected() {
        let err: FittingError = anyhow::anyhow!("database down").into();
        assert_eq!(err.kind, FailureKind::Unexpected);
        assert_eq!(err.message, "database down");
        assert!(err.cause.is_some());
    }

    #[test]
    fn test_field_names() {
        let err = FittingError::validation("bad", vec![serde_json::json!({})]).with_code("E1");
        let names = err.field_names();
        assert!(names.contains(&"errors"));
        assert!(names.contains(&"code"));
        assert!(!names.contains(&"cause"));
    }
}
