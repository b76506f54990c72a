//! Layered configuration loading.
//!
//! Layers are merged in the order they are added; environment variables are
//! applied last, at [`ConfigLoader::load`].

use super::RunnerConfig;
use crate::errors::ConfigError;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Builds a [`RunnerConfig`] from defaults, files, overrides and environment.
///
/// ```no_run
/// use pipefitter::config::ConfigLoader;
///
/// # fn main() -> Result<(), pipefitter::errors::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_file("config/default.yaml")?
///     .with_env_prefix("swagger")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    tree: Map<String, Value>,
    env_prefix: Option<String>,
    env_vars: Vec<(String, String)>,
}

impl ConfigLoader {
    /// Creates a loader holding only defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a YAML or JSON file, chosen by extension.
    ///
    /// If the document has a top-level `swagger` object, only that subtree is used.
    pub fn with_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => self.with_json_str(&content),
            _ => self.with_yaml_str(&content),
        }
    }

    /// Merges YAML content.
    pub fn with_yaml_str(self, content: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            format: "yaml".to_string(),
            message: e.to_string(),
        })?;
        self.with_document(value)
    }

    /// Merges JSON content.
    pub fn with_json_str(self, content: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            format: "json".to_string(),
            message: e.to_string(),
        })?;
        self.with_document(value)
    }

    /// Merges programmatic overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: Value) -> Self {
        if let Value::Object(map) = overrides {
            deep_merge(&mut self.tree, map);
        }
        self
    }

    /// Reads `<prefix>_<key>[_<subkey>...]` variables from the process environment.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Supplies environment variables explicitly instead of reading the process.
    #[must_use]
    pub fn with_env_vars<I, K, V>(mut self, prefix: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_prefix = Some(prefix.into());
        self.env_vars = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Produces the final configuration.
    pub fn load(mut self) -> Result<RunnerConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars = if self.env_vars.is_empty() {
                std::env::vars().collect()
            } else {
                std::mem::take(&mut self.env_vars)
            };
            let env_tree = env_tree(&prefix, vars);
            debug!(vars = ?env_tree, "loaded env config");
            deep_merge(&mut self.tree, env_tree);
        }

        let mut config: RunnerConfig = serde_json::from_value(Value::Object(self.tree))
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.apply_legacy_defaults();
        Ok(config)
    }

    fn with_document(mut self, value: Value) -> Result<Self, ConfigError> {
        let value = match value {
            Value::Object(mut root) => match root.remove("swagger") {
                Some(Value::Object(section)) => section,
                Some(_) => return Err(ConfigError::Invalid("`swagger` section must be a map".into())),
                None => root,
            },
            Value::Null => Map::new(),
            _ => return Err(ConfigError::Invalid("config root must be a map".into())),
        };
        deep_merge(&mut self.tree, value);
        Ok(self)
    }
}

/// Objects merge key by key; anything else replaces.
fn deep_merge(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        if let Value::Object(incoming) = value {
            if let Some(Value::Object(existing)) = base.get_mut(&key) {
                deep_merge(existing, incoming);
                continue;
            }
            base.insert(key, Value::Object(incoming));
        } else {
            base.insert(key, value);
        }
    }
}

fn env_tree(prefix: &str, vars: Vec<(String, String)>) -> Map<String, Value> {
    let mut tree = Map::new();
    for (key, raw) in vars {
        let mut parts = key.split('_');
        if parts.next() != Some(prefix) {
            continue;
        }
        let path: Vec<&str> = parts.collect();
        if path.is_empty() || path.iter().any(|segment| segment.is_empty()) {
            continue;
        }

        let mut value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
        for segment in path.iter().rev() {
            let mut wrapper = Map::new();
            wrapper.insert((*segment).to_string(), value);
            value = Value::Object(wrapper);
        }
        if let Value::Object(branch) = value {
            deep_merge(&mut tree, branch);
        }
    }
    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_defaults_install_legacy_pipes() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config.swagger_controller_pipe.as_deref(), Some("swagger_controllers"));
        assert!(config.bagpipes.unwrap().contains_key("_router"));
    }

    #[test]
    fn test_yaml_swagger_section() {
        let config = ConfigLoader::new()
            .with_yaml_str(
                r"
swagger:
  mockMode: true
  defaultPipe: main
  bagpipes:
    main: [ json_error_handler ]
",
            )
            .unwrap()
            .load()
            .unwrap();

        assert!(config.mock_mode);
        assert_eq!(config.default_pipe.as_deref(), Some("main"));
        assert!(config.swagger_controller_pipe.is_none());
    }

    #[test]
    fn test_file_then_overrides_then_env() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"defaultPipe": "from_file", "mockMode": false, "bagpipes": {{"a": ["x"], "b": ["y"]}}}}"#
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_file(file.path())
            .unwrap()
            .with_overrides(json!({"defaultPipe": "from_overrides", "bagpipes": {"b": ["z"]}}))
            .with_env_vars(
                "swagger",
                vec![("swagger_mockMode", "true"), ("other_mockMode", "false")],
            )
            .load()
            .unwrap();

        assert_eq!(config.default_pipe.as_deref(), Some("from_overrides"));
        assert!(config.mock_mode);
        let bagpipes = config.bagpipes.unwrap();
        assert_eq!(bagpipes["a"], json!(["x"]));
        assert_eq!(bagpipes["b"], json!(["z"]));
    }

    #[test]
    fn test_env_tree_nesting_and_parsing() {
        let tree = env_tree(
            "swagger",
            vec![
                ("swagger_bagpipes_main".to_string(), r#"["a","b"]"#.to_string()),
                ("swagger_defaultPipe".to_string(), "main".to_string()),
                ("swagger_".to_string(), "ignored".to_string()),
                ("SWAGGER_x".to_string(), "ignored".to_string()),
            ],
        );

        assert_eq!(
            Value::Object(tree),
            json!({"bagpipes": {"main": ["a", "b"]}, "defaultPipe": "main"})
        );
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigLoader::new().with_file("/nonexistent/config.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_invalid_content() {
        assert!(matches!(
            ConfigLoader::new().with_json_str("{"),
            Err(ConfigError::Parse { .. })
        ));
        let err = ConfigLoader::new()
            .with_overrides(json!({"mockMode": "maybe"}))
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
