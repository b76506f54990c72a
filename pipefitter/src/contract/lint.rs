//! Structural checks run once when a runner starts.

use super::ApiContract;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Two operations declare the same `operationId`.
pub const DUPLICATE_OPERATIONID: &str = "DUPLICATE_OPERATIONID";
/// A local `$ref` points at nothing.
pub const UNRESOLVABLE_REFERENCE: &str = "UNRESOLVABLE_REFERENCE";
/// A schema under `definitions` is never referenced.
pub const UNUSED_DEFINITION: &str = "UNUSED_DEFINITION";

/// One finding about the contract document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractIssue {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// JSON-pointer-like location.
    pub path: String,
}

impl ContractIssue {
    fn new(code: &str, message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for ContractIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.path)
    }
}

/// Errors and warnings found in a contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractReport {
    /// Problems that should stop startup.
    pub errors: Vec<ContractIssue>,
    /// Problems worth reporting.
    pub warnings: Vec<ContractIssue>,
}

impl ContractReport {
    /// Drops errors with the given code.
    pub fn ignore(&mut self, code: &str) {
        self.errors.retain(|issue| issue.code != code);
    }

    /// Whether nothing was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

impl ApiContract {
    /// Checks operation id uniqueness and local references.
    #[must_use]
    pub fn lint(&self) -> ContractReport {
        let mut report = ContractReport::default();

        let mut seen: HashMap<&str, String> = HashMap::new();
        for item in &self.paths {
            for op in &item.operations {
                let Some(id) = op.operation_id.as_deref() else {
                    continue;
                };
                let location = format!(
                    "#/paths/{}/{}/operationId",
                    escape(&item.path),
                    op.method.as_str().to_lowercase()
                );
                if let Some(first) = seen.get(id) {
                    report.errors.push(ContractIssue::new(
                        DUPLICATE_OPERATIONID,
                        format!("Operation cannot have duplicate operationId: {id} (first declared at {first})"),
                        location,
                    ));
                } else {
                    seen.insert(id, location);
                }
            }
        }

        let mut references = Vec::new();
        collect_refs(&self.document, "#".to_string(), &mut references);

        let mut used = BTreeSet::new();
        for (location, reference) in &references {
            let Some(pointer) = reference.strip_prefix('#') else {
                continue;
            };
            if self.document.pointer(pointer).is_none() {
                report.errors.push(ContractIssue::new(
                    UNRESOLVABLE_REFERENCE,
                    format!("Reference could not be resolved: {reference}"),
                    location.clone(),
                ));
            }
            if let Some(name) = pointer.strip_prefix("/definitions/") {
                used.insert(name.split('/').next().unwrap_or(name).to_string());
            }
        }

        if let Some(Value::Object(definitions)) = self.document.get("definitions") {
            for name in definitions.keys().filter(|name| !used.contains(*name)) {
                report.warnings.push(ContractIssue::new(
                    UNUSED_DEFINITION,
                    format!("Definition is not used: {name}"),
                    format!("#/definitions/{name}"),
                ));
            }
        }

        report
    }
}

fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn collect_refs(value: &Value, location: String, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match (key.as_str(), child) {
                    ("$ref", Value::String(reference)) => out.push((location.clone(), reference.clone())),
                    _ => collect_refs(child, format!("{location}/{}", escape(key)), out),
                }
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                collect_refs(child, format!("{location}/{index}"), out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONTRACT: &str = r##"
swagger: "2.0"
paths:
  /pets:
    get:
      operationId: listPets
      responses:
        "200":
          description: ok
          schema: { $ref: "#/definitions/Pet" }
    post:
      operationId: listPets
      parameters:
        - { name: pet, in: body, schema: { $ref: "#/definitions/Missing" } }
      responses: {}
definitions:
  Pet:
    type: object
  Orphan:
    type: object
"##;

    #[test]
    fn test_lint_finds_errors_and_warnings() {
        let report = ApiContract::from_yaml_str(CONTRACT).unwrap().lint();

        let codes: Vec<&str> = report.errors.iter().map(|issue| issue.code.as_str()).collect();
        assert_eq!(codes, vec![DUPLICATE_OPERATIONID, UNRESOLVABLE_REFERENCE]);
        assert_eq!(report.errors[0].path, "#/paths/~1pets/post/operationId");
        assert_eq!(report.errors[1].path, "#/paths/~1pets/post/parameters/0/schema");

        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].code, UNUSED_DEFINITION);
        assert_eq!(report.warnings[0].path, "#/definitions/Orphan");
    }

    #[test]
    fn test_ignore_drops_one_code() {
        let mut report = ApiContract::from_yaml_str(CONTRACT).unwrap().lint();
        report.ignore(DUPLICATE_OPERATIONID);

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, UNRESOLVABLE_REFERENCE);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_hello_contract_is_clean() {
        let contract = ApiContract::from_yaml_str(crate::contract::tests::HELLO_YAML).unwrap();
        assert!(contract.lint().is_clean());
    }
}
