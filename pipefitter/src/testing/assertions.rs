//! Assertions on finished contexts.

use crate::context::Context;
use serde_json::Value;

/// Asserts that no error is pending.
pub fn assert_no_error(ctx: &Context) {
    assert!(
        ctx.error.is_none(),
        "Expected no error, got: {:?}",
        ctx.error
    );
}

/// Asserts that an error is pending with the given effective status.
pub fn assert_error_status(ctx: &Context, expected: u16) {
    let Some(err) = &ctx.error else {
        panic!("Expected an error with status {expected}, but none is pending");
    };
    assert_eq!(
        err.effective_status(),
        expected,
        "Expected error status {}, got {} ({})",
        expected,
        err.effective_status(),
        err.message
    );
}

/// Asserts that the output, parsed as JSON when it is a string, equals `expected`.
pub fn assert_output_json(ctx: &Context, expected: &Value) {
    let actual = match &ctx.output {
        Some(Value::String(text)) => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone())),
        Some(other) => other.clone(),
        None => panic!("Expected output {expected}, but output is empty"),
    };
    assert_eq!(&actual, expected, "Unexpected output");
}

/// Asserts that a context header has the given value.
pub fn assert_header(ctx: &Context, name: &str, expected: &str) {
    let actual = ctx.headers.get(name).and_then(|v| v.to_str().ok());
    assert_eq!(
        actual,
        Some(expected),
        "Expected header '{}' to be '{}', got {:?}",
        name,
        expected,
        actual
    );
}
