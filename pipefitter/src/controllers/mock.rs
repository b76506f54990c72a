//! Mock response synthesis from contract examples and schemas.

use crate::context::Context;
use crate::contract::Operation;
use crate::errors::FittingError;
use crate::fittings::FittingResult;
use http::header::{HeaderValue, CONTENT_TYPE};
use tracing::debug;

/// Request header choosing the mocked status code.
pub const MOCK_STATUS_HEADER: &str = "_mockreturnstatus";

const JSON: &str = "application/json";

/// Builds a mock response for `operation`.
///
/// The status comes from [`MOCK_STATUS_HEADER`] (default 200) and the MIME
/// type from `Accept` matched against the operation's `produces`. The body is
/// the contract example for that status and type, else a sample generated
/// from the response schema.
pub fn mock_response(ctx: &mut Context, operation: &Operation) -> FittingResult {
    let status = match ctx.request.header(MOCK_STATUS_HEADER) {
        Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
            FittingError::validation(format!("Invalid {MOCK_STATUS_HEADER} header: {raw}"), Vec::new())
        })?,
        None => 200,
    };
    let mime = select_mime(ctx.request.accept(), &operation.produces);
    debug!(status, mime = %mime, operation = %operation.handler_name(), "mocking response");

    let body = operation
        .example(status, &mime)
        .cloned()
        .or_else(|| operation.sample(status));

    ctx.status_code = Some(status);
    let content_type = HeaderValue::from_str(&mime)
        .map_err(|e| FittingError::unexpected(format!("invalid mock content type '{mime}': {e}")))?;
    ctx.set_header(CONTENT_TYPE, content_type);
    Ok(body)
}

/// First `Accept` entry the operation produces; otherwise JSON if produced,
/// else the first produced type.
fn select_mime(accept: Option<&str>, produces: &[String]) -> String {
    let fallback = || {
        if produces.is_empty() || produces.iter().any(|p| p == JSON) {
            JSON.to_string()
        } else {
            produces[0].clone()
        }
    };

    let Some(accept) = accept else {
        return fallback();
    };
    for entry in accept.split(',') {
        let mime = entry.split(';').next().unwrap_or_default().trim();
        if mime == "*/*" {
            return fallback();
        }
        if produces.iter().any(|p| p == mime) || (produces.is_empty() && mime == JSON) {
            return mime.to_string();
        }
    }
    fallback()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestRequest;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const CONTRACT: &str = r#"
swagger: "2.0"
produces: [ application/json, application/x-yaml ]
paths:
  /hello:
    get:
      responses:
        "200":
          description: ok
          schema:
            type: object
            properties:
              string: { type: string }
              integer: { type: integer }
        "201":
          description: created
          examples:
            application/json: { message: mocked }
            application/x-yaml: { message: mocked yaml }
"#;

    fn run(request: TestRequest) -> (Context, Option<serde_json::Value>) {
        let mut ctx = request.context_for(CONTRACT);
        let operation = ctx.request.operation().cloned().unwrap();
        let out = mock_response(&mut ctx, &operation).unwrap();
        (ctx, out)
    }

    #[test]
    fn test_status_header_selects_example() {
        let (ctx, out) = run(TestRequest::get("/hello").header(MOCK_STATUS_HEADER, "201"));

        assert_eq!(ctx.status_code, Some(201));
        assert_eq!(out, Some(json!({"message": "mocked"})));
        assert_eq!(ctx.content_type(), Some("application/json"));
    }

    #[test]
    fn test_accept_selects_yaml_example() {
        let (ctx, out) = run(
            TestRequest::get("/hello")
                .header(MOCK_STATUS_HEADER, "201")
                .header("accept", "text/html, application/x-yaml;q=0.9"),
        );

        assert_eq!(out, Some(json!({"message": "mocked yaml"})));
        assert_eq!(ctx.content_type(), Some("application/x-yaml"));
    }

    #[test]
    fn test_schema_sample_fallback() {
        let (ctx, out) = run(TestRequest::get("/hello"));
        let out = out.unwrap();

        assert_eq!(ctx.status_code, Some(200));
        assert!(out["string"].is_string());
        assert!(out["integer"].is_i64());
    }

    #[test]
    fn test_bad_status_header() {
        let mut ctx = TestRequest::get("/hello")
            .header(MOCK_STATUS_HEADER, "abc")
            .context_for(CONTRACT);
        let operation = ctx.request.operation().cloned().unwrap();

        let err = mock_response(&mut ctx, &operation).unwrap_err();
        assert_eq!(err.status_code, Some(400));
    }

    #[test]
    fn test_select_mime() {
        let produces = vec!["text/plain".to_string()];
        assert_eq!(select_mime(None, &produces), "text/plain");
        assert_eq!(select_mime(Some("*/*"), &[]), JSON);
        assert_eq!(select_mime(Some("application/xml"), &produces), "text/plain");
    }
}
