use super::*;
use crate::config::RunnerConfig;
use crate::contract::ApiContract;
use crate::controllers::{Controller, ControllerRegistry};
use crate::events::CollectingEventSink;
use crate::fittings::FittingResult;
use futures::future::BoxFuture;
use crate::testing::TestRequest;
use pretty_assertions::assert_eq;
use serde_json::json;

const CONTRACT: &str = r#"
swagger: "2.0"
info: { title: Adapter, version: "1" }
paths:
  /hello:
    x-swagger-router-controller: hello_world
    get:
      operationId: hello
      parameters:
        - { name: name, in: query, type: string }
      responses: {}
    put:
      operationId: hello_native
      responses: {}
  /greet:
    x-swagger-router-controller: hello_world
    get:
      operationId: hello
      parameters:
        - { name: name, in: query, type: string, required: true }
      responses: {}
  /broken:
    x-swagger-router-controller: hello_world
    get:
      operationId: broken
      responses: {}
  /yaml:
    x-swagger-router-controller: hello_world
    get:
      operationId: yaml
      responses: {}
  /plain:
    get:
      responses: {}
    post:
      responses: {}
  /piped:
    x-swagger-pipe: missing_pipe
    get:
      responses: {}
  /checked:
    x-swagger-router-controller: hello_world
    get:
      operationId: hello
      responses:
        "200":
          description: ok
          schema:
            type: object
            required: [message]
    put:
      operationId: hello_native
      responses:
        "200":
          description: ok
          schema:
            type: object
            required: [message]
"#;

fn hello(ctx: &mut Context) -> BoxFuture<'_, FittingResult> {
    Box::pin(async move {
        let name = ctx
            .request
            .swagger
            .as_ref()
            .and_then(|s| s.params.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("stranger")
            .to_string();
        Ok(Some(json!({"message": format!("Hello, {name}!")})))
    })
}

fn hello_native<'a>(
    _request: &'a mut NativeRequest,
    response: &'a mut NativeResponse,
) -> BoxFuture<'a, FittingResult> {
    Box::pin(async move {
        response.json(&json!({"native": true}))?;
        Ok(None)
    })
}

fn broken(_ctx: &mut Context) -> BoxFuture<'_, FittingResult> {
    Box::pin(async move { Err(FittingError::from(anyhow::anyhow!("database unavailable"))) })
}

fn yaml(ctx: &mut Context) -> BoxFuture<'_, FittingResult> {
    Box::pin(async move {
        ctx.try_set_header("content-type", "application/x-yaml")?;
        Ok(Some(json!({"greeting": "hi"})))
    })
}

fn controllers() -> ControllerRegistry {
    let controller = Controller::new("hello_world")
        .with_pipe_handler("hello", hello)
        .with_native_handler("hello_native", hello_native)
        .with_pipe_handler("broken", broken)
        .with_pipe_handler("yaml", yaml);
    ControllerRegistry::new().with_controller("api/controllers", controller)
}

fn adapter() -> ConnectAdapter {
    let runner = Runner::builder(ApiContract::from_yaml_str(CONTRACT).unwrap())
        .with_config(RunnerConfig {
            map_errors_to_json: true,
            ..RunnerConfig::default()
        })
        .with_controllers(controllers())
        .build()
        .unwrap();
    Arc::new(runner).connect_adapter()
}

fn checking_adapter(events: Arc<CollectingEventSink>) -> ConnectAdapter {
    let runner = Runner::builder(ApiContract::from_yaml_str(CONTRACT).unwrap())
        .with_config(RunnerConfig {
            validate_response: true,
            ..RunnerConfig::default()
        })
        .with_controllers(controllers())
        .with_event_sink(events)
        .build()
        .unwrap();
    Arc::new(runner).connect_adapter()
}

fn respond(outcome: AdapterOutcome) -> Response<Bytes> {
    match outcome {
        AdapterOutcome::Respond(response) => response,
        other => panic!("expected a response, got {other:?}"),
    }
}

fn failed(outcome: AdapterOutcome) -> (FittingError, Response<Bytes>) {
    match outcome {
        AdapterOutcome::Failed { error, response } => (error, response),
        other => panic!("expected a failure, got {other:?}"),
    }
}

fn body_json(response: &Response<Bytes>) -> Value {
    serde_json::from_slice(response.body()).unwrap()
}

#[tokio::test]
async fn test_pipe_handler_response() {
    let response = respond(
        adapter()
            .handle(TestRequest::get("/hello?name=Scott").build())
            .await,
    );

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    assert_eq!(body_json(&response), json!({"message": "Hello, Scott!"}));
}

#[tokio::test]
async fn test_native_handler_response() {
    let response = respond(adapter().handle(TestRequest::put("/hello").build()).await);
    assert_eq!(body_json(&response), json!({"native": true}));
}

#[tokio::test]
async fn test_undeclared_method_is_405_with_allow() {
    let (error, response) = failed(adapter().handle(TestRequest::delete("/hello").build()).await);

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[ALLOW], "GET, PUT");
    assert_eq!(error.allowed_methods, vec!["GET", "PUT"]);
    assert_eq!(
        error.message,
        "Path [/hello] defined in Swagger, but DELETE operation is not."
    );
}

#[tokio::test]
async fn test_unknown_path_passes_through() {
    let outcome = adapter().handle(TestRequest::get("/elsewhere?x=1").build()).await;

    let AdapterOutcome::PassThrough(request) = outcome else {
        panic!("expected pass-through");
    };
    assert_eq!(request.uri(), "/elsewhere?x=1");
    assert!(adapter()
        .handle(TestRequest::get("/elsewhere").build())
        .await
        .into_response()
        .is_none());
}

#[tokio::test]
async fn test_no_pipe_is_405_with_allow() {
    let (error, response) = failed(adapter().handle(TestRequest::get("/plain").build()).await);

    assert_eq!(error.message, NO_IMPLEMENTATION);
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[ALLOW], "GET, POST");
}

#[tokio::test]
async fn test_options_skips_method_check() {
    let (error, _) = failed(adapter().handle(TestRequest::options("/plain").build()).await);
    assert_eq!(error.message, NO_IMPLEMENTATION);
}

#[tokio::test]
async fn test_unknown_selected_pipe_is_a_server_error() {
    let (error, response) = failed(adapter().handle(TestRequest::get("/piped").build()).await);

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(error.message.contains("missing_pipe"));
}

#[tokio::test]
async fn test_validation_error_rendered_as_json() {
    let response = respond(adapter().handle(TestRequest::get("/greet").build()).await);

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    let body = body_json(&response);
    assert_eq!(body["message"], json!("Validation errors"));
    assert_eq!(body["errors"][0]["code"], json!("REQUIRED"));
    assert!(body.get("statusCode").is_none());
}

#[tokio::test]
async fn test_unhandled_500_is_forwarded() {
    let (error, response) = failed(adapter().handle(TestRequest::get("/broken").build()).await);

    assert_eq!(error.message, "database unavailable");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.body().is_empty());
}

#[tokio::test]
async fn test_yaml_output() {
    let response = respond(adapter().handle(TestRequest::get("/yaml").build()).await);

    assert_eq!(response.headers()[CONTENT_TYPE], "application/x-yaml");
    let body: Value = serde_yaml::from_slice(response.body()).unwrap();
    assert_eq!(body, json!({"greeting": "hi"}));
}

#[test]
fn test_translate() {
    let object = json!({"a": 1});

    assert_eq!(translate(&json!("raw text"), Some("application/json")).unwrap(), "raw text");
    assert_eq!(translate(&object, Some("application/json; charset=utf-8")).unwrap(), r#"{"a":1}"#);
    assert_eq!(translate(&object, Some("text/plain")).unwrap(), "{\n  \"a\": 1\n}");
    assert_eq!(translate(&object, Some("application/yaml")).unwrap(), "a: 1\n");
}

#[tokio::test]
async fn test_matching_response_emits_nothing() {
    let events = Arc::new(CollectingEventSink::new());
    let response = respond(
        checking_adapter(events.clone())
            .handle(TestRequest::get("/checked").build())
            .await,
    );

    assert_eq!(response.status(), StatusCode::OK);
    assert!(events
        .events_of_kind(PipeEventKind::ResponseValidationError)
        .is_empty());
}

#[tokio::test]
async fn test_mismatched_response_is_reported_and_still_sent() {
    let events = Arc::new(CollectingEventSink::new());
    let adapter = checking_adapter(events.clone());

    let response = respond(adapter.handle(TestRequest::get("/hello").build()).await);
    assert_eq!(response.status(), StatusCode::OK);

    let response = respond(adapter.handle(TestRequest::put("/checked").build()).await);
    assert_eq!(body_json(&response), json!({"native": true}));

    let reported = events.events_of_kind(PipeEventKind::ResponseValidationError);
    assert_eq!(reported.len(), 2);

    let undeclared = reported[0].data.as_ref().unwrap();
    assert_eq!(undeclared["path"], "/hello");
    assert_eq!(undeclared["statusCode"], 200);
    assert_eq!(undeclared["errors"][0]["code"], "INVALID_RESPONSE_CODE");

    let native = reported[1].data.as_ref().unwrap();
    assert_eq!(native["method"], "PUT");
    assert_eq!(native["errors"][0]["code"], "OBJECT_MISSING_REQUIRED_PROPERTY");
}

#[tokio::test]
async fn test_response_check_is_off_by_default() {
    let events = Arc::new(CollectingEventSink::new());
    let runner = Runner::builder(ApiContract::from_yaml_str(CONTRACT).unwrap())
        .with_controllers(controllers())
        .with_event_sink(events.clone())
        .build()
        .unwrap();

    respond(
        Arc::new(runner)
            .connect_adapter()
            .handle(TestRequest::get("/hello").build())
            .await,
    );
    assert!(events
        .events_of_kind(PipeEventKind::ResponseValidationError)
        .is_empty());
}

#[test]
fn test_written_body_follows_content_type() {
    assert_eq!(written_body(b"", Some("application/json")), None);
    assert_eq!(written_body(br#"{"a":1}"#, Some("application/json")), Some(json!({"a": 1})));
    assert_eq!(written_body(b"a: 1\n", Some("application/x-yaml")), Some(json!({"a": 1})));
    assert_eq!(written_body(b"plain", None), Some(json!("plain")));
}
