//! # Integration Tests for tplive
//!
//! Drives the router end to end: the index page, the data endpoint, the event
//! stream, and the directory watcher feeding connected streams.
//!
//! ## Test Overview
//!
//! - **test_index_serves_patched_document**: Root renders and carries the reload script.
//! - **test_index_rejects_other_paths**: Anything but `/` is a 404.
//! - **test_data_endpoint_rejects_bad_requests**: Wrong method and bad bodies leave state alone.
//! - **test_data_update_streams_one_event**: A data update yields exactly one SSE event.
//! - **test_lagging_stream_catches_up_after_eviction**: A client evicted for lagging still sees the latest data.
//! - **test_disconnected_stream_is_evicted**: A dropped stream is pruned on the next broadcast.
//! - **test_shutdown_closes_streams**: Open streams end when the server shuts down.
//! - **test_file_edit_reaches_all_streams**: An external edit reaches every open stream.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{timeout, Duration};
use tower::ServiceExt;
use tplive::broadcast::Registry;
use tplive::data::DataStore;
use tplive::render::{Renderer, TemplateRef};
use tplive::web::{router, AppState};

/// Timeout for an expected event.
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);
/// How long to wait before concluding no further event is coming.
const QUIET_PERIOD: Duration = Duration::from_millis(300);

const TEMPLATE: &str = "<html>\n<body>\n<p>Hello {{ name }}</p>\n</body>\n</html>\n";

/// Builds the shared state over `dir/index.html`, plus the shutdown sender.
fn test_state(dir: &Path, data: serde_json::Value) -> (AppState, watch::Sender<bool>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let serde_json::Value::Object(initial) = data else {
        panic!("test data must be an object");
    };
    let registry = Arc::new(Registry::new());
    let data = Arc::new(DataStore::new(initial, Arc::clone(&registry)));
    let renderer = Renderer::new(TemplateRef::new(dir.join("index.html")), true)
        .expect("Failed to build renderer");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = AppState {
        data,
        registry,
        renderer: Arc::new(renderer),
        shutdown: shutdown_rx,
    };
    (state, shutdown_tx)
}

fn template_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::write(dir.path().join("index.html"), TEMPLATE).expect("Failed to write template");
    dir
}

async fn send(app: &Router, request: Request<Body>) -> axum::response::Response {
    app.clone().oneshot(request).await.expect("Router failed")
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_data(body: &str) -> Request<Body> {
    Request::post("/data")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Reads the next SSE frame as text, or `None` if the stream ended.
async fn next_event(body: &mut Body) -> Option<String> {
    let frame = timeout(EVENT_TIMEOUT, body.frame())
        .await
        .expect("Timed out waiting for an event")?
        .expect("Stream error");
    let data = frame.into_data().expect("Expected a data frame");
    Some(String::from_utf8(data.to_vec()).expect("Event is not UTF-8"))
}

/// Test: The root path renders the template with the reload script injected.
#[tokio::test]
async fn test_index_serves_patched_document() {
    let dir = template_dir();
    let (state, _shutdown) = test_state(dir.path(), json!({"name": "Ada"}));
    let app = router(state);

    let response = send(&app, get("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8(body.to_vec()).unwrap();

    assert!(html.contains("<p>Hello Ada</p>"));
    let script = html.find("tplive-script").expect("Reload script missing");
    assert!(script < html.rfind("</html>").unwrap());
}

/// Test: Only the root path is served.
#[tokio::test]
async fn test_index_rejects_other_paths() {
    let dir = template_dir();
    let (state, _shutdown) = test_state(dir.path(), json!({"name": "Ada"}));
    let app = router(state);

    let response = send(&app, get("/favicon.ico")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Test: Wrong methods and unparseable bodies are rejected without side effects.
#[tokio::test]
async fn test_data_endpoint_rejects_bad_requests() {
    let dir = template_dir();
    let (state, _shutdown) = test_state(dir.path(), json!({"name": "Ada"}));
    let mut subscriber = state.registry.register();
    let app = router(state.clone());

    let response = send(&app, get("/data")).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let response = send(&app, post_data("{\"name\": ")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = send(&app, post_data("\"just a string\"")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    assert_eq!(state.data.read().get("name"), Some(&json!("Ada")));
    assert!(!subscriber.try_notified(), "Rejected update must not broadcast");
}

/// Test: Posting new data while a client streams yields exactly one event with the new rendering.
#[tokio::test]
async fn test_data_update_streams_one_event() {
    let dir = template_dir();
    let (state, _shutdown) = test_state(dir.path(), json!({"name": "nobody"}));
    let app = router(state.clone());

    let response = send(&app, get("/sse")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(headers["x-accel-buffering"], "no");
    assert_eq!(state.registry.len(), 1);
    let mut body = response.into_body();

    let response = send(&app, post_data(r#"{"name":"Ada"}"#)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let event = next_event(&mut body).await.expect("Stream ended early");
    assert!(event.contains("data: <p>Hello Ada</p>\n"), "Event: {:?}", event);
    assert!(event.ends_with("\n\n"));
    for line in event.lines().filter(|l| !l.is_empty()) {
        assert!(line.starts_with("data:"), "Unframed line: {:?}", line);
    }
    assert!(!event.contains("tplive-script"), "Streamed documents are not patched");

    assert!(
        timeout(QUIET_PERIOD, body.frame()).await.is_err(),
        "Expected exactly one event"
    );
}

/// Test: A client that falls behind is evicted but still receives the latest data.
#[tokio::test]
async fn test_lagging_stream_catches_up_after_eviction() {
    let dir = template_dir();
    let (state, _shutdown) = test_state(dir.path(), json!({"name": "nobody"}));
    let app = router(state.clone());

    let mut body = send(&app, get("/sse")).await.into_body();

    // Two updates before the client reads anything: the second evicts it.
    for payload in [r#"{"name":"A"}"#, r#"{"name":"B"}"#] {
        let response = send(&app, post_data(payload)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert!(state.registry.is_empty());

    let event = next_event(&mut body).await.expect("Stream ended early");
    assert!(event.contains("Hello B"), "Event: {:?}", event);

    // Lands while the stream is not registered.
    let response = send(&app, post_data(r#"{"name":"LATEST"}"#)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let event = next_event(&mut body)
        .await
        .expect("Stream ended instead of catching up");
    assert!(event.contains("Hello LATEST"), "Event: {:?}", event);
    assert_eq!(state.registry.len(), 1);
}

/// Test: A stream dropped without draining is pruned by the next broadcast.
#[tokio::test]
async fn test_disconnected_stream_is_evicted() {
    let dir = template_dir();
    let (state, _shutdown) = test_state(dir.path(), json!({"name": "Ada"}));
    let app = router(state.clone());

    let response = send(&app, get("/sse")).await;
    assert_eq!(state.registry.len(), 1);
    drop(response);

    let response = send(&app, post_data(r#"{"name":"Grace"}"#)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.registry.is_empty());
}

/// Test: Flipping the shutdown signal ends open event streams.
#[tokio::test]
async fn test_shutdown_closes_streams() {
    let dir = template_dir();
    let (state, shutdown_tx) = test_state(dir.path(), json!({"name": "Ada"}));
    let app = router(state);

    let mut body = send(&app, get("/sse")).await.into_body();
    shutdown_tx.send(true).unwrap();
    assert!(next_event(&mut body).await.is_none());
}

/// Test: Editing the template on disk pushes a fresh rendering to every open stream.
#[tokio::test]
async fn test_file_edit_reaches_all_streams() {
    let dir = template_dir();
    let (state, _shutdown) = test_state(dir.path(), json!({"name": "Ada"}));
    tplive::watcher::run_watcher(
        dir.path(),
        Duration::from_millis(50),
        Arc::clone(&state.registry),
    )
    .expect("Failed to start watcher");
    let app = router(state.clone());

    let mut first = send(&app, get("/sse")).await.into_body();
    let mut second = send(&app, get("/sse")).await.into_body();
    assert_eq!(state.registry.len(), 2);

    // Let the watch settle before editing.
    tokio::time::sleep(Duration::from_millis(200)).await;
    fs::write(
        dir.path().join("index.html"),
        "<html>\n<body>\n<p>Goodbye {{ name }}</p>\n</body>\n</html>\n",
    )
    .expect("Failed to edit template");

    for body in [&mut first, &mut second] {
        let event = next_event(body).await.expect("Stream ended early");
        assert!(event.contains("Goodbye Ada"), "Event: {:?}", event);
    }
}
