// src/web.rs
use crate::broadcast::Registry;
use crate::data::DataStore;
use crate::render::{self, Renderer};
use anyhow::{Context as _, Result};
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::{
        sse::{Event, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Router,
};
use futures_util::stream;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch::Receiver as WatchReceiver;
use tracing::{debug, error, info};

/// Largest accepted body on the data endpoint.
const MAX_DATA_BYTES: usize = 8 * 1024 * 1024;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub data: Arc<DataStore>,
    pub registry: Arc<Registry>,
    pub renderer: Arc<Renderer>,
    /// Flips to `true` when the server is shutting down; open event streams end.
    pub shutdown: WatchReceiver<bool>,
}

/// Builds the router with the index, event stream and data endpoints.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/sse", get(events))
        .route("/data", post(set_data))
        .fallback(not_found)
        .with_state(state)
}

/// Serves the patched rendering of the template.
async fn index(State(state): State<AppState>) -> Response {
    Html(render(&state, true).await).into_response()
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Replaces the render context with the request body and signals a reload.
async fn set_data(State(state): State<AppState>, body: Body) -> StatusCode {
    let body = match axum::body::to_bytes(body, MAX_DATA_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            error!("Could not read data body: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    match state.data.replace_from_slice(&body) {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!("Rejected data update: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Opens an event stream that carries a fresh rendering after every change.
///
/// The subscriber is registered before the response is returned, so any
/// change after this handler runs reaches the client. A subscriber evicted
/// for falling behind is replaced with a new registration and the client gets
/// an immediate rendering, so it catches up with changes it missed.
async fn events(State(state): State<AppState>) -> impl IntoResponse {
    let subscriber = state.registry.register();

    let stream = stream::unfold((subscriber, state), |(mut subscriber, state)| async move {
        let wake = tokio::select! {
            notified = subscriber.notified() => {
                if notified { Wake::Notified } else { Wake::Evicted }
            }
            _ = wait_for_shutdown(state.shutdown.clone()) => Wake::Shutdown,
        };
        match wake {
            Wake::Notified => {}
            Wake::Evicted => {
                debug!("Subscriber was evicted, registering again.");
                subscriber = state.registry.register();
            }
            Wake::Shutdown => {
                debug!("Event stream closing.");
                return None;
            }
        }

        let body = render(&state, false).await;
        let event = Event::default().data(normalize_newlines(&body));
        Some((Ok::<_, Infallible>(event), (subscriber, state)))
    });

    (
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream),
    )
}

/// Why an event stream woke up.
enum Wake {
    Notified,
    Evicted,
    Shutdown,
}

/// Renders on the blocking pool; the renderer reads the filesystem and holds
/// the data read lock while it runs.
async fn render(state: &AppState, patch: bool) -> Vec<u8> {
    let data = Arc::clone(&state.data);
    let renderer = Arc::clone(&state.renderer);
    match tokio::task::spawn_blocking(move || renderer.render(&data, patch)).await {
        Ok(body) => body,
        Err(e) => {
            error!("Render task failed: {}", e);
            render::fallback_document(&format!("render task failed: {}", e))
        }
    }
}

/// SSE frames one `data:` field per line, and a bare CR also ends a line.
fn normalize_newlines(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .replace("\r\n", "\n")
        .replace('\r', "\n")
}

async fn wait_for_shutdown(mut shutdown: WatchReceiver<bool>) {
    loop {
        let done = *shutdown.borrow();
        if done {
            return;
        }
        if shutdown.changed().await.is_err() {
            // Sender gone without a shutdown: never resolve.
            std::future::pending::<()>().await;
        }
    }
}

/// Binds the listen address.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to listen on {}", addr))
}

/// Serves the preview until the shutdown signal flips.
///
/// # Arguments
/// - `listener`: Bound TCP listener.
/// - `state`: Shared state; its `shutdown` receiver drives graceful shutdown.
///
/// # Returns
/// Returns `Ok(())` when the server shuts down cleanly.
pub async fn start_server(listener: TcpListener, state: AppState) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let local_addr = listener.local_addr()?;
    info!("Web server starting on http://{}", local_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            wait_for_shutdown(shutdown).await;
            info!("Web server shutting down gracefully.");
        })
        .await?;

    info!("Web server stopped.");
    Ok(())
}
