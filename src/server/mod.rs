mod browse_api;
mod settings_api;

use crate::browser::Browser;
use crate::completion::ChatCompletion;
use crate::error::GenerationError;
use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_embed::RustEmbed;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use browse_api::{
    back_api, explore_api, follow_api, forward_api, home_api, navigate_api, state_api,
};
use settings_api::{get_settings_api, list_models_api, toggle_dark_mode_api, update_settings_api};

#[derive(RustEmbed)]
#[folder = "ui/"]
struct Assets;

pub struct ServerState<C> {
    pub browser: Browser<C>,
    pub dev_mode: bool,
}

pub struct ServerHandle {
    pub task: tokio::task::JoinHandle<anyhow::Result<()>>,
    pub port: u16,
}

/// A generation failure rendered for the UI. Authentication failures ask the
/// UI to open the credential dialog.
pub(crate) struct ApiError(pub GenerationError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GenerationError::Authentication(_) => StatusCode::UNAUTHORIZED,
            GenerationError::Provider { .. } => StatusCode::BAD_GATEWAY,
            GenerationError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
            "hint": self.0.hint(),
            "open_credential_dialog": self.0.needs_credential(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        Self(err)
    }
}

pub fn router<C: ChatCompletion + 'static>(state: Arc<ServerState<C>>) -> Router {
    let dev_mode = state.dev_mode;
    let app = Router::new()
        .route("/api/state", get(state_api::<C>))
        .route("/api/navigate", post(navigate_api::<C>))
        .route("/api/follow", post(follow_api::<C>))
        .route("/api/explore", post(explore_api::<C>))
        .route("/api/back", post(back_api::<C>))
        .route("/api/forward", post(forward_api::<C>))
        .route("/api/home", post(home_api::<C>))
        .route(
            "/api/settings",
            get(get_settings_api::<C>).put(update_settings_api::<C>),
        )
        .route("/api/dark-mode", post(toggle_dark_mode_api::<C>))
        .route("/api/models", get(list_models_api))
        .route("/api/health", get(health_handler))
        .fallback(static_handler::<C>)
        .with_state(state);

    if dev_mode {
        // The UI is hosted elsewhere while developing it.
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

pub async fn prepare_server<C: ChatCompletion + 'static>(
    browser: Browser<C>,
    port: u16,
    dev_mode: bool,
) -> anyhow::Result<ServerHandle> {
    info!("latentspace server starting on port {}...", port);

    let state = Arc::new(ServerState { browser, dev_mode });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    let actual_port = listener.local_addr()?.port();
    info!("Server running on http://localhost:{}", actual_port);

    let task = tokio::spawn(async move {
        axum::serve(listener, app).await?;
        Ok(())
    });

    Ok(ServerHandle {
        task,
        port: actual_port,
    })
}

pub async fn start_server<C: ChatCompletion + 'static>(
    browser: Browser<C>,
    port: u16,
    dev_mode: bool,
    open_browser: bool,
) -> anyhow::Result<()> {
    let handle = prepare_server(browser, port, dev_mode).await?;
    if open_browser {
        let url = format!("http://localhost:{}", handle.port);
        if let Err(e) = open::that(&url) {
            tracing::warn!("Failed to open {} in a browser: {}", url, e);
        }
    }
    handle.task.await??;
    Ok(())
}

async fn static_handler<C: ChatCompletion + 'static>(
    State(state): State<Arc<ServerState<C>>>,
    uri: Uri,
) -> Response {
    let path = uri.path().trim_start_matches('/');

    let build_response = |builder: axum::http::response::Builder, body: axum::body::Body| -> Response {
        builder.body(body).unwrap_or_else(|_| {
            Response::new(axum::body::Body::from("internal server error"))
        })
    };

    if path.starts_with("api/") {
        return build_response(
            Response::builder().status(404).header("Content-Type", "application/json"),
            axum::body::Body::from(json!({ "error": "unknown endpoint" }).to_string()),
        );
    }

    if state.dev_mode {
        return build_response(
            Response::builder().status(404).header("Content-Type", "text/plain"),
            axum::body::Body::from(
                "Dev mode: the UI is served separately. Point it at this server's /api.",
            ),
        );
    }

    let path = if path.is_empty() { "index.html" } else { path };

    match Assets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            build_response(
                Response::builder().header("Content-Type", mime.as_ref()),
                axum::body::Body::from(content.data),
            )
        }
        None => {
            // Fallback to index.html for SPA routing
            match Assets::get("index.html") {
                Some(index) => build_response(
                    Response::builder().header("Content-Type", "text/html"),
                    axum::body::Body::from(index.data),
                ),
                None => build_response(
                    Response::builder().status(404),
                    axum::body::Body::from("Not found"),
                ),
            }
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}


#[cfg(test)]
mod tests {
    use super::test_support::spawn_app;

    #[tokio::test]
    async fn health_and_spa_fallback() {
        let base = spawn_app().await;
        let health: serde_json::Value = reqwest::get(format!("{}/api/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["ok"], true);

        let page = reqwest::get(format!("{}/some/deep/link", base)).await.unwrap();
        assert_eq!(page.status(), 200);
        assert!(page.text().await.unwrap().contains("LatentSpace"));

        let missing = reqwest::get(format!("{}/api/nope", base)).await.unwrap();
        assert_eq!(missing.status(), 404);
    }
}
