use crate::completion::ChatCompletion;
use crate::prompt::ArticleStyle;
use crate::server::ServerState;
use crate::settings::MODEL_CATALOG;
use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Deserialize)]
pub(crate) struct SettingsUpdate {
    /// Absent keeps the saved credential; blank removes it.
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    style: ArticleStyle,
}

pub(crate) async fn get_settings_api<C: ChatCompletion + 'static>(
    State(state): State<Arc<ServerState<C>>>,
) -> impl IntoResponse {
    // The credential itself is never sent back.
    Json(state.browser.preferences().await)
}

pub(crate) async fn update_settings_api<C: ChatCompletion + 'static>(
    State(state): State<Arc<ServerState<C>>>,
    Json(update): Json<SettingsUpdate>,
) -> impl IntoResponse {
    let view = state
        .browser
        .save_credential(update.api_key.as_deref(), &update.model, update.style)
        .await;
    Json(view)
}

pub(crate) async fn toggle_dark_mode_api<C: ChatCompletion + 'static>(
    State(state): State<Arc<ServerState<C>>>,
) -> impl IntoResponse {
    let dark_mode = state.browser.toggle_dark_mode().await;
    Json(json!({ "dark_mode": dark_mode }))
}

pub(crate) async fn list_models_api() -> impl IntoResponse {
    Json(json!({ "models": MODEL_CATALOG }))
}

#[cfg(test)]
mod tests {
    use crate::server::test_support::spawn_app;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn settings_are_redacted_and_dark_mode_toggles() {
        let base = spawn_app().await;
        let client = reqwest::Client::new();

        let saved: Value = client
            .put(format!("{}/api/settings", base))
            .json(&json!({"api_key": " csk-0123456789wxyz ", "model": "zai-glm-4.6", "style": "short"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(saved["has_api_key"], true);
        assert_eq!(saved["api_key_hint"], "***wxyz");
        assert_eq!(saved["model"], "zai-glm-4.6");
        assert_eq!(saved["style"], "short");

        let fetched = client
            .get(format!("{}/api/settings", base))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(!fetched.contains("csk-0123456789wxyz"));

        let toggled: Value = client
            .post(format!("{}/api/dark-mode", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(toggled["dark_mode"], true);
    }

    #[tokio::test]
    async fn lists_model_catalog() {
        let base = spawn_app().await;
        let body: Value = reqwest::get(format!("{}/api/models", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["models"][1], "gpt-oss-120b");
    }
}
