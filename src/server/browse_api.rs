use crate::browser::{BrowserSnapshot, NavigationOutcome};
use crate::completion::ChatCompletion;
use crate::sanitize::InternalLink;
use crate::server::{ApiError, ServerState};
use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub(crate) struct NavigateRequest {
    topic: String,
}

#[derive(Deserialize)]
pub(crate) struct ExploreRequest {
    selection: String,
}

/// Result of a command plus the state the UI should render next.
#[derive(Serialize)]
pub(crate) struct CommandResponse {
    outcome: NavigationOutcome,
    state: BrowserSnapshot,
}

async fn respond<C: ChatCompletion>(
    state: &ServerState<C>,
    outcome: NavigationOutcome,
) -> Json<CommandResponse> {
    Json(CommandResponse {
        outcome,
        state: state.browser.snapshot().await,
    })
}

pub(crate) async fn state_api<C: ChatCompletion + 'static>(
    State(state): State<Arc<ServerState<C>>>,
) -> impl IntoResponse {
    Json(state.browser.snapshot().await)
}

pub(crate) async fn navigate_api<C: ChatCompletion + 'static>(
    State(state): State<Arc<ServerState<C>>>,
    Json(req): Json<NavigateRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let outcome = state.browser.navigate(&req.topic).await?;
    Ok(respond(&*state, outcome).await)
}

pub(crate) async fn follow_api<C: ChatCompletion + 'static>(
    State(state): State<Arc<ServerState<C>>>,
    Json(link): Json<InternalLink>,
) -> Result<Json<CommandResponse>, ApiError> {
    let outcome = state.browser.follow(&link).await?;
    Ok(respond(&*state, outcome).await)
}

pub(crate) async fn explore_api<C: ChatCompletion + 'static>(
    State(state): State<Arc<ServerState<C>>>,
    Json(req): Json<ExploreRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let outcome = state.browser.explore(&req.selection).await?;
    Ok(respond(&*state, outcome).await)
}

pub(crate) async fn back_api<C: ChatCompletion + 'static>(
    State(state): State<Arc<ServerState<C>>>,
) -> Json<CommandResponse> {
    let outcome = if state.browser.back().await {
        NavigationOutcome::Committed
    } else {
        NavigationOutcome::Ignored
    };
    respond(&*state, outcome).await
}

pub(crate) async fn forward_api<C: ChatCompletion + 'static>(
    State(state): State<Arc<ServerState<C>>>,
) -> Json<CommandResponse> {
    let outcome = if state.browser.forward().await {
        NavigationOutcome::Committed
    } else {
        NavigationOutcome::Ignored
    };
    respond(&*state, outcome).await
}

pub(crate) async fn home_api<C: ChatCompletion + 'static>(
    State(state): State<Arc<ServerState<C>>>,
) -> Result<Json<CommandResponse>, ApiError> {
    let outcome = state.browser.go_home().await?;
    Ok(respond(&*state, outcome).await)
}

#[cfg(test)]
mod tests {
    use crate::server::test_support::spawn_app;
    use serde_json::{json, Value};

    async fn post(base: &str, path: &str, body: Value) -> (u16, Value) {
        let resp = reqwest::Client::new()
            .post(format!("{}{}", base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn save_key(base: &str) {
        let resp = reqwest::Client::new()
            .put(format!("{}/api/settings", base))
            .json(&json!({"api_key": "Bearer test-key", "model": "gpt-oss-120b", "style": "short"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn navigate_without_key_asks_for_credential() {
        let base = spawn_app().await;
        let (status, body) = post(&base, "/api/navigate", json!({"topic": "Cats"})).await;
        assert_eq!(status, 401);
        assert_eq!(body["kind"], "authentication");
        assert_eq!(body["open_credential_dialog"], true);
    }

    #[tokio::test]
    async fn navigate_back_forward_and_home() {
        let base = spawn_app().await;
        save_key(&base).await;

        let (status, body) = post(&base, "/api/navigate", json!({"topic": "Cats"})).await;
        assert_eq!(status, 200);
        assert_eq!(body["outcome"], "committed");
        let current = &body["state"]["current"];
        assert_eq!(current["topic"], "Cats");
        assert!(!current["html"].as_str().unwrap().contains("<script"));
        assert_eq!(current["external_links"][0], "https://example.org");
        assert_eq!(current["metrics"]["token_source"], "fragment_count");

        post(&base, "/api/explore", json!({"selection": "whiskers"})).await;
        let (_, body) = post(&base, "/api/back", json!({})).await;
        assert_eq!(body["state"]["cursor"], 0);
        assert_eq!(body["state"]["can_go_forward"], true);
        let (_, body) = post(&base, "/api/forward", json!({})).await;
        assert_eq!(body["state"]["current"]["topic"], "Cats > whiskers");

        let link = json!({"display_text": "Fur", "navigation_prompt": "Cats > Fur"});
        let (status, body) = post(&base, "/api/follow", link).await;
        assert_eq!(status, 200);
        assert_eq!(body["state"]["current"]["topic"], "Cats > Fur");
        assert_eq!(body["state"]["cursor"], 2);

        let (status, body) = post(&base, "/api/home", json!({})).await;
        assert_eq!(status, 200);
        assert_eq!(body["state"]["cursor"], -1);
        assert_eq!(
            body["state"]["last_journey"],
            json!(["Cats", "Cats > whiskers", "Cats > Fur"])
        );
        assert!(body["state"]["home"]["html"].is_string());
    }

    #[tokio::test]
    async fn provider_errors_carry_hint() {
        let base = spawn_app().await;
        let resp = reqwest::Client::new()
            .put(format!("{}/api/settings", base))
            .json(&json!({"api_key": "k", "model": "no-such-model", "style": "short"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let (status, body) = post(&base, "/api/navigate", json!({"topic": "Cats"})).await;
        assert_eq!(status, 502);
        assert_eq!(body["kind"], "provider");
        assert!(body["hint"].as_str().unwrap().contains("model identifier"));
        assert_eq!(body["open_credential_dialog"], false);
    }
}
