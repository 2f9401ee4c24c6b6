//! The command surface the UI drives: navigate, explore, back, forward, go
//! home, settings.
//!
//! Every command that changes what should be on screen takes a new request
//! generation. A completion only commits to history if its generation is
//! still the latest when it returns, so a slow response can never land on top
//! of newer navigation.

use crate::completion::{ChatCompletion, CompletionRequest};
use crate::error::GenerationError;
use crate::history::{History, NavigationRecord};
use crate::journey::{self, CapturedJourney, SummaryRequest};
use crate::metrics::{Metrics, PricingTable};
use crate::pipeline::{self, GeneratedPage};
use crate::prompt::{self, ArticleStyle};
use crate::sanitize::{self, InternalLink};
use crate::settings::{Preferences, PreferencesView};
use crate::store::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Request knobs that come from process configuration rather than the user.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub stream: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationOutcome {
    /// The result is now the current page.
    Committed,
    /// Newer navigation happened while this request was in flight; the
    /// result was discarded.
    Superseded,
    /// Nothing to do (blank topic, empty journey).
    Ignored,
}

/// The current record with its links resolved for the navigation handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleView {
    pub topic: String,
    pub html: String,
    pub metrics: Option<Metrics>,
    pub internal_links: Vec<InternalLink>,
    pub external_links: Vec<String>,
}

impl ArticleView {
    fn from_record(record: &NavigationRecord) -> Self {
        let links = sanitize::rewrite_links(&record.content);
        Self {
            topic: record.topic.clone(),
            html: links.html,
            metrics: record.metrics.clone(),
            internal_links: links.internal_links,
            external_links: links.external_links,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserSnapshot {
    pub current: Option<ArticleView>,
    pub cursor: i64,
    pub topics: Vec<String>,
    pub can_go_back: bool,
    pub can_go_forward: bool,
    /// Retrospective of the last journey, shown on the home page.
    pub home: Option<GeneratedPage>,
    pub last_journey: Vec<String>,
    pub preferences: PreferencesView,
}

pub struct Browser<C> {
    client: C,
    store: Arc<dyn KeyValueStore>,
    pricing: PricingTable,
    options: GenerationOptions,
    history: Mutex<History>,
    preferences: RwLock<Preferences>,
    home: RwLock<Option<GeneratedPage>>,
    generation: AtomicU64,
}

impl<C: ChatCompletion> Browser<C> {
    pub fn new(
        client: C,
        store: Arc<dyn KeyValueStore>,
        default_model: &str,
        env_api_key: Option<String>,
        pricing: PricingTable,
        options: GenerationOptions,
    ) -> Self {
        let history = History::restore(store.clone());
        let preferences = Preferences::load(store.as_ref(), default_model, env_api_key);
        Self {
            client,
            store,
            pricing,
            options,
            history: Mutex::new(history),
            preferences: RwLock::new(preferences),
            home: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_latest(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Generate an article for `topic` and push it. On error history is
    /// left untouched.
    pub async fn navigate(&self, topic: &str) -> Result<NavigationOutcome, GenerationError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Ok(NavigationOutcome::Ignored);
        }
        let generation = self.next_generation();
        let path = self.history.lock().await.path_topics();
        let (credential, model, style) = {
            let prefs = self.preferences.read().await;
            (prefs.effective_api_key(), prefs.model.clone(), prefs.style)
        };
        tracing::info!(
            "Navigate: topic={:?}, generation={}, path_len={}",
            topic,
            generation,
            path.len()
        );

        let request = self.article_request(topic, &path, model, style);
        let result =
            pipeline::generate(&self.client, credential.as_deref(), &request, &self.pricing).await;

        let mut history = self.history.lock().await;
        if !self.is_latest(generation) {
            match &result {
                Ok(_) => tracing::info!("Discarding stale article for {:?} (generation {})", topic, generation),
                Err(e) => tracing::info!("Discarding stale failure for {:?}: {}", topic, e),
            }
            return Ok(NavigationOutcome::Superseded);
        }
        let page = result?;
        history.push(NavigationRecord::new(topic, page.html, Some(page.metrics)));
        Ok(NavigationOutcome::Committed)
    }

    /// Explore a text selection from the current article.
    pub async fn explore(&self, selection: &str) -> Result<NavigationOutcome, GenerationError> {
        let context = self
            .history
            .lock()
            .await
            .current()
            .map(|r| r.topic.clone())
            .unwrap_or_default();
        match prompt::selection_topic(&context, selection) {
            Some(topic) => self.navigate(&topic).await,
            None => Ok(NavigationOutcome::Ignored),
        }
    }

    /// Follow an internal link of the current article.
    pub async fn follow(&self, link: &InternalLink) -> Result<NavigationOutcome, GenerationError> {
        match link.next_topic() {
            Some(topic) => self.navigate(topic).await,
            None => Ok(NavigationOutcome::Ignored),
        }
    }

    /// Returns whether the cursor moved. Any pending navigation is superseded.
    pub async fn back(&self) -> bool {
        self.next_generation();
        self.history.lock().await.back()
    }

    pub async fn forward(&self) -> bool {
        self.next_generation();
        self.history.lock().await.forward()
    }

    /// Capture the journey, clear history, and summarize the journey for the
    /// home page. The journey is saved before history is cleared, so a failed
    /// summary still leaves it recoverable.
    pub async fn go_home(&self) -> Result<NavigationOutcome, GenerationError> {
        let generation = self.next_generation();
        let records = {
            let mut history = self.history.lock().await;
            if history.records().is_empty() {
                return Ok(NavigationOutcome::Ignored);
            }
            let captured = CapturedJourney::new(history.records().to_vec());
            if let Err(e) = captured.save(self.store.as_ref()) {
                tracing::warn!("Failed to persist journey: {}", e);
            }
            history.clear()
        };
        *self.home.write().await = None;

        let (credential, model) = {
            let prefs = self.preferences.read().await;
            (prefs.effective_api_key(), prefs.model.clone())
        };
        let summary = journey::summarize(
            &self.client,
            &records,
            SummaryRequest {
                credential: credential.as_deref(),
                model: &model,
                max_tokens: self.options.max_tokens,
                temperature: self.options.temperature,
            },
            &self.pricing,
        )
        .await;

        let mut home = self.home.write().await;
        if !self.is_latest(generation) {
            tracing::info!("Discarding stale journey summary (generation {})", generation);
            return Ok(NavigationOutcome::Superseded);
        }
        *home = Some(summary?);
        Ok(NavigationOutcome::Committed)
    }

    /// `key: None` keeps the saved credential.
    pub async fn save_credential(
        &self,
        key: Option<&str>,
        model: &str,
        style: ArticleStyle,
    ) -> PreferencesView {
        let mut prefs = self.preferences.write().await;
        if let Err(e) = prefs.save_credential(self.store.as_ref(), key, model, style) {
            tracing::warn!("Failed to persist settings: {}", e);
        }
        prefs.view()
    }

    pub async fn toggle_dark_mode(&self) -> bool {
        let mut prefs = self.preferences.write().await;
        if let Err(e) = prefs.toggle_dark_mode(self.store.as_ref()) {
            tracing::warn!("Failed to persist dark mode: {}", e);
        }
        prefs.dark_mode
    }

    pub async fn preferences(&self) -> PreferencesView {
        self.preferences.read().await.view()
    }

    pub async fn snapshot(&self) -> BrowserSnapshot {
        let history = self.history.lock().await;
        let state = history.state();
        BrowserSnapshot {
            current: state.current().map(ArticleView::from_record),
            cursor: state.cursor_index(),
            topics: state.records.iter().map(|r| r.topic.clone()).collect(),
            can_go_back: state.can_go_back(),
            can_go_forward: state.can_go_forward(),
            home: self.home.read().await.clone(),
            last_journey: CapturedJourney::load_last(self.store.as_ref())
                .map(|j| j.records.into_iter().map(|r| r.topic).collect())
                .unwrap_or_default(),
            preferences: self.preferences.read().await.view(),
        }
    }

    fn article_request(
        &self,
        topic: &str,
        path: &[String],
        model: String,
        style: ArticleStyle,
    ) -> CompletionRequest {
        CompletionRequest {
            prompt: prompt::build_article_prompt(topic, path, style),
            model,
            stream: self.options.stream,
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionResult;
    use crate::metrics::{Measurement, TokenUsage};
    use crate::store::{MemoryStore, HISTORY_KEY};
    use std::future::Future;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Answers with an article titled after the prompt topic. Topics containing
    /// "Slow" wait on `release`; topics containing "Broken" fail.
    #[derive(Default)]
    struct FakeClient {
        calls: AtomicUsize,
        prompts: std::sync::Mutex<Vec<String>>,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl ChatCompletion for FakeClient {
        fn complete(
            &self,
            credential: Option<&str>,
            request: &CompletionRequest,
        ) -> impl Future<Output = Result<CompletionResult, GenerationError>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.prompt.user.clone());
            let has_key = credential.is_some();
            let first_line = request.prompt.user.lines().next().unwrap_or_default().to_string();
            let entered = self.entered.clone();
            let release = self.release.clone();
            async move {
                if !has_key {
                    return Err(GenerationError::missing_credential());
                }
                if first_line.contains("Slow") {
                    entered.notify_one();
                    release.notified().await;
                }
                if first_line.contains("Broken") {
                    return Err(GenerationError::Provider {
                        status: 404,
                        message: "model not found".into(),
                    });
                }
                let title = first_line.trim_start_matches("Generate an article about: ");
                Ok(CompletionResult {
                    content: format!(
                        "```html\n<h1>{}</h1><a href=\"#\" data-prompt=\"{} > Next\">next</a>\n```",
                        title, title
                    ),
                    measurement: Measurement::non_streaming(
                        Duration::from_millis(500),
                        Some(TokenUsage {
                            prompt_tokens: 10,
                            completion_tokens: 20,
                            total_tokens: 30,
                        }),
                    ),
                })
            }
        }
    }

    fn browser_with(store: Arc<dyn KeyValueStore>) -> Browser<FakeClient> {
        Browser::new(
            FakeClient::default(),
            store,
            "gpt-oss-120b",
            None,
            PricingTable::builtin(),
            GenerationOptions::default(),
        )
    }

    async fn keyed_browser() -> Browser<FakeClient> {
        let browser = browser_with(Arc::new(MemoryStore::new()));
        browser
            .save_credential(Some("test-key"), "gpt-oss-120b", ArticleStyle::Short)
            .await;
        browser
    }

    async fn topics(browser: &Browser<FakeClient>) -> Vec<String> {
        browser.snapshot().await.topics
    }

    #[tokio::test]
    async fn navigate_pushes_sanitized_record_with_metrics() {
        let browser = keyed_browser().await;
        assert_eq!(browser.navigate("Cats").await.unwrap(), NavigationOutcome::Committed);

        let snap = browser.snapshot().await;
        let current = snap.current.unwrap();
        assert_eq!(current.topic, "Cats");
        assert!(current.html.starts_with("<h1>Cats</h1>"));
        assert_eq!(current.internal_links[0].next_topic(), Some("Cats > Next"));
        assert_eq!(current.metrics.unwrap().total_tokens, 30);
        assert_eq!(snap.cursor, 0);
    }

    #[tokio::test]
    async fn chain_context_flows_into_prompts() {
        let browser = keyed_browser().await;
        browser.navigate("Cats").await.unwrap();
        browser.navigate("Dogs").await.unwrap();
        browser.navigate("Cats > Lions").await.unwrap();

        let prompts = browser.client.prompts.lock().unwrap();
        assert!(!prompts[0].contains("Context chain"));
        assert!(prompts[1].contains("Context chain: Cats > Dogs"));
        // Pre-chained topics are passed through without prior topics.
        assert!(!prompts[2].contains("Dogs"));
    }

    #[tokio::test]
    async fn back_then_navigate_discards_forward_branch() {
        let browser = keyed_browser().await;
        browser.navigate("Cats").await.unwrap();
        browser.navigate("Dogs").await.unwrap();
        assert!(browser.back().await);
        browser.navigate("Birds").await.unwrap();
        assert_eq!(topics(&browser).await, vec!["Cats", "Birds"]);
        assert!(!browser.forward().await);
    }

    #[tokio::test]
    async fn failure_leaves_history_unchanged() {
        let browser = keyed_browser().await;
        browser.navigate("Cats").await.unwrap();
        let err = browser.navigate("Broken topic").await.unwrap_err();
        assert_eq!(err.kind(), "provider");
        assert_eq!(topics(&browser).await, vec!["Cats"]);
    }

    #[tokio::test]
    async fn missing_credential_surfaces_authentication_error() {
        let browser = browser_with(Arc::new(MemoryStore::new()));
        let err = browser.navigate("Cats").await.unwrap_err();
        assert!(err.needs_credential());
        assert!(topics(&browser).await.is_empty());
        assert!(!browser.snapshot().await.preferences.has_api_key);
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let browser = keyed_browser().await;
        assert_eq!(browser.navigate("   ").await.unwrap(), NavigationOutcome::Ignored);
        assert_eq!(browser.explore(" \n ").await.unwrap(), NavigationOutcome::Ignored);
        assert_eq!(browser.client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_response_is_discarded() {
        let browser = Arc::new(keyed_browser().await);
        let slow = {
            let browser = browser.clone();
            tokio::spawn(async move { browser.navigate("Slow topic").await })
        };
        browser.client.entered.notified().await;

        assert_eq!(browser.navigate("Fast").await.unwrap(), NavigationOutcome::Committed);
        browser.client.release.notify_one();

        assert_eq!(slow.await.unwrap().unwrap(), NavigationOutcome::Superseded);
        assert_eq!(topics(&browser).await, vec!["Fast"]);
    }

    #[tokio::test]
    async fn back_supersedes_pending_navigation() {
        let browser = Arc::new(keyed_browser().await);
        browser.navigate("Cats").await.unwrap();
        browser.navigate("Dogs").await.unwrap();
        let slow = {
            let browser = browser.clone();
            tokio::spawn(async move { browser.navigate("Slow topic").await })
        };
        browser.client.entered.notified().await;
        assert!(browser.back().await);
        browser.client.release.notify_one();

        assert_eq!(slow.await.unwrap().unwrap(), NavigationOutcome::Superseded);
        let snap = browser.snapshot().await;
        assert_eq!(snap.topics, vec!["Cats", "Dogs"]);
        assert_eq!(snap.current.unwrap().topic, "Cats");
    }

    #[tokio::test]
    async fn explore_chains_selection_onto_current_topic() {
        let browser = keyed_browser().await;
        browser.navigate("Apple (fruit)").await.unwrap();
        browser.explore("  seed\ndormancy ").await.unwrap();
        assert_eq!(
            topics(&browser).await,
            vec!["Apple (fruit)", "Apple (fruit) > seed dormancy"]
        );
    }

    #[tokio::test]
    async fn follow_uses_navigation_prompt() {
        let browser = keyed_browser().await;
        browser.navigate("Cats").await.unwrap();
        let link = browser.snapshot().await.current.unwrap().internal_links[0].clone();
        browser.follow(&link).await.unwrap();
        assert_eq!(topics(&browser).await, vec!["Cats", "Cats > Next"]);
    }

    #[tokio::test]
    async fn following_a_link_without_topic_is_ignored() {
        let browser = keyed_browser().await;
        let image_link = InternalLink {
            display_text: String::new(),
            navigation_prompt: None,
        };
        assert_eq!(browser.follow(&image_link).await.unwrap(), NavigationOutcome::Ignored);
        assert_eq!(browser.client.calls.load(Ordering::SeqCst), 0);
        assert!(topics(&browser).await.is_empty());
    }

    #[tokio::test]
    async fn go_home_captures_journey_and_summarizes() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let browser = browser_with(store.clone());
        browser.save_credential(Some("k"), "gpt-oss-120b", ArticleStyle::Short).await;
        browser.navigate("Cats").await.unwrap();
        browser.navigate("Cats > Lions").await.unwrap();

        assert_eq!(browser.go_home().await.unwrap(), NavigationOutcome::Committed);
        let snap = browser.snapshot().await;
        assert!(snap.current.is_none());
        assert_eq!(snap.cursor, -1);
        assert!(snap.topics.is_empty());
        assert_eq!(snap.last_journey, vec!["Cats", "Cats > Lions"]);
        assert!(snap.home.is_some());

        let raw = store.get(HISTORY_KEY).unwrap().unwrap();
        assert!(raw.contains("\"cursor\":-1"));

        let prompts = browser.client.prompts.lock().unwrap();
        assert!(prompts.last().unwrap().contains("Cartographer"));
    }

    #[tokio::test]
    async fn failed_summary_keeps_saved_journey() {
        let browser = keyed_browser().await;
        browser.navigate("Cats").await.unwrap();
        browser.save_credential(Some(""), "gpt-oss-120b", ArticleStyle::Short).await;

        let err = browser.go_home().await.unwrap_err();
        assert!(err.needs_credential());
        let snap = browser.snapshot().await;
        assert!(snap.topics.is_empty());
        assert!(snap.home.is_none());
        assert_eq!(snap.last_journey, vec!["Cats"]);
    }

    #[tokio::test]
    async fn go_home_with_empty_history_is_ignored() {
        let browser = keyed_browser().await;
        assert_eq!(browser.go_home().await.unwrap(), NavigationOutcome::Ignored);
        assert_eq!(browser.client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn history_survives_restart() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        {
            let browser = browser_with(store.clone());
            browser.save_credential(Some("k"), "zai-glm-4.6", ArticleStyle::Short).await;
            browser.navigate("Cats").await.unwrap();
            browser.toggle_dark_mode().await;
        }
        let browser = browser_with(store);
        let snap = browser.snapshot().await;
        assert_eq!(snap.topics, vec!["Cats"]);
        assert_eq!(snap.preferences.model, "zai-glm-4.6");
        assert!(snap.preferences.dark_mode);
        assert!(snap.preferences.has_api_key);
    }
}
