use crate::error::PersistenceError;
use crate::prompt::ArticleStyle;
use crate::store::{self, KeyValueStore, API_KEY_KEY, DARK_MODE_KEY, MODEL_KEY, STYLE_KEY};
use serde::{Deserialize, Serialize};

/// Models offered by the settings dialog.
pub const MODEL_CATALOG: &[&str] = &[
    "qwen-3-32b",
    "gpt-oss-120b",
    "qwen-3-235b-a22b-instruct-2507",
    "zai-glm-4.6",
];

const API_KEY_ENV: &str = "LATENTSPACE_API_KEY";

// ---------------------------------------------------------------------------
// Persisted format: one JSON value per key (api_key, model, style, dark_mode)
// ---------------------------------------------------------------------------

/// User preferences, loaded at the boundary and passed explicitly to the
/// components that need them.
#[derive(Debug, Clone, PartialEq)]
pub struct Preferences {
    pub api_key: Option<String>,
    pub model: String,
    pub style: ArticleStyle,
    pub dark_mode: bool,
    /// Fallback credential taken from the environment at startup; never persisted.
    pub env_api_key: Option<String>,
}

/// Preferences as shown to a client: the credential is never echoed back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferencesView {
    pub has_api_key: bool,
    pub api_key_hint: Option<String>,
    pub model: String,
    pub style: ArticleStyle,
    pub dark_mode: bool,
}

impl Preferences {
    /// Load from the store. Absent or malformed entries fall back to: no
    /// credential, `default_model`, elaborative style, light mode.
    /// `env_api_key` is used only when no credential is saved.
    pub fn load(store: &dyn KeyValueStore, default_model: &str, env_api_key: Option<String>) -> Self {
        let api_key = store::load_json_or_warn::<String>(store, API_KEY_KEY)
            .and_then(|k| clean_credential(&k));
        let model = store::load_json_or_warn::<String>(store, MODEL_KEY)
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| default_model.to_string());
        let style = store::load_json_or_warn::<ArticleStyle>(store, STYLE_KEY).unwrap_or_default();
        let dark_mode = store::load_json_or_warn::<bool>(store, DARK_MODE_KEY).unwrap_or(false);
        Self {
            api_key,
            model,
            style,
            dark_mode,
            env_api_key: env_api_key.as_deref().and_then(clean_credential),
        }
    }

    /// Credential for outbound calls: the saved one, then the environment's.
    pub fn effective_api_key(&self) -> Option<String> {
        resolve_api_key(self.api_key.as_deref(), self.env_api_key.as_deref())
    }

    /// Store credential, model and style together. `None` keeps the saved
    /// credential and a blank one removes it. The in-memory preferences are
    /// updated even if persisting fails.
    pub fn save_credential(
        &mut self,
        store: &dyn KeyValueStore,
        raw_key: Option<&str>,
        model: &str,
        style: ArticleStyle,
    ) -> Result<(), PersistenceError> {
        if let Some(raw_key) = raw_key {
            self.api_key = clean_credential(raw_key);
        }
        let model = model.trim();
        if !model.is_empty() {
            self.model = model.to_string();
        }
        self.style = style;
        tracing::info!(
            "Settings saved: model={}, style={}, has_api_key={}",
            self.model,
            self.style.as_str(),
            self.api_key.is_some()
        );

        match &self.api_key {
            Some(key) => store::save_json(store, API_KEY_KEY, key)?,
            None => store.remove(API_KEY_KEY)?,
        }
        store::save_json(store, MODEL_KEY, &self.model)?;
        store::save_json(store, STYLE_KEY, &self.style)
    }

    pub fn toggle_dark_mode(&mut self, store: &dyn KeyValueStore) -> Result<bool, PersistenceError> {
        self.dark_mode = !self.dark_mode;
        store::save_json(store, DARK_MODE_KEY, &self.dark_mode)?;
        Ok(self.dark_mode)
    }

    pub fn view(&self) -> PreferencesView {
        let effective = self.effective_api_key();
        PreferencesView {
            has_api_key: effective.is_some(),
            api_key_hint: effective.as_deref().map(redact),
            model: self.model.clone(),
            style: self.style,
            dark_mode: self.dark_mode,
        }
    }
}

/// `$LATENTSPACE_API_KEY`, read once by the binary and handed to [`Preferences::load`].
pub fn api_key_from_env() -> Option<String> {
    std::env::var(API_KEY_ENV).ok()
}

/// Trim whitespace and a leading `Bearer` scheme; blank input is no key.
pub fn clean_credential(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let without_scheme = match trimmed.get(..6) {
        Some(scheme)
            if scheme.eq_ignore_ascii_case("bearer")
                && trimmed[6..].chars().next().map_or(true, char::is_whitespace) =>
        {
            &trimmed[6..]
        }
        _ => trimmed,
    };
    Some(without_scheme.trim())
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

/// Resolve the effective API key. Priority: 1) saved credential 2) environment.
pub fn resolve_api_key(saved: Option<&str>, env: Option<&str>) -> Option<String> {
    saved
        .and_then(clean_credential)
        .or_else(|| env.and_then(clean_credential))
}

/// `***` plus the last four characters, enough to recognise a key.
pub fn redact(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("***{}", tail)
}
