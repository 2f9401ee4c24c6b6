use thiserror::Error;

/// Failures of the generation pipeline (completion, normalization, journey
/// summaries). These always propagate to the navigation action that started
/// the request; nothing below that point retries or swallows them.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("provider rejected the request ({status}): {message}")]
    Provider { status: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
}

impl GenerationError {
    pub fn missing_credential() -> Self {
        Self::Authentication("no API key configured; add one in settings (BYOK)".to_string())
    }

    /// Short machine-readable label used by the HTTP API.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::Provider { .. } => "provider",
            Self::Transport(_) => "transport",
        }
    }

    /// User-facing remediation hint, if there is a specific one.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Authentication(_) => Some("Open the settings dialog and enter a valid API key."),
            Self::Provider { status: 400 | 404, .. } => Some(
                "Check that the model identifier is correct, e.g. 'gpt-oss-120b' or 'llama3.1-8b'.",
            ),
            _ => None,
        }
    }

    pub fn needs_credential(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                Self::Authentication(err.to_string())
            }
            Some(status) => Self::Provider {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => Self::Transport(err.to_string()),
        }
    }
}

/// Problems reading or writing persisted state. Callers log these and fall
/// back to defaults; they are never shown to the user.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored value for '{key}' is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid state key '{0}'")]
    InvalidKey(String),
    #[error("state encode error: {0}")]
    Encode(#[from] serde_json::Error),
}
