use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_URL: &str = "https://api.cerebras.ai/v1";
pub const DEFAULT_MODEL: &str = "gpt-oss-120b";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Extra or overriding entries for the built-in pricing table.
    #[serde(default)]
    pub pricing: Vec<PricingEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model used until the user picks one in settings.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Stream article generation (records a real TTFT) instead of one JSON reply.
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_model: default_model(),
            stream: false,
            max_tokens: None,
            temperature: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 5173 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub directory: Option<String>,
    pub retention_days: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PricingEntry {
    pub model: String,
    /// USD per million prompt tokens.
    pub input: f64,
    /// USD per million completion tokens.
    pub output: f64,
}

impl Config {
    pub fn load_with_path() -> Result<(Self, Option<PathBuf>)> {
        let mut candidates = Vec::new();

        if let Ok(explicit) = std::env::var("LATENTSPACE_CONFIG") {
            candidates.push(PathBuf::from(explicit));
        }

        candidates.push(PathBuf::from("latentspace.toml"));

        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("latentspace").join("latentspace.toml"));
        }

        candidates.push(crate::paths::latentspace_home().join("latentspace.toml"));

        for path in candidates {
            if path.exists() {
                let config = Self::from_file(&path)?;
                return Ok((config, Some(path)));
            }
        }

        Ok((Config::default(), None))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Config at {:?} is invalid: {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Only http(s) endpoints; the credential is sent along with every request.
        let url_lower = self.provider.base_url.trim().to_lowercase();
        if !url_lower.starts_with("http://") && !url_lower.starts_with("https://") {
            anyhow::bail!(
                "provider.base_url must start with http:// or https://, got: {}",
                self.provider.base_url
            );
        }
        if self.provider.default_model.trim().is_empty() {
            anyhow::bail!("provider.default_model cannot be empty");
        }
        if let Some(t) = self.provider.temperature {
            if !(0.0..=2.0).contains(&t) {
                anyhow::bail!("provider.temperature must be within 0..=2, got {}", t);
            }
        }
        if self.provider.request_timeout_secs == 0 {
            anyhow::bail!("provider.request_timeout_secs must be greater than 0");
        }
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }
        for entry in &self.pricing {
            if entry.model.trim().is_empty() {
                anyhow::bail!("Pricing entry model cannot be empty");
            }
            if entry.input < 0.0 || entry.output < 0.0 {
                anyhow::bail!("Pricing for '{}' must not be negative", entry.model);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.provider.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.provider.default_model, DEFAULT_MODEL);
        assert_eq!(config.server.port, 5173);
        assert!(!config.provider.stream);
        config.validate().unwrap();
    }

    #[test]
    fn parses_pricing_overrides() {
        let config: Config = toml::from_str(
            r#"
            [provider]
            base_url = "http://127.0.0.1:9000/v1"
            stream = true

            [[pricing]]
            model = "house-model"
            input = 0.5
            output = 1.5
            "#,
        )
        .unwrap();
        assert!(config.provider.stream);
        assert_eq!(config.pricing.len(), 1);
        assert_eq!(config.pricing[0].model, "house-model");
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config::default();
        config.provider.base_url = "file:///etc/passwd".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.provider.temperature = Some(3.5);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pricing.push(PricingEntry {
            model: "m".into(),
            input: -1.0,
            output: 0.0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_reports_path_on_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("latentspace.toml");
        fs::write(&path, "[server]\nport = \"not a number\"\n").unwrap();
        let err = Config::from_file(&path).unwrap_err().to_string();
        assert!(err.contains("is invalid"));
    }
}
