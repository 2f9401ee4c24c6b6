use std::path::PathBuf;
use std::sync::OnceLock;

static LATENTSPACE_HOME: OnceLock<PathBuf> = OnceLock::new();

/// Returns the LatentSpace home directory (`~/.latentspace/`).
/// Supports `$LATENTSPACE_HOME` env override. Cached via `OnceLock`.
pub fn latentspace_home() -> &'static PathBuf {
    LATENTSPACE_HOME.get_or_init(|| {
        if let Ok(val) = std::env::var("LATENTSPACE_HOME") {
            let p = PathBuf::from(val);
            if !p.as_os_str().is_empty() {
                return p;
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".latentspace")
    })
}

/// `~/.latentspace/state/`
pub fn state_dir() -> PathBuf {
    latentspace_home().join("state")
}

/// `~/.latentspace/logs/`
pub fn logs_dir() -> PathBuf {
    latentspace_home().join("logs")
}
