use std::path::PathBuf;

/// Environment variables read by norn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvVar {
    NornConfigDir,
    NornDataDir,
    NornLog,
}

impl EnvVar {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvVar::NornConfigDir => "NORN_CONFIG_DIR",
            EnvVar::NornDataDir => "NORN_DATA_DIR",
            EnvVar::NornLog => "NORN_LOG",
        }
    }
}

const FALLBACK_CONFIG_DIR: &str = "~/.config";
const FALLBACK_DATA_DIR: &str = "~/.local/share";
const NORN_SUBDIR: &str = "norn";

fn env_opt(var: EnvVar) -> Option<String> {
    std::env::var(var.as_str()).ok().filter(|v| !v.is_empty())
}

/// Config directory ($NORN_CONFIG_DIR or ~/.config/norn)
pub fn config_dir() -> PathBuf {
    let dir = env_opt(EnvVar::NornConfigDir)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from(FALLBACK_CONFIG_DIR))
                .join(NORN_SUBDIR)
        });
    tracing::trace!(dir = %dir.display(), "Resolved config directory");
    dir
}

/// Data directory ($NORN_DATA_DIR or ~/.local/share/norn)
pub fn data_dir() -> PathBuf {
    let dir = env_opt(EnvVar::NornDataDir)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from(FALLBACK_DATA_DIR))
                .join(NORN_SUBDIR)
        });
    tracing::trace!(dir = %dir.display(), "Resolved data directory");
    dir
}

/// Gateway config file (<config dir>/config.toml)
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Shared settings store (<data dir>/settings.toml)
pub fn settings_path() -> PathBuf {
    data_dir().join("settings.toml")
}

/// Log file path ($NORN_LOG or <data dir>/logs/norn.log)
pub fn log_path() -> PathBuf {
    let path = env_opt(EnvVar::NornLog)
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir().join("logs").join("norn.log"));
    tracing::trace!(path = %path.display(), "Log path");
    path
}
