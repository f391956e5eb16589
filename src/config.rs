use crate::error::SupervisorError;
use crate::supervisor::{RouterOptions, WorkerRole};
use crate::worker::subsystems;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_IDLE_THRESHOLD_MS: u64 = 1_000;
const DEFAULT_IDLE_SLEEP_MS: u64 = 1_000;

/// One worker the supervisor spawns, in spawn order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub name: String,
    #[serde(default)]
    pub role: WorkerRole,
}

impl WorkerSpec {
    pub fn new(name: impl Into<String>, role: WorkerRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    pub fn cooperative(name: impl Into<String>) -> Self {
        Self::new(name, WorkerRole::Cooperative)
    }

    pub fn foreground(name: impl Into<String>) -> Self {
        Self::new(name, WorkerRole::Foreground)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Router polls with no traffic for this long before it starts sleeping
    pub idle_threshold_ms: u64,
    /// Sleep between idle router passes
    pub idle_sleep_ms: u64,
    /// Workers in registry order; shutdown runs in reverse
    pub workers: Vec<WorkerSpec>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            idle_threshold_ms: DEFAULT_IDLE_THRESHOLD_MS,
            idle_sleep_ms: DEFAULT_IDLE_SLEEP_MS,
            workers: subsystems::BUILTIN
                .iter()
                .map(|name| WorkerSpec::new(*name, subsystems::default_role(name)))
                .collect(),
        }
    }
}

impl GatewayConfig {
    /// $NORN_CONFIG_DIR/config.toml or ~/.config/norn/config.toml
    pub fn config_path() -> PathBuf {
        crate::clienv::config_path()
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading gateway config");

        if !path.exists() {
            tracing::trace!("Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        tracing::trace!(workers = config.workers.len(), "Gateway config loaded");
        Ok(config)
    }

    /// Reject worker sets the supervisor cannot run.
    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.workers.is_empty() {
            return Err(SupervisorError::InvalidConfig("no workers configured".into()));
        }

        let mut seen = HashSet::new();
        for spec in &self.workers {
            if !seen.insert(spec.name.as_str()) {
                return Err(SupervisorError::InvalidConfig(format!(
                    "worker '{}' is listed twice",
                    spec.name
                )));
            }
            if !subsystems::is_builtin(&spec.name) {
                return Err(SupervisorError::InvalidConfig(format!(
                    "unknown worker subsystem '{}' (expected one of: {})",
                    spec.name,
                    subsystems::BUILTIN.join(", ")
                )));
            }
        }

        let foreground = self
            .workers
            .iter()
            .filter(|w| w.role == WorkerRole::Foreground)
            .count();
        if foreground > 1 {
            return Err(SupervisorError::InvalidConfig(format!(
                "at most one foreground worker is allowed, found {}",
                foreground
            )));
        }

        Ok(())
    }

    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            idle_threshold: Duration::from_millis(self.idle_threshold_ms),
            idle_sleep: Duration::from_millis(self.idle_sleep_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_worker_set() {
        let config = GatewayConfig::default();
        let names: Vec<&str> = config.workers.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["database", "io_manager", "tcp", "webapi"]);
        assert_eq!(config.workers[3].role, WorkerRole::Foreground);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_worker_list() {
        let config: GatewayConfig = toml::from_str(
            r#"
            idle_sleep_ms = 250

            [[workers]]
            name = "database"

            [[workers]]
            name = "webapi"
            role = "foreground"
            "#,
        )
        .unwrap();

        assert_eq!(config.idle_sleep_ms, 250);
        assert_eq!(config.idle_threshold_ms, DEFAULT_IDLE_THRESHOLD_MS);
        assert_eq!(
            config.workers,
            vec![
                WorkerSpec::cooperative("database"),
                WorkerSpec::foreground("webapi")
            ]
        );
        assert_eq!(config.router_options().idle_sleep, Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_duplicates() {
        let config = GatewayConfig {
            workers: vec![
                WorkerSpec::cooperative("tcp"),
                WorkerSpec::cooperative("tcp"),
            ],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SupervisorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_two_foreground_workers() {
        let config = GatewayConfig {
            workers: vec![
                WorkerSpec::foreground("tcp"),
                WorkerSpec::foreground("webapi"),
            ],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_subsystem() {
        let config = GatewayConfig {
            workers: vec![WorkerSpec::cooperative("mainframe")],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("mainframe"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = GatewayConfig::load_from(Path::new("/nonexistent/norn/config.toml")).unwrap();
        assert_eq!(config, GatewayConfig::default());
    }
}
