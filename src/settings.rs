//! Shared persistent settings store.
//!
//! A flat string map kept in `settings.toml` inside the data directory. The
//! supervisor writes to it only before any worker is initialized; workers
//! read it afterwards.

use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Key the admin credential digest is stored under.
pub const CREDENTIAL_KEY: &str = "password";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    /// Load settings from `path`; a missing file yields empty settings.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        tracing::trace!(path = %path.display(), "Loading settings");

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write settings to `path`, replacing the previous file in one rename.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let write_err = |source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let content = toml::to_string_pretty(self)?;
        let staging = path.with_extension("toml.tmp");
        fs::write(&staging, content).map_err(write_err)?;
        fs::rename(&staging, path).map_err(write_err)?;

        tracing::trace!(path = %path.display(), "Settings saved");
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Set `key` to `value`, or remove it when `value` is `None`.
    pub fn set(&mut self, key: &str, value: Option<String>) {
        match value {
            Some(value) => {
                self.values.insert(key.to_string(), value);
            }
            None => {
                self.values.remove(key);
            }
        }
    }

    /// Store the digest of `plain` as the credential; an empty value clears it.
    /// Returns the stored digest.
    pub fn apply_credential(&mut self, plain: &str) -> Option<String> {
        let digest = (!plain.is_empty()).then(|| credential_digest(plain));
        self.set(CREDENTIAL_KEY, digest.clone());
        digest
    }
}

/// SHA-512 of `plain`, lowercase hex.
pub fn credential_digest(plain: &str) -> String {
    hex::encode(Sha512::digest(plain.as_bytes()))
}

/// Load, update the credential, and save in one step.
pub fn set_credential(path: &Path, plain: &str) -> Result<Option<String>, SettingsError> {
    let mut settings = Settings::load(path)?;
    let digest = settings.apply_credential(plain);
    settings.save(path)?;
    Ok(digest)
}
