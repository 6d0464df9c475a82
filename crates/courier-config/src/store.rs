//! Runtime owner of the active configuration.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::loader::ConfigLoader;
use crate::schema::QueueConfig;
use crate::validator::ConfigValidator;

/// Holds the active [`QueueConfig`] and persists every accepted update.
///
/// Readers get a cloned snapshot, so a config update never changes values
/// underneath an operation that already started.
pub struct ConfigStore {
    config: RwLock<QueueConfig>,
    path: Option<PathBuf>,
}

impl ConfigStore {
    /// Open the config file at `path`, or start from defaults if it does
    /// not exist yet. Invalid configs are rejected.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = if path.exists() {
            ConfigLoader::load(&path)?
        } else {
            debug!("No config at {:?}, using defaults", path);
            QueueConfig::default()
        };
        Self::check(&config)?;

        Ok(Self {
            config: RwLock::new(config),
            path: Some(path),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory(config: QueueConfig) -> Self {
        Self {
            config: RwLock::new(config),
            path: None,
        }
    }

    /// Path of the backing config file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Snapshot of the current configuration.
    pub fn get(&self) -> QueueConfig {
        self.config.read().clone()
    }

    /// Merge a partial JSON object over the current config.
    ///
    /// The merged config is validated and persisted before it becomes
    /// active; on any error the previous config stays in place.
    pub fn update(&self, partial: Value) -> Result<QueueConfig, ConfigError> {
        let mut merged = serde_json::to_value(self.get())?;
        merge_json(&mut merged, partial);
        let updated: QueueConfig = serde_json::from_value(merged)?;
        self.replace(updated)
    }

    /// Apply a typed mutation to a copy of the config, then validate and
    /// persist it like [`ConfigStore::update`].
    pub fn update_with<F>(&self, f: F) -> Result<QueueConfig, ConfigError>
    where
        F: FnOnce(&mut QueueConfig),
    {
        let mut updated = self.get();
        f(&mut updated);
        self.replace(updated)
    }

    /// Write the current config to its file.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config = self.get();
        self.persist(&config)
    }

    fn replace(&self, updated: QueueConfig) -> Result<QueueConfig, ConfigError> {
        Self::check(&updated)?;
        self.persist(&updated)?;
        *self.config.write() = updated.clone();
        info!("Queue configuration updated");
        Ok(updated)
    }

    fn persist(&self, config: &QueueConfig) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(config)?;
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;

        debug!("Saved config to {:?}", path);
        Ok(())
    }

    fn check(config: &QueueConfig) -> Result<(), ConfigError> {
        let result = ConfigValidator::validate(config);
        for warning in &result.warnings {
            warn!("config {}: {}", warning.path, warning.message);
        }
        match result.errors.into_iter().next() {
            Some(error) => Err(ConfigError::InvalidValue {
                field: error.path,
                message: error.message,
            }),
            None => Ok(()),
        }
    }
}

/// Recursively merge `patch` into `base`. Objects merge key by key, any
/// other value replaces the target.
fn merge_json(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                merge_json(base_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, patch) => *base = patch,
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
