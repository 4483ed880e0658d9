use crate::error::{KvDocError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 100;

/// How a [`Store`](crate::Store) is opened.
///
/// ```yaml
/// path: data/app.db          # omit for an in-memory store
/// model_file: data/model.yaml
/// watch_model: true
/// watch_debounce_ms: 100
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Substrate file. `None` keeps everything in memory.
    pub path: Option<PathBuf>,
    /// Schema descriptor. `None` starts with an empty schema.
    pub model_file: Option<PathBuf>,
    /// Reload the schema when `model_file` changes on disk.
    pub watch_model: bool,
    pub watch_debounce_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: None,
            model_file: None,
            watch_model: false,
            watch_debounce_ms: DEFAULT_WATCH_DEBOUNCE_MS,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_model_file(mut self, model_file: impl Into<PathBuf>) -> Self {
        self.model_file = Some(model_file.into());
        self
    }

    pub fn watch_model(mut self, watch: bool) -> Self {
        self.watch_model = watch;
        self
    }

    /// Parse a YAML configuration document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: StoreConfig = serde_yaml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    /// Read a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.watch_model && self.model_file.is_none() {
            return Err(KvDocError::Config(
                "watch_model is set but no model_file is configured".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, StoreConfig::in_memory());
        assert_eq!(config.watch_debounce(), Duration::from_millis(100));
    }

    #[test]
    fn test_full_config() {
        let config = StoreConfig::from_yaml_str(
            "path: /var/lib/app.db\nmodel_file: model.json\nwatch_model: true\nwatch_debounce_ms: 250\n",
        )
        .unwrap();
        assert_eq!(config.path.as_deref(), Some(Path::new("/var/lib/app.db")));
        assert_eq!(config.model_file.as_deref(), Some(Path::new("model.json")));
        assert!(config.watch_model);
        assert_eq!(config.watch_debounce(), Duration::from_millis(250));
    }

    #[test]
    fn test_watch_requires_model_file() {
        let err = StoreConfig::from_yaml_str("watch_model: true").unwrap_err();
        assert!(matches!(err, KvDocError::Config(_)));
    }

    #[test]
    fn test_builder() {
        let config = StoreConfig::at("app.db")
            .with_model_file("model.yaml")
            .watch_model(true);
        assert!(config.check().is_ok());
        assert_eq!(config.path.as_deref(), Some(Path::new("app.db")));
    }
}
