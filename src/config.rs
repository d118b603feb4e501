use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use anyhow::Result;

const APP_DIR_NAME: &str = "docchat";
const URL_ENV_VAR: &str = "DOCCHAT_URL";

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_MODELS: [&str; 4] = ["gemma:2b", "gemma:7b", "llama3:8b", "mistral:7b"];

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_models() -> Vec<String> {
    DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Models the backend accepts for `/query`.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    #[serde(default)]
    pub last_model: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            models: default_models(),
            last_model: None,
        }
    }
}

impl Config {
    /// Get the application data directory
    pub fn get_app_data_dir() -> PathBuf {
        let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(APP_DIR_NAME);

        if !path.exists() {
            let _ = std::fs::create_dir_all(&path);
        }
        path
    }

    fn config_path() -> PathBuf {
        Self::get_app_data_dir().join("config.json")
    }

    pub fn load() -> Config {
        Self::load_from(&Self::config_path())
    }

    /// Missing or unreadable files yield the defaults.
    pub fn load_from(path: &Path) -> Config {
        let mut config = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("Ignoring corrupt config {:?}: {}", path, e);
                Config::default()
            }),
            Err(_) => Config::default(),
        };
        if config.models.is_empty() {
            config.models = default_models();
        }
        config
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn save_model(model: &str) -> Result<()> {
        let mut config = Config::load();
        config.last_model = Some(model.to_string());
        config.save()
    }

    /// `DOCCHAT_URL` (from the environment or `.env`) wins over the file.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(URL_ENV_VAR) {
            if !url.trim().is_empty() {
                self.base_url = url.trim().to_string();
            }
        }
        self
    }

    /// The saved model if it is still offered, otherwise the first one.
    pub fn initial_model(&self) -> String {
        self.last_model
            .as_ref()
            .filter(|m| self.models.contains(m))
            .cloned()
            .or_else(|| self.models.first().cloned())
            .unwrap_or_default()
    }
}
