//! Configuration file support

use chatty_ai::{DEFAULT_BASE_URL, DEFAULT_MODEL, client::API_KEY_ENV};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable holding the unlock password
pub const PASSWORD_ENV: &str = "CHATTY_PASSWORD";

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "CHATTY_CONFIG_PATH";

/// Configuration for chatty
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model to request completions from
    pub model: Option<String>,
    /// Base URL of the chat-completions API
    pub base_url: Option<String>,
    /// Stream replies token by token
    pub stream: Option<bool>,
    /// Whether to use TUI mode by default
    pub tui: Option<bool>,
    /// Color theme ("dark" or "light")
    pub theme: Option<String>,
    /// Where the conversation and unlock marker are kept
    pub data_dir: Option<PathBuf>,
    /// API key (alternative to OPENAI_API_KEY)
    pub api_key: Option<String>,
    /// Unlock password (alternative to CHATTY_PASSWORD)
    pub password: Option<String>,
}

impl Config {
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chatty")
    }

    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`; a missing or broken file gives defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Write the commented example config if no file exists yet
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }

    pub fn model(&self) -> String {
        self.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(chatty_core::FileStorage::default_dir)
    }

    /// API key from config, then the environment
    pub fn api_key(&self) -> Option<String> {
        non_empty(self.api_key.clone()).or_else(|| non_empty(std::env::var(API_KEY_ENV).ok()))
    }

    /// Password from config, then the environment
    pub fn password(&self) -> Option<String> {
        non_empty(self.password.clone()).or_else(|| non_empty(std::env::var(PASSWORD_ENV).ok()))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# chatty configuration file
# Place at ~/.config/chatty/config.toml (Linux) or set CHATTY_CONFIG_PATH

# Model to use
model = "gpt-4o"

# OpenAI-compatible API base URL
base_url = "https://api.openai.com/v1"

# Stream replies as they are generated
stream = true

# Whether to use TUI mode by default
# Set to false for simple stdin/stdout mode
tui = true

# Color theme: "dark" or "light"
theme = "dark"

# Where chat history and the unlock marker are stored (optional)
# data_dir = "~/.local/share/chatty"

# API key (optional - OPENAI_API_KEY is used otherwise)
# api_key = "sk-..."

# Password for the login screen (optional - CHATTY_PASSWORD is used otherwise)
# The password only keeps casual users out. It is compared in plain text and
# the unlock is remembered on disk. This is a public playground: don't enter
# sensitive or personal information.
# password = "..."
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.stream, Some(true));
        assert_eq!(config.theme.as_deref(), Some("dark"));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_missing_file_is_default() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_from(&tmp.path().join("nope.toml"));
        assert!(config.model.is_none());
        assert_eq!(config.model(), DEFAULT_MODEL);
        assert_eq!(config.base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_invalid_file_is_default() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "model = [").unwrap();
        assert!(Config::load_from(&path).model.is_none());
    }

    #[test]
    fn test_load_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "model = \"gpt-4o-mini\"\nstream = false\n").unwrap();
        let config = Config::load_from(&path);
        assert_eq!(config.model(), "gpt-4o-mini");
        assert_eq!(config.stream, Some(false));
        assert!(config.tui.is_none());
    }

    #[test]
    fn test_configured_secrets_win() {
        let config = Config {
            api_key: Some("sk-config".into()),
            password: Some("open sesame".into()),
            ..Default::default()
        };
        assert_eq!(config.api_key().as_deref(), Some("sk-config"));
        assert_eq!(config.password().as_deref(), Some("open sesame"));
    }

    #[test]
    fn test_blank_values_ignored() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some("x".into())).as_deref(), Some("x"));
    }
}
