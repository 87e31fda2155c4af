use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ExoError, Result};

const ENV_PREFIX: &str = "EXO_CHAT";

/// Which route family the backend mounts the chat endpoints under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiFlavor {
    /// `/messages/conversations`, `/messages/convo/:id`, `/messages/ws`
    #[default]
    Messages,
    /// `/chat/conversations`, `/chat/conversations/:id/messages`, `/chat/ws`
    Chat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub flavor: ApiFlavor,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_secs: 10,
            flavor: ApiFlavor::Messages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatSettings {
    /// How long a received typing signal keeps the indicator lit.
    pub typing_timeout_ms: u64,
    /// Delay before the single reconnect attempt after the socket drops.
    pub reconnect_delay_ms: u64,
    /// How long a socket send may stay unconfirmed before it is rolled back.
    pub ack_timeout_secs: u64,
    /// Largest accepted message body, in bytes.
    pub max_message_size: usize,
    /// Re-sort the message list by `created_at` after every insertion.
    pub strict_ordering: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            typing_timeout_ms: 2000,
            reconnect_delay_ms: 1500,
            ack_timeout_secs: 15,
            max_message_size: 4000,
            strict_ordering: false,
        }
    }
}

impl ChatSettings {
    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AuthSettings {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiSettings,
    pub chat: ChatSettings,
    pub auth: AuthSettings,
}

/// Loads and persists [`AppConfig`].
///
/// Sources are layered: defaults, then the TOML file, then `EXO_CHAT__*`
/// environment variables.
pub struct ConfigService {
    config: AppConfig,
    path: PathBuf,
}

impl ConfigService {
    /// Load from the platform config directory.
    pub fn new() -> Result<Self> {
        Self::load(&default_config_path())
    }

    /// Load from an explicit file path. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self> {
        let defaults = config::Config::try_from(&AppConfig::default())
            .map_err(|e| ExoError::ConfigError(format!("Build defaults: {}", e)))?;

        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ExoError::ConfigError(format!("Load {:?}: {}", path, e)))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| ExoError::ConfigError(format!("Parse {:?}: {}", path, e)))?;

        log::info!(
            "Loaded config from {:?} (api={}, flavor={:?})",
            path,
            config.api.base_url,
            config.api.flavor
        );

        Ok(Self {
            config,
            path: path.to_path_buf(),
        })
    }

    pub fn get(&self) -> AppConfig {
        self.config.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remember a session token entered at the sign-in prompt.
    pub fn save_token(&mut self, token: &str) -> Result<()> {
        self.config.auth.token = Some(token.trim().to_string());
        self.save()?;
        log::info!("Saved session token to {:?}", self.path);
        Ok(())
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = toml::to_string_pretty(&self.config)
            .map_err(|e| ExoError::ConfigError(format!("Serialize config: {}", e)))?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("exo-chat").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(".exo-chat/config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let service = ConfigService::load(&tmp.path().join("absent.toml")).unwrap();
        let config = service.get();
        assert_eq!(config.chat.typing_timeout_ms, 2000);
        assert_eq!(config.api.flavor, ApiFlavor::Messages);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[api]
base_url = "https://exo.example"
flavor = "chat"

[chat]
strict_ordering = true
"#,
        )
        .unwrap();

        let config = ConfigService::load(&path).unwrap().get();
        assert_eq!(config.api.base_url, "https://exo.example");
        assert_eq!(config.api.flavor, ApiFlavor::Chat);
        assert!(config.chat.strict_ordering);
        // untouched keys keep their defaults
        assert_eq!(config.chat.reconnect_delay_ms, 1500);
    }

    #[test]
    fn test_saved_token_survives_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");
        let mut service = ConfigService::load(&path).unwrap();
        service.save_token("  jwt-token\n").unwrap();
        assert_eq!(service.get().auth.token.as_deref(), Some("jwt-token"));

        let reloaded = ConfigService::load(&path).unwrap().get();
        assert_eq!(reloaded.auth.token.as_deref(), Some("jwt-token"));
        assert_eq!(reloaded.chat, ChatSettings::default());
    }

    #[test]
    fn test_durations() {
        let chat = ChatSettings::default();
        assert_eq!(chat.typing_timeout(), Duration::from_secs(2));
        assert_eq!(chat.ack_timeout(), Duration::from_secs(15));
    }
}
