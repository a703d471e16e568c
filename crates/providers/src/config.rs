use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use url::Url;

use common::prelude::ProviderContainer;

use crate::server::{ServerError, ServerPersistence};
use crate::web_storage::{LocalStoragePersistence, SessionStoragePersistence, StorageError};
use crate::websocket::{WebSocketError, WebSocketPersistence};

pub const APP_NAME: &str = "signal-buckets";
pub const LOCAL_STORAGE_FILE_NAME: &str = "local-storage.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse providers config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to write providers config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("no platform data directory, set local_storage.path explicitly")]
    NoDataDirectory,
    #[error("local storage: {0}")]
    Storage(#[from] StorageError),
    #[error("server provider: {0}")]
    Server(#[from] ServerError),
    #[error("websocket provider: {0}")]
    WebSocket(#[from] WebSocketError),
}

/// Which providers to build and where they keep their values.
///
/// ```toml
/// [local_storage]
/// path = "/var/lib/my-app/storage.json"
///
/// [server]
/// fetch_url = "https://example.com/values"
/// persist_url = "https://example.com/value"
///
/// [websocket]
/// url = "wss://example.com/signals"
/// auth_token = "secret"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub local_storage: LocalStorageConfig,
    /// HTTP persistence, left out of the container if absent
    #[serde(default)]
    pub server: Option<ServerConfig>,
    /// Websocket persistence, left out of the container if absent
    #[serde(default)]
    pub websocket: Option<WebSocketConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalStorageConfig {
    /// Storage file (defaults to <data dir>/signal-buckets/local-storage.json)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub fetch_url: Url,
    pub persist_url: Url,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketConfig {
    pub url: Url,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl ProvidersConfig {
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load the config file at `path`, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("no providers config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn local_storage_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.local_storage.path {
            return Ok(path.clone());
        }

        let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDirectory)?;
        Ok(data_dir.join(APP_NAME).join(LOCAL_STORAGE_FILE_NAME))
    }

    /// Build a container holding every configured provider.
    ///
    /// Local and session storage are always present. The websocket
    ///  provider connects here, so this needs a running tokio runtime when
    ///  one is configured.
    pub async fn container(&self) -> Result<ProviderContainer, ConfigError> {
        let container = ProviderContainer::new();

        let local = LocalStoragePersistence::open(self.local_storage_path()?)?;
        container.insert(Rc::new(local));
        container.register(SessionStoragePersistence::new);

        if let Some(server) = &self.server {
            let provider =
                ServerPersistence::new(server.fetch_url.clone(), server.persist_url.clone())?;
            container.insert(Rc::new(provider));
        }

        if let Some(websocket) = &self.websocket {
            let provider =
                WebSocketPersistence::connect(websocket.url.clone(), websocket.auth_token.clone())
                    .await?;
            container.insert(Rc::new(provider));
        }

        Ok(container)
    }
}
