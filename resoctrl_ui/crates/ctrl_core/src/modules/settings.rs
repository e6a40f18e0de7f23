use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

pub const SETTINGS_KEY: &str = "resolume_settings";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;

type Entries = serde_json::Map<String, serde_json::Value>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    #[serde(alias = "ip")]
    pub host: String,
    pub port: u16,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ConnectionSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.host.trim().is_empty() {
            return Err(SettingsError::Invalid("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(SettingsError::Invalid("port must not be 0".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not resolve a config directory")]
    NoConfigDir,
    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn open_default() -> Result<Self, SettingsError> {
        Ok(Self::new(default_settings_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> ConnectionSettings {
        match self.try_load().await {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                debug!(path = %self.path.display(), "no stored settings, using defaults");
                ConnectionSettings::default()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "stored settings unreadable, using defaults");
                ConnectionSettings::default()
            }
        }
    }

    pub async fn try_load(&self) -> Result<Option<ConnectionSettings>, SettingsError> {
        let Some(entries) = self.read_entries().await? else {
            return Ok(None);
        };
        let Some(value) = entries.get(SETTINGS_KEY) else {
            return Ok(None);
        };
        let settings: ConnectionSettings = serde_json::from_value(value.clone())?;
        settings.validate()?;
        Ok(Some(settings))
    }

    pub async fn save(&self, settings: &ConnectionSettings) -> Result<(), SettingsError> {
        settings.validate()?;

        let mut entries = match self.read_entries().await {
            Ok(entries) => entries.unwrap_or_default(),
            Err(SettingsError::Json(e)) => {
                warn!(error = %e, "discarding corrupt settings file");
                Entries::new()
            }
            Err(e) => return Err(e),
        };
        entries.insert(SETTINGS_KEY.to_string(), serde_json::to_value(settings)?);

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&entries)?).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn read_entries(&self) -> Result<Option<Entries>, SettingsError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }
}

pub fn default_settings_path() -> Result<PathBuf, SettingsError> {
    let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
    Ok(dir.join("resoctrl").join("settings.json"))
}
