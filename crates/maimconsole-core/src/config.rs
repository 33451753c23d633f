//! Configuration resolution for maimconsole.
//!
//! Resolution order (lowest to highest priority):
//! 1. Built-in defaults
//! 2. Config file (`--config`, else `./config.toml`, else the user config dir)
//! 3. Environment variables
//! 4. CLI arguments (applied by the binary)
//!
//! The file uses the upper-case keys common to MaimCore adapter configs:
//!
//! ```toml
//! [config]
//! MAIMCORE_URL = "ws://127.0.0.1:8000/ws"
//! PLATFORM_NAME = "console_adapter"
//! CONSOLE_USER_ID = "console_user"
//! CONSOLE_NICKNAME = "ConsoleUser"
//! CONSOLE_GROUP_ID = "1"
//! CONSOLE_GROUP_NAME = "ConsoleGroup"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::envelope::{Group, Identity, Sender};
use crate::error::{Error, Result};

/// File name looked up in the working directory and the user config dir.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level layout of the config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub config: AdapterConfig,
}

/// Everything the adapter needs at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    #[serde(rename = "MAIMCORE_URL")]
    pub service_url: String,
    #[serde(rename = "PLATFORM_NAME")]
    pub platform_name: String,
    #[serde(rename = "CONSOLE_USER_ID", deserialize_with = "lenient_string")]
    pub user_id: String,
    #[serde(rename = "CONSOLE_NICKNAME")]
    pub nickname: String,
    /// Absent (or blank) together with `group_name` means private chat.
    #[serde(
        rename = "CONSOLE_GROUP_ID",
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub group_id: Option<String>,
    #[serde(rename = "CONSOLE_GROUP_NAME", skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(rename = "CONNECT_TIMEOUT_SECS")]
    pub connect_timeout_secs: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            service_url: "ws://127.0.0.1:8000/ws".to_string(),
            platform_name: "console_adapter".to_string(),
            user_id: "console_user".to_string(),
            nickname: "ConsoleUser".to_string(),
            group_id: None,
            group_name: None,
            connect_timeout_secs: 10,
        }
    }
}

impl AdapterConfig {
    /// Check the invariants the rest of the adapter relies on.
    pub fn validate(&self) -> Result<()> {
        let url = self.service_url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "MAIMCORE_URL must be a ws:// or wss:// URL, got {url:?}"
            )));
        }
        for (key, value) in [
            ("PLATFORM_NAME", &self.platform_name),
            ("CONSOLE_USER_ID", &self.user_id),
            ("CONSOLE_NICKNAME", &self.nickname),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{key} must not be empty")));
            }
        }
        match self.group_fields() {
            (Some(_), None) => Err(Error::Config(
                "CONSOLE_GROUP_ID is set but CONSOLE_GROUP_NAME is missing".into(),
            )),
            (None, Some(_)) => Err(Error::Config(
                "CONSOLE_GROUP_NAME is set but CONSOLE_GROUP_ID is missing".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Session-fixed metadata for outbound envelopes.
    pub fn identity(&self) -> Identity {
        let group = match self.group_fields() {
            (Some(group_id), Some(group_name)) => Some(Group {
                group_id: group_id.to_string(),
                group_name: group_name.to_string(),
            }),
            _ => None,
        };
        Identity {
            platform: self.platform_name.clone(),
            sender: Sender {
                user_id: self.user_id.clone(),
                nickname: self.nickname.clone(),
            },
            group,
        }
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    fn group_fields(&self) -> (Option<&str>, Option<&str>) {
        (
            blank_to_none(self.group_id.as_deref()),
            blank_to_none(self.group_name.as_deref()),
        )
    }
}

/// A resolved configuration and the file it came from, if any.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AdapterConfig,
    pub source: Option<PathBuf>,
}

/// Candidate config files, in lookup order.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("maimconsole").join(CONFIG_FILE_NAME));
    }
    paths
}

/// Load configuration from the process environment and default locations.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with(explicit, &default_config_paths(), |key| {
        std::env::var(key).ok()
    })
}

/// Load configuration with explicit lookup locations and environment.
///
/// An `explicit` path must exist. Without one, the first existing candidate
/// is used, and built-in defaults apply when none exists.
pub fn load_config_with(
    explicit: Option<&Path>,
    candidates: &[PathBuf],
    env: impl Fn(&str) -> Option<String>,
) -> Result<LoadedConfig> {
    let source = match explicit {
        Some(path) if !path.is_file() => {
            return Err(Error::Config(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }
        Some(path) => Some(path.to_path_buf()),
        None => candidates.iter().find(|p| p.is_file()).cloned(),
    };

    let mut config = match &source {
        Some(path) => load_config_file(path)?,
        None => AdapterConfig::default(),
    };
    apply_env_overrides(&mut config, env);
    Ok(LoadedConfig { config, source })
}

fn load_config_file(path: &Path) -> Result<AdapterConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let file: ConfigFile = toml::from_str(&content)?;
    Ok(file.config)
}

fn apply_env_overrides(config: &mut AdapterConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(val) = env("MAIMCONSOLE_URL") {
        config.service_url = val;
    }
    if let Some(val) = env("MAIMCONSOLE_PLATFORM") {
        config.platform_name = val;
    }
    if let Some(val) = env("MAIMCONSOLE_USER_ID") {
        config.user_id = val;
    }
    if let Some(val) = env("MAIMCONSOLE_NICKNAME") {
        config.nickname = val;
    }
    if let Some(val) = env("MAIMCONSOLE_GROUP_ID") {
        config.group_id = Some(val);
    }
    if let Some(val) = env("MAIMCONSOLE_GROUP_NAME") {
        config.group_name = Some(val);
    }
}

fn blank_to_none(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrInt {
    Str(String),
    Int(i64),
}

impl From<StringOrInt> for String {
    fn from(value: StringOrInt) -> Self {
        match value {
            StringOrInt::Str(s) => s,
            StringOrInt::Int(i) => i.to_string(),
        }
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    StringOrInt::deserialize(d).map(String::from)
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<StringOrInt>::deserialize(d)?.map(String::from))
}
