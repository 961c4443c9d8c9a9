//! Persistent CLI profile configuration.
//!
//! Each profile stands for one device: its own local database, the shared
//! remote collection it syncs with, and the user it is signed in as.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vibenote_core::SyncSettings;

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "cli-config.json";
const APP_DIR_NAME: &str = "vibenote";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfilesConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, CliProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfile {
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub remote_path: Option<PathBuf>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub sync: Option<SyncSettings>,
}

const fn default_config_version() -> u32 {
    1
}

pub fn app_config_dir() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI config directory".to_string()))
}

pub fn app_data_dir() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    Ok(app_config_dir()?.join(CONFIG_FILE_NAME))
}

pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    vibenote_core::util::normalize_text_option(value)
}

pub fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    normalize_text_option(value.map(ToOwned::to_owned))
}

fn normalize_path_option(value: Option<PathBuf>) -> Option<PathBuf> {
    value.filter(|path| !path.as_os_str().is_empty())
}

impl CliProfilesConfig {
    pub fn load() -> Result<Self, CliError> {
        Self::load_from_path(&default_config_path()?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|error| {
            CliError::Config(format!(
                "Failed to read config at {}: {}",
                path.display(),
                error
            ))
        })?;
        let mut config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            CliError::Config(format!(
                "Failed to parse config at {}: {}",
                path.display(),
                error
            ))
        })?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, CliError> {
        let path = default_config_path()?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), CliError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                CliError::Config(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                ))
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)?;
        std::fs::write(path, serialized).map_err(|error| {
            CliError::Config(format!(
                "Failed to write config at {}: {}",
                path.display(),
                error
            ))
        })
    }

    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        let from_env = std::env::var("VIBENOTE_PROFILE").ok();
        Self::pick_profile_name(explicit, from_env.as_deref(), self.active_profile.as_deref())
    }

    fn pick_profile_name(
        explicit: Option<&str>,
        from_env: Option<&str>,
        active: Option<&str>,
    ) -> String {
        normalize_profile_name(explicit)
            .or_else(|| normalize_profile_name(from_env))
            .or_else(|| normalize_profile_name(active))
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn profile(&self, name: &str) -> Option<&CliProfile> {
        self.profiles.get(name)
    }

    pub fn profile_mut_or_default(&mut self, name: &str) -> &mut CliProfile {
        self.profiles.entry(name.to_string()).or_default()
    }

    fn normalize(&mut self) {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        for profile in self.profiles.values_mut() {
            profile.normalize();
        }
    }
}

impl CliProfile {
    pub fn user_id(&self) -> Option<String> {
        normalize_text_option(self.user_id.clone())
    }

    pub fn sync_settings(&self) -> SyncSettings {
        self.sync.unwrap_or_default()
    }

    fn normalize(&mut self) {
        self.user_id = normalize_text_option(self.user_id.take());
        self.db_path = normalize_path_option(self.db_path.take());
        self.remote_path = normalize_path_option(self.remote_path.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_profile_name_rejects_empty() {
        assert_eq!(normalize_profile_name(None), None);
        assert_eq!(normalize_profile_name(Some(" ")), None);
        assert_eq!(normalize_profile_name(Some(" laptop ")), Some("laptop".to_string()));
    }

    #[test]
    fn config_roundtrip_normalizes_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = CliProfilesConfig {
            version: 1,
            active_profile: Some(" laptop ".to_string()),
            profiles: BTreeMap::new(),
        };
        config.profiles.insert(
            "laptop".to_string(),
            CliProfile {
                db_path: Some(PathBuf::from("/tmp/laptop.db")),
                remote_path: Some(PathBuf::new()),
                user_id: Some("  user-42 ".to_string()),
                sync: Some(SyncSettings {
                    poll_interval_ms: 250,
                    ..SyncSettings::default()
                }),
            },
        );

        config.save_to_path(&path).unwrap();
        let loaded = CliProfilesConfig::load_from_path(&path).unwrap();

        assert_eq!(loaded.active_profile.as_deref(), Some("laptop"));
        let profile = loaded.profile("laptop").unwrap();
        assert_eq!(profile.user_id.as_deref(), Some("user-42"));
        assert_eq!(profile.remote_path, None);
        assert_eq!(profile.sync_settings().poll_interval_ms, 250);
    }

    #[test]
    fn missing_config_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = CliProfilesConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, CliProfilesConfig::default());
    }

    #[test]
    fn malformed_config_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            CliProfilesConfig::load_from_path(&path),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn profile_name_prefers_explicit_then_env_then_active() {
        assert_eq!(
            CliProfilesConfig::pick_profile_name(Some("phone"), Some("env"), Some("work")),
            "phone"
        );
        assert_eq!(
            CliProfilesConfig::pick_profile_name(None, Some("env"), Some("work")),
            "env"
        );
        assert_eq!(
            CliProfilesConfig::pick_profile_name(Some(" "), None, Some("work")),
            "work"
        );
        assert_eq!(CliProfilesConfig::pick_profile_name(None, None, None), "default");
    }
}
