//! Server settings with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name of the server settings inside the config directory.
pub const SERVER_SETTINGS_FILE_NAME: &str = "server.ron";

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    /// Simulation ticks per second.
    pub tps: u32,
    /// Address to bind the listening transport to.
    pub ip: String,
    /// Port to listen at.
    pub port: u16,
    /// Maximum number of concurrent transport sessions.
    pub max_connections: u32,
    /// Directory containing one sub-directory per world.
    pub worlds_directory: PathBuf,
    /// Worlds loaded (or created) at startup. The first one receives new players.
    pub default_worlds: Vec<String>,
    /// Voxel type catalogue, relative to the config directory.
    pub voxel_types_file: PathBuf,
    /// Unauthenticated sessions are dropped after this many milliseconds.
    pub auth_timeout_ms: u64,
    /// Undecodable messages tolerated from an authenticated client before it is kicked.
    pub max_malformed_packets: u32,
    /// Log filter (e.g. "info", "debug,strata_net=trace").
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            tps: 32,
            ip: "127.0.0.1".to_string(),
            port: 28280,
            max_connections: 128,
            worlds_directory: PathBuf::from("worlds"),
            default_worlds: vec!["world".to_string()],
            voxel_types_file: PathBuf::from("voxeltypes.json"),
            auth_timeout_ms: 5_000,
            max_malformed_packets: 8,
            log_level: "info".to_string(),
        }
    }
}

impl ServerSettings {
    /// Load settings from the given directory, or create a default settings file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(SERVER_SETTINGS_FILE_NAME);

        if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(ConfigError::ReadError)?;
            let settings: ServerSettings =
                ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded server settings from {}", path.display());
            Ok(settings)
        } else {
            let settings = ServerSettings::default();
            settings.save(config_dir)?;
            log::info!("Created default server settings at {}", path.display());
            Ok(settings)
        }
    }

    /// Save settings to the given directory as `server.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(SERVER_SETTINGS_FILE_NAME), serialized)
            .map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Restore defaults for values that can't be used.
    ///
    /// Returns one human-readable warning per restored field; an empty list
    /// means the settings were already valid.
    pub fn validate(&mut self) -> Vec<String> {
        let defaults = ServerSettings::default();
        let mut warnings = Vec::new();

        if self.tps == 0 {
            self.tps = defaults.tps;
            warnings.push(format!("tps must be positive, restored default {}", self.tps));
        }
        if self.ip.trim().is_empty() {
            self.ip = defaults.ip;
            warnings.push(format!("ip not configured, restored default {}", self.ip));
        }
        if self.port == 0 {
            self.port = defaults.port;
            warnings.push(format!("port not configured, restored default {}", self.port));
        }
        if self.max_connections == 0 {
            self.max_connections = defaults.max_connections;
            warnings.push(format!(
                "max_connections must be positive, restored default {}",
                self.max_connections
            ));
        }
        if self.worlds_directory.as_os_str().is_empty() {
            self.worlds_directory = defaults.worlds_directory;
            warnings.push(format!(
                "worlds_directory not configured, restored default {}",
                self.worlds_directory.display()
            ));
        }
        if self.voxel_types_file.as_os_str().is_empty() {
            self.voxel_types_file = defaults.voxel_types_file;
            warnings.push(format!(
                "voxel_types_file not configured, restored default {}",
                self.voxel_types_file.display()
            ));
        }
        if self.default_worlds.iter().any(|w| w.trim().is_empty()) {
            self.default_worlds.retain(|w| !w.trim().is_empty());
            warnings.push("removed empty names from default_worlds".to_string());
        }

        warnings
    }

    /// `ip:port` as a single bind string.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_serialize() {
        let settings = ServerSettings::default();
        let ron_str =
            ron::ser::to_string_pretty(&settings, ron::ser::PrettyConfig::new()).unwrap();
        assert!(ron_str.contains("port: 28280"));
        assert!(ron_str.contains("tps: 32"));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: ServerSettings = ron::from_str("(port: 9000)").unwrap();
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.tps, 32);
        assert_eq!(settings.default_worlds, vec!["world".to_string()]);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ServerSettings::load_or_create(dir.path()).unwrap();
        assert_eq!(settings, ServerSettings::default());
        assert!(dir.path().join(SERVER_SETTINGS_FILE_NAME).exists());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = ServerSettings::default();
        settings.port = 30000;
        settings.default_worlds = vec!["lobby".into(), "arena".into()];
        settings.save(dir.path()).unwrap();

        let loaded = ServerSettings::load_or_create(dir.path()).unwrap();
        assert_eq!(settings, loaded);
    }

    #[test]
    fn test_invalid_ron_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SERVER_SETTINGS_FILE_NAME), "{{nope").unwrap();
        let result = ServerSettings::load_or_create(dir.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validate_restores_defaults() {
        let mut settings = ServerSettings {
            tps: 0,
            port: 0,
            ip: " ".into(),
            ..ServerSettings::default()
        };
        let warnings = settings.validate();
        assert_eq!(warnings.len(), 3);
        assert_eq!(settings.tps, 32);
        assert_eq!(settings.port, 28280);
        assert_eq!(settings.ip, "127.0.0.1");
    }

    #[test]
    fn test_validate_accepts_good_settings() {
        let mut settings = ServerSettings::default();
        assert!(settings.validate().is_empty());
    }

    #[test]
    fn test_bind_address() {
        let settings = ServerSettings::default();
        assert_eq!(settings.bind_address(), "127.0.0.1:28280");
    }
}
