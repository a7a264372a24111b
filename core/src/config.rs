//! Runtime configuration.
//!
//! Loaded from a TOML file merged with `EMSURVEY_`-prefixed environment
//! variables over built-in defaults. Nested keys use a double underscore:
//!
//! ```text
//! EMSURVEY_LINK__READ_TIMEOUT_MS=8000
//! EMSURVEY_STORAGE__DIR=/sdcard/emsurvey
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::link::SENSOR_ADDRESS;
use crate::logging::LogFormat;
use crate::storage::{FileStore, JsonRepository, DEFAULT_COLLECTION_KEY};

pub const ENV_PREFIX: &str = "EMSURVEY_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Hardware address of the sensor to discover among bonded devices.
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// How long a read may wait for the sensor's response line.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Serial endpoints of devices bonded with this host.
    #[serde(default)]
    pub bonded: Vec<BondedPort>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BondedPort {
    pub address: String,
    #[serde(default)]
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
    /// Key the project collection is stored under.
    #[serde(default = "default_storage_key")]
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Coloured output for the pretty and compact formats.
    #[serde(default = "default_ansi")]
    pub ansi: bool,
}

fn default_address() -> String {
    SENSOR_ADDRESS.to_string()
}

fn default_read_timeout() -> u64 {
    5000
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_storage_key() -> String {
    DEFAULT_COLLECTION_KEY.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ansi() -> bool {
    true
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            name: None,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout(),
            baud_rate: default_baud_rate(),
            bonded: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            key: default_storage_key(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            ansi: default_ansi(),
        }
    }
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            link: LinkConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SurveyConfig {
    /// Load `path` (if present) and the environment over the defaults, then validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: SurveyConfig = Figment::from(Serialized::defaults(SurveyConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.address.trim().is_empty() {
            return Err(ConfigError::Invalid("device.address must not be empty".to_string()));
        }
        if self.link.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "link.read_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.storage.key.trim().is_empty() {
            return Err(ConfigError::Invalid("storage.key must not be empty".to_string()));
        }
        crate::logging::parse_level(&self.logging.level).map_err(ConfigError::Invalid)?;
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.link.read_timeout_ms)
    }

    /// File-backed repository at the configured location.
    pub fn repository(&self) -> JsonRepository<FileStore> {
        JsonRepository::new(FileStore::new(&self.storage.dir), self.storage.key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Repository;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = SurveyConfig::default();
        assert_eq!(config.device.address, SENSOR_ADDRESS);
        assert_eq!(config.read_timeout(), Duration::from_secs(5));
        assert_eq!(config.storage.key, "results");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = SurveyConfig::load_from("absent.toml").unwrap();
            assert_eq!(config, SurveyConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "survey.toml",
                r#"
                [device]
                address = "AA:BB:CC:DD:EE:FF"
                name = "bench sensor"

                [link]
                read_timeout_ms = 2500

                [[link.bonded]]
                address = "AA:BB:CC:DD:EE:FF"
                name = "bench sensor"
                path = "/dev/rfcomm0"

                [storage]
                dir = "surveys"
                "#,
            )?;
            jail.set_env("EMSURVEY_STORAGE__KEY", "field_results");
            jail.set_env("EMSURVEY_LOGGING__LEVEL", "debug");

            let config = SurveyConfig::load_from("survey.toml").unwrap();
            assert_eq!(config.device.address, "AA:BB:CC:DD:EE:FF");
            assert_eq!(config.device.name.as_deref(), Some("bench sensor"));
            assert_eq!(config.link.read_timeout_ms, 2500);
            assert_eq!(config.link.baud_rate, 9600);
            assert_eq!(config.link.bonded[0].path, "/dev/rfcomm0");
            assert_eq!(config.storage.dir, PathBuf::from("surveys"));
            assert_eq!(config.storage.key, "field_results");
            assert_eq!(config.logging.level, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.toml", "[link]\nread_timeout_ms = 0\n")?;
            assert!(matches!(
                SurveyConfig::load_from("bad.toml"),
                Err(ConfigError::Invalid(_))
            ));

            jail.create_file("level.toml", "[logging]\nlevel = \"loud\"\n")?;
            assert!(matches!(
                SurveyConfig::load_from("level.toml"),
                Err(ConfigError::Invalid(_))
            ));
            Ok(())
        });
    }

    #[test]
    fn test_repository_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SurveyConfig::default();
        config.storage.dir = dir.path().to_path_buf();
        let repo = config.repository();
        assert_eq!(repo.key(), "results");
        assert!(repo.list().unwrap().is_empty());
    }
}
