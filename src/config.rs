//! Configuration management for RAX FS
//!
//! One `config.toml` carries a `[store]` table for the server and a
//! `[client]` table for the SDK. Environment variables override both, e.g.
//! `RAX_FS_STORE__PORT=9000` or `RAX_FS_CLIENT__VOL_NAME=ltptest`.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ClientError;
use crate::storage::validation::is_valid_volume_name;

const DEFAULT_CONFIG_PATH: &str = "config";
const ENV_PREFIX: &str = "RAX_FS";

/// Complete configuration file
#[derive(Debug, Deserialize, Clone)]
pub struct FsConfig {
    pub store: StoreConfig,
    pub client: ClientConfig,
}

/// Store server configuration (restart required for every field)
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// IP address to bind the control connection
    pub bind_address: String,

    /// Port for the control connection, 0 picks an ephemeral port
    pub port: u16,

    /// Directory holding one subdirectory per volume
    pub store_root: String,

    /// Volumes a client may mount
    pub volumes: Vec<String>,

    /// Maximum concurrent mounted sessions
    pub max_clients: usize,

    /// Maximum request line length in bytes
    pub max_command_length: usize,

    /// Maximum payload accepted by APPE and WRITE
    pub max_payload_size: usize,
}

/// SDK client configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Store address as `host:port`
    pub master_addr: String,

    /// Volume mounted right after connecting
    pub vol_name: String,

    pub connect_timeout_secs: u64,

    pub request_timeout_secs: u64,

    /// Largest payload sent in one request, larger writes are split
    pub max_payload_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 17010,
            store_root: "./store_root".to_string(),
            volumes: vec!["ltptest".to_string()],
            max_clients: 64,
            max_command_length: 4096,
            max_payload_size: 4 * 1024 * 1024,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            master_addr: "127.0.0.1:17010".to_string(),
            vol_name: "ltptest".to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
            max_payload_size: 4 * 1024 * 1024,
        }
    }
}

impl FsConfig {
    /// Load `config.toml` from the working directory with environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` (extension optional). A missing file falls back to
    /// the built-in defaults.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let store = StoreConfig::default();
        let client = ClientConfig::default();

        let settings = Config::builder()
            .set_default("store.bind_address", store.bind_address)?
            .set_default("store.port", store.port as i64)?
            .set_default("store.store_root", store.store_root)?
            .set_default("store.volumes", store.volumes)?
            .set_default("store.max_clients", store.max_clients as i64)?
            .set_default("store.max_command_length", store.max_command_length as i64)?
            .set_default("store.max_payload_size", store.max_payload_size as i64)?
            .set_default("client.master_addr", client.master_addr)?
            .set_default("client.vol_name", client.vol_name)?
            .set_default("client.connect_timeout_secs", client.connect_timeout_secs as i64)?
            .set_default("client.request_timeout_secs", client.request_timeout_secs as i64)?
            .set_default("client.max_payload_size", client.max_payload_size as i64)?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: FsConfig = settings.try_deserialize()?;
        config.store.validate()?;
        config.client.validate()?;
        Ok(config)
    }
}

impl StoreConfig {
    /// Validation for all store values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.is_empty() {
            return Err(ConfigError::Message("bind_address cannot be empty".into()));
        }

        if self.store_root.is_empty() {
            return Err(ConfigError::Message("store_root cannot be empty".into()));
        }

        if self.volumes.is_empty() {
            return Err(ConfigError::Message(
                "at least one volume must be configured".into(),
            ));
        }

        if let Some(bad) = self.volumes.iter().find(|v| !is_valid_volume_name(v)) {
            return Err(ConfigError::Message(format!("invalid volume name: {:?}", bad)));
        }

        if self.max_clients == 0 {
            return Err(ConfigError::Message(
                "max_clients must be greater than 0".into(),
            ));
        }

        if self.max_command_length < 64 {
            return Err(ConfigError::Message(
                "max_command_length must be at least 64".into(),
            ));
        }

        if self.max_payload_size == 0 {
            return Err(ConfigError::Message(
                "max_payload_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Get bind address and port as socket address
    pub fn control_socket(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn store_root_path(&self) -> PathBuf {
        PathBuf::from(&self.store_root)
    }

    pub fn volume_root(&self, volume: &str) -> PathBuf {
        self.store_root_path().join(volume)
    }

    pub fn has_volume(&self, volume: &str) -> bool {
        self.volumes.iter().any(|v| v == volume)
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.master_addr.is_empty() {
            return Err(ConfigError::Message("master_addr cannot be empty".into()));
        }

        if !is_valid_volume_name(&self.vol_name) {
            return Err(ConfigError::Message(format!(
                "invalid vol_name: {:?}",
                self.vol_name
            )));
        }

        if self.connect_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(ConfigError::Message("timeouts must be greater than 0".into()));
        }

        if self.max_payload_size == 0 {
            return Err(ConfigError::Message(
                "max_payload_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Set a single option by name.
    ///
    /// Accepts both the snake_case field names and the camelCase keys of
    /// the C SDK (`volName`, `masterAddr`).
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ClientError> {
        let parse_num = |v: &str| {
            v.parse::<u64>()
                .map_err(|_| ClientError::Config(format!("{} expects a number, got {:?}", key, v)))
        };

        match key {
            "masterAddr" | "master_addr" => self.master_addr = value.to_string(),
            "volName" | "vol_name" => self.vol_name = value.to_string(),
            "connectTimeout" | "connect_timeout_secs" => {
                self.connect_timeout_secs = parse_num(value)?
            }
            "requestTimeout" | "request_timeout_secs" => {
                self.request_timeout_secs = parse_num(value)?
            }
            "maxPayloadSize" | "max_payload_size" => {
                self.max_payload_size = parse_num(value)? as usize
            }
            _ => return Err(ClientError::Config(format!("unknown option {:?}", key))),
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(StoreConfig::default().validate().is_ok());
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("absent");
        let config = FsConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.store.volumes, vec!["ltptest".to_string()]);
        assert_eq!(config.client.vol_name, "ltptest");
    }

    #[test]
    fn file_overrides_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("fs.toml");
        std::fs::write(
            &path,
            "[store]\nport = 0\nvolumes = [\"a\", \"b\"]\n\n[client]\nvol_name = \"b\"\n",
        )
        .unwrap();

        let config = FsConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.store.port, 0);
        assert!(config.store.has_volume("a"));
        assert!(!config.store.has_volume("ltptest"));
        assert_eq!(config.client.vol_name, "b");
        assert_eq!(config.client.request_timeout_secs, 30);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut store = StoreConfig::default();
        store.volumes = vec!["../etc".into()];
        assert!(store.validate().is_err());

        let mut store = StoreConfig::default();
        store.max_clients = 0;
        assert!(store.validate().is_err());

        let mut client = ClientConfig::default();
        client.request_timeout_secs = 0;
        assert!(client.validate().is_err());
    }

    #[test]
    fn set_accepts_sdk_keys() {
        let mut client = ClientConfig::default();
        client.set("volName", "vol1").unwrap();
        client.set("masterAddr", "10.0.0.1:17010").unwrap();
        client.set("request_timeout_secs", "3").unwrap();
        assert_eq!(client.vol_name, "vol1");
        assert_eq!(client.master_addr, "10.0.0.1:17010");
        assert_eq!(client.request_timeout(), Duration::from_secs(3));

        assert!(client.set("followerRead", "true").is_err());
        assert!(client.set("connectTimeout", "soon").is_err());
    }
}
