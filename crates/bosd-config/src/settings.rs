use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Volatile store; dev and test only.
    Memory,
    #[default]
    Redb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redb,
            path: PathBuf::from("/var/lib/bosd/state.redb"),
        }
    }
}

/// Base URLs of the external collaborators, one per service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub pcs: String,
    pub hsm: String,
    pub bss: String,
    pub ims: String,
    pub cfs: String,
    pub s3_gateway: String,
    pub tapms: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            pcs: "http://cray-power-control/v1".into(),
            hsm: "http://cray-smd/hsm/v2".into(),
            bss: "http://cray-bss/boot/v1".into(),
            ims: "http://cray-ims/v3".into(),
            cfs: "http://cray-cfs-api/v3".into(),
            s3_gateway: "http://rgw-vip".into(),
            tapms: "http://cray-tapms/apis".into(),
        }
    }
}

/// Service configuration loaded once at startup. Everything tunable at
/// runtime lives in the store's options record instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Bind address of the REST server.
    pub bind: String,
    pub store: StoreConfig,
    pub endpoints: EndpointConfig,
    /// Bearer token presented to the collaborators, when the mesh wants one.
    pub bearer_token: Option<String>,
    /// Directory of per-operator liveness files consumed by the probe.
    pub liveness_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            store: StoreConfig::default(),
            endpoints: EndpointConfig::default(),
            bearer_token: None,
            liveness_dir: PathBuf::from("/tmp/bosd-liveness"),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind.is_empty() {
            return Err(ConfigError::Invalid("bind address is empty".into()));
        }
        if self.store.backend == StoreBackend::Redb
            && self.store.path.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid(
                "redb store backend requires a store path".into(),
            ));
        }
        Ok(())
    }
}

/// Load the service configuration from a YAML file; a missing `path` of
/// `None` yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            debug!("loading service config from {}", path.display());
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
            serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
                path: path.display().to_string(),
                source: e,
            })?
        }
        None => ServiceConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_a_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.store.backend, StoreBackend::Redb);
    }

    #[test]
    fn partial_yaml_merges_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "bind: \"127.0.0.1:9000\"\nstore:\n  backend: memory\n"
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        // Untouched section keeps its defaults.
        assert_eq!(config.endpoints.hsm, "http://cray-smd/hsm/v2");
    }

    #[test]
    fn unreadable_file_is_an_io_error() {
        let err = load_config(Some(Path::new("/no/such/config.yml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn bad_yaml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bind: [unterminated").unwrap();
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::YamlParse { .. }));
    }

    #[test]
    fn empty_bind_is_rejected() {
        let config = ServiceConfig {
            bind: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
