//! Gateway configuration.
//!
//! Layered as: built-in defaults, then an optional TOML file, then
//! `CONSOLE_PROXY__SECTION__KEY` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::engine::DEFAULT_DOCKER_SOCKET;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CONSOLE_PROXY";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub docker: DockerConfig,
    pub exec: ExecConfig,
    pub keepalive: KeepaliveConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Docker daemon socket
    pub socket: PathBuf,
    /// Pin the Engine API version (e.g. "1.43"); unversioned when unset
    pub api_version: Option<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(DEFAULT_DOCKER_SOCKET),
            api_version: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Allocate a TTY unless the request says otherwise
    pub tty: bool,
    /// Run exec processes privileged
    pub privileged: bool,
    /// Allow at most one interactive session per container
    pub single_session: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            tty: true,
            privileged: false,
            single_session: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// How long peers tolerate an idle connection; pings go out at 9/10 of it
    pub pong_wait_secs: u64,
    /// Bound on a single frame send
    pub write_wait_secs: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            pong_wait_secs: 60,
            write_wait_secs: 10,
        }
    }
}

impl KeepaliveConfig {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration, reading `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let config: AppConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.keepalive.pong_wait_secs == 0 {
            return Err(ConfigError::Message(
                "keepalive.pong_wait_secs must be greater than zero".to_string(),
            ));
        }
        if self.keepalive.write_wait_secs == 0 {
            return Err(ConfigError::Message(
                "keepalive.write_wait_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.docker.socket, PathBuf::from("/var/run/docker.sock"));
        assert!(config.exec.tty);
        assert!(config.exec.single_session);
        assert!(!config.exec.privileged);
        assert_eq!(config.keepalive.pong_wait(), Duration::from_secs(60));
        assert_eq!(config.keepalive.write_wait(), Duration::from_secs(10));
    }

    #[test]
    fn test_load_file_overrides_defaults() {
        let file = write_config(
            r#"
[server]
port = 9000

[exec]
single_session = false
privileged = true

[keepalive]
pong_wait_secs = 30
"#,
        );

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert!(!config.exec.single_session);
        assert!(config.exec.privileged);
        assert!(config.exec.tty);
        assert_eq!(config.keepalive.pong_wait_secs, 30);
        assert_eq!(config.keepalive.write_wait_secs, 10);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(AppConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_zero_pong_wait_is_rejected() {
        let file = write_config("[keepalive]\npong_wait_secs = 0\n");
        let err = AppConfig::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("pong_wait_secs"));
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let rendered = toml::to_string_pretty(&AppConfig::default()).unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, AppConfig::default());
    }
}
