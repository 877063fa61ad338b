//! Configuration for the kvecs coordinator
//!
//! Values come from (lowest to highest priority) built-in defaults, an optional
//! TOML file, `KVECS__*` environment variables and finally CLI overrides applied
//! by the binary.

use crate::common::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator-specific config
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Remote launch config
    #[serde(default)]
    pub launch: LaunchConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from an optional TOML file and the environment.
    ///
    /// A missing file is not an error; every field has a default.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("KVECS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let root = &self.coordinator.root_path;
        if !root.starts_with('/') || root.len() < 2 || root.ends_with('/') {
            return Err(crate::Error::InvalidConfig(format!(
                "root_path must be an absolute non-root path, got {:?}",
                root
            )));
        }
        if self.coordinator.session_timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "session_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for the embedded store and admin HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Address handed to launched nodes (defaults to `bind_addr`)
    #[serde(default)]
    pub advertise_addr: Option<SocketAddr>,

    /// Root path in the coordination store
    #[serde(default = "default_root_path")]
    pub root_path: String,

    /// Static node list (`name host port` per line)
    #[serde(default = "default_nodes_file")]
    pub nodes_file: PathBuf,

    /// Session establishment timeout
    #[serde(default = "default_session_timeout")]
    pub session_timeout_ms: u64,

    /// Default bound for awaiting node confirmations
    #[serde(default = "default_await_timeout")]
    pub await_timeout_ms: u64,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 2181))
}
fn default_root_path() -> String {
    "/ecs".to_string()
}
fn default_nodes_file() -> PathBuf {
    PathBuf::from("ecs.config")
}
fn default_session_timeout() -> u64 {
    5_000
}
fn default_await_timeout() -> u64 {
    10_000
}

impl CoordinatorConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn await_timeout(&self) -> Duration {
        Duration::from_millis(self.await_timeout_ms)
    }

    /// Address nodes use to reach the coordination store.
    pub fn coordination_addr(&self) -> SocketAddr {
        self.advertise_addr.unwrap_or(self.bind_addr)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            advertise_addr: None,
            root_path: default_root_path(),
            nodes_file: default_nodes_file(),
            session_timeout_ms: default_session_timeout(),
            await_timeout_ms: default_await_timeout(),
        }
    }
}

/// Remote launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Actually spawn the command (otherwise it is only logged)
    #[serde(default)]
    pub enabled: bool,

    /// Host the launch command is executed against
    #[serde(default = "default_ssh_host")]
    pub ssh_host: String,

    /// Command template, see `coordinator::launch` for placeholders
    #[serde(default = "default_command")]
    pub command: String,
}

fn default_ssh_host() -> String {
    "127.0.0.1".to_string()
}
fn default_command() -> String {
    "ssh -n {ssh_host} nohup kvserver {name} {coord_host} {coord_port} {port} {strategy} {cache_size} &"
        .to_string()
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ssh_host: default_ssh_host(),
            command: default_command(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.coordinator.root_path, "/ecs");
        assert_eq!(config.coordinator.session_timeout(), Duration::from_secs(5));
        assert!(!config.launch.enabled);
        assert_eq!(
            config.coordinator.coordination_addr(),
            config.coordinator.bind_addr
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[coordinator]
bind_addr = "0.0.0.0:3000"
root_path = "/kv"
await_timeout_ms = 2000

[launch]
enabled = true
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.coordinator.bind_addr.port(), 3000);
        assert_eq!(config.coordinator.root_path, "/kv");
        assert_eq!(config.coordinator.await_timeout(), Duration::from_secs(2));
        assert_eq!(config.coordinator.session_timeout_ms, 5_000);
        assert!(config.launch.enabled);
        assert_eq!(config.launch.ssh_host, "127.0.0.1");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.coordinator.root_path, "/ecs");
    }

    #[test]
    fn test_rejects_bad_root() {
        let mut config = Config::default();
        config.coordinator.root_path = "ecs/".into();
        assert!(config.validate().is_err());
    }
}
