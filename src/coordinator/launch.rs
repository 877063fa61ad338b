//! Starting storage node processes
//!
//! Launch is fire-and-forget: the coordinator only learns that a node is up
//! when it touches its coordination path. A local spawn error is the only
//! failure detected here.

use crate::common::{LaunchConfig, Result};
use crate::coordinator::repository::ActivationRecord;
use crate::coordinator::ring::Node;
use crate::Error;
use std::process::{Command, Stdio};

/// Starts the process behind a ring node.
pub trait Launcher: Send + Sync {
    fn launch(&self, node: &Node, coordination_addr: &str, activation: &ActivationRecord)
        -> Result<()>;
}

/// Renders a shell command template and runs it through `sh -c`.
///
/// Placeholders: `{name}` `{host}` `{port}` `{ssh_host}` `{coord_host}`
/// `{coord_port}` `{strategy}` `{cache_size}`.
pub struct ScriptLauncher {
    config: LaunchConfig,
}

impl ScriptLauncher {
    pub fn new(config: LaunchConfig) -> Self {
        Self { config }
    }

    pub fn render(
        &self,
        node: &Node,
        coordination_addr: &str,
        activation: &ActivationRecord,
    ) -> String {
        let (coord_host, coord_port) = coordination_addr
            .rsplit_once(':')
            .unwrap_or((coordination_addr, ""));
        let ssh_host = if self.config.ssh_host.is_empty() {
            node.host.as_str()
        } else {
            self.config.ssh_host.as_str()
        };

        self.config
            .command
            .replace("{name}", &node.name)
            .replace("{host}", &node.host)
            .replace("{port}", &node.port.to_string())
            .replace("{ssh_host}", ssh_host)
            .replace("{coord_host}", coord_host)
            .replace("{coord_port}", coord_port)
            .replace("{strategy}", &activation.cache_strategy.to_string())
            .replace("{cache_size}", &activation.cache_size.to_string())
    }
}

impl Launcher for ScriptLauncher {
    fn launch(
        &self,
        node: &Node,
        coordination_addr: &str,
        activation: &ActivationRecord,
    ) -> Result<()> {
        let script = self.render(node, coordination_addr, activation);
        if !self.config.enabled {
            tracing::info!("Launch disabled, would run for {}: {}", node.name, script);
            return Ok(());
        }

        tracing::info!("Launching {}: {}", node.name, script);
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::LaunchFailed {
                node: node.name.clone(),
                reason: e.to_string(),
            })?;

        // The script outlives this call; a detached thread reaps it.
        let name = node.name.clone();
        let reaper = std::thread::Builder::new()
            .name("launch-reaper".into())
            .spawn(move || match child.wait() {
                Ok(status) if status.success() => {
                    tracing::debug!("Launch script for {} exited", name)
                }
                Ok(status) => tracing::warn!("Launch script for {} exited with {}", name, status),
                Err(e) => tracing::warn!("Cannot wait on launch script for {}: {}", name, e),
            });
        if let Err(e) = reaper {
            tracing::warn!("Cannot reap launch script for {}: {}", node.name, e);
        }
        Ok(())
    }
}

/// Launcher for nodes that are started by something else.
pub struct NoopLauncher;

impl Launcher for NoopLauncher {
    fn launch(&self, node: &Node, coordination_addr: &str, _: &ActivationRecord) -> Result<()> {
        tracing::debug!(
            "Not launching {}; expecting it to join via {}",
            node.name,
            coordination_addr
        );
        Ok(())
    }
}
