//! Synchronous facade over a [`CoordinationStore`]
//!
//! No policy lives here. Failures are logged and handed back to the caller
//! as `false` or an `Err`, never treated as fatal.

use crate::common::Result;
use crate::store::{child_path, CoordinationStore, Stat, Watcher};
use crate::Error;
use std::sync::Arc;
use std::time::Duration;

pub struct CoordinationClient {
    store: Arc<dyn CoordinationStore>,
    address: String,
}

impl CoordinationClient {
    pub fn new(store: Arc<dyn CoordinationStore>, address: impl Into<String>) -> Self {
        Self {
            store,
            address: address.into(),
        }
    }

    /// Address of the coordination service this client talks to.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    /// Open the session. Establishment is signalled asynchronously to `watcher`.
    pub fn connect(&self, session_timeout: Duration, watcher: Arc<dyn Watcher>) -> Result<()> {
        self.store
            .connect(&self.address, session_timeout, watcher)
            .map_err(|e| {
                tracing::error!("Failed to connect to {}: {}", self.address, e);
                match e {
                    Error::CoordinationUnavailable(_) => e,
                    other => Error::CoordinationUnavailable(other.to_string()),
                }
            })
    }

    /// Create `path` with `payload`. A pre-existing path counts as success.
    pub fn create_path(&self, path: &str, payload: &[u8]) -> bool {
        match self.store.create(path, payload) {
            Ok(()) => {
                tracing::info!("Successfully created node {}", path);
                true
            }
            Err(Error::NodeExists(_)) => {
                tracing::debug!("Node {} already exists", path);
                true
            }
            Err(e) => {
                tracing::error!("Failed to create node {}: {}", path, e);
                false
            }
        }
    }

    /// Replace the data at `path`.
    pub fn write_data(&self, path: &str, payload: &[u8]) -> bool {
        match self.store.set_data(path, payload) {
            Ok(stat) => {
                tracing::info!("Successfully updated node {} (version {})", path, stat.version);
                true
            }
            Err(e) => {
                tracing::error!("Failed to update node {}: {}", path, e);
                false
            }
        }
    }

    pub fn read_data(&self, path: &str) -> Result<Vec<u8>> {
        self.store
            .get_data(path, None)
            .map(|(data, _)| data)
            .inspect_err(|e| tracing::warn!("Failed to read node {}: {}", path, e))
    }

    /// `Ok(None)` when the path does not exist. A watch, if given, is
    /// registered in both cases.
    pub fn exists(&self, path: &str, watch: Option<Arc<dyn Watcher>>) -> Result<Option<Stat>> {
        self.store
            .exists(path, watch)
            .inspect_err(|e| tracing::error!("Failed to check node {}: {}", path, e))
    }

    pub fn children(&self, path: &str, watch: Option<Arc<dyn Watcher>>) -> Result<Vec<String>> {
        self.store
            .get_children(path, watch)
            .inspect_err(|e| tracing::error!("Failed to list children of {}: {}", path, e))
    }

    /// Delete every path in `paths` together with its descendants.
    ///
    /// Missing paths are skipped. Returns `false` if any deletion failed; the
    /// remaining paths are still attempted.
    pub fn delete_subtree<S: AsRef<str>>(&self, paths: &[S]) -> bool {
        let mut ok = true;
        for path in paths {
            let path = path.as_ref();
            if let Err(e) = self.delete_recursive(path) {
                tracing::error!("Failed to delete subtree {}: {}", path, e);
                ok = false;
            }
        }
        ok
    }

    fn delete_recursive(&self, path: &str) -> Result<()> {
        let children = match self.store.get_children(path, None) {
            Ok(children) => children,
            Err(Error::NoNode(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        for child in children {
            self.delete_recursive(&child_path(path, &child))?;
        }
        match self.store.delete(path) {
            Ok(()) | Err(Error::NoNode(_)) => {
                tracing::debug!("Deleted node {}", path);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn close(&self) {
        self.store.close();
    }
}
