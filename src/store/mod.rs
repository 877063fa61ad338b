//! Coordination store primitive
//!
//! A hierarchical path namespace with per-path data, one-shot watches and a
//! single session. The coordinator only relies on the contract expressed by
//! [`CoordinationStore`]; [`MemoryStore`] is the embedded implementation that
//! the binary serves over HTTP to node processes.
//!
//! Watch notifications are delivered on a notification thread owned by the
//! store, never on the caller's thread.

pub mod client;
pub mod memory;

pub use client::CoordinationClient;
pub use memory::MemoryStore;

use crate::common::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Connection state carried by every notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeeperState {
    SyncConnected,
    Disconnected,
    Expired,
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    /// Session-level event (no path)
    None,
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

/// Notification delivered to a [`Watcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub state: KeeperState,
    pub kind: EventType,
    pub path: Option<String>,
}

impl WatchedEvent {
    pub fn session(state: KeeperState) -> Self {
        Self {
            state,
            kind: EventType::None,
            path: None,
        }
    }

    pub fn node(kind: EventType, path: impl Into<String>) -> Self {
        Self {
            state: KeeperState::SyncConnected,
            kind,
            path: Some(path.into()),
        }
    }
}

impl std::fmt::Display for WatchedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "WatchedEvent state:{:?} type:{:?} path:{}",
            self.state,
            self.kind,
            self.path.as_deref().unwrap_or("-")
        )
    }
}

/// Receiver of watch notifications.
///
/// Registrations are one-shot: after a watcher fires for a path it must be
/// registered again to observe the next change.
pub trait Watcher: Send + Sync {
    fn process(&self, event: WatchedEvent);
}

impl<F> Watcher for F
where
    F: Fn(WatchedEvent) + Send + Sync,
{
    fn process(&self, event: WatchedEvent) {
        self(event)
    }
}

/// Per-path metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stat {
    /// Number of `set_data` calls since creation
    pub version: u32,
    pub ctime_ms: u64,
    pub mtime_ms: u64,
    pub num_children: usize,
    pub data_length: usize,
}

/// The operations the coordinator needs from a coordination service.
pub trait CoordinationStore: Send + Sync {
    /// Open the session. `watcher` becomes the session watcher and receives
    /// the `SyncConnected` notification once the session is established.
    fn connect(&self, address: &str, session_timeout: Duration, watcher: Arc<dyn Watcher>)
        -> Result<()>;

    /// Create a persistent path. The parent must exist.
    fn create(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Replace the data at `path`, ignoring its version.
    fn set_data(&self, path: &str, data: &[u8]) -> Result<Stat>;

    fn get_data(&self, path: &str, watch: Option<Arc<dyn Watcher>>) -> Result<(Vec<u8>, Stat)>;

    /// Child names (not full paths), sorted.
    fn get_children(&self, path: &str, watch: Option<Arc<dyn Watcher>>) -> Result<Vec<String>>;

    /// `None` if the path does not exist. A watch is registered either way and
    /// fires on creation, deletion or data change.
    fn exists(&self, path: &str, watch: Option<Arc<dyn Watcher>>) -> Result<Option<Stat>>;

    /// Delete a childless path.
    fn delete(&self, path: &str) -> Result<()>;

    /// Close the session and drop every pending watch.
    fn close(&self);
}

/// Join a parent path and a child name.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Parent of an absolute path (`None` for the root).
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Check that `path` is absolute, has no empty segments and no trailing slash.
pub fn validate_path(path: &str) -> Result<()> {
    let valid = path == "/"
        || (path.starts_with('/')
            && !path.ends_with('/')
            && path[1..].split('/').all(|seg| !seg.is_empty() && seg != "." && seg != ".."));
    if valid {
        Ok(())
    } else {
        Err(crate::Error::InvalidPath(path.to_string()))
    }
}
