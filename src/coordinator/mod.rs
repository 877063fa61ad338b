//! Coordinator implementation
//!
//! The coordinator is responsible for:
//! - Placing the configured storage nodes on a consistent hash ring
//! - Tracking which nodes are free and which are serving
//! - Publishing activation data through the coordination store
//! - Waiting for launched nodes to confirm they are up

pub mod http;
pub mod launch;
pub mod repository;
pub mod ring;
pub mod server;
pub mod watcher;

pub use launch::{Launcher, NoopLauncher, ScriptLauncher};
pub use repository::{ActivationRecord, ActiveNode, CacheStrategy, NodeRepository};
pub use ring::{HashRange, HashRing, Node};
pub use server::{Coordinator, CoordinatorStatus, ProvisionResult};
pub use watcher::{AwaitOutcome, MembershipWatcher, WatcherState};
