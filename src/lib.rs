//! # kvecs
//!
//! Membership coordinator for a consistent-hash key-value cluster:
//! - Consistent hash ring over the configured storage nodes
//! - Allocation of free nodes with a per-node cache configuration
//! - Activation data published through a watch-capable coordination store
//! - Bounded wait for launched nodes to confirm they are up
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              Coordinator                 │
//! │  HashRing ─ NodeRepository ─ Launcher    │
//! │        MembershipWatcher (await)         │
//! └───────────┬──────────────────────────────┘
//!             │ CoordinationClient
//!   ┌─────────▼──────────┐
//!   │ Coordination store │  /ecs/<node>  (activation data)
//!   └─────────▲──────────┘
//!             │ HTTP: read data, touch path
//!   ┌─────────┴──────────┬──────────────┐
//! ┌─┴──────────┐   ┌─────┴──────┐   ┌───┴──────────┐
//! │  Server A  │   │  Server B  │   │  Server C    │
//! └────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Print the ring for a node file
//! kvecs ring --nodes ./ecs.config
//!
//! # Serve the coordination store and provision two LRU nodes
//! kvecs serve --nodes ./ecs.config --count 2 --strategy LRU --cache-size 100
//! ```

pub mod common;
pub mod coordinator;
pub mod store;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::{Coordinator, ProvisionResult};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
