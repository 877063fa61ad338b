//! Common utilities and types shared across kvecs

pub mod config;
pub mod error;
pub mod hash;
pub mod nodes;
pub mod utils;

pub use config::{Config, CoordinatorConfig, LaunchConfig};
pub use error::{Error, Result};
pub use hash::{in_range, key_hash, node_hash, ring_hash, MAX_HASH, MIN_HASH};
pub use nodes::{load_node_config, parse_node_config, NodeSpec};
pub use utils::{parse_duration, parse_duration_millis, timestamp_now_millis};
