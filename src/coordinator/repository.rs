//! Node repository: which ring nodes are free and which are serving
//!
//! Each slot's [`Availability`] flag is the single source of truth; the
//! available and active views are derived from it on every read, so they can
//! never drift apart. All mutation goes through `allocate`/`release` under a
//! single mutex.

use crate::common::Result;
use crate::coordinator::ring::{HashRing, Node};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

/// Cache eviction strategy handed to a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStrategy {
    Lru,
    Lfu,
    Fifo,
}

impl FromStr for CacheStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LRU" => Ok(CacheStrategy::Lru),
            "LFU" => Ok(CacheStrategy::Lfu),
            "FIFO" => Ok(CacheStrategy::Fifo),
            _ => Err(Error::Configuration(format!(
                "unknown cache strategy {:?}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStrategy::Lru => write!(f, "LRU"),
            CacheStrategy::Lfu => write!(f, "LFU"),
            CacheStrategy::Fifo => write!(f, "FIFO"),
        }
    }
}

/// Per-node configuration published at provisioning time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRecord {
    pub cache_strategy: CacheStrategy,
    pub cache_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Free,
    Active,
}

/// An allocated node together with its activation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveNode {
    #[serde(flatten)]
    pub node: Node,
    #[serde(flatten)]
    pub activation: ActivationRecord,
}

/// Full view of one repository slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeEntry {
    pub node: Node,
    pub availability: Availability,
    pub activation: Option<ActivationRecord>,
}

/// Outcome of a release, per requested name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseReport {
    pub released: Vec<String>,
    /// Names that were not active (unknown, already free, or repeated)
    pub missing: Vec<String>,
}

impl ReleaseReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

pub struct NodeRepository {
    /// Slots in ring order
    slots: Mutex<Vec<NodeEntry>>,
}

impl NodeRepository {
    /// Every ring node starts out free.
    pub fn from_ring(ring: &HashRing) -> Self {
        let slots = ring
            .iter()
            .map(|node| NodeEntry {
                node: node.clone(),
                availability: Availability::Free,
                activation: None,
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<NodeEntry>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take `count` free nodes in ring order and mark them active.
    ///
    /// Requires strictly more free nodes than requested; otherwise fails with
    /// `Capacity` and leaves the repository untouched.
    pub fn allocate(
        &self,
        count: usize,
        cache_strategy: CacheStrategy,
        cache_size: usize,
    ) -> Result<Vec<ActiveNode>> {
        let mut slots = self.lock();
        let available = slots
            .iter()
            .filter(|s| s.availability == Availability::Free)
            .count();
        if available <= count {
            tracing::warn!(
                "Cannot allocate {} node(s): only {} available",
                count,
                available
            );
            return Err(Error::Capacity {
                requested: count,
                available,
            });
        }

        let activation = ActivationRecord {
            cache_strategy,
            cache_size,
        };
        let taken: Vec<ActiveNode> = slots
            .iter_mut()
            .filter(|s| s.availability == Availability::Free)
            .take(count)
            .map(|slot| {
                slot.availability = Availability::Active;
                slot.activation = Some(activation.clone());
                ActiveNode {
                    node: slot.node.clone(),
                    activation: activation.clone(),
                }
            })
            .collect();

        tracing::info!(
            "Allocated {:?} ({} {})",
            taken.iter().map(|n| n.node.name.as_str()).collect::<Vec<_>>(),
            cache_strategy,
            cache_size
        );
        Ok(taken)
    }

    /// Return every named active node to the free pool.
    ///
    /// Best effort per name: names that are not active are reported in
    /// `missing`, the others are still released.
    pub fn release_report<S: AsRef<str>>(&self, names: &[S]) -> ReleaseReport {
        let mut slots = self.lock();
        let mut report = ReleaseReport::default();

        for name in names {
            let name = name.as_ref();
            match slots
                .iter_mut()
                .find(|s| s.node.name == name && s.availability == Availability::Active)
            {
                Some(slot) => {
                    slot.availability = Availability::Free;
                    slot.activation = None;
                    report.released.push(name.to_string());
                }
                None => report.missing.push(name.to_string()),
            }
        }

        if !report.is_complete() {
            tracing::warn!("Release skipped non-active node(s) {:?}", report.missing);
        }
        report
    }

    /// `false` if any name was not active; found names are released anyway.
    pub fn release<S: AsRef<str>>(&self, names: &[S]) -> bool {
        self.release_report(names).is_complete()
    }

    /// Release every active node, returning their names.
    pub fn release_all(&self) -> Vec<String> {
        let names: Vec<String> = self.active_set().into_iter().map(|n| n.node.name).collect();
        self.release_report(&names).released
    }

    /// Snapshot of the active nodes, in ring order.
    pub fn active_set(&self) -> Vec<ActiveNode> {
        self.lock()
            .iter()
            .filter_map(|s| {
                s.activation.as_ref().map(|activation| ActiveNode {
                    node: s.node.clone(),
                    activation: activation.clone(),
                })
            })
            .collect()
    }

    /// Snapshot of the free nodes, in ring order.
    pub fn available_set(&self) -> Vec<Node> {
        self.lock()
            .iter()
            .filter(|s| s.availability == Availability::Free)
            .map(|s| s.node.clone())
            .collect()
    }

    pub fn available_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|s| s.availability == Availability::Free)
            .count()
    }

    pub fn active_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|s| s.availability == Availability::Active)
            .count()
    }

    pub fn availability(&self, name: &str) -> Option<Availability> {
        self.lock()
            .iter()
            .find(|s| s.node.name == name)
            .map(|s| s.availability)
    }

    pub fn entries(&self) -> Vec<NodeEntry> {
        self.lock().clone()
    }
}
