//! Consistent hash ring
//!
//! Each node sits at `hash("<host>:<port>")` and owns the half-open range
//! `[start_hash, end_hash)` where `end_hash` is its successor's start. The
//! last node wraps around to the first, so the ranges partition the whole
//! hash space exactly once. Ownership is computed from membership alone,
//! without a round trip to the coordination store.

use crate::common::{in_range, key_hash, node_hash, NodeSpec, Result};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A storage node placed on the ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub start_hash: String,
    pub end_hash: String,
}

impl Node {
    /// A node that, until linked into a ring, owns the whole space.
    pub fn from_spec(spec: &NodeSpec) -> Self {
        let start_hash = node_hash(&spec.host, spec.port);
        Self {
            name: spec.name.clone(),
            host: spec.host.clone(),
            port: spec.port,
            end_hash: start_hash.clone(),
            start_hash,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Does this node own `hash`?
    pub fn owns(&self, hash: &str) -> bool {
        in_range(hash, &self.start_hash, &self.end_hash)
    }

    fn key(&self) -> RingKey {
        RingKey(self.start_hash.clone(), self.name.clone())
    }
}

/// Ring order: start hash, then name (only matters on a collision).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RingKey(String, String);

/// One row of [`HashRing::ranges`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashRange {
    pub name: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRing {
    nodes: BTreeMap<RingKey, Node>,
}

impl HashRing {
    /// Build a ring from the configured nodes.
    ///
    /// Fails on an empty list, a duplicated name, or two nodes hashing to
    /// the same position.
    pub fn build(specs: &[NodeSpec]) -> Result<Self> {
        if specs.is_empty() {
            return Err(Error::Configuration(
                "at least one node is required to build the ring".into(),
            ));
        }

        let mut ring = Self {
            nodes: BTreeMap::new(),
        };
        for spec in specs {
            ring.check_insertable(spec)?;
            let node = Node::from_spec(spec);
            ring.nodes.insert(node.key(), node);
        }
        ring.link();

        tracing::debug!("Built ring with {} node(s)", ring.len());
        Ok(ring)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in ring order (ascending start hash).
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.values().find(|n| n.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Node owning the ring position `hash`.
    pub fn owner_of_hash(&self, hash: &str) -> Option<&Node> {
        self.nodes
            .values()
            .rev()
            .find(|n| n.start_hash.as_str() <= hash)
            .or_else(|| self.nodes.values().next_back())
    }

    /// Node responsible for `key`.
    pub fn owner_of(&self, key: &str) -> Option<&Node> {
        self.owner_of_hash(&key_hash(key))
    }

    /// Successor of `name` on the ring (itself on a single-node ring).
    pub fn successor(&self, name: &str) -> Option<&Node> {
        let node = self.get(name)?;
        self.nodes
            .range(node.key()..)
            .nth(1)
            .map(|(_, n)| n)
            .or_else(|| self.nodes.values().next())
    }

    pub fn ranges(&self) -> Vec<HashRange> {
        self.nodes
            .values()
            .map(|n| HashRange {
                name: n.name.clone(),
                start: n.start_hash.clone(),
                end: n.end_hash.clone(),
            })
            .collect()
    }

    /// Every node's end equals its successor's start, and the last wraps to
    /// the first.
    pub fn is_closed(&self) -> bool {
        let nodes: Vec<&Node> = self.nodes.values().collect();
        !nodes.is_empty()
            && nodes
                .iter()
                .zip(nodes.iter().cycle().skip(1))
                .all(|(cur, next)| cur.end_hash == next.start_hash)
    }

    /// Add a node, relinking only its predecessor.
    pub fn insert(&mut self, spec: &NodeSpec) -> Result<&Node> {
        self.check_insertable(spec)?;
        let mut node = Node::from_spec(spec);
        let key = node.key();

        if let Some(succ) = self.successor_of_key(&key) {
            node.end_hash = succ.start_hash.clone();
        }
        let pred_key = self.predecessor_of_key(&key);
        if let Some(pred) = pred_key.and_then(|k| self.nodes.get_mut(&k)) {
            pred.end_hash = node.start_hash.clone();
        }

        tracing::info!("Node {} joined the ring at {}", node.name, node.start_hash);
        self.nodes.insert(key.clone(), node);
        self.nodes
            .get(&key)
            .ok_or_else(|| Error::Internal("inserted node vanished".into()))
    }

    /// Remove a node; its predecessor inherits its range.
    pub fn remove(&mut self, name: &str) -> Result<Node> {
        let node = self
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("unknown node {:?}", name)))?;
        if self.nodes.len() == 1 {
            return Err(Error::Configuration(
                "cannot remove the last node from the ring".into(),
            ));
        }

        let key = node.key();
        self.nodes.remove(&key);
        if let Some(pred) = self
            .predecessor_of_key(&key)
            .and_then(|k| self.nodes.get_mut(&k))
        {
            pred.end_hash = node.end_hash.clone();
        }

        tracing::info!("Node {} left the ring", node.name);
        Ok(node)
    }

    fn check_insertable(&self, spec: &NodeSpec) -> Result<()> {
        if self.contains(&spec.name) {
            return Err(Error::Configuration(format!(
                "duplicate node name {:?}",
                spec.name
            )));
        }
        let hash = node_hash(&spec.host, spec.port);
        if let Some(other) = self.nodes.values().find(|n| n.start_hash == hash) {
            return Err(Error::Configuration(format!(
                "nodes {:?} and {:?} collide on hash {}",
                other.name, spec.name, hash
            )));
        }
        Ok(())
    }

    fn successor_of_key(&self, key: &RingKey) -> Option<&Node> {
        self.nodes
            .range(key.clone()..)
            .find(|(k, _)| *k != key)
            .or_else(|| self.nodes.iter().next())
            .map(|(_, n)| n)
    }

    fn predecessor_of_key(&self, key: &RingKey) -> Option<RingKey> {
        self.nodes
            .range(..key.clone())
            .next_back()
            .or_else(|| self.nodes.iter().next_back())
            .map(|(k, _)| k.clone())
    }

    fn link(&mut self) {
        let starts: Vec<String> = self.nodes.values().map(|n| n.start_hash.clone()).collect();
        let len = starts.len();
        for (i, node) in self.nodes.values_mut().enumerate() {
            node.end_hash = starts[(i + 1) % len].clone();
        }
    }
}
