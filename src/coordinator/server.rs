//! Coordinator facade

use crate::common::{CoordinatorConfig, NodeSpec, Result};
use crate::coordinator::launch::Launcher;
use crate::coordinator::repository::{ActiveNode, CacheStrategy, NodeRepository};
use crate::coordinator::ring::{HashRange, HashRing, Node};
use crate::coordinator::watcher::{AwaitOutcome, MembershipWatcher, WatcherState};
use crate::store::{child_path, CoordinationClient, CoordinationStore};
use crate::Error;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Outcome of [`Coordinator::provision`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProvisionResult {
    /// Every allocated node confirmed in time
    Success { nodes: Vec<ActiveNode> },
    /// Not enough free nodes; nothing changed
    CapacityError { requested: usize, available: usize },
    /// A launch could not even be started; the allocation is kept
    LaunchFailure { node: String, reason: String },
    /// Publishing to the coordination store failed; the allocation was undone
    CoordinationUnavailable { path: String },
    /// Not every node confirmed; the allocation is kept
    TimeoutError {
        nodes: Vec<ActiveNode>,
        confirmed: usize,
    },
}

impl ProvisionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ProvisionResult::Success { .. })
    }

    pub fn into_result(self) -> Result<Vec<ActiveNode>> {
        match self {
            ProvisionResult::Success { nodes } => Ok(nodes),
            ProvisionResult::CapacityError {
                requested,
                available,
            } => Err(Error::Capacity {
                requested,
                available,
            }),
            ProvisionResult::LaunchFailure { node, reason } => {
                Err(Error::LaunchFailed { node, reason })
            }
            ProvisionResult::CoordinationUnavailable { path } => {
                Err(Error::CoordinationUnavailable(path))
            }
            ProvisionResult::TimeoutError { nodes, confirmed } => Err(Error::Timeout(format!(
                "{} of {} node(s) confirmed",
                confirmed,
                nodes.len()
            ))),
        }
    }
}

/// Serialisable snapshot for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub root_path: String,
    pub coordination_addr: String,
    pub ring: Vec<HashRange>,
    pub active: Vec<ActiveNode>,
    pub available: Vec<Node>,
    pub watcher: WatcherState,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    ring: HashRing,
    repository: NodeRepository,
    watcher: MembershipWatcher,
    launcher: Arc<dyn Launcher>,
    /// Serializes provision, decommission and shutdown
    operations: Mutex<()>,
}

impl Coordinator {
    /// Build the ring, open the coordination session and create the root path.
    pub fn start(
        config: CoordinatorConfig,
        specs: &[NodeSpec],
        store: Arc<dyn CoordinationStore>,
        launcher: Arc<dyn Launcher>,
    ) -> Result<Self> {
        let ring = HashRing::build(specs)?;
        let repository = NodeRepository::from_ring(&ring);

        let client = Arc::new(CoordinationClient::new(
            store,
            config.coordination_addr().to_string(),
        ));
        let watcher =
            MembershipWatcher::init(client, config.root_path.clone(), config.session_timeout())?;

        tracing::info!("Coordinator started");
        tracing::info!("  Root path: {}", config.root_path);
        tracing::info!("  Coordination store: {}", config.coordination_addr());
        tracing::info!("  Ring: {} node(s)", ring.len());

        Ok(Self {
            config,
            ring,
            repository,
            watcher,
            launcher,
            operations: Mutex::new(()),
        })
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    pub fn repository(&self) -> &NodeRepository {
        &self.repository
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn watcher_state(&self) -> WatcherState {
        self.watcher.state()
    }

    fn client(&self) -> &CoordinationClient {
        self.watcher.client()
    }

    fn node_path(&self, name: &str) -> String {
        child_path(&self.config.root_path, name)
    }

    /// JSON of the current active set, as published to every new node.
    pub fn active_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.repository.active_set())?)
    }

    /// Allocate `count` nodes, publish their activation data, launch them and
    /// wait up to `timeout` for each to touch its path.
    ///
    /// The node paths are written before the watches are armed, so the
    /// coordinator's own writes never count as confirmations.
    pub fn provision(
        &self,
        count: usize,
        cache_strategy: CacheStrategy,
        cache_size: usize,
        timeout: Duration,
    ) -> ProvisionResult {
        let _ops = self.operations.lock().unwrap_or_else(|e| e.into_inner());

        // Capacity is the only way allocate fails.
        let nodes = match self.repository.allocate(count, cache_strategy, cache_size) {
            Ok(nodes) => nodes,
            Err(Error::Capacity {
                requested,
                available,
            }) => {
                return ProvisionResult::CapacityError {
                    requested,
                    available,
                }
            }
            Err(e) => {
                tracing::error!("Allocation failed: {}", e);
                return ProvisionResult::CapacityError {
                    requested: count,
                    available: self.repository.available_count(),
                };
            }
        };
        let names: Vec<String> = nodes.iter().map(|n| n.node.name.clone()).collect();

        // Every active node gets the new set, not just the ones allocated here.
        if let Err(path) = self.publish(&self.active_names()) {
            self.undo_allocation(&names);
            return ProvisionResult::CoordinationUnavailable { path };
        }

        if let Err(e) = self.watcher.set_semaphore(count, &names) {
            tracing::error!("Cannot arm watches for {:?}: {}", names, e);
            self.undo_allocation(&names);
            return ProvisionResult::CoordinationUnavailable {
                path: self.config.root_path.clone(),
            };
        }

        let coordination_addr = self.client().address().to_string();
        for active in &nodes {
            if let Err(e) = self
                .launcher
                .launch(&active.node, &coordination_addr, &active.activation)
            {
                let reason = match e {
                    Error::LaunchFailed { reason, .. } => reason,
                    other => other.to_string(),
                };
                tracing::error!("Failed to launch {}: {}", active.node.name, reason);
                return ProvisionResult::LaunchFailure {
                    node: active.node.name.clone(),
                    reason,
                };
            }
        }

        match self.watcher.await_outcome(timeout) {
            AwaitOutcome::Success => {
                tracing::info!("Provisioned {:?}", names);
                ProvisionResult::Success { nodes }
            }
            AwaitOutcome::Timeout { confirmed, .. } => {
                tracing::warn!(
                    "Only {} of {} node(s) confirmed within {:?}",
                    confirmed,
                    count,
                    timeout
                );
                ProvisionResult::TimeoutError { nodes, confirmed }
            }
        }
    }

    fn active_names(&self) -> Vec<String> {
        self.repository
            .active_set()
            .into_iter()
            .map(|n| n.node.name)
            .collect()
    }

    /// Write the active-set payload to each node's path. On failure returns
    /// the path that could not be written.
    ///
    /// Nodes confirmed earlier have no armed watch, and a leftover watch from
    /// an older await belongs to a stale epoch, so these writes are never
    /// counted as confirmations.
    fn publish(&self, names: &[String]) -> std::result::Result<(), String> {
        let payload = self.active_payload().map_err(|e| {
            tracing::error!("Cannot encode activation payload: {}", e);
            self.config.root_path.clone()
        })?;

        for name in names {
            let path = self.node_path(name);
            let written = match self.client().exists(&path, None) {
                Ok(Some(_)) => self.client().write_data(&path, &payload),
                Ok(None) => self.client().create_path(&path, &payload),
                Err(_) => false,
            };
            if !written {
                return Err(path);
            }
        }
        Ok(())
    }

    fn undo_allocation(&self, names: &[String]) {
        let paths: Vec<String> = names.iter().map(|n| self.node_path(n)).collect();
        self.client().delete_subtree(&paths);
        self.repository.release(names);
    }

    /// Release the named nodes, delete their coordination paths and publish
    /// the shrunken active set to the nodes that remain.
    ///
    /// Returns `false` if any name was not active. The other names are still
    /// released.
    pub fn decommission<S: AsRef<str>>(&self, names: &[S]) -> bool {
        let _ops = self.operations.lock().unwrap_or_else(|e| e.into_inner());

        let report = self.repository.release_report(names);
        let paths: Vec<String> = report.released.iter().map(|n| self.node_path(n)).collect();
        if !self.client().delete_subtree(&paths) {
            tracing::warn!("Some node paths could not be deleted: {:?}", paths);
        }
        if let Err(path) = self.publish(&self.active_names()) {
            tracing::warn!("Cannot publish the remaining active set to {}", path);
        }

        tracing::info!("Decommissioned {:?}", report.released);
        report.is_complete()
    }

    /// [`provision`](Self::provision) with the configured await timeout.
    pub fn add_nodes(
        &self,
        count: usize,
        cache_strategy: CacheStrategy,
        cache_size: usize,
    ) -> ProvisionResult {
        self.provision(count, cache_strategy, cache_size, self.config.await_timeout())
    }

    pub fn remove_nodes<S: AsRef<str>>(&self, names: &[S]) -> bool {
        self.decommission(names)
    }

    /// Release every node, delete the whole root subtree and close the
    /// session.
    pub fn shutdown(&self) -> bool {
        let _ops = self.operations.lock().unwrap_or_else(|e| e.into_inner());

        let released = self.repository.release_all();
        let deleted = self.client().delete_subtree(&[self.config.root_path.as_str()]);
        self.watcher.close();

        tracing::info!(
            "Coordinator shut down ({} node(s) released)",
            released.len()
        );
        deleted
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            root_path: self.config.root_path.clone(),
            coordination_addr: self.client().address().to_string(),
            ring: self.ring.ranges(),
            active: self.repository.active_set(),
            available: self.repository.available_set(),
            watcher: self.watcher.state(),
        }
    }
}
