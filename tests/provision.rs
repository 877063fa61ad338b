//! End-to-end provisioning against the embedded coordination store

use kvecs::common::{parse_node_config, CoordinatorConfig, Result};
use kvecs::coordinator::{
    ActivationRecord, ActiveNode, CacheStrategy, HashRing, Launcher, Node,
};
use kvecs::store::{CoordinationStore, MemoryStore};
use kvecs::{Coordinator, ProvisionResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const NODES: &str = "A 127.0.0.1 5000\nB 127.0.0.1 5001\nC 127.0.0.1 5002\n";

/// Plays the storage node: reads its activation data, then touches its path.
struct SimulatedNodes {
    store: Arc<MemoryStore>,
    /// Names that never come up
    dead: HashSet<String>,
    seen: Mutex<Vec<Vec<ActiveNode>>>,
}

impl SimulatedNodes {
    fn new(store: Arc<MemoryStore>, dead: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            store,
            dead: dead.iter().map(|s| s.to_string()).collect(),
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl Launcher for SimulatedNodes {
    fn launch(&self, node: &Node, _: &str, _: &ActivationRecord) -> Result<()> {
        let path = format!("/ecs/{}", node.name);
        let (payload, _) = self.store.get_data(&path, None)?;
        self.seen
            .lock()
            .unwrap()
            .push(serde_json::from_slice(&payload)?);

        if !self.dead.contains(&node.name) {
            let store = self.store.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                store.set_data(&path, b"SERVER_STARTED").unwrap();
            });
        }
        Ok(())
    }
}

fn start(dead: &[&str]) -> (Arc<MemoryStore>, Arc<SimulatedNodes>, Coordinator) {
    let store = Arc::new(MemoryStore::new());
    let nodes = SimulatedNodes::new(store.clone(), dead);
    let coordinator = Coordinator::start(
        CoordinatorConfig::default(),
        &parse_node_config(NODES).unwrap(),
        store.clone(),
        nodes.clone(),
    )
    .unwrap();
    (store, nodes, coordinator)
}

fn ring_order(coordinator: &Coordinator) -> Vec<String> {
    coordinator.ring().iter().map(|n| n.name.clone()).collect()
}

#[test]
fn test_provision_two_of_three() {
    let (store, nodes, coordinator) = start(&[]);
    let order = ring_order(&coordinator);

    let result = coordinator.provision(2, CacheStrategy::Lru, 10, Duration::from_millis(2000));
    let active = match result {
        ProvisionResult::Success { nodes } => nodes,
        other => panic!("expected success, got {:?}", other),
    };

    let names: Vec<String> = active.iter().map(|n| n.node.name.clone()).collect();
    assert_eq!(names, order[..2].to_vec());
    assert_eq!(coordinator.repository().available_count(), 1);
    assert_eq!(coordinator.repository().available_set()[0].name, order[2]);

    // Every launched node saw the full active set with its cache settings.
    let seen = nodes.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    for view in seen.iter() {
        assert_eq!(view.len(), 2);
        assert!(view
            .iter()
            .all(|n| n.activation.cache_strategy == CacheStrategy::Lru
                && n.activation.cache_size == 10));
    }

    for name in &names {
        let (data, _) = store.get_data(&format!("/ecs/{}", name), None).unwrap();
        assert_eq!(data, b"SERVER_STARTED");
    }
}

#[test]
fn test_provision_times_out_when_a_node_stays_silent() {
    let ring = HashRing::build(&parse_node_config(NODES).unwrap()).unwrap();
    let second = ring.iter().nth(1).unwrap().name.clone();

    let (_store, _nodes, coordinator) = start(&[second.as_str()]);
    let result = coordinator.provision(2, CacheStrategy::Lru, 10, Duration::from_millis(500));
    match result {
        ProvisionResult::TimeoutError { nodes, confirmed } => {
            assert_eq!(nodes.len(), 2);
            assert_eq!(confirmed, 1);
        }
        other => panic!("expected timeout, got {:?}", other),
    }

    // No automatic rollback.
    assert_eq!(coordinator.repository().active_count(), 2);
}

#[test]
fn test_provision_all_nodes_is_capacity_error() {
    let (_store, nodes, coordinator) = start(&[]);
    let result = coordinator.provision(3, CacheStrategy::Lfu, 10, Duration::from_millis(100));
    assert_eq!(
        result,
        ProvisionResult::CapacityError {
            requested: 3,
            available: 3
        }
    );
    assert!(nodes.seen.lock().unwrap().is_empty());
    assert_eq!(coordinator.repository().active_count(), 0);
}

#[test]
fn test_decommission_then_reprovision() {
    let (store, _nodes, coordinator) = start(&[]);
    let first = coordinator
        .provision(2, CacheStrategy::Lru, 10, Duration::from_millis(2000))
        .into_result()
        .unwrap();
    let names: Vec<String> = first.iter().map(|n| n.node.name.clone()).collect();

    assert!(coordinator.decommission(&names));
    assert_eq!(coordinator.repository().available_count(), 3);
    assert!(store.get_children("/ecs", None).unwrap().is_empty());

    let second = coordinator
        .provision(1, CacheStrategy::Fifo, 20, Duration::from_millis(2000))
        .into_result()
        .unwrap();
    assert_eq!(second[0].node.name, names[0]);
    assert_eq!(second[0].activation.cache_strategy, CacheStrategy::Fifo);
}

fn payload_names(store: &MemoryStore, name: &str) -> Vec<String> {
    let (data, _) = store.get_data(&format!("/ecs/{}", name), None).unwrap();
    let active: Vec<ActiveNode> = serde_json::from_slice(&data).unwrap();
    active.into_iter().map(|n| n.node.name).collect()
}

#[test]
fn test_earlier_nodes_see_later_additions_and_removals() {
    let (store, _nodes, coordinator) = start(&[]);
    let order = ring_order(&coordinator);

    coordinator
        .provision(1, CacheStrategy::Lru, 10, Duration::from_millis(2000))
        .into_result()
        .unwrap();

    coordinator
        .provision(1, CacheStrategy::Lru, 10, Duration::from_millis(2000))
        .into_result()
        .unwrap();
    assert_eq!(coordinator.repository().active_count(), 2);
    // The first node had already overwritten its path when it came up.
    assert_eq!(payload_names(&store, &order[0]), order[..2].to_vec());

    assert!(coordinator.decommission(&[order[1].clone()]));
    assert_eq!(payload_names(&store, &order[0]), order[..1].to_vec());
}

#[test]
fn test_decommission_inactive_name_reports_failure() {
    let (_store, _nodes, coordinator) = start(&[]);
    let active = coordinator
        .provision(1, CacheStrategy::Lru, 10, Duration::from_millis(2000))
        .into_result()
        .unwrap();
    let free = coordinator.repository().available_set()[0].name.clone();

    assert!(!coordinator.decommission(&[active[0].node.name.clone(), free]));
    assert_eq!(coordinator.repository().active_count(), 0);
}

#[test]
fn test_shutdown_removes_root() {
    let (store, _nodes, coordinator) = start(&[]);
    coordinator
        .provision(2, CacheStrategy::Lru, 10, Duration::from_millis(2000))
        .into_result()
        .unwrap();

    assert!(coordinator.shutdown());
    assert!(store.exists("/ecs", None).unwrap().is_none());
    assert_eq!(coordinator.repository().available_count(), 3);
}
