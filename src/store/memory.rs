//! Embedded in-memory coordination store
//!
//! Paths live in a `BTreeMap` so children of a path are a contiguous prefix
//! range. Watch notifications are queued on an mpsc channel while the tree
//! lock is held (which keeps them in operation order) and delivered by a
//! dedicated `store-events` thread.

use crate::common::{timestamp_now_millis, Result};
use crate::store::{
    child_path, parent_path, validate_path, CoordinationStore, EventType, KeeperState, Stat,
    WatchedEvent, Watcher,
};
use crate::Error;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type Dispatch = (Arc<dyn Watcher>, WatchedEvent);
type WatchList = HashMap<String, Vec<Arc<dyn Watcher>>>;

struct ZNode {
    data: Vec<u8>,
    stat: Stat,
}

impl ZNode {
    fn new(data: &[u8]) -> Self {
        let now = timestamp_now_millis();
        Self {
            data: data.to_vec(),
            stat: Stat {
                version: 0,
                ctime_ms: now,
                mtime_ms: now,
                num_children: 0,
                data_length: data.len(),
            },
        }
    }
}

struct Session {
    address: String,
    timeout: Duration,
    watcher: Arc<dyn Watcher>,
}

struct Tree {
    nodes: BTreeMap<String, ZNode>,
    /// Fired on create, data change and delete of the path itself
    node_watches: WatchList,
    /// Fired when a child is created or deleted (and on delete of the path)
    child_watches: WatchList,
    session: Option<Session>,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), ZNode::new(&[]));
        Self {
            nodes,
            node_watches: HashMap::new(),
            child_watches: HashMap::new(),
            session: None,
        }
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| {
                let rest = &k[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn get(&self, path: &str) -> Result<&ZNode> {
        self.nodes
            .get(path)
            .ok_or_else(|| Error::NoNode(path.to_string()))
    }
}

/// In-memory [`CoordinationStore`].
pub struct MemoryStore {
    tree: Mutex<Tree>,
    available: AtomicBool,
    events: mpsc::Sender<Dispatch>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Dispatch>();
        // The thread exits once the store (the only sender) is dropped.
        let spawned = std::thread::Builder::new()
            .name("store-events".into())
            .spawn(move || {
                for (watcher, event) in rx {
                    tracing::debug!("Delivering {}", event);
                    watcher.process(event);
                }
            });
        if let Err(e) = spawned {
            tracing::error!("Failed to spawn store notification thread: {}", e);
        }

        Self {
            tree: Mutex::new(Tree::new()),
            available: AtomicBool::new(true),
            events: tx,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Simulate losing the connection: every operation fails with
    /// `CoordinationUnavailable` and the session watcher sees `Disconnected`.
    pub fn disconnect(&self) {
        self.available.store(false, Ordering::SeqCst);
        let tree = self.lock();
        if let Some(session) = &tree.session {
            tracing::warn!("Session to {} disconnected", session.address);
            self.emit(&session.watcher, WatchedEvent::session(KeeperState::Disconnected));
        }
    }

    /// Restore the connection; the session watcher sees `SyncConnected` again.
    pub fn reconnect(&self) {
        self.available.store(true, Ordering::SeqCst);
        let tree = self.lock();
        if let Some(session) = &tree.session {
            tracing::info!("Session to {} re-established", session.address);
            self.emit(&session.watcher, WatchedEvent::session(KeeperState::SyncConnected));
        }
    }

    /// Expire the session: pending watches are dropped and the session
    /// watcher sees `Expired`.
    pub fn expire(&self) {
        let mut tree = self.lock();
        tree.node_watches.clear();
        tree.child_watches.clear();
        if let Some(session) = tree.session.take() {
            tracing::warn!("Session to {} expired", session.address);
            self.emit(&session.watcher, WatchedEvent::session(KeeperState::Expired));
        }
    }

    /// Session timeout of the current session, if one is open.
    pub fn session_timeout(&self) -> Option<Duration> {
        self.lock().session.as_ref().map(|s| s.timeout)
    }

    /// Number of pending one-shot registrations on `path`.
    pub fn pending_watches(&self, path: &str) -> usize {
        let tree = self.lock();
        tree.node_watches.get(path).map_or(0, Vec::len)
            + tree.child_watches.get(path).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        // A panicking watcher never holds this lock, so poisoning only comes
        // from a bug inside this module; keep serving the tree regardless.
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self, op: &str, path: &str) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(Error::CoordinationUnavailable(format!("{} {}", op, path)))
        }
    }

    fn emit(&self, watcher: &Arc<dyn Watcher>, event: WatchedEvent) {
        if self.events.send((Arc::clone(watcher), event)).is_err() {
            tracing::error!("Store notification thread is gone; dropping event");
        }
    }

    fn register(watches: &mut WatchList, path: &str, watcher: Arc<dyn Watcher>) {
        let list = watches.entry(path.to_string()).or_default();
        // A watcher registered twice on the same path is notified once.
        if !list
            .iter()
            .any(|w| std::ptr::addr_eq(Arc::as_ptr(w), Arc::as_ptr(&watcher)))
        {
            list.push(watcher);
        }
    }

    fn fire(&self, watches: &mut WatchList, path: &str, kind: EventType) {
        if let Some(watchers) = watches.remove(path) {
            for watcher in watchers {
                self.emit(&watcher, WatchedEvent::node(kind, path));
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinationStore for MemoryStore {
    fn connect(
        &self,
        address: &str,
        session_timeout: Duration,
        watcher: Arc<dyn Watcher>,
    ) -> Result<()> {
        self.check_available("connect", address)?;
        let mut tree = self.lock();
        tree.session = Some(Session {
            address: address.to_string(),
            timeout: session_timeout,
            watcher: Arc::clone(&watcher),
        });
        tracing::info!("Session opened for {}", address);
        self.emit(&watcher, WatchedEvent::session(KeeperState::SyncConnected));
        Ok(())
    }

    fn create(&self, path: &str, data: &[u8]) -> Result<()> {
        validate_path(path)?;
        self.check_available("create", path)?;
        let parent = parent_path(path).ok_or_else(|| Error::NodeExists(path.to_string()))?;

        let mut tree = self.lock();
        if tree.nodes.contains_key(path) {
            return Err(Error::NodeExists(path.to_string()));
        }
        match tree.nodes.get_mut(parent) {
            Some(p) => p.stat.num_children += 1,
            None => return Err(Error::NoNode(parent.to_string())),
        }
        tree.nodes.insert(path.to_string(), ZNode::new(data));

        let Tree {
            node_watches,
            child_watches,
            ..
        } = &mut *tree;
        self.fire(node_watches, path, EventType::NodeCreated);
        self.fire(child_watches, parent, EventType::NodeChildrenChanged);
        Ok(())
    }

    fn set_data(&self, path: &str, data: &[u8]) -> Result<Stat> {
        validate_path(path)?;
        self.check_available("set_data", path)?;

        let mut tree = self.lock();
        let node = tree
            .nodes
            .get_mut(path)
            .ok_or_else(|| Error::NoNode(path.to_string()))?;
        node.data = data.to_vec();
        node.stat.version += 1;
        node.stat.mtime_ms = timestamp_now_millis();
        node.stat.data_length = data.len();
        let stat = node.stat;

        self.fire(&mut tree.node_watches, path, EventType::NodeDataChanged);
        Ok(stat)
    }

    fn get_data(&self, path: &str, watch: Option<Arc<dyn Watcher>>) -> Result<(Vec<u8>, Stat)> {
        validate_path(path)?;
        self.check_available("get_data", path)?;

        let mut tree = self.lock();
        let node = tree.get(path)?;
        let out = (node.data.clone(), node.stat);
        if let Some(w) = watch {
            Self::register(&mut tree.node_watches, path, w);
        }
        Ok(out)
    }

    fn get_children(&self, path: &str, watch: Option<Arc<dyn Watcher>>) -> Result<Vec<String>> {
        validate_path(path)?;
        self.check_available("get_children", path)?;

        let mut tree = self.lock();
        tree.get(path)?;
        let children = tree.children_of(path);
        if let Some(w) = watch {
            Self::register(&mut tree.child_watches, path, w);
        }
        Ok(children)
    }

    fn exists(&self, path: &str, watch: Option<Arc<dyn Watcher>>) -> Result<Option<Stat>> {
        validate_path(path)?;
        self.check_available("exists", path)?;

        let mut tree = self.lock();
        let stat = tree.nodes.get(path).map(|n| n.stat);
        if let Some(w) = watch {
            Self::register(&mut tree.node_watches, path, w);
        }
        Ok(stat)
    }

    fn delete(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        self.check_available("delete", path)?;
        let parent = parent_path(path)
            .ok_or_else(|| Error::InvalidPath("cannot delete the root".into()))?;

        let mut tree = self.lock();
        let node = tree.get(path)?;
        if node.stat.num_children > 0 {
            return Err(Error::NotEmpty(path.to_string()));
        }
        tree.nodes.remove(path);
        if let Some(p) = tree.nodes.get_mut(parent) {
            p.stat.num_children = p.stat.num_children.saturating_sub(1);
        }

        let Tree {
            node_watches,
            child_watches,
            ..
        } = &mut *tree;
        self.fire(node_watches, path, EventType::NodeDeleted);
        self.fire(child_watches, path, EventType::NodeDeleted);
        self.fire(child_watches, parent, EventType::NodeChildrenChanged);
        Ok(())
    }

    fn close(&self) {
        let mut tree = self.lock();
        tree.node_watches.clear();
        tree.child_watches.clear();
        if let Some(session) = tree.session.take() {
            tracing::info!("Session for {} closed", session.address);
        }
    }
}

/// Convenience used by the HTTP surface: every child path of `path`.
pub fn list_child_paths(store: &dyn CoordinationStore, path: &str) -> Result<Vec<String>> {
    Ok(store
        .get_children(path, None)?
        .into_iter()
        .map(|name| child_path(path, &name))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{channel, Receiver};

    fn recorder() -> (Arc<dyn Watcher>, Receiver<WatchedEvent>) {
        let (tx, rx) = channel();
        let tx = Mutex::new(tx);
        let watcher: Arc<dyn Watcher> = Arc::new(move |event: WatchedEvent| {
            let _ = tx.lock().unwrap().send(event);
        });
        (watcher, rx)
    }

    fn next(rx: &Receiver<WatchedEvent>) -> WatchedEvent {
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_create_and_read() {
        let store = MemoryStore::new();
        store.create("/ecs", b"").unwrap();
        store.create("/ecs/A", b"hello").unwrap();

        let (data, stat) = store.get_data("/ecs/A", None).unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(stat.version, 0);
        assert_eq!(store.get_children("/ecs", None).unwrap(), vec!["A"]);
        assert_eq!(store.exists("/ecs", None).unwrap().unwrap().num_children, 1);
    }

    #[test]
    fn test_create_requires_parent_and_is_unique() {
        let store = MemoryStore::new();
        assert!(matches!(store.create("/ecs/A", b""), Err(Error::NoNode(_))));
        store.create("/ecs", b"").unwrap();
        assert!(matches!(store.create("/ecs", b""), Err(Error::NodeExists(_))));
    }

    #[test]
    fn test_children_are_direct_only() {
        let store = MemoryStore::new();
        store.create("/ecs", b"").unwrap();
        store.create("/ecs/A", b"").unwrap();
        store.create("/ecs/A/data", b"").unwrap();
        store.create("/ecs/B", b"").unwrap();
        store.create("/ecsx", b"").unwrap();

        assert_eq!(store.get_children("/ecs", None).unwrap(), vec!["A", "B"]);
        assert_eq!(store.get_children("/", None).unwrap(), vec!["ecs", "ecsx"]);
        assert_eq!(
            list_child_paths(&store, "/ecs").unwrap(),
            vec!["/ecs/A", "/ecs/B"]
        );
    }

    #[test]
    fn test_delete_refuses_non_empty() {
        let store = MemoryStore::new();
        store.create("/ecs", b"").unwrap();
        store.create("/ecs/A", b"").unwrap();
        assert!(matches!(store.delete("/ecs"), Err(Error::NotEmpty(_))));
        store.delete("/ecs/A").unwrap();
        store.delete("/ecs").unwrap();
        assert!(store.exists("/ecs", None).unwrap().is_none());
    }

    #[test]
    fn test_data_watch_is_one_shot() {
        let store = MemoryStore::new();
        store.create("/ecs", b"").unwrap();
        store.create("/ecs/A", b"").unwrap();

        let (watcher, rx) = recorder();
        store.exists("/ecs/A", Some(watcher)).unwrap();
        assert_eq!(store.pending_watches("/ecs/A"), 1);

        let stat = store.set_data("/ecs/A", b"1").unwrap();
        assert_eq!(stat.version, 1);
        store.set_data("/ecs/A", b"2").unwrap();

        assert_eq!(
            next(&rx),
            WatchedEvent::node(EventType::NodeDataChanged, "/ecs/A")
        );
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(store.pending_watches("/ecs/A"), 0);
    }

    #[test]
    fn test_same_watcher_registered_once() {
        let store = MemoryStore::new();
        store.create("/ecs", b"").unwrap();
        let (watcher, _rx) = recorder();
        store.exists("/ecs", Some(watcher.clone())).unwrap();
        store.get_data("/ecs", Some(watcher.clone())).unwrap();
        assert_eq!(store.pending_watches("/ecs"), 1);

        let (other, _rx2) = recorder();
        store.exists("/ecs", Some(other)).unwrap();
        assert_eq!(store.pending_watches("/ecs"), 2);
    }

    #[test]
    fn test_exists_watch_on_missing_path_fires_on_create() {
        let store = MemoryStore::new();
        let (watcher, rx) = recorder();
        assert!(store.exists("/ecs", Some(watcher)).unwrap().is_none());
        store.create("/ecs", b"").unwrap();
        assert_eq!(next(&rx), WatchedEvent::node(EventType::NodeCreated, "/ecs"));
    }

    #[test]
    fn test_child_watch() {
        let store = MemoryStore::new();
        store.create("/ecs", b"").unwrap();
        let (watcher, rx) = recorder();
        store.get_children("/ecs", Some(watcher)).unwrap();

        store.create("/ecs/A", b"").unwrap();
        assert_eq!(
            next(&rx),
            WatchedEvent::node(EventType::NodeChildrenChanged, "/ecs")
        );
    }

    #[test]
    fn test_session_events() {
        let store = MemoryStore::new();
        let (watcher, rx) = recorder();
        store
            .connect("127.0.0.1:2181", Duration::from_secs(5), watcher)
            .unwrap();
        assert_eq!(store.session_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(next(&rx), WatchedEvent::session(KeeperState::SyncConnected));

        store.disconnect();
        assert_eq!(next(&rx), WatchedEvent::session(KeeperState::Disconnected));
        assert!(matches!(
            store.create("/ecs", b""),
            Err(Error::CoordinationUnavailable(_))
        ));

        store.reconnect();
        assert_eq!(next(&rx), WatchedEvent::session(KeeperState::SyncConnected));
        store.create("/ecs", b"").unwrap();

        store.expire();
        assert_eq!(next(&rx), WatchedEvent::session(KeeperState::Expired));
        assert_eq!(store.session_timeout(), None);
    }

    #[test]
    fn test_connect_fails_when_unavailable() {
        let store = MemoryStore::new();
        store.disconnect();
        let (watcher, _rx) = recorder();
        assert!(store
            .connect("127.0.0.1:2181", Duration::from_secs(1), watcher)
            .is_err());
    }
}
