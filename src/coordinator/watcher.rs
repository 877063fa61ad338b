//! Membership watcher
//!
//! Turns one-shot coordination-store watches into a blocking, countable wait:
//!
//! ```text
//! DISCONNECTED -> CONNECTING -> CONNECTED -> WATCHING_ROOT -> AWAITING(k) -> RESOLVED
//! ```
//!
//! Watch callbacks run on the store's notification thread. They are the only
//! code touching watcher state from outside the caller, and they do it under
//! the same mutex the caller waits on. Callbacks hold a `Weak` handle, so a
//! dropped watcher simply stops reacting.
//!
//! Every `set_semaphore` opens a new await session with its own epoch. A
//! confirmation is one `NodeDataChanged` on a pending child path; each path
//! confirms at most once, and events carrying a stale epoch are ignored.

use crate::common::Result;
use crate::store::{
    child_path, CoordinationClient, EventType, KeeperState, WatchedEvent, Watcher,
};
use crate::Error;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

/// Connection-level phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disconnected,
    Connecting,
    Connected,
    WatchingRoot,
}

/// How an await session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum AwaitOutcome {
    Success,
    Timeout { confirmed: usize, target: usize },
}

impl AwaitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AwaitOutcome::Success)
    }
}

/// Observable watcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WatcherState {
    Disconnected,
    Connecting,
    Connected,
    WatchingRoot,
    Awaiting { remaining: usize },
    Resolved { result: AwaitOutcome },
}

struct AwaitSession {
    epoch: u64,
    target: usize,
    remaining: usize,
    /// Child paths that have not confirmed yet
    pending: BTreeSet<String>,
}

struct Inner {
    phase: Phase,
    session: Option<AwaitSession>,
    last_outcome: Option<AwaitOutcome>,
    next_epoch: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    cond: Condvar,
    client: Arc<CoordinationClient>,
    root_path: String,
    /// Session watcher and root-path watcher
    root_watcher: Arc<dyn Watcher>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn on_connected(&self) {
        {
            let mut inner = self.lock();
            inner.phase = Phase::Connected;
            self.cond.notify_all();
        }
        tracing::info!("Successfully connected to coordination store");

        if self.client.create_path(&self.root_path, b"") {
            self.rearm_root_exists();
            self.rearm_root_children();
        } else {
            tracing::warn!("Cannot ensure {} after connect", self.root_path);
        }
    }

    fn on_session_lost(&self, state: KeeperState) {
        let mut inner = self.lock();
        inner.phase = Phase::Disconnected;
        self.cond.notify_all();
        tracing::warn!("Lost coordination store session ({:?})", state);
    }

    fn rearm_root_children(&self) {
        match self
            .client
            .children(&self.root_path, Some(Arc::clone(&self.root_watcher)))
        {
            Ok(children) => {
                let mut inner = self.lock();
                if inner.phase == Phase::Connected {
                    inner.phase = Phase::WatchingRoot;
                }
                tracing::debug!("Watching {} ({} children)", self.root_path, children.len());
            }
            // Root is gone; wait for it to come back.
            Err(Error::NoNode(_)) => self.rearm_root_exists(),
            Err(e) => tracing::error!("Cannot watch children of {}: {}", self.root_path, e),
        }
    }

    fn rearm_root_exists(&self) {
        if let Err(e) = self
            .client
            .exists(&self.root_path, Some(Arc::clone(&self.root_watcher)))
        {
            tracing::warn!("Cannot re-arm watch on {}: {}", self.root_path, e);
        }
    }

    fn on_child_event(&self, epoch: u64, event: &WatchedEvent, watcher: &Arc<dyn Watcher>) {
        let Some(path) = event.path.as_deref() else {
            return;
        };

        let rearm = {
            let mut inner = self.lock();
            let Some(session) = inner.session.as_mut().filter(|s| s.epoch == epoch) else {
                tracing::debug!("Ignoring {} from a finished await session", event);
                return;
            };

            if event.kind == EventType::NodeDataChanged {
                if session.pending.remove(path) {
                    session.remaining = session.remaining.saturating_sub(1);
                    tracing::info!(
                        "Node {} confirmed ({} remaining)",
                        path,
                        session.remaining
                    );
                    if session.remaining == 0 {
                        self.cond.notify_all();
                    }
                }
                false
            } else {
                tracing::info!("Change is not a confirmation: {}", event);
                session.pending.contains(path)
            }
        };

        // The registration that just fired is spent; keep watching until the
        // path confirms.
        if rearm {
            if let Err(e) = self.client.exists(path, Some(Arc::clone(watcher))) {
                tracing::warn!(
                    "Cannot re-arm watch on {}, it can no longer confirm: {}",
                    path,
                    e
                );
            }
        }
    }
}

struct RootWatcher {
    shared: Weak<Shared>,
}

impl Watcher for RootWatcher {
    fn process(&self, event: WatchedEvent) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        tracing::debug!("Root watcher triggered {}", event);

        match (event.state, event.kind) {
            (KeeperState::SyncConnected, EventType::None) => shared.on_connected(),
            (KeeperState::SyncConnected, EventType::NodeChildrenChanged) => {
                tracing::info!("Children of {} changed", shared.root_path);
                shared.rearm_root_children();
            }
            (KeeperState::SyncConnected, EventType::NodeDeleted) => {
                tracing::warn!("Root {} was deleted", shared.root_path);
                shared.rearm_root_exists();
            }
            (KeeperState::SyncConnected, _) => shared.rearm_root_exists(),
            (state, _) => shared.on_session_lost(state),
        }
    }
}

struct ChildWatcher {
    shared: Weak<Shared>,
    epoch: u64,
    this: Weak<ChildWatcher>,
}

impl Watcher for ChildWatcher {
    fn process(&self, event: WatchedEvent) {
        let (Some(shared), Some(this)) = (self.shared.upgrade(), self.this.upgrade()) else {
            return;
        };
        if event.state != KeeperState::SyncConnected {
            tracing::warn!("Child watcher saw session state {:?}", event.state);
            return;
        }
        let this: Arc<dyn Watcher> = this;
        shared.on_child_event(self.epoch, &event, &this);
    }
}

/// Blocking wait for node liveness confirmations.
pub struct MembershipWatcher {
    shared: Arc<Shared>,
}

impl MembershipWatcher {
    /// Open the session, wait for it to be established, make sure the root
    /// path exists and start watching it.
    ///
    /// Blocks for at most `session_timeout`.
    pub fn init(
        client: Arc<CoordinationClient>,
        root_path: impl Into<String>,
        session_timeout: Duration,
    ) -> Result<Self> {
        let root_path = root_path.into();
        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| Shared {
            inner: Mutex::new(Inner {
                phase: Phase::Connecting,
                session: None,
                last_outcome: None,
                next_epoch: 0,
            }),
            cond: Condvar::new(),
            client,
            root_path,
            root_watcher: Arc::new(RootWatcher {
                shared: weak.clone(),
            }),
        });
        let watcher = Self { shared };

        tracing::info!(
            "Connecting to coordination store at {}",
            watcher.shared.client.address()
        );
        if let Err(e) = watcher
            .shared
            .client
            .connect(session_timeout, Arc::clone(&watcher.shared.root_watcher))
        {
            watcher.shared.lock().phase = Phase::Disconnected;
            return Err(e);
        }

        watcher.wait_for_session(session_timeout)?;

        let root = watcher.shared.root_path.clone();
        if !watcher.shared.client.create_path(&root, b"") {
            return Err(Error::CoordinationUnavailable(format!(
                "cannot create root path {}",
                root
            )));
        }
        watcher.shared.rearm_root_children();
        Ok(watcher)
    }

    fn wait_for_session(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.lock();
        while inner.phase == Phase::Connecting {
            let now = Instant::now();
            if now >= deadline {
                inner.phase = Phase::Disconnected;
                return Err(Error::CoordinationUnavailable(format!(
                    "session not established within {:?}",
                    timeout
                )));
            }
            inner = self
                .shared
                .cond
                .wait_timeout(inner, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        match inner.phase {
            Phase::Disconnected => Err(Error::CoordinationUnavailable(
                "session lost while connecting".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn root_path(&self) -> &str {
        &self.shared.root_path
    }

    pub fn client(&self) -> &Arc<CoordinationClient> {
        &self.shared.client
    }

    pub fn state(&self) -> WatcherState {
        let inner = self.shared.lock();
        match inner.phase {
            Phase::Disconnected => WatcherState::Disconnected,
            Phase::Connecting => WatcherState::Connecting,
            Phase::Connected => WatcherState::Connected,
            Phase::WatchingRoot => match (&inner.session, inner.last_outcome) {
                (Some(session), _) => WatcherState::Awaiting {
                    remaining: session.remaining,
                },
                (None, Some(result)) => WatcherState::Resolved { result },
                (None, None) => WatcherState::WatchingRoot,
            },
        }
    }

    /// Arm one watch per named child of the root and expect `count`
    /// confirmations. Does not block.
    ///
    /// Replaces any previous await session. Fails with
    /// `CoordinationUnavailable` if any watch could not be registered; the
    /// others stay armed.
    pub fn set_semaphore<S: AsRef<str>>(&self, count: usize, names: &[S]) -> Result<()> {
        let paths: Vec<String> = names
            .iter()
            .map(|n| child_path(&self.shared.root_path, n.as_ref()))
            .collect();

        let watcher: Arc<dyn Watcher> = {
            let mut inner = self.shared.lock();
            let epoch = inner.next_epoch;
            inner.next_epoch += 1;
            inner.session = Some(AwaitSession {
                epoch,
                target: count,
                remaining: count,
                pending: paths.iter().cloned().collect(),
            });
            inner.last_outcome = None;
            if count == 0 {
                self.shared.cond.notify_all();
            }

            Arc::new_cyclic(|this: &Weak<ChildWatcher>| ChildWatcher {
                shared: Arc::downgrade(&self.shared),
                epoch,
                this: this.clone(),
            })
        };

        // Keep observing the root while we wait.
        self.shared.rearm_root_children();

        let mut failed = Vec::new();
        for path in &paths {
            if self
                .shared
                .client
                .exists(path, Some(Arc::clone(&watcher)))
                .is_err()
            {
                failed.push(path.clone());
            }
        }

        tracing::info!("Awaiting {} confirmation(s) from {:?}", count, paths);
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::CoordinationUnavailable(format!(
                "cannot watch {:?}",
                failed
            )))
        }
    }

    /// Block until the pending confirmations reach zero or `timeout`
    /// elapses. Returns true only in the first case.
    pub fn await_nodes(&self, timeout: Duration) -> bool {
        self.await_outcome(timeout).is_success()
    }

    /// Like [`await_nodes`](Self::await_nodes), reporting how many
    /// confirmations arrived.
    pub fn await_outcome(&self, timeout: Duration) -> AwaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.lock();

        loop {
            let Some(session) = inner.session.as_ref() else {
                tracing::warn!("await_nodes called without an armed await session");
                return AwaitOutcome::Timeout {
                    confirmed: 0,
                    target: 0,
                };
            };
            if session.remaining == 0 {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            inner = self
                .shared
                .cond
                .wait_timeout(inner, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }

        let outcome = match inner.session.take() {
            Some(session) if session.remaining == 0 => AwaitOutcome::Success,
            Some(session) => AwaitOutcome::Timeout {
                confirmed: session.target - session.remaining,
                target: session.target,
            },
            None => AwaitOutcome::Timeout {
                confirmed: 0,
                target: 0,
            },
        };
        inner.last_outcome = Some(outcome);
        tracing::info!("Finished waiting for nodes: {:?}", outcome);
        outcome
    }

    /// Close the session. Pending waits run into their deadline.
    pub fn close(&self) {
        self.shared.client.close();
        let mut inner = self.shared.lock();
        inner.phase = Phase::Disconnected;
        self.shared.cond.notify_all();
    }
}
