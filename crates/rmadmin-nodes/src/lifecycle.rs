//! Node decommissioning lifecycle.
//!
//! ```text
//!              graceful                  drained / timer
//!   Running ──────────────▶ Decommissioning ──────────────▶ Decommissioned
//!      ▲                         │
//!      └──── recommissioned ─────┘
//!      │                                                        ▲
//!      └──────────────────── forceful ──────────────────────────┘
//! ```
//!
//! Each node's state lives in one atomic cell. Every transition is a
//! compare-and-set from an expected state, so when the drain signal and
//! the grace timer fire together exactly one of them moves the node and
//! the other finds the state already changed.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use rmadmin_state::{NodeId, epoch_secs};

use crate::error::{NodeError, NodeResult};
use crate::hosts::NodeListSource;
use crate::registry::NodeRegistry;

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DecommissionState {
    Running = 0,
    Decommissioning = 1,
    Decommissioned = 2,
}

impl DecommissionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::Decommissioning,
            _ => Self::Decommissioned,
        }
    }
}

/// How newly excluded nodes are taken out of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecommissionType {
    /// Same as `Forceful`.
    #[default]
    Normal,
    Graceful,
    Forceful,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    Graceful,
    Forced,
    Recommissioned,
    Drained,
    TimedOut,
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: DecommissionState,
    pub to: DecommissionState,
    pub cause: TransitionCause,
    pub at: u64,
}

/// What a `refresh_nodes` pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshNodesSummary {
    pub started: Vec<NodeId>,
    pub decommissioned: Vec<NodeId>,
    pub recommissioned: Vec<NodeId>,
}

struct NodeCell {
    state: AtomicU8,
    /// Bumped whenever a timer is armed or cancelled; a timer only acts
    /// if the epoch it was armed with is still current.
    epoch: AtomicU64,
    timer: Mutex<Option<JoinHandle<()>>>,
    log: Mutex<Vec<Transition>>,
}

impl NodeCell {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(DecommissionState::Running as u8),
            epoch: AtomicU64::new(0),
            timer: Mutex::new(None),
            log: Mutex::new(Vec::new()),
        }
    }

    fn load(&self) -> DecommissionState {
        DecommissionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(
        &self,
        node: &NodeId,
        from: DecommissionState,
        to: DecommissionState,
        cause: TransitionCause,
    ) -> bool {
        if self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(%node, ?from, ?to, ?cause, "transition lost, state already changed");
            return false;
        }
        self.log.lock().unwrap_or_else(|e| e.into_inner()).push(Transition {
            from,
            to,
            cause,
            at: epoch_secs(),
        });
        info!(%node, ?from, ?to, ?cause, "node state changed");
        true
    }

    fn cancel_timer(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(handle) = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

/// Owns the decommission state of every known node.
pub struct NodeLifecycleManager {
    registry: Arc<dyn NodeRegistry>,
    hosts: Arc<dyn NodeListSource>,
    cells: DashMap<NodeId, Arc<NodeCell>>,
    default_timeout: Duration,
}

impl NodeLifecycleManager {
    pub fn new(registry: Arc<dyn NodeRegistry>, hosts: Arc<dyn NodeListSource>) -> Self {
        Self {
            registry,
            hosts,
            cells: DashMap::new(),
            default_timeout: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Grace period used when a graceful request does not carry one.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn cell(&self, node: &NodeId) -> Arc<NodeCell> {
        Arc::clone(
            self.cells
                .entry(node.clone())
                .or_insert_with(|| Arc::new(NodeCell::new()))
                .value(),
        )
    }

    /// Reload the host lists and move nodes to match them.
    ///
    /// Must be called from within a Tokio runtime: graceful
    /// decommissions spawn their grace timer.
    pub fn refresh_nodes(&self, mode: DecommissionType, timeout: Option<Duration>) -> NodeResult<RefreshNodesSummary> {
        let lists = self.hosts.load()?;
        let timeout = timeout.unwrap_or(self.default_timeout);
        let mut summary = RefreshNodesSummary::default();

        for node in self.registry.list_known_nodes() {
            let cell = self.cell(&node);
            let excluded = lists.is_excluded(&node);
            match (excluded, cell.load()) {
                (true, DecommissionState::Running) => {
                    if mode == DecommissionType::Graceful && self.registry.is_live(&node) {
                        if cell.transition(
                            &node,
                            DecommissionState::Running,
                            DecommissionState::Decommissioning,
                            TransitionCause::Graceful,
                        ) {
                            self.arm_timer(&node, &cell, timeout);
                            summary.started.push(node);
                        }
                    } else if cell.transition(
                        &node,
                        DecommissionState::Running,
                        DecommissionState::Decommissioned,
                        TransitionCause::Forced,
                    ) {
                        summary.decommissioned.push(node);
                    }
                }
                (true, DecommissionState::Decommissioning) if mode != DecommissionType::Graceful => {
                    if cell.transition(
                        &node,
                        DecommissionState::Decommissioning,
                        DecommissionState::Decommissioned,
                        TransitionCause::Forced,
                    ) {
                        cell.cancel_timer();
                        summary.decommissioned.push(node);
                    }
                }
                (false, DecommissionState::Decommissioning) => {
                    if cell.transition(
                        &node,
                        DecommissionState::Decommissioning,
                        DecommissionState::Running,
                        TransitionCause::Recommissioned,
                    ) {
                        cell.cancel_timer();
                        summary.recommissioned.push(node);
                    }
                }
                (excluded, state) => {
                    debug!(%node, excluded, ?state, "no lifecycle change");
                }
            }
        }

        info!(
            ?mode,
            started = summary.started.len(),
            decommissioned = summary.decommissioned.len(),
            recommissioned = summary.recommissioned.len(),
            "node lists refreshed"
        );
        Ok(summary)
    }

    fn arm_timer(&self, node: &NodeId, cell: &Arc<NodeCell>, timeout: Duration) {
        let epoch = cell.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let timer_cell = Arc::clone(cell);
        let timer_node = node.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if timer_cell.epoch.load(Ordering::Acquire) != epoch {
                return;
            }
            if timer_cell.transition(
                &timer_node,
                DecommissionState::Decommissioning,
                DecommissionState::Decommissioned,
                TransitionCause::TimedOut,
            ) {
                warn!(node = %timer_node, ?timeout, "grace period expired, decommission forced");
            }
        });
        let previous = cell.timer.lock().unwrap_or_else(|e| e.into_inner()).replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        debug!(%node, ?timeout, "grace timer armed");
    }

    /// Clean-shutdown signal from a draining node.
    ///
    /// Returns whether this call completed the decommission. Nodes with
    /// work still outstanding, or not decommissioning, are left alone.
    pub fn report_drained(&self, node: &NodeId, outstanding_work: u32) -> NodeResult<bool> {
        let Some(cell) = self.cells.get(node).map(|c| Arc::clone(c.value())) else {
            if self.registry.is_known(node) {
                return Ok(false);
            }
            return Err(NodeError::UnknownNode(node.clone()));
        };
        if outstanding_work > 0 {
            debug!(%node, outstanding_work, "node still draining");
            return Ok(false);
        }
        let done = cell.transition(
            node,
            DecommissionState::Decommissioning,
            DecommissionState::Decommissioned,
            TransitionCause::Drained,
        );
        if done {
            cell.cancel_timer();
        }
        Ok(done)
    }

    /// Nodes currently in `Decommissioning`.
    pub fn check_for_decommissioning_nodes(&self) -> BTreeSet<NodeId> {
        self.cells
            .iter()
            .filter(|e| e.value().load() == DecommissionState::Decommissioning)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn state_of(&self, node: &NodeId) -> Option<DecommissionState> {
        match self.cells.get(node) {
            Some(cell) => Some(cell.load()),
            None if self.registry.is_known(node) => Some(DecommissionState::Running),
            None => None,
        }
    }

    pub fn transitions(&self, node: &NodeId) -> Vec<Transition> {
        self.cells
            .get(node)
            .map(|cell| cell.log.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .unwrap_or_default()
    }

    /// Nodes that currently have a lifecycle cell.
    pub fn tracked_nodes(&self) -> BTreeSet<NodeId> {
        self.cells.iter().map(|e| e.key().clone()).collect()
    }

    pub fn on_registered(&self, node: &NodeId) {
        self.cell(node);
    }

    pub fn on_removed(&self, node: &NodeId) {
        if let Some((_, cell)) = self.cells.remove(node) {
            cell.cancel_timer();
            debug!(%node, "lifecycle cell dropped");
        }
    }

    /// Abort every pending grace timer.
    pub fn shutdown(&self) {
        for cell in self.cells.iter() {
            cell.value().cancel_timer();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosts::{HostLists, StaticNodeListSource};
    use crate::registry::InMemoryNodeRegistry;

    fn node(host: &str) -> NodeId {
        NodeId::new(host, 8041)
    }

    struct Harness {
        registry: Arc<InMemoryNodeRegistry>,
        hosts: Arc<StaticNodeListSource>,
        manager: NodeLifecycleManager,
    }

    fn harness(nodes: &[&str]) -> Harness {
        let registry = Arc::new(InMemoryNodeRegistry::new().with_liveness_timeout(Duration::from_secs(7200)));
        let hosts = Arc::new(StaticNodeListSource::new());
        for n in nodes {
            registry.register(node(n));
        }
        let manager = NodeLifecycleManager::new(registry.clone(), hosts.clone())
            .with_default_timeout(Duration::from_secs(60));
        Harness {
            registry,
            hosts,
            manager,
        }
    }

    fn causes(manager: &NodeLifecycleManager, n: &NodeId) -> Vec<TransitionCause> {
        manager.transitions(n).into_iter().map(|t| t.cause).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_then_timer_forces_decommission() {
        let h = harness(&["a", "b"]);
        h.hosts.exclude(vec![node("a")]);

        let summary = h
            .manager
            .refresh_nodes(DecommissionType::Graceful, Some(Duration::from_secs(10)))
            .unwrap();
        assert_eq!(summary.started, vec![node("a")]);
        assert_eq!(h.manager.state_of(&node("a")), Some(DecommissionState::Decommissioning));
        assert_eq!(h.manager.state_of(&node("b")), Some(DecommissionState::Running));
        assert_eq!(h.manager.check_for_decommissioning_nodes(), BTreeSet::from([node("a")]));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(h.manager.state_of(&node("a")), Some(DecommissionState::Decommissioned));
        assert_eq!(
            causes(&h.manager, &node("a")),
            vec![TransitionCause::Graceful, TransitionCause::TimedOut]
        );
        assert!(h.manager.check_for_decommissioning_nodes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_before_timeout_wins() {
        let h = harness(&["a"]);
        h.hosts.exclude(vec![node("a")]);
        h.manager.refresh_nodes(DecommissionType::Graceful, None).unwrap();

        assert!(!h.manager.report_drained(&node("a"), 3).unwrap());
        assert_eq!(h.manager.state_of(&node("a")), Some(DecommissionState::Decommissioning));

        assert!(h.manager.report_drained(&node("a"), 0).unwrap());
        assert!(!h.manager.report_drained(&node("a"), 0).unwrap());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(
            causes(&h.manager, &node("a")),
            vec![TransitionCause::Graceful, TransitionCause::Drained]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn recommission_cancels_timer() {
        let h = harness(&["a"]);
        h.hosts.exclude(vec![node("a")]);
        h.manager.refresh_nodes(DecommissionType::Graceful, None).unwrap();

        h.hosts.set(HostLists::default());
        let summary = h.manager.refresh_nodes(DecommissionType::Graceful, None).unwrap();
        assert_eq!(summary.recommissioned, vec![node("a")]);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.manager.state_of(&node("a")), Some(DecommissionState::Running));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_does_not_cut_second_grace_period_short() {
        let h = harness(&["a"]);
        h.hosts.exclude(vec![node("a")]);
        h.manager
            .refresh_nodes(DecommissionType::Graceful, Some(Duration::from_secs(10)))
            .unwrap();
        h.hosts.set(HostLists::default());
        h.manager.refresh_nodes(DecommissionType::Graceful, None).unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        h.hosts.exclude(vec![node("a")]);
        h.manager
            .refresh_nodes(DecommissionType::Graceful, Some(Duration::from_secs(30)))
            .unwrap();

        // The first timer would have fired at t=10.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.manager.state_of(&node("a")), Some(DecommissionState::Decommissioning));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.manager.state_of(&node("a")), Some(DecommissionState::Decommissioned));
    }

    #[tokio::test]
    async fn forceful_and_normal_skip_draining() {
        let h = harness(&["a", "b"]);
        h.hosts.exclude(vec![node("a")]);
        let summary = h.manager.refresh_nodes(DecommissionType::Forceful, None).unwrap();
        assert_eq!(summary.decommissioned, vec![node("a")]);

        h.hosts.exclude(vec![node("a"), node("b")]);
        let summary = h.manager.refresh_nodes(DecommissionType::Normal, None).unwrap();
        assert_eq!(summary.decommissioned, vec![node("b")]);
        assert_eq!(causes(&h.manager, &node("a")), vec![TransitionCause::Forced]);
    }

    #[tokio::test]
    async fn forceful_finishes_a_graceful_decommission() {
        let h = harness(&["a"]);
        h.hosts.exclude(vec![node("a")]);
        h.manager.refresh_nodes(DecommissionType::Graceful, None).unwrap();
        let summary = h.manager.refresh_nodes(DecommissionType::Forceful, None).unwrap();
        assert_eq!(summary.decommissioned, vec![node("a")]);
        assert_eq!(h.manager.state_of(&node("a")), Some(DecommissionState::Decommissioned));
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_on_dead_node_decommissions_immediately() {
        let registry = Arc::new(InMemoryNodeRegistry::new().with_liveness_timeout(Duration::from_secs(5)));
        registry.register(node("a"));
        let hosts = Arc::new(StaticNodeListSource::new());
        hosts.exclude(vec![node("a")]);
        let manager = NodeLifecycleManager::new(registry.clone(), hosts);

        tokio::time::advance(Duration::from_secs(10)).await;
        let summary = manager.refresh_nodes(DecommissionType::Graceful, None).unwrap();
        assert!(summary.started.is_empty());
        assert_eq!(summary.decommissioned, vec![node("a")]);
    }

    #[tokio::test]
    async fn decommissioned_node_is_not_revived_by_inclusion() {
        let h = harness(&["a"]);
        h.hosts.exclude(vec![node("a")]);
        h.manager.refresh_nodes(DecommissionType::Forceful, None).unwrap();

        h.hosts.set(HostLists::default());
        let summary = h.manager.refresh_nodes(DecommissionType::Graceful, None).unwrap();
        assert_eq!(summary, RefreshNodesSummary::default());
        assert_eq!(h.manager.state_of(&node("a")), Some(DecommissionState::Decommissioned));
        assert_eq!(h.manager.transitions(&node("a")).len(), 1);
    }

    #[tokio::test]
    async fn report_drained_for_unknown_node() {
        let h = harness(&[]);
        assert!(matches!(
            h.manager.report_drained(&node("ghost"), 0),
            Err(NodeError::UnknownNode(_))
        ));
        assert_eq!(h.manager.state_of(&node("ghost")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn removal_drops_cell_and_timer() {
        let h = harness(&["a"]);
        h.hosts.exclude(vec![node("a")]);
        h.manager
            .refresh_nodes(DecommissionType::Graceful, Some(Duration::from_secs(10)))
            .unwrap();

        h.registry.remove(&node("a"));
        h.manager.on_removed(&node("a"));
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.manager.state_of(&node("a")), None);
        assert!(h.manager.transitions(&node("a")).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn drain_and_timer_race_yields_one_transition() {
        let names: Vec<String> = (0..64).map(|i| format!("race{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let h = harness(&refs);
        let all: Vec<NodeId> = refs.iter().map(|n| node(n)).collect();
        h.hosts.exclude(all.clone());

        let manager = Arc::new(h.manager);
        manager
            .refresh_nodes(DecommissionType::Graceful, Some(Duration::from_millis(1)))
            .unwrap();

        let mut tasks = Vec::new();
        for n in all.clone() {
            let manager = Arc::clone(&manager);
            tasks.push(tokio::spawn(async move {
                manager.report_drained(&n, 0).unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        for n in &all {
            assert_eq!(manager.state_of(n), Some(DecommissionState::Decommissioned));
            let finals = manager
                .transitions(n)
                .into_iter()
                .filter(|t| t.to == DecommissionState::Decommissioned)
                .count();
            assert_eq!(finals, 1, "node {n} decommissioned more than once");
        }
    }
}
