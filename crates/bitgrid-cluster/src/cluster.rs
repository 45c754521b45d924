//! The cluster: membership, lifecycle state and slice ownership.
//!
//! `Cluster` is shared between every request handler, so all of its state
//! lives behind one lock. Membership changes and resize job progression
//! take the write lock, which serializes them against each other; there
//! is at most one resize job at a time.

use std::sync::RwLock;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::placement::{DEFAULT_PARTITION_COUNT, DEFAULT_REPLICA_COUNT};
use crate::{
    ClusterError, ClusterState, IndexSlices, JobId, JobStatus, Node, NodeId, Placement,
    ResizeAction, ResizeInstruction, ResizeJob, Topology,
};

/// Static cluster settings.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Copies kept of every slice.
    pub replicas: usize,
    /// Number of placement partitions.
    pub partitions: u32,
    /// Queries slower than this are logged.
    pub long_query_time: Duration,
    /// Statically configured peers (the local node may be included).
    pub hosts: Vec<Node>,
    /// Initial coordinator. Defaults to the lowest node id.
    pub coordinator: Option<NodeId>,
    /// Member count at which a starting cluster becomes normal by itself.
    /// Zero disables automatic bootstrap.
    pub expected_nodes: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            replicas: DEFAULT_REPLICA_COUNT,
            partitions: DEFAULT_PARTITION_COUNT,
            long_query_time: Duration::from_secs(60),
            hosts: Vec::new(),
            coordinator: None,
            expected_nodes: 0,
        }
    }
}

#[derive(Debug)]
struct Inner {
    topology: Topology,
    state: ClusterState,
    job: Option<ResizeJob>,
}

/// Thread-safe view of the cluster from one node.
#[derive(Debug)]
pub struct Cluster {
    local: NodeId,
    placement: Placement,
    long_query_time: Duration,
    expected_nodes: usize,
    inner: RwLock<Inner>,
}

impl Cluster {
    /// Creates a cluster in `STARTING` made of the local node plus the
    /// configured hosts.
    pub fn new(local: Node, config: ClusterConfig) -> Self {
        let local_id = local.id.clone();
        let mut topology = Topology::from_nodes(std::iter::once(local).chain(config.hosts));
        let configured = match &config.coordinator {
            Some(id) => match topology.set_coordinator(id) {
                Ok(()) => true,
                Err(e) => {
                    warn!(coordinator = %id, error = %e, "configured coordinator is not a member");
                    false
                }
            },
            None => false,
        };
        if !configured {
            topology.set_lowest_coordinator();
        }

        Self {
            local: local_id,
            placement: Placement::new(config.partitions, config.replicas),
            long_query_time: config.long_query_time,
            expected_nodes: config.expected_nodes,
            inner: RwLock::new(Inner {
                topology,
                state: ClusterState::Starting,
                job: None,
            }),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ClusterState {
        self.read().state
    }

    /// Moves a starting cluster to `NORMAL`.
    pub fn bootstrap(&self) -> Result<(), ClusterError> {
        let mut inner = self.write();
        if inner.state != ClusterState::Starting {
            return Err(ClusterError::InvalidTransition {
                from: inner.state,
                to: ClusterState::Normal,
            });
        }
        inner.state = ClusterState::Normal;
        info!(nodes = inner.topology.len(), "cluster is normal");
        Ok(())
    }

    /// Adds a member while the cluster is still forming.
    pub fn add_host(&self, node: Node) -> Result<(), ClusterError> {
        let mut inner = self.write();
        if inner.state != ClusterState::Starting {
            return Err(ClusterError::InvalidTransition {
                from: inner.state,
                to: ClusterState::Starting,
            });
        }
        let id = node.id.clone();
        if !inner.topology.insert(node) {
            return Err(ClusterError::NodeExists(id));
        }
        if self.expected_nodes > 0 && inner.topology.len() >= self.expected_nodes {
            inner.state = ClusterState::Normal;
            info!(nodes = inner.topology.len(), "all expected nodes joined");
        }
        Ok(())
    }

    /// Installs membership and state announced by the coordinator.
    pub fn apply_status(&self, state: ClusterState, nodes: Vec<Node>) {
        let mut inner = self.write();
        if inner.job.is_some() {
            warn!("ignoring cluster status while running a resize job");
            return;
        }
        if !nodes.is_empty() {
            inner.topology = Topology::from_nodes(nodes);
        }
        if inner.state != state {
            info!(from = %inner.state, to = %state, "cluster state changed");
        }
        inner.state = state;
    }

    /// Current members in id order.
    pub fn nodes(&self) -> Vec<Node> {
        self.read().topology.nodes().to_vec()
    }

    pub fn node_by_id(&self, id: &NodeId) -> Option<Node> {
        self.read().topology.get(id).cloned()
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    pub fn local_node(&self) -> Option<Node> {
        self.node_by_id(&self.local)
    }

    pub fn coordinator(&self) -> Option<Node> {
        self.read().topology.coordinator().cloned()
    }

    pub fn is_coordinator(&self) -> bool {
        self.read()
            .topology
            .coordinator()
            .is_some_and(|n| n.id == self.local)
    }

    /// Flags `id` as the only coordinator.
    pub fn set_coordinator(&self, id: &NodeId) -> Result<(), ClusterError> {
        let mut inner = self.write();
        inner.topology.set_coordinator(id)?;
        info!(node = %id, "coordinator changed");
        Ok(())
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn replicas(&self) -> usize {
        self.placement.replicas()
    }

    pub fn long_query_time(&self) -> Duration {
        self.long_query_time
    }

    /// Owners of a slice, primary first.
    pub fn owners(&self, index: &str, slice: u64) -> Vec<Node> {
        let inner = self.read();
        self.placement
            .owners(inner.topology.nodes(), index, slice)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn owns_slice(&self, node: &NodeId, index: &str, slice: u64) -> bool {
        let inner = self.read();
        self.placement
            .owns_slice(inner.topology.nodes(), node, index, slice)
    }

    pub fn owned_slices(&self, node: &NodeId, index: &str, max_slice: u64) -> Vec<u64> {
        let inner = self.read();
        self.placement
            .owned_slices(inner.topology.nodes(), node, index, max_slice)
    }

    /// Starts a resize job adding `node`.
    pub fn node_join(&self, node: Node) -> Result<JobId, ClusterError> {
        let mut inner = self.write();
        Self::check_can_resize(&inner)?;
        if inner.topology.contains(&node.id) {
            return Err(ClusterError::NodeExists(node.id));
        }
        let mut target = inner.topology.clone();
        let mut joining = node.clone();
        joining.is_coordinator = false;
        target.insert(joining);
        Ok(Self::start_job(&mut inner, ResizeAction::Join(node), target))
    }

    /// Starts a resize job removing `id`.
    pub fn node_leave(&self, id: &NodeId) -> Result<JobId, ClusterError> {
        let mut inner = self.write();
        Self::check_can_resize(&inner)?;
        if !inner.topology.contains(id) {
            return Err(ClusterError::NodeNotFound(id.clone()));
        }
        if inner.topology.len() == 1 {
            return Err(ClusterError::LastNode);
        }
        let mut target = inner.topology.clone();
        target.remove(id);
        if target.coordinator().is_none() {
            if let Some(first) = target.nodes().first().map(|n| n.id.clone()) {
                target.set_coordinator(&first)?;
            }
        }
        Ok(Self::start_job(
            &mut inner,
            ResizeAction::Leave(id.clone()),
            target,
        ))
    }

    fn check_can_resize(inner: &Inner) -> Result<(), ClusterError> {
        if inner.job.is_some() || inner.state == ClusterState::Resizing {
            return Err(ClusterError::ResizeInProgress);
        }
        if inner.state != ClusterState::Normal {
            return Err(ClusterError::InvalidTransition {
                from: inner.state,
                to: ClusterState::Resizing,
            });
        }
        Ok(())
    }

    fn start_job(inner: &mut Inner, action: ResizeAction, target: Topology) -> JobId {
        let job = ResizeJob::new(
            action,
            inner.topology.nodes().to_vec(),
            target.nodes().to_vec(),
        );
        let id = job.id();
        info!(job = %id, action = %job.action(), "resize job started");
        inner.job = Some(job);
        inner.state = ClusterState::Resizing;
        id
    }

    pub fn current_job_id(&self) -> Option<JobId> {
        self.read().job.as_ref().map(|j| j.id())
    }

    pub fn job_status(&self) -> Option<JobStatus> {
        self.read().job.as_ref().map(|j| j.status())
    }

    /// Membership the current job is moving to.
    pub fn job_target(&self) -> Option<Vec<Node>> {
        self.read().job.as_ref().map(|j| j.target_nodes().to_vec())
    }

    /// Membership the current job is moving away from.
    pub fn job_old_nodes(&self) -> Option<Vec<Node>> {
        self.read().job.as_ref().map(|j| j.old_nodes().to_vec())
    }

    pub fn subscribe_job(&self) -> Option<watch::Receiver<JobStatus>> {
        self.read().job.as_ref().map(|j| j.subscribe())
    }

    /// Plans the current job against `schema`.
    pub fn plan_current_job(
        &self,
        schema: &[IndexSlices],
    ) -> Result<Vec<ResizeInstruction>, ClusterError> {
        let mut inner = self.write();
        let coordinator = inner
            .topology
            .coordinator()
            .cloned()
            .ok_or_else(|| ClusterError::Configuration("no coordinator".into()))?;
        let job = inner.job.as_mut().ok_or(ClusterError::NoResizeJob)?;
        Ok(job.plan(&self.placement, schema, &coordinator))
    }

    /// Records a finished instruction. Completes the job once nothing is
    /// pending and returns whether that happened.
    pub fn mark_instruction_complete(
        &self,
        job: JobId,
        node: &NodeId,
    ) -> Result<bool, ClusterError> {
        let mut inner = self.write();
        let current = inner.job.as_mut().ok_or(ClusterError::NoResizeJob)?;
        if current.id() != job {
            return Err(ClusterError::StaleJob(job));
        }
        current.mark_complete(node);
        if !current.is_complete() {
            return Ok(false);
        }
        Self::finish_done(&mut inner);
        Ok(true)
    }

    /// Finishes job `id` successfully, installing its target membership.
    pub fn complete_job(&self, id: JobId) -> Result<(), ClusterError> {
        let mut inner = self.write();
        match inner.job.as_ref() {
            None => Err(ClusterError::NoResizeJob),
            Some(job) if job.id() != id => Err(ClusterError::StaleJob(id)),
            Some(_) => {
                Self::finish_done(&mut inner);
                Ok(())
            }
        }
    }

    fn finish_done(inner: &mut Inner) {
        if let Some(job) = inner.job.take() {
            inner.topology = Topology::from_nodes(job.target_nodes().iter().cloned());
            inner.state = ClusterState::Normal;
            job.finish(JobStatus::Done);
            info!(job = %job.id(), nodes = inner.topology.len(), "resize job done");
        }
    }

    /// Cancels the in-flight job and forces the cluster back to `NORMAL`.
    ///
    /// The old membership is kept. Waiters see `Aborted(reason)`. On a
    /// node that is resizing without owning the job, only the state is
    /// reset.
    pub fn abort_job(&self, reason: &str) -> Result<Option<JobId>, ClusterError> {
        let mut inner = self.write();
        let job = inner.job.take();
        if job.is_none() && inner.state != ClusterState::Resizing {
            return Err(ClusterError::NoResizeJob);
        }
        inner.state = ClusterState::Normal;
        match job {
            Some(job) => {
                job.finish(JobStatus::Aborted(reason.to_string()));
                warn!(job = %job.id(), reason, "resize job aborted");
                Ok(Some(job.id()))
            }
            None => {
                warn!(reason, "resize aborted");
                Ok(None)
            }
        }
    }
}
