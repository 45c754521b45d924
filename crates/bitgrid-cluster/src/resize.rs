//! Resize jobs: moving slice ownership after a membership change.
//!
//! A job is created when a node joins or leaves. The coordinator plans
//! it against the schema (every index and its highest slice) and hands
//! each node of the new membership a [`ResizeInstruction`] listing the
//! fragments it has to fetch and where from. The job finishes when every
//! node with work has reported back, or when it is aborted.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{Node, NodeId, Placement};

/// Unique identifier for a resize job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl JobId {
    /// Generates an id from the current time and 16 random bits, so two
    /// jobs created within the same nanosecond still differ.
    pub fn new() -> Self {
        use rand::Rng;
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let noise: u16 = rand::rng().random();
        Self(ts ^ ((noise as u64) << 48))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// The membership change a job carries out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizeAction {
    Join(Node),
    Leave(NodeId),
}

impl std::fmt::Display for ResizeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResizeAction::Join(node) => write!(f, "join {}", node.id),
            ResizeAction::Leave(id) => write!(f, "leave {id}"),
        }
    }
}

/// Outcome of a resize job, as seen by waiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Done,
    Aborted(String),
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// The highest known slice of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSlices {
    pub index: String,
    pub max_slice: u64,
}

impl IndexSlices {
    pub fn new(index: impl Into<String>, max_slice: u64) -> Self {
        Self {
            index: index.into(),
            max_slice,
        }
    }
}

/// One fragment set a node must fetch: every field of `index` at `slice`,
/// copied from `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentSource {
    pub index: String,
    pub slice: u64,
    pub from: Node,
}

/// The work assigned to one node by a resize job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeInstruction {
    pub job: JobId,
    /// The node that has to follow the instruction.
    pub node: Node,
    /// Where the completion report goes.
    pub coordinator: Node,
    pub sources: Vec<FragmentSource>,
}

/// A membership change in flight.
#[derive(Debug)]
pub struct ResizeJob {
    id: JobId,
    action: ResizeAction,
    old: Vec<Node>,
    target: Vec<Node>,
    pending: BTreeSet<NodeId>,
    status: watch::Sender<JobStatus>,
}

impl ResizeJob {
    /// Creates a running job moving from `old` to `target` membership.
    pub fn new(action: ResizeAction, old: Vec<Node>, target: Vec<Node>) -> Self {
        let (status, _) = watch::channel(JobStatus::Running);
        Self {
            id: JobId::new(),
            action,
            old,
            target,
            pending: BTreeSet::new(),
            status,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn action(&self) -> &ResizeAction {
        &self.action
    }

    /// Membership before the change.
    pub fn old_nodes(&self) -> &[Node] {
        &self.old
    }

    /// Membership once the job is done.
    pub fn target_nodes(&self) -> &[Node] {
        &self.target
    }

    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// Returns a receiver that observes the job's outcome.
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status.subscribe()
    }

    /// Computes one instruction per node of the target membership.
    ///
    /// For every slice a node owns under the target membership but not
    /// under the old one, the fragments are sourced from an old owner that
    /// stays in the cluster, falling back to any old owner (the leaving
    /// node). Nodes with nothing to fetch are complete straight away; the
    /// rest are tracked until [`mark_complete`](Self::mark_complete).
    pub fn plan(
        &mut self,
        placement: &Placement,
        schema: &[IndexSlices],
        coordinator: &Node,
    ) -> Vec<ResizeInstruction> {
        let mut instructions = Vec::with_capacity(self.target.len());
        self.pending.clear();

        for node in &self.target {
            let mut sources = Vec::new();
            for entry in schema {
                for slice in 0..=entry.max_slice {
                    let partition = placement.partition(&entry.index, slice);
                    let new_owners = placement.partition_owners(&self.target, partition);
                    if !new_owners.iter().any(|n| n.id == node.id) {
                        continue;
                    }
                    let old_owners = placement.partition_owners(&self.old, partition);
                    if old_owners.iter().any(|n| n.id == node.id) {
                        continue;
                    }
                    let staying = old_owners
                        .iter()
                        .find(|n| self.target.iter().any(|t| t.id == n.id));
                    if let Some(from) = staying.or_else(|| old_owners.first()) {
                        sources.push(FragmentSource {
                            index: entry.index.clone(),
                            slice,
                            from: (*from).clone(),
                        });
                    }
                }
            }
            if !sources.is_empty() {
                self.pending.insert(node.id.clone());
            }
            instructions.push(ResizeInstruction {
                job: self.id,
                node: node.clone(),
                coordinator: coordinator.clone(),
                sources,
            });
        }
        instructions
    }

    /// Records that `node` finished its instruction. Returns true if it
    /// was still pending.
    pub fn mark_complete(&mut self, node: &NodeId) -> bool {
        self.pending.remove(node)
    }

    /// Nodes that still have to report back.
    pub fn pending(&self) -> impl Iterator<Item = &NodeId> {
        self.pending.iter()
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// Publishes the final outcome to every subscriber.
    pub fn finish(&self, status: JobStatus) {
        self.status.send_replace(status);
    }
}
