//! Resize jobs: moving fragments after a node joins or leaves.
//!
//! The coordinator plans the job and hands each node an instruction
//! listing the fragments it must copy. Followers fetch the fragments from
//! their sources and report back; once every instruction is done the
//! coordinator installs the new membership and announces it. Any failure
//! aborts the job and the old membership stays in place.

use std::collections::BTreeSet;
use std::sync::Arc;

use bitgrid_cluster::{IndexSlices, JobId, Node, NodeId, ResizeInstruction};
use bitgrid_core::IndexInfo;
use tracing::{debug, error, info, warn};

use crate::api::Api;
use crate::broadcast::FragmentKey;
use crate::error::ApiError;
use crate::message::Message;
use crate::syncer::default_view;

/// Drives the current job from the coordinator in the background.
pub(crate) fn spawn_job(api: Arc<Api>) {
    tokio::spawn(async move {
        if let Err(e) = run_job(&api).await {
            error!(error = %e, "resize job failed");
            abort(&api, &e.to_string()).await;
        }
    });
}

async fn run_job(api: &Arc<Api>) -> Result<(), ApiError> {
    let cluster = api.cluster();
    let Some(job) = cluster.current_job_id() else {
        return Ok(());
    };
    // every current member stops taking writes
    api.announce_status().await?;

    let schema = api.holder().schema();
    let slices: Vec<IndexSlices> = api
        .holder()
        .indexes()
        .iter()
        .map(|index| IndexSlices::new(index.name(), index.max_slice()))
        .collect();
    let instructions = cluster
        .plan_current_job(&slices)
        .map_err(ApiError::cluster("planning resize job"))?;

    let mut pending = 0;
    for instruction in instructions {
        if instruction.sources.is_empty() {
            continue;
        }
        pending += 1;
        debug!(
            job = %job,
            node = %instruction.node.id,
            sources = instruction.sources.len(),
            "sending resize instruction"
        );
        if instruction.node.id == *cluster.local_id() {
            spawn_follow(Arc::clone(api), instruction, Vec::new());
        } else {
            let node = instruction.node.clone();
            let msg = Message::ResizeInstruction {
                instruction,
                schema: schema.clone(),
            };
            api.send_to(&node, msg).await?;
        }
    }

    if pending == 0 {
        let old = cluster.job_old_nodes().unwrap_or_default();
        cluster
            .complete_job(job)
            .map_err(ApiError::cluster("completing resize job"))?;
        finish(api, &old).await?;
    }
    Ok(())
}

/// Follows an instruction in the background and reports the outcome to
/// the coordinator.
pub(crate) fn spawn_follow(api: Arc<Api>, instruction: ResizeInstruction, schema: Vec<IndexInfo>) {
    tokio::spawn(async move {
        let error = match follow(&api, &instruction, &schema).await {
            Ok(()) => None,
            Err(e) => {
                error!(job = %instruction.job, error = %e, "resize instruction failed");
                Some(e.to_string())
            }
        };
        let local = api.cluster().local_id().clone();
        let result = if instruction.coordinator.id == local {
            instruction_complete(&api, instruction.job, &local, error).await
        } else {
            let msg = Message::ResizeInstructionComplete {
                job: instruction.job,
                node: local,
                error,
            };
            api.send_to(&instruction.coordinator, msg).await
        };
        if let Err(e) = result {
            error!(job = %instruction.job, error = %e, "reporting resize instruction");
        }
    });
}

async fn follow(
    api: &Api,
    instruction: &ResizeInstruction,
    schema: &[IndexInfo],
) -> Result<(), ApiError> {
    api.apply_schema(schema)?;
    let mut copied = 0usize;
    for source in &instruction.sources {
        let Some(index) = api.holder().index(&source.index) else {
            continue;
        };
        for field in index.fields() {
            // the coordinator only knows views it holds data for
            let mut views: BTreeSet<String> =
                field.views().iter().map(|v| v.name().to_string()).collect();
            views.insert(default_view(&field).to_string());
            for view in views {
                let key = FragmentKey::new(index.name(), field.name(), view, source.slice);
                let data = api
                    .peers()
                    .fragment_data(&source.from, &key)
                    .await
                    .map_err(|source| ApiError::Replication {
                        message: "MarshalFragment",
                        source,
                    })?;
                if let Some(data) = data {
                    api.restore_fragment(&key, &data)?;
                    copied += 1;
                }
            }
        }
    }
    info!(
        job = %instruction.job,
        sources = instruction.sources.len(),
        fragments = copied,
        "resize instruction followed"
    );
    Ok(())
}

/// Handles a completion report on the coordinator.
pub(crate) async fn instruction_complete(
    api: &Api,
    job: JobId,
    node: &NodeId,
    error: Option<String>,
) -> Result<(), ApiError> {
    let cluster = api.cluster();
    if cluster.current_job_id() != Some(job) {
        warn!(job = %job, node = %node, "ignoring report for stale resize job");
        return Ok(());
    }
    if let Some(reason) = error {
        warn!(job = %job, node = %node, reason, "resize instruction failed on peer");
        abort(api, &reason).await;
        return Ok(());
    }

    let old = cluster.job_old_nodes().unwrap_or_default();
    let done = cluster
        .mark_instruction_complete(job, node)
        .map_err(ApiError::cluster("completing resize instruction"))?;
    if done {
        finish(api, &old).await?;
    }
    Ok(())
}

/// Announces the new membership, including to nodes that just left it.
async fn finish(api: &Api, old: &[Node]) -> Result<(), ApiError> {
    api.announce_status().await?;
    let current = api.cluster().nodes();
    for node in old.iter().filter(|n| !current.iter().any(|c| c.id == n.id)) {
        api.send_to(node, api.status_message()).await?;
    }
    Ok(())
}

/// Aborts the current job and tells the old members.
async fn abort(api: &Api, reason: &str) {
    match api.cluster().abort_job(reason) {
        Ok(_) => {
            if let Err(e) = api.announce_status().await {
                error!(error = %e, "announcing aborted resize");
            }
        }
        Err(e) => debug!(error = %e, "nothing to abort"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bitgrid_cluster::{Cluster, ClusterConfig, ClusterState, FragmentSource};
    use bitgrid_core::{FieldOptions, Holder, IndexOptions};

    fn node(id: &str, port: u16) -> Node {
        Node::new(id, format!("127.0.0.1:{port}").parse().unwrap())
    }

    fn api(dir: &tempfile::TempDir, members: &[&str]) -> Arc<Api> {
        let hosts: Vec<Node> = members
            .iter()
            .enumerate()
            .map(|(i, id)| node(id, 10101 + i as u16))
            .collect();
        let cluster = Cluster::new(
            hosts[0].clone(),
            ClusterConfig {
                hosts,
                ..Default::default()
            },
        );
        cluster.bootstrap().unwrap();
        Arc::new(Api::new(
            Arc::new(Holder::open(dir.path()).unwrap()),
            Arc::new(cluster),
        ))
    }

    async fn wait_for_state(api: &Api, state: ClusterState) {
        for _ in 0..200 {
            if api.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("cluster never reached {state}");
    }

    #[tokio::test]
    async fn leave_without_data_completes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(&dir, &["a", "b"]);
        api.remove_node(&NodeId::new("b")).await.unwrap();
        wait_for_state(&api, ClusterState::Normal).await;
        assert_eq!(api.hosts().len(), 1);
    }

    #[tokio::test]
    async fn stale_reports_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(&dir, &["a", "b"]);
        instruction_complete(&api, JobId(42), &NodeId::new("b"), None)
            .await
            .unwrap();
        assert_eq!(api.state(), ClusterState::Normal);
    }

    #[tokio::test]
    async fn failed_report_aborts_job() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(&dir, &["a", "b"]);
        let job = api.cluster().node_leave(&NodeId::new("b")).unwrap();
        instruction_complete(&api, job, &NodeId::new("a"), Some("disk full".into()))
            .await
            .unwrap();
        assert_eq!(api.state(), ClusterState::Normal);
        assert_eq!(api.hosts().len(), 2);
        assert!(api.cluster().current_job_id().is_none());
    }

    #[tokio::test]
    async fn follow_applies_schema_without_sources() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(&dir, &["a"]);
        let src = tempfile::tempdir().unwrap();
        let other = Holder::open(src.path()).unwrap();
        let index = other.create_index("i", IndexOptions::default()).unwrap();
        index.create_field("f", FieldOptions::default()).unwrap();

        let local = node("a", 10101);
        let instruction = ResizeInstruction {
            job: JobId(1),
            node: local.clone(),
            coordinator: local.clone(),
            sources: vec![FragmentSource {
                index: "missing".into(),
                slice: 0,
                from: local,
            }],
        };
        follow(&api, &instruction, &other.schema()).await.unwrap();
        assert!(api.holder().field("i", "f").is_some());
    }
}
