//! Integration tests for node joins and leaves.

use std::sync::Arc;

use bitgrid_cluster::ClusterState;
use bitgrid_core::{FieldOptions, IndexOptions, SLICE_WIDTH};
use bitgrid_server::{Api, ErrorKind, ImportRequest, Message};

use crate::helpers::{node_id, TestCluster};

const SLICES: u64 = 32;

/// Creates `events/kind` and imports bit (slice, slice * SLICE_WIDTH + 3)
/// into every slice on its owners.
async fn load(cluster: &TestCluster) {
    let api = cluster.coordinator();
    api.create_index("events", IndexOptions::default())
        .await
        .unwrap();
    api.create_field("events", "kind", FieldOptions::default())
        .await
        .unwrap();
    for slice in 0..SLICES {
        for owner in api.slice_nodes("events", slice).unwrap() {
            let node = cluster
                .nodes
                .iter()
                .find(|n| n.id() == &owner.id)
                .unwrap();
            node.api
                .import(&ImportRequest {
                    index: "events".into(),
                    field: "kind".into(),
                    slice,
                    rows: vec![slice],
                    columns: vec![slice * SLICE_WIDTH + 3],
                    timestamps: vec![],
                })
                .await
                .unwrap();
        }
    }
}

/// Every owner of every slice holds that slice's bit.
fn assert_owners_hold_data(apis: &[&Arc<Api>]) {
    for slice in 0..SLICES {
        for owner in apis[0].slice_nodes("events", slice).unwrap() {
            let api = apis
                .iter()
                .find(|a| a.local_id() == &owner.id)
                .unwrap();
            let fragment = api
                .holder()
                .fragment("events", "kind", "standard", slice)
                .unwrap_or_else(|| panic!("{} is missing slice {slice}", owner.id));
            assert!(fragment.contains(slice, slice * SLICE_WIDTH + 3));
        }
    }
}

#[tokio::test]
async fn join_moves_fragments_to_new_node() {
    let mut cluster = TestCluster::start(2, 1);
    load(&cluster).await;

    let joining = cluster.add_starting_node(1);
    assert_eq!(joining.state(), ClusterState::Starting);
    let coordinator = cluster.coordinator().cluster().local_node().unwrap();
    joining.join_cluster(&coordinator).await.unwrap();

    cluster.wait_settled(&[0, 1, 2], 3).await;
    let apis: Vec<&Arc<Api>> = (0..3).map(|i| cluster.api(i)).collect();
    assert_owners_hold_data(&apis);

    // the new node owns something and got the schema along with it
    let owned = joining
        .cluster()
        .owned_slices(joining.local_id(), "events", SLICES - 1);
    assert!(!owned.is_empty());
    assert!(joining.holder().field("events", "kind").is_some());
}

#[tokio::test]
async fn leave_moves_fragments_off_leaving_node() {
    let cluster = TestCluster::start(3, 2);
    load(&cluster).await;

    let removed = cluster
        .coordinator()
        .remove_node(&node_id(2))
        .await
        .unwrap();
    assert_eq!(removed.id, node_id(2));

    // the leaving node is told the final membership too
    cluster.wait_settled(&[0, 1, 2], 2).await;
    let apis: Vec<&Arc<Api>> = (0..2).map(|i| cluster.api(i)).collect();
    assert_owners_hold_data(&apis);
    assert!(cluster.api(2).hosts().iter().all(|n| n.id != node_id(2)));
}

#[tokio::test]
async fn leave_request_is_forwarded_to_coordinator() {
    let cluster = TestCluster::start(3, 1);
    cluster.api(1).remove_node(&node_id(2)).await.unwrap();
    cluster.wait_settled(&[0, 1], 2).await;
    assert!(cluster.api(0).hosts().iter().all(|n| n.id != node_id(2)));
}

#[tokio::test]
async fn second_topology_change_is_rejected() {
    let mut cluster = TestCluster::start(3, 1);
    let coordinator = Arc::clone(cluster.coordinator());

    // the job runs in the background; nothing has yielded to it yet
    coordinator.remove_node(&node_id(2)).await.unwrap();
    assert_eq!(coordinator.state(), ClusterState::Resizing);

    let err = coordinator.remove_node(&node_id(1)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MethodNotAllowed);

    let joining = cluster.add_starting_node(1);
    let node = joining.cluster().local_node().unwrap();
    let err = coordinator
        .receive_message(Message::NodeJoin { node })
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("a resize job is already in progress"),
        "{err}"
    );

    cluster.wait_settled(&[0, 1], 2).await;
}

#[tokio::test]
async fn abort_restores_old_membership() {
    let cluster = TestCluster::start(3, 1);
    load(&cluster).await;
    let coordinator = cluster.coordinator();

    // with node2 unreachable the job cannot finish
    let offline = cluster.network.disconnect(&node_id(2)).unwrap();
    coordinator.remove_node(&node_id(2)).await.unwrap();
    assert_eq!(coordinator.state(), ClusterState::Resizing);
    tokio::task::yield_now().await;

    // the failed status broadcast aborts the job by itself; the explicit
    // abort only matters if the job has not run yet
    let _ = coordinator.resize_abort().await;
    cluster.wait_settled(&[0, 1], 3).await;
    assert!(coordinator.hosts().iter().any(|n| n.id == node_id(2)));
    assert!(coordinator.cluster().current_job_id().is_none());
    assert_eq!(offline.state(), ClusterState::Normal);
}
