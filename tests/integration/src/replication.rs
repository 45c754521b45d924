//! Integration tests for schema replication and coordinator changes.

use bitgrid_core::{FieldOptions, IndexOptions, SLICE_WIDTH};
use bitgrid_server::{ErrorKind, ImportRequest};

use crate::helpers::{node_id, TestCluster};

#[tokio::test]
async fn schema_changes_reach_every_node() {
    let cluster = TestCluster::start(3, 1);
    let api = cluster.coordinator();

    api.create_index("events", IndexOptions::default())
        .await
        .unwrap();
    api.create_field("events", "kind", FieldOptions::default())
        .await
        .unwrap();
    api.create_field("events", "score", FieldOptions::int(0, 100))
        .await
        .unwrap();

    for i in 1..3 {
        assert_eq!(cluster.api(i).schema(), api.schema(), "node{i}");
    }

    cluster
        .api(2)
        .delete_field("events", "score")
        .await
        .unwrap();
    for i in 0..3 {
        assert!(cluster.api(i).holder().field("events", "score").is_none());
    }

    cluster.api(1).delete_index("events").await.unwrap();
    for i in 0..3 {
        assert!(cluster.api(i).schema().is_empty());
    }
}

#[tokio::test]
async fn unreachable_peer_keeps_local_change() {
    let cluster = TestCluster::start(2, 1);
    let offline = cluster.network.disconnect(&node_id(1)).unwrap();

    let err = cluster
        .coordinator()
        .create_index("events", IndexOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Replication);
    assert!(cluster.coordinator().holder().index("events").is_some());
    assert!(offline.holder().index("events").is_none());

    // the peer missed the index, so it rejects fields for it
    cluster.network.reconnect(offline);
    let err = cluster
        .coordinator()
        .create_field("events", "kind", FieldOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Replication);
    assert!(err.to_string().contains("index events not found"));
    assert!(cluster.coordinator().holder().field("events", "kind").is_some());
}

#[tokio::test]
async fn imports_go_to_slice_owners() {
    let cluster = TestCluster::start(3, 1);
    let api = cluster.coordinator();
    api.create_index("events", IndexOptions::default())
        .await
        .unwrap();
    api.create_field("events", "kind", FieldOptions::default())
        .await
        .unwrap();

    for slice in 0..6u64 {
        let owner = &api.slice_nodes("events", slice).unwrap()[0];
        let i = cluster
            .nodes
            .iter()
            .position(|n| n.id() == &owner.id)
            .unwrap();
        for (j, other) in cluster.nodes.iter().enumerate() {
            let req = ImportRequest {
                index: "events".into(),
                field: "kind".into(),
                slice,
                rows: vec![slice],
                columns: vec![slice * SLICE_WIDTH + 7],
                timestamps: vec![],
            };
            let result = other.api.import(&req).await;
            if j == i {
                result.unwrap();
            } else {
                assert_eq!(result.unwrap_err().kind(), ErrorKind::Ownership);
            }
        }
    }

    // new max slices are announced to every node
    for i in 0..3 {
        assert_eq!(cluster.api(i).max_slices().get("events"), Some(&5), "node{i}");
    }
}

#[tokio::test]
async fn coordinator_handoff() {
    let cluster = TestCluster::start(3, 1);
    let (old, new) = cluster
        .coordinator()
        .set_coordinator(&node_id(1))
        .await
        .unwrap();
    assert_eq!(old.unwrap().id, node_id(0));
    assert_eq!(new.id, node_id(1));

    for i in 0..3 {
        let coordinator = cluster.api(i).cluster().coordinator().unwrap();
        assert_eq!(coordinator.id, node_id(1), "node{i}");
    }
    assert!(cluster.api(1).cluster().is_coordinator());
    assert!(!cluster.api(0).cluster().is_coordinator());
}

#[tokio::test]
async fn recalculate_caches_everywhere() {
    let cluster = TestCluster::start(2, 1);
    cluster.api(1).recalculate_caches().await.unwrap();
}
