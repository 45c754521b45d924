//! Integration tests for anti-entropy between replicas.

use bitgrid_core::{AttrValue, Attrs, FieldOptions, IndexOptions, SLICE_WIDTH};

use bitgrid_server::ImportRequest;

use crate::helpers::TestCluster;

fn attrs(key: &str, value: &str) -> Attrs {
    let mut attrs = Attrs::new();
    attrs.insert(key.to_string(), AttrValue::from(value));
    attrs
}

async fn schema(cluster: &TestCluster) {
    let api = cluster.coordinator();
    api.create_index("users", IndexOptions::default())
        .await
        .unwrap();
    api.create_field("users", "likes", FieldOptions::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn divergent_attrs_converge() {
    let cluster = TestCluster::start(2, 2);
    schema(&cluster).await;

    let a = cluster.api(0).holder();
    let b = cluster.api(1).holder();
    let columns_a = a.index("users").unwrap();
    let columns_b = b.index("users").unwrap();
    columns_a
        .column_attr_store()
        .set_attrs(3, attrs("name", "ann"))
        .unwrap();
    columns_b
        .column_attr_store()
        .set_attrs(1_000, attrs("name", "bob"))
        .unwrap();
    b.field("users", "likes")
        .unwrap()
        .row_attr_store()
        .set_attrs(7, attrs("label", "jazz"))
        .unwrap();

    let report = cluster.nodes[0].syncer().sync_holder().await.unwrap();
    assert_eq!(report.column_attrs, 1);
    assert_eq!(report.row_attrs, 1);
    assert_eq!(report.errors, 0);
    cluster.nodes[1].syncer().sync_holder().await.unwrap();

    for holder in [a, b] {
        let store = holder.index("users").unwrap();
        assert_eq!(store.column_attr_store().attrs(3), attrs("name", "ann"));
        assert_eq!(store.column_attr_store().attrs(1_000), attrs("name", "bob"));
        let field = holder.field("users", "likes").unwrap();
        assert_eq!(field.row_attr_store().attrs(7), attrs("label", "jazz"));
    }

    // a second pass finds nothing to do
    let report = cluster.nodes[0].syncer().sync_holder().await.unwrap();
    assert_eq!(report.column_attrs + report.row_attrs + report.blocks, 0);
}

#[tokio::test]
async fn missing_bits_are_repaired_from_replicas() {
    let cluster = TestCluster::start(2, 2);
    schema(&cluster).await;

    // both nodes own every slice, but only node0 got these writes
    let writes = [(0, vec![1, 420], vec![5, 9]), (1, vec![1], vec![SLICE_WIDTH + 5])];
    for (slice, rows, columns) in writes {
        cluster
            .api(0)
            .import(&ImportRequest {
                index: "users".into(),
                field: "likes".into(),
                slice,
                rows,
                columns,
                timestamps: vec![],
            })
            .await
            .unwrap();
    }
    assert!(cluster.api(1).holder().fragment("users", "likes", "standard", 0).is_none());

    let report = cluster.nodes[1].syncer().sync_holder().await.unwrap();
    assert_eq!(report.blocks, 3);

    let replica = cluster.api(1).holder();
    let slice0 = replica.fragment("users", "likes", "standard", 0).unwrap();
    assert!(slice0.contains(1, 5));
    assert!(slice0.contains(420, 9));
    let slice1 = replica.fragment("users", "likes", "standard", 1).unwrap();
    assert!(slice1.contains(1, SLICE_WIDTH + 5));
}
