//! Test helpers for running several bitgrid nodes in one process.
//!
//! Every node gets its own data directory, cluster view and [`Api`]. A
//! shared [`Network`] routes messages between them; each message goes
//! through the wire encoding on the way.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bitgrid_cluster::{Cluster, ClusterConfig, ClusterState, Node, NodeId};
use bitgrid_core::{AttrMap, Block, BlockData};
use bitgrid_server::{
    Api, ApiError, Broadcaster, BroadcastError, ErrorKind, FragmentKey, HolderSyncer, Message,
    PeerClient,
};
use bytes::Bytes;

/// Routes messages to the nodes registered with it.
#[derive(Default)]
pub struct Network {
    nodes: RwLock<HashMap<NodeId, Arc<Api>>>,
}

impl Network {
    fn register(&self, api: Arc<Api>) {
        let id = api.local_id().clone();
        self.nodes.write().unwrap().insert(id, api);
    }

    /// Makes `id` unreachable until it is registered again.
    pub fn disconnect(&self, id: &NodeId) -> Option<Arc<Api>> {
        self.nodes.write().unwrap().remove(id)
    }

    pub fn reconnect(&self, api: Arc<Api>) {
        self.register(api);
    }

    fn get(&self, id: &NodeId) -> Result<Arc<Api>, BroadcastError> {
        self.nodes
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| BroadcastError::Unreachable {
                node: id.clone(),
                reason: "not connected".into(),
            })
    }
}

/// One node's view of the [`Network`].
pub struct LocalTransport {
    network: Arc<Network>,
    cluster: Arc<Cluster>,
}

fn rejected(node: &Node, e: ApiError) -> BroadcastError {
    BroadcastError::Rejected {
        node: node.id.clone(),
        reason: e.to_string(),
    }
}

impl LocalTransport {
    async fn deliver(&self, node: &Node, msg: &Message) -> Result<(), BroadcastError> {
        let api = self.network.get(&node.id)?;
        let msg = Message::decode(&msg.encode()).map_err(|e| rejected(node, e))?;
        api.receive_message(msg).await.map_err(|e| rejected(node, e))
    }

    fn peers(&self) -> Vec<Node> {
        let local = self.cluster.local_id();
        self.cluster
            .nodes()
            .into_iter()
            .filter(|n| &n.id != local)
            .collect()
    }
}

#[async_trait]
impl Broadcaster for LocalTransport {
    async fn send_sync(&self, msg: &Message) -> Result<(), BroadcastError> {
        for node in self.peers() {
            self.deliver(&node, msg).await?;
        }
        Ok(())
    }

    // in-process delivery is immediate, so this only differs in ignoring
    // failures
    async fn send_async(&self, msg: &Message) -> Result<(), BroadcastError> {
        for node in self.peers() {
            let _ = self.deliver(&node, msg).await;
        }
        Ok(())
    }

    async fn send_to(&self, node: &Node, msg: &Message) -> Result<(), BroadcastError> {
        self.deliver(node, msg).await
    }
}

#[async_trait]
impl PeerClient for LocalTransport {
    async fn fragment_data(
        &self,
        node: &Node,
        key: &FragmentKey,
    ) -> Result<Option<Bytes>, BroadcastError> {
        match self.network.get(&node.id)?.marshal_fragment(key) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(rejected(node, e)),
        }
    }

    async fn fragment_blocks(
        &self,
        node: &Node,
        key: &FragmentKey,
    ) -> Result<Vec<Block>, BroadcastError> {
        match self.network.get(&node.id)?.fragment_blocks(key) {
            Ok(blocks) => Ok(blocks),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(rejected(node, e)),
        }
    }

    async fn fragment_block_data(
        &self,
        node: &Node,
        key: &FragmentKey,
        block: u64,
    ) -> Result<BlockData, BroadcastError> {
        match self.network.get(&node.id)?.fragment_block_data(key, block) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BlockData::default()),
            Err(e) => Err(rejected(node, e)),
        }
    }

    async fn index_attr_diff(
        &self,
        node: &Node,
        index: &str,
        blocks: &[Block],
    ) -> Result<AttrMap, BroadcastError> {
        match self.network.get(&node.id)?.index_attr_diff(index, blocks) {
            Ok(diff) => Ok(diff),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(AttrMap::new()),
            Err(e) => Err(rejected(node, e)),
        }
    }

    async fn field_attr_diff(
        &self,
        node: &Node,
        index: &str,
        field: &str,
        blocks: &[Block],
    ) -> Result<AttrMap, BroadcastError> {
        match self.network.get(&node.id)?.field_attr_diff(index, field, blocks) {
            Ok(diff) => Ok(diff),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(AttrMap::new()),
            Err(e) => Err(rejected(node, e)),
        }
    }
}

/// A node managed by the test harness.
pub struct TestNode {
    pub api: Arc<Api>,
    transport: Arc<LocalTransport>,
    _dir: tempfile::TempDir,
}

impl TestNode {
    pub fn id(&self) -> &NodeId {
        self.api.local_id()
    }

    /// An anti-entropy syncer that reaches peers over the test network.
    pub fn syncer(&self) -> HolderSyncer {
        HolderSyncer::new(
            Arc::clone(self.api.holder()),
            Arc::clone(self.api.cluster()),
            Arc::clone(&self.transport) as Arc<dyn PeerClient>,
        )
    }
}

/// A set of in-process nodes sharing one network.
pub struct TestCluster {
    pub network: Arc<Network>,
    pub nodes: Vec<TestNode>,
}

pub fn node_id(i: usize) -> NodeId {
    NodeId::new(format!("node{i}"))
}

fn node(i: usize) -> Node {
    let addr: SocketAddr = format!("127.0.0.1:{}", 10101 + i).parse().unwrap();
    Node::new(node_id(i), addr)
}

impl TestCluster {
    /// Starts `n` statically configured nodes, all `NORMAL`. `node0` is
    /// the coordinator.
    pub fn start(n: usize, replicas: usize) -> Self {
        let network = Arc::new(Network::default());
        let hosts: Vec<Node> = (0..n).map(node).collect();
        let nodes = (0..n)
            .map(|i| {
                let config = ClusterConfig {
                    hosts: hosts.clone(),
                    replicas,
                    ..Default::default()
                };
                let test_node = spawn_node(&network, node(i), config);
                test_node.api.cluster().bootstrap().unwrap();
                test_node
            })
            .collect();
        Self { network, nodes }
    }

    pub fn api(&self, i: usize) -> &Arc<Api> {
        &self.nodes[i].api
    }

    pub fn coordinator(&self) -> &Arc<Api> {
        self.api(0)
    }

    /// Starts a node that knows only itself and is still `STARTING`.
    pub fn add_starting_node(&mut self, replicas: usize) -> Arc<Api> {
        let i = self.nodes.len();
        let config = ClusterConfig {
            replicas,
            ..Default::default()
        };
        let test_node = spawn_node(&self.network, node(i), config);
        let api = Arc::clone(&test_node.api);
        self.nodes.push(test_node);
        api
    }

    /// Waits until every node in `ids` is `NORMAL` with `members` members.
    pub async fn wait_settled(&self, ids: &[usize], members: usize) {
        for _ in 0..400 {
            let settled = ids.iter().all(|&i| {
                let api = self.api(i);
                api.state() == ClusterState::Normal && api.hosts().len() == members
            });
            if settled {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let states: Vec<String> = ids
            .iter()
            .map(|&i| format!("{}={} ({} hosts)", i, self.api(i).state(), self.api(i).hosts().len()))
            .collect();
        panic!("cluster did not settle: {}", states.join(", "));
    }
}

fn spawn_node(network: &Arc<Network>, local: Node, config: ClusterConfig) -> TestNode {
    let dir = tempfile::tempdir().unwrap();
    let holder = Arc::new(bitgrid_core::Holder::open(dir.path()).unwrap());
    let cluster = Arc::new(Cluster::new(local, config));
    let transport = Arc::new(LocalTransport {
        network: Arc::clone(network),
        cluster: Arc::clone(&cluster),
    });
    let api = Arc::new(
        Api::new(holder, cluster)
            .with_broadcaster(Arc::clone(&transport) as Arc<dyn Broadcaster>)
            .with_peer_client(Arc::clone(&transport) as Arc<dyn PeerClient>)
            .with_broadcast_timeout(Duration::from_secs(2)),
    );
    network.register(Arc::clone(&api));
    TestNode {
        api,
        transport,
        _dir: dir,
    }
}
