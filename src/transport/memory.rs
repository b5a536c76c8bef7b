use super::{host_of, Transport};
use crate::error::KvError;
use crate::replication::{GossipEcho, GossipPush, Node, VectorClock, ViewChangeRequest};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Which pairs of nodes can talk. Reachability is transitive: a request
/// routes through intermediate nodes if any path exists, the way packets
/// would. Names that are not registered nodes (clients) reach everything.
#[derive(Debug, Default)]
pub struct Topology {
    nodes: HashSet<String>,
    dropped: HashMap<String, HashSet<String>>,
}

impl Topology {
    pub fn add_node(&mut self, name: &str) {
        self.nodes.insert(name.to_string());
    }

    pub fn partition(&mut self, a: &str, b: &str) {
        self.dropped
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string());
        self.dropped
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string());
    }

    pub fn heal(&mut self, a: &str, b: &str) {
        if let Some(dropped) = self.dropped.get_mut(a) {
            dropped.remove(b);
        }
        if let Some(dropped) = self.dropped.get_mut(b) {
            dropped.remove(a);
        }
    }

    pub fn reachable(&self, from: &str, to: &str) -> bool {
        let mut queue = VecDeque::from([from.to_string()]);
        let mut queued = HashSet::from([from.to_string()]);
        let empty = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if current == to {
                return true;
            }
            let dropped = self.dropped.get(&current).unwrap_or(&empty);
            for node in &self.nodes {
                if queued.contains(node) || dropped.contains(node) {
                    continue;
                }
                queue.push_back(node.clone());
                queued.insert(node.clone());
            }
        }
        false
    }
}

struct NetworkInner {
    nodes: HashMap<String, Arc<Node>>,
    topology: Topology,
}

/// In-process transport connecting a set of nodes directly, with a
/// partitionable topology in between. Used by the simulator and tests.
pub struct MemoryNetwork {
    inner: RwLock<NetworkInner>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryNetwork {
            inner: RwLock::new(NetworkInner {
                nodes: HashMap::new(),
                topology: Topology::default(),
            }),
        })
    }

    pub fn register(&self, node: Arc<Node>) {
        let mut inner = self.inner.write();
        inner.topology.add_node(node.name());
        inner.nodes.insert(node.name().to_string(), node);
    }

    pub fn partition(&self, a: &str, b: &str) {
        self.inner.write().topology.partition(a, b);
    }

    pub fn heal(&self, a: &str, b: &str) {
        self.inner.write().topology.heal(a, b);
    }

    pub fn node_names(&self) -> Vec<String> {
        self.inner.read().nodes.keys().cloned().collect()
    }

    /// Resolve a target address if the origin can currently reach it.
    fn route(&self, origin: &str, target: &str) -> Result<Arc<Node>, KvError> {
        let host = host_of(target);
        let inner = self.inner.read();
        if !inner.topology.reachable(origin, host) {
            return Err(KvError::Transport(format!(
                "{} cannot reach {}",
                origin, host
            )));
        }
        inner
            .nodes
            .get(host)
            .cloned()
            .ok_or_else(|| KvError::Transport(format!("unknown host {:?}", host)))
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn read(
        &self,
        origin: &str,
        target: &str,
        key: &str,
        ctx: &VectorClock,
    ) -> Result<(String, VectorClock), KvError> {
        let node = self.route(origin, target)?;
        node.replica().read(key, ctx)
    }

    async fn write(
        &self,
        origin: &str,
        target: &str,
        key: &str,
        value: &str,
        ctx: &VectorClock,
    ) -> Result<VectorClock, KvError> {
        let node = self.route(origin, target)?;
        node.replica().write(key, value, ctx)
    }

    async fn gossip(
        &self,
        origin: &str,
        target: &str,
        push: GossipPush,
    ) -> Result<GossipEcho, KvError> {
        let node = self.route(origin, target)?;
        Ok(node.handle_gossip(push))
    }

    async fn view_change(
        &self,
        origin: &str,
        target: &str,
        req: ViewChangeRequest,
    ) -> Result<(), KvError> {
        let node = self.route(origin, target)?;
        node.handle_view_change(req).await
    }
}
