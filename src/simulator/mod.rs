//! Scripted multi-replica harness.
//!
//! Runs a whole cluster in-process over the memory transport: register
//! replicas, partition and heal the network, issue client reads and
//! writes, and drive gossip by hand. Every client-visible operation is
//! recorded so the run can be checked by the causal validator.

pub mod rng;

pub use rng::DeterministicRng;

use crate::client::Session;
use crate::error::KvError;
use crate::replication::{Node, Replica, ViewChangeRequest};
use crate::time::{ManualClock, WallClock};
use crate::transport::memory::MemoryNetwork;
use crate::transport::Transport;
use crate::validator::{validate_causality, CausalError, TraceAction, TraceRead, TraceWrite};
use std::collections::HashMap;
use std::sync::Arc;

pub struct Cluster {
    network: Arc<MemoryNetwork>,
    clock: Arc<ManualClock>,
    nodes: HashMap<String, Arc<Node>>,
    node_order: Vec<String>,
    sessions: HashMap<String, Session>,
    trace: Vec<TraceAction>,
}

impl Cluster {
    pub fn new() -> Self {
        Cluster {
            network: MemoryNetwork::new(),
            clock: Arc::new(ManualClock::new()),
            nodes: HashMap::new(),
            node_order: Vec::new(),
            sessions: HashMap::new(),
            trace: Vec::new(),
        }
    }

    fn address(name: &str) -> String {
        format!("http://{}", name)
    }

    /// Register a replica and announce the grown view to the cluster via
    /// an existing replica, which forwards it everywhere.
    pub async fn register_node(&mut self, name: &str) -> Result<(), KvError> {
        let wall: Arc<dyn WallClock> = self.clock.clone();
        let replica = Arc::new(Replica::new(name, wall));
        let node = Arc::new(Node::new(
            replica,
            self.network.clone() as Arc<dyn Transport>,
        ));
        self.network.register(node.clone());
        self.nodes.insert(name.to_string(), node);
        self.node_order.push(name.to_string());

        if self.node_order.len() > 1 {
            let replicas: Vec<String> = self.node_order.iter().map(|n| Self::address(n)).collect();
            let seed = self
                .node_order
                .iter()
                .find(|n| n.as_str() != name)
                .expect("another node exists")
                .clone();
            self.network
                .view_change(
                    "harness",
                    &Self::address(&seed),
                    ViewChangeRequest {
                        replicas,
                        donotforward: false,
                    },
                )
                .await?;
        }
        Ok(())
    }

    pub fn partition(&self, a: &str, b: &str) {
        self.network.partition(a, b);
    }

    pub fn heal(&self, a: &str, b: &str) {
        self.network.heal(a, b);
    }

    pub fn node(&self, name: &str) -> &Arc<Node> {
        self.nodes.get(name).expect("node registered")
    }

    fn session(&mut self, client: &str) -> &mut Session {
        let network = self.network.clone();
        self.sessions
            .entry(client.to_string())
            .or_insert_with(|| Session::new(network as Arc<dyn Transport>, client, ""))
    }

    /// Client write through its session, recorded in the trace. A write
    /// the replica refused is recorded as failed and surfaced.
    pub async fn write(
        &mut self,
        client: &str,
        node: &str,
        key: &str,
        value: &str,
    ) -> Result<(), KvError> {
        // Tick wall time so later writes carry later timestamps.
        self.clock.advance(1);
        let address = Self::address(node);
        let session = self.session(client);
        session.set_address(address);
        let result = session.write(key, value).await;
        self.trace.push(TraceAction::Write(TraceWrite {
            client: client.to_string(),
            node: node.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            failed: result.is_err(),
        }));
        result
    }

    /// Client read through its session, recorded in the trace.
    pub async fn read(&mut self, client: &str, node: &str, key: &str) -> Result<String, KvError> {
        let address = Self::address(node);
        let session = self.session(client);
        session.set_address(address);
        let result = session.read(key).await;
        self.trace.push(TraceAction::Read(TraceRead {
            client: client.to_string(),
            node: node.to_string(),
            key: key.to_string(),
            value: result.as_ref().ok().cloned(),
            not_found: matches!(result, Err(KvError::NotFound { .. })),
            unavailable: matches!(
                result,
                Err(KvError::ContextUnsatisfied) | Err(KvError::Transport(_))
            ),
        }));
        result
    }

    /// Every node exchanges gossip with every peer, in a fixed order.
    /// Unreachable peers are skipped, as the gossip loop would.
    pub async fn gossip_sweep(&self) {
        for name in &self.node_order {
            let node = &self.nodes[name];
            for peer in node.replica().peers_snapshot() {
                let _ = node.gossip_with(&peer).await;
            }
        }
    }

    /// Each node gossips with one randomly chosen peer, mirroring the
    /// production timer tick.
    pub async fn gossip_random(&self, rng: &mut DeterministicRng) {
        for name in &self.node_order {
            let node = &self.nodes[name];
            let peers = node.replica().peers_snapshot();
            if let Some(peer) = rng.choose(&peers) {
                let _ = node.gossip_with(peer).await;
            }
        }
    }

    /// Run the recorded client-visible trace through the validator.
    pub fn validate(&self) -> Result<(), CausalError> {
        validate_causality(&self.trace)
    }

    pub fn trace(&self) -> &[TraceAction] {
        &self.trace
    }

    /// Visible key-value maps of every replica, in registration order.
    pub fn visible_maps(&self) -> Vec<HashMap<String, String>> {
        self.node_order
            .iter()
            .map(|name| self.nodes[name].replica().visible_map())
            .collect()
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}
