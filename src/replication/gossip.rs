use super::log::Column;
use super::replica::Replica;
use crate::error::KvError;
use crate::transport::{host_of, Transport};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A push of columns from one replica to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GossipPush {
    pub host: String,
    #[serde(default)]
    pub columns: Vec<Column>,
}

/// The receiving side's answer: its own unacknowledged events plus the
/// columns it accepted or merged from the push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GossipEcho {
    #[serde(default)]
    pub columns: Vec<Column>,
}

/// One-shot replacement of the peer set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewChangeRequest {
    pub replicas: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub donotforward: bool,
}

/// A replica plus the transport it gossips over. All network I/O happens
/// here, outside the replica's lock.
pub struct Node {
    replica: Arc<Replica>,
    transport: Arc<dyn Transport>,
}

impl Node {
    pub fn new(replica: Arc<Replica>, transport: Arc<dyn Transport>) -> Self {
        Node { replica, transport }
    }

    pub fn name(&self) -> &str {
        self.replica.name()
    }

    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    /// Apply an incoming gossip push and form the echo.
    pub fn handle_gossip(&self, push: GossipPush) -> GossipEcho {
        let columns = self.replica.exchange(&push.host, push.columns);
        GossipEcho { columns }
    }

    /// Replace the peer set. Unless the request is already a forward,
    /// pass it on (marked forwarded) to every new peer first; any failed
    /// forward fails the whole request and leaves the peer set untouched.
    pub async fn handle_view_change(&self, req: ViewChangeRequest) -> Result<(), KvError> {
        let name = self.replica.name().to_string();
        let next: Vec<String> = req
            .replicas
            .iter()
            .filter(|addr| host_of(addr) != name)
            .cloned()
            .collect();

        if !req.donotforward {
            let forward = ViewChangeRequest {
                replicas: req.replicas.clone(),
                donotforward: true,
            };
            for addr in &next {
                self.transport
                    .view_change(&name, addr, forward.clone())
                    .await
                    .map_err(|err| {
                        KvError::Transport(format!("forward view change to {}: {}", addr, err))
                    })?;
            }
        }

        info!(replica = %name, peers = next.len(), "view change applied");
        self.replica.set_peers(next);
        Ok(())
    }

    /// One gossip cycle: pick a peer uniformly at random and exchange.
    /// Failures are logged and retried on the next tick.
    pub async fn gossip_once(&self) {
        let peers = self.replica.peers_snapshot();
        if peers.is_empty() {
            return;
        }
        let target = peers[rand::thread_rng().gen_range(0..peers.len())].clone();
        if let Err(err) = self.gossip_with(&target).await {
            debug!(replica = %self.name(), peer = %target, %err, "gossip cycle failed");
        }
    }

    /// Full push + echo + ack-round exchange with one peer.
    pub async fn gossip_with(&self, target: &str) -> Result<(), KvError> {
        let name = self.replica.name().to_string();
        let peer = host_of(target).to_string();

        let Some(columns) = self.replica.collect_push(&peer) else {
            return Ok(());
        };
        let push = GossipPush {
            host: name.clone(),
            columns,
        };
        let echo = self.transport.gossip(&name, target, push).await?;
        if echo.columns.is_empty() {
            return Ok(());
        }

        let acks = self.replica.play_log(&peer, echo.columns);
        if acks.is_empty() {
            return Ok(());
        }
        let ack_push = GossipPush {
            host: name.clone(),
            columns: acks,
        };
        let response = self.transport.gossip(&name, target, ack_push).await?;
        if !response.columns.is_empty() {
            debug!(
                replica = %name,
                peer = %peer,
                columns = response.columns.len(),
                "discarding response to ack round"
            );
        }
        Ok(())
    }

    /// Periodic gossip driver. Runs until the token is cancelled.
    pub async fn run_gossip(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        info!(replica = %self.name(), ?interval, "gossip loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(replica = %self.name(), "gossip loop stopped");
                    return;
                }
                _ = ticker.tick() => self.gossip_once().await,
            }
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("replica", &self.replica.name())
            .finish()
    }
}
