use causalkv::replication::{Node, Replica};
use causalkv::time::SystemClock;
use causalkv::transport::http::{serve, HttpTransport};
use causalkv::transport::Transport;
use causalkv::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    let replica = Arc::new(Replica::new(config.name.clone(), Arc::new(SystemClock)));
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new());
    let node = Arc::new(Node::new(replica, transport));

    let cancel = CancellationToken::new();
    let gossip = tokio::spawn(
        node.clone()
            .run_gossip(config.gossip_interval, cancel.clone()),
    );

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            shutdown.cancel();
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(name = %config.name, %addr, "starting replica");
    serve(node, addr, cancel.clone()).await?;

    cancel.cancel();
    let _ = gossip.await;
    Ok(())
}
