use std::time::Duration;

/// Server configuration loaded from environment variables.
///
/// The node name doubles as the host portion of the address peers use to
/// reach this replica, so in a deployment `HOST` must match what other
/// replicas are given in a view change.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Node name (`HOST`, falling back to `HOSTNAME`, then "localhost").
    pub name: String,
    /// Listening port (`PORT`, default 8080).
    pub port: u16,
    /// Gossip tick frequency. Set by the embedder, not the environment.
    pub gossip_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            name: "localhost".to_string(),
            port: 8080,
            gossip_interval: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let name = std::env::var("HOST")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);
        ServerConfig {
            name,
            port,
            gossip_interval: Duration::from_secs(1),
        }
    }

    pub fn with_gossip_interval(mut self, interval: Duration) -> Self {
        self.gossip_interval = interval;
        self
    }
}
