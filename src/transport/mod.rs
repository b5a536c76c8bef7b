pub mod http;
pub mod memory;

use crate::error::KvError;
use crate::replication::{GossipEcho, GossipPush, VectorClock, ViewChangeRequest};
use async_trait::async_trait;

/// Network surface between replicas and between a client and a replica,
/// mirroring the four endpoints. `origin` names the caller (a node or a
/// client) and travels as the User-Agent over HTTP; `target` is the
/// destination address, e.g. `http://b` or `http://10.0.0.2:8080`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn read(
        &self,
        origin: &str,
        target: &str,
        key: &str,
        ctx: &VectorClock,
    ) -> Result<(String, VectorClock), KvError>;

    async fn write(
        &self,
        origin: &str,
        target: &str,
        key: &str,
        value: &str,
        ctx: &VectorClock,
    ) -> Result<VectorClock, KvError>;

    async fn gossip(
        &self,
        origin: &str,
        target: &str,
        push: GossipPush,
    ) -> Result<GossipEcho, KvError>;

    async fn view_change(
        &self,
        origin: &str,
        target: &str,
        req: ViewChangeRequest,
    ) -> Result<(), KvError>;
}

/// Host portion of a replica address, including any port. Node names are
/// compared against this, so `http://b/` and `b` both name the node `b`.
pub fn host_of(addr: &str) -> &str {
    let rest = match addr.find("://") {
        Some(idx) => &addr[idx + 3..],
        None => addr,
    };
    match rest.find('/') {
        Some(idx) => &rest[..idx],
        None => rest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("http://b"), "b");
        assert_eq!(host_of("http://b/"), "b");
        assert_eq!(host_of("http://10.0.0.2:8080/gossip"), "10.0.0.2:8080");
        assert_eq!(host_of("b"), "b");
    }
}
