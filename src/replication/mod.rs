pub mod clock;
pub mod gossip;
pub mod log;
pub mod replica;

pub use clock::{CausalClock, VectorClock};
pub use gossip::{GossipEcho, GossipPush, Node, ViewChangeRequest};
pub use log::{Column, EventLog};
pub use replica::Replica;
