pub mod client;
pub mod config;
pub mod error;
pub mod replication;
pub mod simulator;
pub mod time;
pub mod transport;
pub mod validator;

pub use client::Session;
pub use config::ServerConfig;
pub use error::KvError;
pub use replication::{CausalClock, Column, EventLog, Node, Replica, VectorClock};
