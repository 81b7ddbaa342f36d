//! # karat-network
//! Peer identity, wire protocol, and the TCP gossip service.

pub mod peer;
pub mod protocol;
pub mod service;

pub use peer::Peer;
pub use protocol::Message;
pub use service::{NetworkConfig, NetworkNode};
