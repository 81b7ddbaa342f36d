//! Peer identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A peer node, identified structurally by its advertised (host, port).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Peer {
    pub host: String,
    pub port: u16,
}

impl Peer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The `host:port` form used for socket connects.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Peer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected host:port, got {s:?}"))?;
        if host.is_empty() {
            return Err(format!("empty host in {s:?}"));
        }
        let port: u16 = port.parse().map_err(|e| format!("bad port in {s:?}: {e}"))?;
        Ok(Self::new(host, port))
    }
}
