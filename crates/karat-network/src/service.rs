//! The P2P node: listener, per-connection handlers, and gossip flood.
//!
//! One tokio task per connection direction: a reader that dispatches
//! incoming messages and a writer fed by an unbounded channel, so a slow
//! peer never blocks the engine lock. Every peer-message handler is a fault
//! boundary — a read error, malformed frame, or unknown tag closes that
//! connection only.
//!
//! Gossip: the first time a block or transaction is seen (mined locally or
//! received), its id goes into a seen-cache and the message is flooded to
//! every current connection. A duplicate arrival hits the cache and is
//! dropped silently. The caches grow with chain history; bounding them is
//! deliberately left to operators restarting the process.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use karat_core::chain::Blockchain;
use karat_core::constants::DEFAULT_P2P_PORT;
use karat_core::error::{ChainError, NetworkError};
use karat_core::types::{Block, Hash256, Transaction};

use crate::peer::Peer;
use crate::protocol::{self, Message};

/// The engine handle shared between the network layer and the node.
pub type SharedEngine = Arc<Mutex<Blockchain>>;

/// Network configuration.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    pub listen_host: String,
    /// Port to bind; 0 picks an ephemeral port (tests).
    pub listen_port: u16,
    /// Initial contact dialed right after the listener is up.
    pub bootstrap_peer: Option<Peer>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            listen_port: DEFAULT_P2P_PORT,
            bootstrap_peer: None,
        }
    }
}

/// What to do after processing a NEW_BLOCK.
enum BlockDisposition {
    /// Applied as the new tip: re-flood it.
    Applied,
    /// Ahead of our tip: ask the sender for its whole chain.
    Behind,
    /// Invalid or stale: drop, do not forward.
    Dropped,
}

/// State shared by the listener, all connection tasks, and the handle.
struct Shared {
    engine: SharedEngine,
    /// Our advertised (host, port) identity.
    local: Peer,
    /// Active connections: id → writer channel.
    connections: Mutex<HashMap<u64, mpsc::UnboundedSender<Message>>>,
    /// Reader/writer task handles per connection, for shutdown.
    tasks: Mutex<HashMap<u64, Vec<JoinHandle<()>>>>,
    /// Peers we advertise and dial.
    known_peers: Mutex<HashSet<Peer>>,
    seen_blocks: Mutex<HashSet<Hash256>>,
    seen_txs: Mutex<HashSet<Hash256>>,
    next_conn_id: AtomicU64,
}

impl Shared {
    /// Register an accepted or dialed stream: spawn its writer and reader
    /// tasks. Outbound connections open with the handshake
    /// (REQUEST_CHAIN, then REQUEST_PEERS).
    fn register(self: Arc<Self>, stream: TcpStream, outbound: bool) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (mut read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.connections.lock().insert(conn_id, tx.clone());

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let payload = match msg.encode() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(conn_id, error = %e, "failed to encode message");
                        continue;
                    }
                };
                if let Err(e) = protocol::write_frame(&mut write_half, &payload).await {
                    debug!(conn_id, error = %e, "write failed, closing connection");
                    break;
                }
            }
        });

        if outbound {
            let _ = tx.send(Message::RequestChain);
            let _ = tx.send(Message::RequestPeers);
        }

        let reader_shared = Arc::clone(&self);
        let reader = tokio::spawn(async move {
            loop {
                let frame = match protocol::read_frame(&mut read_half).await {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(conn_id, error = %e, "connection closed");
                        break;
                    }
                };
                match Message::decode(&frame) {
                    Ok(msg) => reader_shared.handle_message(conn_id, msg),
                    Err(e) => {
                        warn!(conn_id, error = %e, "dropping peer after malformed message");
                        break;
                    }
                }
            }
            reader_shared.connections.lock().remove(&conn_id);
        });

        self.tasks.lock().insert(conn_id, vec![writer, reader]);
    }

    /// Dispatch one incoming message. Engine access is serialized through
    /// the single engine mutex.
    fn handle_message(self: &Arc<Self>, conn_id: u64, msg: Message) {
        match msg {
            Message::Ping => self.send_to(conn_id, Message::Pong),
            Message::Pong => debug!(conn_id, "pong"),
            Message::RequestChain => {
                let chain = self.engine.lock().chain().to_vec();
                self.send_to(conn_id, Message::SendChain(chain));
            }
            Message::SendChain(chain) => {
                let result = self.engine.lock().replace_chain(chain);
                match result {
                    Ok(()) => info!(conn_id, "adopted longer chain from peer"),
                    Err(e) => debug!(conn_id, reason = %e, "peer chain not adopted"),
                }
            }
            Message::NewBlock(block) => self.handle_new_block(conn_id, block),
            Message::NewTransaction(tx) => self.handle_new_transaction(tx),
            Message::RequestPeers => {
                let peers: Vec<Peer> = self.known_peers.lock().iter().cloned().collect();
                self.send_to(conn_id, Message::SendPeers(peers));
            }
            Message::SendPeers(peers) => {
                for peer in peers {
                    self.maybe_connect(peer);
                }
            }
        }
    }

    fn handle_new_block(self: &Arc<Self>, conn_id: u64, block: Block) {
        if !self.seen_blocks.lock().insert(block.hash) {
            debug!(hash = %block.hash, "duplicate block dropped");
            return;
        }
        let disposition = {
            let mut engine = self.engine.lock();
            match engine.try_append_block(block.clone()) {
                Ok(()) => BlockDisposition::Applied,
                Err(ChainError::DoesNotExtendTip)
                    if block.index >= engine.chain_len() as u64 =>
                {
                    BlockDisposition::Behind
                }
                Err(e) => {
                    debug!(hash = %block.hash, reason = %e, "peer block dropped");
                    BlockDisposition::Dropped
                }
            }
        };
        match disposition {
            BlockDisposition::Applied => self.broadcast(Message::NewBlock(block)),
            // Convergence runs through SEND_CHAIN: ask the sender for the
            // chain this block belongs to.
            BlockDisposition::Behind => self.send_to(conn_id, Message::RequestChain),
            BlockDisposition::Dropped => {}
        }
    }

    fn handle_new_transaction(self: &Arc<Self>, tx: Transaction) {
        if !self.seen_txs.lock().insert(tx.txid) {
            debug!(txid = %tx.txid, "duplicate transaction dropped");
            return;
        }
        let result = self.engine.lock().submit_transaction(tx.clone());
        match result {
            Ok(()) => self.broadcast(Message::NewTransaction(tx)),
            Err(e) => debug!(txid = %tx.txid, reason = %e, "peer transaction dropped"),
        }
    }

    /// Dial a peer unless it is us or already known.
    fn maybe_connect(self: &Arc<Self>, peer: Peer) {
        if peer == self.local {
            return;
        }
        if !self.known_peers.lock().insert(peer.clone()) {
            return;
        }
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            match TcpStream::connect(peer.socket_addr()).await {
                Ok(stream) => {
                    info!(%peer, "connected to peer");
                    shared.register(stream, true);
                }
                Err(e) => {
                    warn!(%peer, error = %e, "peer connect failed");
                    shared.known_peers.lock().remove(&peer);
                }
            }
        });
    }

    fn send_to(&self, conn_id: u64, msg: Message) {
        let sender = self.connections.lock().get(&conn_id).cloned();
        if let Some(sender) = sender {
            if sender.send(msg).is_err() {
                self.connections.lock().remove(&conn_id);
            }
        }
    }

    /// Flood a message to every current connection. Send failures close the
    /// offending connection and the rest are still served.
    fn broadcast(&self, msg: Message) {
        let senders: Vec<(u64, mpsc::UnboundedSender<Message>)> = self
            .connections
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();
        for (conn_id, sender) in senders {
            if sender.send(msg.clone()).is_err() {
                debug!(conn_id, "broadcast to closed connection, removing");
                self.connections.lock().remove(&conn_id);
            }
        }
    }
}

/// Handle to the running P2P node.
pub struct NetworkNode {
    shared: Arc<Shared>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkNode {
    /// Bind the listener and start accepting connections. Bind failure is
    /// fatal and surfaced to the caller. Dials the bootstrap peer, if any.
    pub async fn start(config: NetworkConfig, engine: SharedEngine) -> Result<Self, NetworkError> {
        let bind_addr = format!("{}:{}", config.listen_host, config.listen_port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| NetworkError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let local_port = listener.local_addr()?.port();
        let local = Peer::new(config.listen_host.clone(), local_port);
        info!(%local, "p2p listener started");

        let shared = Arc::new(Shared {
            engine,
            local,
            connections: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            known_peers: Mutex::new(HashSet::new()),
            seen_blocks: Mutex::new(HashSet::new()),
            seen_txs: Mutex::new(HashSet::new()),
            next_conn_id: AtomicU64::new(0),
        });

        let accept_shared = Arc::clone(&shared);
        let listener_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!(%addr, "inbound connection");
                        Arc::clone(&accept_shared).register(stream, false);
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        });

        let node = Self {
            shared,
            listener_task: Mutex::new(Some(listener_task)),
        };
        if let Some(peer) = config.bootstrap_peer {
            node.connect_peer(peer);
        }
        Ok(node)
    }

    /// Our advertised (host, port) — with the actual bound port.
    pub fn listen_peer(&self) -> Peer {
        self.shared.local.clone()
    }

    /// Dial a peer and run the outbound handshake.
    pub fn connect_peer(&self, peer: Peer) {
        self.shared.maybe_connect(peer);
    }

    /// Record a locally produced block as seen and flood it.
    pub fn broadcast_block(&self, block: &Block) {
        self.shared.seen_blocks.lock().insert(block.hash);
        self.shared.broadcast(Message::NewBlock(block.clone()));
    }

    /// Record a locally admitted transaction as seen and flood it.
    pub fn broadcast_transaction(&self, tx: &Transaction) {
        self.shared.seen_txs.lock().insert(tx.txid);
        self.shared.broadcast(Message::NewTransaction(tx.clone()));
    }

    /// Number of live connections.
    pub fn peer_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    pub fn known_peers(&self) -> Vec<Peer> {
        self.shared.known_peers.lock().iter().cloned().collect()
    }

    /// Stop accepting, close every connection, and abort all tasks.
    pub fn shutdown(&self) {
        if let Some(task) = self.listener_task.lock().take() {
            task.abort();
        }
        self.shared.connections.lock().clear();
        for (_, tasks) in self.shared.tasks.lock().drain() {
            for task in tasks {
                task.abort();
            }
        }
    }
}

impl Drop for NetworkNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}
