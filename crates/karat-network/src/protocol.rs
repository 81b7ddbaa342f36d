//! Wire message types and framing for the Karat P2P protocol.
//!
//! Every message travels as one frame: a 4-byte big-endian length prefix
//! followed by a UTF-8 JSON envelope `{"type": <tag>, "data": <payload>,
//! "timestamp": <float seconds>}`. Explicit framing means a SEND_CHAIN of
//! any size arrives intact instead of being clipped by a receive buffer.
//! Unknown tags are surfaced at this boundary; the dispatcher above only
//! ever sees the eight known variants.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use karat_core::constants::MAX_FRAME_BYTES;
use karat_core::error::NetworkError;
use karat_core::types::{Block, Transaction};

use crate::peer::Peer;

/// A message exchanged between Karat peers.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Ask a peer for its full chain; answered with [`Message::SendChain`].
    RequestChain,
    /// A full chain, offered for replace-on-sync.
    SendChain(Vec<Block>),
    /// A freshly mined or first-seen block, flooded to all peers.
    NewBlock(Block),
    /// A newly admitted transaction, flooded to all peers.
    NewTransaction(Transaction),
    /// Ask a peer for its known peer set; answered with [`Message::SendPeers`].
    RequestPeers,
    /// Known peer addresses; unknown entries get an outbound connect.
    SendPeers(Vec<Peer>),
    Ping,
    Pong,
}

/// The JSON envelope carried inside each frame.
#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    timestamp: f64,
}

impl Message {
    pub fn tag(&self) -> &'static str {
        match self {
            Message::RequestChain => "REQUEST_CHAIN",
            Message::SendChain(_) => "SEND_CHAIN",
            Message::NewBlock(_) => "NEW_BLOCK",
            Message::NewTransaction(_) => "NEW_TRANSACTION",
            Message::RequestPeers => "REQUEST_PEERS",
            Message::SendPeers(_) => "SEND_PEERS",
            Message::Ping => "PING",
            Message::Pong => "PONG",
        }
    }

    /// Encode as the JSON envelope, stamped with the current time.
    pub fn encode(&self) -> Result<Vec<u8>, NetworkError> {
        let data = match self {
            Message::RequestChain | Message::RequestPeers | Message::Ping | Message::Pong => {
                serde_json::Value::Null
            }
            Message::SendChain(chain) => to_value(chain)?,
            Message::NewBlock(block) => to_value(block)?,
            Message::NewTransaction(tx) => to_value(tx)?,
            Message::SendPeers(peers) => to_value(peers)?,
        };
        let envelope = Envelope {
            tag: self.tag().to_string(),
            data,
            timestamp: now_secs(),
        };
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| NetworkError::MalformedFrame(e.to_string()))?;
        if bytes.len() > MAX_FRAME_BYTES {
            return Err(NetworkError::FrameTooLarge {
                size: bytes.len(),
                max: MAX_FRAME_BYTES,
            });
        }
        Ok(bytes)
    }

    /// Decode a JSON envelope. Unknown tags are an error, not a panic and
    /// not a silent drop — the connection handler decides what to do.
    pub fn decode(bytes: &[u8]) -> Result<Self, NetworkError> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| NetworkError::MalformedFrame(e.to_string()))?;
        let msg = match envelope.tag.as_str() {
            "REQUEST_CHAIN" => Message::RequestChain,
            "SEND_CHAIN" => Message::SendChain(from_value(envelope.data)?),
            "NEW_BLOCK" => Message::NewBlock(from_value(envelope.data)?),
            "NEW_TRANSACTION" => Message::NewTransaction(from_value(envelope.data)?),
            "REQUEST_PEERS" => Message::RequestPeers,
            "SEND_PEERS" => Message::SendPeers(from_value(envelope.data)?),
            "PING" => Message::Ping,
            "PONG" => Message::Pong,
            other => return Err(NetworkError::UnknownMessageType(other.to_string())),
        };
        Ok(msg)
    }
}

fn to_value<T: Serialize>(payload: &T) -> Result<serde_json::Value, NetworkError> {
    serde_json::to_value(payload).map_err(|e| NetworkError::MalformedFrame(e.to_string()))
}

fn from_value<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, NetworkError> {
    serde_json::from_value(value).map_err(|e| NetworkError::MalformedFrame(e.to_string()))
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Write one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), NetworkError> {
    if payload.len() > MAX_FRAME_BYTES {
        return Err(NetworkError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame. A clean EOF on the length prefix is
/// reported as [`NetworkError::PeerDisconnected`].
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, NetworkError> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            NetworkError::PeerDisconnected
        } else {
            NetworkError::Io(e)
        }
    })?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(NetworkError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_BYTES,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            NetworkError::PeerDisconnected
        } else {
            NetworkError::Io(e)
        }
    })?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use karat_core::types::{Hash256, TxOutput};

    fn sample_block() -> Block {
        let cb = Transaction::coinbase("miner", 10.2, 5.0);
        Block::new(1, 5.0, vec![cb], Hash256([0x11; 32]))
    }

    fn sample_tx() -> Transaction {
        Transaction::new(
            Vec::new(),
            vec![TxOutput {
                address: "addr".into(),
                amount: 1.0,
            }],
            7.0,
        )
        .unwrap()
    }

    fn round_trip(msg: Message) -> Message {
        Message::decode(&msg.encode().unwrap()).unwrap()
    }

    #[test]
    fn all_variants_round_trip() {
        assert_eq!(round_trip(Message::RequestChain), Message::RequestChain);
        assert_eq!(round_trip(Message::RequestPeers), Message::RequestPeers);
        assert_eq!(round_trip(Message::Ping), Message::Ping);
        assert_eq!(round_trip(Message::Pong), Message::Pong);
        assert_eq!(
            round_trip(Message::NewBlock(sample_block())),
            Message::NewBlock(sample_block())
        );
        assert_eq!(
            round_trip(Message::NewTransaction(sample_tx())),
            Message::NewTransaction(sample_tx())
        );
        assert_eq!(
            round_trip(Message::SendChain(vec![sample_block()])),
            Message::SendChain(vec![sample_block()])
        );
        let peers = vec![Peer::new("a", 1), Peer::new("b", 2)];
        assert_eq!(
            round_trip(Message::SendPeers(peers.clone())),
            Message::SendPeers(peers)
        );
    }

    #[test]
    fn envelope_carries_type_data_timestamp() {
        let bytes = Message::NewBlock(sample_block()).encode().unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["type"], "NEW_BLOCK");
        assert!(v["data"]["hash"].is_string());
        assert!(v["timestamp"].is_f64() || v["timestamp"].is_u64());
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let raw = br#"{"type": "SELF_DESTRUCT", "data": null, "timestamp": 0}"#;
        assert!(matches!(
            Message::decode(raw),
            Err(NetworkError::UnknownMessageType(_))
        ));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            Message::decode(b"{nope"),
            Err(NetworkError::MalformedFrame(_))
        ));
    }

    #[tokio::test]
    async fn frame_round_trip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);
        let payload = Message::SendChain(vec![sample_block()]).encode().unwrap();
        write_frame(&mut a, &payload).await.unwrap();
        let read = read_frame(&mut b).await.unwrap();
        assert_eq!(read, payload);
    }

    #[tokio::test]
    async fn several_frames_in_sequence() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);
        for msg in [Message::Ping, Message::RequestChain, Message::Pong] {
            write_frame(&mut a, &msg.encode().unwrap()).await.unwrap();
        }
        assert_eq!(
            Message::decode(&read_frame(&mut b).await.unwrap()).unwrap(),
            Message::Ping
        );
        assert_eq!(
            Message::decode(&read_frame(&mut b).await.unwrap()).unwrap(),
            Message::RequestChain
        );
        assert_eq!(
            Message::decode(&read_frame(&mut b).await.unwrap()).unwrap(),
            Message::Pong
        );
    }

    #[tokio::test]
    async fn closed_writer_reports_disconnect() {
        let (a, mut b) = tokio::io::duplex(1024);
        drop(a);
        assert!(matches!(
            read_frame(&mut b).await,
            Err(NetworkError::PeerDisconnected)
        ));
    }

    #[tokio::test]
    async fn oversized_length_prefix_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let huge = (MAX_FRAME_BYTES as u32 + 1).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut a, &huge).await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(NetworkError::FrameTooLarge { .. })
        ));
    }
}
