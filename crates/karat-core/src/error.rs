//! Error types for the Karat protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    #[error("unknown UTXO: {0}")] UnknownUtxo(String),
    #[error("referenced output already spent: {0}")] AlreadySpent(String),
    #[error("pubkey does not hash to referenced address: input {index}")] AddressMismatch { index: usize },
    #[error("invalid signature on input {index}")] InvalidSignature { index: usize },
    #[error("missing signature or pubkey on input {index}")] MissingWitness { index: usize },
    #[error("negative amount in output {0}")] NegativeAmount(usize),
    #[error("empty outputs")] EmptyOutputs,
    #[error("txid mismatch: stored {stored}, computed {computed}")] TxidMismatch { stored: String, computed: String },
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlockError {
    #[error("invalid proof of work at difficulty {difficulty}")] InvalidPoW { difficulty: u32 },
    #[error("invalid previous hash")] InvalidPrevHash,
    #[error("index mismatch: expected {expected}, got {actual}")] IndexMismatch { expected: u64, actual: u64 },
    #[error("hash does not match header")] HashMismatch,
    #[error("merkle root does not match transactions")] MerkleMismatch,
    #[error("timestamp too far in the future")] TimestampTooFar,
    #[error("timestamp earlier than median time past")] TimestampBeforeMedian,
    #[error("missing coinbase")] MissingCoinbase,
    #[error("multiple coinbase transactions")] MultipleCoinbase,
    #[error("tx error in block at tx {index}: {source}")] Transaction { index: usize, source: TransactionError },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("invalid block at index {index}: {source}")] InvalidBlock { index: u64, source: BlockError },
    #[error("candidate chain not longer: {candidate} <= {current}")] NotLonger { candidate: usize, current: usize },
    #[error("block does not extend tip")] DoesNotExtendTip,
    #[error("mining cancelled")] MiningCancelled,
    #[error("duplicate transaction in pool: {0}")] DuplicateTransaction(String),
    #[error("input conflicts with pending transaction: {0}")] PendingConflict(String),
    #[error("coinbase transactions may only be created by the miner")] CoinbaseNotAllowed,
    #[error("utxo replay failed: {0}")] ReplayFailed(TransactionError),
    #[error("transaction rejected: {0}")] RejectedTransaction(#[from] TransactionError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
    #[error("invalid secret key bytes")] InvalidSecretKey,
    #[error("invalid hex: {0}")] InvalidHex(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58: {0}")] InvalidBase58(String),
    #[error("invalid length: {0}")] InvalidLength(usize),
    #[error("invalid checksum")] InvalidChecksum,
    #[error("unknown version byte: {0}")] UnknownVersion(u8),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("io: {0}")] Io(#[from] std::io::Error),
    #[error("corrupt chain file: {0}")] Corrupt(String),
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("bind failed on {addr}: {source}")] Bind { addr: String, source: std::io::Error },
    #[error("peer disconnected")] PeerDisconnected,
    #[error("frame too large: {size} > {max}")] FrameTooLarge { size: usize, max: usize },
    #[error("malformed frame: {0}")] MalformedFrame(String),
    #[error("unknown message type: {0}")] UnknownMessageType(String),
    #[error("io: {0}")] Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum KaratError {
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Chain(#[from] ChainError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Address(#[from] AddressError),
    #[error(transparent)] Storage(#[from] StorageError),
    #[error(transparent)] Network(#[from] NetworkError),
}
