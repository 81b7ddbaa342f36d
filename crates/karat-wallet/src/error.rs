//! Wallet error types.
use thiserror::Error;

use karat_core::error::CryptoError;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: f64, need: f64 },
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt wallet file: {0}")]
    Corrupt(String),
}
