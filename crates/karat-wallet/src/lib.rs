//! # karat-wallet
//! Keypair lifecycle, address derivation, and transaction building.

pub mod builder;
pub mod error;
pub mod wallet;

pub use builder::build_transfer;
pub use error::WalletError;
pub use wallet::Wallet;
