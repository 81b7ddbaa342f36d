//! Single-keypair wallet with on-disk persistence.
//!
//! The wallet file is JSON holding the hex secret key only; public key and
//! address are rederived on load. A corrupt file falls back to a freshly
//! generated wallet rather than refusing to start.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use karat_core::address::Address;
use karat_core::crypto::KeyPair;
use karat_core::types::Transaction;

use crate::error::WalletError;

/// On-disk wallet format.
#[derive(Serialize, Deserialize)]
struct WalletFile {
    private_key_hex: String,
}

/// A secp256k1 keypair with its derived address.
pub struct Wallet {
    keypair: KeyPair,
    address: Address,
}

impl Wallet {
    /// Generate a fresh random wallet.
    pub fn generate() -> Self {
        Self::from_keypair(KeyPair::generate())
    }

    pub fn from_keypair(keypair: KeyPair) -> Self {
        let address = Address::from_pubkey(&keypair.public_key());
        Self { keypair, address }
    }

    /// Load a wallet file.
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let raw = std::fs::read_to_string(path)?;
        let file: WalletFile =
            serde_json::from_str(&raw).map_err(|e| WalletError::Corrupt(e.to_string()))?;
        let keypair = KeyPair::from_secret_hex(&file.private_key_hex)?;
        Ok(Self::from_keypair(keypair))
    }

    /// Persist the secret key to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let file = WalletFile {
            private_key_hex: self.export_private_key(),
        };
        let raw = serde_json::to_string(&file).expect("wallet file serializes");
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Load the wallet at `path`, or generate and save a new one when the
    /// file is missing or unreadable.
    pub fn load_or_generate(path: &Path) -> Result<Self, WalletError> {
        if path.exists() {
            match Self::load(path) {
                Ok(wallet) => return Ok(wallet),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "wallet load failed, generating fresh keys");
                }
            }
        }
        let wallet = Self::generate();
        wallet.save(path)?;
        info!(address = %wallet.address, "new wallet generated");
        Ok(wallet)
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key().to_hex()
    }

    /// Sign a transaction's txid, returning the hex compact signature.
    ///
    /// The caller attaches the signature to every input; the txid already
    /// commits to all of them.
    pub fn sign(&self, tx: &Transaction) -> String {
        hex::encode(self.keypair.sign_txid(&tx.txid))
    }

    /// Export the hex secret key. Handle with care.
    pub fn export_private_key(&self) -> String {
        hex::encode(self.keypair.secret_bytes())
    }

    /// Rebuild a wallet from an exported hex secret key.
    pub fn import_private_key(private_key_hex: &str) -> Result<Self, WalletError> {
        Ok(Self::from_keypair(KeyPair::from_secret_hex(private_key_hex)?))
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_derives_valid_address() {
        let wallet = Wallet::generate();
        Address::decode(wallet.address().as_str()).unwrap();
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        let wallet = Wallet::generate();
        wallet.save(&path).unwrap();

        let loaded = Wallet::load(&path).unwrap();
        assert_eq!(loaded.address(), wallet.address());
        assert_eq!(loaded.public_key_hex(), wallet.public_key_hex());
    }

    #[test]
    fn load_or_generate_creates_then_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        let first = Wallet::load_or_generate(&path).unwrap();
        let second = Wallet::load_or_generate(&path).unwrap();
        assert_eq!(first.address(), second.address());
    }

    #[test]
    fn corrupt_file_falls_back_to_fresh_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        std::fs::write(&path, "not json").unwrap();
        let wallet = Wallet::load_or_generate(&path).unwrap();
        // The corrupt file was replaced with a loadable one.
        let reloaded = Wallet::load(&path).unwrap();
        assert_eq!(reloaded.address(), wallet.address());
    }

    #[test]
    fn export_import_round_trip() {
        let wallet = Wallet::generate();
        let imported = Wallet::import_private_key(&wallet.export_private_key()).unwrap();
        assert_eq!(imported.address(), wallet.address());
    }

    #[test]
    fn signature_verifies_with_wallet_pubkey() {
        use karat_core::types::TxOutput;

        let wallet = Wallet::generate();
        let tx = Transaction::new(
            Vec::new(),
            vec![TxOutput {
                address: "recipient".into(),
                amount: 1.0,
            }],
            5.0,
        )
        .unwrap();
        let sig = wallet.sign(&tx);
        let pk = karat_core::crypto::PublicKey::from_hex(&wallet.public_key_hex()).unwrap();
        pk.verify_txid(&tx.txid, &sig).unwrap();
    }

    #[test]
    fn debug_hides_secret_key() {
        let wallet = Wallet::generate();
        let rendered = format!("{wallet:?}");
        assert!(!rendered.contains(&wallet.export_private_key()));
    }
}
