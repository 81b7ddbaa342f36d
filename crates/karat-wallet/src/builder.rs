//! Transaction building: coin selection, change, and signing.

use tracing::debug;

use karat_core::types::{Transaction, TxInput, TxOutput};
use karat_core::utxo::UtxoSet;

use crate::error::WalletError;
use crate::wallet::Wallet;

/// Build and sign a transfer of `amount` from `wallet` to `to`.
///
/// Greedily selects coins from the wallet's address, pays the recipient,
/// and returns any change to the wallet. The single signature over the txid
/// is attached to every input. Fails with
/// [`WalletError::InsufficientFunds`] when the address cannot cover the
/// amount — the shortfall is never silently ignored.
pub fn build_transfer(
    utxo: &UtxoSet,
    wallet: &Wallet,
    to: &str,
    amount: f64,
    timestamp: f64,
) -> Result<Transaction, WalletError> {
    if amount <= 0.0 || !amount.is_finite() {
        return Err(WalletError::InvalidAmount(format!("{amount}")));
    }

    let from = wallet.address().as_str();
    let selection = utxo.select(from, amount);
    if !selection.covers(amount) {
        return Err(WalletError::InsufficientFunds {
            have: selection.accumulated,
            need: amount,
        });
    }

    let pubkey = wallet.public_key_hex();
    let inputs: Vec<TxInput> = selection
        .outpoints
        .iter()
        .map(|(txid, vout)| TxInput {
            txid: *txid,
            vout: *vout,
            pubkey: pubkey.clone(),
            signature: String::new(),
        })
        .collect();

    let mut outputs = vec![TxOutput {
        address: to.to_string(),
        amount,
    }];
    let change = selection.accumulated - amount;
    if change > 0.0 {
        outputs.push(TxOutput {
            address: from.to_string(),
            amount: change,
        });
    }

    let mut tx = Transaction::new(inputs, outputs, timestamp)
        .map_err(|e| WalletError::InvalidAmount(e.to_string()))?;
    let signature = wallet.sign(&tx);
    for inp in &mut tx.inputs {
        inp.signature = signature.clone();
    }
    debug!(txid = %tx.txid, inputs = tx.inputs.len(), "built transfer");
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use karat_core::types::{Block, Hash256};
    use karat_core::validation;

    const EPS: f64 = 1e-9;

    fn fund(wallet: &Wallet, amounts: &[f64]) -> UtxoSet {
        let mut utxo = UtxoSet::new();
        for (i, &amount) in amounts.iter().enumerate() {
            let cb = Transaction::new(
                Vec::new(),
                vec![TxOutput {
                    address: wallet.address().as_str().to_string(),
                    amount,
                }],
                i as f64,
            )
            .unwrap();
            let block = Block::new(i as u64, i as f64, vec![cb], Hash256::ZERO);
            utxo.apply(&block).unwrap();
        }
        utxo
    }

    #[test]
    fn transfer_with_change_verifies() {
        let wallet = Wallet::generate();
        let utxo = fund(&wallet, &[10.2]);
        let tx = build_transfer(&utxo, &wallet, "recipient", 3.0, 100.0).unwrap();

        validation::verify_transaction(&tx, &utxo).unwrap();
        assert_eq!(tx.outputs.len(), 2);
        assert!((tx.outputs[0].amount - 3.0).abs() < EPS);
        assert_eq!(tx.outputs[0].address, "recipient");
        assert!((tx.outputs[1].amount - 7.2).abs() < EPS);
        assert_eq!(tx.outputs[1].address, wallet.address().as_str());
    }

    #[test]
    fn exact_spend_has_no_change_output() {
        let wallet = Wallet::generate();
        let utxo = fund(&wallet, &[5.0]);
        let tx = build_transfer(&utxo, &wallet, "recipient", 5.0, 100.0).unwrap();
        assert_eq!(tx.outputs.len(), 1);
        validation::verify_transaction(&tx, &utxo).unwrap();
    }

    #[test]
    fn multiple_coins_accumulated() {
        let wallet = Wallet::generate();
        let utxo = fund(&wallet, &[4.0, 4.0, 4.0]);
        let tx = build_transfer(&utxo, &wallet, "recipient", 7.0, 100.0).unwrap();
        assert_eq!(tx.inputs.len(), 2);
        // Every input carries the shared signature.
        assert!(tx.inputs.iter().all(|inp| !inp.signature.is_empty()));
        validation::verify_transaction(&tx, &utxo).unwrap();
    }

    #[test]
    fn insufficient_funds_reports_shortfall() {
        let wallet = Wallet::generate();
        let utxo = fund(&wallet, &[2.0]);
        let err = build_transfer(&utxo, &wallet, "recipient", 5.0, 100.0).unwrap_err();
        match err {
            WalletError::InsufficientFunds { have, need } => {
                assert!((have - 2.0).abs() < EPS);
                assert!((need - 5.0).abs() < EPS);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_positive_amount_rejected() {
        let wallet = Wallet::generate();
        let utxo = fund(&wallet, &[2.0]);
        assert!(matches!(
            build_transfer(&utxo, &wallet, "r", 0.0, 100.0),
            Err(WalletError::InvalidAmount(_))
        ));
        assert!(matches!(
            build_transfer(&utxo, &wallet, "r", -1.0, 100.0),
            Err(WalletError::InvalidAmount(_))
        ));
    }

    #[test]
    fn inputs_conserve_value() {
        let wallet = Wallet::generate();
        let utxo = fund(&wallet, &[10.2, 10.2]);
        let tx = build_transfer(&utxo, &wallet, "recipient", 12.0, 100.0).unwrap();
        let in_sum: f64 = tx
            .inputs
            .iter()
            .map(|inp| utxo.output(&inp.txid, inp.vout).unwrap().amount)
            .sum();
        assert!((in_sum - tx.total_output_value()).abs() < EPS);
    }
}
