//! Beacon-signal transaction construction.
//!
//! A beacon signal spends the funded beacon output back to the beacon
//! address and commits to the aggregated signature requests in an
//! `OP_RETURN <32-byte smt_root>` output. The whole cohort key-path-signs
//! the spend.
//!
//! The funding side is a stub: outpoint and value are fixed constants until
//! the wallet layer exists. The prevout script is the beacon script, which
//! is what both coordinator and participants sighash against.

use std::collections::BTreeMap;

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::sighash::{Prevouts, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, OutPoint, ScriptBuf, TapSighashType, Transaction, TxIn, TxOut, Txid, Witness,
};

use crate::cohort::Cohort;
use crate::ProtocolError;

/// Index of the beacon input within a signal transaction.
pub const BEACON_INPUT_INDEX: usize = 0;

/// Refund value carried back to the beacon address.
pub const REFUND_SATS: u64 = 500;

/// Stub funding outpoint until wallet integration lands.
pub const FUNDING_TXID: &str = "b33dabe7c6ccbbfe27487692d1c9318fe4c478d68347acc6e1714f5066f97f36";
pub const FUNDING_VOUT: u32 = 1;
pub const FUNDING_SATS: u64 = 1_000;

/// Derivation of the SMT root committed to by a signal transaction.
///
/// How the root is built from the request set is still undecided upstream;
/// [`random_smt_root`] is the placeholder default.
pub type SmtRootFn = fn(&BTreeMap<String, Vec<u8>>) -> [u8; 32];

/// Default SMT root: 32 random bytes, ignoring the request set.
pub fn random_smt_root(_requests: &BTreeMap<String, Vec<u8>>) -> [u8; 32] {
    let mut root = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut root);
    root
}

/// The UTXO a signal transaction spends (stub wallet).
pub fn funding_utxo(beacon_script: ScriptBuf) -> Result<(OutPoint, TxOut), ProtocolError> {
    let txid: Txid = FUNDING_TXID
        .parse()
        .map_err(|e| ProtocolError::BadState(format!("funding txid: {}", e)))?;
    Ok((
        OutPoint {
            txid,
            vout: FUNDING_VOUT,
        },
        TxOut {
            value: Amount::from_sat(FUNDING_SATS),
            script_pubkey: beacon_script,
        },
    ))
}

/// Build the unsigned beacon-signal transaction for a finalized cohort.
pub fn build_beacon_signal(cohort: &Cohort, smt_root: [u8; 32]) -> Result<Transaction, ProtocolError> {
    let beacon = cohort.beacon().ok_or_else(|| {
        ProtocolError::BadState(format!("cohort {} has no beacon address", cohort.id))
    })?;

    let (outpoint, _prevout) = funding_utxo(beacon.address.script_pubkey())?;

    let refund = TxOut {
        value: Amount::from_sat(REFUND_SATS),
        script_pubkey: beacon.address.script_pubkey(),
    };
    let signal = TxOut {
        value: Amount::ZERO,
        script_pubkey: ScriptBuf::new_op_return(&smt_root),
    };

    Ok(Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: outpoint,
            ..Default::default()
        }],
        output: vec![refund, signal],
    })
}

/// `SIGHASH_DEFAULT` taproot key-spend sighash for one input.
pub fn key_spend_sighash(
    tx: &Transaction,
    prevout: &TxOut,
    input_index: usize,
) -> Result<[u8; 32], ProtocolError> {
    let mut cache = SighashCache::new(tx);
    let sighash = cache
        .taproot_key_spend_signature_hash(
            input_index,
            &Prevouts::All(&[prevout.clone()]),
            TapSighashType::Default,
        )
        .map_err(|e| ProtocolError::BadState(format!("sighash: {}", e)))?;
    Ok(sighash.to_byte_array())
}

/// Place a 64-byte key-path signature into the witness of `input_index`.
pub fn finalize_key_spend(tx: &mut Transaction, input_index: usize, signature: &[u8; 64]) -> Result<(), ProtocolError> {
    let sig = bitcoin::secp256k1::schnorr::Signature::from_slice(signature)
        .map_err(|e| ProtocolError::Validation(format!("signature encoding: {}", e)))?;
    let input = tx
        .input
        .get_mut(input_index)
        .ok_or_else(|| ProtocolError::BadState(format!("no input {}", input_index)))?;
    input.witness = Witness::p2tr_key_spend(&bitcoin::taproot::Signature {
        signature: sig,
        sighash_type: TapSighashType::Default,
    });
    Ok(())
}
