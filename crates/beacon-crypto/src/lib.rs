//! Beacon Crypto
//!
//! Cryptographic building blocks for the btc-beacon protocols:
//! - BIP-39 seed handling and BIP-86 key derivation for participant keys
//! - MuSig2 (BIP-327) key aggregation, nonces and partial signatures
//! - Taproot beacon derivation (internal key + merkle root + P2TR address)
//!
//! The MuSig2 math lives in the `musig2` crate; this crate bridges it to the
//! secp256k1 0.29 types used by `bitcoin` and fixes the conventions the
//! protocols depend on (ordered key aggregation, merkle-root tweak, 33-byte
//! compressed wire points).

use thiserror::Error;

pub mod keys;
pub mod musig;
pub mod seed;
pub mod taproot;

pub use keys::{derive_beacon_master, derive_cohort_key};
pub use musig::{
    aggregate_nonces, aggregate_signatures, generate_nonce, key_agg_context, partial_sign,
    signing_context, verify_partial, verify_signature,
};
pub use taproot::{derive_beacon, network_from_name, network_name, output_key, Beacon};

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),
    #[error("Key aggregation failed: {0}")]
    KeyAggregation(String),
    #[error("Invalid point encoding: {0}")]
    InvalidPoint(String),
    #[error("Invalid scalar encoding: {0}")]
    InvalidScalar(String),
    #[error("Invalid nonce encoding: {0}")]
    InvalidNonce(String),
    #[error("Signing failed: {0}")]
    SigningError(String),
    #[error("Taproot construction failed: {0}")]
    TaprootError(String),
    #[error("Unknown Bitcoin network: {0}")]
    UnknownNetwork(String),
}
