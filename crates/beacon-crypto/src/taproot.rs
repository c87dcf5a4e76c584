//! Beacon address derivation.
//!
//! The beacon output is P2TR: internal key = BIP-327 aggregate of the
//! ordered cohort keys, tweaked by the merkle root of the cohort's script
//! tree. For an n-of-n cohort the tree is the single MuSig leaf
//! `<aggregate_xonly> OP_CHECKSIG`, kept as a script-path fallback for the
//! key the whole cohort controls.

use bitcoin::hashes::Hash;
use bitcoin::key::XOnlyPublicKey;
use bitcoin::opcodes::all::OP_CHECKSIG;
use bitcoin::script::Builder;
use bitcoin::secp256k1::{PublicKey, Secp256k1};
use bitcoin::taproot::{TapNodeHash, TaprootBuilder};
use bitcoin::{Address, Network, ScriptBuf};

use crate::musig::{aggregated_xonly, key_agg_context, signing_context};
use crate::CryptoError;

/// A finalized cohort's on-chain identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    /// Untweaked MuSig2 aggregate of the ordered cohort keys.
    pub internal_key: XOnlyPublicKey,
    /// Merkle root of the cohort script tree; the taproot tweak.
    pub merkle_root: TapNodeHash,
    /// Network-encoded P2TR address.
    pub address: Address,
}

impl Beacon {
    pub fn merkle_root_bytes(&self) -> [u8; 32] {
        self.merkle_root.to_byte_array()
    }
}

/// The tapleaf the cohort tree commits to.
fn musig_leaf(aggregate: &XOnlyPublicKey) -> ScriptBuf {
    Builder::new()
        .push_x_only_key(aggregate)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// Derive the beacon for an ordered cohort key sequence.
///
/// Ordering matters: this must be called with the keys in opt-in order on
/// every node, or the derived addresses diverge.
pub fn derive_beacon(cohort_keys: &[PublicKey], network: Network) -> Result<Beacon, CryptoError> {
    let secp = Secp256k1::new();

    let internal_key = aggregated_xonly(&key_agg_context(cohort_keys)?)?;

    let spend_info = TaprootBuilder::new()
        .add_leaf(0, musig_leaf(&internal_key))
        .map_err(|e| CryptoError::TaprootError(format!("taproot builder error: {}", e)))?
        .finalize(&secp, internal_key)
        .map_err(|_| CryptoError::TaprootError("taproot finalize failed".into()))?;

    let merkle_root = spend_info
        .merkle_root()
        .ok_or_else(|| CryptoError::TaprootError("missing merkle root".into()))?;

    let address = Address::p2tr(&secp, internal_key, Some(merkle_root), network);

    Ok(Beacon {
        internal_key,
        merkle_root,
        address,
    })
}

/// The tweaked aggregate key the final signature must verify under.
///
/// Equals the witness program of the beacon address.
pub fn output_key(
    cohort_keys: &[PublicKey],
    merkle_root: [u8; 32],
) -> Result<XOnlyPublicKey, CryptoError> {
    aggregated_xonly(&signing_context(cohort_keys, merkle_root)?)
}

/// Parse a wire network name (`mainnet`/`testnet`/`signet`/`regtest`).
pub fn network_from_name(name: &str) -> Result<Network, CryptoError> {
    match name {
        "mainnet" => Ok(Network::Bitcoin),
        "testnet" => Ok(Network::Testnet),
        "signet" => Ok(Network::Signet),
        "regtest" => Ok(Network::Regtest),
        other => Err(CryptoError::UnknownNetwork(other.to_string())),
    }
}

/// Wire name of a network.
pub fn network_name(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => "mainnet",
        Network::Testnet => "testnet",
        Network::Signet => "signet",
        Network::Regtest => "regtest",
        _ => "regtest",
    }
}
