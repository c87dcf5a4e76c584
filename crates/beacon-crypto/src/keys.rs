//! HD key derivation for cohort participation.
//!
//! A participant derives one key pair per cohort it joins, as a non-hardened
//! child of a BIP-86 taproot account. The child index is assigned when the
//! participant opts in and never reused for another cohort.

use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::Network;

use crate::CryptoError;

/// BIP-86 taproot account path (mainnet).
pub const BIP86_PATH: &str = "m/86'/0'/0'";

/// Derive the beacon account key from a BIP-39 seed.
///
/// - Mainnet: m/86'/0'/0'
/// - Testnet/Signet/Regtest: m/86'/1'/0'
pub fn derive_beacon_master(seed: &[u8; 64], network: Network) -> Result<Xpriv, CryptoError> {
    let master = Xpriv::new_master(network, seed)
        .map_err(|e| CryptoError::DerivationFailed(e.to_string()))?;

    let path_str = match network {
        Network::Bitcoin => BIP86_PATH,
        _ => "m/86'/1'/0'",
    };

    let path: DerivationPath = path_str
        .parse()
        .map_err(|e: bitcoin::bip32::Error| CryptoError::DerivationFailed(e.to_string()))?;

    master
        .derive_priv(&Secp256k1::new(), &path)
        .map_err(|e| CryptoError::DerivationFailed(e.to_string()))
}

/// Derive the key pair a participant uses within one cohort.
///
/// `master` is the account key from [`derive_beacon_master`]; `index` is the
/// per-cohort key index.
pub fn derive_cohort_key(master: &Xpriv, index: u32) -> Result<(SecretKey, PublicKey), CryptoError> {
    let secp = Secp256k1::new();

    let path_str = format!("m/{}", index);
    let path: DerivationPath = path_str
        .parse()
        .map_err(|e: bitcoin::bip32::Error| CryptoError::DerivationFailed(e.to_string()))?;

    let derived = master
        .derive_priv(&secp, &path)
        .map_err(|e| CryptoError::DerivationFailed(e.to_string()))?;

    let sk = derived.private_key;
    let pk = sk.public_key(&secp);
    Ok((sk, pk))
}
