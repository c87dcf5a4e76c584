//! BIP-39 seed handling for participant root keys.

use bip39::{Language, Mnemonic};
use zeroize::Zeroizing;

use crate::CryptoError;

/// Generate a new BIP-39 mnemonic (24 words).
pub fn generate_mnemonic() -> Result<Mnemonic, CryptoError> {
    Mnemonic::generate_in(Language::English, 24)
        .map_err(|e| CryptoError::InvalidMnemonic(e.to_string()))
}

/// Parse a mnemonic from words.
pub fn parse_mnemonic(words: &str) -> Result<Mnemonic, CryptoError> {
    Mnemonic::parse_in(Language::English, words)
        .map_err(|e| CryptoError::InvalidMnemonic(e.to_string()))
}

/// Derive the 64-byte seed from a mnemonic (with optional passphrase).
///
/// Wrapped in [`Zeroizing`] so the bytes are wiped when dropped.
pub fn derive_seed(mnemonic: &Mnemonic, passphrase: &str) -> Zeroizing<[u8; 64]> {
    Zeroizing::new(mnemonic.to_seed(passphrase))
}
