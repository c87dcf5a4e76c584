//! MuSig2 (BIP-327) operations over an ordered cohort of keys.
//!
//! Bridges between our secp256k1 0.29 types and the musig2 crate's types
//! via byte serialization. Both use libsecp256k1 underneath.
//!
//! Aggregation is ordering-dependent: the key list handed to
//! [`key_agg_context`] must be the cohort key sequence exactly as fixed at
//! finalization, or the aggregate (and thus the beacon address) diverges.

use bitcoin::key::XOnlyPublicKey;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use musig2::{AggNonce, KeyAggContext, LiftedSignature, PartialSignature, PubNonce, SecNonce};

use crate::CryptoError;

/// Convert our secp256k1 0.29 PublicKey to musig2's secp256k1 PublicKey.
fn pubkey_to_musig(pk: &PublicKey) -> Result<musig2::secp256k1::PublicKey, CryptoError> {
    musig2::secp256k1::PublicKey::from_slice(&pk.serialize())
        .map_err(|e| CryptoError::InvalidPoint(format!("pubkey conversion: {}", e)))
}

/// Convert our secp256k1 0.29 SecretKey to musig2's secp256k1 SecretKey.
fn seckey_to_musig(sk: &SecretKey) -> Result<musig2::secp256k1::SecretKey, CryptoError> {
    musig2::secp256k1::SecretKey::from_slice(&sk.secret_bytes())
        .map_err(|e| CryptoError::SigningError(format!("seckey conversion: {}", e)))
}

// ─── Key aggregation ────────────────────────────────────────────────────────

/// Aggregate an ordered key list with BIP-327 key aggregation.
///
/// KeyAgg coefficients prevent rogue-key attacks; the result depends on the
/// order of `cohort_keys`.
pub fn key_agg_context(cohort_keys: &[PublicKey]) -> Result<KeyAggContext, CryptoError> {
    let keys: Vec<musig2::secp256k1::PublicKey> = cohort_keys
        .iter()
        .map(pubkey_to_musig)
        .collect::<Result<_, _>>()?;

    KeyAggContext::new(keys).map_err(|e| CryptoError::KeyAggregation(format!("key agg: {}", e)))
}

/// Key aggregation context tweaked for spending the beacon output.
///
/// Applies the BIP-341 tweak `t = H("TapTweak" || P || merkle_root)` so that
/// partial signatures aggregate into a signature for the on-chain output key
/// `Q = P + t*G`.
pub fn signing_context(
    cohort_keys: &[PublicKey],
    merkle_root: [u8; 32],
) -> Result<KeyAggContext, CryptoError> {
    key_agg_context(cohort_keys)?
        .with_taproot_tweak(&merkle_root)
        .map_err(|e| CryptoError::KeyAggregation(format!("taproot tweak: {}", e)))
}

/// The x-only aggregate of a context (tweaked or not).
pub fn aggregated_xonly(ctx: &KeyAggContext) -> Result<XOnlyPublicKey, CryptoError> {
    let agg_pk: musig2::secp256k1::PublicKey = ctx.aggregated_pubkey();
    let (xonly, _parity) = agg_pk.x_only_public_key();
    XOnlyPublicKey::from_slice(&xonly.serialize())
        .map_err(|e| CryptoError::InvalidPoint(format!("xonly conversion: {}", e)))
}

// ─── Nonce generation ───────────────────────────────────────────────────────

/// Generate a nonce pair (secret + public) for one signing session.
///
/// CRITICAL: the returned SecNonce MUST be used exactly once and then
/// dropped. Reusing a SecNonce across different messages reveals the
/// private key.
pub fn generate_nonce(
    seckey: &SecretKey,
    key_agg_ctx: &KeyAggContext,
    message: Option<&[u8]>,
) -> Result<(SecNonce, PubNonce), CryptoError> {
    let sk_m = seckey_to_musig(seckey)?;
    let agg_pk: musig2::secp256k1::PublicKey = key_agg_ctx.aggregated_pubkey();

    let mut nonce_seed = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut nonce_seed);

    let mut builder = SecNonce::build(nonce_seed)
        .with_seckey(sk_m)
        .with_aggregated_pubkey(agg_pk);

    if let Some(msg) = message.as_ref() {
        builder = builder.with_message(msg);
    }

    let secnonce = builder.build();
    let pubnonce = secnonce.public_nonce();

    Ok((secnonce, pubnonce))
}

/// Sum public nonce pairs componentwise into the session aggregate.
pub fn aggregate_nonces(pubnonces: &[PubNonce]) -> AggNonce {
    AggNonce::sum(pubnonces)
}

// ─── Partial signatures ─────────────────────────────────────────────────────

/// Produce a partial signature for a session.
///
/// The SecNonce is consumed (moved) to prevent reuse.
pub fn partial_sign(
    seckey: &SecretKey,
    secnonce: SecNonce,
    key_agg_ctx: &KeyAggContext,
    agg_nonce: &AggNonce,
    message: &[u8; 32],
) -> Result<PartialSignature, CryptoError> {
    let sk_m = seckey_to_musig(seckey)?;

    musig2::sign_partial(key_agg_ctx, sk_m, secnonce, agg_nonce, message)
        .map_err(|e| CryptoError::SigningError(format!("partial sign: {}", e)))
}

/// Verify a partial signature from a specific signer.
pub fn verify_partial(
    key_agg_ctx: &KeyAggContext,
    partial_sig: &PartialSignature,
    agg_nonce: &AggNonce,
    signer_pubkey: &PublicKey,
    signer_pubnonce: &PubNonce,
    message: &[u8; 32],
) -> bool {
    let pk_m = match pubkey_to_musig(signer_pubkey) {
        Ok(pk) => pk,
        Err(_) => return false,
    };

    musig2::verify_partial(
        key_agg_ctx,
        *partial_sig,
        agg_nonce,
        pk_m,
        signer_pubnonce,
        message,
    )
    .is_ok()
}

/// Aggregate partial signatures into the final Schnorr signature.
///
/// Sums the partials mod n and folds in the tweak term; the result is a
/// standard 64-byte BIP-340 signature valid under the tweaked aggregate key.
pub fn aggregate_signatures(
    key_agg_ctx: &KeyAggContext,
    agg_nonce: &AggNonce,
    partial_sigs: &[PartialSignature],
    message: &[u8; 32],
) -> Result<[u8; 64], CryptoError> {
    let sig: LiftedSignature = musig2::aggregate_partial_signatures(
        key_agg_ctx,
        agg_nonce,
        partial_sigs.iter().copied(),
        message,
    )
    .map_err(|e| CryptoError::SigningError(format!("sig aggregation: {}", e)))?;

    Ok(sig.serialize())
}

/// Verify a final signature against an x-only key (BIP-340).
pub fn verify_signature(pubkey: &XOnlyPublicKey, signature: &[u8; 64], message: &[u8; 32]) -> bool {
    let secp = Secp256k1::verification_only();
    let sig = match bitcoin::secp256k1::schnorr::Signature::from_slice(signature) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let msg = Message::from_digest(*message);

    secp.verify_schnorr(&sig, &msg, pubkey).is_ok()
}

// ─── Wire encoding ──────────────────────────────────────────────────────────
//
// Nonces travel as a pair of 33-byte compressed points, each lowercase hex;
// partial signatures as a 32-byte scalar, lowercase hex.

/// Split a public nonce into its wire pair `(R1, R2)`.
pub fn pubnonce_to_hex_pair(pubnonce: &PubNonce) -> [String; 2] {
    let bytes = pubnonce.serialize();
    [hex::encode(&bytes[..33]), hex::encode(&bytes[33..])]
}

/// Parse a wire pair back into a public nonce.
pub fn pubnonce_from_hex_pair(pair: &[String; 2]) -> Result<PubNonce, CryptoError> {
    PubNonce::from_bytes(&decode_point_pair(pair)?)
        .map_err(|e| CryptoError::InvalidNonce(format!("invalid pubnonce: {}", e)))
}

/// Split an aggregated nonce into its wire pair.
pub fn aggnonce_to_hex_pair(agg_nonce: &AggNonce) -> [String; 2] {
    let bytes = agg_nonce.serialize();
    [hex::encode(&bytes[..33]), hex::encode(&bytes[33..])]
}

/// Parse a wire pair back into an aggregated nonce.
pub fn aggnonce_from_hex_pair(pair: &[String; 2]) -> Result<AggNonce, CryptoError> {
    AggNonce::from_bytes(&decode_point_pair(pair)?)
        .map_err(|e| CryptoError::InvalidNonce(format!("invalid aggregated nonce: {}", e)))
}

fn decode_point_pair(pair: &[String; 2]) -> Result<[u8; 66], CryptoError> {
    let mut buf = [0u8; 66];
    for (i, encoded) in pair.iter().enumerate() {
        let bytes = hex::decode(encoded)
            .map_err(|e| CryptoError::InvalidNonce(format!("invalid nonce hex: {}", e)))?;
        if bytes.len() != 33 {
            return Err(CryptoError::InvalidNonce(format!(
                "nonce point must be 33 bytes, got {}",
                bytes.len()
            )));
        }
        buf[i * 33..(i + 1) * 33].copy_from_slice(&bytes);
    }
    Ok(buf)
}

/// Encode a partial signature as 32-byte lowercase hex.
pub fn partial_sig_to_hex(sig: &PartialSignature) -> String {
    hex::encode(sig.serialize())
}

/// Parse a partial signature from 32-byte hex.
pub fn partial_sig_from_hex(encoded: &str) -> Result<PartialSignature, CryptoError> {
    let bytes = hex::decode(encoded)
        .map_err(|e| CryptoError::InvalidScalar(format!("invalid scalar hex: {}", e)))?;
    if bytes.len() != 32 {
        return Err(CryptoError::InvalidScalar(format!(
            "partial signature must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    PartialSignature::from_slice(&bytes)
        .map_err(|e| CryptoError::InvalidScalar(format!("invalid partial sig: {}", e)))
}

/// Parse a 33-byte compressed point from lowercase hex.
pub fn point_from_hex(encoded: &str) -> Result<PublicKey, CryptoError> {
    let bytes = hex::decode(encoded)
        .map_err(|e| CryptoError::InvalidPoint(format!("invalid point hex: {}", e)))?;
    PublicKey::from_slice(&bytes)
        .map_err(|e| CryptoError::InvalidPoint(format!("invalid point: {}", e)))
}

/// Encode a point as 33-byte compressed lowercase hex.
pub fn point_to_hex(point: &PublicKey) -> String {
    hex::encode(point.serialize())
}
