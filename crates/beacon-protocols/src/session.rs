//! MuSig2 signing sessions.
//!
//! One session is a single 2-round MuSig2 run over a fixed cohort and a
//! fixed transaction. The coordinator's copy aggregates nonces and partial
//! signatures; a participant's copy holds its secret nonces and tracks the
//! aggregate it received. Status only moves forward (or to FAILED).
//!
//! Duplicate and late contributions are rejected without advancing or
//! aborting the session: the first accepted value is kept. Final signature
//! verification failure is terminal — retrying with the same nonces would
//! leak key material.

use std::collections::BTreeMap;
use std::fmt;

use bitcoin::Transaction;
use musig2::{AggNonce, PartialSignature, PubNonce, SecNonce};
use uuid::Uuid;

use beacon_crypto::musig::{aggregate_nonces, aggregate_signatures, verify_signature};
use beacon_crypto::{output_key, signing_context};

use crate::cohort::Cohort;
use crate::signal::{funding_utxo, key_spend_sighash, finalize_key_spend, BEACON_INPUT_INDEX};
use crate::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    AwaitingNonceContributions,
    NonceContributionsReceived,
    AwaitingPartialSignatures,
    PartialSignaturesReceived,
    SignatureComplete,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::AwaitingNonceContributions => "AWAITING_NONCE_CONTRIBUTIONS",
            SessionStatus::NonceContributionsReceived => "NONCE_CONTRIBUTIONS_RECEIVED",
            SessionStatus::AwaitingPartialSignatures => "AWAITING_PARTIAL_SIGNATURES",
            SessionStatus::PartialSignaturesReceived => "PARTIAL_SIGNATURES_RECEIVED",
            SessionStatus::SignatureComplete => "SIGNATURE_COMPLETE",
            SessionStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

pub struct SigningSession {
    pub id: Uuid,
    pub cohort_id: Uuid,
    pending_tx: Transaction,
    status: SessionStatus,
    /// Our own secret nonce pair. Participant-local; never leaves the
    /// process and is consumed by the one partial signature it covers.
    nonce_secrets: Option<SecNonce>,
    nonce_contributions: BTreeMap<String, PubNonce>,
    aggregated_nonce: Option<AggNonce>,
    partial_signatures: BTreeMap<String, PartialSignature>,
    /// Signature requests satisfied by this session.
    processed_requests: BTreeMap<String, Vec<u8>>,
    signature: Option<[u8; 64]>,
}

impl SigningSession {
    /// Coordinator-side constructor.
    pub fn new(
        cohort_id: Uuid,
        pending_tx: Transaction,
        processed_requests: BTreeMap<String, Vec<u8>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            cohort_id,
            pending_tx,
            status: SessionStatus::AwaitingNonceContributions,
            nonce_secrets: None,
            nonce_contributions: BTreeMap::new(),
            aggregated_nonce: None,
            partial_signatures: BTreeMap::new(),
            processed_requests,
            signature: None,
        }
    }

    /// Participant-side constructor from an authorization request.
    pub fn from_request(id: Uuid, cohort_id: Uuid, pending_tx: Transaction) -> Self {
        Self {
            id,
            ..Self::new(cohort_id, pending_tx, BTreeMap::new())
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn pending_tx(&self) -> &Transaction {
        &self.pending_tx
    }

    pub fn nonce_contribution_count(&self) -> usize {
        self.nonce_contributions.len()
    }

    pub fn partial_signature_count(&self) -> usize {
        self.partial_signatures.len()
    }

    pub fn processed_requests(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.processed_requests
    }

    /// The final 64-byte signature, present once SIGNATURE_COMPLETE.
    pub fn signature(&self) -> Option<&[u8; 64]> {
        self.signature.as_ref()
    }

    pub fn set_nonce_secrets(&mut self, secnonce: SecNonce) {
        self.nonce_secrets = Some(secnonce);
    }

    /// Take our secret nonces for signing; they can be taken only once.
    pub fn take_nonce_secrets(&mut self) -> Option<SecNonce> {
        self.nonce_secrets.take()
    }

    /// Record one participant's public nonce pair.
    ///
    /// Returns `Ok(true)` once every expected participant has contributed
    /// (the session then moves to NONCE_CONTRIBUTIONS_RECEIVED).
    pub fn add_nonce_contribution(
        &mut self,
        from: &str,
        nonce: PubNonce,
        expected: usize,
    ) -> Result<bool, ProtocolError> {
        if self.status != SessionStatus::AwaitingNonceContributions {
            return Err(ProtocolError::BadState(format!(
                "session {} not collecting nonces (status {})",
                self.id, self.status
            )));
        }
        if self.nonce_contributions.contains_key(from) {
            return Err(ProtocolError::Duplicate(from.to_string()));
        }

        self.nonce_contributions.insert(from.to_string(), nonce);

        if self.nonce_contributions.len() == expected {
            self.status = SessionStatus::NonceContributionsReceived;
            return Ok(true);
        }
        Ok(false)
    }

    /// Sum the collected nonce pairs. Called exactly once, after which the
    /// session awaits partial signatures.
    pub fn aggregate_nonces(&mut self) -> Result<AggNonce, ProtocolError> {
        if self.status != SessionStatus::NonceContributionsReceived {
            return Err(ProtocolError::BadState(format!(
                "session {} has {} contribution(s), not ready to aggregate (status {})",
                self.id,
                self.nonce_contributions.len(),
                self.status
            )));
        }

        let pubnonces: Vec<PubNonce> = self.nonce_contributions.values().cloned().collect();
        let aggregated = aggregate_nonces(&pubnonces);
        self.aggregated_nonce = Some(aggregated.clone());
        self.status = SessionStatus::AwaitingPartialSignatures;
        Ok(aggregated)
    }

    /// Participant-side: adopt the coordinator's aggregate. Accepted once.
    pub fn set_aggregated_nonce(&mut self, aggregated: AggNonce) -> Result<(), ProtocolError> {
        if self.aggregated_nonce.is_some() {
            return Err(ProtocolError::BadState(format!(
                "session {} already has an aggregated nonce",
                self.id
            )));
        }
        self.aggregated_nonce = Some(aggregated);
        self.status = SessionStatus::AwaitingPartialSignatures;
        Ok(())
    }

    pub fn aggregated_nonce(&self) -> Option<&AggNonce> {
        self.aggregated_nonce.as_ref()
    }

    /// Record one participant's partial signature.
    ///
    /// Returns `Ok(true)` once every expected participant has signed.
    pub fn add_partial_signature(
        &mut self,
        from: &str,
        partial: PartialSignature,
        expected: usize,
    ) -> Result<bool, ProtocolError> {
        if self.status != SessionStatus::AwaitingPartialSignatures {
            return Err(ProtocolError::BadState(format!(
                "session {} not collecting partial signatures (status {})",
                self.id, self.status
            )));
        }
        if self.partial_signatures.contains_key(from) {
            return Err(ProtocolError::Duplicate(from.to_string()));
        }

        self.partial_signatures.insert(from.to_string(), partial);

        if self.partial_signatures.len() == expected {
            self.status = SessionStatus::PartialSignaturesReceived;
            return Ok(true);
        }
        Ok(false)
    }

    /// The message every signer commits to: the `SIGHASH_DEFAULT` key-spend
    /// sighash of the pending transaction against the beacon prevout.
    pub fn sighash(&self, cohort: &Cohort) -> Result<[u8; 32], ProtocolError> {
        let beacon = cohort.beacon().ok_or_else(|| {
            ProtocolError::BadState(format!("cohort {} has no beacon", cohort.id))
        })?;
        let (_, prevout) = funding_utxo(beacon.address.script_pubkey())?;
        key_spend_sighash(&self.pending_tx, &prevout, BEACON_INPUT_INDEX)
    }

    /// Assemble and verify the final signature, then finalize the witness.
    ///
    /// Verification failure is terminal: the session moves to FAILED and no
    /// signature is exposed.
    pub fn finalize_signature(&mut self, cohort: &Cohort) -> Result<[u8; 64], ProtocolError> {
        if self.status != SessionStatus::PartialSignaturesReceived {
            return Err(ProtocolError::BadState(format!(
                "session {} has {} partial signature(s), not ready to finalize (status {})",
                self.id,
                self.partial_signatures.len(),
                self.status
            )));
        }

        match self.finalize_inner(cohort) {
            Ok(signature) => {
                self.signature = Some(signature);
                self.status = SessionStatus::SignatureComplete;
                Ok(signature)
            }
            Err(e) => {
                self.status = SessionStatus::Failed;
                Err(e)
            }
        }
    }

    fn finalize_inner(&mut self, cohort: &Cohort) -> Result<[u8; 64], ProtocolError> {
        let beacon = cohort.beacon().ok_or_else(|| {
            ProtocolError::Validation(format!("cohort {} has no beacon", cohort.id))
        })?;
        let aggregated = self.aggregated_nonce.as_ref().ok_or_else(|| {
            ProtocolError::Validation(format!("session {} has no aggregated nonce", self.id))
        })?;

        let sighash = {
            let (_, prevout) = funding_utxo(beacon.address.script_pubkey())?;
            key_spend_sighash(&self.pending_tx, &prevout, BEACON_INPUT_INDEX)?
        };

        let ctx = signing_context(cohort.cohort_keys(), beacon.merkle_root_bytes())
            .map_err(|e| ProtocolError::Validation(e.to_string()))?;

        let partials: Vec<PartialSignature> = self.partial_signatures.values().copied().collect();
        let signature = aggregate_signatures(&ctx, aggregated, &partials, &sighash)
            .map_err(|e| ProtocolError::Validation(e.to_string()))?;

        let tweaked = output_key(cohort.cohort_keys(), beacon.merkle_root_bytes())
            .map_err(|e| ProtocolError::Validation(e.to_string()))?;
        if !verify_signature(&tweaked, &signature, &sighash) {
            return Err(ProtocolError::Validation(format!(
                "session {} final signature failed BIP-340 verification",
                self.id
            )));
        }

        finalize_key_spend(&mut self.pending_tx, BEACON_INPUT_INDEX, &signature)?;
        Ok(signature)
    }

    /// Force the session into its terminal failure state.
    pub fn fail(&mut self) {
        self.status = SessionStatus::Failed;
    }
}
