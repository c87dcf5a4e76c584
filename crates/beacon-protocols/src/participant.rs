//! Participant role.
//!
//! A participant trusts the coordinators it subscribed to, keeps a local
//! shadow of every cohort it joined, and holds the only copies of its
//! signing keys and nonce secrets. It validates the coordinator's
//! `COHORT_SET` claim by re-deriving the beacon address itself, and signs
//! exactly once per session.

use std::collections::HashMap;
use std::sync::Arc;

use bitcoin::bip32::Xpriv;
use bitcoin::secp256k1::{PublicKey, SecretKey};
use log::{error, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use beacon_crypto::musig::{
    aggnonce_from_hex_pair, partial_sig_to_hex, point_to_hex, pubnonce_to_hex_pair,
};
use beacon_crypto::{derive_cohort_key, generate_nonce, network_from_name, partial_sign,
    signing_context};

use crate::cohort::{Cohort, CohortStatus};
use crate::messages::{Envelope, Payload};
use crate::session::SigningSession;
use crate::transport::MessageSender;
use crate::ProtocolError;

/// A participant's key state within one cohort.
#[derive(Debug, Clone, Copy)]
struct CohortKeyState {
    /// HD child index of the key this cohort uses.
    key_index: u32,
}

pub struct BeaconParticipant {
    did: String,
    sender: Arc<dyn MessageSender>,
    /// BIP-86 account key; cohort keys are non-hardened children.
    account_xpriv: Xpriv,
    next_key_index: u32,
    coordinator_dids: Vec<String>,
    cohorts: HashMap<Uuid, Cohort>,
    key_state: HashMap<Uuid, CohortKeyState>,
    sessions: HashMap<Uuid, SigningSession>,
    /// Payloads we asked to be signed, per cohort.
    sent_requests: HashMap<Uuid, Vec<Vec<u8>>>,
}

impl BeaconParticipant {
    pub fn new(did: &str, account_xpriv: Xpriv, sender: Arc<dyn MessageSender>) -> Self {
        Self {
            did: did.to_string(),
            sender,
            account_xpriv,
            next_key_index: 0,
            coordinator_dids: Vec::new(),
            cohorts: HashMap::new(),
            key_state: HashMap::new(),
            sessions: HashMap::new(),
            sent_requests: HashMap::new(),
        }
    }

    pub fn did(&self) -> &str {
        &self.did
    }

    pub fn coordinator_dids(&self) -> &[String] {
        &self.coordinator_dids
    }

    pub fn cohort(&self, id: Uuid) -> Option<&Cohort> {
        self.cohorts.get(&id)
    }

    pub fn session(&self, id: Uuid) -> Option<&SigningSession> {
        self.sessions.get(&id)
    }

    /// Payloads this participant asked the coordinator to sign for a cohort.
    pub fn sent_requests(&self, cohort_id: Uuid) -> &[Vec<u8>] {
        self.sent_requests
            .get(&cohort_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The key pair this participant uses in the given cohort.
    fn cohort_keypair(&self, cohort_id: Uuid) -> Result<(SecretKey, PublicKey), ProtocolError> {
        let state = self.key_state.get(&cohort_id).ok_or_else(|| {
            ProtocolError::BadState(format!("no key state for cohort {}", cohort_id))
        })?;
        Ok(derive_cohort_key(&self.account_xpriv, state.key_index)?)
    }

    /// Our public key within the given cohort.
    pub fn cohort_pubkey(&self, cohort_id: Uuid) -> Result<PublicKey, ProtocolError> {
        Ok(self.cohort_keypair(cohort_id)?.1)
    }

    // ─── Event loop ─────────────────────────────────────────────────────

    /// Serve the inbox until it closes.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<String>) {
        while let Some(raw) = inbox.recv().await {
            self.handle_raw(&raw).await;
        }
    }

    /// Handle every message currently queued; returns how many were taken.
    pub async fn process_pending(&mut self, inbox: &mut mpsc::Receiver<String>) -> usize {
        let mut handled = 0;
        while let Ok(raw) = inbox.try_recv() {
            self.handle_raw(&raw).await;
            handled += 1;
        }
        handled
    }

    pub async fn handle_raw(&mut self, raw: &str) {
        match Envelope::decode(raw) {
            Ok(envelope) => self.handle_message(envelope).await,
            Err(e) => warn!("{}: dropping undecodable message: {}", self.did, e),
        }
    }

    /// Dispatch one envelope. Protocol rejections are logged and dropped;
    /// a failed cohort validation additionally marks the shadow FAILED.
    pub async fn handle_message(&mut self, envelope: Envelope) {
        let kind = envelope.payload.type_uri();
        let from = envelope.from.clone();

        let result = match envelope.payload.clone() {
            Payload::SubscribeAccept {} => self.on_subscribe_accept(&from),
            Payload::CohortAdvert {
                cohort_id,
                btc_network,
                ..
            } => self.on_cohort_advert(&envelope, cohort_id, &btc_network).await,
            Payload::CohortSet {
                cohort_id,
                beacon_address,
                cohort_keys,
            } => self.on_cohort_set(&from, cohort_id, &cohort_keys, &beacon_address),
            Payload::AuthorizationRequest {
                session_id,
                cohort_id,
                pending_tx,
            } => {
                self.on_authorization_request(&from, session_id, cohort_id, &pending_tx)
                    .await
            }
            Payload::AggregatedNonce {
                session_id,
                cohort_id,
                aggregated_nonce,
            } => {
                self.on_aggregated_nonce(&from, session_id, cohort_id, &aggregated_nonce)
                    .await
            }
            other => Err(ProtocolError::BadState(format!(
                "participant does not handle {}",
                other.type_uri()
            ))),
        };

        if let Err(e) = result {
            match e {
                ProtocolError::Validation(_) => {
                    error!("{}: {} from {}: {}", self.did, kind, from, e)
                }
                _ => warn!("{}: dropping {} from {}: {}", self.did, kind, from, e),
            }
        }
    }

    // ─── KeyGen ─────────────────────────────────────────────────────────

    /// Ask a coordinator for cohort announcements. Idempotent; the
    /// coordinator is trusted only once it acknowledges.
    pub async fn subscribe_to_coordinator(&self, coordinator_did: &str) -> Result<(), ProtocolError> {
        let msg = Envelope::new(&self.did, coordinator_did, Payload::Subscribe {});
        self.sender.send(msg).await
    }

    fn on_subscribe_accept(&mut self, from: &str) -> Result<(), ProtocolError> {
        if !self.coordinator_dids.iter().any(|c| c == from) {
            self.coordinator_dids.push(from.to_string());
            info!("{}: subscribed to coordinator {}", self.did, from);
        }
        Ok(())
    }

    async fn on_cohort_advert(
        &mut self,
        envelope: &Envelope,
        cohort_id: Uuid,
        btc_network: &str,
    ) -> Result<(), ProtocolError> {
        let from = &envelope.from;
        if !self.coordinator_dids.iter().any(|c| c == from) {
            return Err(ProtocolError::Auth(format!(
                "unsolicited cohort advert from {}",
                from
            )));
        }

        let network = network_from_name(btc_network)?;
        self.cohorts
            .entry(cohort_id)
            .or_insert_with(|| Cohort::advertised(cohort_id, from, network));

        // Join automatically with a fresh per-cohort key.
        self.join_cohort(envelope, cohort_id).await
    }

    async fn join_cohort(&mut self, advert: &Envelope, cohort_id: Uuid) -> Result<(), ProtocolError> {
        if self.key_state.contains_key(&cohort_id) {
            // Replayed advert; we already opted in.
            return Ok(());
        }

        let key_index = self.next_key_index;
        let (_sk, pk) = derive_cohort_key(&self.account_xpriv, key_index)?;
        self.next_key_index += 1;
        self.key_state.insert(cohort_id, CohortKeyState { key_index });

        info!(
            "{}: opting into cohort {} with key index {}",
            self.did, cohort_id, key_index
        );

        let opt_in = Envelope::reply_to(
            advert,
            &self.did,
            Payload::OptIn {
                cohort_id,
                participant_pk: point_to_hex(&pk),
            },
        );
        self.sender.send(opt_in).await?;

        if let Some(cohort) = self.cohorts.get_mut(&cohort_id) {
            cohort.mark_opted_in();
        }
        Ok(())
    }

    fn on_cohort_set(
        &mut self,
        from: &str,
        cohort_id: Uuid,
        cohort_keys: &[String],
        beacon_address: &str,
    ) -> Result<(), ProtocolError> {
        let own_pk = self.cohort_pubkey(cohort_id)?;
        let cohort = self
            .cohorts
            .get_mut(&cohort_id)
            .ok_or(ProtocolError::UnknownCohort(cohort_id))?;
        if cohort.coordinator_did != from {
            return Err(ProtocolError::Auth(format!(
                "cohort set for {} from {}, expected coordinator {}",
                cohort_id, from, cohort.coordinator_did
            )));
        }

        cohort.validate(&own_pk, cohort_keys, beacon_address)?;
        info!(
            "{}: validated cohort {} with beacon address {}",
            self.did, cohort_id, beacon_address
        );
        Ok(())
    }

    // ─── Sign ───────────────────────────────────────────────────────────

    /// Ask the cohort's coordinator for a signature over `data`.
    ///
    /// Returns `Ok(true)` iff the cohort is set and the request was sent.
    pub async fn request_cohort_signature(
        &mut self,
        cohort_id: Uuid,
        data: &str,
    ) -> Result<bool, ProtocolError> {
        let cohort = self
            .cohorts
            .get(&cohort_id)
            .ok_or(ProtocolError::UnknownCohort(cohort_id))?;
        if cohort.status() != CohortStatus::CohortSet {
            warn!(
                "{}: cohort {} not set (status {}), not requesting signature",
                self.did,
                cohort_id,
                cohort.status()
            );
            return Ok(false);
        }

        let msg = Envelope::new(
            &self.did,
            &cohort.coordinator_did,
            Payload::RequestSignature {
                cohort_id,
                data: data.to_string(),
            },
        );
        self.sender.send(msg).await?;

        self.sent_requests
            .entry(cohort_id)
            .or_default()
            .push(data.as_bytes().to_vec());
        Ok(true)
    }

    async fn on_authorization_request(
        &mut self,
        from: &str,
        session_id: Uuid,
        cohort_id: Uuid,
        pending_tx: &str,
    ) -> Result<(), ProtocolError> {
        let (pubnonce, coordinator_did) = {
            let (sk, _pk) = self.cohort_keypair(cohort_id)?;
            let cohort = self
                .cohorts
                .get(&cohort_id)
                .ok_or(ProtocolError::UnknownCohort(cohort_id))?;
            if cohort.coordinator_did != from {
                return Err(ProtocolError::Auth(format!(
                    "authorization request for {} from {}, expected coordinator {}",
                    cohort_id, from, cohort.coordinator_did
                )));
            }
            let beacon = cohort.beacon().ok_or_else(|| {
                ProtocolError::BadState(format!(
                    "cohort {} not validated, refusing to sign",
                    cohort_id
                ))
            })?;

            let tx_bytes = hex::decode(pending_tx)
                .map_err(|e| ProtocolError::Decode(format!("pending_tx hex: {}", e)))?;
            let pending_tx: bitcoin::Transaction = bitcoin::consensus::deserialize(&tx_bytes)
                .map_err(|e| ProtocolError::Decode(format!("pending_tx: {}", e)))?;

            let mut session = SigningSession::from_request(session_id, cohort_id, pending_tx);
            let sighash = session.sighash(cohort)?;

            let ctx = signing_context(cohort.cohort_keys(), beacon.merkle_root_bytes())?;
            let (secnonce, pubnonce) = generate_nonce(&sk, &ctx, Some(&sighash))?;
            session.set_nonce_secrets(secnonce);

            let coordinator_did = cohort.coordinator_did.clone();
            self.sessions.insert(session_id, session);
            (pubnonce, coordinator_did)
        };

        info!(
            "{}: authorized session {} for cohort {}, sending nonce contribution",
            self.did, session_id, cohort_id
        );

        let msg = Envelope::new(
            &self.did,
            &coordinator_did,
            Payload::NonceContribution {
                session_id,
                cohort_id,
                nonce_contribution: pubnonce_to_hex_pair(&pubnonce),
            },
        );
        self.sender.send(msg).await
    }

    async fn on_aggregated_nonce(
        &mut self,
        from: &str,
        session_id: Uuid,
        cohort_id: Uuid,
        pair: &[String; 2],
    ) -> Result<(), ProtocolError> {
        let (partial_hex, coordinator_did) = {
            let (sk, _pk) = self.cohort_keypair(cohort_id)?;
            let session = self
                .sessions
                .get_mut(&session_id)
                .ok_or(ProtocolError::UnknownSession(session_id))?;
            if session.cohort_id != cohort_id {
                return Err(ProtocolError::BadState(format!(
                    "aggregated nonce names cohort {} but session {} belongs to {}",
                    cohort_id, session_id, session.cohort_id
                )));
            }
            let cohort = self
                .cohorts
                .get(&cohort_id)
                .ok_or(ProtocolError::UnknownCohort(cohort_id))?;
            if cohort.coordinator_did != from {
                return Err(ProtocolError::Auth(format!(
                    "aggregated nonce for session {} from {}, expected coordinator {}",
                    session_id, from, cohort.coordinator_did
                )));
            }
            let beacon = cohort.beacon().ok_or_else(|| {
                ProtocolError::BadState(format!("cohort {} has no beacon", cohort_id))
            })?;

            let aggregated = aggnonce_from_hex_pair(pair)?;
            session.set_aggregated_nonce(aggregated.clone())?;

            let secnonce = session.take_nonce_secrets().ok_or_else(|| {
                ProtocolError::BadState(format!(
                    "nonce secrets for session {} already consumed",
                    session_id
                ))
            })?;

            let sighash = session.sighash(cohort)?;
            let ctx = signing_context(cohort.cohort_keys(), beacon.merkle_root_bytes())?;

            let partial = partial_sign(&sk, secnonce, &ctx, &aggregated, &sighash)?;
            (partial_sig_to_hex(&partial), cohort.coordinator_did.clone())
        };

        info!(
            "{}: signed session {}, sending partial signature",
            self.did, session_id
        );

        let msg = Envelope::new(
            &self.did,
            &coordinator_did,
            Payload::SignatureAuthorization {
                session_id,
                cohort_id,
                partial_signature: partial_hex,
            },
        );
        self.sender.send(msg).await
    }
}
