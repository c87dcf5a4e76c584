//! Coordinator role.
//!
//! The coordinator owns the authoritative cohorts and signing sessions: it
//! accepts subscriptions, advertises cohorts, fixes the key order from
//! opt-in arrivals, and sequences both MuSig2 rounds. It holds no signing
//! keys of its own — every cryptographic claim it makes is independently
//! re-derived by the participants.
//!
//! Handlers run one message at a time; rejected messages are logged and
//! dropped without advancing any state machine.

use std::collections::HashMap;
use std::sync::Arc;

use bitcoin::Network;
use log::{error, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use beacon_crypto::musig::{
    aggnonce_to_hex_pair, partial_sig_from_hex, point_from_hex, point_to_hex,
    pubnonce_from_hex_pair,
};
use beacon_crypto::network_name;

use crate::cohort::{Cohort, CohortStatus};
use crate::messages::{Envelope, Payload, SMT_AGGREGATE_BEACON};
use crate::session::SigningSession;
use crate::signal::{build_beacon_signal, random_smt_root, SmtRootFn};
use crate::transport::MessageSender;
use crate::ProtocolError;

pub struct BeaconCoordinator {
    did: String,
    sender: Arc<dyn MessageSender>,
    subscribers: Vec<String>,
    cohorts: HashMap<Uuid, Cohort>,
    sessions: HashMap<Uuid, SigningSession>,
    smt_root_fn: SmtRootFn,
}

impl BeaconCoordinator {
    pub fn new(did: &str, sender: Arc<dyn MessageSender>) -> Self {
        Self {
            did: did.to_string(),
            sender,
            subscribers: Vec::new(),
            cohorts: HashMap::new(),
            sessions: HashMap::new(),
            smt_root_fn: random_smt_root,
        }
    }

    /// Override how the SMT root of a beacon signal is derived from the
    /// pending signature requests.
    pub fn with_smt_root_fn(mut self, f: SmtRootFn) -> Self {
        self.smt_root_fn = f;
        self
    }

    pub fn did(&self) -> &str {
        &self.did
    }

    pub fn subscribers(&self) -> &[String] {
        &self.subscribers
    }

    pub fn cohort(&self, id: Uuid) -> Option<&Cohort> {
        self.cohorts.get(&id)
    }

    pub fn session(&self, id: Uuid) -> Option<&SigningSession> {
        self.sessions.get(&id)
    }

    /// Remove a finished (complete or failed) session, handing it to the
    /// caller.
    pub fn take_session(&mut self, id: Uuid) -> Option<SigningSession> {
        self.sessions.remove(&id)
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

    /// Decode one wire message and dispatch it.
    pub async fn handle_raw(&mut self, raw: &str) {
        match Envelope::decode(raw) {
            Ok(envelope) => self.handle_message(envelope).await,
            Err(e) => warn!("{}: dropping undecodable message: {}", self.did, e),
        }
    }

    /// Dispatch one envelope. Protocol rejections are logged and dropped.
    pub async fn handle_message(&mut self, envelope: Envelope) {
        let kind = envelope.payload.type_uri();
        let from = envelope.from.clone();

        let result = match envelope.payload.clone() {
            Payload::Subscribe {} => self.on_subscribe(&envelope).await,
            Payload::OptIn {
                cohort_id,
                participant_pk,
            } => self.on_opt_in(&from, cohort_id, &participant_pk).await,
            Payload::RequestSignature { cohort_id, data } => {
                self.on_request_signature(&from, cohort_id, data)
            }
            Payload::NonceContribution {
                session_id,
                cohort_id,
                nonce_contribution,
            } => {
                self.on_nonce_contribution(&from, session_id, cohort_id, &nonce_contribution)
                    .await
            }
            Payload::SignatureAuthorization {
                session_id,
                cohort_id,
                partial_signature,
            } => self.on_signature_authorization(&from, session_id, cohort_id, &partial_signature),
            other => Err(ProtocolError::BadState(format!(
                "coordinator does not handle {}",
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

    async fn on_subscribe(&mut self, envelope: &Envelope) -> Result<(), ProtocolError> {
        let from = &envelope.from;
        if !self.subscribers.iter().any(|s| s == from) {
            self.subscribers.push(from.clone());
            info!("{}: new subscriber {}", self.did, from);
        }

        let accept = Envelope::reply_to(envelope, &self.did, Payload::SubscribeAccept {});
        self.sender.send(accept).await
    }

    /// Create a cohort and advertise it to every subscriber. Subscribers we
    /// cannot reach are evicted.
    pub async fn announce_new_cohort(
        &mut self,
        min_participants: usize,
        network: Network,
    ) -> Result<Uuid, ProtocolError> {
        let cohort = Cohort::new(&self.did, min_participants, network);
        let cohort_id = cohort.id;
        info!(
            "{}: announcing cohort {} (min {} participants, {}) to {} subscriber(s)",
            self.did,
            cohort_id,
            min_participants,
            network_name(network),
            self.subscribers.len()
        );
        self.cohorts.insert(cohort_id, cohort);

        let mut unreachable = Vec::new();
        for subscriber in self.subscribers.clone() {
            let advert = Envelope::new(
                &self.did,
                &subscriber,
                Payload::CohortAdvert {
                    cohort_id,
                    cohort_size: min_participants,
                    beacon_type: SMT_AGGREGATE_BEACON.to_string(),
                    btc_network: network_name(network).to_string(),
                },
            );
            if let Err(e) = self.sender.send(advert).await {
                warn!(
                    "{}: evicting subscriber {} after failed advert: {}",
                    self.did, subscriber, e
                );
                unreachable.push(subscriber);
            }
        }
        self.subscribers.retain(|s| !unreachable.contains(s));

        Ok(cohort_id)
    }

    async fn on_opt_in(
        &mut self,
        from: &str,
        cohort_id: Uuid,
        participant_pk: &str,
    ) -> Result<(), ProtocolError> {
        let pk = point_from_hex(participant_pk)?;

        let cohort = self
            .cohorts
            .get_mut(&cohort_id)
            .ok_or(ProtocolError::UnknownCohort(cohort_id))?;

        if cohort.add_opt_in(from, pk)? {
            info!(
                "{}: {} opted into cohort {} ({}/{})",
                self.did,
                from,
                cohort_id,
                cohort.participants().len(),
                cohort.min_participants
            );
        }

        if cohort.participants().len() >= cohort.min_participants
            && cohort.status() != CohortStatus::CohortSet
        {
            cohort.finalize()?;
            self.broadcast_cohort_set(cohort_id).await?;
        }
        Ok(())
    }

    async fn broadcast_cohort_set(&mut self, cohort_id: Uuid) -> Result<(), ProtocolError> {
        let (participants, beacon_address, cohort_keys) = {
            let cohort = self
                .cohorts
                .get(&cohort_id)
                .ok_or(ProtocolError::UnknownCohort(cohort_id))?;
            let beacon = cohort.beacon().ok_or_else(|| {
                ProtocolError::BadState(format!("cohort {} has no beacon", cohort_id))
            })?;
            (
                cohort.participants().to_vec(),
                beacon.address.to_string(),
                cohort.cohort_keys().iter().map(point_to_hex).collect::<Vec<_>>(),
            )
        };

        info!(
            "{}: cohort {} set, beacon address {}",
            self.did, cohort_id, beacon_address
        );

        for participant in &participants {
            let msg = Envelope::new(
                &self.did,
                participant,
                Payload::CohortSet {
                    cohort_id,
                    beacon_address: beacon_address.clone(),
                    cohort_keys: cohort_keys.clone(),
                },
            );
            self.sender.send(msg).await?;
        }
        Ok(())
    }

    // ─── Sign ───────────────────────────────────────────────────────────

    fn on_request_signature(
        &mut self,
        from: &str,
        cohort_id: Uuid,
        data: String,
    ) -> Result<(), ProtocolError> {
        let cohort = self
            .cohorts
            .get_mut(&cohort_id)
            .ok_or(ProtocolError::UnknownCohort(cohort_id))?;

        cohort.add_signature_request(from, data.into_bytes())?;
        info!(
            "{}: recorded signature request from {} for cohort {} ({} pending)",
            self.did,
            from,
            cohort_id,
            cohort.pending_request_count()
        );
        Ok(())
    }

    /// Snapshot the cohort's pending requests, build the beacon signal and
    /// open round 1 with every participant.
    pub async fn start_signing_session(&mut self, cohort_id: Uuid) -> Result<Uuid, ProtocolError> {
        let (session_id, participants, tx_hex) = {
            let cohort = self
                .cohorts
                .get_mut(&cohort_id)
                .ok_or(ProtocolError::UnknownCohort(cohort_id))?;
            if cohort.status() != CohortStatus::CohortSet {
                return Err(ProtocolError::BadState(format!(
                    "cohort {} is not set (status {})",
                    cohort_id,
                    cohort.status()
                )));
            }

            let requests = cohort.take_pending_requests();
            let smt_root = (self.smt_root_fn)(&requests);
            let pending_tx = build_beacon_signal(cohort, smt_root)?;
            let tx_hex = bitcoin::consensus::encode::serialize_hex(&pending_tx);

            let session = SigningSession::new(cohort_id, pending_tx, requests);
            let session_id = session.id;
            let participants = cohort.participants().to_vec();
            self.sessions.insert(session_id, session);
            (session_id, participants, tx_hex)
        };

        info!(
            "{}: starting signing session {} for cohort {}",
            self.did, session_id, cohort_id
        );

        let mut send_failure = None;
        for participant in &participants {
            let msg = Envelope::new(
                &self.did,
                participant,
                Payload::AuthorizationRequest {
                    session_id,
                    cohort_id,
                    pending_tx: tx_hex.clone(),
                },
            );
            if let Err(e) = self.sender.send(msg).await {
                error!(
                    "{}: failed to send authorization request to {}: {}",
                    self.did, participant, e
                );
                send_failure.get_or_insert(e);
            }
        }

        match send_failure {
            Some(e) => Err(e),
            None => Ok(session_id),
        }
    }

    async fn on_nonce_contribution(
        &mut self,
        from: &str,
        session_id: Uuid,
        cohort_id: Uuid,
        pair: &[String; 2],
    ) -> Result<(), ProtocolError> {
        let complete = {
            let session = self
                .sessions
                .get_mut(&session_id)
                .ok_or(ProtocolError::UnknownSession(session_id))?;
            if session.cohort_id != cohort_id {
                return Err(ProtocolError::BadState(format!(
                    "nonce contribution names cohort {} but session {} belongs to {}",
                    cohort_id, session_id, session.cohort_id
                )));
            }
            let cohort = self
                .cohorts
                .get(&cohort_id)
                .ok_or(ProtocolError::UnknownCohort(cohort_id))?;
            if !cohort.is_member(from) {
                return Err(ProtocolError::Auth(format!(
                    "{} is not a member of cohort {}",
                    from, cohort_id
                )));
            }

            let nonce = pubnonce_from_hex_pair(pair)?;
            let expected = cohort.participants().len();
            let complete = session.add_nonce_contribution(from, nonce, expected)?;
            info!(
                "{}: nonce contribution from {} for session {} ({}/{})",
                self.did,
                from,
                session_id,
                session.nonce_contribution_count(),
                expected
            );
            complete
        };

        if complete {
            self.send_aggregated_nonce(session_id).await?;
        }
        Ok(())
    }

    async fn send_aggregated_nonce(&mut self, session_id: Uuid) -> Result<(), ProtocolError> {
        let (cohort_id, participants, pair) = {
            let session = self
                .sessions
                .get_mut(&session_id)
                .ok_or(ProtocolError::UnknownSession(session_id))?;
            let cohort = self
                .cohorts
                .get(&session.cohort_id)
                .ok_or(ProtocolError::UnknownCohort(session.cohort_id))?;

            let aggregated = session.aggregate_nonces()?;
            (
                session.cohort_id,
                cohort.participants().to_vec(),
                aggnonce_to_hex_pair(&aggregated),
            )
        };

        info!(
            "{}: all nonces received for session {}, broadcasting aggregate",
            self.did, session_id
        );

        for participant in &participants {
            let msg = Envelope::new(
                &self.did,
                participant,
                Payload::AggregatedNonce {
                    session_id,
                    cohort_id,
                    aggregated_nonce: pair.clone(),
                },
            );
            self.sender.send(msg).await?;
        }
        Ok(())
    }

    fn on_signature_authorization(
        &mut self,
        from: &str,
        session_id: Uuid,
        cohort_id: Uuid,
        partial_signature: &str,
    ) -> Result<(), ProtocolError> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(ProtocolError::UnknownSession(session_id))?;
        if session.cohort_id != cohort_id {
            return Err(ProtocolError::BadState(format!(
                "signature authorization names cohort {} but session {} belongs to {}",
                cohort_id, session_id, session.cohort_id
            )));
        }
        let cohort = self
            .cohorts
            .get(&cohort_id)
            .ok_or(ProtocolError::UnknownCohort(cohort_id))?;
        if !cohort.is_member(from) {
            return Err(ProtocolError::Auth(format!(
                "{} is not a member of cohort {}",
                from, cohort_id
            )));
        }

        let partial = partial_sig_from_hex(partial_signature)?;
        let expected = cohort.participants().len();
        let complete = session.add_partial_signature(from, partial, expected)?;
        info!(
            "{}: partial signature from {} for session {} ({}/{})",
            self.did,
            from,
            session_id,
            session.partial_signature_count(),
            expected
        );

        if complete {
            let signature = session.finalize_signature(cohort)?;
            info!(
                "{}: session {} complete, final signature {}",
                self.did,
                session_id,
                hex::encode(signature)
            );
        }
        Ok(())
    }
}
