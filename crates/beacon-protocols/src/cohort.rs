//! Cohort lifecycle.
//!
//! A cohort is an ordered set of participants that jointly control one
//! beacon address. The coordinator owns the authoritative copy; every
//! participant keeps a shadow it validates independently against the
//! coordinator's `COHORT_SET` claim.
//!
//! Key ordering is the opt-in arrival order at the coordinator and is fixed
//! at finalization. MuSig2 aggregation is order-dependent, so participants
//! adopt the order from `COHORT_SET` verbatim rather than re-sorting.

use std::collections::BTreeMap;
use std::fmt;

use bitcoin::secp256k1::PublicKey;
use bitcoin::Network;
use uuid::Uuid;

use beacon_crypto::musig::point_from_hex;
use beacon_crypto::{derive_beacon, Beacon};

use crate::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CohortStatus {
    Advertised,
    OptedIn,
    CohortSet,
    Failed,
}

impl fmt::Display for CohortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CohortStatus::Advertised => "ADVERTISED",
            CohortStatus::OptedIn => "OPTED_IN",
            CohortStatus::CohortSet => "COHORT_SET",
            CohortStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct Cohort {
    pub id: Uuid,
    pub coordinator_did: String,
    pub network: Network,
    pub min_participants: usize,
    /// Participant DIDs in opt-in arrival order.
    participants: Vec<String>,
    /// Participant keys, same length and order as `participants`.
    cohort_keys: Vec<PublicKey>,
    status: CohortStatus,
    /// Requester DID → opaque payload. Coordinator-side; moved into the
    /// session at signing start.
    pending_signature_requests: BTreeMap<String, Vec<u8>>,
    /// Set at finalization (or successful validation) and never changed.
    beacon: Option<Beacon>,
}

impl Cohort {
    /// Coordinator-side constructor: a fresh cohort open for opt-ins.
    pub fn new(coordinator_did: &str, min_participants: usize, network: Network) -> Self {
        Self {
            id: Uuid::new_v4(),
            coordinator_did: coordinator_did.to_string(),
            network,
            min_participants,
            participants: Vec::new(),
            cohort_keys: Vec::new(),
            status: CohortStatus::Advertised,
            pending_signature_requests: BTreeMap::new(),
            beacon: None,
        }
    }

    /// Participant-side constructor: a shadow of an advertised cohort.
    pub fn advertised(id: Uuid, coordinator_did: &str, network: Network) -> Self {
        Self {
            id,
            ..Self::new(coordinator_did, 0, network)
        }
    }

    pub fn status(&self) -> CohortStatus {
        self.status
    }

    pub fn participants(&self) -> &[String] {
        &self.participants
    }

    pub fn cohort_keys(&self) -> &[PublicKey] {
        &self.cohort_keys
    }

    /// The beacon, present once the cohort reached COHORT_SET.
    pub fn beacon(&self) -> Option<&Beacon> {
        self.beacon.as_ref()
    }

    pub fn is_member(&self, did: &str) -> bool {
        self.participants.iter().any(|p| p == did)
    }

    fn accepting_opt_ins(&self) -> bool {
        matches!(
            self.status,
            CohortStatus::Advertised | CohortStatus::OptedIn
        )
    }

    /// Record an opt-in. Returns `Ok(true)` if newly added, `Ok(false)` for
    /// an idempotent replay from a known participant.
    pub fn add_opt_in(&mut self, did: &str, pk: PublicKey) -> Result<bool, ProtocolError> {
        if !self.accepting_opt_ins() {
            return Err(ProtocolError::BadState(format!(
                "cohort {} no longer accepts opt-ins (status {})",
                self.id, self.status
            )));
        }
        if self.is_member(did) {
            return Ok(false);
        }

        self.participants.push(did.to_string());
        self.cohort_keys.push(pk);
        self.status = CohortStatus::OptedIn;
        Ok(true)
    }

    /// Participant-side bookkeeping after sending its own opt-in.
    pub fn mark_opted_in(&mut self) {
        if self.status == CohortStatus::Advertised {
            self.status = CohortStatus::OptedIn;
        }
    }

    /// Freeze the member set and derive the beacon address.
    pub fn finalize(&mut self) -> Result<(), ProtocolError> {
        if !self.accepting_opt_ins() {
            return Err(ProtocolError::BadState(format!(
                "cohort {} cannot finalize from status {}",
                self.id, self.status
            )));
        }
        if self.participants.len() < self.min_participants {
            return Err(ProtocolError::NotEnoughParticipants {
                have: self.participants.len(),
                need: self.min_participants,
            });
        }

        self.beacon = Some(derive_beacon(&self.cohort_keys, self.network)?);
        self.status = CohortStatus::CohortSet;
        Ok(())
    }

    /// Participant-side validation of a `COHORT_SET` claim.
    ///
    /// Parses the claimed keys preserving their order, checks that our own
    /// key is among them, recomputes the beacon address and compares it to
    /// the claimed one. Any mismatch is terminal for this cohort.
    pub fn validate(
        &mut self,
        own_pk: &PublicKey,
        claimed_keys: &[String],
        claimed_address: &str,
    ) -> Result<(), ProtocolError> {
        match self.validate_inner(own_pk, claimed_keys, claimed_address) {
            Ok(beacon) => {
                self.beacon = Some(beacon);
                self.status = CohortStatus::CohortSet;
                Ok(())
            }
            Err(e) => {
                self.status = CohortStatus::Failed;
                Err(e)
            }
        }
    }

    fn validate_inner(
        &mut self,
        own_pk: &PublicKey,
        claimed_keys: &[String],
        claimed_address: &str,
    ) -> Result<Beacon, ProtocolError> {
        let keys: Vec<PublicKey> = claimed_keys
            .iter()
            .map(|k| point_from_hex(k))
            .collect::<Result<_, _>>()
            .map_err(|e| ProtocolError::Validation(format!("cohort {}: {}", self.id, e)))?;

        if !keys.contains(own_pk) {
            return Err(ProtocolError::Validation(format!(
                "cohort {} does not contain our key",
                self.id
            )));
        }

        let beacon = derive_beacon(&keys, self.network)
            .map_err(|e| ProtocolError::Validation(format!("cohort {}: {}", self.id, e)))?;

        if beacon.address.to_string() != claimed_address {
            return Err(ProtocolError::Validation(format!(
                "cohort {} beacon address mismatch: computed {}, claimed {}",
                self.id, beacon.address, claimed_address
            )));
        }

        self.cohort_keys = keys;
        Ok(beacon)
    }

    /// Record a signature request against this cohort (coordinator-side).
    pub fn add_signature_request(&mut self, from: &str, data: Vec<u8>) -> Result<(), ProtocolError> {
        if self.status != CohortStatus::CohortSet {
            return Err(ProtocolError::BadState(format!(
                "cohort {} is not set (status {})",
                self.id, self.status
            )));
        }
        if !self.is_member(from) {
            return Err(ProtocolError::Auth(format!(
                "{} is not a member of cohort {}",
                from, self.id
            )));
        }
        self.pending_signature_requests.insert(from.to_string(), data);
        Ok(())
    }

    pub fn pending_request_count(&self) -> usize {
        self.pending_signature_requests.len()
    }

    /// Snapshot the pending requests and clear them; the snapshot moves into
    /// the signing session being started.
    pub fn take_pending_requests(&mut self) -> BTreeMap<String, Vec<u8>> {
        std::mem::take(&mut self.pending_signature_requests)
    }
}
