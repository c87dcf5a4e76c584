//! Beacon Protocols
//!
//! The two btc-beacon protocols and the roles that speak them:
//!
//! - **KeyGen**: subscription, cohort advertisement, opt-in, finalization
//!   and independent verification of the MuSig2 aggregate behind a shared
//!   P2TR beacon address.
//! - **Sign**: 2-round MuSig2 over a beacon-signal transaction —
//!   authorization requests, nonce collection and aggregation, partial
//!   signatures, final BIP-340 assembly and witness finalization.
//!
//! One coordinator sequences sessions; participants hold their own keys and
//! validate everything the coordinator claims. Messages travel over any
//! [`transport::MessageSender`] that delivers authenticated envelopes; an
//! in-memory router is provided for tests and in-process deployments.

use thiserror::Error;

pub mod cohort;
pub mod coordinator;
pub mod messages;
pub mod participant;
pub mod session;
pub mod signal;
pub mod transport;

pub use cohort::{Cohort, CohortStatus};
pub use coordinator::BeaconCoordinator;
pub use messages::{Envelope, Payload};
pub use participant::BeaconParticipant;
pub use session::{SessionStatus, SigningSession};
pub use transport::{LocalRouter, MessageSender};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("failed to decode message: {0}")]
    Decode(String),
    #[error("unauthorized sender: {0}")]
    Auth(String),
    #[error("message not acceptable: {0}")]
    BadState(String),
    #[error("duplicate contribution from {0}")]
    Duplicate(String),
    #[error("not enough participants: {have} of {need}")]
    NotEnoughParticipants { have: usize, need: usize },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unknown cohort {0}")]
    UnknownCohort(uuid::Uuid),
    #[error("unknown session {0}")]
    UnknownSession(uuid::Uuid),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error(transparent)]
    Crypto(#[from] beacon_crypto::CryptoError),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Decode(e.to_string())
    }
}
