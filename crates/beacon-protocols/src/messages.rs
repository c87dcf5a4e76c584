//! Protocol message envelopes.
//!
//! Every message is a JSON envelope `{ type, id, to, from, thread_id?, body }`
//! where `type` is a URI constant and `body` carries the per-kind fields.
//! [`Payload`] is the typed sum of all message kinds; decoding happens once
//! at the transport boundary and handlers dispatch by pattern match.
//!
//! Wire conventions: secp256k1 points are 33-byte compressed SEC, lowercase
//! hex; partial signatures are 32-byte scalars, lowercase hex; transactions
//! are consensus-serialized hex. Unknown JSON fields are ignored; missing
//! required fields fail decoding.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ProtocolError;

pub const MESSAGE_PREFIX: &str = "https://btc1.tools/";

pub const SUBSCRIBE: &str = "https://btc1.tools/musig2/keygen/subscribe";
pub const SUBSCRIBE_ACCEPT: &str = "https://btc1.tools/musig2/keygen/subscribe_accept";
pub const COHORT_ADVERT: &str = "https://btc1.tools/musig2/keygen/cohort_advert";
pub const OPT_IN: &str = "https://btc1.tools/musig2/keygen/opt_in";
pub const COHORT_SET: &str = "https://btc1.tools/musig2/keygen/cohort_set";

pub const REQUEST_SIGNATURE: &str = "https://btc1.tools/musig2/sign/request_signature";
pub const AUTHORIZATION_REQUEST: &str = "https://btc1.tools/musig2/sign/authorization_request";
pub const NONCE_CONTRIBUTION: &str = "https://btc1.tools/musig2/sign/nonce_contribution";
pub const AGGREGATED_NONCE: &str = "https://btc1.tools/musig2/sign/aggregated_nonce";
pub const SIGNATURE_AUTHORIZATION: &str = "https://btc1.tools/musig2/sign/signature_authorization";

/// Beacon type advertised for every cohort.
pub const SMT_AGGREGATE_BEACON: &str = "SMTAggregateBeacon";

/// A protocol message as it travels between endpoints.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Envelope {
    /// Fresh UUID v4 per message.
    pub id: Uuid,
    /// Sender DID. The transport guarantees this cannot be spoofed.
    pub from: String,
    /// Recipient DID.
    pub to: String,
    /// Request/response correlation; keygen flows only. Signing flows
    /// correlate through `session_id` in the body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<Uuid>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Envelope {
    /// Build an envelope with a fresh message id.
    pub fn new(from: &str, to: &str, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.to_string(),
            to: to.to_string(),
            thread_id: None,
            payload,
        }
    }

    /// Build a reply correlated to `request` via `thread_id`.
    pub fn reply_to(request: &Envelope, from: &str, payload: Payload) -> Self {
        Self {
            thread_id: Some(request.id),
            ..Self::new(from, &request.from, payload)
        }
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a wire envelope. Fails on unknown `type`, malformed JSON or
    /// missing required fields.
    pub fn decode(raw: &str) -> Result<Envelope, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Typed sum of every message kind, tagged by its wire URI.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "type", content = "body")]
pub enum Payload {
    #[serde(rename = "https://btc1.tools/musig2/keygen/subscribe")]
    Subscribe {},
    #[serde(rename = "https://btc1.tools/musig2/keygen/subscribe_accept")]
    SubscribeAccept {},
    #[serde(rename = "https://btc1.tools/musig2/keygen/cohort_advert")]
    CohortAdvert {
        cohort_id: Uuid,
        cohort_size: usize,
        beacon_type: String,
        btc_network: String,
    },
    #[serde(rename = "https://btc1.tools/musig2/keygen/opt_in")]
    OptIn {
        cohort_id: Uuid,
        /// Participant's compressed public key, hex.
        participant_pk: String,
    },
    #[serde(rename = "https://btc1.tools/musig2/keygen/cohort_set")]
    CohortSet {
        cohort_id: Uuid,
        beacon_address: String,
        /// Every cohort key in opt-in order, compressed hex.
        cohort_keys: Vec<String>,
    },
    #[serde(rename = "https://btc1.tools/musig2/sign/request_signature")]
    RequestSignature { cohort_id: Uuid, data: String },
    #[serde(rename = "https://btc1.tools/musig2/sign/authorization_request")]
    AuthorizationRequest {
        session_id: Uuid,
        cohort_id: Uuid,
        /// Consensus-serialized transaction, hex.
        pending_tx: String,
    },
    #[serde(rename = "https://btc1.tools/musig2/sign/nonce_contribution")]
    NonceContribution {
        session_id: Uuid,
        cohort_id: Uuid,
        /// Exactly two compressed points `(R1, R2)`, hex.
        nonce_contribution: [String; 2],
    },
    #[serde(rename = "https://btc1.tools/musig2/sign/aggregated_nonce")]
    AggregatedNonce {
        session_id: Uuid,
        cohort_id: Uuid,
        aggregated_nonce: [String; 2],
    },
    #[serde(rename = "https://btc1.tools/musig2/sign/signature_authorization")]
    SignatureAuthorization {
        session_id: Uuid,
        cohort_id: Uuid,
        /// 32-byte scalar, hex.
        partial_signature: String,
    },
}

impl Payload {
    /// The wire URI of this message kind.
    pub fn type_uri(&self) -> &'static str {
        match self {
            Payload::Subscribe {} => SUBSCRIBE,
            Payload::SubscribeAccept {} => SUBSCRIBE_ACCEPT,
            Payload::CohortAdvert { .. } => COHORT_ADVERT,
            Payload::OptIn { .. } => OPT_IN,
            Payload::CohortSet { .. } => COHORT_SET,
            Payload::RequestSignature { .. } => REQUEST_SIGNATURE,
            Payload::AuthorizationRequest { .. } => AUTHORIZATION_REQUEST,
            Payload::NonceContribution { .. } => NONCE_CONTRIBUTION,
            Payload::AggregatedNonce { .. } => AGGREGATED_NONCE,
            Payload::SignatureAuthorization { .. } => SIGNATURE_AUTHORIZATION,
        }
    }
}
