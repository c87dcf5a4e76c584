//! End-to-end protocol scenarios.
//!
//! Coordinator and participants run in-process, wired through the in-memory
//! router. Tests pump each role's queue explicitly so message interleavings
//! are deterministic; a few scenarios drive one cohort member by hand to
//! inject duplicate and corrupted traffic.

use std::sync::Arc;

use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::Network;
use tokio::sync::mpsc;
use uuid::Uuid;

use beacon_crypto::musig::{
    aggnonce_from_hex_pair, generate_nonce, partial_sig_to_hex, partial_sign, point_from_hex,
    point_to_hex, pubnonce_to_hex_pair,
};
use beacon_crypto::seed::{derive_seed, generate_mnemonic};
use beacon_crypto::{derive_beacon, derive_beacon_master, output_key, signing_context,
    verify_signature};
use beacon_protocols::session::SessionStatus;
use beacon_protocols::signal::{build_beacon_signal, funding_utxo, key_spend_sighash,
    BEACON_INPUT_INDEX};
use beacon_protocols::{
    BeaconCoordinator, BeaconParticipant, CohortStatus, Envelope, LocalRouter, MessageSender,
    Payload,
};

const COORDINATOR_DID: &str = "did:ex:coordinator";
const PARTICIPANT_DIDS: [&str; 5] = [
    "did:ex:fred",
    "did:ex:lucia",
    "did:ex:alice",
    "did:ex:bob",
    "did:ex:charlie",
];

fn test_keypair(seed_byte: u8) -> (SecretKey, PublicKey) {
    let secp = Secp256k1::new();
    let mut bytes = [0u8; 32];
    bytes[0] = 0x01;
    bytes[31] = seed_byte;
    let sk = SecretKey::from_slice(&bytes).unwrap();
    (sk, sk.public_key(&secp))
}

fn new_participant(did: &str, router: &LocalRouter) -> (BeaconParticipant, mpsc::Receiver<String>) {
    let inbox = router.register(did);
    let mnemonic = generate_mnemonic().unwrap();
    let seed = derive_seed(&mnemonic, "");
    let account = derive_beacon_master(&seed, Network::Signet).unwrap();
    (
        BeaconParticipant::new(did, account, Arc::new(router.clone())),
        inbox,
    )
}

fn next_from(inbox: &mut mpsc::Receiver<String>) -> Envelope {
    let raw = inbox.try_recv().expect("expected a queued message");
    Envelope::decode(&raw).unwrap()
}

fn drain(inbox: &mut mpsc::Receiver<String>) {
    while inbox.try_recv().is_ok() {}
}

struct Node {
    participant: BeaconParticipant,
    inbox: mpsc::Receiver<String>,
}

struct Harness {
    coordinator: BeaconCoordinator,
    coordinator_inbox: mpsc::Receiver<String>,
    nodes: Vec<Node>,
}

impl Harness {
    fn new(count: usize) -> Self {
        let router = LocalRouter::new();
        let coordinator_inbox = router.register(COORDINATOR_DID);
        let coordinator = BeaconCoordinator::new(COORDINATOR_DID, Arc::new(router.clone()));
        let nodes = PARTICIPANT_DIDS[..count]
            .iter()
            .map(|did| {
                let (participant, inbox) = new_participant(did, &router);
                Node { participant, inbox }
            })
            .collect();
        Self {
            coordinator,
            coordinator_inbox,
            nodes,
        }
    }

    /// Pump every role's queue until the whole system goes quiet.
    async fn settle(&mut self) {
        loop {
            let mut handled = self
                .coordinator
                .process_pending(&mut self.coordinator_inbox)
                .await;
            for node in self.nodes.iter_mut() {
                handled += node.participant.process_pending(&mut node.inbox).await;
            }
            if handled == 0 {
                break;
            }
        }
    }

    async fn subscribe_all(&mut self) {
        for node in &self.nodes {
            node.participant
                .subscribe_to_coordinator(COORDINATOR_DID)
                .await
                .unwrap();
        }
        self.settle().await;
    }

    /// Subscribe everyone and run keygen to COHORT_SET.
    async fn keygen(&mut self, min_participants: usize) -> Uuid {
        self.subscribe_all().await;
        let cohort_id = self
            .coordinator
            .announce_new_cohort(min_participants, Network::Signet)
            .await
            .unwrap();
        self.settle().await;
        cohort_id
    }
}

// ─── Scenario A: 5-party keygen ─────────────────────────────────────────

#[tokio::test]
async fn five_party_keygen_agrees_on_beacon() {
    let mut h = Harness::new(5);
    h.subscribe_all().await;
    assert_eq!(h.coordinator.subscribers(), PARTICIPANT_DIDS);

    let cohort_id = h
        .coordinator
        .announce_new_cohort(5, Network::Signet)
        .await
        .unwrap();
    h.settle().await;

    let cohort = h.coordinator.cohort(cohort_id).unwrap();
    assert_eq!(cohort.status(), CohortStatus::CohortSet);
    assert_eq!(cohort.participants(), PARTICIPANT_DIDS);

    let address = cohort.beacon().unwrap().address.clone();
    let keys = cohort.cohort_keys().to_vec();
    assert_eq!(keys.len(), 5);

    for (i, node) in h.nodes.iter().enumerate() {
        let shadow = node.participant.cohort(cohort_id).unwrap();
        assert_eq!(shadow.status(), CohortStatus::CohortSet);
        // Order preservation: every shadow carries the coordinator's exact
        // key sequence, which is the subscription order.
        assert_eq!(shadow.cohort_keys(), keys);
        assert_eq!(shadow.beacon().unwrap().address, address);
        assert_eq!(keys[i], node.participant.cohort_pubkey(cohort_id).unwrap());
    }
}

// ─── Scenario B: end-to-end signing ─────────────────────────────────────

#[tokio::test]
async fn end_to_end_signing_produces_verified_signature() {
    let mut h = Harness::new(5);
    let cohort_id = h.keygen(5).await;

    assert!(h.nodes[0]
        .participant
        .request_cohort_signature(cohort_id, "Hello, world!")
        .await
        .unwrap());
    assert!(h.nodes[1]
        .participant
        .request_cohort_signature(cohort_id, "btc1 did update payload")
        .await
        .unwrap());
    h.settle().await;

    assert_eq!(
        h.coordinator.cohort(cohort_id).unwrap().pending_request_count(),
        2
    );

    assert_eq!(
        h.nodes[0].participant.sent_requests(cohort_id),
        [b"Hello, world!".to_vec()]
    );

    let session_id = h.coordinator.start_signing_session(cohort_id).await.unwrap();
    h.settle().await;

    // The request snapshot moved into the session
    assert_eq!(
        h.coordinator.cohort(cohort_id).unwrap().pending_request_count(),
        0
    );

    let cohort = h.coordinator.cohort(cohort_id).unwrap().clone();
    let session = h.coordinator.take_session(session_id).unwrap();
    assert_eq!(session.status(), SessionStatus::SignatureComplete);
    assert_eq!(session.processed_requests().len(), 2);

    let signature = *session.signature().unwrap();
    let beacon = cohort.beacon().unwrap();
    let tweaked = output_key(cohort.cohort_keys(), beacon.merkle_root_bytes()).unwrap();
    let sighash = session.sighash(&cohort).unwrap();
    assert!(verify_signature(&tweaked, &signature, &sighash));

    // Witness carries exactly the 64-byte key-path signature
    let witness = &session.pending_tx().input[BEACON_INPUT_INDEX].witness;
    assert_eq!(witness.len(), 1);
    assert_eq!(witness.iter().next().unwrap().len(), 64);
}

// ─── Scenario C: unsolicited advert ─────────────────────────────────────

#[tokio::test]
async fn unsolicited_advert_creates_nothing_and_sends_nothing() {
    let router = LocalRouter::new();
    let mut stranger_inbox = router.register("did:ex:stranger");
    let (mut fred, _fred_inbox) = new_participant("did:ex:fred", &router);

    let cohort_id = Uuid::new_v4();
    fred.handle_message(Envelope::new(
        "did:ex:stranger",
        "did:ex:fred",
        Payload::CohortAdvert {
            cohort_id,
            cohort_size: 3,
            beacon_type: "SMTAggregateBeacon".to_string(),
            btc_network: "signet".to_string(),
        },
    ))
    .await;

    assert!(fred.cohort(cohort_id).is_none());
    // No OPT_IN went anywhere
    assert!(stranger_inbox.try_recv().is_err());
    drain(&mut stranger_inbox);
}

// ─── Scenario D: cohort validation mismatch ─────────────────────────────

#[tokio::test]
async fn cohort_set_without_own_key_fails_cohort_locally() {
    let router = LocalRouter::new();
    let mut coord_inbox = router.register(COORDINATOR_DID);
    let (mut fred, _fred_inbox) = new_participant("did:ex:fred", &router);

    fred.handle_message(Envelope::new(
        COORDINATOR_DID,
        "did:ex:fred",
        Payload::SubscribeAccept {},
    ))
    .await;

    let cohort_id = Uuid::new_v4();
    fred.handle_message(Envelope::new(
        COORDINATOR_DID,
        "did:ex:fred",
        Payload::CohortAdvert {
            cohort_id,
            cohort_size: 2,
            beacon_type: "SMTAggregateBeacon".to_string(),
            btc_network: "signet".to_string(),
        },
    ))
    .await;
    drain(&mut coord_inbox); // the opt-in

    // Cohort set that does not include fred's key
    let (_sk1, pk1) = test_keypair(21);
    let (_sk2, pk2) = test_keypair(22);
    let keys = vec![pk1, pk2];
    let beacon = derive_beacon(&keys, Network::Signet).unwrap();
    fred.handle_message(Envelope::new(
        COORDINATOR_DID,
        "did:ex:fred",
        Payload::CohortSet {
            cohort_id,
            beacon_address: beacon.address.to_string(),
            cohort_keys: keys.iter().map(point_to_hex).collect(),
        },
    ))
    .await;

    assert_eq!(
        fred.cohort(cohort_id).unwrap().status(),
        CohortStatus::Failed
    );

    // The failed cohort accepts nothing further: an authorization request
    // for it is dropped and no session or nonce appears.
    let session_id = Uuid::new_v4();
    let cohort = {
        let mut template = beacon_protocols::Cohort::new(COORDINATOR_DID, 2, Network::Signet);
        template.add_opt_in("did:ex:a", pk1).unwrap();
        template.add_opt_in("did:ex:b", pk2).unwrap();
        template.finalize().unwrap();
        template
    };
    let tx = build_beacon_signal(&cohort, [9u8; 32]).unwrap();
    fred.handle_message(Envelope::new(
        COORDINATOR_DID,
        "did:ex:fred",
        Payload::AuthorizationRequest {
            session_id,
            cohort_id,
            pending_tx: bitcoin::consensus::encode::serialize_hex(&tx),
        },
    ))
    .await;

    assert!(fred.session(session_id).is_none());
    assert!(coord_inbox.try_recv().is_err());
}

// ─── Scenario E: duplicate nonce contribution ───────────────────────────

/// One cohort member is driven by hand so a duplicate `NONCE_CONTRIBUTION`
/// can be injected. The coordinator keeps the first, drops the duplicate,
/// and the session still completes.
#[tokio::test]
async fn duplicate_nonce_contribution_keeps_first_and_completes() {
    let router = LocalRouter::new();
    let mut coord_inbox = router.register(COORDINATOR_DID);
    let mut coordinator = BeaconCoordinator::new(COORDINATOR_DID, Arc::new(router.clone()));
    let (mut fred, mut fred_inbox) = new_participant("did:ex:fred", &router);
    let mut manual_inbox = router.register("did:ex:manual");
    let (manual_sk, manual_pk) = test_keypair(42);

    // Subscriptions: fred for real, the manual member by hand.
    fred.subscribe_to_coordinator(COORDINATOR_DID).await.unwrap();
    router
        .send(Envelope::new(
            "did:ex:manual",
            COORDINATOR_DID,
            Payload::Subscribe {},
        ))
        .await
        .unwrap();
    coordinator.process_pending(&mut coord_inbox).await;
    fred.process_pending(&mut fred_inbox).await;
    drain(&mut manual_inbox);

    // Keygen
    let cohort_id = coordinator
        .announce_new_cohort(2, Network::Signet)
        .await
        .unwrap();
    fred.process_pending(&mut fred_inbox).await; // advert → opt-in
    let _advert = next_from(&mut manual_inbox);
    router
        .send(Envelope::new(
            "did:ex:manual",
            COORDINATOR_DID,
            Payload::OptIn {
                cohort_id,
                participant_pk: point_to_hex(&manual_pk),
            },
        ))
        .await
        .unwrap();
    coordinator.process_pending(&mut coord_inbox).await; // opt-ins → finalize → cohort set
    fred.process_pending(&mut fred_inbox).await; // fred validates

    // Manual member re-derives the beacon from the cohort set claim.
    let cohort_set = next_from(&mut manual_inbox);
    let (keys, claimed_address) = match cohort_set.payload {
        Payload::CohortSet {
            cohort_keys,
            beacon_address,
            ..
        } => {
            let keys: Vec<PublicKey> = cohort_keys
                .iter()
                .map(|k| point_from_hex(k).unwrap())
                .collect();
            (keys, beacon_address)
        }
        other => panic!("expected CohortSet, got {:?}", other),
    };
    let beacon = derive_beacon(&keys, Network::Signet).unwrap();
    assert_eq!(beacon.address.to_string(), claimed_address);
    let ctx = signing_context(&keys, beacon.merkle_root_bytes()).unwrap();

    // One pending request, then round 1.
    assert!(fred
        .request_cohort_signature(cohort_id, "Hello, world!")
        .await
        .unwrap());
    coordinator.process_pending(&mut coord_inbox).await;
    let session_id = coordinator.start_signing_session(cohort_id).await.unwrap();

    // Manual member answers first — twice, with different nonces.
    let auth = next_from(&mut manual_inbox);
    let tx: bitcoin::Transaction = match auth.payload {
        Payload::AuthorizationRequest { pending_tx, .. } => {
            bitcoin::consensus::deserialize(&hex::decode(pending_tx).unwrap()).unwrap()
        }
        other => panic!("expected AuthorizationRequest, got {:?}", other),
    };
    let (_, prevout) = funding_utxo(beacon.address.script_pubkey()).unwrap();
    let sighash = key_spend_sighash(&tx, &prevout, BEACON_INPUT_INDEX).unwrap();

    let (kept_secnonce, kept_pubnonce) =
        generate_nonce(&manual_sk, &ctx, Some(&sighash)).unwrap();
    let (_dup_secnonce, dup_pubnonce) = generate_nonce(&manual_sk, &ctx, Some(&sighash)).unwrap();
    for nonce in [&kept_pubnonce, &dup_pubnonce] {
        router
            .send(Envelope::new(
                "did:ex:manual",
                COORDINATOR_DID,
                Payload::NonceContribution {
                    session_id,
                    cohort_id,
                    nonce_contribution: pubnonce_to_hex_pair(nonce),
                },
            ))
            .await
            .unwrap();
    }
    coordinator.process_pending(&mut coord_inbox).await;
    assert_eq!(
        coordinator.session(session_id).unwrap().nonce_contribution_count(),
        1,
        "duplicate must not add a second contribution"
    );

    // Fred contributes; the round completes and the aggregate goes out.
    fred.process_pending(&mut fred_inbox).await;
    coordinator.process_pending(&mut coord_inbox).await;

    // Fred signs; the manual member signs with the nonce the coordinator kept.
    fred.process_pending(&mut fred_inbox).await;
    let agg_msg = next_from(&mut manual_inbox);
    let aggregated = match agg_msg.payload {
        Payload::AggregatedNonce {
            aggregated_nonce, ..
        } => aggnonce_from_hex_pair(&aggregated_nonce).unwrap(),
        other => panic!("expected AggregatedNonce, got {:?}", other),
    };
    let partial = partial_sign(&manual_sk, kept_secnonce, &ctx, &aggregated, &sighash).unwrap();
    router
        .send(Envelope::new(
            "did:ex:manual",
            COORDINATOR_DID,
            Payload::SignatureAuthorization {
                session_id,
                cohort_id,
                partial_signature: partial_sig_to_hex(&partial),
            },
        ))
        .await
        .unwrap();
    coordinator.process_pending(&mut coord_inbox).await;

    let session = coordinator.take_session(session_id).unwrap();
    assert_eq!(session.status(), SessionStatus::SignatureComplete);
    assert!(session.signature().is_some());
}

// ─── Scenario F: corrupted partial signature ────────────────────────────

#[tokio::test]
async fn corrupted_partial_signature_fails_session_without_exposing_signature() {
    let router = LocalRouter::new();
    let mut coord_inbox = router.register(COORDINATOR_DID);
    let mut coordinator = BeaconCoordinator::new(COORDINATOR_DID, Arc::new(router.clone()));
    let (mut fred, mut fred_inbox) = new_participant("did:ex:fred", &router);
    let mut manual_inbox = router.register("did:ex:manual");
    let (manual_sk, manual_pk) = test_keypair(42);

    fred.subscribe_to_coordinator(COORDINATOR_DID).await.unwrap();
    router
        .send(Envelope::new(
            "did:ex:manual",
            COORDINATOR_DID,
            Payload::Subscribe {},
        ))
        .await
        .unwrap();
    coordinator.process_pending(&mut coord_inbox).await;
    fred.process_pending(&mut fred_inbox).await;
    drain(&mut manual_inbox);

    let cohort_id = coordinator
        .announce_new_cohort(2, Network::Signet)
        .await
        .unwrap();
    fred.process_pending(&mut fred_inbox).await;
    let _advert = next_from(&mut manual_inbox);
    router
        .send(Envelope::new(
            "did:ex:manual",
            COORDINATOR_DID,
            Payload::OptIn {
                cohort_id,
                participant_pk: point_to_hex(&manual_pk),
            },
        ))
        .await
        .unwrap();
    coordinator.process_pending(&mut coord_inbox).await;
    fred.process_pending(&mut fred_inbox).await;
    let cohort_set = next_from(&mut manual_inbox);
    let keys: Vec<PublicKey> = match cohort_set.payload {
        Payload::CohortSet { cohort_keys, .. } => cohort_keys
            .iter()
            .map(|k| point_from_hex(k).unwrap())
            .collect(),
        other => panic!("expected CohortSet, got {:?}", other),
    };
    let beacon = derive_beacon(&keys, Network::Signet).unwrap();
    let ctx = signing_context(&keys, beacon.merkle_root_bytes()).unwrap();

    assert!(fred
        .request_cohort_signature(cohort_id, "Hello, world!")
        .await
        .unwrap());
    coordinator.process_pending(&mut coord_inbox).await;
    let session_id = coordinator.start_signing_session(cohort_id).await.unwrap();

    // Round 1 proceeds honestly.
    let auth = next_from(&mut manual_inbox);
    let tx: bitcoin::Transaction = match auth.payload {
        Payload::AuthorizationRequest { pending_tx, .. } => {
            bitcoin::consensus::deserialize(&hex::decode(pending_tx).unwrap()).unwrap()
        }
        other => panic!("expected AuthorizationRequest, got {:?}", other),
    };
    let (_, prevout) = funding_utxo(beacon.address.script_pubkey()).unwrap();
    let sighash = key_spend_sighash(&tx, &prevout, BEACON_INPUT_INDEX).unwrap();
    let (_secnonce, pubnonce) = generate_nonce(&manual_sk, &ctx, Some(&sighash)).unwrap();
    router
        .send(Envelope::new(
            "did:ex:manual",
            COORDINATOR_DID,
            Payload::NonceContribution {
                session_id,
                cohort_id,
                nonce_contribution: pubnonce_to_hex_pair(&pubnonce),
            },
        ))
        .await
        .unwrap();
    fred.process_pending(&mut fred_inbox).await;
    coordinator.process_pending(&mut coord_inbox).await;
    fred.process_pending(&mut fred_inbox).await;
    drain(&mut manual_inbox);

    // Round 2: the manual member returns garbage instead of a partial
    // signature over the sighash.
    router
        .send(Envelope::new(
            "did:ex:manual",
            COORDINATOR_DID,
            Payload::SignatureAuthorization {
                session_id,
                cohort_id,
                partial_signature: "1f".repeat(32),
            },
        ))
        .await
        .unwrap();
    coordinator.process_pending(&mut coord_inbox).await;

    let session = coordinator.take_session(session_id).unwrap();
    assert_eq!(session.status(), SessionStatus::Failed);
    assert!(session.signature().is_none());
    // The witness never got a signature either
    assert!(session.pending_tx().input[BEACON_INPUT_INDEX].witness.is_empty());
}

// ─── Boundary behaviors and idempotence ─────────────────────────────────

#[tokio::test]
async fn min_two_cohort_finalizes_at_exactly_two_and_rejects_a_third() {
    let router = LocalRouter::new();
    let mut coord_inbox = router.register(COORDINATOR_DID);
    let mut coordinator = BeaconCoordinator::new(COORDINATOR_DID, Arc::new(router.clone()));

    let members = ["did:ex:m1", "did:ex:m2", "did:ex:m3"];
    let mut inboxes: Vec<_> = members.iter().map(|did| router.register(did)).collect();

    for did in &members {
        router
            .send(Envelope::new(did, COORDINATOR_DID, Payload::Subscribe {}))
            .await
            .unwrap();
        // Replayed subscribe: no second subscriber entry
        router
            .send(Envelope::new(did, COORDINATOR_DID, Payload::Subscribe {}))
            .await
            .unwrap();
    }
    coordinator.process_pending(&mut coord_inbox).await;
    assert_eq!(coordinator.subscribers(), members);

    let cohort_id = coordinator
        .announce_new_cohort(2, Network::Signet)
        .await
        .unwrap();
    for inbox in inboxes.iter_mut() {
        drain(inbox);
    }

    // One opt-in, replayed: cohort must not finalize
    let (_sk1, pk1) = test_keypair(1);
    for _ in 0..2 {
        router
            .send(Envelope::new(
                "did:ex:m1",
                COORDINATOR_DID,
                Payload::OptIn {
                    cohort_id,
                    participant_pk: point_to_hex(&pk1),
                },
            ))
            .await
            .unwrap();
    }
    coordinator.process_pending(&mut coord_inbox).await;
    let cohort = coordinator.cohort(cohort_id).unwrap();
    assert_eq!(cohort.participants().len(), 1);
    assert_eq!(cohort.status(), CohortStatus::OptedIn);

    // The second distinct opt-in finalizes at exactly min_participants
    let (_sk2, pk2) = test_keypair(2);
    router
        .send(Envelope::new(
            "did:ex:m2",
            COORDINATOR_DID,
            Payload::OptIn {
                cohort_id,
                participant_pk: point_to_hex(&pk2),
            },
        ))
        .await
        .unwrap();
    coordinator.process_pending(&mut coord_inbox).await;
    let cohort = coordinator.cohort(cohort_id).unwrap();
    assert_eq!(cohort.status(), CohortStatus::CohortSet);
    assert_eq!(cohort.participants(), ["did:ex:m1", "did:ex:m2"]);

    // A third opt-in after finalization is rejected
    let (_sk3, pk3) = test_keypair(3);
    router
        .send(Envelope::new(
            "did:ex:m3",
            COORDINATOR_DID,
            Payload::OptIn {
                cohort_id,
                participant_pk: point_to_hex(&pk3),
            },
        ))
        .await
        .unwrap();
    coordinator.process_pending(&mut coord_inbox).await;
    let cohort = coordinator.cohort(cohort_id).unwrap();
    assert_eq!(cohort.participants().len(), 2);
    assert_eq!(cohort.status(), CohortStatus::CohortSet);
}

#[tokio::test]
async fn participant_nonces_are_unique_across_sessions() {
    let router = LocalRouter::new();
    let mut coord_inbox = router.register(COORDINATOR_DID);
    let (mut fred, _fred_inbox) = new_participant("did:ex:fred", &router);

    fred.handle_message(Envelope::new(
        COORDINATOR_DID,
        "did:ex:fred",
        Payload::SubscribeAccept {},
    ))
    .await;

    let cohort_id = Uuid::new_v4();
    fred.handle_message(Envelope::new(
        COORDINATOR_DID,
        "did:ex:fred",
        Payload::CohortAdvert {
            cohort_id,
            cohort_size: 2,
            beacon_type: "SMTAggregateBeacon".to_string(),
            btc_network: "signet".to_string(),
        },
    ))
    .await;
    let opt_in = next_from(&mut coord_inbox);
    let fred_pk = match opt_in.payload {
        Payload::OptIn { participant_pk, .. } => point_from_hex(&participant_pk).unwrap(),
        other => panic!("expected OptIn, got {:?}", other),
    };

    // Hand fred a valid cohort set for a 2-member cohort
    let (_our_sk, our_pk) = test_keypair(42);
    let keys = vec![fred_pk, our_pk];
    let beacon = derive_beacon(&keys, Network::Signet).unwrap();
    fred.handle_message(Envelope::new(
        COORDINATOR_DID,
        "did:ex:fred",
        Payload::CohortSet {
            cohort_id,
            beacon_address: beacon.address.to_string(),
            cohort_keys: keys.iter().map(point_to_hex).collect(),
        },
    ))
    .await;
    assert_eq!(
        fred.cohort(cohort_id).unwrap().status(),
        CohortStatus::CohortSet
    );

    // Two sessions over the same cohort: the nonce pairs must differ.
    let shadow = fred.cohort(cohort_id).unwrap().clone();
    let tx_hex =
        bitcoin::consensus::encode::serialize_hex(&build_beacon_signal(&shadow, [7u8; 32]).unwrap());

    let mut contributions = Vec::new();
    for _ in 0..2 {
        let session_id = Uuid::new_v4();
        fred.handle_message(Envelope::new(
            COORDINATOR_DID,
            "did:ex:fred",
            Payload::AuthorizationRequest {
                session_id,
                cohort_id,
                pending_tx: tx_hex.clone(),
            },
        ))
        .await;
        let contribution = next_from(&mut coord_inbox);
        match contribution.payload {
            Payload::NonceContribution {
                session_id: sent_session,
                nonce_contribution,
                ..
            } => {
                assert_eq!(sent_session, session_id);
                contributions.push(nonce_contribution);
            }
            other => panic!("expected NonceContribution, got {:?}", other),
        }
    }
    assert_ne!(contributions[0], contributions[1]);
}
