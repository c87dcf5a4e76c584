//! The daemon flow — wires a coordinator and its participants over the
//! in-memory router, then drives keygen (and optionally one signing
//! session) to completion.
//!
//! Every role processes its queue one message at a time; the daemon loops
//! until the whole system goes quiet between stages. Swapping the router
//! for a remote transport changes none of the protocol code.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use uuid::Uuid;

use beacon_crypto::seed::{derive_seed, generate_mnemonic, parse_mnemonic};
use beacon_protocols::session::SessionStatus;
use beacon_protocols::{BeaconCoordinator, BeaconParticipant, CohortStatus, LocalRouter};

use crate::config::ServerConfig;

struct Node {
    participant: BeaconParticipant,
    inbox: mpsc::Receiver<String>,
}

/// Run the configured keygen (and signing) flow to completion.
pub async fn run(config: &ServerConfig, keygen_only: bool) -> Result<()> {
    let network = config.network()?;

    log::info!("btc-beacon server starting…");
    log::info!("  Network:      {}", config.bitcoin.network);
    log::info!(
        "  Coordinator:  {} (ws://{}:{})",
        config.coordinator.name,
        config.coordinator.host,
        config.coordinator.port
    );
    log::info!(
        "  Cohort:       {} of {} participant(s)",
        config.coordinator.min_participants,
        config.participants.len()
    );

    let router = LocalRouter::new();

    let coordinator_did = role_did(&config.coordinator.name);
    let mut coordinator_inbox = router.register(&coordinator_did);
    let mut coordinator = BeaconCoordinator::new(&coordinator_did, Arc::new(router.clone()));

    let mut nodes = Vec::with_capacity(config.participants.len());
    for section in &config.participants {
        let did = role_did(&section.name);
        let inbox = router.register(&did);

        let mnemonic = match &section.mnemonic {
            Some(words) => parse_mnemonic(words)
                .with_context(|| format!("mnemonic for {}", section.name))?,
            None => generate_mnemonic().context("mnemonic generation")?,
        };
        let seed = derive_seed(&mnemonic, "");
        let account = beacon_crypto::derive_beacon_master(&seed, network)
            .with_context(|| format!("key derivation for {}", section.name))?;

        log::info!(
            "  Participant:  {} (ws://{}:{})",
            section.name,
            section.host,
            section.port
        );
        nodes.push(Node {
            participant: BeaconParticipant::new(&did, account, Arc::new(router.clone())),
            inbox,
        });
    }

    // ─── KeyGen ─────────────────────────────────────────────────────────

    for node in &nodes {
        node.participant
            .subscribe_to_coordinator(&coordinator_did)
            .await
            .context("subscribe")?;
    }
    settle(&mut coordinator, &mut coordinator_inbox, &mut nodes).await;

    let cohort_id = coordinator
        .announce_new_cohort(config.coordinator.min_participants, network)
        .await
        .context("cohort announcement")?;
    settle(&mut coordinator, &mut coordinator_inbox, &mut nodes).await;

    let cohort = coordinator
        .cohort(cohort_id)
        .context("cohort disappeared")?;
    anyhow::ensure!(
        cohort.status() == CohortStatus::CohortSet,
        "cohort {} did not finalize (status {})",
        cohort_id,
        cohort.status()
    );
    let beacon_address = cohort
        .beacon()
        .context("finalized cohort has no beacon")?
        .address
        .clone();

    for node in &nodes {
        let shadow = node
            .participant
            .cohort(cohort_id)
            .context("participant missing cohort shadow")?;
        anyhow::ensure!(
            shadow.status() == CohortStatus::CohortSet,
            "{} did not validate cohort {}",
            node.participant.did(),
            cohort_id
        );
    }

    log::info!("Cohort {} set across all participants.", cohort_id);
    log::info!("Beacon address: {}", beacon_address);

    if keygen_only || !config.signing.enabled {
        log::info!("Keygen complete; signing disabled. Done.");
        return Ok(());
    }

    // ─── Sign ───────────────────────────────────────────────────────────

    for (node, data) in nodes.iter_mut().zip(&config.signing.requests) {
        let sent = node
            .participant
            .request_cohort_signature(cohort_id, data)
            .await
            .context("signature request")?;
        anyhow::ensure!(sent, "{} could not request a signature", node.participant.did());
    }
    settle(&mut coordinator, &mut coordinator_inbox, &mut nodes).await;

    let pending = coordinator
        .cohort(cohort_id)
        .context("cohort disappeared")?
        .pending_request_count();
    log::info!("{} signature request(s) pending; starting session.", pending);

    let session_id = coordinator
        .start_signing_session(cohort_id)
        .await
        .context("session start")?;
    settle(&mut coordinator, &mut coordinator_inbox, &mut nodes).await;

    report_session(&mut coordinator, session_id)
}

fn report_session(coordinator: &mut BeaconCoordinator, session_id: Uuid) -> Result<()> {
    let session = coordinator
        .take_session(session_id)
        .context("session disappeared")?;

    match session.status() {
        SessionStatus::SignatureComplete => {
            let signature = session.signature().context("complete session has no signature")?;
            log::info!("Session {} complete.", session_id);
            log::info!("Final signature: {}", hex::encode(signature));
            log::info!(
                "Signed beacon signal: {}",
                bitcoin::consensus::encode::serialize_hex(session.pending_tx())
            );
            Ok(())
        }
        status => anyhow::bail!("session {} ended in status {}", session_id, status),
    }
}

/// Deterministic demo DID for a configured role name.
fn role_did(name: &str) -> String {
    format!("did:ex:{}", name.to_lowercase())
}

/// Pump every role's queue until the whole system goes quiet.
async fn settle(
    coordinator: &mut BeaconCoordinator,
    coordinator_inbox: &mut mpsc::Receiver<String>,
    nodes: &mut [Node],
) {
    loop {
        let mut handled = coordinator.process_pending(coordinator_inbox).await;
        for node in nodes.iter_mut() {
            handled += node.participant.process_pending(&mut node.inbox).await;
        }
        if handled == 0 {
            break;
        }
    }
}
