//! Message transport seam.
//!
//! The protocols only require authenticated delivery of envelopes where the
//! `from` field cannot be spoofed; the real end-to-end-encrypted transport
//! lives outside this crate. [`LocalRouter`] is the in-memory
//! implementation used by tests and in-process deployments: one bounded
//! FIFO queue per registered endpoint, JSON on the wire so the codec path
//! is exercised end to end.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::messages::Envelope;
use crate::ProtocolError;

/// Queue depth per registered endpoint.
const ENDPOINT_QUEUE: usize = 64;

/// Authenticated envelope delivery to a peer endpoint.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<(), ProtocolError>;
}

/// In-memory router: DID → per-endpoint FIFO queue of wire-encoded messages.
#[derive(Clone, Default)]
pub struct LocalRouter {
    endpoints: Arc<Mutex<HashMap<String, mpsc::Sender<String>>>>,
}

impl LocalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint and hand back its inbound queue. Re-registering
    /// a DID replaces the previous queue.
    pub fn register(&self, did: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(ENDPOINT_QUEUE);
        self.endpoints
            .lock()
            .expect("router lock poisoned")
            .insert(did.to_string(), tx);
        rx
    }

    /// Remove an endpoint; subsequent sends to it fail.
    pub fn unregister(&self, did: &str) {
        self.endpoints
            .lock()
            .expect("router lock poisoned")
            .remove(did);
    }
}

#[async_trait]
impl MessageSender for LocalRouter {
    async fn send(&self, envelope: Envelope) -> Result<(), ProtocolError> {
        let raw = envelope.encode()?;
        let queue = {
            let endpoints = self.endpoints.lock().expect("router lock poisoned");
            endpoints.get(&envelope.to).cloned()
        };

        let queue = queue.ok_or_else(|| {
            ProtocolError::Transport(format!("no endpoint registered for {}", envelope.to))
        })?;

        queue
            .send(raw)
            .await
            .map_err(|_| ProtocolError::Transport(format!("endpoint {} is gone", envelope.to)))
    }
}
