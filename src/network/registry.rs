//! Peer Registry
//!
//! Table of logged-in peers, indexed both by identity and by endpoint.
//! Both indexes are updated under one lock so they never disagree.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::network::channel::{InboxSender, Inbound, ReliableChannel};

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Another peer already uses this identity.
    #[error("Identity already registered: {0}")]
    DuplicateIdentity(String),

    /// The endpoint is already bound to another identity.
    #[error("Endpoint already registered: {0}")]
    EndpointInUse(SocketAddr),

    /// No peer with this identity.
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
}

/// Result of delivering one message to one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BroadcastOutcome {
    /// Acknowledged by the peer.
    Delivered,
    /// Retry budget exhausted; the peer stays registered.
    Failed,
    /// Channel is dead; the peer has been unregistered.
    Removed,
}

/// A registered peer. Cheap to clone.
#[derive(Clone)]
pub struct Peer {
    identity: String,
    endpoint: SocketAddr,
    channel: Arc<Mutex<ReliableChannel>>,
    inbox: InboxSender,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("identity", &self.identity)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl Peer {
    /// Create a peer record around an existing channel.
    pub fn new(
        identity: impl Into<String>,
        endpoint: SocketAddr,
        channel: Arc<Mutex<ReliableChannel>>,
        inbox: InboxSender,
    ) -> Self {
        Self {
            identity: identity.into(),
            endpoint,
            channel,
            inbox,
        }
    }

    /// Login name.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Remote endpoint.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Reliable channel to this peer.
    pub fn channel(&self) -> &Arc<Mutex<ReliableChannel>> {
        &self.channel
    }

    /// Hand a raw datagram to the peer's channel.
    ///
    /// Returns `false` if the inbox is full or closed; the datagram is then
    /// dropped and the remote will retransmit.
    pub fn forward(&self, inbound: Inbound) -> bool {
        match self.inbox.try_send(inbound) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Inbox for {} full, dropping datagram", self.identity);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Send one message and classify the result.
    async fn deliver(&self, payload: &[u8]) -> BroadcastOutcome {
        let mut channel = self.channel.lock().await;
        match channel.send(payload).await {
            Ok(()) => BroadcastOutcome::Delivered,
            Err(e) if e.is_fatal() => {
                warn!("Dropping peer {}: {}", self.identity, e);
                BroadcastOutcome::Removed
            }
            Err(e) => {
                warn!("Delivery to {} failed: {}", self.identity, e);
                BroadcastOutcome::Failed
            }
        }
    }
}

struct Entry {
    peer: Peer,
    last_active: Instant,
}

#[derive(Default)]
struct RegistryInner {
    by_identity: HashMap<String, Entry>,
    by_endpoint: HashMap<SocketAddr, String>,
}

/// Registered peers.
#[derive(Default)]
pub struct PeerRegistry {
    inner: RwLock<RegistryInner>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer.
    pub async fn register(&self, peer: Peer) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;

        if inner.by_identity.contains_key(&peer.identity) {
            return Err(RegistryError::DuplicateIdentity(peer.identity.clone()));
        }
        if inner.by_endpoint.contains_key(&peer.endpoint) {
            return Err(RegistryError::EndpointInUse(peer.endpoint));
        }

        info!("Registered peer {} at {}", peer.identity, peer.endpoint);
        inner.by_endpoint.insert(peer.endpoint, peer.identity.clone());
        inner.by_identity.insert(
            peer.identity.clone(),
            Entry {
                peer,
                last_active: Instant::now(),
            },
        );
        Ok(())
    }

    /// Remove a peer. Removing an unknown identity is a no-op.
    pub async fn unregister(&self, identity: &str) -> Option<Peer> {
        let mut inner = self.inner.write().await;
        let entry = inner.by_identity.remove(identity)?;
        inner.by_endpoint.remove(&entry.peer.endpoint);

        info!("Unregistered peer {}", identity);
        Some(entry.peer)
    }

    /// Find a peer by identity.
    pub async fn lookup_by_identity(&self, identity: &str) -> Option<Peer> {
        let inner = self.inner.read().await;
        inner.by_identity.get(identity).map(|e| e.peer.clone())
    }

    /// Find a peer by endpoint.
    pub async fn lookup_by_endpoint(&self, endpoint: SocketAddr) -> Option<Peer> {
        let inner = self.inner.read().await;
        let identity = inner.by_endpoint.get(&endpoint)?;
        inner.by_identity.get(identity).map(|e| e.peer.clone())
    }

    /// Whether `identity` is registered.
    pub async fn contains(&self, identity: &str) -> bool {
        self.inner.read().await.by_identity.contains_key(identity)
    }

    /// Identities of all registered peers.
    pub async fn identities(&self) -> Vec<String> {
        self.inner.read().await.by_identity.keys().cloned().collect()
    }

    /// Number of registered peers.
    pub async fn len(&self) -> usize {
        self.inner.read().await.by_identity.len()
    }

    /// Whether no peer is registered.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Record activity for a peer.
    pub async fn touch(&self, identity: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.by_identity.get_mut(identity) {
            entry.last_active = Instant::now();
        }
    }

    /// Peers with no activity since `cutoff`.
    pub async fn idle_since(&self, cutoff: Instant) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .by_identity
            .iter()
            .filter(|(_, e)| e.last_active < cutoff)
            .map(|(identity, _)| identity.clone())
            .collect()
    }

    /// Reliably send `payload` to one peer.
    ///
    /// A fatal channel error unregisters the peer.
    pub async fn send_to(&self, identity: &str, payload: &[u8]) -> Result<BroadcastOutcome, RegistryError> {
        let peer = self
            .lookup_by_identity(identity)
            .await
            .ok_or_else(|| RegistryError::UnknownPeer(identity.to_string()))?;

        let outcome = peer.deliver(payload).await;
        if outcome == BroadcastOutcome::Removed {
            self.unregister(identity).await;
        }
        Ok(outcome)
    }

    /// Reliably send `payload` to every peer except `exclude`.
    ///
    /// Sends run concurrently. Peers whose channel fails fatally are
    /// unregistered and reported as [`BroadcastOutcome::Removed`].
    pub async fn broadcast(&self, payload: &[u8], exclude: Option<&str>) -> Vec<(String, BroadcastOutcome)> {
        let targets: Vec<Peer> = {
            let inner = self.inner.read().await;
            inner
                .by_identity
                .values()
                .filter(|e| Some(e.peer.identity.as_str()) != exclude)
                .map(|e| e.peer.clone())
                .collect()
        };

        let outcomes = join_all(targets.iter().map(|peer| async move {
            (peer.identity.clone(), peer.deliver(payload).await)
        }))
        .await;

        for (identity, outcome) in &outcomes {
            if *outcome == BroadcastOutcome::Removed {
                self.unregister(identity).await;
            }
        }

        outcomes
    }
}
