//! In-process peer network for end-to-end testing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};

use crate::transport::{PeerTransport, RequestHandler, TransportEvent, TransportFactory};
use crate::{PeerAddress, PeerConnectError, Result, TransportOptions};

/// Derive the address of an identity from its seed.
pub fn address_from_seed(seed: &str) -> PeerAddress {
    PeerAddress(hex::encode(Sha256::digest(seed.as_bytes())))
}

/// Generate a fresh random seed.
pub fn random_seed() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

struct Peer {
    address: PeerAddress,
    identifier: Option<PeerAddress>,
    handlers: Mutex<HashMap<String, Arc<dyn RequestHandler>>>,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    seen: Mutex<HashSet<PeerAddress>>,
    announced: AtomicBool,
    closed: AtomicBool,
}

impl Peer {
    // Peers meet in the swarm named by their identifier, or their own address.
    fn swarm(&self) -> &PeerAddress {
        self.identifier.as_ref().unwrap_or(&self.address)
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(sender) = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            let _ = sender.send(event);
        }
    }

    fn see(&self, other: &Peer) {
        let fresh = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(other.address.clone());
        if fresh {
            self.emit(TransportEvent::Seen(other.address.clone()));
        }
        if self.identifier.as_ref() == Some(&other.address) {
            self.emit(TransportEvent::Server);
        }
    }

    fn forget(&self, other: &PeerAddress) {
        let known = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(other);
        if known {
            self.emit(TransportEvent::Left(other.clone()));
        }
    }

    fn handler(&self, endpoint: &str) -> Option<Arc<dyn RequestHandler>> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
            .cloned()
    }
}

/// A simulated peer network.
///
/// Identities created here are addressed by `hex(sha256(seed))`. Peers sharing
/// a swarm (the configured identifier, or the peer's own address when it has
/// none) see each other; a peer whose identifier is another peer's address
/// receives [`TransportEvent::Server`] once both are online.
///
/// An identity joins the network when its event stream is taken, so handlers
/// registered right after creation are in place before anyone can call them.
/// Requests run on their own task; a handler that returns `None` (or a
/// missing endpoint) leaves the caller pending.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    peers: Arc<Mutex<HashMap<PeerAddress, Arc<Peer>>>>,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an identity without announcing it.
    pub fn create_transport(&self, options: TransportOptions) -> Arc<MemoryTransport> {
        let seed = options.seed.clone().unwrap_or_else(random_seed);
        let address = address_from_seed(&seed);
        let (sender, receiver) = mpsc::unbounded_channel();

        let peer = Arc::new(Peer {
            address: address.clone(),
            identifier: options.identifier.clone(),
            handlers: Mutex::new(HashMap::new()),
            events: Mutex::new(Some(sender)),
            seen: Mutex::new(HashSet::new()),
            announced: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let previous = self.lock().insert(address.clone(), peer.clone());
        if let Some(previous) = previous {
            self.shut(&previous);
        }

        #[cfg(feature = "tracing")]
        {
            if options.logging_enabled {
                tracing::debug!(%address, identifier = ?options.identifier, "memory transport created");
            }
        }

        Arc::new(MemoryTransport {
            network: self.clone(),
            peer,
            seed,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// Create an identity and announce it right away, buffering its events.
    pub fn connect(&self, options: TransportOptions) -> Arc<dyn PeerTransport> {
        let transport = self.create_transport(options);
        self.announce(&transport.peer);
        transport
    }

    /// Addresses of every online identity.
    pub fn online(&self) -> Vec<PeerAddress> {
        let mut online: Vec<PeerAddress> = self
            .lock()
            .values()
            .filter(|peer| peer.announced.load(Ordering::SeqCst))
            .map(|peer| peer.address.clone())
            .collect();
        online.sort();
        online
    }

    /// Whether an identity with `address` is online.
    pub fn is_online(&self, address: &PeerAddress) -> bool {
        self.lock()
            .get(address)
            .is_some_and(|peer| peer.announced.load(Ordering::SeqCst))
    }

    /// Drop an identity as if its process had vanished.
    pub fn kill(&self, address: &PeerAddress) {
        let peer = self.lock().remove(address);
        if let Some(peer) = peer {
            self.shut(&peer);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PeerAddress, Arc<Peer>>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn announce(&self, peer: &Arc<Peer>) {
        if peer.closed.load(Ordering::SeqCst) || peer.announced.swap(true, Ordering::SeqCst) {
            return;
        }
        peer.emit(TransportEvent::Connections);

        let neighbours: Vec<Arc<Peer>> = self
            .lock()
            .values()
            .filter(|other| {
                other.address != peer.address
                    && other.announced.load(Ordering::SeqCst)
                    && other.swarm() == peer.swarm()
            })
            .cloned()
            .collect();

        for other in neighbours {
            peer.see(&other);
            other.see(peer);
        }
    }

    fn shut(&self, peer: &Arc<Peer>) {
        if peer.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut peers = self.lock();
            if peers
                .get(&peer.address)
                .is_some_and(|current| Arc::ptr_eq(current, peer))
            {
                peers.remove(&peer.address);
            }
        }

        let others: Vec<Arc<Peer>> = self.lock().values().cloned().collect();
        for other in others {
            other.forget(&peer.address);
        }

        peer.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        peer.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn reachable(&self, from: &Peer, to: &PeerAddress) -> Result<Arc<Peer>> {
        let target = self
            .lock()
            .get(to)
            .filter(|peer| peer.announced.load(Ordering::SeqCst))
            .cloned()
            .ok_or_else(|| PeerConnectError::Transport(format!("peer {} is not reachable", to)))?;

        if target.swarm() != from.swarm() {
            return Err(PeerConnectError::Transport(format!(
                "peer {} is not in swarm {}",
                to,
                from.swarm()
            )));
        }
        Ok(target)
    }
}

impl TransportFactory for MemoryNetwork {
    fn create(&self, options: TransportOptions) -> Result<Arc<dyn PeerTransport>> {
        Ok(self.create_transport(options))
    }
}

/// One identity on a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: MemoryNetwork,
    peer: Arc<Peer>,
    seed: String,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    fn address(&self) -> PeerAddress {
        self.peer.address.clone()
    }

    fn seed(&self) -> String {
        self.seed.clone()
    }

    fn identifier(&self) -> Option<PeerAddress> {
        self.peer.identifier.clone()
    }

    fn events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        self.network.announce(&self.peer);
        Some(receiver)
    }

    fn register(&self, endpoint: &str, handler: Arc<dyn RequestHandler>) {
        if self.is_closed() {
            return;
        }
        self.peer
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(endpoint.to_string(), handler);
    }

    async fn rpc(&self, to: &PeerAddress, endpoint: &str, args: Value) -> Result<Value> {
        if self.is_closed() {
            return Err(PeerConnectError::Transport("transport is closed".into()));
        }
        let target = self.network.reachable(&self.peer, to)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        if let Some(handler) = target.handler(endpoint) {
            let from = self.address();
            tokio::spawn(async move {
                if let Some(reply) = handler.handle(from, args).await {
                    let _ = reply_tx.send(reply);
                }
            });
        }

        match reply_rx.await {
            Ok(reply) => Ok(reply),
            Err(_) => std::future::pending().await,
        }
    }

    fn clear_seen(&self) {
        self.peer
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn close(&self) {
        self.network.shut(&self.peer);
    }

    fn is_closed(&self) -> bool {
        self.peer.closed.load(Ordering::SeqCst)
    }
}
