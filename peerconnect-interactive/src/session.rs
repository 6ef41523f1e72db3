//! Handshake state machine of the responding side.
//!
//! [`ConnectionSession`] only decides; it never talks to the transport. The
//! coordinator asks it what to do with each request, performs the I/O and
//! reports verification results back through a [`GrantTicket`].
//!
//! ```text
//!            connect(A)               grant
//!   Idle ───────────────▶ AwaitingGrant ─────▶ Connected(A)
//!    ▲                        │ deny                │
//!    └────────────────────────┘                     │ disconnect(A) / left(A)
//!    ▲                                              │
//!    └──────────────────────────────────────────────┘
//! ```
//!
//! Every teardown bumps an epoch. A ticket issued in an earlier epoch resolves
//! as [`GrantOutcome::Stale`], so a verification finishing after its session
//! was torn down has no effect.

use peerconnect_lib::PeerAddress;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingGrant,
    Connected,
    Closed,
}

/// Proof that a verification was started; redeem it with
/// [`ConnectionSession::resolve`].
#[derive(Debug)]
pub struct GrantTicket {
    peer: PeerAddress,
    epoch: u64,
}

impl GrantTicket {
    /// Peer under verification.
    pub fn peer(&self) -> &PeerAddress {
        &self.peer
    }
}

/// What to do with a `connect` request.
#[derive(Debug)]
pub enum ConnectDecision {
    /// Run verification, then resolve the ticket.
    Verify(GrantTicket),
    /// The requester already is the connected peer.
    AlreadyConnected,
    /// Another peer is connected or under verification.
    Conflict,
    /// The requester is already under verification; wait for the outcome
    /// and ask again.
    Wait(watch::Receiver<u64>),
}

/// Result of redeeming a [`GrantTicket`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrantOutcome {
    Connected,
    Denied,
    /// The session was torn down meanwhile; send nothing.
    Stale,
}

/// What to do with a `disconnect` request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectDecision {
    /// The connected peer left; the session is idle again.
    Accepted,
    /// A peer other than the connected one asked.
    Unregistered,
    NoneConnected,
}

struct Inner {
    state: SessionState,
    peer: Option<PeerAddress>,
    epoch: u64,
}

/// Single-tenant pairing session.
pub struct ConnectionSession {
    inner: Mutex<Inner>,
    // Bumped on every resolution or teardown to wake waiting requests.
    changes: watch::Sender<u64>,
}

impl Default for ConnectionSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionSession {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                peer: None,
                epoch: 0,
            }),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// The connected peer, if any.
    pub fn connected_peer(&self) -> Option<PeerAddress> {
        let inner = self.lock();
        match inner.state {
            SessionState::Connected => inner.peer.clone(),
            _ => None,
        }
    }

    /// The peer under verification, if any.
    pub fn pending_peer(&self) -> Option<PeerAddress> {
        let inner = self.lock();
        match inner.state {
            SessionState::AwaitingGrant => inner.peer.clone(),
            _ => None,
        }
    }

    /// Decide how to answer a `connect` from `from`.
    pub fn begin_connect(&self, from: &PeerAddress) -> ConnectDecision {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Idle => {
                inner.state = SessionState::AwaitingGrant;
                inner.peer = Some(from.clone());
                ConnectDecision::Verify(GrantTicket {
                    peer: from.clone(),
                    epoch: inner.epoch,
                })
            }
            SessionState::AwaitingGrant if inner.peer.as_ref() == Some(from) => {
                ConnectDecision::Wait(self.changes.subscribe())
            }
            SessionState::Connected if inner.peer.as_ref() == Some(from) => {
                ConnectDecision::AlreadyConnected
            }
            SessionState::AwaitingGrant | SessionState::Connected | SessionState::Closed => {
                ConnectDecision::Conflict
            }
        }
    }

    /// Apply a verification result.
    pub fn resolve(&self, ticket: GrantTicket, granted: bool) -> GrantOutcome {
        let mut inner = self.lock();
        let current = inner.state == SessionState::AwaitingGrant
            && inner.epoch == ticket.epoch
            && inner.peer.as_ref() == Some(&ticket.peer);
        if !current {
            return GrantOutcome::Stale;
        }

        let outcome = if granted {
            inner.state = SessionState::Connected;
            GrantOutcome::Connected
        } else {
            inner.state = SessionState::Idle;
            inner.peer = None;
            GrantOutcome::Denied
        };
        drop(inner);
        self.notify();
        outcome
    }

    /// Decide how to answer a `disconnect` from `from`.
    pub fn disconnect(&self, from: &PeerAddress) -> DisconnectDecision {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Connected if inner.peer.as_ref() == Some(from) => {
                inner.state = SessionState::Idle;
                inner.peer = None;
                inner.epoch += 1;
                drop(inner);
                self.notify();
                DisconnectDecision::Accepted
            }
            SessionState::Connected => DisconnectDecision::Unregistered,
            _ => DisconnectDecision::NoneConnected,
        }
    }

    /// Forget `address` if it is connected or under verification.
    ///
    /// Returns the state the session was in, or `None` when `address` was not
    /// part of it.
    pub fn teardown(&self, address: &PeerAddress) -> Option<SessionState> {
        let mut inner = self.lock();
        let previous = inner.state;
        let involved = matches!(
            previous,
            SessionState::Connected | SessionState::AwaitingGrant
        ) && inner.peer.as_ref() == Some(address);
        if !involved {
            return None;
        }

        inner.state = SessionState::Idle;
        inner.peer = None;
        inner.epoch += 1;
        drop(inner);
        self.notify();
        Some(previous)
    }

    /// Close the session for good, returning the peer that was connected.
    pub fn close(&self) -> Option<PeerAddress> {
        let mut inner = self.lock();
        let connected = match inner.state {
            SessionState::Connected => inner.peer.take(),
            _ => None,
        };
        inner.state = SessionState::Closed;
        inner.peer = None;
        inner.epoch += 1;
        drop(inner);
        self.notify();
        connected
    }
}
