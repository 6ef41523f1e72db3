//! Transport contract consumed from the external peer-discovery/RPC layer.
//!
//! The core never manufactures identities or moves bytes itself: it asks a
//! [`TransportFactory`] for identities and talks through [`PeerTransport`].

mod traits;

pub use traits::{
    call, handler_fn, FnHandler, PeerTransport, RequestHandler, TransportEvent, TransportFactory,
};

use crate::PeerAddress;

/// Rendezvous services announced to when none are configured.
pub const DEFAULT_ANNOUNCE_ENDPOINTS: [&str; 5] = [
    "wss://tracker.openwebtorrent.com",
    "wss://dev.btt.cf-identity-wallet.metadata.dev.cf-deployments.org",
    "wss://tracker.files.fm:7073/announce",
    "ws://tracker.files.fm:7072/announce",
    "wss://tracker.openwebtorrent.com:443/announce",
];

/// Options for creating a transport identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportOptions {
    /// Remote address this identity should reach (`server` fires once it does).
    pub identifier: Option<PeerAddress>,
    /// Identity seed; the same seed always yields the same address.
    pub seed: Option<String>,
    /// Rendezvous service URLs, in announce order.
    pub announce: Vec<String>,
    /// Whether the transport should emit its own logs.
    pub logging_enabled: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            identifier: None,
            seed: None,
            announce: default_announce(),
            logging_enabled: false,
        }
    }
}

impl TransportOptions {
    /// Options with the given announce list (falls back to the defaults when empty).
    pub fn new(announce: Vec<String>) -> Self {
        let announce = if announce.is_empty() {
            default_announce()
        } else {
            announce
        };
        Self {
            announce,
            ..Self::default()
        }
    }

    /// Set the remote address to reach.
    pub fn with_identifier(mut self, identifier: PeerAddress) -> Self {
        self.identifier = Some(identifier);
        self
    }

    /// Set the identity seed.
    pub fn with_seed(mut self, seed: Option<String>) -> Self {
        self.seed = seed;
        self
    }

    /// Enable or disable transport logging.
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }
}

/// The default announce list as owned strings.
pub fn default_announce() -> Vec<String> {
    DEFAULT_ANNOUNCE_ENDPOINTS
        .iter()
        .map(|s| s.to_string())
        .collect()
}
