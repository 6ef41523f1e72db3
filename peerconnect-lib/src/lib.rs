//! Peer connect library.
//!
//! Protocol primitives shared by the dApp and wallet sides of a peer connect
//! pairing. The crate stays stateless apart from the trust store and delegates
//! transport and persistence to callers through trait-based dependency
//! injection.
//!
//! # Features
//!
//! - **Wire payloads**: descriptors, connect messages and capability descriptors
//! - **Capability codec**: advertise capabilities unknown at compile time and
//!   build remote proxies for them
//! - **Transport abstraction**: the narrow contract consumed from the external
//!   peer-discovery/RPC transport
//! - **Trust store**: persisted auto-connect set and discovery rendezvous records
//!
//! # Example
//!
//! ```
//! use peerconnect_lib::capability::{encode, serialize_type_mapping, deserialize_type_mapping, Capability, CapabilitySet, TypeKind};
//!
//! let set = CapabilitySet::new();
//! set.insert("ping", Capability::function(|_| Ok("pong".into())));
//! set.insert("version", Capability::value(3));
//!
//! let text = serialize_type_mapping(&encode(&set)).unwrap();
//! let mapping = deserialize_type_mapping(&text).unwrap();
//! assert_eq!(mapping.get("ping").unwrap().value_type, TypeKind::Function);
//! assert_eq!(mapping.get("version").unwrap().value, Some(3.into()));
//! ```

pub mod capability;
pub mod errors;
pub mod identicon;
pub mod prelude;
pub mod protocol;
pub mod storage;
pub mod transport;
pub mod trust;

/// In-process transport for integration testing.
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use errors::{PeerConnectError, PeerConnectErrorCode};
pub use protocol::{
    ApiRequest, CapabilityDescriptor, Cbor, Cip30Function, ConnectMessage, DAppDescriptor,
    DataSignature, DiscoveryRequest, ExperimentalEndpoint, Paginate, SetDiscoveryRequest,
    WalletDescriptor,
};
pub use transport::{
    handler_fn, PeerTransport, RequestHandler, TransportEvent, TransportFactory,
    TransportOptions,
};
pub use trust::TrustStore;

/// Common result alias for peer connect operations.
pub type Result<T> = std::result::Result<T, PeerConnectError>;

/// Opaque transport address of a peer.
///
/// Addresses are produced by the transport from an identity seed; this crate
/// never derives them itself.
///
/// # Example
///
/// ```
/// use peerconnect_lib::PeerAddress;
///
/// let address: PeerAddress = "8f2a...".into();
/// assert_eq!(address.as_str(), "8f2a...");
/// assert!(!address.is_empty());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(pub String);

impl PeerAddress {
    /// Create a new address from a string.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if the address is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for PeerAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for PeerAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for PeerAddress {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PeerAddress {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
