//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types and traits for
//! quick setup. Import everything with:
//!
//! ```rust,ignore
//! use peerconnect_lib::prelude::*;
//! ```
//!
//! ## What's Included
//!
//! - Core types: `PeerAddress`, descriptors and `ConnectMessage`
//! - Error types: `PeerConnectError`, `PeerConnectErrorCode`, `Result`
//! - Transport traits: `PeerTransport`, `TransportFactory`, `RequestHandler`
//! - Capabilities: `Capability`, `CapabilitySet`, `ExperimentalApi`
//! - Persistence: `KeyValueStore`, `MemoryStore`, `JsonFileStore`, `TrustStore`

// Core types
pub use crate::protocol::{
    ApiRequest, CapabilityDescriptor, Cip30Function, ConnectMessage, DAppDescriptor,
    ExperimentalEndpoint, WalletDescriptor,
};
pub use crate::PeerAddress;

// Error handling
pub use crate::errors::{PeerConnectError, PeerConnectErrorCode};
pub use crate::Result;

// Transport
pub use crate::transport::{
    handler_fn, PeerTransport, RequestHandler, TransportEvent, TransportFactory, TransportOptions,
};

// Capabilities
pub use crate::capability::{
    build_proxy, register_experimental_endpoint, Capability, CapabilityProxy, CapabilitySet,
    ExperimentalApi, TypeKind,
};

// Persistence
pub use crate::storage::{JsonFileStore, KeyValueStore, MemoryStore};
pub use crate::trust::TrustStore;

// Identicons
pub use crate::identicon::{identicon_seed, pairing_identicon};
