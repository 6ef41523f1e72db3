//! Peer connect interactive layer.
//!
//! This crate runs the two ends of a peer connect pairing on top of the
//! primitives in `peerconnect-lib`:
//!
//! - [`DAppPeerConnect`] answers `connect`/`disconnect`/`api` requests, keeps
//!   the single connected wallet in a [`ConnectionSession`] and publishes the
//!   wallet's capabilities into a [`CapabilityRegistry`].
//! - [`WalletAgent`] reaches a dApp, pushes its capability descriptor and
//!   serves CIP-30 calls through a [`WalletApi`] implementation.
//!
//! Both sides can find each other again without exchanging addresses out of
//! band through short-lived discovery identities (see [`discovery`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use peerconnect_interactive::{DAppConfig, DAppPeerConnect};
//! use peerconnect_lib::DAppDescriptor;
//!
//! let config = DAppConfig::new(DAppDescriptor::new("ExampleDApp", "https://example"));
//! let dapp = DAppPeerConnect::builder(config, factory, store)
//!     .verifier(verifier)
//!     .start()
//!     .await?;
//! println!("scan me: {}", dapp.pairing_payload());
//! ```

use peerconnect_lib::PeerConnectError;

pub mod cip30;
pub mod config;
pub mod dapp;
pub mod discovery;
pub mod observer;
pub mod registry;
pub mod session;
pub mod wallet;

pub use cip30::WalletApi;
pub use config::{DAppConfig, WalletConfig};
pub use dapp::{DAppBuilder, DAppPeerConnect};
pub use discovery::{DAppDiscovery, DiscoveryHandoff, WalletDiscovery};
pub use observer::{
    ConnectionGrant, ConnectionVerifier, DAppObserver, NoopObserver, WalletObserver,
};
pub use registry::{CapabilityHandle, CapabilityRegistry, EnabledApi, MethodProxy};
pub use session::{
    ConnectDecision, ConnectionSession, DisconnectDecision, GrantOutcome, GrantTicket,
    SessionState,
};
pub use wallet::{WalletAgent, WalletBuilder};

/// Result type for interactive operations.
pub type Result<T> = std::result::Result<T, InteractiveError>;

#[derive(thiserror::Error, Debug)]
pub enum InteractiveError {
    #[error(transparent)]
    PeerConnect(#[from] PeerConnectError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("Wallet with name {0} is already injected.")]
    AlreadyInjected(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for InteractiveError {
    fn from(e: serde_json::Error) -> Self {
        InteractiveError::Serialization(e.to_string())
    }
}
