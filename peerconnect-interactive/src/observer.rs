//! Callbacks into the embedding application.
//!
//! Every observer method has an empty default, so implementors only override
//! what they care about. Observers run inline on the task that produced the
//! event and should return quickly.

use async_trait::async_trait;
use peerconnect_lib::{ConnectMessage, PeerAddress, PeerConnectError, WalletDescriptor};

/// Outcome of a connection verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionGrant {
    pub granted: bool,
    /// Whether the wallet may reconnect later without being asked again.
    pub allow_auto_connect: bool,
}

impl ConnectionGrant {
    /// Grant this connection only.
    pub fn grant() -> Self {
        Self {
            granted: true,
            allow_auto_connect: false,
        }
    }

    /// Grant and remember the wallet for silent reconnection.
    pub fn grant_with_auto_connect() -> Self {
        Self {
            granted: true,
            allow_auto_connect: true,
        }
    }

    pub fn deny() -> Self {
        Self {
            granted: false,
            allow_auto_connect: false,
        }
    }
}

/// Decides whether a wallet may pair with the dApp.
///
/// Usually backed by a user prompt; it may take arbitrarily long.
#[async_trait]
pub trait ConnectionVerifier: Send + Sync {
    /// `wallet.address` is always filled in.
    async fn verify(&self, wallet: &WalletDescriptor) -> ConnectionGrant;
}

/// dApp-side notifications.
pub trait DAppObserver: Send + Sync {
    fn on_connect(&self, _address: &PeerAddress, _wallet: &WalletDescriptor) {}

    fn on_disconnect(&self, _address: &PeerAddress) {}

    /// A wallet's capability handle was published under `name`.
    fn on_api_inject(&self, _name: &str, _address: &PeerAddress) {}

    /// A capability handle was removed after its wallet went away.
    fn on_api_eject(&self, _name: &str, _address: &PeerAddress) {}
}

/// Wallet-side notifications.
pub trait WalletObserver: Send + Sync {
    /// The dApp answered `connect`; check `message.connected`.
    fn on_connect(&self, _message: &ConnectMessage) {}

    fn on_disconnect(&self, _message: &ConnectMessage) {}

    /// The dApp announced that it is shutting down.
    fn on_server_shutdown(&self, _message: &ConnectMessage) {}

    /// The dApp answered the capability advertisement.
    fn on_api_inject(&self, _message: &ConnectMessage) {}

    /// A pairing was dropped because the remote broke the protocol.
    fn on_session_aborted(&self, _dapp: &PeerAddress, _error: &PeerConnectError) {}
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl DAppObserver for NoopObserver {}

impl WalletObserver for NoopObserver {}
