//! Configuration for both sides of a pairing.

use peerconnect_lib::transport::default_announce;
use peerconnect_lib::{DAppDescriptor, PeerAddress, TransportOptions};
use std::time::Duration;

/// How long [`shutdown_server`](crate::DAppPeerConnect::shutdown_server)
/// waits for the wallet to acknowledge the notice.
pub const DEFAULT_SHUTDOWN_NOTICE_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration of a [`DAppPeerConnect`](crate::DAppPeerConnect).
#[derive(Clone, Debug)]
pub struct DAppConfig {
    /// Descriptor sent to wallets; its address is filled in on start.
    pub dapp_info: DAppDescriptor,
    /// Pairing seed. Falls back to the persisted seed, then to a fresh one.
    pub seed: Option<String>,
    /// Wallet discovery address to reach on start, overriding the persisted one.
    pub discovery_address: Option<PeerAddress>,
    /// Rendezvous service URLs.
    pub announce: Vec<String>,
    pub logging_enabled: bool,
    /// Whether to look for a known wallet through its discovery identity.
    pub use_wallet_discovery: bool,
    pub shutdown_notice_timeout: Duration,
}

impl DAppConfig {
    pub fn new(dapp_info: DAppDescriptor) -> Self {
        Self {
            dapp_info,
            seed: None,
            discovery_address: None,
            announce: default_announce(),
            logging_enabled: false,
            use_wallet_discovery: false,
            shutdown_notice_timeout: DEFAULT_SHUTDOWN_NOTICE_TIMEOUT,
        }
    }

    pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
        self.seed = Some(seed.into());
        self
    }

    pub fn with_discovery_address(mut self, address: PeerAddress) -> Self {
        self.discovery_address = Some(address);
        self
    }

    pub fn with_announce(mut self, announce: Vec<String>) -> Self {
        self.announce = announce;
        self
    }

    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }

    pub fn with_wallet_discovery(mut self, enabled: bool) -> Self {
        self.use_wallet_discovery = enabled;
        self
    }

    pub fn with_shutdown_notice_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_notice_timeout = timeout;
        self
    }

    pub(crate) fn transport_options(&self) -> TransportOptions {
        TransportOptions::new(self.announce.clone()).with_logging(self.logging_enabled)
    }
}

/// Configuration of a [`WalletAgent`](crate::WalletAgent).
#[derive(Clone, Debug)]
pub struct WalletConfig {
    /// Seed of the pairing identities.
    pub seed: Option<String>,
    /// Seed of the discovery identity. Falls back to the persisted seed.
    pub discovery_seed: Option<String>,
    pub announce: Vec<String>,
    pub logging_enabled: bool,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            seed: None,
            discovery_seed: None,
            announce: default_announce(),
            logging_enabled: false,
        }
    }
}

impl WalletConfig {
    pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
        self.seed = Some(seed.into());
        self
    }

    pub fn with_discovery_seed(mut self, seed: impl Into<String>) -> Self {
        self.discovery_seed = Some(seed.into());
        self
    }

    pub fn with_announce(mut self, announce: Vec<String>) -> Self {
        self.announce = announce;
        self
    }

    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }

    pub(crate) fn transport_options(&self) -> TransportOptions {
        TransportOptions::new(self.announce.clone()).with_logging(self.logging_enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dapp_config_defaults() {
        let config = DAppConfig::new(DAppDescriptor::new("ExampleDApp", "https://example"));
        assert_eq!(config.announce, default_announce());
        assert!(!config.use_wallet_discovery);
        assert!(config.seed.is_none());
        assert_eq!(config.shutdown_notice_timeout, DEFAULT_SHUTDOWN_NOTICE_TIMEOUT);
    }

    #[test]
    fn empty_announce_uses_default_trackers() {
        let config = WalletConfig::default().with_announce(Vec::new());
        assert_eq!(config.transport_options().announce, default_announce());
    }
}
