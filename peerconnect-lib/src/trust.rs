//! Persisted trust and rendezvous records.
//!
//! All records live in a caller-supplied [`KeyValueStore`]. Every mutation is
//! a read-modify-write with no cross-process locking; a single in-process
//! writer is assumed.

use crate::storage::KeyValueStore;
use crate::{PeerAddress, Result};
use std::sync::Arc;

/// Storage keys used by the trust store.
pub mod keys {
    /// Seed of the dApp pairing identity.
    pub const DAPP_SEED: &str = "meerkat-dapp-seed";
    /// Seed of the discovery identity.
    pub const DISCOVERY_SEED: &str = "cardano-peer-discovery-id";
    /// Last-known address of the wallet's discovery identity.
    pub const WALLET_DISCOVERY_ADDRESS: &str = "cardano-wallet-discovery-address";
    /// JSON array of addresses allowed to reconnect without verification.
    pub const AUTO_CONNECT_IDS: &str = "cardano-peer-autoconnect-id";
}

/// Auto-connect set plus the seeds and addresses used for rendezvous.
#[derive(Clone)]
pub struct TrustStore {
    store: Arc<dyn KeyValueStore>,
}

impl TrustStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Every address in the auto-connect set, in insertion order.
    pub async fn auto_connect_ids(&self) -> Result<Vec<PeerAddress>> {
        match self.store.get(keys::AUTO_CONNECT_IDS).await? {
            Some(text) => Ok(serde_json::from_str(&text)?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn is_auto_connect(&self, address: &PeerAddress) -> Result<bool> {
        Ok(self.auto_connect_ids().await?.contains(address))
    }

    /// Add `address` to the auto-connect set. Returns `false` if it was already there.
    pub async fn add_auto_connect(&self, address: &PeerAddress) -> Result<bool> {
        let mut ids = self.auto_connect_ids().await?;
        if ids.contains(address) {
            return Ok(false);
        }
        ids.push(address.clone());
        self.save_auto_connect_ids(&ids).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(%address, "added auto-connect address");
        Ok(true)
    }

    /// Remove one occurrence of `address`. Returns whether anything was removed.
    pub async fn remove_auto_connect(&self, address: &PeerAddress) -> Result<bool> {
        let mut ids = self.auto_connect_ids().await?;
        match ids.iter().position(|id| id == address) {
            Some(index) => {
                ids.remove(index);
                self.save_auto_connect_ids(&ids).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Empty the auto-connect set.
    pub async fn reset_auto_connect(&self) -> Result<()> {
        self.save_auto_connect_ids(&[]).await
    }

    async fn save_auto_connect_ids(&self, ids: &[PeerAddress]) -> Result<()> {
        let text = serde_json::to_string(ids)?;
        self.store.set(keys::AUTO_CONNECT_IDS, &text).await?;
        Ok(())
    }

    pub async fn dapp_seed(&self) -> Result<Option<String>> {
        Ok(self.store.get(keys::DAPP_SEED).await?)
    }

    pub async fn save_dapp_seed(&self, seed: &str) -> Result<()> {
        Ok(self.store.set(keys::DAPP_SEED, seed).await?)
    }

    pub async fn discovery_seed(&self) -> Result<Option<String>> {
        Ok(self.store.get(keys::DISCOVERY_SEED).await?)
    }

    pub async fn save_discovery_seed(&self, seed: &str) -> Result<()> {
        Ok(self.store.set(keys::DISCOVERY_SEED, seed).await?)
    }

    pub async fn wallet_discovery_address(&self) -> Result<Option<PeerAddress>> {
        Ok(self
            .store
            .get(keys::WALLET_DISCOVERY_ADDRESS)
            .await?
            .map(PeerAddress::from))
    }

    pub async fn save_wallet_discovery_address(&self, address: &PeerAddress) -> Result<()> {
        Ok(self
            .store
            .set(keys::WALLET_DISCOVERY_ADDRESS, address.as_str())
            .await?)
    }
}
