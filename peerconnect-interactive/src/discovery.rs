//! Discovery rendezvous.
//!
//! A wallet that paired with a dApp once leaves a second, long-lived address
//! behind: the address of its discovery identity, derived from a persisted
//! seed. When the dApp comes back it creates its own short-lived identity
//! pointed at that address, waits for the `server` event and sends
//! `connect {dappAddress}`. The wallet answers by opening a regular pairing to
//! the dApp's real address.
//!
//! Either discovery identity is closed as soon as its owner reaches
//! Connected, and a fresh one is created after the pairing ends.

use crate::Result;
use async_trait::async_trait;
use peerconnect_lib::protocol::endpoints;
use peerconnect_lib::transport::call;
use peerconnect_lib::{
    handler_fn, DiscoveryRequest, PeerAddress, PeerTransport, TransportEvent, TransportFactory,
    TransportOptions, TrustStore,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives dApp addresses learned through the wallet's discovery identity.
#[async_trait]
pub trait DiscoveryHandoff: Send + Sync {
    /// Start pairing with the dApp at `dapp`. Returns whether the request was taken.
    async fn dapp_discovered(&self, dapp: PeerAddress) -> bool;
}

/// Wallet-side discovery identity.
pub struct WalletDiscovery {
    transport: Arc<dyn PeerTransport>,
}

impl WalletDiscovery {
    /// Create the identity from `seed`, or from the persisted discovery seed.
    ///
    /// The seed in use is persisted so the address survives restarts.
    pub async fn start(
        factory: &dyn TransportFactory,
        trust: &TrustStore,
        options: TransportOptions,
        seed: Option<String>,
        handoff: Arc<dyn DiscoveryHandoff>,
    ) -> Result<Self> {
        let seed = match seed {
            Some(seed) => Some(seed),
            None => trust.discovery_seed().await?,
        };

        let transport = factory.create(options.with_seed(seed))?;
        trust.save_discovery_seed(&transport.seed()).await?;
        debug!(address = %transport.address(), "wallet discovery identity created");

        transport.clear_seen();
        transport.register(
            endpoints::CONNECT,
            handler_fn(move |from: PeerAddress, args: Value| {
                let handoff = handoff.clone();
                async move {
                    let request: DiscoveryRequest = match serde_json::from_value(args) {
                        Ok(request) => request,
                        Err(err) => {
                            warn!(%from, "malformed discovery request: {err}");
                            return Some(Value::Bool(false));
                        }
                    };
                    debug!(dapp = %request.dapp_address, "dApp is connecting to discovery identity");
                    Some(Value::Bool(handoff.dapp_discovered(request.dapp_address).await))
                }
            }),
        );

        // Nothing to react to; dropping the stream only announces the identity.
        drop(transport.events());

        Ok(Self { transport })
    }

    pub fn address(&self) -> PeerAddress {
        self.transport.address()
    }

    pub fn seed(&self) -> String {
        self.transport.seed()
    }

    pub fn clear_seen(&self) {
        self.transport.clear_seen();
    }

    pub fn close(&self) {
        debug!(address = %self.transport.address(), "closing wallet discovery identity");
        self.transport.close();
    }
}

/// dApp-side discovery identity.
pub struct DAppDiscovery {
    transport: Arc<dyn PeerTransport>,
    wallet: PeerAddress,
    task: JoinHandle<()>,
}

impl DAppDiscovery {
    /// Point a new identity at `wallet` and ask it, once reachable, to pair
    /// with `dapp_address`.
    pub async fn start(
        factory: &dyn TransportFactory,
        trust: &TrustStore,
        options: TransportOptions,
        wallet: PeerAddress,
        dapp_address: PeerAddress,
    ) -> Result<Self> {
        let seed = trust.discovery_seed().await?;
        let transport = factory.create(
            options
                .with_identifier(wallet.clone())
                .with_seed(seed),
        )?;
        trust.save_discovery_seed(&transport.seed()).await?;
        debug!(
            address = %transport.address(),
            %wallet,
            "dApp discovery identity created"
        );

        let mut events = transport.events().ok_or_else(|| {
            crate::InteractiveError::Transport("discovery event stream already taken".into())
        })?;

        let pump_transport = transport.clone();
        let target = wallet.clone();
        let task = tokio::spawn(async move {
            let mut asked = false;
            while let Some(event) = events.recv().await {
                if event != TransportEvent::Server || asked {
                    continue;
                }
                asked = true;

                debug!(wallet = %target, "wallet discovery reachable, requesting pairing");
                let request = DiscoveryRequest {
                    dapp_address: dapp_address.clone(),
                };
                match call::<_, bool>(
                    pump_transport.as_ref(),
                    &target,
                    endpoints::CONNECT,
                    &request,
                )
                .await
                {
                    Ok(accepted) => info!(wallet = %target, accepted, "discovery handoff answered"),
                    Err(err) => warn!(wallet = %target, "discovery handoff failed: {err}"),
                }
            }
        });

        Ok(Self {
            transport,
            wallet,
            task,
        })
    }

    pub fn address(&self) -> PeerAddress {
        self.transport.address()
    }

    /// Discovery address of the wallet being looked for.
    pub fn wallet(&self) -> &PeerAddress {
        &self.wallet
    }

    pub fn close(&self) {
        debug!(address = %self.transport.address(), "closing dApp discovery identity");
        self.task.abort();
        self.transport.close();
    }
}

impl Drop for DAppDiscovery {
    fn drop(&mut self) {
        self.task.abort();
    }
}
