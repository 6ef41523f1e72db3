//! dApp side of a pairing.
//!
//! [`DAppPeerConnect`] owns one long-lived transport identity and answers the
//! handshake endpoints on it. At most one wallet is connected at a time; the
//! [`ConnectionSession`] decides every request and this module performs the
//! I/O around those decisions.

use crate::config::DAppConfig;
use crate::discovery::DAppDiscovery;
use crate::observer::{ConnectionGrant, ConnectionVerifier, DAppObserver, NoopObserver};
use crate::registry::{CapabilityHandle, CapabilityRegistry};
use crate::session::{
    ConnectDecision, ConnectionSession, DisconnectDecision, GrantOutcome, GrantTicket,
    SessionState,
};
use crate::{InteractiveError, Result};
use peerconnect_lib::identicon::pairing_identicon;
use peerconnect_lib::protocol::endpoints;
use peerconnect_lib::storage::KeyValueStore;
use peerconnect_lib::{
    handler_fn, ApiRequest, ConnectMessage, DAppDescriptor, PeerAddress, PeerTransport,
    SetDiscoveryRequest, TransportEvent, TransportFactory, TrustStore, WalletDescriptor,
};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Builder for [`DAppPeerConnect`].
pub struct DAppBuilder {
    config: DAppConfig,
    factory: Arc<dyn TransportFactory>,
    store: Arc<dyn KeyValueStore>,
    verifier: Option<Arc<dyn ConnectionVerifier>>,
    observer: Arc<dyn DAppObserver>,
    registry: CapabilityRegistry,
}

impl DAppBuilder {
    /// Ask `verifier` before accepting a wallet. Without one every wallet is accepted.
    pub fn verifier(mut self, verifier: Arc<dyn ConnectionVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn DAppObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Publish wallets into an existing namespace instead of a private one.
    pub fn registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Create the pairing identity and start serving.
    pub async fn start(self) -> Result<DAppPeerConnect> {
        let trust = TrustStore::new(self.store);

        let seed = match self.config.seed.clone() {
            Some(seed) => Some(seed),
            None => trust.dapp_seed().await?,
        };
        let transport = self
            .factory
            .create(self.config.transport_options().with_seed(seed))?;
        trust.save_dapp_seed(&transport.seed()).await?;

        let address = transport.address();
        info!(%address, "dApp pairing address generated");
        let dapp_info = self.config.dapp_info.clone().with_address(address);

        let inner = Arc::new(DAppInner {
            config: self.config,
            dapp_info,
            transport: transport.clone(),
            factory: self.factory,
            trust,
            session: ConnectionSession::new(),
            verifier: self.verifier,
            observer: self.observer,
            registry: self.registry,
            discovery: tokio::sync::Mutex::new(None),
            identicon: Mutex::new(None),
            pump: Mutex::new(None),
        });

        serve(&inner, endpoints::CONNECT, DAppInner::handle_connect);
        serve(&inner, endpoints::DISCONNECT, DAppInner::handle_disconnect);
        serve(&inner, endpoints::API, DAppInner::handle_api);
        serve(&inner, endpoints::SET_DISCOVERY, DAppInner::handle_set_discovery);

        let mut events = transport.events().ok_or_else(|| {
            InteractiveError::Transport("pairing event stream already taken".into())
        })?;
        let weak = Arc::downgrade(&inner);
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.on_event(event).await;
            }
        });
        *inner.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(pump);

        inner.arm_discovery().await;

        Ok(DAppPeerConnect { inner })
    }
}

/// The dApp end of a pairing. Clones share the same identity.
#[derive(Clone)]
pub struct DAppPeerConnect {
    inner: Arc<DAppInner>,
}

impl DAppPeerConnect {
    pub fn builder(
        config: DAppConfig,
        factory: Arc<dyn TransportFactory>,
        store: Arc<dyn KeyValueStore>,
    ) -> DAppBuilder {
        DAppBuilder {
            config,
            factory,
            store,
            verifier: None,
            observer: Arc::new(NoopObserver),
            registry: CapabilityRegistry::new(),
        }
    }

    pub fn address(&self) -> PeerAddress {
        self.inner.transport.address()
    }

    /// Seed of the pairing identity.
    pub fn seed(&self) -> String {
        self.inner.transport.seed()
    }

    /// Descriptor sent to wallets, address included.
    pub fn descriptor(&self) -> &DAppDescriptor {
        &self.inner.dapp_info
    }

    pub fn connected_wallet(&self) -> Option<PeerAddress> {
        self.inner.session.connected_peer()
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.session.state()
    }

    /// Identicon input of the current pairing.
    pub fn identicon(&self) -> Option<String> {
        self.inner
            .identicon
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Namespace holding the published wallets.
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.inner.registry
    }

    pub fn trust(&self) -> &TrustStore {
        &self.inner.trust
    }

    /// Content of the pairing QR code: `"{address}:meerkat:{unix_millis}"`.
    pub fn pairing_payload(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        format!("{}:meerkat:{}", self.address(), millis)
    }

    /// Drop the connected wallet and tell it that the server is closing.
    ///
    /// Does nothing without a connected wallet. The wallet is torn down
    /// locally before the notice goes out, so a departure caused by the
    /// notice finds nothing left to tear down and discovery stays down. The
    /// acknowledgement is awaited for at most
    /// [`DAppConfig::shutdown_notice_timeout`]; a wallet that never answers
    /// is not an error, a failed delivery is.
    pub async fn shutdown_server(&self) -> Result<()> {
        let inner = &self.inner;
        let Some(wallet) = inner.session.connected_peer() else {
            debug!("shutdown requested without a connected wallet");
            return Ok(());
        };

        info!(%wallet, "shutting down server");
        let notice = serde_json::to_value(ConnectMessage::shutdown(&inner.dapp_info))?;

        // The server is going away, so discovery stays down.
        if inner.session.teardown(&wallet) == Some(SessionState::Connected) {
            inner.finish_teardown(&wallet, false).await;
        }

        let sent = tokio::time::timeout(
            inner.config.shutdown_notice_timeout,
            inner.transport.rpc(&wallet, endpoints::SHUTDOWN, notice),
        )
        .await;
        match sent {
            Ok(Ok(_)) => {
                debug!(%wallet, "wallet acknowledged shutdown");
                Ok(())
            }
            Ok(Err(err)) => {
                warn!(%wallet, "failed to notify wallet of shutdown: {err}");
                Err(err.into())
            }
            Err(_) => {
                debug!(%wallet, "wallet did not acknowledge shutdown");
                Ok(())
            }
        }
    }

    /// Stop serving for good.
    ///
    /// The connected wallet, if any, is released without notice; call
    /// [`shutdown_server`](Self::shutdown_server) first to inform it.
    pub async fn close(&self) {
        let inner = &self.inner;
        if let Some(wallet) = inner.session.close() {
            inner.finish_teardown(&wallet, false).await;
        }
        if let Some(discovery) = inner.discovery.lock().await.take() {
            discovery.close();
        }
        if let Some(pump) = inner
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pump.abort();
        }
        inner.transport.close();
        info!(address = %inner.transport.address(), "dApp closed");
    }
}

struct DAppInner {
    config: DAppConfig,
    dapp_info: DAppDescriptor,
    transport: Arc<dyn PeerTransport>,
    factory: Arc<dyn TransportFactory>,
    trust: TrustStore,
    session: ConnectionSession,
    verifier: Option<Arc<dyn ConnectionVerifier>>,
    observer: Arc<dyn DAppObserver>,
    registry: CapabilityRegistry,
    discovery: tokio::sync::Mutex<Option<DAppDiscovery>>,
    identicon: Mutex<Option<String>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

// Handlers hold the coordinator weakly; the transport owns the handlers.
fn serve<F, Fut>(inner: &Arc<DAppInner>, endpoint: &str, handle: F)
where
    F: Fn(Arc<DAppInner>, PeerAddress, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Value>> + Send + 'static,
{
    let weak: Weak<DAppInner> = Arc::downgrade(inner);
    let handle = Arc::new(handle);
    inner.transport.register(
        endpoint,
        handler_fn(move |from: PeerAddress, args: Value| {
            let pending = weak.upgrade().map(|inner| handle(inner, from, args));
            async move {
                match pending {
                    Some(pending) => pending.await,
                    None => None,
                }
            }
        }),
    );
}

fn reply<T: Serialize>(payload: &T) -> Option<Value> {
    match serde_json::to_value(payload) {
        Ok(value) => Some(value),
        Err(err) => {
            error!("failed to encode reply: {err}");
            None
        }
    }
}

impl DAppInner {
    #[tracing::instrument(skip_all, fields(from = %from))]
    async fn handle_connect(self: Arc<Self>, from: PeerAddress, args: Value) -> Option<Value> {
        let mut wallet: WalletDescriptor = match serde_json::from_value(args) {
            Ok(wallet) => wallet,
            Err(err) => {
                warn!("malformed connect request: {err}");
                return None;
            }
        };
        wallet.address = Some(from.clone());

        loop {
            match self.session.begin_connect(&from) {
                ConnectDecision::Verify(ticket) => return self.verify(ticket, wallet).await,
                ConnectDecision::AlreadyConnected => {
                    info!("connection has already been established");
                    return reply(&ConnectMessage::already_connected(&self.dapp_info, &from));
                }
                ConnectDecision::Conflict => {
                    info!("another wallet is already connected");
                    return reply(&ConnectMessage::conflict(&self.dapp_info, &from));
                }
                ConnectDecision::Wait(mut changes) => {
                    debug!("verification already running, waiting for it");
                    if changes.changed().await.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    async fn verify(&self, ticket: GrantTicket, wallet: WalletDescriptor) -> Option<Value> {
        let from = ticket.peer().clone();

        let grant = match &self.verifier {
            Some(verifier) => {
                let trusted = self.trust.is_auto_connect(&from).await.unwrap_or_else(|err| {
                    warn!("failed to read auto-connect set: {err}");
                    false
                });
                if trusted {
                    debug!("wallet is trusted, skipping verification");
                    ConnectionGrant::grant_with_auto_connect()
                } else {
                    verifier.verify(&wallet).await
                }
            }
            None => ConnectionGrant::grant(),
        };

        match self.session.resolve(ticket, grant.granted) {
            GrantOutcome::Stale => {
                debug!("wallet went away during verification, dropping grant");
                None
            }
            GrantOutcome::Denied => {
                info!("user denied connection");
                reply(&ConnectMessage::denied(
                    &self.dapp_info,
                    &from,
                    grant.allow_auto_connect,
                ))
            }
            GrantOutcome::Connected => {
                if grant.allow_auto_connect && wallet.wants_autoconnect() {
                    if let Err(err) = self.trust.add_auto_connect(&from).await {
                        warn!("failed to persist auto-connect address: {err}");
                    }
                }
                info!("successfully connected");

                *self.identicon.lock().unwrap_or_else(PoisonError::into_inner) =
                    pairing_identicon(&from, &self.transport.address());
                self.observer.on_connect(&from, &wallet);

                if let Some(discovery) = self.discovery.lock().await.take() {
                    debug!("closing discovery after wallet connected");
                    discovery.close();
                }

                reply(&ConnectMessage::granted(
                    &self.dapp_info,
                    &from,
                    grant.allow_auto_connect,
                ))
            }
        }
    }

    #[tracing::instrument(skip_all, fields(from = %from))]
    async fn handle_disconnect(self: Arc<Self>, from: PeerAddress, _args: Value) -> Option<Value> {
        match self.session.disconnect(&from) {
            DisconnectDecision::Accepted => {
                info!("wallet is calling disconnect");
                let message = ConnectMessage::disconnected(&self.dapp_info);
                self.finish_teardown(&from, true).await;
                reply(&message)
            }
            DisconnectDecision::Unregistered => {
                info!("unregistered address is calling disconnect");
                reply(&ConnectMessage::unregistered_disconnect(
                    &self.dapp_info,
                    &from,
                ))
            }
            DisconnectDecision::NoneConnected => {
                info!("calling disconnect with no connected wallet");
                reply(&ConnectMessage::no_wallet_connected(&self.dapp_info))
            }
        }
    }

    #[tracing::instrument(skip_all, fields(from = %from))]
    async fn handle_api(self: Arc<Self>, from: PeerAddress, args: Value) -> Option<Value> {
        if self.session.connected_peer().as_ref() != Some(&from) {
            warn!("ignoring api from a wallet that is not connected");
            return None;
        }

        let request: ApiRequest = match serde_json::from_value(args) {
            Ok(request) => request,
            Err(err) => {
                warn!("malformed api request: {err}");
                return reply(&ConnectMessage::api_rejected(
                    &self.dapp_info,
                    err.to_string(),
                ));
            }
        };

        let name = request.api.name.clone();
        if !name.contains("p2p") {
            warn!(%name, "injected wallet does not contain 'p2p' in name, this is discouraged");
        }

        let published = CapabilityHandle::from_descriptor(
            &request.api,
            from.clone(),
            self.transport.clone(),
        )
        .and_then(|handle| self.registry.publish(handle, request.allows_overwrite()));

        match published {
            Ok(_) => {
                info!(%name, "published wallet api");
                let message = reply(&ConnectMessage::api_injected(&self.dapp_info));
                self.observer.on_api_inject(&name, &from);
                message
            }
            Err(err) => {
                info!(%name, "not publishing wallet api: {err}");
                reply(&ConnectMessage::api_rejected(
                    &self.dapp_info,
                    err.to_string(),
                ))
            }
        }
    }

    #[tracing::instrument(skip_all, fields(from = %from))]
    async fn handle_set_discovery(self: Arc<Self>, from: PeerAddress, args: Value) -> Option<Value> {
        let request: SetDiscoveryRequest = match serde_json::from_value(args) {
            Ok(request) => request,
            Err(err) => {
                warn!("malformed setDiscovery request: {err}");
                return Some(Value::Bool(false));
            }
        };

        if !self.config.use_wallet_discovery {
            debug!("wallet discovery disabled, not storing discovery address");
            return Some(Value::Bool(false));
        }
        if self.session.connected_peer().as_ref() != Some(&from) {
            warn!("setDiscovery from a wallet that is not connected");
            return Some(Value::Bool(false));
        }

        match self
            .trust
            .save_wallet_discovery_address(&request.wallet_discovery_address)
            .await
        {
            Ok(()) => {
                debug!(address = %request.wallet_discovery_address, "stored wallet discovery address");
                Some(Value::Bool(true))
            }
            Err(err) => {
                warn!("failed to store wallet discovery address: {err}");
                Some(Value::Bool(false))
            }
        }
    }

    async fn on_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connections => info!("server ready"),
            TransportEvent::Seen(address) => {
                if self.registry.find_by_identifier(&address).is_some() {
                    info!(%address, "saw address");
                } else {
                    info!(%address, "saw address but it has not injected its api yet");
                }
            }
            TransportEvent::Left(address) => match self.session.teardown(&address) {
                Some(SessionState::Connected) => self.finish_teardown(&address, true).await,
                Some(_) => debug!(%address, "wallet left during verification"),
                None => debug!(%address, "peer left"),
            },
            TransportEvent::Server => debug!("server event on pairing identity"),
        }
    }

    // Runs once the session has already dropped `address`.
    async fn finish_teardown(&self, address: &PeerAddress, rearm: bool) {
        self.identicon
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.observer.on_disconnect(address);

        match self.registry.remove_by_identifier(address) {
            Some(handle) => {
                info!(%address, name = handle.name(), "wallet disconnected, api removed");
                self.observer.on_api_eject(handle.name(), address);
            }
            None => info!(%address, "wallet disconnected, cleanup was not necessary"),
        }

        if rearm {
            self.arm_discovery().await;
        }
    }

    async fn arm_discovery(&self) {
        if !self.config.use_wallet_discovery {
            return;
        }

        let wallet = match &self.config.discovery_address {
            Some(address) => Some(address.clone()),
            None => self.trust.wallet_discovery_address().await.unwrap_or_else(|err| {
                warn!("failed to read wallet discovery address: {err}");
                None
            }),
        };
        let Some(wallet) = wallet else {
            debug!("no known wallet discovery address");
            return;
        };

        let mut slot = self.discovery.lock().await;
        if let Some(previous) = slot.take() {
            previous.close();
        }
        match DAppDiscovery::start(
            self.factory.as_ref(),
            &self.trust,
            self.config.transport_options(),
            wallet,
            self.transport.address(),
        )
        .await
        {
            Ok(discovery) => {
                debug!(address = %discovery.address(), "dApp discovery armed");
                *slot = Some(discovery);
            }
            Err(err) => warn!("failed to set up discovery: {err}"),
        }
    }
}
