//! Wallet side of a pairing.
//!
//! A [`WalletAgent`] keeps one transport identity per dApp it talks to. Each
//! identity is configured to reach the dApp's address; once the dApp is
//! reachable the agent sends `connect`, and on success advertises its
//! capabilities with `api` and its discovery address with `setDiscovery`.
//!
//! Between pairings the agent keeps a [`WalletDiscovery`] identity online so
//! a dApp that knows its discovery address can ask it to pair again.

use crate::cip30::{dispatch, WalletApi};
use crate::config::WalletConfig;
use crate::discovery::{DiscoveryHandoff, WalletDiscovery};
use crate::observer::{NoopObserver, WalletObserver};
use crate::{InteractiveError, Result};
use async_trait::async_trait;
use peerconnect_lib::capability::{
    encode, register_experimental_endpoint, serialize_type_mapping, CapabilitySet,
};
use peerconnect_lib::identicon::pairing_identicon;
use peerconnect_lib::protocol::endpoints;
use peerconnect_lib::storage::KeyValueStore;
use peerconnect_lib::transport::call;
use peerconnect_lib::{
    handler_fn, ApiRequest, CapabilityDescriptor, Cip30Function, ConnectMessage,
    ExperimentalEndpoint, PeerAddress, PeerConnectError, PeerTransport, SetDiscoveryRequest,
    TransportEvent, TransportFactory, TrustStore, WalletDescriptor,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Builder for [`WalletAgent`].
pub struct WalletBuilder {
    descriptor: WalletDescriptor,
    api: Arc<dyn WalletApi>,
    factory: Arc<dyn TransportFactory>,
    store: Arc<dyn KeyValueStore>,
    config: WalletConfig,
    observer: Arc<dyn WalletObserver>,
    experimental: CapabilitySet,
    enable_experimental: CapabilitySet,
}

impl WalletBuilder {
    pub fn config(mut self, config: WalletConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn WalletObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Capabilities callable before the dApp enables the wallet.
    pub fn experimental(mut self, set: CapabilitySet) -> Self {
        self.experimental = set;
        self
    }

    /// Capabilities reachable through `enable()` only.
    pub fn enable_experimental(mut self, set: CapabilitySet) -> Self {
        self.enable_experimental = set;
        self
    }

    /// Bring the discovery identity online.
    pub async fn start(self) -> Result<WalletAgent> {
        let inner = Arc::new(WalletInner {
            descriptor: self.descriptor,
            api: self.api,
            factory: self.factory,
            trust: TrustStore::new(self.store),
            config: self.config,
            observer: self.observer,
            experimental: self.experimental,
            enable_experimental: self.enable_experimental,
            sessions: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            discovery: Mutex::new(None),
            discovery_address: Mutex::new(None),
            identicon: Mutex::new(None),
        });
        inner.arm_discovery().await?;
        Ok(WalletAgent { inner })
    }
}

/// The wallet end of a pairing. Clones share the same state.
#[derive(Clone)]
pub struct WalletAgent {
    inner: Arc<WalletInner>,
}

impl WalletAgent {
    pub fn builder(
        descriptor: WalletDescriptor,
        api: Arc<dyn WalletApi>,
        factory: Arc<dyn TransportFactory>,
        store: Arc<dyn KeyValueStore>,
    ) -> WalletBuilder {
        WalletBuilder {
            descriptor,
            api,
            factory,
            store,
            config: WalletConfig::default(),
            observer: Arc::new(NoopObserver),
            experimental: CapabilitySet::new(),
            enable_experimental: CapabilitySet::new(),
        }
    }

    /// Open a pairing identity towards the dApp at `dapp` and return its seed.
    ///
    /// The handshake starts once the dApp is reachable; its outcome is
    /// reported through [`WalletObserver::on_connect`]. A previous pairing
    /// with the same dApp is closed first.
    pub fn connect(&self, dapp: &PeerAddress) -> Result<String> {
        self.inner.connect(dapp)
    }

    /// Push the capability descriptor to `dapp` again.
    pub async fn inject_api(&self, dapp: &PeerAddress, overwrite: bool) -> Result<ConnectMessage> {
        self.inner.inject_api(dapp, overwrite).await
    }

    /// Leave the pairing with `dapp`.
    ///
    /// The pairing identity is closed once the dApp answered and discovery is
    /// brought back online.
    pub async fn disconnect(&self, dapp: &PeerAddress) -> Result<ConnectMessage> {
        let inner = &self.inner;
        let transport = inner
            .transport_for(dapp)
            .ok_or(PeerConnectError::NotConnected)?;

        let message: ConnectMessage =
            call(transport.as_ref(), dapp, endpoints::DISCONNECT, &inner.descriptor).await?;
        debug!(%dapp, connected = message.connected, "disconnect answered");

        inner.drop_session(dapp);
        inner.clear_seen();
        inner.observer.on_disconnect(&message);

        debug!("setting up discovery after disconnect");
        inner.arm_discovery().await?;
        Ok(message)
    }

    /// dApps with an open pairing identity.
    pub fn sessions(&self) -> Vec<PeerAddress> {
        let mut sessions: Vec<PeerAddress> = self.inner.sessions().keys().cloned().collect();
        sessions.sort();
        sessions
    }

    pub fn transport_for(&self, dapp: &PeerAddress) -> Option<Arc<dyn PeerTransport>> {
        self.inner.transport_for(dapp)
    }

    /// The dApp that accepted the last handshake.
    pub fn connected_dapp(&self) -> Option<PeerAddress> {
        lock(&self.inner.current).clone()
    }

    /// Address of the discovery identity, kept after it is closed.
    pub fn discovery_address(&self) -> Option<PeerAddress> {
        lock(&self.inner.discovery_address).clone()
    }

    /// Whether the discovery identity is online.
    pub fn is_discoverable(&self) -> bool {
        lock(&self.inner.discovery).is_some()
    }

    pub async fn discovery_seed(&self) -> Result<Option<String>> {
        Ok(self.inner.trust.discovery_seed().await?)
    }

    /// Identicon input of the current pairing.
    pub fn identicon(&self) -> Option<String> {
        lock(&self.inner.identicon).clone()
    }

    /// Forget every peer seen by the pairing and discovery identities.
    pub fn clear_seen(&self) {
        self.inner.clear_seen();
    }

    /// Close every identity.
    pub fn close(&self) {
        let inner = &self.inner;
        let sessions: Vec<PeerAddress> = inner.sessions().keys().cloned().collect();
        for dapp in sessions {
            inner.drop_session(&dapp);
        }
        if let Some(discovery) = lock(&inner.discovery).take() {
            discovery.close();
        }
        info!("wallet closed");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PairingSession {
    transport: Arc<dyn PeerTransport>,
    pump: Option<JoinHandle<()>>,
}

impl PairingSession {
    fn close(self) {
        if let Some(pump) = self.pump {
            pump.abort();
        }
        self.transport.close();
    }
}

struct WalletInner {
    descriptor: WalletDescriptor,
    api: Arc<dyn WalletApi>,
    factory: Arc<dyn TransportFactory>,
    trust: TrustStore,
    config: WalletConfig,
    observer: Arc<dyn WalletObserver>,
    experimental: CapabilitySet,
    enable_experimental: CapabilitySet,
    sessions: Mutex<HashMap<PeerAddress, PairingSession>>,
    current: Mutex<Option<PeerAddress>>,
    discovery: Mutex<Option<WalletDiscovery>>,
    discovery_address: Mutex<Option<PeerAddress>>,
    identicon: Mutex<Option<String>>,
}

impl WalletInner {
    fn sessions(&self) -> MutexGuard<'_, HashMap<PeerAddress, PairingSession>> {
        lock(&self.sessions)
    }

    fn transport_for(&self, dapp: &PeerAddress) -> Option<Arc<dyn PeerTransport>> {
        self.sessions()
            .get(dapp)
            .map(|session| session.transport.clone())
    }

    fn connect(self: &Arc<Self>, dapp: &PeerAddress) -> Result<String> {
        let options = self
            .config
            .transport_options()
            .with_identifier(dapp.clone())
            .with_seed(self.config.seed.clone());
        let transport = self.factory.create(options)?;
        debug!(%dapp, address = %transport.address(), "calling to connect to dApp");

        self.register_handlers(transport.as_ref(), dapp);

        // The session must be in place before the identity is announced.
        let previous = self.sessions().insert(
            dapp.clone(),
            PairingSession {
                transport: transport.clone(),
                pump: None,
            },
        );
        if let Some(previous) = previous {
            debug!(%dapp, "closing previous pairing with the same dApp");
            previous.close();
        }

        let mut events = transport.events().ok_or_else(|| {
            InteractiveError::Transport("pairing event stream already taken".into())
        })?;
        let weak = Arc::downgrade(self);
        let target = dapp.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match event {
                    TransportEvent::Server => {
                        debug!(dapp = %target, "dApp server seen, creating connection");
                        let dapp = target.clone();
                        tokio::spawn(async move { inner.handshake(dapp).await });
                    }
                    TransportEvent::Left(address) if address == target => {
                        debug!(dapp = %target, "dApp left");
                        let mut current = lock(&inner.current);
                        if current.as_ref() == Some(&target) {
                            *current = None;
                        }
                    }
                    other => debug!(dapp = %target, ?other, "pairing event"),
                }
            }
        });

        match self.sessions().get_mut(dapp) {
            Some(session) if Arc::ptr_eq(&session.transport, &transport) => {
                session.pump = Some(pump);
            }
            _ => pump.abort(),
        }
        Ok(transport.seed())
    }

    fn register_handlers(self: &Arc<Self>, transport: &dyn PeerTransport, dapp: &PeerAddress) {
        let weak: Weak<WalletInner> = Arc::downgrade(self);
        let target = dapp.clone();
        transport.register(
            endpoints::SHUTDOWN,
            handler_fn(move |from: PeerAddress, args: Value| {
                let inner = weak.upgrade();
                let dapp = target.clone();
                async move {
                    match inner {
                        Some(inner) => inner.handle_shutdown(dapp, from, args).await,
                        None => None,
                    }
                }
            }),
        );

        let api = self.api.clone();
        let target = dapp.clone();
        transport.register(
            endpoints::INVOKE,
            handler_fn(move |from: PeerAddress, args: Value| {
                let api = api.clone();
                let dapp = target.clone();
                async move { handle_invoke(api.as_ref(), &dapp, from, args).await }
            }),
        );

        register_experimental_endpoint(
            transport,
            ExperimentalEndpoint::InvokeExperimental,
            self.experimental.clone(),
            dapp.clone(),
        );
        register_experimental_endpoint(
            transport,
            ExperimentalEndpoint::InvokeEnableExperimental,
            self.enable_experimental.clone(),
            dapp.clone(),
        );
    }

    async fn handshake(self: Arc<Self>, dapp: PeerAddress) {
        let Some(transport) = self.transport_for(&dapp) else {
            return;
        };

        let message: ConnectMessage =
            match call(transport.as_ref(), &dapp, endpoints::CONNECT, &self.descriptor).await {
                Ok(message) => message,
                Err(err) => {
                    warn!(%dapp, "connect failed: {err}");
                    return;
                }
            };
        debug!(%dapp, connected = message.connected, "dApp answered connect");

        if message.connected {
            *lock(&self.current) = Some(dapp.clone());
            if let Some(discovery) = lock(&self.discovery).take() {
                debug!("closing discovery after connecting to dApp");
                discovery.close();
            }
            *lock(&self.identicon) = pairing_identicon(&transport.address(), &dapp);
        } else {
            warn!(
                %dapp,
                reason = message.error_message.as_deref().unwrap_or("unknown"),
                "connection failed"
            );
        }

        self.observer.on_connect(&message);

        if message.connected {
            if let Err(err) = self.inject_api(&dapp, false).await {
                warn!(%dapp, "failed to inject api: {err}");
            }
            self.advertise_discovery(transport.as_ref(), &dapp).await;
        }
    }

    async fn inject_api(&self, dapp: &PeerAddress, overwrite: bool) -> Result<ConnectMessage> {
        let transport = self
            .transport_for(dapp)
            .ok_or(PeerConnectError::NotConnected)?;

        let descriptor = CapabilityDescriptor::new(
            &self.descriptor,
            Cip30Function::ALL,
            serialize_type_mapping(&encode(&self.experimental))?,
            serialize_type_mapping(&encode(&self.enable_experimental))?,
        );
        let request = ApiRequest {
            api: descriptor,
            overwrite,
        };

        let message: ConnectMessage =
            call(transport.as_ref(), dapp, endpoints::API, &request).await?;
        if message.error {
            warn!(
                %dapp,
                reason = message.error_message.as_deref().unwrap_or("unknown error"),
                "api could not be injected"
            );
        }
        self.observer.on_api_inject(&message);
        Ok(message)
    }

    async fn advertise_discovery(&self, transport: &dyn PeerTransport, dapp: &PeerAddress) {
        let Some(address) = lock(&self.discovery_address).clone() else {
            debug!("no discovery address to advertise");
            return;
        };

        let request = SetDiscoveryRequest {
            wallet_discovery_address: address,
        };
        match call::<_, bool>(transport, dapp, endpoints::SET_DISCOVERY, &request).await {
            Ok(stored) => debug!(%dapp, stored, "result of setDiscovery call"),
            Err(err) => warn!(%dapp, "setDiscovery failed: {err}"),
        }
    }

    #[tracing::instrument(skip_all, fields(dapp = %dapp, from = %from))]
    async fn handle_shutdown(
        self: Arc<Self>,
        dapp: PeerAddress,
        from: PeerAddress,
        args: Value,
    ) -> Option<Value> {
        let message: ConnectMessage = match serde_json::from_value(args) {
            Ok(message) => message,
            Err(err) => {
                warn!("malformed shutdown notice: {err}");
                return None;
            }
        };

        if message.dapp.address.as_ref() != Some(&from) {
            let violation = PeerConnectError::ProtocolViolation {
                sender: from.to_string(),
                claimed: message
                    .dapp
                    .address
                    .as_ref()
                    .map(PeerAddress::to_string)
                    .unwrap_or_default(),
            };
            error!("{violation}");
            self.drop_session(&dapp);
            self.observer.on_session_aborted(&dapp, &violation);
            return None;
        }

        info!("dApp is shutting down");
        self.drop_session(&dapp);
        self.clear_seen();
        self.observer.on_server_shutdown(&message);

        debug!("setting up discovery again after server shutdown");
        if let Err(err) = self.arm_discovery().await {
            warn!("failed to set up discovery: {err}");
        }
        Some(Value::Null)
    }

    fn drop_session(&self, dapp: &PeerAddress) {
        let session = self.sessions().remove(dapp);
        if let Some(session) = session {
            session.close();
        }

        let mut current = lock(&self.current);
        if current.as_ref() == Some(dapp) {
            *current = None;
            lock(&self.identicon).take();
        }
    }

    fn clear_seen(&self) {
        for session in self.sessions().values() {
            session.transport.clear_seen();
        }
        if let Some(discovery) = lock(&self.discovery).as_ref() {
            discovery.clear_seen();
        }
    }

    async fn arm_discovery(self: &Arc<Self>) -> Result<()> {
        let previous = lock(&self.discovery).take();
        if let Some(previous) = previous {
            previous.close();
        }

        let handoff = Arc::new(Handoff(Arc::downgrade(self)));
        let discovery = WalletDiscovery::start(
            self.factory.as_ref(),
            &self.trust,
            self.config.transport_options(),
            self.config.discovery_seed.clone(),
            handoff,
        )
        .await?;

        debug!(address = %discovery.address(), "wallet discovery armed");
        *lock(&self.discovery_address) = Some(discovery.address());
        *lock(&self.discovery) = Some(discovery);
        Ok(())
    }
}

async fn handle_invoke(
    api: &dyn WalletApi,
    dapp: &PeerAddress,
    from: PeerAddress,
    args: Value,
) -> Option<Value> {
    if &from != dapp {
        debug!(%from, "ignoring invoke from unknown peer");
        return None;
    }

    let Value::Array(args) = args else {
        warn!(%from, "invoke arguments are not a list");
        return None;
    };
    let method = match args.first().and_then(Value::as_str).map(str::parse::<Cip30Function>) {
        Some(Ok(method)) => method,
        Some(Err(err)) => {
            warn!(%from, "{err}");
            return None;
        }
        None => {
            warn!(%from, "invoke without a method name");
            return None;
        }
    };

    match dispatch(api, method, &args[1..]).await {
        Ok(result) => Some(result),
        Err(err) => {
            warn!(%from, %method, "wallet call failed: {err}");
            None
        }
    }
}

struct Handoff(Weak<WalletInner>);

#[async_trait]
impl DiscoveryHandoff for Handoff {
    async fn dapp_discovered(&self, dapp: PeerAddress) -> bool {
        let Some(inner) = self.0.upgrade() else {
            return false;
        };
        match inner.connect(&dapp) {
            Ok(_) => true,
            Err(err) => {
                warn!(%dapp, "failed to connect to discovered dApp: {err}");
                false
            }
        }
    }
}
