//! Published capability handles.
//!
//! When a connected wallet pushes its [`CapabilityDescriptor`], the dApp turns
//! it into a [`CapabilityHandle`] and publishes it in a
//! [`CapabilityRegistry`] under the lower-cased wallet name. The embedding
//! application discovers wallets there, the same way browser dApps look them
//! up in `window.cardano`.

use crate::{InteractiveError, Result};
use peerconnect_lib::capability::{build_proxy, ExperimentalApi};
use peerconnect_lib::protocol::endpoints;
use peerconnect_lib::{
    Cbor, CapabilityDescriptor, Cip30Function, DataSignature, ExperimentalEndpoint, Paginate,
    PeerAddress, PeerConnectError, PeerTransport,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Forwards one well-known method to the wallet.
#[derive(Clone)]
pub struct MethodProxy {
    transport: Arc<dyn PeerTransport>,
    address: PeerAddress,
    method: Cip30Function,
}

impl MethodProxy {
    pub fn method(&self) -> Cip30Function {
        self.method
    }

    /// Send `invoke [method, ...params]` and resolve with the raw reply.
    ///
    /// There is no timeout: a wallet that never answers leaves the call pending.
    pub async fn call(&self, params: Vec<Value>) -> Result<Value> {
        let mut args = Vec::with_capacity(params.len() + 1);
        args.push(Value::String(self.method.as_str().to_string()));
        args.extend(params);

        Ok(self
            .transport
            .rpc(&self.address, endpoints::INVOKE, Value::Array(args))
            .await?)
    }
}

impl std::fmt::Debug for MethodProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodProxy")
            .field("address", &self.address)
            .field("method", &self.method)
            .finish()
    }
}

/// The wallet API handed out by [`CapabilityHandle::enable`].
#[derive(Clone, Debug)]
pub struct EnabledApi {
    methods: Vec<MethodProxy>,
    experimental: ExperimentalApi,
}

impl EnabledApi {
    /// Methods advertised by the wallet, in advertisement order.
    pub fn methods(&self) -> Vec<Cip30Function> {
        self.methods.iter().map(MethodProxy::method).collect()
    }

    pub fn method(&self, method: Cip30Function) -> Option<&MethodProxy> {
        self.methods.iter().find(|proxy| proxy.method == method)
    }

    /// The full experimental capability set.
    pub fn experimental(&self) -> &ExperimentalApi {
        &self.experimental
    }

    /// Call an advertised method with raw arguments.
    pub async fn call(&self, method: Cip30Function, params: Vec<Value>) -> Result<Value> {
        let proxy = self.method(method).ok_or_else(|| {
            InteractiveError::PeerConnect(PeerConnectError::not_found(
                "wallet method",
                method.as_str(),
            ))
        })?;
        proxy.call(params).await
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        method: Cip30Function,
        params: Vec<Value>,
    ) -> Result<T> {
        let reply = self.call(method, params).await?;
        Ok(serde_json::from_value(reply)?)
    }

    pub async fn get_network_id(&self) -> Result<u32> {
        self.call_as(Cip30Function::GetNetworkId, Vec::new()).await
    }

    pub async fn get_utxos(
        &self,
        amount: Option<Cbor>,
        paginate: Option<Paginate>,
    ) -> Result<Option<Vec<Cbor>>> {
        self.call_as(
            Cip30Function::GetUtxos,
            vec![json!(amount), serde_json::to_value(paginate)?],
        )
        .await
    }

    pub async fn get_collateral(&self, amount: Option<Cbor>) -> Result<Option<Vec<Cbor>>> {
        self.call_as(Cip30Function::GetCollateral, vec![json!({ "amount": amount })])
            .await
    }

    pub async fn get_balance(&self) -> Result<Cbor> {
        self.call_as(Cip30Function::GetBalance, Vec::new()).await
    }

    pub async fn get_used_addresses(&self) -> Result<Vec<Cbor>> {
        self.call_as(Cip30Function::GetUsedAddresses, Vec::new())
            .await
    }

    pub async fn get_unused_addresses(&self) -> Result<Vec<Cbor>> {
        self.call_as(Cip30Function::GetUnusedAddresses, Vec::new())
            .await
    }

    pub async fn get_change_address(&self) -> Result<Cbor> {
        self.call_as(Cip30Function::GetChangeAddress, Vec::new())
            .await
    }

    pub async fn get_reward_addresses(&self) -> Result<Vec<Cbor>> {
        self.call_as(Cip30Function::GetRewardAddresses, Vec::new())
            .await
    }

    pub async fn sign_tx(&self, tx: Cbor, partial_sign: bool) -> Result<Cbor> {
        self.call_as(Cip30Function::SignTx, vec![json!(tx), json!(partial_sign)])
            .await
    }

    pub async fn sign_data(&self, address: &str, payload: &str) -> Result<DataSignature> {
        self.call_as(Cip30Function::SignData, vec![json!(address), json!(payload)])
            .await
    }

    pub async fn submit_tx(&self, tx: Cbor) -> Result<String> {
        self.call_as(Cip30Function::SubmitTx, vec![json!(tx)]).await
    }
}

/// A published wallet.
#[derive(Debug)]
pub struct CapabilityHandle {
    api_version: String,
    name: String,
    icon: String,
    identifier: PeerAddress,
    experimental: ExperimentalApi,
    enabled: EnabledApi,
}

impl CapabilityHandle {
    /// Materialize proxies for a descriptor pushed by the wallet at `identifier`.
    pub fn from_descriptor(
        descriptor: &CapabilityDescriptor,
        identifier: PeerAddress,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<Self> {
        let methods = descriptor
            .unique_methods()
            .into_iter()
            .map(|method| MethodProxy {
                transport: transport.clone(),
                address: identifier.clone(),
                method,
            })
            .collect();

        let experimental = build_proxy(
            transport.clone(),
            &identifier,
            &descriptor.experimental_api,
            ExperimentalEndpoint::InvokeExperimental,
        )?;
        let full_experimental = build_proxy(
            transport,
            &identifier,
            &descriptor.full_experimental_api,
            ExperimentalEndpoint::InvokeEnableExperimental,
        )?;

        Ok(Self {
            api_version: descriptor.api_version.clone(),
            name: descriptor.name.clone(),
            icon: descriptor.icon.clone(),
            identifier,
            experimental,
            enabled: EnabledApi {
                methods,
                experimental: full_experimental,
            },
        })
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Wallet name as advertised (not lower-cased).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn icon(&self) -> &str {
        &self.icon
    }

    /// Address of the wallet behind this handle.
    pub fn identifier(&self) -> &PeerAddress {
        &self.identifier
    }

    /// The restricted experimental set, usable before `enable()`.
    pub fn experimental(&self) -> &ExperimentalApi {
        &self.experimental
    }

    pub async fn is_enabled(&self) -> bool {
        true
    }

    pub async fn enable(&self) -> EnabledApi {
        self.enabled.clone()
    }
}

/// Namespace of published wallets, keyed by lower-cased wallet name.
///
/// Clones share the same namespace.
#[derive(Clone, Debug, Default)]
pub struct CapabilityRegistry {
    entries: Arc<RwLock<HashMap<String, Arc<CapabilityHandle>>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str) -> String {
        name.to_lowercase()
    }

    /// Publish `handle`, refusing to replace an existing wallet of the same
    /// name unless `overwrite` is set.
    pub fn publish(&self, handle: CapabilityHandle, overwrite: bool) -> Result<Arc<CapabilityHandle>> {
        let key = Self::key(&handle.name);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&key) && !overwrite {
            return Err(InteractiveError::AlreadyInjected(handle.name));
        }

        let handle = Arc::new(handle);
        entries.insert(key, handle.clone());
        Ok(handle)
    }

    /// Look a wallet up by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<Arc<CapabilityHandle>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Self::key(name))
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// The handle published by the wallet at `identifier`.
    pub fn find_by_identifier(&self, identifier: &PeerAddress) -> Option<Arc<CapabilityHandle>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|handle| &handle.identifier == identifier)
            .cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<CapabilityHandle>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&Self::key(name))
    }

    /// Remove the handle published by the wallet at `identifier`.
    pub fn remove_by_identifier(&self, identifier: &PeerAddress) -> Option<Arc<CapabilityHandle>> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let key = entries
            .iter()
            .find(|(_, handle)| &handle.identifier == identifier)
            .map(|(key, _)| key.clone())?;
        entries.remove(&key)
    }

    /// Published keys, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
