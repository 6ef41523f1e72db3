//! Remote proxies over a serialized [`TypeMapping`](super::TypeMapping).

use super::{deserialize_type_mapping, execute_or_get_property, CapabilitySet, TypeKind};
use crate::protocol::ExperimentalEndpoint;
use crate::transport::{handler_fn, PeerTransport};
use crate::{PeerAddress, PeerConnectError, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Callable forwarding every invocation to the advertising peer.
#[derive(Clone)]
pub struct RemoteCallable {
    transport: Arc<dyn PeerTransport>,
    address: PeerAddress,
    endpoint: ExperimentalEndpoint,
    name: String,
    kind: TypeKind,
}

impl RemoteCallable {
    /// Capability name on the remote side.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `function` or `async_function`, as advertised.
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// Invoke the remote capability.
    ///
    /// Resolves with the raw reply, or fails with [`PeerConnectError::Remote`]
    /// when the reply carries an `error` field. There is no timeout.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, params), fields(name = %self.name)))]
    pub async fn call(&self, params: Vec<Value>) -> Result<Value> {
        let mut args = Vec::with_capacity(params.len() + 1);
        args.push(Value::String(self.name.clone()));
        args.extend(params);

        let reply = self
            .transport
            .rpc(&self.address, self.endpoint.as_str(), Value::Array(args))
            .await?;

        match remote_error(&reply) {
            Some(message) => Err(PeerConnectError::Remote(message)),
            None => Ok(reply),
        }
    }
}

impl std::fmt::Debug for RemoteCallable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCallable")
            .field("address", &self.address)
            .field("endpoint", &self.endpoint)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

// An `error` field only counts when it is truthy.
fn remote_error(reply: &Value) -> Option<String> {
    match reply.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(message) if message.is_empty() => None,
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        Value::String(message) => Some(message.clone()),
        other => Some(other.to_string()),
    }
}

/// One entry of a rebuilt remote capability set.
#[derive(Clone, Debug)]
pub enum CapabilityProxy {
    /// Readable entry, copied from the advertisement.
    Value(Value),
    Callable(RemoteCallable),
}

/// Remote capability set rebuilt from a serialized type mapping.
#[derive(Clone, Debug, Default)]
pub struct ExperimentalApi {
    entries: BTreeMap<String, CapabilityProxy>,
}

impl ExperimentalApi {
    pub fn get(&self, name: &str) -> Option<&CapabilityProxy> {
        self.entries.get(name)
    }

    /// Value of a readable entry.
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.entries.get(name)? {
            CapabilityProxy::Value(value) => Some(value),
            CapabilityProxy::Callable(_) => None,
        }
    }

    /// Invoke a callable entry.
    pub async fn call(&self, name: &str, params: Vec<Value>) -> Result<Value> {
        match self.entries.get(name) {
            Some(CapabilityProxy::Callable(callable)) => callable.call(params).await,
            Some(CapabilityProxy::Value(_)) => Err(PeerConnectError::invalid_data(
                name,
                "capability is a value, not a function",
            )),
            None => Err(PeerConnectError::not_found("property or function", name)),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CapabilityProxy)> {
        self.entries.iter().map(|(name, proxy)| (name.as_str(), proxy))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rebuild a remote capability set.
///
/// Callable entries become [`RemoteCallable`]s sending
/// `[name, ...params]` to `endpoint` on `address`; readable entries keep the
/// advertised value.
pub fn build_proxy(
    transport: Arc<dyn PeerTransport>,
    address: &PeerAddress,
    serialized: &str,
    endpoint: ExperimentalEndpoint,
) -> Result<ExperimentalApi> {
    let mapping = deserialize_type_mapping(serialized)?;

    let entries = mapping
        .into_iter()
        .map(|(name, info)| {
            let proxy = if info.value_type.is_callable() {
                CapabilityProxy::Callable(RemoteCallable {
                    transport: transport.clone(),
                    address: address.clone(),
                    endpoint,
                    name: name.clone(),
                    kind: info.value_type,
                })
            } else {
                CapabilityProxy::Value(info.value.unwrap_or(Value::Null))
            };
            (name, proxy)
        })
        .collect();

    Ok(ExperimentalApi { entries })
}

/// Serve `set` on `endpoint` for the peer at `identifier`.
///
/// Requests from any other address get no reply. A failing lookup or call is
/// answered with `{"error": message}`.
pub fn register_experimental_endpoint(
    transport: &dyn PeerTransport,
    endpoint: ExperimentalEndpoint,
    set: CapabilitySet,
    identifier: PeerAddress,
) {
    let handler = handler_fn(move |from: PeerAddress, args: Value| {
        let set = set.clone();
        let identifier = identifier.clone();
        async move {
            if from != identifier {
                #[cfg(feature = "tracing")]
                tracing::debug!(%from, %endpoint, "ignoring experimental call from unknown peer");
                return None;
            }

            let mut args = match args {
                Value::Array(args) => args,
                other => vec![other],
            };
            let name = match args.first() {
                Some(Value::String(name)) => name.clone(),
                _ => {
                    return Some(json!({ "error": "missing capability name" }));
                }
            };
            args.remove(0);

            match execute_or_get_property(&set, &name, args).await {
                Ok(result) => Some(result),
                Err(err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%endpoint, %name, "experimental call failed: {err}");
                    Some(json!({ "error": err.to_string() }))
                }
            }
        }
    });

    transport.register(endpoint.as_str(), handler);
}
