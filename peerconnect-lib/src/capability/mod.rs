//! Capability codec.
//!
//! A wallet advertises capabilities that the dApp does not know at compile
//! time. The advertising side keeps them in a [`CapabilitySet`], describes the
//! set with a [`TypeMapping`] and ships the serialized mapping to the peer,
//! which rebuilds callable proxies from it (see [`build_proxy`]).
//!
//! Callable entries are described by kind only; every other entry carries its
//! value (JSON `null` included) so the receiving side can read it without a
//! round trip.

mod proxy;

pub use proxy::{
    build_proxy, register_experimental_endpoint, CapabilityProxy, ExperimentalApi, RemoteCallable,
};

use crate::{PeerConnectError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

/// Kind of a capability entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    String,
    Number,
    Boolean,
    Symbol,
    Bigint,
    Object,
    Null,
    Function,
    AsyncFunction,
}

impl TypeKind {
    /// Whether entries of this kind are invoked rather than read.
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function | Self::AsyncFunction)
    }

    /// Classify a plain JSON value.
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) | Value::Object(_) => Self::Object,
        }
    }
}

/// Description of one capability entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeInfo {
    #[serde(rename = "valueType")]
    pub value_type: TypeKind,
    /// Present for every non-callable kind, absent for callables.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
}

impl TypeInfo {
    /// Describe a callable entry.
    pub fn callable(kind: TypeKind) -> Self {
        Self {
            value_type: kind,
            value: None,
        }
    }

    /// Describe a readable entry.
    pub fn readable(kind: TypeKind, value: Value) -> Self {
        Self {
            value_type: kind,
            value: Some(value),
        }
    }
}

// A present `null` must stay `Some(Value::Null)`; only a missing field is `None`.
fn deserialize_present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Ordered mapping from capability name to its description.
pub type TypeMapping = BTreeMap<String, TypeInfo>;

/// Boxed future returned by asynchronous capabilities.
pub type CapabilityFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Synchronous callable capability.
pub type SyncCapabilityFn = Arc<dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync>;

/// Asynchronous callable capability.
pub type AsyncCapabilityFn = Arc<dyn Fn(Vec<Value>) -> CapabilityFuture + Send + Sync>;

/// One named capability: a readable value or a callable.
#[derive(Clone)]
pub enum Capability {
    /// Plain JSON value (string, number, boolean, object or null).
    Value(Value),
    /// Integer too wide for a JSON number; travels as its decimal string.
    BigInt(i128),
    /// Opaque symbol; travels as its description.
    Symbol(String),
    Function(SyncCapabilityFn),
    AsyncFunction(AsyncCapabilityFn),
}

impl Capability {
    /// A readable value.
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    /// A synchronous callable.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }

    /// An asynchronous callable.
    pub fn async_function<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::AsyncFunction(Arc::new(move |args: Vec<Value>| -> CapabilityFuture {
            Box::pin(f(args))
        }))
    }

    pub fn bigint(value: i128) -> Self {
        Self::BigInt(value)
    }

    pub fn symbol(description: impl Into<String>) -> Self {
        Self::Symbol(description.into())
    }

    /// Kind of this capability.
    pub fn kind(&self) -> TypeKind {
        match self {
            Self::Value(value) => TypeKind::of_value(value),
            Self::BigInt(_) => TypeKind::Bigint,
            Self::Symbol(_) => TypeKind::Symbol,
            Self::Function(_) => TypeKind::Function,
            Self::AsyncFunction(_) => TypeKind::AsyncFunction,
        }
    }

    /// Description of this capability, carrying the value for readable kinds.
    pub fn type_info(&self) -> TypeInfo {
        match self {
            Self::Function(_) | Self::AsyncFunction(_) => TypeInfo::callable(self.kind()),
            readable => TypeInfo::readable(readable.kind(), readable.wire_value()),
        }
    }

    fn wire_value(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::BigInt(value) => Value::String(value.to_string()),
            Self::Symbol(description) => Value::String(description.clone()),
            Self::Function(_) | Self::AsyncFunction(_) => Value::Null,
        }
    }

    /// Read the value or invoke the callable with `args`.
    pub async fn resolve(&self, args: Vec<Value>) -> Result<Value> {
        match self {
            Self::Function(f) => f(args),
            Self::AsyncFunction(f) => f(args).await,
            readable => Ok(readable.wire_value()),
        }
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::BigInt(value) => f.debug_tuple("BigInt").field(value).finish(),
            Self::Symbol(description) => f.debug_tuple("Symbol").field(description).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
            Self::AsyncFunction(_) => f.write_str("AsyncFunction(..)"),
        }
    }
}

/// Shared, mutable set of named capabilities.
///
/// Clones share the same entries, so a wallet can keep adding capabilities
/// after handing the set to a transport endpoint.
#[derive(Clone, Debug, Default)]
pub struct CapabilitySet {
    entries: Arc<RwLock<BTreeMap<String, Capability>>>,
}

impl CapabilitySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a capability, returning the previous one.
    pub fn insert(&self, name: impl Into<String>, capability: Capability) -> Option<Capability> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), capability)
    }

    pub fn remove(&self, name: &str) -> Option<Capability> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Capability> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
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

impl<N: Into<String>> FromIterator<(N, Capability)> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = (N, Capability)>>(iter: I) -> Self {
        let set = Self::new();
        for (name, capability) in iter {
            set.insert(name, capability);
        }
        set
    }
}

/// Describe every entry of `set`.
pub fn encode(set: &CapabilitySet) -> TypeMapping {
    set.entries
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .map(|(name, capability)| (name.clone(), capability.type_info()))
        .collect()
}

/// Serialize a mapping as a JSON object keyed by capability name.
pub fn serialize_type_mapping(mapping: &TypeMapping) -> Result<String> {
    Ok(serde_json::to_string(mapping)?)
}

/// Parse a serialized mapping.
///
/// Entries are normalized on the way in: a callable never keeps a `value`,
/// and a readable entry without one reads as `null`.
pub fn deserialize_type_mapping(text: &str) -> Result<TypeMapping> {
    let mut mapping: TypeMapping = serde_json::from_str(text)?;
    for info in mapping.values_mut() {
        if info.value_type.is_callable() {
            info.value = None;
        } else if info.value.is_none() {
            info.value = Some(Value::Null);
        }
    }
    Ok(mapping)
}

/// Read the named capability, or invoke it with `args` when it is callable.
pub async fn execute_or_get_property(
    set: &CapabilitySet,
    name: &str,
    args: Vec<Value>,
) -> Result<Value> {
    let capability = set
        .get(name)
        .ok_or_else(|| PeerConnectError::not_found("property or function", name))?;
    capability.resolve(args).await
}
