//! Wire payloads of the peer connect protocol.
//!
//! Every payload is JSON with camelCase field names so both sides stay
//! compatible with browser implementations of the protocol.
//!
//! # Endpoints
//!
//! | Endpoint                   | Request                 | Reply                  | Served by |
//! |----------------------------|-------------------------|------------------------|-----------|
//! | `connect`                  | `WalletDescriptor`      | `ConnectMessage`       | dApp      |
//! | `disconnect`               | `WalletDescriptor`      | `ConnectMessage`       | dApp      |
//! | `api`                      | `ApiRequest`            | `ConnectMessage`       | dApp      |
//! | `setDiscovery`             | `SetDiscoveryRequest`   | `bool`                 | dApp      |
//! | `invoke`                   | `[method, ...args]`     | method result          | wallet    |
//! | `invokeExperimental`       | `[name, ...args]`       | result or `{error}`    | wallet    |
//! | `invokeEnableExperimental` | `[name, ...args]`       | result or `{error}`    | wallet    |
//! | `shutdown`                 | `ConnectMessage`        | none                   | wallet    |
//! | `connect` (discovery)      | `DiscoveryRequest`      | `bool`                 | wallet    |

mod cip30;

pub use cip30::{Cbor, Cip30Function, DataSignature, Paginate};

use crate::PeerAddress;
use serde::{Deserialize, Serialize};

/// Endpoint names registered on transport identities.
pub mod endpoints {
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
    pub const API: &str = "api";
    pub const SET_DISCOVERY: &str = "setDiscovery";
    pub const INVOKE: &str = "invoke";
    pub const SHUTDOWN: &str = "shutdown";
}

/// Reply text for a second wallet trying to pair with an occupied dApp.
pub const ANOTHER_WALLET_CONNECTED: &str =
    "Connection failed. Another wallet has already been connected to this dApp.";

/// Reply text for a disconnect without any connected wallet.
pub const NO_WALLET_CONNECTED: &str = "No wallet is connected.";

/// Notice sent to the wallet when the dApp shuts its server down.
pub const SERVER_CLOSING: &str = "Server is closing connections.";

/// Endpoints serving the two experimental capability sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExperimentalEndpoint {
    /// Restricted set, callable before `enable()`.
    InvokeExperimental,
    /// Full set, reachable through `enable()` only.
    InvokeEnableExperimental,
}

impl ExperimentalEndpoint {
    /// Endpoint name on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvokeExperimental => "invokeExperimental",
            Self::InvokeEnableExperimental => "invokeEnableExperimental",
        }
    }
}

impl std::fmt::Display for ExperimentalEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description of the dApp side of a pairing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DAppDescriptor {
    /// Human-readable dApp name.
    pub name: String,
    /// URL the dApp is served from.
    pub url: String,
    /// Pairing address; known only once the dApp's transport identity exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<PeerAddress>,
    /// Optional icon (URL or data URI).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl DAppDescriptor {
    /// Create a descriptor without an address.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            address: None,
            icon: None,
        }
    }

    /// Attach an icon.
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Attach the pairing address.
    pub fn with_address(mut self, address: PeerAddress) -> Self {
        self.address = Some(address);
        self
    }
}

/// Description of the wallet side of a pairing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletDescriptor {
    /// Wallet name; lower-cased it becomes the published capability key.
    pub name: String,
    /// Wallet (API) version.
    pub version: String,
    /// Wallet icon (URL or data URI).
    #[serde(default)]
    pub icon: String,
    /// Address of the wallet, filled in by the dApp before verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<PeerAddress>,
    /// Whether the wallet asks to be trusted for silent reconnection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_autoconnect: Option<bool>,
    /// Free-form platform description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_info: Option<String>,
}

impl WalletDescriptor {
    /// Create a descriptor with an empty icon.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    /// Attach an icon.
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    /// Ask the dApp to remember this wallet for silent reconnection.
    pub fn requesting_autoconnect(mut self) -> Self {
        self.request_autoconnect = Some(true);
        self
    }

    /// Whether auto-connect was requested.
    pub fn wants_autoconnect(&self) -> bool {
        self.request_autoconnect.unwrap_or(false)
    }
}

/// Outcome of a handshake step.
///
/// `connected` and `error` are independent: a soft rejection (another wallet
/// is already paired) reports `connected: false, error: false`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectMessage {
    /// Descriptor of the dApp answering.
    #[serde(rename = "dApp")]
    pub dapp: DAppDescriptor,
    /// Address of the wallet the message concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<PeerAddress>,
    pub connected: bool,
    pub error: bool,
    /// Human-readable reason, safe to display as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_connect: Option<bool>,
}

impl ConnectMessage {
    fn base(dapp: &DAppDescriptor, connected: bool, error: bool) -> Self {
        Self {
            dapp: dapp.clone(),
            address: None,
            connected,
            error,
            error_message: None,
            auto_connect: None,
        }
    }

    /// Verification granted the connection.
    pub fn granted(dapp: &DAppDescriptor, address: &PeerAddress, auto_connect: bool) -> Self {
        Self {
            address: Some(address.clone()),
            auto_connect: Some(auto_connect),
            ..Self::base(dapp, true, false)
        }
    }

    /// Verification denied the connection.
    pub fn denied(dapp: &DAppDescriptor, address: &PeerAddress, auto_connect: bool) -> Self {
        Self {
            address: Some(address.clone()),
            error_message: Some(format!("User denied connection to {}", address)),
            auto_connect: Some(auto_connect),
            ..Self::base(dapp, false, true)
        }
    }

    /// The requesting wallet is already the connected peer.
    pub fn already_connected(dapp: &DAppDescriptor, address: &PeerAddress) -> Self {
        Self {
            address: Some(address.clone()),
            ..Self::base(dapp, true, false)
        }
    }

    /// Another wallet already occupies the dApp.
    pub fn conflict(dapp: &DAppDescriptor, address: &PeerAddress) -> Self {
        Self {
            address: Some(address.clone()),
            error_message: Some(ANOTHER_WALLET_CONNECTED.to_string()),
            ..Self::base(dapp, false, false)
        }
    }

    /// A peer other than the connected wallet asked to disconnect.
    pub fn unregistered_disconnect(dapp: &DAppDescriptor, address: &PeerAddress) -> Self {
        Self {
            error_message: Some(format!(
                "Unregistered address {} is calling disconnect.",
                address
            )),
            ..Self::base(dapp, false, true)
        }
    }

    /// Disconnect requested while nothing is connected.
    pub fn no_wallet_connected(dapp: &DAppDescriptor) -> Self {
        Self {
            error_message: Some(NO_WALLET_CONNECTED.to_string()),
            ..Self::base(dapp, false, true)
        }
    }

    /// Disconnect accepted.
    pub fn disconnected(dapp: &DAppDescriptor) -> Self {
        Self::base(dapp, false, false)
    }

    /// Notification that the dApp is shutting its server down.
    pub fn shutdown(dapp: &DAppDescriptor) -> Self {
        Self {
            error_message: Some(SERVER_CLOSING.to_string()),
            ..Self::base(dapp, false, false)
        }
    }

    /// Capability handle published.
    pub fn api_injected(dapp: &DAppDescriptor) -> Self {
        Self::base(dapp, true, false)
    }

    /// Capability handle refused.
    pub fn api_rejected(dapp: &DAppDescriptor, reason: impl Into<String>) -> Self {
        Self {
            error_message: Some(reason.into()),
            ..Self::base(dapp, false, true)
        }
    }

    /// Whether this message reports an established pairing.
    pub fn is_connected(&self) -> bool {
        self.connected && !self.error
    }
}

/// Capability advertisement pushed by the wallet after pairing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    pub api_version: String,
    pub name: String,
    pub icon: String,
    /// Advertised method names. Names outside [`Cip30Function`] are carried
    /// but never proxied.
    pub methods: Vec<String>,
    /// Serialized type mapping of the restricted experimental set.
    pub experimental_api: String,
    /// Serialized type mapping of the full experimental set.
    pub full_experimental_api: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overwrite: Option<bool>,
}

impl CapabilityDescriptor {
    /// Build a descriptor from a wallet descriptor and serialized mappings.
    pub fn new(
        wallet: &WalletDescriptor,
        methods: impl IntoIterator<Item = Cip30Function>,
        experimental_api: String,
        full_experimental_api: String,
    ) -> Self {
        let mut descriptor = Self {
            api_version: wallet.version.clone(),
            name: wallet.name.clone(),
            icon: wallet.icon.clone(),
            methods: Vec::new(),
            experimental_api,
            full_experimental_api,
            overwrite: None,
        };
        descriptor.set_methods(methods);
        descriptor
    }

    /// Replace the method list, dropping duplicates but keeping first-seen order.
    pub fn set_methods(&mut self, methods: impl IntoIterator<Item = Cip30Function>) {
        self.methods.clear();
        for method in methods {
            let name = method.as_str().to_string();
            if !self.methods.contains(&name) {
                self.methods.push(name);
            }
        }
    }

    /// Well-known methods without duplicates, in advertisement order.
    ///
    /// Unknown names are skipped.
    pub fn unique_methods(&self) -> Vec<Cip30Function> {
        let mut seen = Vec::with_capacity(self.methods.len());
        for name in &self.methods {
            match name.parse::<Cip30Function>() {
                Ok(method) if !seen.contains(&method) => seen.push(method),
                Ok(_) => {}
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(method = %name, "skipping unknown wallet method");
                }
            }
        }
        seen
    }
}

/// Envelope of the `api` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequest {
    pub api: CapabilityDescriptor,
    #[serde(default)]
    pub overwrite: bool,
}

impl ApiRequest {
    /// Whether an existing publication under the same name may be replaced.
    pub fn allows_overwrite(&self) -> bool {
        self.overwrite || self.api.overwrite.unwrap_or(false)
    }
}

/// Sent by a dApp's discovery identity to the wallet's discovery identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRequest {
    /// Real pairing address of the dApp.
    pub dapp_address: PeerAddress,
}

/// Sent by the wallet after pairing so the dApp can find it again later.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetDiscoveryRequest {
    pub wallet_discovery_address: PeerAddress,
}
