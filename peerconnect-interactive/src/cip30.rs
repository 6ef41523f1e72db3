//! CIP-30 method dispatch on the wallet side.
//!
//! The dApp sends `invoke [methodName, ...args]`; [`dispatch`] decodes the
//! positional arguments for the named method, calls the matching
//! [`WalletApi`] method and encodes the result.

use crate::{InteractiveError, Result};
use async_trait::async_trait;
use peerconnect_lib::{Cbor, Cip30Function, DataSignature, Paginate, PeerConnectError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// Wallet operations exposed to a paired dApp.
///
/// See <https://cips.cardano.org/cips/cip30/> for the semantics of each call.
#[async_trait]
pub trait WalletApi: Send + Sync {
    async fn get_network_id(&self) -> Result<u32>;

    async fn get_utxos(
        &self,
        amount: Option<Cbor>,
        paginate: Option<Paginate>,
    ) -> Result<Option<Vec<Cbor>>>;

    async fn get_collateral(&self, amount: Option<Cbor>) -> Result<Option<Vec<Cbor>>>;

    async fn get_balance(&self) -> Result<Cbor>;

    async fn get_used_addresses(&self) -> Result<Vec<Cbor>>;

    async fn get_unused_addresses(&self) -> Result<Vec<Cbor>>;

    async fn get_change_address(&self) -> Result<Cbor>;

    async fn get_reward_addresses(&self) -> Result<Vec<Cbor>>;

    async fn sign_tx(&self, tx: Cbor, partial_sign: bool) -> Result<Cbor>;

    /// `payload` is hex-encoded bytes.
    async fn sign_data(&self, address: String, payload: String) -> Result<DataSignature>;

    /// Returns the transaction hash.
    async fn submit_tx(&self, tx: Cbor) -> Result<String>;
}

#[derive(Deserialize)]
struct CollateralParams {
    #[serde(default)]
    amount: Option<Cbor>,
}

// Missing and `null` arguments both read as absent.
fn optional<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<Option<T>> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
    }
}

fn required<T: DeserializeOwned>(args: &[Value], index: usize, name: &str) -> Result<T> {
    optional(args, index)?.ok_or_else(|| {
        InteractiveError::PeerConnect(PeerConnectError::invalid_data(name, "argument is required"))
    })
}

/// Call `method` on `api` with positional `args` and encode the result.
pub async fn dispatch(api: &dyn WalletApi, method: Cip30Function, args: &[Value]) -> Result<Value> {
    let value = match method {
        Cip30Function::GetNetworkId => serde_json::to_value(api.get_network_id().await?)?,
        Cip30Function::GetUtxos => {
            let amount = optional(args, 0)?;
            let paginate = optional(args, 1)?;
            serde_json::to_value(api.get_utxos(amount, paginate).await?)?
        }
        Cip30Function::GetCollateral => {
            let params: Option<CollateralParams> = optional(args, 0)?;
            let amount = params.and_then(|p| p.amount);
            serde_json::to_value(api.get_collateral(amount).await?)?
        }
        Cip30Function::GetBalance => serde_json::to_value(api.get_balance().await?)?,
        Cip30Function::GetUsedAddresses => serde_json::to_value(api.get_used_addresses().await?)?,
        Cip30Function::GetUnusedAddresses => {
            serde_json::to_value(api.get_unused_addresses().await?)?
        }
        Cip30Function::GetChangeAddress => serde_json::to_value(api.get_change_address().await?)?,
        Cip30Function::GetRewardAddresses => {
            serde_json::to_value(api.get_reward_addresses().await?)?
        }
        Cip30Function::SignTx => {
            let tx = required(args, 0, "tx")?;
            let partial_sign = optional(args, 1)?.unwrap_or(false);
            serde_json::to_value(api.sign_tx(tx, partial_sign).await?)?
        }
        Cip30Function::SignData => {
            let address = required(args, 0, "addr")?;
            let payload = required(args, 1, "payload")?;
            serde_json::to_value(api.sign_data(address, payload).await?)?
        }
        Cip30Function::SubmitTx => {
            let tx = required(args, 0, "tx")?;
            serde_json::to_value(api.submit_tx(tx).await?)?
        }
    };
    Ok(value)
}
