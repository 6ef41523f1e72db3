//! CIP-30 wallet API vocabulary.
//!
//! See <https://cips.cardano.org/cips/cip30/>.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Hex-encoded CBOR.
pub type Cbor = String;

/// Well-known CIP-30 wallet methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Cip30Function {
    GetNetworkId,
    GetUtxos,
    GetCollateral,
    GetBalance,
    GetUsedAddresses,
    GetUnusedAddresses,
    GetChangeAddress,
    GetRewardAddresses,
    SignTx,
    SignData,
    SubmitTx,
}

impl Cip30Function {
    /// Every method, in the order wallets advertise them.
    pub const ALL: [Cip30Function; 11] = [
        Self::GetNetworkId,
        Self::GetUtxos,
        Self::GetCollateral,
        Self::GetBalance,
        Self::GetUsedAddresses,
        Self::GetUnusedAddresses,
        Self::GetChangeAddress,
        Self::GetRewardAddresses,
        Self::SignTx,
        Self::SignData,
        Self::SubmitTx,
    ];

    /// Method name on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetNetworkId => "getNetworkId",
            Self::GetUtxos => "getUtxos",
            Self::GetCollateral => "getCollateral",
            Self::GetBalance => "getBalance",
            Self::GetUsedAddresses => "getUsedAddresses",
            Self::GetUnusedAddresses => "getUnusedAddresses",
            Self::GetChangeAddress => "getChangeAddress",
            Self::GetRewardAddresses => "getRewardAddresses",
            Self::SignTx => "signTx",
            Self::SignData => "signData",
            Self::SubmitTx => "submitTx",
        }
    }
}

impl FromStr for Cip30Function {
    type Err = crate::PeerConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|function| function.as_str() == s)
            .ok_or_else(|| crate::PeerConnectError::not_found("wallet method", s))
    }
}

impl std::fmt::Display for Cip30Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pagination argument of `getUtxos`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginate {
    pub page: u32,
    pub limit: u32,
}

/// Result of `signData`: COSE_Sign1 and COSE_Key, both hex CBOR.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSignature {
    pub key: Cbor,
    pub signature: Cbor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_serde_representation() {
        for function in Cip30Function::ALL {
            let json = serde_json::to_value(function).unwrap();
            assert_eq!(json, function.as_str());
            assert_eq!(function.as_str().parse::<Cip30Function>().unwrap(), function);
        }
    }

    #[test]
    fn unknown_name_is_not_found() {
        let err = "getEverything".parse::<Cip30Function>().unwrap_err();
        assert_eq!(err.code(), crate::PeerConnectErrorCode::NotFound);
    }
}
