//! Error types for peer connect operations.
//!
//! Handshake-level rejections never surface here: they travel back across the
//! wire as [`ConnectMessage`](crate::ConnectMessage) payloads. These errors
//! cover everything that is allowed to fail locally.

use std::fmt;

/// Error codes for FFI and embedding applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PeerConnectErrorCode {
    /// Transport/network layer error
    Transport = 2000,
    /// No peer is connected on this session
    NotConnected = 2001,
    /// Peer sent a message contradicting its claimed identity
    ProtocolViolation = 3000,
    /// Capability or record not found
    NotFound = 4000,
    /// Remote side rejected the call
    Remote = 4001,
    /// Invalid request/data
    InvalidData = 5000,
    /// Serialization error
    Serialization = 5002,
    /// Storage error
    Storage = 7000,
    /// Internal/unexpected error
    Internal = 9999,
}

/// Comprehensive error type for peer connect operations.
#[derive(Debug)]
pub enum PeerConnectError {
    /// Transport/network layer error.
    Transport(String),

    /// Operation needs a connected peer and there is none.
    NotConnected,

    /// A peer's message contradicts the identity it claims.
    ProtocolViolation {
        /// Address the message arrived from
        sender: String,
        /// Address the message claims to come from
        claimed: String,
    },

    /// Resource not found (capability, record, endpoint).
    NotFound {
        /// Type of resource (e.g., "capability", "session")
        resource_type: String,
        /// Resource identifier
        identifier: String,
    },

    /// The remote side answered with an error payload.
    Remote(String),

    /// Invalid data provided.
    InvalidData {
        /// Field or parameter name
        field: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Serialization/deserialization error.
    Serialization(String),

    /// Storage operation failed.
    Storage(String),

    /// Internal/unexpected error.
    Internal(String),
}

impl PeerConnectError {
    /// Get the error code for FFI/embedding integration.
    pub fn code(&self) -> PeerConnectErrorCode {
        match self {
            Self::Transport(_) => PeerConnectErrorCode::Transport,
            Self::NotConnected => PeerConnectErrorCode::NotConnected,
            Self::ProtocolViolation { .. } => PeerConnectErrorCode::ProtocolViolation,
            Self::NotFound { .. } => PeerConnectErrorCode::NotFound,
            Self::Remote(_) => PeerConnectErrorCode::Remote,
            Self::InvalidData { .. } => PeerConnectErrorCode::InvalidData,
            Self::Serialization(_) => PeerConnectErrorCode::Serialization,
            Self::Storage(_) => PeerConnectErrorCode::Storage,
            Self::Internal(_) => PeerConnectErrorCode::Internal,
        }
    }

    /// Get the error message as an owned String (useful for FFI).
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Returns true if this error is potentially recoverable by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Storage(_))
    }

    /// Returns true if this error must abort the session it occurred on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }

    /// Create a transport error from any error type.
    pub fn transport<E: std::error::Error>(err: E) -> Self {
        Self::Transport(err.to_string())
    }

    /// Create a not found error.
    pub fn not_found(resource_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            identifier: identifier.into(),
        }
    }

    /// Create an invalid data error.
    pub fn invalid_data(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidData {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for PeerConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::NotConnected => write!(f, "no peer is connected"),
            Self::ProtocolViolation { sender, claimed } => {
                write!(
                    f,
                    "protocol violation: address {} sent a message claiming to be {}",
                    sender, claimed
                )
            }
            Self::NotFound {
                resource_type,
                identifier,
            } => {
                write!(f, "no {} with the name '{}' found", resource_type, identifier)
            }
            Self::Remote(msg) => write!(f, "{}", msg),
            Self::InvalidData { field, reason } => {
                write!(f, "invalid {}: {}", field, reason)
            }
            Self::Serialization(msg) => write!(f, "serialization error: {}", msg),
            Self::Storage(msg) => write!(f, "storage error: {}", msg),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for PeerConnectError {}

impl From<serde_json::Error> for PeerConnectError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<crate::storage::StorageError> for PeerConnectError {
    fn from(err: crate::storage::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}
