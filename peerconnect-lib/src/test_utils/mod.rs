//! Test utilities for peer connect.
//!
//! [`MemoryNetwork`] implements [`TransportFactory`](crate::TransportFactory)
//! entirely in process, so both sides of a pairing can run in one test.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use peerconnect_lib::test_utils::MemoryNetwork;
//! use peerconnect_lib::TransportOptions;
//!
//! let network = MemoryNetwork::new();
//! let dapp = network.connect(TransportOptions::default());
//! let wallet = network.connect(TransportOptions::default().with_identifier(dapp.address()));
//! let reply = wallet.rpc(&dapp.address(), "connect", descriptor).await?;
//! ```

mod memory_network;

pub use memory_network::{address_from_seed, random_seed, MemoryNetwork, MemoryTransport};
