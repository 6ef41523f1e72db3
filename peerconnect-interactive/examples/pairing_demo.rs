//! Pairing Demo
//!
//! Runs a dApp and a wallet on an in-process network: the wallet pairs with
//! the address from the dApp's QR payload, the dApp calls the wallet through
//! the published API, and after a restart the dApp finds the wallet again
//! through its discovery address.
//!
//! Run with `RUST_LOG=debug` to follow the handshake.

use peerconnect_interactive::{DAppConfig, DAppPeerConnect, WalletAgent};
use peerconnect_lib::capability::{Capability, CapabilitySet};
use peerconnect_lib::storage::MemoryStore;
use peerconnect_lib::test_utils::MemoryNetwork;
use peerconnect_lib::{DAppDescriptor, PeerAddress, WalletDescriptor};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// Import mock implementations for the example
#[path = "../tests/mock_implementations.rs"]
mod mock_implementations;
use mock_implementations::MockWalletApi;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Peer Connect Pairing Demo ===\n");

    let network = MemoryNetwork::new();
    let dapp_store = Arc::new(MemoryStore::new());
    let config = DAppConfig::new(DAppDescriptor::new("DemoDApp", "https://dapp.example"))
        .with_wallet_discovery(true);

    // Step 1: dApp comes online
    println!("Step 1: Starting the dApp...");
    let dapp = DAppPeerConnect::builder(
        config.clone(),
        Arc::new(network.clone()),
        dapp_store.clone(),
    )
    .start()
    .await?;
    println!("  QR payload: {}\n", dapp.pairing_payload());

    // Step 2: wallet scans the payload
    println!("Step 2: Wallet pairs with the scanned address...");
    let extras = CapabilitySet::new();
    extras.insert("walletVersion", Capability::value("0.3.1"));
    let wallet = WalletAgent::builder(
        WalletDescriptor::new("p2p-demo-wallet", "1.0.0"),
        Arc::new(MockWalletApi::new()),
        Arc::new(network.clone()),
        Arc::new(MemoryStore::new()),
    )
    .experimental(extras)
    .start()
    .await?;

    let scanned = dapp.pairing_payload();
    let address = scanned.split(':').next().unwrap_or_default();
    wallet.connect(&PeerAddress::from(address))?;

    let handle = loop {
        if let Some(handle) = dapp.registry().get("p2p-demo-wallet") {
            break handle;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    println!("  ✓ Paired with {}", handle.identifier());
    if let Some(identicon) = dapp.identicon() {
        println!("  Identicon: {}", identicon);
    }
    println!();

    // Step 3: dApp uses the wallet
    println!("Step 3: Calling the wallet...");
    println!("  walletVersion: {:?}", handle.experimental().value("walletVersion"));
    let api = handle.enable().await;
    println!("  Network id: {}", api.get_network_id().await?);
    println!("  Balance: {}", api.get_balance().await?);
    println!("  Change address: {}\n", api.get_change_address().await?);

    // Step 4: dApp restarts
    println!("Step 4: Shutting the dApp down and starting it again...");
    while dapp.trust().wallet_discovery_address().await?.is_none() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    dapp.shutdown_server().await?;
    dapp.close().await;

    let restarted = DAppPeerConnect::builder(config, Arc::new(network.clone()), dapp_store)
        .start()
        .await?;
    while restarted.connected_wallet().is_none() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    println!("  ✓ Wallet found again through discovery, no scan needed\n");

    restarted.close().await;
    wallet.close();
    println!("=== Demo complete ===");
    Ok(())
}
