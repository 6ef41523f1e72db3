
use mock_implementations::{
    assert_pending, dapp_config, recv, start_dapp, start_wallet, wallet_descriptor, DAppEvent,
    MockWalletApi, ScriptedVerifier, WalletEvent,
};
use peerconnect_interactive::{
    ConnectionGrant, ConnectionVerifier, SessionState, WalletAgent, WalletConfig,
};
use peerconnect_lib::capability::{Capability, CapabilitySet};
use peerconnect_lib::protocol::{endpoints, ANOTHER_WALLET_CONNECTED};
use peerconnect_lib::storage::MemoryStore;
use peerconnect_lib::test_utils::MemoryNetwork;
use peerconnect_lib::transport::call;
use peerconnect_lib::{
    Cip30Function, ConnectMessage, Paginate, PeerConnectError, SetDiscoveryRequest,
    TransportOptions,
};
use serde_json::{json, Value};
use std::sync::Arc;

#[tokio::test]
async fn wallet_pairs_and_serves_calls() {
    let network = MemoryNetwork::new();
    let (dapp, mut dapp_events) = start_dapp(&network, dapp_config(), None).await;

    let restricted = CapabilitySet::new();
    restricted.insert("walletVersion", Capability::value("2.1.0"));
    let full = CapabilitySet::new();
    full.insert("echo", Capability::function(|args| Ok(Value::Array(args))));
    full.insert(
        "delayedSum",
        Capability::async_function(|args: Vec<Value>| async move {
            Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>()))
        }),
    );

    let api = Arc::new(MockWalletApi::new());
    let (wallet_observer, mut wallet_events) =
        mock_implementations::RecordingWalletObserver::new();
    let wallet = WalletAgent::builder(
        wallet_descriptor("p2p-wallet"),
        api.clone(),
        Arc::new(network.clone()),
        Arc::new(MemoryStore::new()),
    )
    .observer(wallet_observer)
    .experimental(restricted)
    .enable_experimental(full)
    .start()
    .await
    .unwrap();

    wallet.connect(&dapp.address()).unwrap();

    let wallet_address = match recv(&mut dapp_events).await {
        DAppEvent::Connect(address, info) => {
            assert_eq!(info.name, "p2p-wallet");
            assert_eq!(info.address.as_ref(), Some(&address));
            address
        }
        other => panic!("expected connect, got {:?}", other),
    };
    match recv(&mut wallet_events).await {
        WalletEvent::Connect(message) => {
            assert!(message.connected);
            assert!(!message.error);
            assert_eq!(message.address.as_ref(), Some(&wallet_address));
            assert_eq!(message.dapp.address, Some(dapp.address()));
            assert_eq!(message.auto_connect, Some(false));
        }
        other => panic!("expected connect, got {:?}", other),
    }
    assert_eq!(
        recv(&mut dapp_events).await,
        DAppEvent::ApiInject("p2p-wallet".into(), wallet_address.clone())
    );
    match recv(&mut wallet_events).await {
        WalletEvent::ApiInject(message) => assert!(message.connected && !message.error),
        other => panic!("expected api inject, got {:?}", other),
    }

    assert_eq!(dapp.connected_wallet(), Some(wallet_address.clone()));
    assert_eq!(wallet.connected_dapp(), Some(dapp.address()));
    assert!(dapp.identicon().is_some());
    assert_eq!(dapp.identicon(), wallet.identicon());

    let handle = dapp.registry().get("P2P-Wallet").expect("published");
    assert_eq!(handle.identifier(), &wallet_address);
    assert_eq!(handle.api_version(), "1.0.0");
    assert!(handle.is_enabled().await);
    assert_eq!(
        handle.experimental().value("walletVersion"),
        Some(&json!("2.1.0"))
    );

    let enabled = handle.enable().await;
    assert_eq!(enabled.methods(), Cip30Function::ALL.to_vec());
    assert_eq!(enabled.get_network_id().await.unwrap(), 1);
    assert_eq!(enabled.get_balance().await.unwrap(), "1a000f4240");
    assert_eq!(
        enabled
            .get_utxos(None, Some(Paginate { page: 1, limit: 1 }))
            .await
            .unwrap(),
        Some(vec!["82825820bb".to_string()])
    );
    assert_eq!(enabled.get_collateral(None).await.unwrap(), None);
    assert_eq!(
        enabled.sign_tx("84a4".into(), true).await.unwrap(),
        "84a4-witness-true"
    );
    let signature = enabled.sign_data("addr1", "deadbeef").await.unwrap();
    assert_eq!(signature.signature, "sig-deadbeef");

    assert_eq!(
        enabled
            .experimental()
            .call("echo", vec![json!("a"), json!(2)])
            .await
            .unwrap(),
        json!(["a", 2])
    );
    assert_eq!(
        enabled
            .experimental()
            .call("delayedSum", vec![json!(2), json!(3)])
            .await
            .unwrap(),
        json!(5)
    );

    assert_eq!(
        api.calls(),
        vec!["getNetworkId", "getBalance", "getUtxos", "getCollateral", "signTx", "signData"]
    );
}

#[tokio::test]
async fn reconnect_from_connected_wallet_is_idempotent() {
    let network = MemoryNetwork::new();
    let verifier = ScriptedVerifier::new(ConnectionGrant::grant());
    let (dapp, mut dapp_events) = start_dapp(
        &network,
        dapp_config(),
        Some(verifier.clone() as Arc<dyn ConnectionVerifier>),
    )
    .await;
    let (wallet, _wallet_events) = start_wallet(
        &network,
        wallet_descriptor("p2p-wallet"),
        Arc::new(MockWalletApi::new()),
    )
    .await;

    wallet.connect(&dapp.address()).unwrap();
    let wallet_address = match recv(&mut dapp_events).await {
        DAppEvent::Connect(address, _) => address,
        other => panic!("expected connect, got {:?}", other),
    };

    let transport = wallet.transport_for(&dapp.address()).unwrap();
    let reply: ConnectMessage = call(
        transport.as_ref(),
        &dapp.address(),
        endpoints::CONNECT,
        &wallet_descriptor("p2p-wallet"),
    )
    .await
    .unwrap();

    assert!(reply.connected);
    assert!(!reply.error);
    assert_eq!(reply.address, Some(wallet_address.clone()));
    assert_eq!(reply.auto_connect, None);
    assert_eq!(verifier.calls(), 1);
    assert_eq!(dapp.connected_wallet(), Some(wallet_address));
}

#[tokio::test]
async fn second_wallet_is_rejected_softly() {
    let network = MemoryNetwork::new();
    let (dapp, mut dapp_events) = start_dapp(&network, dapp_config(), None).await;

    let (first, _first_events) = start_wallet(
        &network,
        wallet_descriptor("p2p-first"),
        Arc::new(MockWalletApi::new()),
    )
    .await;
    first.connect(&dapp.address()).unwrap();
    let first_address = match recv(&mut dapp_events).await {
        DAppEvent::Connect(address, _) => address,
        other => panic!("expected connect, got {:?}", other),
    };

    let (second, mut second_events) = start_wallet(
        &network,
        wallet_descriptor("p2p-second"),
        Arc::new(MockWalletApi::new()),
    )
    .await;
    second.connect(&dapp.address()).unwrap();

    match recv(&mut second_events).await {
        WalletEvent::Connect(message) => {
            assert!(!message.connected);
            assert!(!message.error);
            assert_eq!(
                message.error_message.as_deref(),
                Some(ANOTHER_WALLET_CONNECTED)
            );
        }
        other => panic!("expected connect, got {:?}", other),
    }

    assert_eq!(dapp.connected_wallet(), Some(first_address));
    assert_eq!(second.connected_dapp(), None);
    assert!(!dapp.registry().contains("p2p-second"));
}

#[tokio::test]
async fn denied_wallet_gets_an_error_reply() {
    let network = MemoryNetwork::new();
    let verifier = ScriptedVerifier::new(ConnectionGrant::deny());
    let (dapp, _dapp_events) = start_dapp(
        &network,
        dapp_config(),
        Some(verifier.clone() as Arc<dyn ConnectionVerifier>),
    )
    .await;
    let (wallet, mut wallet_events) = start_wallet(
        &network,
        wallet_descriptor("p2p-wallet"),
        Arc::new(MockWalletApi::new()),
    )
    .await;

    wallet.connect(&dapp.address()).unwrap();

    match recv(&mut wallet_events).await {
        WalletEvent::Connect(message) => {
            assert!(!message.connected);
            assert!(message.error);
            let wallet_address = wallet.transport_for(&dapp.address()).unwrap().address();
            assert_eq!(message.address.as_ref(), Some(&wallet_address));
            assert_eq!(
                message.error_message,
                Some(format!("User denied connection to {}", wallet_address))
            );
        }
        other => panic!("expected connect, got {:?}", other),
    }
    assert_eq!(dapp.session_state(), SessionState::Idle);
    assert!(wallet.is_discoverable());
}

#[tokio::test]
async fn trusted_wallet_skips_verification() {
    let network = MemoryNetwork::new();
    let verifier = ScriptedVerifier::new(ConnectionGrant::grant_with_auto_connect());
    let (dapp, mut dapp_events) = start_dapp(
        &network,
        dapp_config(),
        Some(verifier.clone() as Arc<dyn ConnectionVerifier>),
    )
    .await;

    let (observer, mut wallet_events) = mock_implementations::RecordingWalletObserver::new();
    let wallet = WalletAgent::builder(
        wallet_descriptor("p2p-wallet").requesting_autoconnect(),
        Arc::new(MockWalletApi::new()),
        Arc::new(network.clone()),
        Arc::new(MemoryStore::new()),
    )
    .config(WalletConfig::default().with_seed("stable-wallet-seed"))
    .observer(observer)
    .start()
    .await
    .unwrap();

    wallet.connect(&dapp.address()).unwrap();
    let wallet_address = match recv(&mut dapp_events).await {
        DAppEvent::Connect(address, _) => address,
        other => panic!("expected connect, got {:?}", other),
    };
    assert!(matches!(
        recv(&mut dapp_events).await,
        DAppEvent::ApiInject(..)
    ));
    assert_eq!(verifier.calls(), 1);
    assert!(dapp.trust().is_auto_connect(&wallet_address).await.unwrap());

    let message = wallet.disconnect(&dapp.address()).await.unwrap();
    assert!(!message.connected && !message.error);
    assert_eq!(recv(&mut dapp_events).await, DAppEvent::Disconnect(wallet_address.clone()));

    // Drain the first pairing's notifications.
    loop {
        if let WalletEvent::Disconnect(_) = recv(&mut wallet_events).await {
            break;
        }
    }

    wallet.connect(&dapp.address()).unwrap();
    match recv(&mut wallet_events).await {
        WalletEvent::Connect(message) => {
            assert!(message.connected);
            assert_eq!(message.auto_connect, Some(true));
            assert_eq!(message.address, Some(wallet_address.clone()));
        }
        other => panic!("expected connect, got {:?}", other),
    }
    assert_eq!(verifier.calls(), 1);
    assert_eq!(
        dapp.trust().auto_connect_ids().await.unwrap(),
        vec![wallet_address]
    );
}

#[tokio::test]
async fn auto_connect_needs_both_request_and_grant() {
    let network = MemoryNetwork::new();
    let verifier = ScriptedVerifier::new(ConnectionGrant::grant());
    let (dapp, mut dapp_events) = start_dapp(
        &network,
        dapp_config(),
        Some(verifier as Arc<dyn ConnectionVerifier>),
    )
    .await;
    let (wallet, _wallet_events) = start_wallet(
        &network,
        wallet_descriptor("p2p-wallet").requesting_autoconnect(),
        Arc::new(MockWalletApi::new()),
    )
    .await;

    wallet.connect(&dapp.address()).unwrap();
    let wallet_address = match recv(&mut dapp_events).await {
        DAppEvent::Connect(address, _) => address,
        other => panic!("expected connect, got {:?}", other),
    };
    assert!(!dapp.trust().is_auto_connect(&wallet_address).await.unwrap());
}

#[tokio::test]
async fn disconnect_is_guarded_by_connected_address() {
    let network = MemoryNetwork::new();
    let (dapp, mut dapp_events) = start_dapp(&network, dapp_config(), None).await;
    let rogue = network.connect(TransportOptions::default().with_identifier(dapp.address()));

    let reply: ConnectMessage = call(
        rogue.as_ref(),
        &dapp.address(),
        endpoints::DISCONNECT,
        &wallet_descriptor("p2p-rogue"),
    )
    .await
    .unwrap();
    assert!(reply.error);
    assert_eq!(reply.error_message.as_deref(), Some("No wallet is connected."));

    let (wallet, mut wallet_events) = start_wallet(
        &network,
        wallet_descriptor("p2p-wallet"),
        Arc::new(MockWalletApi::new()),
    )
    .await;
    wallet.connect(&dapp.address()).unwrap();
    let wallet_address = match recv(&mut dapp_events).await {
        DAppEvent::Connect(address, _) => address,
        other => panic!("expected connect, got {:?}", other),
    };
    assert_eq!(
        recv(&mut dapp_events).await,
        DAppEvent::ApiInject("p2p-wallet".into(), wallet_address.clone())
    );

    let reply: ConnectMessage = call(
        rogue.as_ref(),
        &dapp.address(),
        endpoints::DISCONNECT,
        &wallet_descriptor("p2p-rogue"),
    )
    .await
    .unwrap();
    assert!(!reply.connected);
    assert!(reply.error);
    assert_eq!(
        reply.error_message,
        Some(format!(
            "Unregistered address {} is calling disconnect.",
            rogue.address()
        ))
    );
    assert_eq!(dapp.connected_wallet(), Some(wallet_address.clone()));

    let message = wallet.disconnect(&dapp.address()).await.unwrap();
    assert!(!message.connected);
    assert!(!message.error);
    assert_eq!(dapp.connected_wallet(), None);
    assert_eq!(recv(&mut dapp_events).await, DAppEvent::Disconnect(wallet_address.clone()));
    assert_eq!(
        recv(&mut dapp_events).await,
        DAppEvent::ApiEject("p2p-wallet".into(), wallet_address)
    );

    loop {
        if let WalletEvent::Disconnect(_) = recv(&mut wallet_events).await {
            break;
        }
    }
    assert!(wallet.sessions().is_empty());
    assert!(wallet.is_discoverable());
    assert!(dapp.registry().is_empty());
}

#[tokio::test]
async fn republishing_needs_overwrite() {
    let network = MemoryNetwork::new();
    let (dapp, mut dapp_events) = start_dapp(&network, dapp_config(), None).await;
    let (wallet, _wallet_events) = start_wallet(
        &network,
        wallet_descriptor("p2p-wallet"),
        Arc::new(MockWalletApi::new()),
    )
    .await;

    wallet.connect(&dapp.address()).unwrap();
    recv(&mut dapp_events).await;
    assert!(matches!(
        recv(&mut dapp_events).await,
        DAppEvent::ApiInject(..)
    ));

    let rejected = wallet.inject_api(&dapp.address(), false).await.unwrap();
    assert!(!rejected.connected);
    assert!(rejected.error);
    assert_eq!(
        rejected.error_message.as_deref(),
        Some("Wallet with name p2p-wallet is already injected.")
    );

    let accepted = wallet.inject_api(&dapp.address(), true).await.unwrap();
    assert!(accepted.connected);
    assert!(!accepted.error);
    assert!(matches!(
        recv(&mut dapp_events).await,
        DAppEvent::ApiInject(..)
    ));
    assert_eq!(dapp.registry().len(), 1);
}

#[tokio::test]
async fn api_from_unconnected_peer_is_ignored() {
    let network = MemoryNetwork::new();
    let (dapp, _dapp_events) = start_dapp(&network, dapp_config(), None).await;
    let rogue = network.connect(TransportOptions::default().with_identifier(dapp.address()));

    let request = json!({
        "api": {
            "apiVersion": "1.0.0",
            "name": "p2p-rogue",
            "icon": "",
            "methods": ["getBalance"],
            "experimentalApi": "{}",
            "fullExperimentalApi": "{}"
        }
    });
    assert_pending(rogue.rpc(&dapp.address(), endpoints::API, request)).await;
    assert!(dapp.registry().is_empty());
}

#[tokio::test]
async fn remote_failures_reach_the_caller() {
    let network = MemoryNetwork::new();
    let (dapp, mut dapp_events) = start_dapp(&network, dapp_config(), None).await;

    let full = CapabilitySet::new();
    full.insert(
        "explode",
        Capability::function(|_| Err(PeerConnectError::Internal("boom".into()))),
    );
    full.insert("transient", Capability::value(true));

    let wallet = WalletAgent::builder(
        wallet_descriptor("p2p-wallet"),
        Arc::new(MockWalletApi::new()),
        Arc::new(network.clone()),
        Arc::new(MemoryStore::new()),
    )
    .enable_experimental(full.clone())
    .start()
    .await
    .unwrap();
    wallet.connect(&dapp.address()).unwrap();

    recv(&mut dapp_events).await;
    recv(&mut dapp_events).await;
    let enabled = dapp.registry().get("p2p-wallet").unwrap().enable().await;
    let experimental = enabled.experimental();

    let err = experimental.call("explode", Vec::new()).await.unwrap_err();
    assert!(matches!(err, PeerConnectError::Remote(_)));
    assert_eq!(err.to_string(), "internal error: boom");

    let err = experimental.call("missing", Vec::new()).await.unwrap_err();
    assert!(matches!(err, PeerConnectError::NotFound { .. }));

    // Removed on the wallet after it was advertised.
    full.remove("explode");
    let err = experimental.call("explode", Vec::new()).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "no property or function with the name 'explode' found"
    );
    assert_eq!(experimental.value("transient"), Some(&json!(true)));

    // Wallet method failures are logged on the wallet and never answered.
    assert_pending(enabled.submit_tx("84a4".into())).await;
}

#[tokio::test]
async fn set_discovery_is_refused_when_disabled() {
    let network = MemoryNetwork::new();
    let (dapp, mut dapp_events) = start_dapp(&network, dapp_config(), None).await;
    let (wallet, _wallet_events) = start_wallet(
        &network,
        wallet_descriptor("p2p-wallet"),
        Arc::new(MockWalletApi::new()),
    )
    .await;
    wallet.connect(&dapp.address()).unwrap();
    recv(&mut dapp_events).await;

    let transport = wallet.transport_for(&dapp.address()).unwrap();
    let stored: bool = call(
        transport.as_ref(),
        &dapp.address(),
        endpoints::SET_DISCOVERY,
        &SetDiscoveryRequest {
            wallet_discovery_address: "wallet-discovery".into(),
        },
    )
    .await
    .unwrap();

    assert!(!stored);
    assert_eq!(dapp.trust().wallet_discovery_address().await.unwrap(), None);
}

#[tokio::test]
async fn pairing_payload_carries_the_address() {
    let network = MemoryNetwork::new();
    let (dapp, _dapp_events) = start_dapp(&network, dapp_config(), None).await;

    let payload = dapp.pairing_payload();
    let mut parts = payload.split(':');
    assert_eq!(parts.next(), Some(dapp.address().as_str()));
    assert_eq!(parts.next(), Some("meerkat"));
    assert!(parts.next().unwrap().parse::<u128>().is_ok());
    assert_eq!(dapp.descriptor().address, Some(dapp.address()));
}

#[tokio::test]
async fn unknown_method_names_do_not_block_publication() {
    let network = MemoryNetwork::new();
    let (dapp, _dapp_events) = start_dapp(&network, dapp_config(), None).await;
    let peer = network.connect(TransportOptions::default().with_identifier(dapp.address()));

    let reply: ConnectMessage = call(
        peer.as_ref(),
        &dapp.address(),
        endpoints::CONNECT,
        &wallet_descriptor("p2p-extended"),
    )
    .await
    .unwrap();
    assert!(reply.connected);

    let request = json!({
        "api": {
            "apiVersion": "1.0.0",
            "name": "p2p-extended",
            "icon": "",
            "methods": ["getNetworkId", "getExtensions", "getNetworkId"],
            "experimentalApi": "{}",
            "fullExperimentalApi": "{}"
        }
    });
    let reply: ConnectMessage = serde_json::from_value(
        peer.rpc(&dapp.address(), endpoints::API, request)
            .await
            .unwrap(),
    )
    .unwrap();
    assert!(reply.connected);
    assert!(!reply.error);

    let handle = dapp.registry().get("p2p-extended").expect("published");
    assert_eq!(handle.identifier(), &peer.address());
    assert_eq!(
        handle.enable().await.methods(),
        vec![Cip30Function::GetNetworkId]
    );
}
