
use mock_implementations::{
    assert_pending, dapp_config, recv, start_dapp, start_wallet, wallet_descriptor, DAppEvent,
    GatedVerifier, MockWalletApi, WalletEvent,
};
use peerconnect_interactive::{ConnectionGrant, ConnectionVerifier, SessionState};
use peerconnect_lib::protocol::{endpoints, SERVER_CLOSING};
use peerconnect_lib::test_utils::MemoryNetwork;
use peerconnect_lib::transport::call;
use peerconnect_lib::{handler_fn, ConnectMessage, PeerAddress, TransportOptions};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

async fn paired(
    network: &MemoryNetwork,
) -> (
    peerconnect_interactive::DAppPeerConnect,
    tokio::sync::mpsc::UnboundedReceiver<DAppEvent>,
    peerconnect_interactive::WalletAgent,
    tokio::sync::mpsc::UnboundedReceiver<WalletEvent>,
    PeerAddress,
) {
    let (dapp, mut dapp_events) = start_dapp(network, dapp_config(), None).await;
    let (wallet, mut wallet_events) = start_wallet(
        network,
        wallet_descriptor("p2p-wallet"),
        Arc::new(MockWalletApi::new()),
    )
    .await;

    wallet.connect(&dapp.address()).unwrap();
    let wallet_address = match recv(&mut dapp_events).await {
        DAppEvent::Connect(address, _) => address,
        other => panic!("expected connect, got {:?}", other),
    };
    assert!(matches!(
        recv(&mut dapp_events).await,
        DAppEvent::ApiInject(..)
    ));
    assert!(matches!(
        recv(&mut wallet_events).await,
        WalletEvent::Connect(_)
    ));
    assert!(matches!(
        recv(&mut wallet_events).await,
        WalletEvent::ApiInject(_)
    ));

    (dapp, dapp_events, wallet, wallet_events, wallet_address)
}

#[tokio::test]
async fn vanished_wallet_is_torn_down() {
    let network = MemoryNetwork::new();
    let (dapp, mut dapp_events, _wallet, _wallet_events, wallet_address) = paired(&network).await;

    network.kill(&wallet_address);

    assert_eq!(
        recv(&mut dapp_events).await,
        DAppEvent::Disconnect(wallet_address.clone())
    );
    assert_eq!(
        recv(&mut dapp_events).await,
        DAppEvent::ApiEject("p2p-wallet".into(), wallet_address)
    );
    assert_eq!(dapp.session_state(), SessionState::Idle);
    assert_eq!(dapp.connected_wallet(), None);
    assert_eq!(dapp.identicon(), None);
    assert!(dapp.registry().is_empty());
}

#[tokio::test]
async fn late_grant_after_teardown_is_dropped() {
    let network = MemoryNetwork::new();
    let (verifier, mut started) = GatedVerifier::new(ConnectionGrant::grant());
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
    let wallet_address = recv(&mut started).await;
    assert_eq!(dapp.session_state(), SessionState::AwaitingGrant);

    network.kill(&wallet_address);
    mock_implementations::eventually(|| {
        let state = dapp.session_state();
        async move { state == SessionState::Idle }
    })
    .await;

    verifier.release();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(dapp_events.try_recv().is_err());
    assert_eq!(dapp.session_state(), SessionState::Idle);
    assert_eq!(dapp.connected_wallet(), None);
    assert!(wallet.connected_dapp().is_none());
}

#[tokio::test]
async fn spoofed_shutdown_aborts_the_pairing() {
    let network = MemoryNetwork::new();
    let (dapp, mut dapp_events, wallet, mut wallet_events, wallet_address) =
        paired(&network).await;

    // Same swarm as the wallet's pairing identity, but not the dApp.
    let rogue = network.connect(TransportOptions::default().with_identifier(dapp.address()));
    let notice = serde_json::to_value(ConnectMessage::shutdown(dapp.descriptor())).unwrap();
    assert_pending(rogue.rpc(&wallet_address, endpoints::SHUTDOWN, notice)).await;

    match recv(&mut wallet_events).await {
        WalletEvent::SessionAborted(aborted, error) => {
            assert_eq!(aborted, dapp.address());
            assert!(error.contains(rogue.address().as_str()));
        }
        other => panic!("expected aborted session, got {:?}", other),
    }
    assert!(wallet.sessions().is_empty());
    assert_eq!(wallet.connected_dapp(), None);
    assert_eq!(wallet.identicon(), None);

    // Closing the pairing identity is visible to the dApp as a departure.
    assert_eq!(
        recv(&mut dapp_events).await,
        DAppEvent::Disconnect(wallet_address)
    );
    assert!(wallet_events.try_recv().is_err());
}

#[tokio::test]
async fn server_shutdown_notifies_wallet() {
    let network = MemoryNetwork::new();
    let (dapp, mut dapp_events, wallet, mut wallet_events, wallet_address) =
        paired(&network).await;

    dapp.shutdown_server().await.unwrap();

    match recv(&mut wallet_events).await {
        WalletEvent::ServerShutdown(message) => {
            assert!(!message.connected);
            assert!(!message.error);
            assert_eq!(message.error_message.as_deref(), Some(SERVER_CLOSING));
        }
        other => panic!("expected shutdown, got {:?}", other),
    }
    assert_eq!(
        recv(&mut dapp_events).await,
        DAppEvent::Disconnect(wallet_address.clone())
    );
    assert_eq!(
        recv(&mut dapp_events).await,
        DAppEvent::ApiEject("p2p-wallet".into(), wallet_address)
    );

    assert_eq!(dapp.session_state(), SessionState::Idle);
    assert!(wallet.sessions().is_empty());
    assert!(wallet.is_discoverable());

    // Nothing left to notify.
    dapp.shutdown_server().await.unwrap();
    assert!(dapp_events.try_recv().is_err());
}

#[tokio::test]
async fn wallet_disconnect_releases_both_sides() {
    let network = MemoryNetwork::new();
    let (dapp, mut dapp_events, wallet, mut wallet_events, wallet_address) =
        paired(&network).await;
    assert!(!wallet.is_discoverable());

    let message = wallet.disconnect(&dapp.address()).await.unwrap();
    assert!(!message.connected);
    assert!(!message.error);

    assert_eq!(
        recv(&mut wallet_events).await,
        WalletEvent::Disconnect(message)
    );
    assert_eq!(
        recv(&mut dapp_events).await,
        DAppEvent::Disconnect(wallet_address.clone())
    );
    assert_eq!(
        recv(&mut dapp_events).await,
        DAppEvent::ApiEject("p2p-wallet".into(), wallet_address.clone())
    );

    assert!(wallet.sessions().is_empty());
    assert!(wallet.is_discoverable());
    assert!(!network.is_online(&wallet_address));
    assert!(dapp.registry().is_empty());

    // A second disconnect has no session to use.
    assert!(wallet.disconnect(&dapp.address()).await.is_err());
}

#[tokio::test]
async fn closing_the_dapp_releases_the_wallet_silently() {
    let network = MemoryNetwork::new();
    let (dapp, mut dapp_events, wallet, mut wallet_events, wallet_address) =
        paired(&network).await;

    dapp.close().await;

    assert_eq!(
        recv(&mut dapp_events).await,
        DAppEvent::Disconnect(wallet_address.clone())
    );
    assert_eq!(
        recv(&mut dapp_events).await,
        DAppEvent::ApiEject("p2p-wallet".into(), wallet_address)
    );
    assert_eq!(dapp.session_state(), SessionState::Closed);
    assert!(!network.is_online(&dapp.address()));

    // The wallet only sees the dApp leave.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(wallet_events.try_recv().is_err());
    assert_eq!(wallet.connected_dapp(), None);
}

#[tokio::test]
async fn shutdown_does_not_wait_for_a_silent_wallet() {
    let network = MemoryNetwork::new();
    let config = dapp_config().with_shutdown_notice_timeout(Duration::from_millis(100));
    let (dapp, mut dapp_events) = start_dapp(&network, config, None).await;

    // A wallet that takes the notice but never answers it.
    let peer = network.connect(TransportOptions::default().with_identifier(dapp.address()));
    let (notices, mut received) = mpsc::unbounded_channel();
    peer.register(
        endpoints::SHUTDOWN,
        handler_fn(move |_from: PeerAddress, args: Value| {
            let notices = notices.clone();
            async move {
                let _ = notices.send(args);
                None
            }
        }),
    );

    let reply: ConnectMessage = call(
        peer.as_ref(),
        &dapp.address(),
        endpoints::CONNECT,
        &wallet_descriptor("p2p-silent"),
    )
    .await
    .unwrap();
    assert!(reply.connected);
    assert!(matches!(
        recv(&mut dapp_events).await,
        DAppEvent::Connect(address, _) if address == peer.address()
    ));

    tokio::time::timeout(Duration::from_secs(2), dapp.shutdown_server())
        .await
        .expect("shutdown_server returns")
        .unwrap();

    assert_eq!(dapp.connected_wallet(), None);
    assert_eq!(dapp.session_state(), SessionState::Idle);
    assert_eq!(
        recv(&mut dapp_events).await,
        DAppEvent::Disconnect(peer.address())
    );

    let notice: ConnectMessage = serde_json::from_value(recv(&mut received).await).unwrap();
    assert_eq!(notice.error_message.as_deref(), Some(SERVER_CLOSING));
    assert_eq!(notice.dapp.address, Some(dapp.address()));
}

#[tokio::test]
async fn shutdown_keeps_dapp_discovery_down() {
    let network = MemoryNetwork::new();
    let config = dapp_config()
        .with_wallet_discovery(true)
        .with_discovery_address(PeerAddress::from("unreachable-wallet-discovery"));
    let (dapp, mut dapp_events) = start_dapp(&network, config, None).await;
    // The dApp is already looking for the configured wallet.
    assert_eq!(network.online().len(), 2);

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
    assert!(matches!(
        recv(&mut dapp_events).await,
        DAppEvent::ApiInject(..)
    ));

    dapp.shutdown_server().await.unwrap();

    loop {
        if let WalletEvent::ServerShutdown(_) = recv(&mut wallet_events).await {
            break;
        }
    }
    assert_eq!(
        recv(&mut dapp_events).await,
        DAppEvent::Disconnect(wallet_address.clone())
    );
    assert_eq!(
        recv(&mut dapp_events).await,
        DAppEvent::ApiEject("p2p-wallet".into(), wallet_address)
    );

    // Let the wallet's departure reach the dApp.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(dapp_events.try_recv().is_err());

    let mut expected = vec![dapp.address(), wallet.discovery_address().unwrap()];
    expected.sort();
    assert_eq!(network.online(), expected);
}
