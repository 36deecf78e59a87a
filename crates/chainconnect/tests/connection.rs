//! Wallet connection lifecycle through the client.

mod common;

use std::sync::Arc;

use alloy_primitives::Address;
use chainconnect::{
    Client, ClientConfig, ConnectionStatus, ConnectorEvent, ConnectorState, Error, MemoryStorage,
    MockConnector, MockConnectorOptions,
};
use common::*;

fn client_with_storage(storage: MemoryStorage, wallet: Arc<MockConnector>, autoconnect: bool) -> Client {
    Client::builder()
        .chains([batched_chain(), plain_chain()])
        .provider(
            StaticFactory::new()
                .with(BATCHED, TestNode::new("node://batched"))
                .with(PLAIN, TestNode::new("node://plain")),
        )
        .connector(wallet)
        .storage(storage)
        .config(ClientConfig {
            autoconnect,
            ..Default::default()
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn double_disconnect_is_harmless() {
    let h = harness();
    h.client.connect("mock", None).await.unwrap();

    h.client.disconnect().await;
    assert_eq!(h.client.connector_state(), ConnectorState::Disconnected);
    h.client.disconnect().await;
    assert_eq!(h.client.connector_state(), ConnectorState::Disconnected);
    assert!(!h.wallet.is_connected());
}

#[tokio::test]
async fn disconnect_without_connecting_still_notifies() {
    let h = harness();
    let statuses = Recorder::new();
    let sink = statuses.sink();
    let _unwatch = h.client.watch_account(move |account| sink(account.status));

    h.client.disconnect().await;
    assert_eq!(statuses.values(), [ConnectionStatus::Disconnected]);
    assert_eq!(h.client.account().status, ConnectionStatus::Disconnected);

    h.client.disconnect().await;
    assert_eq!(statuses.values(), [ConnectionStatus::Disconnected; 2]);
}

#[tokio::test]
async fn second_connect_is_rejected() {
    let h = harness();
    h.client.connect("mock", None).await.unwrap();
    assert_eq!(
        h.client.connect("mock", None).await.unwrap_err(),
        Error::ConnectorAlreadyConnected
    );
    assert!(matches!(
        h.client.connect("nope", None).await,
        Err(Error::ConnectorNotFound { .. })
    ));
}

#[tokio::test]
async fn rejected_connect_returns_to_disconnected() {
    let h = harness();
    h.wallet.set_fail_connect(true);
    let statuses = Recorder::new();
    let sink = statuses.sink();
    let _unwatch = h.client.watch_account(move |account| sink(account.status));

    assert_eq!(
        h.client.connect("mock", None).await.unwrap_err(),
        Error::UserRejectedRequest
    );
    assert_eq!(
        statuses.values(),
        [
            ConnectionStatus::Connecting,
            ConnectionStatus::Error,
            ConnectionStatus::Disconnected
        ]
    );
}

#[tokio::test]
async fn wallet_events_update_account_and_network() {
    let h = harness();
    h.client.connect("mock", None).await.unwrap();

    let accounts = Recorder::new();
    let networks = Recorder::new();
    let sink = accounts.sink();
    let _a = h.client.watch_account(move |account| sink(account.address));
    let sink = networks.sink();
    let _n = h
        .client
        .watch_network(move |network| sink(network.chain.as_ref().map(|c| (c.id, c.unsupported))));

    let next = Address::repeat_byte(0x42);
    h.wallet.emit(ConnectorEvent::AccountsChanged(vec![next]));
    eventually("account change", || accounts.len() == 1).await;
    assert_eq!(h.client.account().address, Some(next));

    h.wallet.emit(ConnectorEvent::ChainChanged(999));
    eventually("network change", || networks.len() == 1).await;
    assert_eq!(networks.values(), [Some((999, true))]);
    // Reads stay on the default chain while the wallet is somewhere unknown.
    assert_eq!(h.client.chain_id(), BATCHED);

    h.wallet.emit(ConnectorEvent::Disconnect);
    eventually("disconnect", || accounts.len() == 2).await;
    assert_eq!(accounts.values()[1], None);
    assert_eq!(h.client.network().chain, None);
}

#[tokio::test]
async fn autoconnect_restores_the_last_connector() {
    let storage = MemoryStorage::new();
    let wallet = Arc::new(MockConnector::new(MockConnectorOptions {
        authorized: true,
        chain_id: PLAIN,
        ..Default::default()
    }));

    let first = client_with_storage(storage.clone(), wallet.clone(), true);
    first.connect("mock", None).await.unwrap();
    first.destroy();

    let second = client_with_storage(storage.clone(), wallet.clone(), true);
    let restored = second.start().await.unwrap();
    assert_eq!(restored.chain_id, PLAIN);
    assert!(second.account().is_connected());
    assert_eq!(second.chain_id(), PLAIN);
    assert_eq!(wallet.connect_calls(), 2);
}

#[tokio::test]
async fn autoconnect_disabled_or_forgotten() {
    let storage = MemoryStorage::new();
    let wallet = Arc::new(MockConnector::new(MockConnectorOptions {
        authorized: true,
        ..Default::default()
    }));

    let first = client_with_storage(storage.clone(), wallet.clone(), false);
    first.connect("mock", None).await.unwrap();
    assert!(first.start().await.is_none());

    first.disconnect().await;
    let second = client_with_storage(storage, wallet.clone(), true);
    assert!(second.start().await.is_none());
    assert!(!second.account().is_connected());
}

#[tokio::test]
async fn switch_network_moves_reads_and_provider() {
    let h = harness();
    h.client.connect("mock", None).await.unwrap();
    let providers = Recorder::new();
    let sink = providers.sink();
    let _p = h.client.watch_provider(move |handle| sink(handle.chain_id()));

    let chain = h.client.switch_network(PLAIN).await.unwrap();

    assert_eq!(chain.id, PLAIN);
    assert_eq!(h.client.network().chain.unwrap().id, PLAIN);
    assert_eq!(h.client.provider(None).unwrap().chain_id(), PLAIN);
    assert_eq!(providers.values(), [PLAIN]);
}

#[tokio::test]
async fn register_chain_makes_an_unknown_wallet_chain_supported() {
    let h = harness();
    h.wallet.emit(ConnectorEvent::ChainChanged(4242));
    h.client.connect("mock", None).await.unwrap();
    assert!(h.client.network().chain.unwrap().unsupported);

    let networks = Recorder::new();
    let sink = networks.sink();
    let _n = h
        .client
        .watch_network(move |network| sink(network.chain.as_ref().map(|c| c.unsupported)));

    h.client
        .register_chain(chainconnect::ChainDescriptor::new(
            4242,
            "Later",
            vec!["http://later.test".into()],
        ))
        .unwrap();

    assert_eq!(networks.values(), [Some(false)]);
    assert_eq!(h.client.chain_id(), 4242);
    // The static factory has no endpoint for the new chain.
    assert_eq!(
        h.client.provider(None).unwrap_err(),
        Error::ProviderChainsNotFound { chain_id: 4242 }
    );
}
