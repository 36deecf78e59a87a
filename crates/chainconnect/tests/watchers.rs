//! Long-running watchers: block feeds, re-reads, events and cancellation.

mod common;

use std::time::Duration;

use alloy_primitives::{Address, Bytes};
use chainconnect::{
    ClientConfig, ConnectorEvent, ContractEventConfig, ContractResult, Error, ReadContractConfig,
    WatchOptions,
};
use common::*;
use serde_json::json;

fn total_supply() -> ReadContractConfig {
    ReadContractConfig::new(TOKEN, erc20_abi(), "totalSupply")
}

fn no_blocks() -> WatchOptions {
    WatchOptions {
        listen_to_block: false,
        ..Default::default()
    }
}

// ─── Block numbers ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn block_numbers_are_strictly_increasing() {
    let h = harness_with(TestNode::new("node://batched"), TestNode::new("node://plain"), polling_every(100));
    h.plain.script_heads([5, 5, 4, 6, 6, 7]);
    let blocks = Recorder::new();

    let _w = h.client.watch_block_number(Some(PLAIN), blocks.sink()).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(blocks.values(), [5, 6, 7]);
}

#[tokio::test]
async fn block_watch_on_an_unknown_chain_is_rejected() {
    let h = harness();
    assert_eq!(
        h.client.watch_block_number(Some(999), |_| {}).unwrap_err(),
        Error::ChainNotConfigured { chain_id: 999 }
    );
    assert_eq!(h.client.active_watchers(), 0);
}

#[tokio::test(start_paused = true)]
async fn block_watchers_share_one_feed() {
    let h = harness_with(TestNode::new("node://batched"), TestNode::new("node://plain"), polling_every(100));
    h.plain.script_heads([1, 2]);
    let first = Recorder::new();
    let second = Recorder::new();

    let _a = h.client.watch_block_number(Some(PLAIN), first.sink()).unwrap();
    let _b = h.client.watch_block_number(Some(PLAIN), second.sink()).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(first.values().last(), Some(&2));
    assert_eq!(second.values().last(), Some(&2));
    // One poll per interval, not one per watcher.
    assert!(h.plain.block_calls() <= 12, "{} polls", h.plain.block_calls());
}

#[tokio::test(start_paused = true)]
async fn block_feed_moves_to_the_rebuilt_provider_after_eviction() {
    let h = harness_with(TestNode::new("node://batched"), TestNode::new("node://plain"), polling_every(100));
    h.plain.script_heads([1, 2, 3]);
    let blocks = Recorder::new();

    let _w = h.client.watch_block_number(Some(PLAIN), blocks.sink()).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(blocks.values(), [1, 2, 3]);

    let replacement = TestNode::new("node://replacement");
    replacement.script_heads([50, 51]);
    h.factory.replace(PLAIN, replacement.clone());
    h.plain.set_down(true);
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(replacement.block_calls() > 0);
    assert_eq!(blocks.values(), [1, 2, 3, 50, 51]);
}

#[tokio::test]
async fn block_feed_follows_an_invalidated_provider() {
    let h = harness_with(TestNode::new("node://batched"), TestNode::new("node://plain"), polling_every(10));
    h.client.connect("mock", None).await.unwrap();
    let blocks = Recorder::new();

    let _w = h.client.watch_block_number(Some(BATCHED), blocks.sink()).unwrap();
    eventually("first block", || blocks.len() == 1).await;

    let replacement = TestNode::new("node://replacement");
    replacement.script_heads([50]);
    h.factory.replace(BATCHED, replacement.clone());
    // Leaving BATCHED drops its cached providers.
    h.client.switch_network(PLAIN).await.unwrap();

    eventually("block from the rebuilt provider", || blocks.values().last() == Some(&50)).await;
}

#[tokio::test(start_paused = true)]
async fn head_subscription_is_reopened_after_the_stream_ends() {
    let ws = SubscriptionNode::new();
    let (batched, plain) = (TestNode::new("node://batched"), TestNode::new("node://plain"));
    let factory = StaticFactory::new()
        .with(BATCHED, batched.clone())
        .with(PLAIN, plain.clone())
        .with_websocket(PLAIN, ws.clone());
    let h = harness_over(factory, batched, plain, ClientConfig::default());
    let blocks = Recorder::new();

    let _w = h.client.watch_block_number(Some(PLAIN), blocks.sink()).unwrap();
    eventually("head subscription", || ws.head_subscriptions() == 1).await;
    assert!(ws.push_head(10));
    eventually("first head", || blocks.len() == 1).await;
    assert!(ws.push_head(9));
    assert!(ws.push_head(11));
    eventually("second head", || blocks.len() == 2).await;

    ws.end_head_subscription();
    eventually("second head subscription", || ws.head_subscriptions() == 2).await;
    assert!(ws.push_head(12));
    eventually("head after reopening", || blocks.len() == 3).await;

    assert_eq!(blocks.values(), [10, 11, 12]);
    assert_eq!(h.plain.block_calls(), 0);
}

// ─── Reads ───────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn read_watcher_delivers_only_changes() {
    let h = harness_with(TestNode::new("node://batched"), TestNode::new("node://plain"), polling_every(100));
    let results = Recorder::<ContractResult>::new();

    let _w = h
        .client
        .watch_read_contract(total_supply(), WatchOptions::default(), results.sink_ref());
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(results.values(), [Ok(json!("1000000"))]);

    h.batched.set_supply(5);
    h.batched.script_heads([2]);
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(results.values(), [Ok(json!("1000000")), Ok(json!("5"))]);
}

#[tokio::test(start_paused = true)]
async fn always_deliver_repeats_equal_results() {
    let h = harness_with(TestNode::new("node://batched"), TestNode::new("node://plain"), polling_every(100));
    h.batched.script_heads([1, 2, 3]);
    let results = Recorder::<ContractResult>::new();
    let options = WatchOptions {
        always_deliver: true,
        ..Default::default()
    };

    let _w = h.client.watch_read_contract(total_supply(), options, results.sink_ref());
    tokio::time::sleep(Duration::from_secs(1)).await;

    let values = results.values();
    assert!(values.len() >= 3, "{} deliveries", values.len());
    assert!(values.iter().all(|v| *v == Ok(json!("1000000"))));
}

#[tokio::test]
async fn account_change_triggers_a_re_read() {
    let h = harness();
    h.client.connect("mock", None).await.unwrap();
    let results = Recorder::<ContractResult>::new();
    let options = WatchOptions {
        always_deliver: true,
        ..no_blocks()
    };

    let _w = h.client.watch_read_contract(total_supply(), options, results.sink_ref());
    eventually("first read", || results.len() == 1).await;

    h.wallet
        .emit(ConnectorEvent::AccountsChanged(vec![Address::repeat_byte(0x42)]));
    eventually("re-read", || results.len() == 2).await;
}

#[tokio::test]
async fn current_chain_watch_follows_switch_network() {
    let h = harness();
    h.plain.set_supply(5);
    h.client.connect("mock", None).await.unwrap();
    let results = Recorder::<ContractResult>::new();

    let _w = h.client.watch_read_contract(total_supply(), no_blocks(), results.sink_ref());
    eventually("first read", || results.len() == 1).await;

    h.client.switch_network(PLAIN).await.unwrap();
    eventually("read on the new chain", || results.len() == 2).await;

    assert_eq!(results.values(), [Ok(json!("1000000")), Ok(json!("5"))]);
}

#[tokio::test]
async fn unknown_fixed_chain_is_delivered_once_then_stops() {
    let h = harness();
    let results = Recorder::<ContractResult>::new();

    let _w = h.client.watch_read_contract(
        total_supply().on_chain(999),
        WatchOptions::default(),
        results.sink_ref(),
    );
    eventually("watcher exit", || h.client.active_watchers() == 0).await;

    assert_eq!(results.values(), [Err(Error::ChainNotConfigured { chain_id: 999 })]);
}

#[tokio::test]
async fn watch_read_contracts_delivers_the_batch() {
    let h = harness();
    let results = Recorder::<Result<Vec<ContractResult>, Error>>::new();
    let config = chainconnect::ReadContractsConfig::new(vec![
        ReadContractConfig::new(TOKEN, erc20_abi(), "symbol"),
        ReadContractConfig::new(TOKEN, erc20_abi(), "decimals"),
    ]);

    let _w = h.client.watch_read_contracts(config, no_blocks(), results.sink_ref());
    eventually("batch", || results.len() == 1).await;

    let batch = results.values().remove(0).unwrap();
    assert_eq!(batch, [Ok(json!("TKN")), Ok(json!(18))]);
    assert_eq!(h.batched.aggregate_calls(), 1);
}

// ─── Cancellation ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn cancel_before_the_first_result_delivers_nothing() {
    let h = harness_with(
        TestNode::new("node://batched"),
        TestNode::with_latency("node://plain", Duration::from_millis(50)),
        ClientConfig::default(),
    );
    let results = Recorder::<ContractResult>::new();

    let unwatch = h.client.watch_read_contract(
        total_supply().on_chain(PLAIN),
        WatchOptions::default(),
        results.sink_ref(),
    );
    unwatch.cancel();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(results.len(), 0);
    assert_eq!(h.client.active_watchers(), 0);
}

#[tokio::test(start_paused = true)]
async fn destroy_stops_every_watcher() {
    let h = harness_with(TestNode::new("node://batched"), TestNode::new("node://plain"), polling_every(100));
    h.plain.script_heads(1..=100);
    let blocks = Recorder::new();

    let _w = h.client.watch_block_number(Some(PLAIN), blocks.sink()).unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(blocks.len() > 0);

    h.client.destroy();
    let seen = blocks.len();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(blocks.len(), seen);
    assert_eq!(h.client.active_watchers(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_returns_after_a_running_callback_finishes() {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    let h = harness_with(TestNode::new("node://batched"), TestNode::new("node://plain"), polling_every(10));
    h.plain.script_heads(1..=1_000);
    let started = Arc::new(AtomicBool::new(false));
    let running = Arc::new(AtomicBool::new(false));
    let calls = Arc::new(AtomicUsize::new(0));

    let unwatch = {
        let (started, running, calls) = (started.clone(), running.clone(), calls.clone());
        h.client
            .watch_block_number(Some(PLAIN), move |_| {
                running.store(true, Ordering::SeqCst);
                started.store(true, Ordering::SeqCst);
                calls.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                running.store(false, Ordering::SeqCst);
            })
            .unwrap()
    };
    eventually("callback running", || started.load(Ordering::SeqCst)).await;

    unwatch.cancel();
    assert!(!running.load(Ordering::SeqCst));
    let seen = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(calls.load(Ordering::SeqCst), seen);
}

// ─── Events ──────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn contract_events_are_polled_per_block_range() {
    let h = harness_with(TestNode::new("node://batched"), TestNode::new("node://plain"), polling_every(100));
    h.plain.push_log(2, 0xaa);
    h.plain.script_heads([1, 2, 3]);
    let batches = Recorder::<Result<Vec<chainconnect::Log>, Error>>::new();

    let _w = h.client.watch_contract_event(
        ContractEventConfig::event(TOKEN, "Transfer(address,address,uint256)").on_chain(PLAIN),
        batches.sink_ref(),
    );
    tokio::time::sleep(Duration::from_secs(1)).await;

    let batches = batches.values();
    assert_eq!(batches.len(), 1);
    let logs = batches[0].clone().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].data, Bytes::from(vec![0xaa]));
}


#[tokio::test(start_paused = true)]
async fn log_subscription_resubscribes_after_the_stream_ends() {
    let ws = SubscriptionNode::new();
    let (batched, plain) = (TestNode::new("node://batched"), TestNode::new("node://plain"));
    let factory = StaticFactory::new()
        .with(BATCHED, batched.clone())
        .with(PLAIN, plain.clone())
        .with_websocket(PLAIN, ws.clone());
    let h = harness_over(factory, batched, plain, ClientConfig::default());
    let batches = Recorder::<Result<Vec<chainconnect::Log>, Error>>::new();

    let _w = h.client.watch_contract_event(
        ContractEventConfig::event(TOKEN, "Transfer(address,address,uint256)").on_chain(PLAIN),
        batches.sink_ref(),
    );
    eventually("log subscription", || ws.log_subscriptions() == 1).await;
    assert!(ws.push_log(1, 0xaa));
    eventually("first log", || batches.len() == 1).await;

    ws.end_log_subscription();
    eventually("same filter subscribed again", || ws.log_subscriptions() == 2).await;
    assert!(ws.push_log(2, 0xbb));
    eventually("log after resubscribing", || batches.len() == 2).await;

    let data: Vec<Bytes> = batches
        .values()
        .into_iter()
        .map(|batch| batch.unwrap()[0].data.clone())
        .collect();
    assert_eq!(data, [Bytes::from(vec![0xaa]), Bytes::from(vec![0xbb])]);
}
