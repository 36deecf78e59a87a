//! Shared fixtures: an in-process chain node, a push-based subscription
//! node and a factory serving them.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{address, keccak256, Address, Bytes, U256};
use async_trait::async_trait;
use chainconnect::codec::multicall3;
use chainconnect::{
    BlockTag, ChainDescriptor, ChainId, Client, ClientConfig, Log, LogFilter, MockConnector,
    MockConnectorOptions, Provider, ProviderConfig, ProviderFactory, TransportError,
};
use chainconnect_core::NotificationStream;
use futures::channel::mpsc;
use futures::StreamExt;
use chainconnect_core::chains::MULTICALL3_ADDRESS;
use chainconnect_core::CallRequest;
use serde_json::Value;

pub const TOKEN: Address = address!("1111111111111111111111111111111111111111");
/// No code deployed: every call returns empty data.
pub const EMPTY: Address = address!("2222222222222222222222222222222222222222");
pub const HOLDER: Address = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");

/// Chain with a Multicall3 deployment.
pub const BATCHED: ChainId = 7_001;
/// Chain without a Multicall3 deployment.
pub const PLAIN: ChainId = 7_002;

pub fn batched_chain() -> ChainDescriptor {
    ChainDescriptor::new(BATCHED, "Batched", vec!["http://batched.test".into()])
        .with_multicall(MULTICALL3_ADDRESS)
}

pub fn plain_chain() -> ChainDescriptor {
    ChainDescriptor::new(PLAIN, "Plain", vec!["http://plain.test".into()])
}

pub use chainconnect::erc20_abi;

/// Allowance every owner has granted every spender: 2.5 tokens.
pub const ALLOWANCE: u128 = 2_500_000_000_000_000_000;
pub const GAS_PRICE_WEI: u64 = 3_000_000_000;

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn encode_output(value: DynSolValue) -> Bytes {
    DynSolValue::Tuple(vec![value]).abi_encode_params().into()
}

// ─── Node ────────────────────────────────────────────────────────────────────

/// An in-memory node serving one ERC-20 at [`TOKEN`] and Multicall3 at the
/// canonical address.
pub struct TestNode {
    url: String,
    /// `eth_call` round trips, aggregate calls included.
    calls: AtomicUsize,
    aggregate_calls: AtomicUsize,
    block_calls: AtomicUsize,
    latency: Duration,
    down: AtomicBool,
    /// Scripted heads; the last one repeats.
    heads: Mutex<VecDeque<u64>>,
    supply: Mutex<U256>,
    base_fee: Mutex<Option<U256>>,
    logs: Mutex<Vec<Log>>,
}

impl TestNode {
    pub fn new(url: &str) -> Arc<Self> {
        Self::with_latency(url, Duration::ZERO)
    }

    pub fn with_latency(url: &str, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_string(),
            calls: AtomicUsize::new(0),
            aggregate_calls: AtomicUsize::new(0),
            block_calls: AtomicUsize::new(0),
            latency,
            down: AtomicBool::new(false),
            heads: Mutex::new(VecDeque::from([1])),
            supply: Mutex::new(U256::from(1_000_000u64)),
            base_fee: Mutex::new(Some(U256::from(10_000_000_000u64))),
            logs: Mutex::new(Vec::new()),
        })
    }

    pub fn down(url: &str) -> Arc<Self> {
        let node = Self::new(url);
        node.set_down(true);
        node
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn aggregate_calls(&self) -> usize {
        self.aggregate_calls.load(Ordering::SeqCst)
    }

    pub fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }

    pub fn script_heads(&self, heads: impl IntoIterator<Item = u64>) {
        *self.heads.lock().unwrap() = heads.into_iter().collect();
    }

    pub fn set_supply(&self, supply: u64) {
        *self.supply.lock().unwrap() = U256::from(supply);
    }

    /// `None` makes the node look like a pre-London chain.
    pub fn set_base_fee(&self, wei: Option<u64>) {
        *self.base_fee.lock().unwrap() = wei.map(U256::from);
    }

    pub fn push_log(&self, block: u64, data: u8) {
        self.logs.lock().unwrap().push(Log {
            address: TOKEN,
            topics: vec![keccak256("Transfer(address,address,uint256)".as_bytes())],
            data: Bytes::from(vec![data]),
            block_number: Some(format!("{block:#x}")),
            block_hash: None,
            transaction_hash: None,
            log_index: Some("0x0".into()),
            removed: false,
        });
    }

    /// Execute one call against the token. `Err` carries revert data.
    fn execute(&self, to: Address, data: &[u8]) -> Result<Bytes, Bytes> {
        if to == EMPTY {
            return Ok(Bytes::new());
        }
        if to != TOKEN || data.len() < 4 {
            return Err(Bytes::new());
        }
        let sel = [data[0], data[1], data[2], data[3]];
        if sel == selector("totalSupply()") {
            Ok(encode_output(DynSolValue::Uint(*self.supply.lock().unwrap(), 256)))
        } else if sel == selector("balanceOf(address)") {
            Ok(encode_output(DynSolValue::Uint(U256::from(42u64), 256)))
        } else if sel == selector("decimals()") {
            Ok(encode_output(DynSolValue::Uint(U256::from(18u64), 8)))
        } else if sel == selector("symbol()") {
            Ok(encode_output(DynSolValue::String("TKN".into())))
        } else if sel == selector("name()") {
            Ok(encode_output(DynSolValue::String("Test Token".into())))
        } else if sel == selector("allowance(address,address)") {
            Ok(encode_output(DynSolValue::Uint(U256::from(ALLOWANCE), 256)))
        } else {
            Err(Bytes::new())
        }
    }

    fn aggregate(&self, data: &[u8]) -> Result<Bytes, TransportError> {
        let ty = DynSolType::Tuple(vec![DynSolType::Array(Box::new(DynSolType::Tuple(vec![
            DynSolType::Address,
            DynSolType::Bool,
            DynSolType::Bytes,
        ])))]);
        let decoded = ty
            .abi_decode_params(&data[4..])
            .map_err(|e| TransportError::Other(e.to_string()))?;
        let DynSolValue::Tuple(mut outer) = decoded else {
            return Err(TransportError::Other("bad aggregate3 input".into()));
        };
        let Some(DynSolValue::Array(calls)) = outer.pop() else {
            return Err(TransportError::Other("bad aggregate3 input".into()));
        };

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let DynSolValue::Tuple(fields) = call else {
                return Err(TransportError::Other("bad aggregate3 entry".into()));
            };
            let [DynSolValue::Address(target), DynSolValue::Bool(_), DynSolValue::Bytes(call_data)] =
                fields.as_slice()
            else {
                return Err(TransportError::Other("bad aggregate3 entry".into()));
            };
            let (success, return_data) = match self.execute(*target, call_data) {
                Ok(data) => (true, data),
                Err(data) => (false, data),
            };
            results.push(DynSolValue::Tuple(vec![
                DynSolValue::Bool(success),
                DynSolValue::Bytes(return_data.to_vec()),
            ]));
        }
        Ok(encode_output(DynSolValue::Array(results)))
    }

    fn check_up(&self) -> Result<(), TransportError> {
        if self.down.load(Ordering::SeqCst) {
            Err(TransportError::Http(format!("{}: connection refused", self.url)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Provider for TestNode {
    fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.check_up()?;

        if request.to == MULTICALL3_ADDRESS && request.data.starts_with(&multicall3::aggregate3_selector()) {
            self.aggregate_calls.fetch_add(1, Ordering::SeqCst);
            return self.aggregate(&request.data);
        }
        self.execute(request.to, &request.data).map_err(|data| {
            TransportError::Rpc(chainconnect_core::JsonRpcError {
                code: 3,
                message: "execution reverted".into(),
                data: Some(Value::String(data.to_string())),
            })
        })
    }

    async fn block_number(&self) -> Result<u64, TransportError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;
        let mut heads = self.heads.lock().unwrap();
        let head = *heads.front().unwrap_or(&0);
        if heads.len() > 1 {
            heads.pop_front();
        }
        Ok(head)
    }

    async fn balance(&self, _address: Address, _block: BlockTag) -> Result<U256, TransportError> {
        self.check_up()?;
        Ok(U256::from(1_500_000_000_000_000_000u128))
    }

    async fn gas_price(&self) -> Result<U256, TransportError> {
        self.check_up()?;
        Ok(U256::from(GAS_PRICE_WEI))
    }

    async fn base_fee_per_gas(&self) -> Result<Option<U256>, TransportError> {
        self.check_up()?;
        Ok(*self.base_fee.lock().unwrap())
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, TransportError> {
        self.check_up()?;
        let from = filter.from_block.unwrap_or(0);
        let to = filter.to_block.unwrap_or(u64::MAX);
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| filter.matches(log))
            .filter(|log| log.block_number_u64().is_some_and(|b| b >= from && b <= to))
            .cloned()
            .collect())
    }
}

// ─── Factory ─────────────────────────────────────────────────────────────────

/// Serves providers per chain, in the given order. Clones share the same
/// table, so a test can swap a chain's provider after the client is built.
#[derive(Clone, Default)]
pub struct StaticFactory {
    providers: Arc<Mutex<HashMap<ChainId, Vec<Arc<dyn Provider>>>>>,
    websockets: Arc<Mutex<HashMap<ChainId, Arc<dyn Provider>>>>,
}

impl StaticFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, chain_id: ChainId, provider: Arc<dyn Provider>) -> Self {
        self.providers.lock().unwrap().entry(chain_id).or_default().push(provider);
        self
    }

    pub fn with_websocket(self, chain_id: ChainId, provider: Arc<dyn Provider>) -> Self {
        self.websockets.lock().unwrap().insert(chain_id, provider);
        self
    }

    /// Serve only `provider` for `chain_id` from now on.
    pub fn replace(&self, chain_id: ChainId, provider: Arc<dyn Provider>) {
        self.providers.lock().unwrap().insert(chain_id, vec![provider]);
    }
}

impl ProviderFactory for StaticFactory {
    fn name(&self) -> &str {
        "static"
    }

    fn providers(&self, chain: &ChainDescriptor) -> Result<Vec<ProviderConfig>, TransportError> {
        Ok(self
            .providers
            .lock()
            .unwrap()
            .get(&chain.id)
            .into_iter()
            .flatten()
            .enumerate()
            .map(|(i, p)| ProviderConfig::new(Arc::clone(p), i as u32))
            .collect())
    }

    fn websocket(&self, chain: &ChainDescriptor) -> Result<Option<ProviderConfig>, TransportError> {
        Ok(self
            .websockets
            .lock()
            .unwrap()
            .get(&chain.id)
            .map(|p| ProviderConfig::new(Arc::clone(p), 0)))
    }
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

/// A push-based endpoint: heads and logs are sent by the test. Ending a
/// subscription closes the open stream; the next subscribe opens a new one.
#[derive(Default)]
pub struct SubscriptionNode {
    heads: Mutex<Option<mpsc::UnboundedSender<u64>>>,
    logs: Mutex<Option<mpsc::UnboundedSender<Log>>>,
    head_subscriptions: AtomicUsize,
    log_subscriptions: AtomicUsize,
}

impl SubscriptionNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn head_subscriptions(&self) -> usize {
        self.head_subscriptions.load(Ordering::SeqCst)
    }

    pub fn log_subscriptions(&self) -> usize {
        self.log_subscriptions.load(Ordering::SeqCst)
    }

    /// `false` when no subscription is open.
    pub fn push_head(&self, number: u64) -> bool {
        self.heads
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.unbounded_send(number).is_ok())
    }

    pub fn push_log(&self, block: u64, data: u8) -> bool {
        let log = Log {
            address: TOKEN,
            topics: vec![keccak256("Transfer(address,address,uint256)".as_bytes())],
            data: Bytes::from(vec![data]),
            block_number: Some(format!("{block:#x}")),
            block_hash: None,
            transaction_hash: None,
            log_index: Some("0x0".into()),
            removed: false,
        };
        self.logs
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.unbounded_send(log).is_ok())
    }

    pub fn end_head_subscription(&self) {
        self.heads.lock().unwrap().take();
    }

    pub fn end_log_subscription(&self) {
        self.logs.lock().unwrap().take();
    }

    fn unsupported(&self, operation: &str) -> TransportError {
        TransportError::Unsupported {
            endpoint: self.url().to_string(),
            operation: operation.to_string(),
        }
    }
}

#[async_trait]
impl Provider for SubscriptionNode {
    fn url(&self) -> &str {
        "ws://node.test"
    }

    async fn call(&self, _request: &CallRequest) -> Result<Bytes, TransportError> {
        Err(self.unsupported("eth_call"))
    }

    async fn block_number(&self) -> Result<u64, TransportError> {
        Err(self.unsupported("eth_blockNumber"))
    }

    async fn balance(&self, _address: Address, _block: BlockTag) -> Result<U256, TransportError> {
        Err(self.unsupported("eth_getBalance"))
    }

    async fn logs(&self, _filter: &LogFilter) -> Result<Vec<Log>, TransportError> {
        Err(self.unsupported("eth_getLogs"))
    }

    fn supports_subscriptions(&self) -> bool {
        true
    }

    async fn subscribe_blocks(&self) -> Result<NotificationStream<u64>, TransportError> {
        let (tx, rx) = mpsc::unbounded();
        *self.heads.lock().unwrap() = Some(tx);
        self.head_subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(rx.boxed())
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<NotificationStream<Log>, TransportError> {
        let (tx, rx) = mpsc::unbounded();
        *self.logs.lock().unwrap() = Some(tx);
        self.log_subscriptions.fetch_add(1, Ordering::SeqCst);
        let filter = filter.clone();
        Ok(rx.filter(move |log| std::future::ready(filter.matches(log))).boxed())
    }
}

// ─── Client ──────────────────────────────────────────────────────────────────

pub struct Harness {
    pub client: Client,
    pub wallet: Arc<MockConnector>,
    pub factory: StaticFactory,
    pub batched: Arc<TestNode>,
    pub plain: Arc<TestNode>,
}

/// A client over [`BATCHED`] (default chain) and [`PLAIN`], each served by
/// its own [`TestNode`], with one mock wallet starting on [`BATCHED`].
pub fn harness() -> Harness {
    harness_with(
        TestNode::new("node://batched"),
        TestNode::new("node://plain"),
        ClientConfig::default(),
    )
}

pub fn harness_with(batched: Arc<TestNode>, plain: Arc<TestNode>, config: ClientConfig) -> Harness {
    let factory = StaticFactory::new()
        .with(BATCHED, batched.clone())
        .with(PLAIN, plain.clone());
    harness_over(factory, batched, plain, config)
}

/// Like [`harness_with`], with a caller-built factory.
pub fn harness_over(
    factory: StaticFactory,
    batched: Arc<TestNode>,
    plain: Arc<TestNode>,
    config: ClientConfig,
) -> Harness {
    let wallet = Arc::new(MockConnector::new(MockConnectorOptions {
        chain_id: BATCHED,
        ..Default::default()
    }));
    let client = Client::builder()
        .chains([batched_chain(), plain_chain()])
        .provider(factory.clone())
        .connector(wallet.clone())
        .config(config)
        .build()
        .unwrap();
    Harness {
        client,
        wallet,
        factory,
        batched,
        plain,
    }
}

pub fn polling_every(ms: u64) -> ClientConfig {
    ClientConfig {
        polling_interval_ms: ms,
        ..Default::default()
    }
}

/// Wait until `check` holds, failing the test after a while.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Collects callback values.
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sink(&self) -> impl Fn(T) + Send + Sync + 'static {
        let seen = Arc::clone(&self.seen);
        move |value| seen.lock().unwrap().push(value)
    }

    /// For callbacks that receive a reference.
    pub fn sink_ref(&self) -> impl Fn(&T) + Send + Sync + 'static {
        let seen = Arc::clone(&self.seen);
        move |value: &T| seen.lock().unwrap().push(value.clone())
    }

    pub fn values(&self) -> Vec<T> {
        self.seen.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}
