//! The client: one explicit context object tying connectors, providers,
//! reads and watchers together.
//!
//! ```text
//!              ┌──────────────── Client ────────────────┐
//! connect ───▶ │ ConnectorManager ──StateChange──┐       │
//!              │                                 ▼       │
//!              │              account / network / provider listeners
//!              │                                 │       │
//!              │                      ContextChange (broadcast)
//!              │                                 ▼       │
//! read_* ────▶ │ ReadEngine ◀──── watcher tasks ◀─ BlockFeeds
//!              │      │                                  │
//!              │ ProviderResolver ── on_change ──▶ provider listeners
//!              └─────────────────────────────────────────┘
//! ```

use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use alloy_primitives::{utils::format_units, Address, U256};
use chainconnect_core::{BlockTag, ChainDescriptor, ChainId, ChainRegistry, Log, Provider};
use futures::future::FutureExt;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::codec::{erc20_abi, AbiCodec, ContractCodec};
use crate::config::ClientConfig;
use crate::connector::{
    ConnectionStatus, Connector, ConnectorData, ConnectorManager, ConnectorState, StateChange,
};
use crate::error::Error;
use crate::listeners::Listeners;
use crate::provider::{ProviderFactory, ProviderHandle, ProviderResolver, PublicProvider};
use crate::read::{ContractResult, MulticallConfig, ReadContractConfig, ReadContractsConfig, ReadEngine};
use crate::storage::{ClientStorage, MemoryStorage, Storage};
use crate::watch::tasks::{self, Deliver, ReadFn, WatchContext, WatchValue};
use crate::watch::{
    BlockFeeds, ContextChange, ContractEventConfig, Gate, Unwatch, WatchOptions, WatchTarget,
    Watchers,
};

const CONTEXT_CHANNEL_CAPACITY: usize = 64;

// ─── Snapshots ───────────────────────────────────────────────────────────────

/// The connected account, as reported by [`Client::account`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub address: Option<Address>,
    pub connector_id: Option<String>,
    pub status: ConnectionStatus,
}

impl Account {
    fn from_state(state: &ConnectorState) -> Self {
        Self {
            address: state.account(),
            connector_id: state.connector_id().map(str::to_string),
            status: state.status(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// The chain the wallet is on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkChain {
    pub id: ChainId,
    /// `None` when the wallet is on a chain the client does not know.
    pub descriptor: Option<Arc<ChainDescriptor>>,
    pub unsupported: bool,
}

/// Connected chain plus every configured chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    /// `None` while no wallet is connected.
    pub chain: Option<NetworkChain>,
    pub chains: Vec<Arc<ChainDescriptor>>,
}

/// An amount of the native currency or of a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    pub value: U256,
    pub decimals: u8,
    pub symbol: String,
    /// `value` scaled by `decimals`.
    pub formatted: String,
}

/// A raw amount and its decimal rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Amount {
    pub value: U256,
    pub formatted: String,
}

/// ERC-20 metadata, as returned by [`Client::fetch_token`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: Amount,
}

/// Fee market snapshot, in wei. The EIP-1559 fields are `None` on chains
/// whose blocks carry no base fee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeData {
    pub gas_price: U256,
    pub last_base_fee_per_gas: Option<U256>,
    /// `2 * last_base_fee_per_gas + max_priority_fee_per_gas`.
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    /// The same values in gwei.
    pub formatted: FormattedFeeData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedFeeData {
    pub gas_price: String,
    pub last_base_fee_per_gas: Option<String>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
}

/// Suggested tip: 1.5 gwei.
const PRIORITY_FEE_WEI: u64 = 1_500_000_000;
const GWEI_DECIMALS: u8 = 9;

fn format_amount(value: U256, decimals: u8) -> String {
    format_units(value, decimals).unwrap_or_else(|_| value.to_string())
}

fn unexpected_result(function_name: &str, value: &Value) -> Error {
    Error::ContractResultDecode {
        function_name: function_name.to_string(),
        reason: format!("unexpected value {value}"),
    }
}

fn string_result(function_name: &str, value: Value) -> Result<String, Error> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(unexpected_result(function_name, &other)),
    }
}

fn uint_result(function_name: &str, value: &Value) -> Result<U256, Error> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().map(U256::from),
        Value::String(s) => U256::from_str(s).ok(),
        _ => None,
    };
    parsed.ok_or_else(|| unexpected_result(function_name, value))
}

fn decimals_result(value: &Value) -> Result<u8, Error> {
    let decimals = uint_result("decimals", value)?;
    u8::try_from(decimals).map_err(|_| unexpected_result("decimals", value))
}

/// The chain reads and "current chain" watchers use: the connected chain when
/// it is configured, the first configured chain otherwise.
fn effective_chain(state: &ConnectorState, resolver: &ProviderResolver) -> ChainId {
    state
        .chain_id()
        .filter(|id| resolver.contains(*id))
        .or_else(|| resolver.default_chain_id())
        .unwrap_or_default()
}

// ─── Builder ─────────────────────────────────────────────────────────────────

/// Configures and builds a [`Client`].
///
/// Defaults: [`PublicProvider`] when no provider factory is added,
/// [`MemoryStorage`], [`AbiCodec`] and [`ClientConfig::default`].
#[derive(Default)]
pub struct ClientBuilder {
    chains: Vec<ChainDescriptor>,
    connectors: Vec<Arc<dyn Connector>>,
    factories: Vec<Arc<dyn ProviderFactory>>,
    storage: Option<Arc<dyn Storage>>,
    codec: Option<Arc<dyn ContractCodec>>,
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chain. The first chain added is the default chain.
    #[must_use]
    pub fn chain(mut self, chain: ChainDescriptor) -> Self {
        self.chains.push(chain);
        self
    }

    #[must_use]
    pub fn chains(mut self, chains: impl IntoIterator<Item = ChainDescriptor>) -> Self {
        self.chains.extend(chains);
        self
    }

    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors.push(connector);
        self
    }

    #[must_use]
    pub fn provider(mut self, factory: impl ProviderFactory) -> Self {
        self.factories.push(Arc::new(factory));
        self
    }

    #[must_use]
    pub fn storage(mut self, storage: impl Storage) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    #[must_use]
    pub fn codec(mut self, codec: impl ContractCodec) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the chains, build a provider for each and wire the
    /// components together. No network request is sent.
    pub fn build(self) -> Result<Client, Error> {
        let registry =
            ChainRegistry::new(self.chains).map_err(|e| Error::InvalidChainConfig(e.to_string()))?;
        if registry.is_empty() {
            return Err(Error::InvalidChainConfig("at least one chain is required".into()));
        }

        let factories = if self.factories.is_empty() {
            vec![Arc::new(PublicProvider::new()) as Arc<dyn ProviderFactory>]
        } else {
            self.factories
        };
        let resolver = Arc::new(ProviderResolver::new(
            registry,
            factories,
            self.config.fallback.clone(),
            self.config.eviction.clone(),
        ));
        resolver.validate()?;

        let storage = ClientStorage::new(
            self.storage
                .unwrap_or_else(|| Arc::new(MemoryStorage::new()) as Arc<dyn Storage>),
            self.config.storage_key.clone(),
        );
        let codec = self
            .codec
            .unwrap_or_else(|| Arc::new(AbiCodec::new()) as Arc<dyn ContractCodec>);
        let manager = ConnectorManager::new(self.connectors, storage);
        let engine = Arc::new(ReadEngine::new(
            Arc::clone(&resolver),
            codec,
            self.config.multicall.clone(),
        ));
        let feeds = BlockFeeds::new(Arc::clone(&resolver), self.config.polling_interval());
        let (changes, _) = broadcast::channel(CONTEXT_CHANNEL_CAPACITY);
        let current_chain = effective_chain(&manager.state(), &resolver);

        let inner = Arc::new(ClientInner {
            config: self.config,
            manager,
            resolver,
            engine,
            feeds,
            watchers: Watchers::default(),
            changes,
            current_chain: Mutex::new(current_chain),
            account_listeners: Listeners::new(),
            network_listeners: Listeners::new(),
            provider_listeners: Listeners::new(),
            websocket_listeners: Listeners::new(),
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&inner);
        let on_state = inner.manager.subscribe(move |change| {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.on_state_change(change);
            }
        });
        let weak = Arc::downgrade(&inner);
        let on_provider = inner.resolver.on_change(move |chain_id| {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.on_provider_change(*chain_id);
            }
        });
        inner.subscriptions().extend([on_state, on_provider]);

        tracing::info!(
            chains = ?inner.resolver.chains().iter().map(|c| c.id).collect::<Vec<_>>(),
            connectors = inner.manager.connectors().len(),
            "client built"
        );
        Ok(Client { inner })
    }
}

// ─── Client ──────────────────────────────────────────────────────────────────

struct ClientInner {
    config: ClientConfig,
    manager: Arc<ConnectorManager>,
    resolver: Arc<ProviderResolver>,
    engine: Arc<ReadEngine>,
    feeds: BlockFeeds,
    watchers: Watchers,
    changes: broadcast::Sender<ContextChange>,
    /// Last effective chain announced to listeners and watchers.
    current_chain: Mutex<ChainId>,
    account_listeners: Listeners<Account>,
    network_listeners: Listeners<Network>,
    provider_listeners: Listeners<ProviderHandle>,
    websocket_listeners: Listeners<Option<ProviderHandle>>,
    subscriptions: Mutex<Vec<Unwatch>>,
}

impl ClientInner {
    fn subscriptions(&self) -> std::sync::MutexGuard<'_, Vec<Unwatch>> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn network_chain(&self, state: &ConnectorState) -> Option<NetworkChain> {
        state.chain_id().map(|id| {
            let descriptor = self.resolver.chain(id);
            NetworkChain {
                id,
                unsupported: descriptor.is_none(),
                descriptor,
            }
        })
    }

    fn network(&self, state: &ConnectorState) -> Network {
        Network {
            chain: self.network_chain(state),
            chains: self.resolver.chains(),
        }
    }

    fn on_state_change(&self, change: &StateChange) {
        let before = Account::from_state(&change.previous);
        let after = Account::from_state(&change.current);
        // Every disconnect is announced, even from an already disconnected state.
        if before != after || change.current == ConnectorState::Disconnected {
            self.account_listeners.emit(&after);
        }
        if before.address != after.address {
            // No receivers is fine.
            let _ = self.changes.send(ContextChange::Account);
        }

        if self.network_chain(&change.previous) != self.network_chain(&change.current) {
            self.network_listeners.emit(&self.network(&change.current));
        }
        self.refresh_chain(&change.current);
    }

    /// Announce a new effective chain, if it moved.
    fn refresh_chain(&self, state: &ConnectorState) {
        let next = effective_chain(state, &self.resolver);
        let previous = {
            let mut current = self.current_chain.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, next)
        };
        if previous == next {
            return;
        }
        tracing::debug!(from = previous, to = next, "current chain changed");
        let _ = self.changes.send(ContextChange::Chain(next));
        self.notify_providers(next);
    }

    fn on_provider_change(&self, chain_id: ChainId) {
        let current = *self.current_chain.lock().unwrap_or_else(PoisonError::into_inner);
        if chain_id == current {
            self.notify_providers(chain_id);
        }
    }

    fn notify_providers(&self, chain_id: ChainId) {
        if !self.provider_listeners.is_empty() {
            match self.resolver.resolve(chain_id) {
                Ok(handle) => self.provider_listeners.emit(&handle),
                Err(e) => tracing::warn!(chain_id, error = %e, "no provider for current chain"),
            }
        }
        if !self.websocket_listeners.is_empty() {
            match self.resolver.resolve_websocket(chain_id) {
                Ok(handle) => self.websocket_listeners.emit(&handle),
                Err(e) => tracing::warn!(chain_id, error = %e, "no websocket provider for current chain"),
            }
        }
    }

    fn watch_context(&self) -> WatchContext {
        let manager = Arc::clone(&self.manager);
        let resolver = Arc::clone(&self.resolver);
        WatchContext {
            feeds: self.feeds.clone(),
            resolver: Arc::clone(&self.resolver),
            current_chain: Arc::new(move || effective_chain(&manager.state(), &resolver)),
            changes: self.changes.subscribe(),
        }
    }

    fn shutdown(&self) {
        self.watchers.clear();
        self.feeds.clear();
        self.account_listeners.clear();
        self.network_listeners.clear();
        self.provider_listeners.clear();
        self.websocket_listeners.clear();
        let subscriptions = std::mem::take(&mut *self.subscriptions());
        for subscription in subscriptions {
            subscription.cancel();
        }
        self.resolver.clear();
        self.manager.shutdown();
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.watchers.clear();
        self.feeds.clear();
    }
}

/// Entry point for connecting wallets, reading contracts and watching chain
/// state.
///
/// Cheap to clone; clones share one context. Watch methods spawn tokio tasks
/// and must be called inside a runtime.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Reconnect the last-used connector when `autoconnect` is enabled.
    /// Never fails; a failed reconnect leaves the client disconnected.
    pub async fn start(&self) -> Option<ConnectorData> {
        if !self.inner.config.autoconnect {
            return None;
        }
        self.inner.manager.autoconnect().await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn connectors(&self) -> &[Arc<dyn Connector>] {
        self.inner.manager.connectors()
    }

    /// Stop every watcher and listener and drop cached providers. The wallet
    /// connection itself is left alone.
    pub fn destroy(&self) {
        self.inner.shutdown();
        tracing::info!("client destroyed");
    }

    // ─── Connection ──────────────────────────────────────────────────────────

    pub async fn connect(
        &self,
        connector_id: &str,
        chain_id: Option<ChainId>,
    ) -> Result<ConnectorData, Error> {
        if let Some(chain_id) = chain_id {
            if !self.inner.resolver.contains(chain_id) {
                return Err(Error::ChainNotConfigured { chain_id });
            }
        }
        self.inner.manager.connect(connector_id, chain_id).await
    }

    /// Idempotent; listeners are notified even when nothing was connected.
    pub async fn disconnect(&self) {
        self.inner.manager.disconnect().await;
    }

    /// Ask the connected wallet to move to `chain_id`.
    pub async fn switch_network(&self, chain_id: ChainId) -> Result<Arc<ChainDescriptor>, Error> {
        let inner = &self.inner;
        let target = inner
            .resolver
            .chain(chain_id)
            .ok_or(Error::ChainNotConfigured { chain_id })?;

        let previous = inner.manager.state().chain_id();
        let (Some(connector), Some(previous)) = (inner.manager.active_connector(), previous) else {
            return Err(Error::ConnectorNotConnected);
        };
        if !connector.supports_switch_chain() {
            return Err(Error::SwitchChainNotSupported {
                connector_id: connector.id().to_string(),
            });
        }

        let reported = connector
            .switch_chain(chain_id)
            .await
            .map_err(|e| Error::from_connector(connector.id(), e))?;
        inner.manager.set_chain(reported);
        if reported != chain_id {
            tracing::warn!(expected = chain_id, actual = reported, "wallet reports another chain after switch");
            return Err(Error::ChainMismatch {
                expected: chain_id,
                actual: reported,
            });
        }

        if previous != chain_id {
            inner.resolver.invalidate(previous);
        }
        tracing::info!(from = previous, to = chain_id, "network switched");
        Ok(target)
    }

    // ─── Accessors ───────────────────────────────────────────────────────────

    pub fn connector_state(&self) -> ConnectorState {
        self.inner.manager.state()
    }

    pub fn account(&self) -> Account {
        Account::from_state(&self.inner.manager.state())
    }

    pub fn network(&self) -> Network {
        self.inner.network(&self.inner.manager.state())
    }

    /// The chain reads default to: the connected chain when configured,
    /// otherwise the first configured chain.
    pub fn chain_id(&self) -> ChainId {
        effective_chain(&self.inner.manager.state(), &self.inner.resolver)
    }

    /// Provider for `chain_id`, or for the current chain.
    pub fn provider(&self, chain_id: Option<ChainId>) -> Result<ProviderHandle, Error> {
        self.inner.resolver.resolve(chain_id.unwrap_or_else(|| self.chain_id()))
    }

    pub fn websocket_provider(&self, chain_id: Option<ChainId>) -> Result<Option<ProviderHandle>, Error> {
        self.inner
            .resolver
            .resolve_websocket(chain_id.unwrap_or_else(|| self.chain_id()))
    }

    /// Add or replace a chain at runtime.
    pub fn register_chain(&self, chain: ChainDescriptor) -> Result<(), Error> {
        let chain_id = chain.id;
        self.inner.resolver.register_chain(chain)?;
        let state = self.inner.manager.state();
        if state.chain_id() == Some(chain_id) {
            self.inner.network_listeners.emit(&self.inner.network(&state));
        }
        self.inner.refresh_chain(&state);
        Ok(())
    }

    /// Watchers currently running.
    pub fn active_watchers(&self) -> usize {
        self.inner.watchers.len()
    }

    // ─── Reads ───────────────────────────────────────────────────────────────

    pub async fn read_contract(&self, config: &ReadContractConfig) -> ContractResult {
        let chain_id = config.chain_id.unwrap_or_else(|| self.chain_id());
        self.inner.engine.read_contract(chain_id, config).await
    }

    pub async fn read_contracts(&self, config: &ReadContractsConfig) -> Result<Vec<ContractResult>, Error> {
        self.inner.engine.read_contracts(self.chain_id(), config).await
    }

    pub async fn multicall(&self, config: &MulticallConfig) -> Result<Vec<ContractResult>, Error> {
        self.inner.engine.multicall(self.chain_id(), config).await
    }

    pub async fn fetch_block_number(&self, chain_id: Option<ChainId>) -> Result<u64, Error> {
        let provider = self.provider(chain_id)?;
        Ok(provider.block_number().await?)
    }

    pub async fn fetch_balance(&self, address: Address, chain_id: Option<ChainId>) -> Result<Balance, Error> {
        let provider = self.provider(chain_id)?;
        let currency = self
            .inner
            .resolver
            .chain(provider.chain_id())
            .map(|c| c.native_currency.clone())
            .ok_or(Error::ChainNotConfigured {
                chain_id: provider.chain_id(),
            })?;
        let value = provider.balance(address, BlockTag::Latest).await?;
        Ok(Balance {
            formatted: format_amount(value, currency.decimals),
            value,
            decimals: currency.decimals,
            symbol: currency.symbol,
        })
    }

    /// Token metadata and supply in one batched read.
    pub async fn fetch_token(&self, address: Address, chain_id: Option<ChainId>) -> Result<Token, Error> {
        let [name, symbol, decimals, total_supply] = self
            .erc20_reads(address, chain_id, [
                ("name", vec![]),
                ("symbol", vec![]),
                ("decimals", vec![]),
                ("totalSupply", vec![]),
            ])
            .await?;
        let decimals = decimals_result(&decimals)?;
        let total_supply = uint_result("totalSupply", &total_supply)?;
        Ok(Token {
            address,
            name: string_result("name", name)?,
            symbol: string_result("symbol", symbol)?,
            decimals,
            total_supply: Amount {
                value: total_supply,
                formatted: format_amount(total_supply, decimals),
            },
        })
    }

    /// How much of `token` `spender` may move on behalf of `owner`, scaled by
    /// the token's decimals.
    pub async fn fetch_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
        chain_id: Option<ChainId>,
    ) -> Result<Balance, Error> {
        let args = vec![Value::String(owner.to_string()), Value::String(spender.to_string())];
        let [allowance, decimals, symbol] = self
            .erc20_reads(token, chain_id, [
                ("allowance", args),
                ("decimals", vec![]),
                ("symbol", vec![]),
            ])
            .await?;
        let value = uint_result("allowance", &allowance)?;
        let decimals = decimals_result(&decimals)?;
        Ok(Balance {
            formatted: format_amount(value, decimals),
            value,
            decimals,
            symbol: string_result("symbol", symbol)?,
        })
    }

    async fn erc20_reads<const N: usize>(
        &self,
        token: Address,
        chain_id: Option<ChainId>,
        calls: [(&str, Vec<Value>); N],
    ) -> Result<[Value; N], Error> {
        let chain_id = chain_id.unwrap_or_else(|| self.chain_id());
        let abi = erc20_abi();
        let contracts = calls
            .into_iter()
            .map(|(function, args)| {
                ReadContractConfig::new(token, Arc::clone(&abi), function)
                    .with_args(args)
                    .on_chain(chain_id)
            })
            .collect();
        let config = ReadContractsConfig::new(contracts).allow_failure(false);
        let values = self
            .inner
            .engine
            .read_contracts(chain_id, &config)
            .await?
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        let count = values.len();
        <[Value; N]>::try_from(values).map_err(|_| Error::ContractResultDecode {
            function_name: "erc20".into(),
            reason: format!("expected {N} results, got {count}"),
        })
    }

    /// Gas price and EIP-1559 suggestions from the latest block.
    pub async fn fetch_fee_data(&self, chain_id: Option<ChainId>) -> Result<FeeData, Error> {
        let provider = self.provider(chain_id)?;
        let (gas_price, base_fee) =
            futures::try_join!(provider.gas_price(), provider.base_fee_per_gas())?;

        let priority = base_fee.map(|_| U256::from(PRIORITY_FEE_WEI));
        let max_fee = base_fee
            .zip(priority)
            .map(|(base, tip)| base.saturating_mul(U256::from(2u8)).saturating_add(tip));
        let gwei = |value: Option<U256>| value.map(|v| format_amount(v, GWEI_DECIMALS));
        Ok(FeeData {
            formatted: FormattedFeeData {
                gas_price: format_amount(gas_price, GWEI_DECIMALS),
                last_base_fee_per_gas: gwei(base_fee),
                max_fee_per_gas: gwei(max_fee),
                max_priority_fee_per_gas: gwei(priority),
            },
            gas_price,
            last_base_fee_per_gas: base_fee,
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority,
        })
    }

    // ─── Watchers ────────────────────────────────────────────────────────────

    /// Called with the new [`Account`] on every change to it, and on every
    /// `disconnect()` even when already disconnected.
    pub fn watch_account(&self, callback: impl Fn(&Account) + Send + Sync + 'static) -> Unwatch {
        self.inner.account_listeners.subscribe(callback)
    }

    /// Called whenever the connected chain (or its support status) changes.
    pub fn watch_network(&self, callback: impl Fn(&Network) + Send + Sync + 'static) -> Unwatch {
        self.inner.network_listeners.subscribe(callback)
    }

    /// Called with the current chain's provider whenever the current chain
    /// changes or its cached provider is replaced.
    pub fn watch_provider(&self, callback: impl Fn(&ProviderHandle) + Send + Sync + 'static) -> Unwatch {
        self.inner.provider_listeners.subscribe(callback)
    }

    pub fn watch_websocket_provider(
        &self,
        callback: impl Fn(&Option<ProviderHandle>) + Send + Sync + 'static,
    ) -> Unwatch {
        self.inner.websocket_listeners.subscribe(callback)
    }

    /// New block numbers on `chain_id` (or the current chain), strictly
    /// increasing.
    pub fn watch_block_number(
        &self,
        chain_id: Option<ChainId>,
        callback: impl Fn(u64) + Send + Sync + 'static,
    ) -> Result<Unwatch, Error> {
        if let Some(chain_id) = chain_id {
            if !self.inner.resolver.contains(chain_id) {
                return Err(Error::ChainNotConfigured { chain_id });
            }
        }
        let ctx = self.inner.watch_context();
        let target = WatchTarget::from_option(chain_id);
        let deliver: Arc<dyn Fn(u64) + Send + Sync> = Arc::new(callback);
        Ok(self
            .inner
            .watchers
            .spawn(move |gate| tasks::block_watcher(ctx, target, deliver, gate)))
    }

    pub fn watch_read_contract(
        &self,
        config: ReadContractConfig,
        options: WatchOptions,
        callback: impl Fn(&ContractResult) + Send + Sync + 'static,
    ) -> Unwatch {
        let target = WatchTarget::from_option(config.chain_id);
        let engine = Arc::clone(&self.inner.engine);
        let config = Arc::new(config);
        let read: ReadFn<ContractResult> = Arc::new(move |chain_id| {
            let engine = Arc::clone(&engine);
            let config = Arc::clone(&config);
            async move { engine.read_contract(chain_id, &config).await }.boxed()
        });
        let deliver: Deliver<ContractResult> = Arc::new(callback);
        self.spawn_read_watcher(target, options, read, deliver)
    }

    pub fn watch_read_contracts(
        &self,
        config: ReadContractsConfig,
        options: WatchOptions,
        callback: impl Fn(&Result<Vec<ContractResult>, Error>) + Send + Sync + 'static,
    ) -> Unwatch {
        let target = shared_target(&config.contracts);
        let engine = Arc::clone(&self.inner.engine);
        let config = Arc::new(config);
        let read: ReadFn<Result<Vec<ContractResult>, Error>> = Arc::new(move |chain_id| {
            let engine = Arc::clone(&engine);
            let config = Arc::clone(&config);
            async move { engine.read_contracts(chain_id, &config).await }.boxed()
        });
        let deliver: Deliver<Result<Vec<ContractResult>, Error>> = Arc::new(callback);
        self.spawn_read_watcher(target, options, read, deliver)
    }

    pub fn watch_multicall(
        &self,
        config: MulticallConfig,
        options: WatchOptions,
        callback: impl Fn(&Result<Vec<ContractResult>, Error>) + Send + Sync + 'static,
    ) -> Unwatch {
        let target = WatchTarget::from_option(config.chain_id);
        let engine = Arc::clone(&self.inner.engine);
        let config = Arc::new(config);
        let read: ReadFn<Result<Vec<ContractResult>, Error>> = Arc::new(move |chain_id| {
            let engine = Arc::clone(&engine);
            let config = Arc::clone(&config);
            async move { engine.multicall(chain_id, &config).await }.boxed()
        });
        let deliver: Deliver<Result<Vec<ContractResult>, Error>> = Arc::new(callback);
        self.spawn_read_watcher(target, options, read, deliver)
    }

    /// Logs matching `config.filter`. Uses a WebSocket log subscription when
    /// one is available and polls `eth_getLogs` on every new block otherwise.
    ///
    /// Delivery is at most once per connection: logs emitted while a
    /// subscription is being re-established are not recovered.
    pub fn watch_contract_event(
        &self,
        config: ContractEventConfig,
        callback: impl Fn(&Result<Vec<Log>, Error>) + Send + Sync + 'static,
    ) -> Unwatch {
        let ctx = self.inner.watch_context();
        let target = WatchTarget::from_option(config.chain_id);
        let deliver: Deliver<Result<Vec<Log>, Error>> = Arc::new(callback);
        self.inner.watchers.spawn(move |gate| {
            tasks::event_watcher(ctx, target, config.filter, deliver, gate)
        })
    }

    fn spawn_read_watcher<T: WatchValue>(
        &self,
        target: WatchTarget,
        options: WatchOptions,
        read: ReadFn<T>,
        deliver: Deliver<T>,
    ) -> Unwatch {
        let ctx = self.inner.watch_context();
        self.inner.watchers.spawn(move |gate: Arc<Gate>| {
            tasks::read_watcher(ctx, target, options, read, deliver, gate)
        })
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.inner.manager.state())
            .field("chain_id", &self.chain_id())
            .field("watchers", &self.inner.watchers.len())
            .finish()
    }
}

/// A multi-read follows the current chain unless every item pins the same
/// chain.
fn shared_target(contracts: &[ReadContractConfig]) -> WatchTarget {
    let mut chains = contracts.iter().map(|c| c.chain_id);
    match chains.next() {
        Some(Some(first)) if chains.all(|c| c == Some(first)) => WatchTarget::Fixed(first),
        _ => WatchTarget::Current,
    }
}
