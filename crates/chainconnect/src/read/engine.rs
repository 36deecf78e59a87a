//! Contract read entry points.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes};
use chainconnect_core::{BlockTag, CallRequest, ChainId, Provider, TransportError};
use futures::future::{join_all, FutureExt};
use serde_json::Value;

use crate::codec::{CodecError, ContractCodec};
use crate::config::BatchConfig;
use crate::error::Error;
use crate::provider::{ProviderHandle, ProviderResolver};
use crate::read::batch::{aggregate, BatchScheduler};
use crate::read::fingerprint::call_fingerprint;
use crate::read::pending::{PendingRead, PendingRequests};
use crate::read::{CallFailure, RawResult};

/// Per-item outcome of a multi-contract read.
pub type ContractResult = Result<Value, Error>;

/// One contract function call.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadContractConfig {
    pub address: Address,
    /// JSON ABI: an array of fragments or a single function fragment.
    pub abi: Arc<Value>,
    pub function_name: String,
    pub args: Vec<Value>,
    /// Target chain; `None` means the client's current chain.
    pub chain_id: Option<ChainId>,
    pub block: BlockTag,
    /// Sender override. Calls with a sender are never aggregated.
    pub from: Option<Address>,
}

impl ReadContractConfig {
    pub fn new(address: Address, abi: impl Into<Arc<Value>>, function_name: impl Into<String>) -> Self {
        Self {
            address,
            abi: abi.into(),
            function_name: function_name.into(),
            args: Vec::new(),
            chain_id: None,
            block: BlockTag::Latest,
            from: None,
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn on_chain(mut self, chain_id: ChainId) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    #[must_use]
    pub fn at_block(mut self, block: BlockTag) -> Self {
        self.block = block;
        self
    }

    #[must_use]
    pub fn with_sender(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }
}

/// Reads across any number of chains.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadContractsConfig {
    pub contracts: Vec<ReadContractConfig>,
    /// `None` uses `multicall.allow_failure` from the client config.
    pub allow_failure: Option<bool>,
}

impl ReadContractsConfig {
    pub fn new(contracts: Vec<ReadContractConfig>) -> Self {
        Self {
            contracts,
            allow_failure: None,
        }
    }

    #[must_use]
    pub fn allow_failure(mut self, allow_failure: bool) -> Self {
        self.allow_failure = Some(allow_failure);
        self
    }
}

/// Reads aggregated on one chain. Per-item `chain_id` and `block` are
/// ignored in favour of the fields here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MulticallConfig {
    pub contracts: Vec<ReadContractConfig>,
    pub chain_id: Option<ChainId>,
    pub block: BlockTag,
    pub allow_failure: Option<bool>,
}

impl MulticallConfig {
    pub fn new(contracts: Vec<ReadContractConfig>) -> Self {
        Self {
            contracts,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn on_chain(mut self, chain_id: ChainId) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    #[must_use]
    pub fn at_block(mut self, block: BlockTag) -> Self {
        self.block = block;
        self
    }

    #[must_use]
    pub fn allow_failure(mut self, allow_failure: bool) -> Self {
        self.allow_failure = Some(allow_failure);
        self
    }
}

pub struct ReadEngine {
    resolver: Arc<ProviderResolver>,
    codec: Arc<dyn ContractCodec>,
    pending: PendingRequests,
    batch: BatchScheduler,
    config: BatchConfig,
}

impl ReadEngine {
    pub fn new(resolver: Arc<ProviderResolver>, codec: Arc<dyn ContractCodec>, config: BatchConfig) -> Self {
        Self {
            batch: BatchScheduler::new(Arc::clone(&codec), config.clone()),
            resolver,
            codec,
            pending: PendingRequests::new(),
            config,
        }
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Read one function on `chain_id`.
    pub async fn read_contract(&self, chain_id: ChainId, config: &ReadContractConfig) -> ContractResult {
        let handle = self.resolver.resolve(chain_id)?;
        let data = self.encode(chain_id, config)?;
        let raw = self.shared_call(&handle, config, data).await;
        self.decode(chain_id, config, raw)
    }

    /// Read several functions, possibly on several chains. Items without a
    /// chain use `default_chain`. Results come back in request order.
    pub async fn read_contracts(
        &self,
        default_chain: ChainId,
        config: &ReadContractsConfig,
    ) -> Result<Vec<ContractResult>, Error> {
        let mut groups: HashMap<(ChainId, BlockTag, Option<Address>), Vec<usize>> = HashMap::new();
        for (index, item) in config.contracts.iter().enumerate() {
            let chain_id = item.chain_id.unwrap_or(default_chain);
            groups
                .entry((chain_id, item.block, item.from))
                .or_default()
                .push(index);
        }

        let reads = groups.into_iter().map(|((chain_id, block, from), indices)| async move {
            let items: Vec<&ReadContractConfig> = indices.iter().map(|&i| &config.contracts[i]).collect();
            let results = self.read_group(chain_id, block, from, &items).await;
            indices.into_iter().zip(results).collect::<Vec<_>>()
        });
        let mut indexed: Vec<(usize, ContractResult)> = join_all(reads).await.into_iter().flatten().collect();
        indexed.sort_by_key(|(index, _)| *index);

        let results = indexed.into_iter().map(|(_, result)| result).collect();
        finish(results, config.allow_failure.unwrap_or(self.config.allow_failure))
    }

    /// Aggregate every item into `aggregate3` calls on one chain.
    pub async fn multicall(
        &self,
        default_chain: ChainId,
        config: &MulticallConfig,
    ) -> Result<Vec<ContractResult>, Error> {
        let chain_id = config.chain_id.unwrap_or(default_chain);
        let handle = self.resolver.resolve(chain_id)?;
        let multicall = handle
            .multicall_address()
            .ok_or(Error::ChainDoesNotSupportMulticall { chain_id })?;

        let items: Vec<&ReadContractConfig> = config.contracts.iter().collect();
        let results = self.aggregate_items(&handle, multicall, config.block, &items).await;
        finish(results, config.allow_failure.unwrap_or(self.config.allow_failure))
    }

    async fn read_group(
        &self,
        chain_id: ChainId,
        block: BlockTag,
        from: Option<Address>,
        items: &[&ReadContractConfig],
    ) -> Vec<ContractResult> {
        let handle = match self.resolver.resolve(chain_id) {
            Ok(handle) => handle,
            Err(e) => return items.iter().map(|_| Err(e.clone())).collect(),
        };
        match (handle.multicall_address(), from) {
            (Some(multicall), None) => self.aggregate_items(&handle, multicall, block, items).await,
            _ => join_all(items.iter().map(|item| self.read_contract(chain_id, item))).await,
        }
    }

    async fn aggregate_items(
        &self,
        handle: &ProviderHandle,
        multicall: Address,
        block: BlockTag,
        items: &[&ReadContractConfig],
    ) -> Vec<ContractResult> {
        let chain_id = handle.chain_id();
        let encoded: Vec<Result<Bytes, Error>> =
            items.iter().map(|item| self.encode(chain_id, item)).collect();
        let calls: Vec<(usize, (Address, Bytes))> = encoded
            .iter()
            .enumerate()
            .filter_map(|(i, data)| data.as_ref().ok().map(|d| (i, (items[i].address, d.clone()))))
            .collect();

        let chunk_size = self.config.chunk_size();
        tracing::debug!(
            chain_id,
            calls = calls.len(),
            chunks = calls.len().div_ceil(chunk_size),
            "aggregating contract reads"
        );

        let rounds = calls.chunks(chunk_size).map(|chunk| async move {
            let pairs: Vec<(Address, Bytes)> = chunk.iter().map(|(_, call)| call.clone()).collect();
            match aggregate(self.codec.as_ref(), handle, multicall, block, &pairs).await {
                Ok(results) => chunk.iter().map(|(i, _)| *i).zip(results).collect::<Vec<_>>(),
                Err(e) => chunk.iter().map(|(i, _)| (*i, Err(e.clone()))).collect(),
            }
        });
        let mut raw: Vec<Option<RawResult>> = vec![None; items.len()];
        for (index, result) in join_all(rounds).await.into_iter().flatten() {
            raw[index] = Some(result);
        }

        items
            .iter()
            .zip(encoded)
            .zip(raw)
            .map(|((item, data), raw)| match (data, raw) {
                (Err(e), _) => Err(e),
                (Ok(_), Some(raw)) => self.decode(chain_id, item, raw),
                (Ok(_), None) => Err(Error::Provider(TransportError::Other(
                    "aggregate3 result missing".into(),
                ))),
            })
            .collect()
    }

    /// The deduplicated raw call for one read. Multicall chains go through
    /// the batch window.
    fn shared_call(&self, handle: &ProviderHandle, config: &ReadContractConfig, data: Bytes) -> PendingRead {
        let mut request = CallRequest::new(config.address, data).at_block(config.block);
        request.from = config.from;
        let key = call_fingerprint(handle.chain_id(), &request);

        let handle = handle.clone();
        let batch = self.batch.clone();
        self.pending.join(key, move || {
            async move {
                match (handle.multicall_address(), request.from) {
                    (Some(multicall), None) => {
                        batch
                            .call(&handle, multicall, request.block, request.to, request.data)
                            .await
                    }
                    _ => handle.call(&request).await.map_err(CallFailure::from),
                }
            }
            .boxed()
        })
    }

    fn encode(&self, chain_id: ChainId, config: &ReadContractConfig) -> Result<Bytes, Error> {
        self.codec
            .encode_function_data(&config.abi, &config.function_name, &config.args)
            .map_err(|e| match e {
                CodecError::FunctionNotFound { .. } => Error::ContractMethodDoesNotExist {
                    address: config.address,
                    function_name: config.function_name.clone(),
                    chain_id,
                },
                other => Error::ContractCallEncode {
                    function_name: config.function_name.clone(),
                    reason: other.to_string(),
                },
            })
    }

    fn decode(&self, chain_id: ChainId, config: &ReadContractConfig, raw: RawResult) -> ContractResult {
        match raw {
            Ok(data) if data.is_empty() => Err(Error::ContractMethodNoResult {
                address: config.address,
                function_name: config.function_name.clone(),
                chain_id,
            }),
            Ok(data) => self
                .codec
                .decode_function_result(&config.abi, &config.function_name, &config.args, &data)
                .map_err(|e| Error::ContractResultDecode {
                    function_name: config.function_name.clone(),
                    reason: e.to_string(),
                }),
            Err(CallFailure::Reverted(data)) => Err(Error::ContractMethodReverted {
                address: config.address,
                function_name: config.function_name.clone(),
                chain_id,
                data,
            }),
            Err(CallFailure::Transport(e)) => Err(Error::Provider(e)),
        }
    }
}

/// With `allow_failure` off the first failed item fails the whole call.
fn finish(results: Vec<ContractResult>, allow_failure: bool) -> Result<Vec<ContractResult>, Error> {
    if !allow_failure {
        if let Some(Err(e)) = results.iter().find(|r| r.is_err()) {
            return Err(e.clone());
        }
    }
    Ok(results)
}
