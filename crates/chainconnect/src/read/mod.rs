//! Contract reads: in-flight deduplication, multicall batching and result
//! decoding.
//!
//! ```text
//! read_contract ──▶ fingerprint ──▶ PendingRequests (shared future)
//!                                        │
//!                         multicall chain? ── yes ──▶ BatchScheduler window ──▶ aggregate3
//!                                        └─── no ───▶ eth_call
//! ```

pub mod batch;
pub mod engine;
pub mod fingerprint;
pub mod pending;

use std::str::FromStr;

use alloy_primitives::Bytes;
use chainconnect_core::TransportError;

pub use batch::BatchScheduler;
pub use engine::{ContractResult, MulticallConfig, ReadContractConfig, ReadContractsConfig, ReadEngine};
pub use fingerprint::call_fingerprint;
pub use pending::{PendingRead, PendingRequests};

/// Raw outcome of one contract call before decoding.
pub type RawResult = Result<Bytes, CallFailure>;

#[derive(Debug, Clone, PartialEq)]
pub enum CallFailure {
    /// The call executed and reverted; carries the revert payload.
    Reverted(Bytes),
    Transport(TransportError),
}

impl From<TransportError> for CallFailure {
    fn from(err: TransportError) -> Self {
        match &err {
            TransportError::Rpc(rpc) if rpc.is_execution_reverted() => Self::Reverted(
                rpc.revert_data()
                    .and_then(|hex| Bytes::from_str(hex).ok())
                    .unwrap_or_default(),
            ),
            _ => Self::Transport(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainconnect_core::JsonRpcError;
    use serde_json::json;

    #[test]
    fn revert_data_is_extracted() {
        let err = TransportError::Rpc(JsonRpcError {
            code: 3,
            message: "execution reverted".into(),
            data: Some(json!("0x08c379a0")),
        });
        assert_eq!(
            CallFailure::from(err),
            CallFailure::Reverted(Bytes::from_static(&[0x08, 0xc3, 0x79, 0xa0]))
        );
    }

    #[test]
    fn network_errors_stay_transport() {
        let err = TransportError::Http("refused".into());
        assert_eq!(CallFailure::from(err.clone()), CallFailure::Transport(err));
    }
}
