//! Request fingerprints used to share identical in-flight reads.

use alloy_primitives::{keccak256, Address, B256};
use chainconnect_core::{BlockTag, CallRequest, ChainId};

/// keccak256 over everything that makes two calls return the same bytes:
/// chain, target, calldata, block selector and sender.
pub fn call_fingerprint(chain_id: ChainId, request: &CallRequest) -> B256 {
    let mut buf = Vec::with_capacity(8 + 20 + 8 + request.data.len() + 9 + 21);
    buf.extend_from_slice(&chain_id.to_be_bytes());
    buf.extend_from_slice(request.to.as_slice());
    buf.extend_from_slice(&(request.data.len() as u64).to_be_bytes());
    buf.extend_from_slice(&request.data);
    push_block(&mut buf, request.block);
    push_sender(&mut buf, request.from);
    keccak256(&buf)
}

fn push_block(buf: &mut Vec<u8>, block: BlockTag) {
    let (tag, number) = match block {
        BlockTag::Latest => (0u8, 0),
        BlockTag::Pending => (1, 0),
        BlockTag::Safe => (2, 0),
        BlockTag::Finalized => (3, 0),
        BlockTag::Earliest => (4, 0),
        BlockTag::Number(n) => (5, n),
    };
    buf.push(tag);
    buf.extend_from_slice(&number.to_be_bytes());
}

fn push_sender(buf: &mut Vec<u8>, from: Option<Address>) {
    match from {
        Some(from) => {
            buf.push(1);
            buf.extend_from_slice(from.as_slice());
        }
        None => buf.push(0),
    }
}
