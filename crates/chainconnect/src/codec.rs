//! Contract call encoding and decoding.
//!
//! The engine treats ABIs as opaque JSON handed to a [`ContractCodec`];
//! [`AbiCodec`] is the default implementation on top of
//! `alloy-json-abi` / `alloy-dyn-abi`.
//!
//! Argument and result values are JSON:
//! - `address` → checksummed hex string
//! - `bool` / `string` → JSON bool / string
//! - `uintN` / `intN` → JSON number when `N <= 48`, decimal string otherwise
//!   (arguments also accept `0x` hex strings)
//! - `bytes` / `bytesN` → `0x` hex string
//! - arrays and tuples → JSON arrays (tuples are positional)

use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::{Function, JsonAbi, Param};
use alloy_primitives::{hex, keccak256, Address, Bytes, B256, I256, U256};
use serde_json::{json, Number, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("function '{function_name}' not found in ABI")]
    FunctionNotFound { function_name: String },

    #[error("invalid ABI: {0}")]
    InvalidAbi(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

/// One entry of a Multicall3 `aggregate3` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call3 {
    pub target: Address,
    pub allow_failure: bool,
    pub call_data: Bytes,
}

/// One entry of a Multicall3 `aggregate3` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call3Result {
    pub success: bool,
    pub return_data: Bytes,
}

/// Encoding collaborator used by the read engine.
pub trait ContractCodec: Send + Sync + 'static {
    /// Selector-prefixed calldata for `function_name(args...)`.
    ///
    /// Returns [`CodecError::FunctionNotFound`] when the ABI has no such
    /// function.
    fn encode_function_data(
        &self,
        abi: &Value,
        function_name: &str,
        args: &[Value],
    ) -> Result<Bytes, CodecError>;

    /// Decode the return data of `function_name`.
    fn decode_function_result(
        &self,
        abi: &Value,
        function_name: &str,
        args: &[Value],
        data: &[u8],
    ) -> Result<Value, CodecError>;

    /// Calldata for `aggregate3((address,bool,bytes)[])`.
    fn encode_aggregate3(&self, calls: &[Call3]) -> Result<Bytes, CodecError> {
        Ok(multicall3::encode_aggregate3(calls))
    }

    /// Decode the `(bool,bytes)[]` returned by `aggregate3`.
    fn decode_aggregate3(&self, data: &[u8]) -> Result<Vec<Call3Result>, CodecError> {
        multicall3::decode_aggregate3(data)
    }
}

// ─── Multicall3 ───────────────────────────────────────────────────────────────

pub mod multicall3 {
    //! Multicall3 `aggregate3` wire format.

    use super::*;

    pub const AGGREGATE3_SIGNATURE: &str = "aggregate3((address,bool,bytes)[])";

    pub fn aggregate3_selector() -> [u8; 4] {
        let hash = keccak256(AGGREGATE3_SIGNATURE.as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    pub fn encode_aggregate3(calls: &[Call3]) -> Bytes {
        let entries = calls
            .iter()
            .map(|c| {
                DynSolValue::Tuple(vec![
                    DynSolValue::Address(c.target),
                    DynSolValue::Bool(c.allow_failure),
                    DynSolValue::Bytes(c.call_data.to_vec()),
                ])
            })
            .collect();
        let mut out = aggregate3_selector().to_vec();
        out.extend(DynSolValue::Tuple(vec![DynSolValue::Array(entries)]).abi_encode_params());
        out.into()
    }

    pub fn decode_aggregate3(data: &[u8]) -> Result<Vec<Call3Result>, CodecError> {
        let ty = DynSolType::Tuple(vec![DynSolType::Array(Box::new(DynSolType::Tuple(vec![
            DynSolType::Bool,
            DynSolType::Bytes,
        ])))]);
        let decoded = ty
            .abi_decode_params(data)
            .map_err(|e| CodecError::Decode(format!("aggregate3 result: {e}")))?;

        let DynSolValue::Tuple(mut outer) = decoded else {
            return Err(CodecError::Decode("aggregate3 result: expected tuple".into()));
        };
        let Some(DynSolValue::Array(entries)) = outer.pop() else {
            return Err(CodecError::Decode("aggregate3 result: expected array".into()));
        };

        entries
            .into_iter()
            .map(|entry| match entry {
                DynSolValue::Tuple(fields) => match fields.as_slice() {
                    [DynSolValue::Bool(success), DynSolValue::Bytes(data)] => Ok(Call3Result {
                        success: *success,
                        return_data: Bytes::from(data.clone()),
                    }),
                    _ => Err(CodecError::Decode("aggregate3 result: bad entry".into())),
                },
                _ => Err(CodecError::Decode("aggregate3 result: bad entry".into())),
            })
            .collect()
    }
}

// ─── ERC-20 ───────────────────────────────────────────────────────────────────

/// The read-only half of the ERC-20 ABI: `name`, `symbol`, `decimals`,
/// `totalSupply`, `balanceOf` and `allowance`.
pub fn erc20_abi() -> Arc<Value> {
    static ABI: OnceLock<Arc<Value>> = OnceLock::new();
    Arc::clone(ABI.get_or_init(|| {
        Arc::new(json!([
            {"type":"function","name":"name","stateMutability":"view",
             "inputs":[],"outputs":[{"name":"","type":"string"}]},
            {"type":"function","name":"symbol","stateMutability":"view",
             "inputs":[],"outputs":[{"name":"","type":"string"}]},
            {"type":"function","name":"decimals","stateMutability":"view",
             "inputs":[],"outputs":[{"name":"","type":"uint8"}]},
            {"type":"function","name":"totalSupply","stateMutability":"view",
             "inputs":[],"outputs":[{"name":"","type":"uint256"}]},
            {"type":"function","name":"balanceOf","stateMutability":"view",
             "inputs":[{"name":"owner","type":"address"}],
             "outputs":[{"name":"","type":"uint256"}]},
            {"type":"function","name":"allowance","stateMutability":"view",
             "inputs":[{"name":"owner","type":"address"},{"name":"spender","type":"address"}],
             "outputs":[{"name":"","type":"uint256"}]}
        ]))
    }))
}

// ─── Revert data ──────────────────────────────────────────────────────────────

/// `keccak256("Error(string)")[..4]`
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
/// `keccak256("Panic(uint256)")[..4]`
pub const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// Human-readable reason for `Error(string)` / `Panic(uint256)` revert data.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 {
        return None;
    }
    let (selector, payload) = data.split_at(4);
    if selector == ERROR_STRING_SELECTOR {
        match DynSolType::String.abi_decode(payload) {
            Ok(DynSolValue::String(message)) => Some(message),
            _ => None,
        }
    } else if selector == PANIC_SELECTOR {
        match DynSolType::Uint(256).abi_decode(payload) {
            Ok(DynSolValue::Uint(code, _)) => Some(format!("panic 0x{code:02x}")),
            _ => None,
        }
    } else {
        None
    }
}

// ─── AbiCodec ─────────────────────────────────────────────────────────────────

/// [`ContractCodec`] for standard Ethereum JSON ABIs.
///
/// Accepts either a full ABI array or a single function fragment object.
/// Overloads are resolved by argument count.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbiCodec;

impl AbiCodec {
    pub fn new() -> Self {
        Self
    }

    fn parse_abi(abi: &Value) -> Result<JsonAbi, CodecError> {
        let items = match abi {
            Value::Array(_) => abi.clone(),
            Value::Object(_) => Value::Array(vec![abi.clone()]),
            other => return Err(CodecError::InvalidAbi(format!("expected array, got {other}"))),
        };
        serde_json::from_value(items).map_err(|e| CodecError::InvalidAbi(e.to_string()))
    }

    fn find_function(abi: &JsonAbi, name: &str, arg_count: usize) -> Result<Function, CodecError> {
        let mut candidates = abi.functions().filter(|f| f.name == name).peekable();
        let first = candidates
            .peek()
            .cloned()
            .cloned()
            .ok_or_else(|| CodecError::FunctionNotFound {
                function_name: name.to_string(),
            })?;
        Ok(candidates
            .find(|f| f.inputs.len() == arg_count)
            .cloned()
            .unwrap_or(first))
    }
}

fn resolve_params(params: &[Param]) -> Result<Vec<DynSolType>, String> {
    params
        .iter()
        .map(|p| p.resolve().map_err(|e| format!("param '{}': {e}", p.name)))
        .collect()
}

impl ContractCodec for AbiCodec {
    fn encode_function_data(
        &self,
        abi: &Value,
        function_name: &str,
        args: &[Value],
    ) -> Result<Bytes, CodecError> {
        let abi = Self::parse_abi(abi)?;
        let func = Self::find_function(&abi, function_name, args.len())?;

        if args.len() != func.inputs.len() {
            return Err(CodecError::Encode(format!(
                "argument count mismatch: ABI has {}, got {}",
                func.inputs.len(),
                args.len()
            )));
        }

        let types = resolve_params(&func.inputs).map_err(CodecError::Encode)?;
        let values = types
            .iter()
            .zip(args)
            .zip(&func.inputs)
            .map(|((ty, arg), param)| {
                json_to_dyn_value(arg, ty).map_err(|e| CodecError::Encode(format!("param '{}': {e}", param.name)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut calldata = func.selector().to_vec();
        calldata.extend(DynSolValue::Tuple(values).abi_encode_params());
        Ok(calldata.into())
    }

    fn decode_function_result(
        &self,
        abi: &Value,
        function_name: &str,
        args: &[Value],
        data: &[u8],
    ) -> Result<Value, CodecError> {
        let abi = Self::parse_abi(abi)?;
        let func = Self::find_function(&abi, function_name, args.len())?;
        let types = resolve_params(&func.outputs).map_err(CodecError::Decode)?;

        let decoded = DynSolType::Tuple(types)
            .abi_decode_params(data)
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        let DynSolValue::Tuple(mut values) = decoded else {
            return Err(CodecError::Decode("expected output tuple".into()));
        };

        Ok(match values.len() {
            0 => Value::Null,
            1 => dyn_value_to_json(values.remove(0)),
            _ => Value::Array(values.into_iter().map(dyn_value_to_json).collect()),
        })
    }
}

// ─── JSON ↔ DynSolValue ───────────────────────────────────────────────────────

fn uint_in_range(value: U256, bits: usize) -> Result<U256, String> {
    if value.bit_len() > bits {
        return Err(format!("uint{bits}: {value} does not fit in {bits} bits"));
    }
    Ok(value)
}

/// Two's complement range: `-2^(bits-1) ..= 2^(bits-1) - 1`.
fn int_in_range(value: I256, bits: usize) -> Result<I256, String> {
    if bits >= 256 {
        return Ok(value);
    }
    let max = I256::from_raw((U256::from(1u8) << (bits - 1)) - U256::from(1u8));
    let min = I256::MINUS_ONE - max;
    if value > max || value < min {
        return Err(format!("int{bits}: {value} does not fit in {bits} bits"));
    }
    Ok(value)
}

/// Convert a JSON argument to the `DynSolValue` for the expected type.
pub fn json_to_dyn_value(value: &Value, expected: &DynSolType) -> Result<DynSolValue, String> {
    match (value, expected) {
        (Value::Bool(b), DynSolType::Bool) => Ok(DynSolValue::Bool(*b)),

        (Value::Number(n), DynSolType::Uint(bits)) => {
            let u = n.as_u64().ok_or_else(|| format!("uint{bits}: {n} is not an unsigned integer"))?;
            Ok(DynSolValue::Uint(uint_in_range(U256::from(u), *bits)?, *bits))
        }
        (Value::String(s), DynSolType::Uint(bits)) => {
            let u = U256::from_str(s).map_err(|e| format!("uint{bits} parse: {e}"))?;
            Ok(DynSolValue::Uint(uint_in_range(u, *bits)?, *bits))
        }

        (Value::Number(n), DynSolType::Int(bits)) => {
            let i = n.as_i64().ok_or_else(|| format!("int{bits}: {n} is not an integer"))?;
            let i = I256::try_from(i).map_err(|e| e.to_string())?;
            Ok(DynSolValue::Int(int_in_range(i, *bits)?, *bits))
        }
        (Value::String(s), DynSolType::Int(bits)) => {
            let parsed = if s.starts_with("0x") || s.starts_with("-0x") {
                I256::from_hex_str(s)
            } else {
                I256::from_dec_str(s)
            };
            let i = parsed.map_err(|e| format!("int{bits} parse: {e}"))?;
            Ok(DynSolValue::Int(int_in_range(i, *bits)?, *bits))
        }

        (Value::String(s), DynSolType::Address) => {
            let addr = Address::from_str(s).map_err(|e| format!("address parse: {e}"))?;
            Ok(DynSolValue::Address(addr))
        }

        (Value::String(s), DynSolType::Bytes) => {
            let bytes = hex::decode(s).map_err(|e| format!("bytes parse: {e}"))?;
            Ok(DynSolValue::Bytes(bytes))
        }
        (Value::String(s), DynSolType::FixedBytes(n)) => {
            let bytes = hex::decode(s).map_err(|e| format!("bytes{n} parse: {e}"))?;
            if bytes.len() > *n {
                return Err(format!("bytes{n}: got {} bytes", bytes.len()));
            }
            let mut word = B256::ZERO;
            word.0[..bytes.len()].copy_from_slice(&bytes);
            Ok(DynSolValue::FixedBytes(word, *n))
        }

        (Value::String(s), DynSolType::String) => Ok(DynSolValue::String(s.clone())),

        (Value::Array(elems), DynSolType::Array(inner)) => {
            let values: Result<Vec<_>, _> = elems.iter().map(|e| json_to_dyn_value(e, inner)).collect();
            Ok(DynSolValue::Array(values?))
        }
        (Value::Array(elems), DynSolType::FixedArray(inner, len)) => {
            if elems.len() != *len {
                return Err(format!("fixed array length mismatch: expected {len}, got {}", elems.len()));
            }
            let values: Result<Vec<_>, _> = elems.iter().map(|e| json_to_dyn_value(e, inner)).collect();
            Ok(DynSolValue::FixedArray(values?))
        }
        (Value::Array(fields), DynSolType::Tuple(types)) => {
            if fields.len() != types.len() {
                return Err(format!("tuple length mismatch: expected {}, got {}", types.len(), fields.len()));
            }
            let values: Result<Vec<_>, _> = fields
                .iter()
                .zip(types)
                .map(|(v, t)| json_to_dyn_value(v, t))
                .collect();
            Ok(DynSolValue::Tuple(values?))
        }

        _ => Err(format!("cannot convert {value} to {expected:?}")),
    }
}

/// Convert a decoded `DynSolValue` to JSON.
pub fn dyn_value_to_json(value: DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(b),

        DynSolValue::Uint(u, bits) if bits <= 48 => match u64::try_from(u) {
            Ok(v) => Value::Number(Number::from(v)),
            Err(_) => Value::String(u.to_string()),
        },
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),

        DynSolValue::Int(i, bits) if bits <= 48 => match i64::try_from(i) {
            Ok(v) => Value::Number(Number::from(v)),
            Err(_) => Value::String(i.to_string()),
        },
        DynSolValue::Int(i, _) => Value::String(i.to_string()),

        DynSolValue::FixedBytes(word, size) => Value::String(hex::encode_prefixed(&word[..size])),
        DynSolValue::Bytes(b) => Value::String(hex::encode_prefixed(b)),
        DynSolValue::String(s) => Value::String(s),
        DynSolValue::Address(a) => Value::String(a.to_checksum(None)),
        DynSolValue::Function(f) => Value::String(hex::encode_prefixed(f.as_slice())),

        DynSolValue::Array(values) | DynSolValue::FixedArray(values) | DynSolValue::Tuple(values) => {
            Value::Array(values.into_iter().map(dyn_value_to_json).collect())
        }

        #[allow(unreachable_patterns)]
        _ => Value::Null,
    }
}
