//! Read and write access to chain JSON-RPC endpoints.
//!
//! The reader speaks plain JSON-RPC over HTTP and understands cast-style
//! human-readable signatures (`name(argtypes)(rettypes)`) for read-only
//! contract calls. Only static one-word ABI types are supported; the
//! bootstrap never needs dynamic types.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, U256, keccak256};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{BootError, Result};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Latest block metadata from a chain endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub number: u64,
    pub timestamp: u64,
}

/// A decoded ABI value. All supported types occupy one 32-byte word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Address(Address),
    Uint(U256),
    FixedBytes(B256),
    Bool(bool),
}

impl AbiValue {
    /// The all-zero address is the single "absent value" sentinel: a
    /// deployed-but-unset slot decodes cleanly but means "not present".
    pub fn is_zero_address(&self) -> bool {
        matches!(self, Self::Address(addr) if addr.is_zero())
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Self::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self {
            Self::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_fixed_bytes(&self) -> Option<B256> {
        match self {
            Self::FixedBytes(b) => Some(*b),
            _ => None,
        }
    }

    /// Encode the value as a 32-byte ABI word.
    fn to_word(&self) -> [u8; 32] {
        match self {
            Self::Address(addr) => {
                let mut word = [0u8; 32];
                word[12..].copy_from_slice(addr.as_slice());
                word
            }
            Self::Uint(v) => v.to_be_bytes::<32>(),
            Self::FixedBytes(b) => b.0,
            Self::Bool(b) => {
                let mut word = [0u8; 32];
                word[31] = *b as u8;
                word
            }
        }
    }
}

/// Supported static ABI types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiType {
    Address,
    Uint,
    FixedBytes,
    Bool,
}

impl AbiType {
    /// Parse a Solidity type token, returning the type and its canonical
    /// spelling (the spelling the selector hash is computed over).
    fn parse(token: &str) -> Result<(Self, String)> {
        let token = token.trim();
        match token {
            "address" => Ok((Self::Address, "address".to_string())),
            "bool" => Ok((Self::Bool, "bool".to_string())),
            "bytes32" => Ok((Self::FixedBytes, "bytes32".to_string())),
            "uint" => Ok((Self::Uint, "uint256".to_string())),
            t if t.strip_prefix("uint").is_some_and(|w| {
                w.parse::<u16>().is_ok_and(|bits| bits % 8 == 0 && bits <= 256)
            }) =>
            {
                Ok((Self::Uint, t.to_string()))
            }
            other => Err(BootError::Decode(format!(
                "unsupported ABI type: {other:?}"
            ))),
        }
    }

    /// Decode one 32-byte word into a value of this type.
    fn decode_word(&self, word: &[u8]) -> Result<AbiValue> {
        debug_assert_eq!(word.len(), 32);
        match self {
            Self::Address => {
                if word[..12].iter().any(|&b| b != 0) {
                    return Err(BootError::Decode(
                        "address word has non-zero padding".to_string(),
                    ));
                }
                Ok(AbiValue::Address(Address::from_slice(&word[12..])))
            }
            Self::Uint => Ok(AbiValue::Uint(U256::from_be_slice(word))),
            Self::FixedBytes => Ok(AbiValue::FixedBytes(B256::from_slice(word))),
            Self::Bool => match word {
                w if w[..31].iter().all(|&b| b == 0) && w[31] <= 1 => {
                    Ok(AbiValue::Bool(w[31] == 1))
                }
                _ => Err(BootError::Decode("bool word is not 0 or 1".to_string())),
            },
        }
    }
}

/// A parsed cast-style function signature: `name(argtypes)(rettypes)`.
///
/// The second parenthesized list declares the return shape and may be
/// omitted for calls whose result is discarded.
#[derive(Debug, Clone)]
pub struct Signature {
    pub name: String,
    inputs: Vec<AbiType>,
    /// Canonical `name(type,type)` form the selector is hashed over.
    canonical: String,
    outputs: Vec<AbiType>,
}

impl Signature {
    pub fn parse(signature: &str) -> Result<Self> {
        let bad = || BootError::Decode(format!("malformed signature: {signature:?}"));

        let (name, rest) = signature.split_once('(').ok_or_else(bad)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(bad());
        }
        let (input_list, rest) = rest.split_once(')').ok_or_else(bad)?;

        let mut inputs = Vec::new();
        let mut canonical_inputs = Vec::new();
        for token in split_type_list(input_list) {
            let (ty, canonical) = AbiType::parse(token)?;
            inputs.push(ty);
            canonical_inputs.push(canonical);
        }

        let outputs = match rest.trim() {
            "" => Vec::new(),
            out => {
                let list = out
                    .strip_prefix('(')
                    .and_then(|o| o.strip_suffix(')'))
                    .ok_or_else(bad)?;
                split_type_list(list)
                    .map(|token| AbiType::parse(token).map(|(ty, _)| ty))
                    .collect::<Result<Vec<_>>>()?
            }
        };

        Ok(Self {
            name: name.to_string(),
            canonical: format!("{}({})", name, canonical_inputs.join(",")),
            inputs,
            outputs,
        })
    }

    /// The 4-byte function selector.
    pub fn selector(&self) -> [u8; 4] {
        let hash = keccak256(self.canonical.as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    /// ABI-encode a call to this function.
    pub fn encode_call(&self, args: &[AbiValue]) -> Result<Bytes> {
        if args.len() != self.inputs.len() {
            return Err(BootError::Decode(format!(
                "{} expects {} argument(s), got {}",
                self.canonical,
                self.inputs.len(),
                args.len()
            )));
        }
        let mut data = Vec::with_capacity(4 + 32 * args.len());
        data.extend_from_slice(&self.selector());
        for arg in args {
            data.extend_from_slice(&arg.to_word());
        }
        Ok(data.into())
    }

    /// Decode return bytes per the declared return shape.
    pub fn decode_return(&self, data: &[u8]) -> Result<Vec<AbiValue>> {
        if data.len() != 32 * self.outputs.len() {
            return Err(BootError::Decode(format!(
                "{}: expected {} return word(s) ({} bytes), got {} bytes",
                self.canonical,
                self.outputs.len(),
                32 * self.outputs.len(),
                data.len()
            )));
        }
        self.outputs
            .iter()
            .zip(data.chunks_exact(32))
            .map(|(ty, word)| ty.decode_word(word))
            .collect()
    }
}

fn split_type_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|t| !t.is_empty())
}

/// Typed result of a read-only chain call. Immutable once returned.
#[derive(Debug, Clone)]
pub struct ChainQueryResult {
    /// Raw return bytes as sent by the node.
    pub raw: Bytes,
    /// Values decoded per the declared return shape.
    pub values: Vec<AbiValue>,
}

/// Read (and sparingly, write) access to chain endpoints.
///
/// The trait is the seam that lets pipeline tests substitute a scripted
/// chain for a live node.
pub trait ChainClient: Send + Sync {
    /// Fetch number and timestamp of the latest block.
    fn latest_block(
        &self,
        endpoint: &str,
    ) -> impl std::future::Future<Output = Result<BlockInfo>> + Send;

    /// Perform a read-only contract call with a human-readable signature.
    fn call(
        &self,
        endpoint: &str,
        contract: Address,
        signature: &str,
        args: &[AbiValue],
    ) -> impl std::future::Future<Output = Result<ChainQueryResult>> + Send;

    /// Send a state-mutating transaction from an unlocked dev account.
    /// Returns the transaction hash.
    fn send_transaction(
        &self,
        endpoint: &str,
        from: Address,
        contract: Address,
        signature: &str,
        args: &[AbiValue],
    ) -> impl std::future::Future<Output = Result<String>> + Send;
}

/// How a raw JSON-RPC exchange failed.
enum RpcFailure {
    /// Connection failure or a non-JSON-RPC response.
    Transport(String),
    /// A well-formed JSON-RPC error object from the node.
    Node(String),
}

/// JSON-RPC-over-HTTP chain client.
pub struct HttpChainReader {
    client: reqwest::Client,
}

impl HttpChainReader {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| BootError::RpcUnavailable {
                endpoint: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// Make a JSON-RPC call and deserialize the `result` field.
    async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, RpcFailure> {
        let response = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .map_err(|e| RpcFailure::Transport(format!("{method} request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(RpcFailure::Transport(format!(
                "{method} returned HTTP {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RpcFailure::Transport(format!("{method} response is not JSON: {e}")))?;

        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown node error");
            return Err(RpcFailure::Node(message.to_string()));
        }

        let result = body
            .get("result")
            .cloned()
            .ok_or_else(|| RpcFailure::Transport(format!("{method}: no result in response")))?;

        serde_json::from_value(result)
            .map_err(|e| RpcFailure::Transport(format!("{method}: unexpected result shape: {e}")))
    }
}

impl ChainClient for HttpChainReader {
    async fn latest_block(&self, endpoint: &str) -> Result<BlockInfo> {
        let block: Value = self
            .request(
                endpoint,
                "eth_getBlockByNumber",
                vec![serde_json::json!("latest"), serde_json::json!(false)],
            )
            .await
            .map_err(|f| rpc_unavailable(endpoint, f))?;

        let number = hex_field(&block, "number")?;
        let timestamp = hex_field(&block, "timestamp")?;

        tracing::trace!(endpoint, number, timestamp, "Fetched latest block");
        Ok(BlockInfo { number, timestamp })
    }

    async fn call(
        &self,
        endpoint: &str,
        contract: Address,
        signature: &str,
        args: &[AbiValue],
    ) -> Result<ChainQueryResult> {
        let sig = Signature::parse(signature)?;
        let calldata = sig.encode_call(args)?;

        let result: String = self
            .request(
                endpoint,
                "eth_call",
                vec![
                    serde_json::json!({
                        "to": format!("{contract}"),
                        "data": format!("0x{}", hex::encode(&calldata)),
                    }),
                    serde_json::json!("latest"),
                ],
            )
            .await
            .map_err(|f| rpc_unavailable(endpoint, f))?;

        let raw = decode_hex_bytes(&result)?;
        let values = sig.decode_return(&raw)?;

        Ok(ChainQueryResult {
            raw: raw.into(),
            values,
        })
    }

    async fn send_transaction(
        &self,
        endpoint: &str,
        from: Address,
        contract: Address,
        signature: &str,
        args: &[AbiValue],
    ) -> Result<String> {
        let sig = Signature::parse(signature)?;
        let calldata = sig.encode_call(args)?;

        let tx_hash: String = self
            .request(
                endpoint,
                "eth_sendTransaction",
                vec![serde_json::json!({
                    "from": format!("{from}"),
                    "to": format!("{contract}"),
                    "data": format!("0x{}", hex::encode(&calldata)),
                })],
            )
            .await
            .map_err(|f| match f {
                RpcFailure::Transport(reason) => BootError::RpcUnavailable {
                    endpoint: endpoint.to_string(),
                    reason,
                },
                RpcFailure::Node(message) => BootError::TransactionRejected(message),
            })?;

        tracing::info!(endpoint, %contract, tx_hash, "Transaction sent");
        Ok(tx_hash)
    }
}

fn rpc_unavailable(endpoint: &str, failure: RpcFailure) -> BootError {
    let reason = match failure {
        RpcFailure::Transport(r) => r,
        RpcFailure::Node(r) => format!("node error: {r}"),
    };
    BootError::RpcUnavailable {
        endpoint: endpoint.to_string(),
        reason,
    }
}

/// Extract a `0x`-prefixed hex quantity field from a JSON object.
fn hex_field(value: &Value, field: &str) -> Result<u64> {
    let text = value
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| BootError::Decode(format!("block response missing {field:?}")))?;
    parse_hex_u64(text)
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(text: &str) -> Result<u64> {
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| BootError::Decode(format!("expected 0x-prefixed quantity, got {text:?}")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| BootError::Decode(format!("invalid hex quantity {text:?}: {e}")))
}

fn decode_hex_bytes(text: &str) -> Result<Vec<u8>> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    hex::decode(digits).map_err(|e| BootError::Decode(format!("invalid hex data: {e}")))
}
