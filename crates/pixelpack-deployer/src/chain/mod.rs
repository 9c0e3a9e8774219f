//! Chain collaborator seam.
//!
//! The pipeline never builds RPC clients or touches keys. It consumes the
//! [`ChainClient`] capability set and wraps it in a [`Transactor`] that owns the
//! sender address, the confirmation depth and the confirmation timeout.

pub mod simulated;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ChainError;

pub use simulated::SimulatedChain;

/// A contract argument or return value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AbiValue {
    Address(Address),
    Uint(U256),
    Bytes32(B256),
    String(String),
    Array(Vec<AbiValue>),
}

impl AbiValue {
    pub fn as_address(&self) -> Option<Address> {
        match self {
            AbiValue::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self {
            AbiValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes32(&self) -> Option<B256> {
        match self {
            AbiValue::Bytes32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AbiValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[AbiValue]> {
        match self {
            AbiValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for AbiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiValue::Address(a) => write!(f, "{}", a),
            AbiValue::Uint(v) => write!(f, "{}", v),
            AbiValue::Bytes32(v) => write!(f, "{}", v),
            AbiValue::String(s) => write!(f, "{}", s),
            AbiValue::Array(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", parts.join(","))
            }
        }
    }
}

impl From<Address> for AbiValue {
    fn from(v: Address) -> Self {
        AbiValue::Address(v)
    }
}

impl From<U256> for AbiValue {
    fn from(v: U256) -> Self {
        AbiValue::Uint(v)
    }
}

impl From<u64> for AbiValue {
    fn from(v: u64) -> Self {
        AbiValue::Uint(U256::from(v))
    }
}

impl From<B256> for AbiValue {
    fn from(v: B256) -> Self {
        AbiValue::Bytes32(v)
    }
}

impl From<&str> for AbiValue {
    fn from(v: &str) -> Self {
        AbiValue::String(v.to_string())
    }
}

/// What a transaction does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    /// Contract creation from a named compiled artifact.
    Deploy { contract: String, args: Vec<AbiValue> },
    /// State-changing method call.
    Call {
        to: Address,
        method: String,
        args: Vec<AbiValue>,
    },
}

/// A state-changing transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Address,
    pub kind: TxKind,
}

impl Transaction {
    pub fn deploy(from: Address, contract: &str, args: Vec<AbiValue>) -> Self {
        Self {
            from,
            kind: TxKind::Deploy {
                contract: contract.to_string(),
                args,
            },
        }
    }

    pub fn call(from: Address, to: Address, method: &str, args: Vec<AbiValue>) -> Self {
        Self {
            from,
            kind: TxKind::Call {
                to,
                method: method.to_string(),
                args,
            },
        }
    }

    pub fn is_deploy(&self) -> bool {
        matches!(self.kind, TxKind::Deploy { .. })
    }
}

/// Handle to a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHandle {
    pub hash: B256,
}

/// Execution status recorded in a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Success,
    Reverted(String),
}

/// An event emitted by a transaction, decoded against its declared signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Emitting contract.
    pub address: Address,
    /// Event name from its declared signature, e.g. `PixelPackRequested`.
    pub name: String,
    /// Named fields.
    pub fields: BTreeMap<String, AbiValue>,
}

impl LogEvent {
    pub fn new(address: Address, name: &str) -> Self {
        Self {
            address,
            name: name.to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<AbiValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&AbiValue> {
        self.fields.get(name)
    }
}

/// Finality record for a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub status: TxStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
    pub logs: Vec<LogEvent>,
}

/// Capability set consumed from the chain client.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Submit a state-changing transaction.
    async fn submit_transaction(&self, tx: Transaction) -> Result<TxHandle, ChainError>;

    /// Block until the transaction has `confirmations` blocks on top of (and including)
    /// its own. Reverted transactions still return their receipt.
    async fn wait_for_confirmations(
        &self,
        handle: &TxHandle,
        confirmations: u64,
    ) -> Result<Receipt, ChainError>;

    /// Ordered events emitted by a mined transaction.
    fn read_effect_log(&self, receipt: &Receipt) -> Vec<LogEvent> {
        receipt.logs.clone()
    }

    /// Whether contract code is deployed at `address`.
    async fn has_code(&self, address: Address) -> Result<bool, ChainError>;

    /// Read-only contract call.
    async fn call_static(
        &self,
        address: Address,
        method: &str,
        args: &[AbiValue],
    ) -> Result<AbiValue, ChainError>;

    /// Stream of events from every mined transaction, starting now.
    fn subscribe_events(&self) -> broadcast::Receiver<LogEvent>;
}

/// Find the first event with `name` emitted by `emitter`.
pub fn find_event<'a>(
    logs: &'a [LogEvent],
    emitter: Address,
    name: &str,
) -> Option<&'a LogEvent> {
    logs.iter().find(|e| e.address == emitter && e.name == name)
}

/// Sends transactions from one account and awaits each to the configured depth.
#[derive(Clone)]
pub struct Transactor {
    client: Arc<dyn ChainClient>,
    from: Address,
    confirmations: u64,
    timeout: Duration,
}

impl Transactor {
    pub fn new(
        client: Arc<dyn ChainClient>,
        from: Address,
        confirmations: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            from,
            confirmations: confirmations.max(1),
            timeout,
        }
    }

    /// Sender address (the deployer).
    pub fn from(&self) -> Address {
        self.from
    }

    pub fn confirmations(&self) -> u64 {
        self.confirmations
    }

    /// Submit and block until confirmed. Reverts become [`ChainError::Reverted`].
    pub async fn send(&self, tx: Transaction) -> Result<Receipt, ChainError> {
        let handle = self.client.submit_transaction(tx).await?;
        tracing::debug!(hash = %handle.hash, "Transaction submitted");
        self.confirm(&handle).await
    }

    /// Await an already submitted transaction.
    pub async fn confirm(&self, handle: &TxHandle) -> Result<Receipt, ChainError> {
        let wait = self.client.wait_for_confirmations(handle, self.confirmations);
        let receipt = match tokio::time::timeout(self.timeout, wait).await {
            Ok(receipt) => receipt?,
            Err(_) => {
                return Err(ChainError::ConfirmationTimeout {
                    hash: handle.hash,
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        match &receipt.status {
            TxStatus::Success => {
                tracing::debug!(
                    hash = %receipt.transaction_hash,
                    block = receipt.block_number,
                    confirmations = self.confirmations,
                    "Transaction confirmed"
                );
                Ok(receipt)
            }
            TxStatus::Reverted(reason) => Err(ChainError::Reverted {
                hash: receipt.transaction_hash,
                reason: reason.clone(),
            }),
        }
    }

    /// Deploy a contract and return its address with the creation receipt.
    pub async fn deploy(
        &self,
        contract: &str,
        args: Vec<AbiValue>,
    ) -> Result<(Address, Receipt), ChainError> {
        let receipt = self.send(Transaction::deploy(self.from, contract, args)).await?;
        let address = receipt.contract_address.ok_or_else(|| {
            ChainError::Client(format!("{} deployment produced no address", contract))
        })?;
        Ok((address, receipt))
    }

    /// Call a state-changing method.
    pub async fn call(
        &self,
        to: Address,
        method: &str,
        args: Vec<AbiValue>,
    ) -> Result<Receipt, ChainError> {
        self.send(Transaction::call(self.from, to, method, args)).await
    }

    /// Read-only call.
    pub async fn read(
        &self,
        to: Address,
        method: &str,
        args: &[AbiValue],
    ) -> Result<AbiValue, ChainError> {
        self.client.call_static(to, method, args).await
    }

    pub async fn has_code(&self, address: Address) -> Result<bool, ChainError> {
        self.client.has_code(address).await
    }

    pub fn effect_log(&self, receipt: &Receipt) -> Vec<LogEvent> {
        self.client.read_effect_log(receipt)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.client.subscribe_events()
    }
}

impl fmt::Debug for Transactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transactor")
            .field("from", &self.from)
            .field("confirmations", &self.confirmations)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_event_by_emitter_and_name() {
        let factory = Address::with_last_byte(7);
        let other = Address::with_last_byte(8);
        let logs = vec![
            LogEvent::new(other, "PixelPackRequested").with_field("tokenId", 9u64),
            LogEvent::new(factory, "Transfer").with_field("tokenId", 1u64),
            LogEvent::new(factory, "PixelPackRequested").with_field("tokenId", 1u64),
        ];

        let event = find_event(&logs, factory, "PixelPackRequested").unwrap();
        assert_eq!(event.field("tokenId").and_then(AbiValue::as_uint), Some(U256::from(1)));
        assert!(find_event(&logs, factory, "Missing").is_none());
    }

    #[test]
    fn test_abi_value_display() {
        let value = AbiValue::Array(vec![1u64.into(), 1000u64.into()]);
        assert_eq!(value.to_string(), "[1,1000]");
    }

    #[test]
    fn test_abi_value_serialization() {
        let value = AbiValue::Uint(U256::from(5));
        let json = serde_json::to_string(&value).unwrap();
        assert!(json.contains("\"type\":\"uint\""));
        let back: AbiValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
