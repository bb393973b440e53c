//! Safe wallet model: off-chain signature aggregation, single on-chain execution
//!
//! Pending transactions live in a coordinator service keyed by their EIP-712
//! `safeTxHash`. Owners sign that hash and post the signature to the
//! coordinator; once `confirmationsRequired` signatures exist, any party can
//! submit `execTransaction` with the packed signatures.

use super::codec::{checksum_address, decimal_u256, flexible_u64, null_as_default};
use crate::error::{ApprovalError, ApprovalResult};

use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, H256, U256};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

lazy_static! {
    static ref DOMAIN_SEPARATOR_TYPEHASH: [u8; 32] =
        keccak(b"EIP712Domain(uint256 chainId,address verifyingContract)");
    static ref SAFE_TX_TYPEHASH: [u8; 32] = keccak(
        b"SafeTx(address to,uint256 value,bytes data,uint8 operation,uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,address refundReceiver,uint256 nonce)"
    );
}

fn keccak(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Call type of a Safe transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Operation {
    #[default]
    Call,
    DelegateCall,
}

impl TryFrom<u8> for Operation {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Operation::Call),
            1 => Ok(Operation::DelegateCall),
            other => Err(format!("unknown operation type {}", other)),
        }
    }
}

impl From<Operation> for u8 {
    fn from(op: Operation) -> u8 {
        match op {
            Operation::Call => 0,
            Operation::DelegateCall => 1,
        }
    }
}

/// The signed fields of a Safe transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeTxData {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub operation: Operation,
    pub safe_tx_gas: U256,
    pub base_gas: U256,
    pub gas_price: U256,
    pub gas_token: Address,
    pub refund_receiver: Address,
    pub nonce: u64,
}

impl SafeTxData {
    /// A plain call with no gas refund, as proposed by this relayer
    pub fn call(to: Address, value: U256, data: Bytes, operation: Operation, nonce: u64) -> Self {
        Self {
            to,
            value,
            data,
            operation,
            safe_tx_gas: U256::zero(),
            base_gas: U256::zero(),
            gas_price: U256::zero(),
            gas_token: Address::zero(),
            refund_receiver: Address::zero(),
            nonce,
        }
    }

    fn struct_hash(&self) -> [u8; 32] {
        let encoded = abi::encode(&[
            Token::FixedBytes(SAFE_TX_TYPEHASH.to_vec()),
            Token::Address(self.to),
            Token::Uint(self.value),
            Token::FixedBytes(keccak(&self.data).to_vec()),
            Token::Uint(U256::from(u8::from(self.operation))),
            Token::Uint(self.safe_tx_gas),
            Token::Uint(self.base_gas),
            Token::Uint(self.gas_price),
            Token::Address(self.gas_token),
            Token::Address(self.refund_receiver),
            Token::Uint(U256::from(self.nonce)),
        ]);
        keccak(&encoded)
    }

    /// EIP-712 hash identifying this transaction for `safe` on `chain_id`
    pub fn safe_tx_hash(&self, chain_id: u64, safe: Address) -> H256 {
        let domain_separator = keccak(&abi::encode(&[
            Token::FixedBytes(DOMAIN_SEPARATOR_TYPEHASH.to_vec()),
            Token::Uint(U256::from(chain_id)),
            Token::Address(safe),
        ]));

        let mut preimage = Vec::with_capacity(66);
        preimage.extend_from_slice(&[0x19, 0x01]);
        preimage.extend_from_slice(&domain_separator);
        preimage.extend_from_slice(&self.struct_hash());
        H256::from(keccak(&preimage))
    }
}

/// An owner signature collected by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub owner: Address,
    pub signature: Bytes,
    #[serde(default)]
    pub signature_type: Option<String>,
}

/// A multisig transaction as reported by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeTransaction {
    pub safe_tx_hash: H256,
    pub to: Address,
    #[serde(with = "decimal_u256")]
    pub value: U256,
    #[serde(default)]
    pub data: Option<Bytes>,
    #[serde(default)]
    pub operation: Operation,
    #[serde(with = "flexible_u64")]
    pub nonce: u64,
    #[serde(default, with = "decimal_u256")]
    pub safe_tx_gas: U256,
    #[serde(default, with = "decimal_u256")]
    pub base_gas: U256,
    #[serde(default, with = "decimal_u256")]
    pub gas_price: U256,
    #[serde(default)]
    pub gas_token: Option<Address>,
    #[serde(default)]
    pub refund_receiver: Option<Address>,
    pub confirmations_required: usize,
    #[serde(default, deserialize_with = "null_as_default")]
    pub confirmations: Vec<Confirmation>,
    #[serde(default)]
    pub is_executed: bool,
    #[serde(default)]
    pub transaction_hash: Option<H256>,
}

impl SafeTransaction {
    /// Number of owner signatures collected so far
    pub fn confirmation_count(&self) -> usize {
        self.confirmations.len()
    }

    /// Whether `owner` has already signed
    pub fn is_confirmed_by(&self, owner: Address) -> bool {
        self.confirmations.iter().any(|c| c.owner == owner)
    }

    /// Whether enough signatures exist to execute
    pub fn is_ready(&self) -> bool {
        self.confirmation_count() >= self.confirmations_required
    }

    pub fn tx_data(&self) -> SafeTxData {
        SafeTxData {
            to: self.to,
            value: self.value,
            data: self.data.clone().unwrap_or_default(),
            operation: self.operation,
            safe_tx_gas: self.safe_tx_gas,
            base_gas: self.base_gas,
            gas_price: self.gas_price,
            gas_token: self.gas_token.unwrap_or_default(),
            refund_receiver: self.refund_receiver.unwrap_or_default(),
            nonce: self.nonce,
        }
    }

    /// Concatenate signatures ordered by ascending owner address, as the
    /// Safe contract requires
    pub fn packed_signatures(&self) -> ApprovalResult<Bytes> {
        let mut confirmations: Vec<&Confirmation> = self.confirmations.iter().collect();
        confirmations.sort_by_key(|c| c.owner);

        let mut packed = Vec::with_capacity(confirmations.len() * 65);
        for confirmation in confirmations {
            if confirmation.signature.len() != 65 {
                return Err(ApprovalError::Signing(format!(
                    "signature from {:?} has {} bytes",
                    confirmation.owner,
                    confirmation.signature.len()
                )));
            }
            packed.extend_from_slice(&confirmation.signature);
        }
        Ok(Bytes::from(packed))
    }
}

/// Proposal body accepted by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeProposal {
    #[serde(serialize_with = "checksum_address")]
    pub to: Address,
    #[serde(with = "decimal_u256")]
    pub value: U256,
    pub data: Option<Bytes>,
    pub operation: Operation,
    #[serde(with = "decimal_u256")]
    pub safe_tx_gas: U256,
    #[serde(with = "decimal_u256")]
    pub base_gas: U256,
    #[serde(with = "decimal_u256")]
    pub gas_price: U256,
    #[serde(serialize_with = "checksum_address")]
    pub gas_token: Address,
    #[serde(serialize_with = "checksum_address")]
    pub refund_receiver: Address,
    pub nonce: u64,
    pub contract_transaction_hash: H256,
    #[serde(serialize_with = "checksum_address")]
    pub sender: Address,
    pub signature: Bytes,
    pub origin: Option<String>,
}

impl SafeProposal {
    pub fn new(tx: &SafeTxData, hash: H256, sender: Address, signature: Bytes) -> Self {
        Self {
            to: tx.to,
            value: tx.value,
            data: if tx.data.is_empty() {
                None
            } else {
                Some(tx.data.clone())
            },
            operation: tx.operation,
            safe_tx_gas: tx.safe_tx_gas,
            base_gas: tx.base_gas,
            gas_price: tx.gas_price,
            gas_token: tx.gas_token,
            refund_receiver: tx.refund_receiver,
            nonce: tx.nonce,
            contract_transaction_hash: hash,
            sender,
            signature,
            origin: Some(env!("CARGO_PKG_NAME").to_string()),
        }
    }
}

/// Safe account summary from the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeInfo {
    pub address: Address,
    #[serde(with = "flexible_u64")]
    pub nonce: u64,
    pub threshold: usize,
    pub owners: Vec<Address>,
}

/// Off-chain signature aggregator for the Safe backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SafeCoordinator: Send + Sync {
    /// Transactions not yet executed, any confirmation state
    async fn pending_transactions(&self) -> ApprovalResult<Vec<SafeTransaction>>;

    /// Detail for a single transaction
    async fn transaction(&self, safe_tx_hash: H256) -> ApprovalResult<SafeTransaction>;

    /// Publish a new, sender-signed transaction
    async fn propose(&self, proposal: &SafeProposal) -> ApprovalResult<()>;

    /// Add an owner signature to an existing transaction
    async fn confirm(&self, safe_tx_hash: H256, signature: &Bytes) -> ApprovalResult<()>;

    async fn safe_info(&self) -> ApprovalResult<SafeInfo>;
}

/// On-chain side of the Safe backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SafeChain: Send + Sync {
    fn chain_id(&self) -> u64;

    fn safe_address(&self) -> Address;

    /// Current on-chain Safe nonce
    async fn nonce(&self) -> ApprovalResult<u64>;

    /// Submit `execTransaction` and wait for it to be mined
    async fn execute(&self, tx: &SafeTransaction, signatures: Bytes) -> ApprovalResult<H256>;
}
