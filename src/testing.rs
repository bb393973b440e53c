//! In-memory backends shared by unit tests

use crate::chain::order::fixtures::order;
use crate::chain::safe::fixtures::confirmation;
use crate::chain::{
    MultisigData, NewOrder, OrderLedger, OrderState, SafeChain, SafeCoordinator, SafeInfo,
    SafeProposal, SafeTransaction,
};
use crate::error::{ApprovalError, ApprovalResult};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256};
use std::collections::HashMap;
use std::sync::Mutex;

/// Safe coordinator and chain backed by one map of transactions
#[derive(Default)]
pub struct FakeSafeBackend {
    pub transactions: Mutex<HashMap<H256, SafeTransaction>>,
    pub proposals: Mutex<Vec<SafeProposal>>,
    pub confirmations: Mutex<Vec<(H256, Bytes)>>,
    pub executions: Mutex<Vec<H256>>,
    pub onchain_nonce: Mutex<u64>,
}

impl FakeSafeBackend {
    pub fn with(txs: Vec<SafeTransaction>) -> Self {
        let backend = Self::default();
        {
            let mut map = backend.transactions.lock().unwrap();
            for tx in txs {
                map.insert(tx.safe_tx_hash, tx);
            }
        }
        backend
    }

    /// Simulate another owner signing through the coordinator
    pub fn add_confirmation(&self, hash: H256, owner: u8) {
        let mut map = self.transactions.lock().unwrap();
        if let Some(tx) = map.get_mut(&hash) {
            tx.confirmations.push(confirmation(owner));
        }
    }

    pub fn get(&self, hash: H256) -> SafeTransaction {
        self.transactions.lock().unwrap()[&hash].clone()
    }

    pub fn execution_count(&self) -> usize {
        self.executions.lock().unwrap().len()
    }

    pub fn confirmation_count(&self) -> usize {
        self.confirmations.lock().unwrap().len()
    }
}

#[async_trait]
impl SafeCoordinator for FakeSafeBackend {
    async fn pending_transactions(&self) -> ApprovalResult<Vec<SafeTransaction>> {
        let map = self.transactions.lock().unwrap();
        let mut pending: Vec<_> = map.values().filter(|t| !t.is_executed).cloned().collect();
        pending.sort_by_key(|t| t.nonce);
        Ok(pending)
    }

    async fn transaction(&self, safe_tx_hash: H256) -> ApprovalResult<SafeTransaction> {
        self.transactions
            .lock()
            .unwrap()
            .get(&safe_tx_hash)
            .cloned()
            .ok_or_else(|| ApprovalError::NotFound(format!("{:?}", safe_tx_hash)))
    }

    async fn propose(&self, proposal: &SafeProposal) -> ApprovalResult<()> {
        self.proposals.lock().unwrap().push(proposal.clone());
        Ok(())
    }

    async fn confirm(&self, safe_tx_hash: H256, signature: &Bytes) -> ApprovalResult<()> {
        self.confirmations
            .lock()
            .unwrap()
            .push((safe_tx_hash, signature.clone()));
        Ok(())
    }

    async fn safe_info(&self) -> ApprovalResult<SafeInfo> {
        Ok(SafeInfo {
            address: Address::from_low_u64_be(0x5afe),
            nonce: *self.onchain_nonce.lock().unwrap(),
            threshold: 2,
            owners: vec![],
        })
    }
}

#[async_trait]
impl SafeChain for FakeSafeBackend {
    fn chain_id(&self) -> u64 {
        11155111
    }

    fn safe_address(&self) -> Address {
        Address::from_low_u64_be(0x5afe)
    }

    async fn nonce(&self) -> ApprovalResult<u64> {
        Ok(*self.onchain_nonce.lock().unwrap())
    }

    async fn execute(&self, tx: &SafeTransaction, _signatures: Bytes) -> ApprovalResult<H256> {
        let mut map = self.transactions.lock().unwrap();
        let stored = map
            .get_mut(&tx.safe_tx_hash)
            .ok_or_else(|| ApprovalError::Chain("unknown transaction".into()))?;
        let mut executions = self.executions.lock().unwrap();
        let exec_hash = H256::from_low_u64_be(0xe0 + executions.len() as u64 + 1);
        stored.is_executed = true;
        stored.transaction_hash = Some(exec_hash);
        executions.push(tx.safe_tx_hash);
        Ok(exec_hash)
    }
}

/// Order ledger with call accounting
pub struct FakeOrderLedger {
    pub multisig: Mutex<MultisigData>,
    pub orders: Mutex<HashMap<u64, OrderState>>,
    /// Order data reads remaining before a fresh order reports initialized
    pub init_after_reads: Mutex<HashMap<u64, usize>>,
    pub address_calls: Mutex<Vec<u64>>,
    pub data_calls: Mutex<Vec<u64>>,
    pub approvals: Mutex<Vec<(u64, String, usize)>>,
    pub new_orders: Mutex<Vec<NewOrder>>,
    /// When false, approve calls are accepted but never land on-chain
    pub approvals_land: Mutex<bool>,
}

pub const SIGNERS: [&str; 3] = ["EQsigner0", "EQsigner1", "EQsigner2"];

impl FakeOrderLedger {
    pub fn new(orders: Vec<OrderState>) -> Self {
        let next = orders.iter().map(|o| o.seqno + 1).max().unwrap_or(0);
        Self {
            multisig: Mutex::new(MultisigData {
                next_order_seqno: next,
                threshold: 2,
                signers: SIGNERS.iter().map(|s| s.to_string()).collect(),
                proposers: vec![],
            }),
            orders: Mutex::new(orders.into_iter().map(|o| (o.seqno, o)).collect()),
            init_after_reads: Mutex::new(HashMap::new()),
            address_calls: Mutex::new(Vec::new()),
            data_calls: Mutex::new(Vec::new()),
            approvals: Mutex::new(Vec::new()),
            new_orders: Mutex::new(Vec::new()),
            approvals_land: Mutex::new(true),
        }
    }

    /// `count` orders, all pending with no approvals
    pub fn with_pending(count: u64) -> Self {
        Self::new(
            (0..count)
                .map(|i| order(i, &SIGNERS, &[false, false, false]))
                .collect(),
        )
    }

    pub fn seqno_of(address: &str) -> u64 {
        address
            .trim_start_matches("EQorder")
            .parse()
            .unwrap_or(u64::MAX)
    }

    pub fn set_executed(&self, seqno: u64) {
        if let Some(o) = self.orders.lock().unwrap().get_mut(&seqno) {
            o.executed = true;
        }
    }

    pub fn data_calls(&self) -> Vec<u64> {
        self.data_calls.lock().unwrap().clone()
    }

    pub fn address_calls(&self) -> Vec<u64> {
        self.address_calls.lock().unwrap().clone()
    }

    pub fn approval_calls(&self) -> usize {
        self.approvals.lock().unwrap().len()
    }

    pub fn clear_calls(&self) {
        self.data_calls.lock().unwrap().clear();
        self.address_calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl OrderLedger for FakeOrderLedger {
    async fn multisig_data(&self, _multisig: &str) -> ApprovalResult<MultisigData> {
        Ok(self.multisig.lock().unwrap().clone())
    }

    async fn order_address(&self, _multisig: &str, seqno: u64) -> ApprovalResult<String> {
        self.address_calls.lock().unwrap().push(seqno);
        Ok(format!("EQorder{}", seqno))
    }

    async fn order_data(&self, address: &str) -> ApprovalResult<OrderState> {
        let seqno = Self::seqno_of(address);
        self.data_calls.lock().unwrap().push(seqno);

        let mut orders = self.orders.lock().unwrap();
        let state = orders
            .get_mut(&seqno)
            .ok_or_else(|| ApprovalError::NotFound(address.to_string()))?;

        let mut pending_init = self.init_after_reads.lock().unwrap();
        if let Some(remaining) = pending_init.get_mut(&seqno) {
            if *remaining == 0 {
                state.initialized = true;
                pending_init.remove(&seqno);
            } else {
                *remaining -= 1;
            }
        }
        Ok(state.clone())
    }

    async fn send_new_order(&self, _multisig: &str, new_order: &NewOrder) -> ApprovalResult<()> {
        self.new_orders.lock().unwrap().push(new_order.clone());
        let mut created = order(new_order.seqno, &SIGNERS, &[false, false, false]);
        created.initialized = false;
        created.actions = new_order.actions.clone();
        created.expiration_date = new_order.valid_until;
        self.orders.lock().unwrap().insert(new_order.seqno, created);
        self.init_after_reads
            .lock()
            .unwrap()
            .insert(new_order.seqno, 1);
        self.multisig.lock().unwrap().next_order_seqno = new_order.seqno + 1;
        Ok(())
    }

    async fn approve(&self, address: &str, signer: &str, signer_index: usize) -> ApprovalResult<()> {
        let seqno = Self::seqno_of(address);
        self.approvals
            .lock()
            .unwrap()
            .push((seqno, signer.to_string(), signer_index));

        if *self.approvals_land.lock().unwrap() {
            let mut orders = self.orders.lock().unwrap();
            if let Some(o) = orders.get_mut(&seqno) {
                if let Some(bit) = o.approvals.get_mut(signer_index) {
                    *bit = true;
                }
                if o.approval_count() as u64 >= o.threshold {
                    o.executed = true;
                }
            }
        }
        Ok(())
    }
}
