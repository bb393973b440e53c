//! Proposal creation on both backends

use super::retry::{PollOutcome, RetryRunner};
use crate::chain::{
    NewOrder, OrderAction, OrderLedger, OrderState, Operation, SafeChain, SafeCoordinator,
    SafeProposal, SafeTxData,
};
use crate::error::{ApprovalError, ApprovalResult};

use chrono::Utc;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A transfer or call to propose on the Safe backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalRequest {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub operation: Operation,
}

/// Signs and publishes Safe transactions to the coordinator
pub struct SafeProposer {
    coordinator: Arc<dyn SafeCoordinator>,
    chain: Arc<dyn SafeChain>,
    wallet: LocalWallet,
    retry: RetryRunner,
}

impl SafeProposer {
    pub fn new(
        coordinator: Arc<dyn SafeCoordinator>,
        chain: Arc<dyn SafeChain>,
        wallet: LocalWallet,
        retry: RetryRunner,
    ) -> Self {
        Self {
            coordinator,
            chain,
            wallet,
            retry,
        }
    }

    /// Next free Safe nonce: past the on-chain nonce and every queued proposal
    async fn next_nonce(&self) -> ApprovalResult<u64> {
        let onchain = self.retry.run("safe nonce", || self.chain.nonce()).await?;
        let pending = self
            .retry
            .run("pending transactions", || self.coordinator.pending_transactions())
            .await?;

        let queued = pending
            .iter()
            .filter(|tx| tx.nonce >= onchain)
            .map(|tx| tx.nonce + 1)
            .max()
            .unwrap_or(onchain);
        Ok(queued.max(onchain))
    }

    /// Propose a new transaction; returns its safeTxHash
    pub async fn propose(&self, request: ProposalRequest) -> ApprovalResult<H256> {
        let nonce = self.next_nonce().await?;
        let tx = SafeTxData::call(
            request.to,
            request.value,
            request.data,
            request.operation,
            nonce,
        );
        let safe_tx_hash = tx.safe_tx_hash(self.chain.chain_id(), self.chain.safe_address());

        // Sender signature proves the proposal comes from an owner
        let signature = self.wallet.sign_hash(safe_tx_hash)?;
        let proposal = SafeProposal::new(
            &tx,
            safe_tx_hash,
            self.wallet.address(),
            Bytes::from(signature.to_vec()),
        );
        debug!("Proposing {:?} with nonce {}", safe_tx_hash, nonce);

        self.retry
            .run("propose transaction", || self.coordinator.propose(&proposal))
            .await?;

        crate::metrics::record_proposal("safe");
        info!("Transaction proposed: {:?} (nonce {})", safe_tx_hash, nonce);
        Ok(safe_tx_hash)
    }
}

/// A transfer to propose on the order backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub to: String,
    pub value: U256,
}

/// Creates orders on the order-based multisig and waits for them to land
pub struct OrderProposer {
    ledger: Arc<dyn OrderLedger>,
    multisig: String,
    retry: RetryRunner,
    order_ttl: Duration,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl OrderProposer {
    pub fn new(
        ledger: Arc<dyn OrderLedger>,
        multisig: String,
        retry: RetryRunner,
        order_ttl: Duration,
    ) -> Self {
        Self {
            ledger,
            multisig,
            retry,
            order_ttl,
            poll_attempts: 30,
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Submit a new order and wait until its state is initialized on-chain
    pub async fn create_order(&self, request: OrderRequest) -> ApprovalResult<OrderState> {
        if request.to.trim().is_empty() {
            return Err(ApprovalError::InvalidInput("order destination is empty".to_string()));
        }

        let data = self
            .retry
            .run("multisig data", || self.ledger.multisig_data(&self.multisig))
            .await?;
        let seqno = data.next_order_seqno;
        let address = self
            .retry
            .run("order address", || self.ledger.order_address(&self.multisig, seqno))
            .await?;

        let order = NewOrder {
            seqno,
            actions: vec![OrderAction {
                to: request.to,
                value: request.value,
            }],
            valid_until: Utc::now().timestamp() as u64 + self.order_ttl.as_secs(),
        };

        info!("Sending new order with seqno {} to {}", seqno, address);
        self.retry
            .run("new order", || self.ledger.send_new_order(&self.multisig, &order))
            .await?;
        crate::metrics::record_proposal("order");

        let outcome = self
            .retry
            .poll_until(
                "order initialization",
                self.poll_attempts,
                self.poll_interval,
                || self.ledger.order_data(&address),
                |state| state.initialized,
            )
            .await?;

        match outcome {
            PollOutcome::Satisfied(mut state) => {
                state.seqno = seqno;
                info!("Order {} confirmed at {}", seqno, address);
                Ok(state)
            }
            PollOutcome::TimedOut(_) => {
                warn!("Order {} not initialized after {} polls", seqno, self.poll_attempts);
                Err(ApprovalError::ProposalNotConfirmed { seqno })
            }
        }
    }

    /// Poll until the order executes, returning the last snapshot either way
    pub async fn await_execution(&self, order: &OrderState) -> ApprovalResult<OrderState> {
        let outcome = self
            .retry
            .poll_until(
                "order execution",
                self.poll_attempts,
                self.poll_interval,
                || self.ledger.order_data(&order.address),
                |state| {
                    debug!(
                        "Order {} approvals: {}/{}",
                        order.seqno,
                        state.approval_count(),
                        state.threshold
                    );
                    state.executed
                },
            )
            .await?;

        let mut state = match outcome {
            PollOutcome::Satisfied(state) => {
                info!("Order {} executed", order.seqno);
                state
            }
            PollOutcome::TimedOut(last) => {
                warn!("Order {} still awaiting approvals", order.seqno);
                last.unwrap_or_else(|| order.clone())
            }
        };
        state.seqno = order.seqno;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::order::MockOrderLedger;
    use crate::testing::{FakeOrderLedger, FakeSafeBackend};

    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn quick_retry() -> RetryRunner {
        RetryRunner::new(3, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn safe_proposal_is_signed_by_sender_over_its_hash() {
        let backend = Arc::new(FakeSafeBackend::default());
        *backend.onchain_nonce.lock().unwrap() = 4;
        let wallet: LocalWallet = KEY.parse().expect("key");
        let proposer = SafeProposer::new(backend.clone(), backend.clone(), wallet.clone(), quick_retry());

        let hash = proposer
            .propose(ProposalRequest {
                to: Address::from_low_u64_be(0x22),
                value: U256::from(1u64),
                data: Bytes::new(),
                operation: Operation::Call,
            })
            .await
            .expect("propose");

        let proposals = backend.proposals.lock().unwrap();
        assert_eq!(proposals.len(), 1);
        let proposal = &proposals[0];
        assert_eq!(proposal.contract_transaction_hash, hash);
        assert_eq!(proposal.nonce, 4);
        assert_eq!(proposal.sender, wallet.address());

        let signature = ethers::types::Signature::try_from(&proposal.signature[..]).expect("sig");
        assert_eq!(signature.recover(hash).expect("recover"), wallet.address());
    }

    #[tokio::test]
    async fn safe_nonce_skips_past_queued_proposals() {
        let mut queued = crate::chain::safe::fixtures::safe_tx(1, 2, &[]);
        queued.nonce = 6;
        let backend = Arc::new(FakeSafeBackend::with(vec![queued]));
        *backend.onchain_nonce.lock().unwrap() = 5;
        let proposer = SafeProposer::new(
            backend.clone(),
            backend.clone(),
            KEY.parse().expect("key"),
            quick_retry(),
        );
        assert_eq!(proposer.next_nonce().await.expect("nonce"), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn order_proposal_waits_for_initialization() {
        let ledger = Arc::new(FakeOrderLedger::with_pending(2));
        let proposer = OrderProposer::new(
            ledger.clone(),
            "EQmultisig".to_string(),
            quick_retry(),
            Duration::from_secs(3600),
        );

        let state = proposer
            .create_order(OrderRequest {
                to: "EQdest".to_string(),
                value: U256::from(30_000_000u64),
            })
            .await
            .expect("create");

        assert_eq!(state.seqno, 2);
        assert!(state.initialized);
        assert_eq!(ledger.new_orders.lock().unwrap()[0].actions[0].to, "EQdest");
        // first read reports uninitialized, second read sees the mined order
        assert_eq!(ledger.data_calls(), vec![2, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn order_proposal_times_out_without_initialization() {
        let mut ledger = MockOrderLedger::new();
        ledger.expect_multisig_data().returning(|_| {
            Ok(crate::chain::MultisigData {
                next_order_seqno: 9,
                threshold: 2,
                signers: vec![],
                proposers: vec![],
            })
        });
        ledger
            .expect_order_address()
            .returning(|_, seqno| Ok(format!("EQorder{}", seqno)));
        ledger.expect_send_new_order().times(1).returning(|_, _| Ok(()));
        ledger.expect_order_data().times(30).returning(|address| {
            let mut state = crate::chain::order::fixtures::order(9, &[], &[]);
            state.address = address.to_string();
            state.initialized = false;
            Ok(state)
        });

        let proposer = OrderProposer::new(
            Arc::new(ledger),
            "EQmultisig".to_string(),
            quick_retry(),
            Duration::from_secs(3600),
        );
        let err = proposer
            .create_order(OrderRequest {
                to: "EQdest".to_string(),
                value: U256::from(1u64),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::ProposalNotConfirmed { seqno: 9 }));
    }

    #[tokio::test]
    async fn empty_destination_is_rejected_before_any_call() {
        let proposer = OrderProposer::new(
            Arc::new(MockOrderLedger::new()),
            "EQmultisig".to_string(),
            quick_retry(),
            Duration::from_secs(3600),
        );
        let err = proposer
            .create_order(OrderRequest {
                to: " ".to_string(),
                value: U256::one(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::InvalidInput(_)));
    }
}
