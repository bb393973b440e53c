//! Backend actions: proposing, approving and executing, all behind bounded retry

mod confirmer;
mod executor;
mod proposer;
pub mod retry;

pub use confirmer::{ApprovalStatus, OrderConfirmer, SafeConfirmer};
pub use executor::SafeExecutor;
pub use proposer::{OrderProposer, OrderRequest, ProposalRequest, SafeProposer};
pub use retry::{PollOutcome, RetryRunner};
