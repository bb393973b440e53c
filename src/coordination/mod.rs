//! Coordination of approvals across polling ticks
//!
//! Each tick a scheduler:
//! 1. Lists pending items through its pipeline
//! 2. Skips items already retired or in flight
//! 3. Runs validation, approval and execution per item in its own task

pub mod cache;
pub mod guard;
pub mod pipeline;
pub mod scheduler;
pub mod validator;

pub use cache::ResolvedIndexCache;
pub use guard::{ConcurrencyGuard, GuardTicket};
pub use pipeline::{
    ApprovalPipeline, OrderSignerPipeline, ProcessOutcome, SafeExecutorPipeline,
    SafeSignerPipeline,
};
pub use scheduler::{Scheduler, SchedulerHandle, TickReport};
pub use validator::{CooldownValidator, PolicyValidator, Validator, ValidatorChain};
