pub use self::action::{ActionPhaseContext, ActionPhaseResult, NOT_ENOUGH_FUNDS_RESULT_CODE};
pub use self::bounce::{BouncePhase, BouncePhaseContext};
pub use self::compute::{
    ComputePhaseContext, ComputePhaseFull, ComputeStatus, TransactionInput,
    OUT_OF_GAS_EXIT_CODE,
};

mod action;
mod bounce;
mod compute;
mod credit;
