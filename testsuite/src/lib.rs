//! Deterministic message dispatch harness for contract tests.
//!
//! A [`Session`] owns a contract [`Registry`], a FIFO [`MessageQueue`] and
//! an [`EventLog`]. Contracts run through an [`ExecutionBridge`], the
//! session applies their results transaction by transaction.

use everscale_types::num::Tokens;

use self::bridge::{ExecutionBridge, OutMessage};
use self::config::{ConfigParams, SessionConfig};
use self::error::{HarnessError, HarnessResult};
use self::registry::ContractInstance;

pub use self::artifacts::ArtifactLoader;
pub use self::bridge::{
    ExecutionOutput, NoopBridge, OutAction, ReserveMode, ScriptedBridge, SendMsgFlags, TickTock,
    VmInput,
};
pub use self::config::{CallDispatch, CrashPolicy, UndeliverablePolicy};
pub use self::message::{DecodedBody, Message, MessageId, MessageKind};
pub use self::queue::{Event, EventLog, MessageQueue};
pub use self::registry::{ContractImage, Registry, Target};
pub use self::session::{
    CallOptions, CallResult, DeployParams, InternalMessage, Ledger, Session,
};
pub use self::tx::{Batch, DispatchResult, Halt, Outcome};
pub use tycho_testsuite_abi as abi;

#[macro_use]
mod log;

pub mod artifacts;
pub mod bridge;
pub mod config;
pub mod error;
pub mod message;
pub mod queue;
pub mod registry;
pub mod session;
pub mod tx;

mod phase;

/// Staged state of one contract during a transaction.
///
/// Phases mutate only this copy. The session commits it as a whole.
pub(crate) struct TxState<'a> {
    pub config: &'a SessionConfig,
    pub params: &'a ConfigParams,
    pub bridge: &'a dyn ExecutionBridge,
    pub now: u32,
    pub lt: u64,
    pub contract: ContractInstance,
    pub total_fees: Tokens,
    pub minted: Tokens,
    pub gas_used: u64,
    pub out_msgs: Vec<OutMessage>,
    pub bounce_msg: Option<OutMessage>,
}

impl<'a> TxState<'a> {
    pub fn new(
        config: &'a SessionConfig,
        params: &'a ConfigParams,
        bridge: &'a dyn ExecutionBridge,
        now: u32,
        lt: u64,
        contract: ContractInstance,
    ) -> Self {
        Self {
            config,
            params,
            bridge,
            now,
            lt,
            contract,
            total_fees: Tokens::ZERO,
            minted: Tokens::ZERO,
            gas_used: 0,
            out_msgs: Vec::new(),
            bounce_msg: None,
        }
    }

    fn add_fees(&mut self, fees: Tokens) -> HarnessResult<()> {
        self.total_fees = self
            .total_fees
            .checked_add(fees)
            .ok_or(HarnessError::BalanceOverflow(self.contract.address))?;
        Ok(())
    }

    /// Finishes the transaction. Nothing is committed for `Rejected`.
    pub fn finish(self, outcome: Outcome) -> TxOutput {
        TxOutput {
            contract: self.contract,
            outcome,
            gas_used: self.gas_used,
            fees: self.total_fees,
            minted: self.minted,
            out_msgs: self.out_msgs,
            bounce_msg: self.bounce_msg,
        }
    }
}

/// Owned result of a finished [`TxState`].
pub(crate) struct TxOutput {
    pub contract: ContractInstance,
    pub outcome: Outcome,
    pub gas_used: u64,
    pub fees: Tokens,
    pub minted: Tokens,
    pub out_msgs: Vec<OutMessage>,
    pub bounce_msg: Option<OutMessage>,
}
