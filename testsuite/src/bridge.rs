//! Boundary between the dispatcher and a contract VM.
//!
//! The dispatcher never interprets contract code. It hands a [`VmInput`]
//! to an [`ExecutionBridge`] and applies the returned [`ExecutionOutput`].

use ahash::HashMap;
use everscale_types::num::Tokens;
use everscale_types::prelude::*;
use tycho_testsuite_abi::Address;

use crate::config::ConfigParams;
use crate::registry::ContractImage;

/// Exit code reported by [`ScriptedBridge`] for code it does not know.
pub const NO_HANDLER_EXIT_CODE: i32 = -13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickTock {
    Tick,
    Tock,
}

/// Everything a VM needs to run one transaction.
#[derive(Debug, Clone, Copy)]
pub struct VmInput<'a> {
    pub address: &'a Address,
    pub code: &'a Cell,
    pub data: &'a Cell,
    /// Balance including the inbound message value.
    pub balance: Tokens,
    /// Serialized inbound message, `None` for tick-tock runs.
    pub message: Option<&'a Cell>,
    /// Inbound message body.
    pub body: Option<&'a Cell>,
    pub msg_value: Tokens,
    pub is_external: bool,
    pub ticktock: Option<TickTock>,
    /// Seconds.
    pub now: u32,
    pub lt: u64,
    pub gas_limit: u64,
    pub config: &'a ConfigParams,
}

bitflags::bitflags! {
    /// Outbound message flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SendMsgFlags: u8 {
        /// Fees are paid separately from the message value.
        const PAY_FEE_SEPARATELY = 1;
        /// Skip this action if it cannot be performed.
        const IGNORE_ERROR = 2;
        /// Request deletion when the balance becomes zero.
        const DELETE_IF_EMPTY = 32;
        /// Add the remaining inbound message value.
        const WITH_REMAINING_BALANCE = 64;
        /// Send the whole remaining balance.
        const ALL_BALANCE = 128;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveMode {
    /// Reserve exactly the given amount.
    Exact,
    /// Reserve up to the given amount.
    AtMost,
    /// Reserve the balance before the transaction plus the given amount.
    OriginalPlus,
}

/// Message produced by a contract.
#[derive(Debug, Clone)]
pub struct OutMessage {
    /// [`Address::None`] for external outbound messages.
    pub dst: Address,
    pub value: Tokens,
    pub bounce: bool,
    pub body: Cell,
    pub init: Option<ContractImage>,
}

impl OutMessage {
    pub fn internal(dst: Address, value: Tokens, body: Cell) -> Self {
        Self {
            dst,
            value,
            bounce: false,
            body,
            init: None,
        }
    }

    pub fn external(body: Cell) -> Self {
        Self {
            dst: Address::None,
            value: Tokens::ZERO,
            bounce: false,
            body,
            init: None,
        }
    }

    pub fn with_bounce(mut self, bounce: bool) -> Self {
        self.bounce = bounce;
        self
    }

    pub fn with_init(mut self, init: ContractImage) -> Self {
        self.init = Some(init);
        self
    }

    pub fn is_external(&self) -> bool {
        self.dst.is_none()
    }
}

#[derive(Debug, Clone)]
pub enum OutAction {
    SendMsg {
        flags: SendMsgFlags,
        message: OutMessage,
    },
    SetCode {
        code: Cell,
    },
    Reserve {
        mode: ReserveMode,
        value: Tokens,
    },
}

impl OutAction {
    pub fn send(message: OutMessage) -> Self {
        Self::SendMsg {
            flags: SendMsgFlags::empty(),
            message,
        }
    }

    pub fn send_with_flags(message: OutMessage, flags: SendMsgFlags) -> Self {
        Self::SendMsg { flags, message }
    }
}

/// Result of one VM run.
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub exit_code: i32,
    pub exit_arg: Option<i32>,
    pub gas_used: u64,
    /// Whether an external message was accepted.
    pub accepted: bool,
    /// `None` keeps the current data.
    pub new_data: Option<Cell>,
    /// Change applied to the balance besides messages and fees.
    pub balance_delta: i128,
    pub actions: Vec<OutAction>,
}

impl ExecutionOutput {
    pub fn success() -> Self {
        Self {
            exit_code: 0,
            exit_arg: None,
            gas_used: 0,
            accepted: true,
            new_data: None,
            balance_delta: 0,
            actions: Vec::new(),
        }
    }

    pub fn failure(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::success()
        }
    }

    /// Failed external message that never reached `ACCEPT`.
    pub fn rejected() -> Self {
        Self {
            accepted: false,
            ..Self::success()
        }
    }

    pub fn with_gas(mut self, gas_used: u64) -> Self {
        self.gas_used = gas_used;
        self
    }

    pub fn with_data(mut self, data: Cell) -> Self {
        self.new_data = Some(data);
        self
    }

    pub fn with_action(mut self, action: OutAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_exit_arg(mut self, exit_arg: i32) -> Self {
        self.exit_arg = Some(exit_arg);
        self
    }

    pub fn with_balance_delta(mut self, delta: i128) -> Self {
        self.balance_delta = delta;
        self
    }

    /// Exit codes `0` and `1` are successful.
    pub fn is_success(&self) -> bool {
        matches!(self.exit_code, 0 | 1)
    }
}

/// Contract VM seam.
pub trait ExecutionBridge {
    /// Runs code on an inbound message.
    ///
    /// Errors are hard failures of the bridge itself, contract failures
    /// are reported through [`ExecutionOutput::exit_code`].
    fn run(&self, input: &VmInput<'_>) -> anyhow::Result<ExecutionOutput>;

    /// Runs a tick or tock transaction.
    fn ticktock(&self, input: &VmInput<'_>) -> anyhow::Result<ExecutionOutput> {
        self.run(input)
    }
}

impl<T: ExecutionBridge + ?Sized> ExecutionBridge for Box<T> {
    fn run(&self, input: &VmInput<'_>) -> anyhow::Result<ExecutionOutput> {
        T::run(self, input)
    }

    fn ticktock(&self, input: &VmInput<'_>) -> anyhow::Result<ExecutionOutput> {
        T::ticktock(self, input)
    }
}

/// Accepts everything and changes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBridge;

impl ExecutionBridge for NoopBridge {
    fn run(&self, _: &VmInput<'_>) -> anyhow::Result<ExecutionOutput> {
        Ok(ExecutionOutput::success())
    }
}

type Handler = Box<dyn Fn(&VmInput<'_>) -> anyhow::Result<ExecutionOutput>>;

/// Bridge with a closure per contract code hash.
pub struct ScriptedBridge {
    handlers: HashMap<HashBytes, Handler>,
    missing_code_exit_code: i32,
}

impl Default for ScriptedBridge {
    fn default() -> Self {
        Self {
            handlers: HashMap::default(),
            missing_code_exit_code: NO_HANDLER_EXIT_CODE,
        }
    }
}

impl ScriptedBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit code reported for code without a handler.
    pub fn with_missing_code_exit_code(mut self, exit_code: i32) -> Self {
        self.missing_code_exit_code = exit_code;
        self
    }

    pub fn with_contract<F>(mut self, code: &DynCell, handler: F) -> Self
    where
        F: Fn(&VmInput<'_>) -> anyhow::Result<ExecutionOutput> + 'static,
    {
        self.register(code, handler);
        self
    }

    pub fn register<F>(&mut self, code: &DynCell, handler: F)
    where
        F: Fn(&VmInput<'_>) -> anyhow::Result<ExecutionOutput> + 'static,
    {
        self.handlers.insert(*code.repr_hash(), Box::new(handler));
    }
}

impl std::fmt::Debug for ScriptedBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedBridge")
            .field("contracts", &self.handlers.len())
            .finish()
    }
}

impl ExecutionBridge for ScriptedBridge {
    fn run(&self, input: &VmInput<'_>) -> anyhow::Result<ExecutionOutput> {
        match self.handlers.get(input.code.repr_hash()) {
            Some(handler) => handler(input),
            None => Ok(ExecutionOutput::failure(self.missing_code_exit_code)),
        }
    }
}
