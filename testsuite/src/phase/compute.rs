use everscale_types::num::Tokens;
use everscale_types::prelude::*;

use crate::bridge::{ExecutionOutput, TickTock, VmInput};
use crate::error::{HarnessError, HarnessResult};
use crate::message::Message;
use crate::TxState;

/// Exit code of a transaction which could not pay for its gas.
pub const OUT_OF_GAS_EXIT_CODE: i32 = -14;

/// Compute phase input context.
pub struct ComputePhaseContext<'a> {
    /// Parsed transaction input.
    pub input: TransactionInput<'a>,
    /// Skip gas fees (constructors and getters).
    pub free: bool,
}

/// Parsed transaction input.
#[derive(Debug, Clone, Copy)]
pub enum TransactionInput<'a> {
    Ordinary {
        message: &'a Message,
        /// Serialized message.
        root: &'a Cell,
    },
    TickTock(TickTock),
}

impl<'a> TransactionInput<'a> {
    pub fn message(&self) -> Option<&'a Message> {
        match *self {
            Self::Ordinary { message, .. } => Some(message),
            Self::TickTock(_) => None,
        }
    }

    fn is_external(&self) -> bool {
        self.message().is_some_and(Message::is_external_in)
    }
}

/// Executed compute phase with additional info.
#[derive(Debug)]
pub struct ComputePhaseFull {
    pub status: ComputeStatus,
    /// Gas fees taken from the contract balance.
    pub gas_fees: Tokens,
    /// Balance before the inbound value was credited.
    pub original_balance: Tokens,
    /// Raw bridge output.
    pub output: ExecutionOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeStatus {
    Success,
    Failed { exit_code: i32, exit_arg: Option<i32> },
    /// External message was not accepted. Nothing must be committed.
    NotAccepted,
}

impl TxState<'_> {
    /// Compute phase of ordinary and tick-tock transactions.
    ///
    /// - Runs contract code through the bridge;
    /// - Must be called after the credit phase for internal messages;
    /// - Charges `gas_used * gas_price` when gas fees are enabled;
    /// - Insufficient balance for gas turns the run into a failure
    ///   with [`OUT_OF_GAS_EXIT_CODE`], nothing is charged then.
    ///
    /// Returns [`ComputePhaseFull`] with the raw bridge output.
    ///
    /// Fails only when the bridge itself fails. The state is left
    /// untouched in that case.
    pub fn compute_phase(
        &mut self,
        ctx: ComputePhaseContext<'_>,
    ) -> HarnessResult<ComputePhaseFull> {
        let message = ctx.input.message();
        let is_external = ctx.input.is_external();
        let msg_value = match message {
            Some(message) if !is_external => message.value,
            _ => Tokens::ZERO,
        };
        let original_balance = self
            .contract
            .balance
            .checked_sub(msg_value)
            .unwrap_or(Tokens::ZERO);

        let (root, ticktock) = match ctx.input {
            TransactionInput::Ordinary { root, .. } => (Some(root), None),
            TransactionInput::TickTock(kind) => (None, Some(kind)),
        };

        let input = VmInput {
            address: &self.contract.address,
            code: &self.contract.code,
            data: &self.contract.data,
            balance: self.contract.balance,
            message: root,
            body: message.map(|message| &message.body),
            msg_value,
            is_external,
            ticktock,
            now: self.now,
            lt: self.lt,
            gas_limit: self.config.gas_limit,
            config: self.params,
        };
        ts_log_trace!(
            self.config.verbosity,
            address = %self.contract.address,
            balance = %self.contract.balance.into_inner(),
            body = ?input.body,
            "bridge input"
        );

        let output = match ticktock {
            Some(_) => self.bridge.ticktock(&input),
            None => self.bridge.run(&input),
        }
        .map_err(|source| HarnessError::Bridge {
            id: message.map(|message| message.id),
            source,
        })?;

        ts_log_trace!(
            self.config.verbosity,
            exit_code = output.exit_code,
            gas_used = output.gas_used,
            accepted = output.accepted,
            actions = output.actions.len(),
            "bridge output"
        );

        if is_external && !output.accepted {
            return Ok(ComputePhaseFull {
                status: ComputeStatus::NotAccepted,
                gas_fees: Tokens::ZERO,
                original_balance,
                output,
            });
        }

        self.gas_used = output.gas_used;

        let mut status = if output.is_success() {
            ComputeStatus::Success
        } else {
            ComputeStatus::Failed {
                exit_code: output.exit_code,
                exit_arg: output.exit_arg,
            }
        };

        let mut gas_fees = Tokens::ZERO;
        if !ctx.free && self.config.gas_fee {
            let fee = (output.gas_used as u128)
                .checked_mul(self.config.gas_price as u128)
                .map(Tokens::new);

            match fee.and_then(|fee| Some((fee, self.contract.balance.checked_sub(fee)?))) {
                Some((fee, balance)) => {
                    self.contract.balance = balance;
                    self.add_fees(fee)?;
                    gas_fees = fee;
                }
                None => {
                    status = ComputeStatus::Failed {
                        exit_code: OUT_OF_GAS_EXIT_CODE,
                        exit_arg: None,
                    };
                }
            }
        }

        Ok(ComputePhaseFull {
            status,
            gas_fees,
            original_balance,
            output,
        })
    }
}
