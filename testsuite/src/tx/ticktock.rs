use everscale_types::num::Tokens;

use crate::bridge::TickTock;
use crate::error::HarnessResult;
use crate::phase::{
    ActionPhaseContext, ActionPhaseResult, ComputePhaseContext, ComputeStatus, TransactionInput,
};
use crate::registry::Target;
use crate::session::Session;
use crate::tx::{DispatchResult, Outcome};
use crate::TxState;

impl Session {
    /// Runs a tick or tock transaction on a contract.
    ///
    /// The queue is not touched, produced messages are appended to it.
    /// Failed runs are recorded but never bounce.
    pub fn ticktock<T: Into<Target>>(
        &mut self,
        target: T,
        kind: TickTock,
    ) -> HarnessResult<DispatchResult> {
        let contract = self.registry.lookup(&target.into())?.clone();
        ts_log_dispatch!(
            self.config.verbosity,
            address = %self.registry.label(&contract.address),
            kind = ?kind,
            "ticktock"
        );

        let output = {
            let mut state = TxState::new(
                &self.config,
                &self.params,
                self.bridge.as_ref(),
                self.now,
                self.lt + 1,
                contract,
            );

            let compute = state.compute_phase(ComputePhaseContext {
                input: TransactionInput::TickTock(kind),
                free: false,
            })?;

            let outcome = match compute.status {
                ComputeStatus::Success => {
                    let output = compute.output;
                    let action = state.action_phase(ActionPhaseContext {
                        new_data: output.new_data,
                        actions: output.actions,
                        balance_delta: output.balance_delta,
                        original_balance: compute.original_balance,
                        msg_remaining: Tokens::ZERO,
                    })?;
                    match action {
                        ActionPhaseResult::Applied { .. } => Outcome::Success,
                        ActionPhaseResult::Failed { result_code, .. } => {
                            Outcome::ActionFailure { result_code }
                        }
                    }
                }
                ComputeStatus::Failed {
                    exit_code,
                    exit_arg,
                } => Outcome::VmFailure {
                    exit_code,
                    exit_arg,
                },
                ComputeStatus::NotAccepted => Outcome::Rejected,
            };
            state.finish(outcome)
        };

        self.commit(None, output, false)
    }
}
