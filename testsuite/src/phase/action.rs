use everscale_types::num::Tokens;
use everscale_types::prelude::*;

use crate::bridge::{OutAction, ReserveMode, SendMsgFlags};
use crate::error::{HarnessError, HarnessResult};
use crate::TxState;

/// Result code of an action phase which ran out of funds.
pub const NOT_ENOUGH_FUNDS_RESULT_CODE: i32 = 37;

/// Action phase input context.
pub struct ActionPhaseContext {
    /// New contract data, `None` keeps the current one.
    pub new_data: Option<Cell>,
    pub actions: Vec<OutAction>,
    /// Burned when negative, minted when positive.
    pub balance_delta: i128,
    /// Balance before the inbound value was credited.
    pub original_balance: Tokens,
    /// Inbound message value left after gas fees.
    pub msg_remaining: Tokens,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPhaseResult {
    Applied {
        messages_created: usize,
    },
    /// Nothing was applied.
    Failed {
        result_code: i32,
        action_index: Option<usize>,
    },
}

impl TxState<'_> {
    /// Action phase of ordinary and tick-tock transactions.
    ///
    /// - Applies the balance delta reported by the bridge first;
    /// - Processes actions in order, reserved value is never sent;
    /// - Commits new data, code, balance and outbound messages only if
    ///   every action succeeded, otherwise nothing is applied;
    /// - Must be called only after a successful compute phase.
    ///
    /// Returns [`ActionPhaseResult::Failed`] with
    /// [`NOT_ENOUGH_FUNDS_RESULT_CODE`] when the balance does not cover
    /// the actions.
    ///
    /// Fails only on balance overflow.
    pub fn action_phase(&mut self, ctx: ActionPhaseContext) -> HarnessResult<ActionPhaseResult> {
        let address = self.contract.address;
        let overflow = || HarnessError::BalanceOverflow(address);
        let failed = |action_index| ActionPhaseResult::Failed {
            result_code: NOT_ENOUGH_FUNDS_RESULT_CODE,
            action_index,
        };

        let mut balance = self.contract.balance;
        let mut burned = Tokens::ZERO;
        let mut minted = Tokens::ZERO;

        if ctx.balance_delta < 0 {
            let amount = Tokens::new(ctx.balance_delta.unsigned_abs());
            match balance.checked_sub(amount) {
                Some(rest) => {
                    balance = rest;
                    burned = amount;
                }
                None => return Ok(failed(None)),
            }
        } else if ctx.balance_delta > 0 {
            let amount = Tokens::new(ctx.balance_delta as u128);
            balance = balance.checked_add(amount).ok_or_else(overflow)?;
            minted = amount;
        }

        let mut reserved = Tokens::ZERO;
        let mut msg_remaining = ctx.msg_remaining;
        let mut out_msgs = Vec::new();
        let mut new_code = None;
        let mut destroy = false;

        for (index, action) in ctx.actions.into_iter().enumerate() {
            match action {
                OutAction::SendMsg { flags, mut message } => {
                    let available = balance.checked_sub(reserved).unwrap_or(Tokens::ZERO);
                    let value = if message.is_external() {
                        Tokens::ZERO
                    } else if flags.contains(SendMsgFlags::ALL_BALANCE) {
                        available
                    } else if flags.contains(SendMsgFlags::WITH_REMAINING_BALANCE) {
                        message
                            .value
                            .checked_add(msg_remaining)
                            .ok_or_else(overflow)?
                    } else {
                        message.value
                    };

                    let Some(rest) = balance.checked_sub(value).filter(|_| value <= available)
                    else {
                        if flags.contains(SendMsgFlags::IGNORE_ERROR) {
                            ts_log_action!(
                                self.config.verbosity,
                                index,
                                value = %value.into_inner(),
                                "skipped message without funds"
                            );
                            continue;
                        }
                        return Ok(failed(Some(index)));
                    };

                    balance = rest;
                    if flags.contains(SendMsgFlags::WITH_REMAINING_BALANCE) {
                        msg_remaining = Tokens::ZERO;
                    }
                    if flags.contains(SendMsgFlags::DELETE_IF_EMPTY) {
                        destroy = true;
                    }
                    message.value = value;
                    out_msgs.push(message);
                }
                OutAction::SetCode { code } => new_code = Some(code),
                OutAction::Reserve { mode, value } => {
                    let amount = match mode {
                        ReserveMode::Exact => value,
                        ReserveMode::AtMost => {
                            value.min(balance.checked_sub(reserved).unwrap_or(Tokens::ZERO))
                        }
                        ReserveMode::OriginalPlus => ctx
                            .original_balance
                            .checked_add(value)
                            .ok_or_else(overflow)?,
                    };
                    let total = reserved.checked_add(amount).ok_or_else(overflow)?;
                    if total > balance {
                        return Ok(failed(Some(index)));
                    }
                    reserved = total;
                }
            }
        }

        self.contract.balance = balance;
        if let Some(data) = ctx.new_data {
            self.contract.data = data;
        }
        if let Some(code) = new_code {
            self.contract.code = code;
        }
        self.contract.destroy_requested |= destroy;

        self.add_fees(burned)?;
        self.minted = self.minted.checked_add(minted).ok_or_else(overflow)?;

        let messages_created = out_msgs.len();
        self.out_msgs.extend(out_msgs);
        Ok(ActionPhaseResult::Applied { messages_created })
    }
}

#[cfg(test)]
mod tests {
    use tycho_testsuite_abi::Address;

    use super::*;
    use crate::bridge::{NoopBridge, OutMessage};
    use crate::config::{ConfigParams, SessionConfig};
    use crate::tests::{make_default_config, make_instance};

    fn make_ctx(actions: Vec<OutAction>) -> ActionPhaseContext {
        ActionPhaseContext {
            new_data: None,
            actions,
            balance_delta: 0,
            original_balance: Tokens::new(1_000),
            msg_remaining: Tokens::ZERO,
        }
    }

    fn make_state<'a>(config: &'a SessionConfig, params: &'a ConfigParams) -> TxState<'a> {
        TxState::new(config, params, &NoopBridge, 0, 1, make_instance("wallet", 1_000))
    }

    fn transfer(value: u128) -> OutMessage {
        OutMessage::internal(Address::zero(0), Tokens::new(value), Cell::empty_cell())
    }

    #[test]
    fn messages_are_paid_from_balance() {
        let config = make_default_config();
        let params = ConfigParams::default();
        let mut state = make_state(&config, &params);

        let data = CellBuilder::build_from(7u32).unwrap();
        let mut ctx = make_ctx(vec![
            OutAction::send(transfer(300)),
            OutAction::send(OutMessage::external(Cell::empty_cell())),
        ]);
        ctx.new_data = Some(data.clone());

        let res = state.action_phase(ctx).unwrap();
        assert_eq!(res, ActionPhaseResult::Applied { messages_created: 2 });
        assert_eq!(state.contract.balance, Tokens::new(700));
        assert_eq!(state.contract.data, data);
        assert_eq!(state.out_msgs[0].value, Tokens::new(300));
        assert_eq!(state.out_msgs[1].value, Tokens::ZERO);
    }

    #[test]
    fn failed_actions_apply_nothing() {
        let config = make_default_config();
        let params = ConfigParams::default();
        let mut state = make_state(&config, &params);

        let mut ctx = make_ctx(vec![
            OutAction::send(transfer(600)),
            OutAction::send(transfer(600)),
        ]);
        ctx.new_data = Some(CellBuilder::build_from(7u32).unwrap());

        let res = state.action_phase(ctx).unwrap();
        assert_eq!(res, ActionPhaseResult::Failed {
            result_code: NOT_ENOUGH_FUNDS_RESULT_CODE,
            action_index: Some(1),
        });
        assert_eq!(state.contract.balance, Tokens::new(1_000));
        assert_eq!(state.contract.data, Cell::empty_cell());
        assert!(state.out_msgs.is_empty());
    }

    #[test]
    fn ignore_error_skips_message() {
        let config = make_default_config();
        let params = ConfigParams::default();
        let mut state = make_state(&config, &params);

        let ctx = make_ctx(vec![
            OutAction::send_with_flags(transfer(5_000), SendMsgFlags::IGNORE_ERROR),
            OutAction::send(transfer(100)),
        ]);
        let res = state.action_phase(ctx).unwrap();
        assert_eq!(res, ActionPhaseResult::Applied { messages_created: 1 });
        assert_eq!(state.contract.balance, Tokens::new(900));
    }

    #[test]
    fn all_balance_respects_reserve() {
        let config = make_default_config();
        let params = ConfigParams::default();
        let mut state = make_state(&config, &params);

        let ctx = make_ctx(vec![
            OutAction::Reserve {
                mode: ReserveMode::Exact,
                value: Tokens::new(250),
            },
            OutAction::send_with_flags(
                transfer(0),
                SendMsgFlags::ALL_BALANCE | SendMsgFlags::DELETE_IF_EMPTY,
            ),
        ]);
        state.action_phase(ctx).unwrap();
        assert_eq!(state.out_msgs[0].value, Tokens::new(750));
        assert_eq!(state.contract.balance, Tokens::new(250));
        assert!(state.contract.destroy_requested);
    }

    #[test]
    fn remaining_value_is_forwarded_once() {
        let config = make_default_config();
        let params = ConfigParams::default();
        let mut state = make_state(&config, &params);

        let mut ctx = make_ctx(vec![
            OutAction::send_with_flags(transfer(10), SendMsgFlags::WITH_REMAINING_BALANCE),
            OutAction::send_with_flags(transfer(10), SendMsgFlags::WITH_REMAINING_BALANCE),
        ]);
        ctx.msg_remaining = Tokens::new(200);
        state.action_phase(ctx).unwrap();
        assert_eq!(state.out_msgs[0].value, Tokens::new(210));
        assert_eq!(state.out_msgs[1].value, Tokens::new(10));
        assert_eq!(state.contract.balance, Tokens::new(780));
    }

    #[test]
    fn balance_delta() {
        let config = make_default_config();
        let params = ConfigParams::default();

        let mut state = make_state(&config, &params);
        let mut ctx = make_ctx(Vec::new());
        ctx.balance_delta = -400;
        state.action_phase(ctx).unwrap();
        assert_eq!(state.contract.balance, Tokens::new(600));
        assert_eq!(state.total_fees, Tokens::new(400));

        let mut state = make_state(&config, &params);
        let mut ctx = make_ctx(Vec::new());
        ctx.balance_delta = 50;
        state.action_phase(ctx).unwrap();
        assert_eq!(state.contract.balance, Tokens::new(1_050));
        assert_eq!(state.minted, Tokens::new(50));

        let mut state = make_state(&config, &params);
        let mut ctx = make_ctx(Vec::new());
        ctx.balance_delta = -5_000;
        let res = state.action_phase(ctx).unwrap();
        assert!(matches!(res, ActionPhaseResult::Failed { action_index: None, .. }));
        assert_eq!(state.contract.balance, Tokens::new(1_000));
    }
}
