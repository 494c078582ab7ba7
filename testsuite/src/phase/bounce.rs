use everscale_types::num::Tokens;

use crate::bridge::OutMessage;
use crate::error::{HarnessError, HarnessResult};
use crate::message::{make_bounce_body, Message};
use crate::TxState;

/// Bounce phase input context.
pub struct BouncePhaseContext<'a> {
    /// Gas fees from the compute phase (if any).
    pub gas_fees: Tokens,
    /// Inbound internal message.
    pub message: &'a Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BouncePhase {
    Executed { value: Tokens, fee: Tokens },
    /// Inbound value did not cover the fees, it stays with the contract.
    NoFunds,
}

impl TxState<'_> {
    /// Bounce phase of ordinary transactions.
    ///
    /// - Sends the inbound value back to the sender;
    /// - Defined only for bounceable internal messages;
    /// - Gas fees and the bounce fee are paid from the inbound value,
    ///   the rest is taken from the contract balance;
    /// - Outbound messages of the failed transaction are discarded.
    ///
    /// Returns an executed [`BouncePhase`].
    pub fn bounce_phase(&mut self, ctx: BouncePhaseContext<'_>) -> HarnessResult<BouncePhase> {
        let msg = ctx.message;
        debug_assert!(msg.is_internal() && msg.bounce && !msg.bounced);

        self.out_msgs.clear();

        let fee = Tokens::new(self.config.bounce_fee as u128);
        let Some(value) = msg
            .value
            .checked_sub(ctx.gas_fees)
            .and_then(|rest| rest.checked_sub(fee))
        else {
            ts_log_action!(
                self.config.verbosity,
                id = msg.id,
                "no funds to bounce"
            );
            return Ok(BouncePhase::NoFunds);
        };

        // Gas fees were already paid from the balance.
        let Some(balance) = self
            .contract
            .balance
            .checked_sub(value)
            .and_then(|rest| rest.checked_sub(fee))
        else {
            return Ok(BouncePhase::NoFunds);
        };

        let body = make_bounce_body(msg.body.as_ref()).map_err(HarnessError::from)?;
        self.contract.balance = balance;
        self.add_fees(fee)?;
        self.bounce_msg = Some(OutMessage {
            dst: msg.src,
            value,
            bounce: false,
            body,
            init: None,
        });

        Ok(BouncePhase::Executed { value, fee })
    }
}
