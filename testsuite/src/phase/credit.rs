use everscale_types::num::Tokens;

use crate::error::{HarnessError, HarnessResult};
use crate::TxState;

impl TxState<'_> {
    /// Credit phase of ordinary transactions.
    ///
    /// - Adds the inbound message value to the contract balance;
    /// - Only makes sense for internal messages;
    /// - Must be called before the compute phase.
    ///
    /// Fails only on balance overflow.
    pub fn credit_phase(&mut self, value: Tokens) -> HarnessResult<()> {
        self.contract.balance = self
            .contract
            .balance
            .checked_add(value)
            .ok_or(HarnessError::BalanceOverflow(self.contract.address))?;
        Ok(())
    }
}
