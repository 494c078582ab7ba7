use everscale_types::num::Tokens;
use tycho_testsuite_abi::Address;

use crate::error::{HarnessError, HarnessResult};
use crate::message::{DecodedBody, MessageId};
use crate::queue::Event;
use crate::session::Session;

mod ordinary;
mod ticktock;

/// How a dispatched message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Contract code failed.
    VmFailure { exit_code: i32, exit_arg: Option<i32> },
    /// Code succeeded but its actions could not be applied.
    ActionFailure { result_code: i32 },
    /// Destination does not exist, the value was sent back.
    Bounced,
    /// External message was not accepted. Nothing was committed.
    Rejected,
    /// Destination does not exist, the value was kept at the address.
    Parked,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Exit or result code of a failed execution.
    pub fn failure_code(&self) -> Option<i32> {
        match self {
            Self::VmFailure { exit_code, .. } => Some(*exit_code),
            Self::ActionFailure { result_code } => Some(*result_code),
            _ => None,
        }
    }
}

/// Result of one executed or consumed message.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    /// `None` for tick-tock transactions.
    pub message_id: Option<MessageId>,
    pub address: Address,
    pub outcome: Outcome,
    pub gas_used: u64,
    pub fees: Tokens,
    /// Internal messages added to the queue, without the bounce.
    pub out_messages: Vec<MessageId>,
    /// Bounced message added to the queue. Never in `out_messages`.
    pub bounce: Option<MessageId>,
    pub events: Vec<Event>,
    /// First decoded answer.
    pub answer: Option<DecodedBody>,
    /// The message deployed its destination.
    pub deployed: bool,
}

impl DispatchResult {
    pub(crate) fn new(message_id: Option<MessageId>, address: Address, outcome: Outcome) -> Self {
        Self {
            message_id,
            address,
            outcome,
            gas_used: 0,
            fees: Tokens::ZERO,
            out_messages: Vec::new(),
            bounce: None,
            events: Vec::new(),
            answer: None,
            deployed: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn failure_code(&self) -> Option<i32> {
        self.outcome.failure_code()
    }
}

/// Why a dispatch loop stopped.
#[derive(Debug)]
pub enum Halt {
    /// Queue is empty.
    Drained,
    /// The crash policy matched the last result.
    Crashed,
    /// The stop condition matched the last result.
    Stopped,
    /// Dispatch limit reached.
    Limit,
    /// Hard error. The failed message is still at the queue head.
    Error(HarnessError),
}

/// Results of a dispatch loop.
#[derive(Debug)]
pub struct Batch {
    pub results: Vec<DispatchResult>,
    pub halt: Halt,
    /// Ids still in the queue when the loop stopped.
    pub pending: Vec<MessageId>,
}

impl Batch {
    pub fn is_drained(&self) -> bool {
        matches!(self.halt, Halt::Drained)
    }

    pub fn last(&self) -> Option<&DispatchResult> {
        self.results.last()
    }

    /// Last result if the loop was halted by the crash policy.
    pub fn crashed(&self) -> Option<&DispatchResult> {
        match self.halt {
            Halt::Crashed => self.results.last(),
            _ => None,
        }
    }

    pub fn into_result(self) -> HarnessResult<Vec<DispatchResult>> {
        match self.halt {
            Halt::Error(e) => Err(e),
            _ => Ok(self.results),
        }
    }
}

impl Session {
    /// Dispatches until the queue drains or the crash policy matches.
    pub fn dispatch_all(&mut self) -> Batch {
        self.run_batch(None, |_| false)
    }

    /// Like [`dispatch_all`] with at most `limit` dispatches.
    ///
    /// [`dispatch_all`]: Self::dispatch_all
    pub fn dispatch_limit(&mut self, limit: usize) -> Batch {
        self.run_batch(Some(limit), |_| false)
    }

    /// Like [`dispatch_all`] but also stops after a result matching `stop`.
    ///
    /// [`dispatch_all`]: Self::dispatch_all
    pub fn dispatch_until<F>(&mut self, stop: F) -> Batch
    where
        F: FnMut(&DispatchResult) -> bool,
    {
        self.run_batch(None, stop)
    }

    fn run_batch<F>(&mut self, limit: Option<usize>, mut stop: F) -> Batch
    where
        F: FnMut(&DispatchResult) -> bool,
    {
        let mut results = Vec::new();
        let halt = loop {
            if limit.is_some_and(|limit| results.len() >= limit) {
                break Halt::Limit;
            }

            let result = match self.dispatch_one() {
                Ok(Some(result)) => result,
                Ok(None) => break Halt::Drained,
                Err(e) => break Halt::Error(e),
            };

            let crashed = result
                .failure_code()
                .is_some_and(|code| self.config().crash_policy.matches(code));
            let stopped = stop(&result);
            results.push(result);

            if crashed {
                break Halt::Crashed;
            } else if stopped {
                break Halt::Stopped;
            }
        };

        ts_log_dispatch!(
            self.config().verbosity,
            dispatched = results.len(),
            pending = self.queue_len(),
            halt = ?halt,
            "dispatch loop finished"
        );

        Batch {
            results,
            halt,
            pending: self.queue().iter().map(|msg| msg.id).collect(),
        }
    }
}
