use everscale_types::num::Tokens;
use everscale_types::prelude::*;
use tycho_testsuite_abi::codec::{decode_input, decode_out_body, OutBody};
use tycho_testsuite_abi::{Address, CellExt, Params};

use crate::bridge::OutMessage;
use crate::config::UndeliverablePolicy;
use crate::error::{HarnessError, HarnessResult};
use crate::message::{bounced_function_id, make_bounce_body, DecodedBody, Message, MessageKind};
use crate::phase::{
    ActionPhaseContext, ActionPhaseResult, BouncePhaseContext, ComputePhaseContext,
    ComputeStatus, TransactionInput,
};
use crate::queue::Event;
use crate::registry::{ContractImage, ContractInstance};
use crate::session::Session;
use crate::tx::{DispatchResult, Outcome};
use crate::{TxOutput, TxState};

impl Session {
    /// Executes the message at the queue head.
    ///
    /// The message is removed only after its result was committed.
    /// On error the queue and all contracts are left untouched.
    pub fn dispatch_one(&mut self) -> HarnessResult<Option<DispatchResult>> {
        let Some(msg) = self.queue.front().cloned() else {
            return Ok(None);
        };

        let result = self.deliver(&msg)?;
        self.queue.pop();
        Ok(Some(result))
    }

    /// Executes an internal or external inbound message.
    pub(crate) fn deliver(&mut self, msg: &Message) -> HarnessResult<DispatchResult> {
        ts_log_dispatch!(
            self.config.verbosity,
            id = msg.id,
            kind = %msg.kind,
            src = %self.registry.label(&msg.src),
            dst = %self.registry.label(&msg.dst),
            value = %msg.value.into_inner(),
            name = msg.name().unwrap_or_default(),
            "dispatch"
        );

        let (contract, deployed) = match self.registry.get(&msg.dst) {
            Some(contract) => {
                if msg.init.is_some() {
                    // Deploy over an existing contract is a failed delivery.
                    return match msg.is_internal() && msg.bounce && !msg.bounced {
                        true => self.bounce_back(msg),
                        false => self.park(msg),
                    };
                }
                (contract.clone(), false)
            }
            None => match self.deployable_image(msg) {
                Some(image) => {
                    let parked = self.registry.parked(&msg.dst).unwrap_or_default();
                    (ContractInstance::new(msg.dst, image.clone(), parked), true)
                }
                None => return self.deliver_undeliverable(msg),
            },
        };

        let output = self.execute_ordinary(msg, contract)?;
        let mut result = self.commit(Some(msg.id), output, deployed)?;
        result.deployed = deployed && result.outcome != Outcome::Rejected;

        ts_log_dispatch!(
            self.config.verbosity,
            id = msg.id,
            outcome = ?result.outcome,
            gas_used = result.gas_used,
            out_messages = result.out_messages.len(),
            "dispatched"
        );
        Ok(result)
    }

    /// Image which deploys the destination of `msg`.
    fn deployable_image<'m>(&self, msg: &'m Message) -> Option<&'m ContractImage> {
        let image = msg.init.as_ref()?;
        let workchain = msg.dst.workchain()?;
        match image.address(workchain) {
            Ok(address) if address == msg.dst => Some(image),
            _ => {
                ts_log_action!(
                    self.config.verbosity,
                    id = msg.id,
                    "init does not match the destination address"
                );
                None
            }
        }
    }

    /// Runs all phases of an ordinary transaction on a staged contract.
    pub(crate) fn execute_ordinary(
        &self,
        msg: &Message,
        contract: ContractInstance,
    ) -> HarnessResult<TxOutput> {
        let root = msg.build_cell()?;
        let is_external = msg.is_external_in();

        let mut state = TxState::new(
            &self.config,
            &self.params,
            self.bridge.as_ref(),
            self.now,
            self.lt + 1,
            contract,
        );

        if !is_external {
            state.credit_phase(msg.value)?;
        }

        let compute = state.compute_phase(ComputePhaseContext {
            input: TransactionInput::Ordinary {
                message: msg,
                root: &root,
            },
            free: false,
        })?;

        let outcome = match compute.status {
            ComputeStatus::NotAccepted => return Ok(state.finish(Outcome::Rejected)),
            ComputeStatus::Failed {
                exit_code,
                exit_arg,
            } => Outcome::VmFailure {
                exit_code,
                exit_arg,
            },
            ComputeStatus::Success => {
                let msg_remaining = match is_external {
                    true => Tokens::ZERO,
                    false => msg
                        .value
                        .checked_sub(compute.gas_fees)
                        .unwrap_or(Tokens::ZERO),
                };
                let output = compute.output;
                let action = state.action_phase(ActionPhaseContext {
                    new_data: output.new_data,
                    actions: output.actions,
                    balance_delta: output.balance_delta,
                    original_balance: compute.original_balance,
                    msg_remaining,
                })?;
                match action {
                    ActionPhaseResult::Applied { .. } => Outcome::Success,
                    ActionPhaseResult::Failed { result_code, .. } => {
                        Outcome::ActionFailure { result_code }
                    }
                }
            }
        };

        if !outcome.is_success() && msg.is_internal() && msg.bounce && !msg.bounced {
            state.bounce_phase(BouncePhaseContext {
                gas_fees: compute.gas_fees,
                message: msg,
            })?;
        }

        Ok(state.finish(outcome))
    }

    /// Stores a finished transaction and emits its messages.
    pub(crate) fn commit(
        &mut self,
        message_id: Option<u64>,
        output: TxOutput,
        deployed: bool,
    ) -> HarnessResult<DispatchResult> {
        let TxOutput {
            mut contract,
            outcome,
            gas_used,
            fees,
            minted,
            out_msgs,
            bounce_msg,
        } = output;

        let address = contract.address;
        let mut result = DispatchResult::new(message_id, address, outcome);
        if outcome == Outcome::Rejected {
            return Ok(result);
        }

        let total_fees = self
            .total_fees
            .checked_add(fees.into_inner())
            .ok_or(HarnessError::LedgerOverflow("total fees"))?;
        let total_minted = self
            .total_minted
            .checked_add(minted.into_inner())
            .ok_or(HarnessError::LedgerOverflow("total minted"))?;

        self.lt += 1;
        contract.last_lt = self.lt;
        if deployed {
            self.registry.take_parked(&address);
        }
        if contract.destroy_requested && contract.balance == Tokens::ZERO {
            ts_log_action!(
                self.config.verbosity,
                address = %self.registry.label(&address),
                "contract requested deletion"
            );
        }
        self.registry.replace(contract);

        self.total_fees = total_fees;
        self.total_minted = total_minted;
        self.last_gas = gas_used;
        result.gas_used = gas_used;
        result.fees = fees;

        for out in out_msgs {
            self.emit(address, out, false, &mut result);
        }
        if let Some(bounce) = bounce_msg {
            let id = self.emit(address, bounce, true, &mut result);
            result.bounce = Some(id);
        }
        Ok(result)
    }

    /// Handles a message whose destination does not exist.
    fn deliver_undeliverable(&mut self, msg: &Message) -> HarnessResult<DispatchResult> {
        if msg.is_internal() && msg.bounce && !msg.bounced {
            return self.bounce_back(msg);
        }

        let park = msg.bounced
            || msg.kind == MessageKind::Empty
            || self.config.undeliverable == UndeliverablePolicy::Park;
        if !park {
            return Err(HarnessError::UnknownDestination {
                id: msg.id,
                address: msg.dst,
            });
        }
        self.park(msg)
    }

    /// Keeps the message value at its destination without execution.
    fn park(&mut self, msg: &Message) -> HarnessResult<DispatchResult> {
        self.registry.park(msg.dst, msg.value)?;
        ts_log_dispatch!(
            self.config.verbosity,
            id = msg.id,
            address = %self.registry.label(&msg.dst),
            value = %msg.value.into_inner(),
            "parked"
        );
        Ok(DispatchResult::new(Some(msg.id), msg.dst, Outcome::Parked))
    }

    /// Returns an undelivered message to its sender without execution.
    fn bounce_back(&mut self, msg: &Message) -> HarnessResult<DispatchResult> {
        let body = make_bounce_body(msg.body.as_ref())?;
        let fee = msg.value.min(Tokens::new(self.config.bounce_fee as u128));
        let value = msg.value.checked_sub(fee).unwrap_or_default();

        let mut result = DispatchResult::new(Some(msg.id), msg.dst, Outcome::Bounced);
        result.fees = fee;
        self.total_fees = self
            .total_fees
            .checked_add(fee.into_inner())
            .ok_or(HarnessError::LedgerOverflow("total fees"))?;

        let bounce = OutMessage {
            dst: msg.src,
            value,
            bounce: false,
            body,
            init: None,
        };
        let id = self.emit(msg.dst, bounce, true, &mut result);
        result.bounce = Some(id);

        ts_log_dispatch!(
            self.config.verbosity,
            id = msg.id,
            bounce_id = id,
            value = %value.into_inner(),
            "bounced undelivered message"
        );
        Ok(result)
    }

    /// Records an outbound message and routes it by kind.
    fn emit(
        &mut self,
        src: Address,
        out: OutMessage,
        bounced: bool,
        result: &mut DispatchResult,
    ) -> u64 {
        let id = self.next_message_id();
        let (kind, decoded) = self.classify(&src, &out, bounced);

        let msg = Message {
            id,
            kind,
            src,
            dst: out.dst,
            value: out.value,
            bounce: out.bounce,
            bounced,
            body: out.body,
            init: out.init,
            created_lt: self.lt,
            created_at: self.now,
            decoded,
        };

        ts_log_action!(
            self.config.verbosity,
            id,
            kind = %msg.kind,
            dst = %self.registry.label(&msg.dst),
            value = %msg.value.into_inner(),
            name = msg.name().unwrap_or_default(),
            "emitted"
        );
        ts_log_trace!(self.config.verbosity, id, body = %msg.body.data_hex(), "emitted body");

        self.history.push(msg.clone());
        match (msg.kind, msg.decoded) {
            (MessageKind::Event, Some(DecodedBody { name, params })) => {
                let event = Event {
                    message_id: id,
                    src,
                    name,
                    fields: params,
                    created_at: msg.created_at,
                };
                result.events.push(event.clone());
                self.events.push(event);
            }
            (MessageKind::Answer, decoded) => {
                if result.answer.is_none() {
                    result.answer = decoded;
                }
            }
            _ if msg.dst.is_none() => {}
            (kind, decoded) => {
                self.queue.push(Message {
                    kind,
                    decoded,
                    ..msg
                });
                if !bounced {
                    result.out_messages.push(id);
                }
            }
        }
        id
    }

    fn classify(
        &self,
        src: &Address,
        out: &OutMessage,
        bounced: bool,
    ) -> (MessageKind, Option<DecodedBody>) {
        if out.is_external() {
            let Some(abi) = self.registry.get(src).and_then(|c| c.abi.as_ref()) else {
                return (MessageKind::Unknown, None);
            };
            return match decode_out_body(abi, out.body.as_ref()) {
                Ok(OutBody::Answer { function, params }) => (
                    MessageKind::Answer,
                    Some(DecodedBody {
                        name: function,
                        params,
                    }),
                ),
                Ok(OutBody::Event { name, fields }) => (
                    MessageKind::Event,
                    Some(DecodedBody {
                        name,
                        params: fields,
                    }),
                ),
                Ok(OutBody::Unknown { .. }) => (MessageKind::Unknown, None),
                Err(e) => {
                    ts_log_action!(self.config.verbosity, error = %e, "undecodable external output");
                    (MessageKind::Unknown, None)
                }
            };
        }

        if bounced {
            // The bounced call belongs to the ABI of the bouncing contract.
            let name = bounced_function_id(out.body.as_ref()).and_then(|id| {
                let abi = self.registry.get(src)?.abi.as_ref()?;
                abi.function_by_input_id(id).map(|f| f.name.clone())
            });
            let decoded = name.map(|name| DecodedBody {
                name,
                params: Params::new(),
            });
            return (MessageKind::Bounced, decoded);
        }

        if out.body.is_empty_cell() {
            return (MessageKind::Empty, None);
        }

        match self.decode_internal(&out.dst, &out.body) {
            Some(decoded) => (MessageKind::InternalCall, Some(decoded)),
            None => (MessageKind::Unknown, None),
        }
    }

    /// Decodes an internal call with the destination ABI, falling back
    /// to every known ABI.
    pub(crate) fn decode_internal(&self, dst: &Address, body: &Cell) -> Option<DecodedBody> {
        let own = self.registry.get(dst).and_then(|c| c.abi.as_ref());
        own.into_iter()
            .chain(self.registry.known_abis())
            .find_map(|abi| decode_input(abi, body.as_ref(), false).ok())
            .map(|call| DecodedBody {
                name: call.function,
                params: call.params,
            })
    }
}
