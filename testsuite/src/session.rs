//! Test driver surface.

use std::path::PathBuf;
use std::sync::Arc;

use everscale_types::num::Tokens;
use everscale_types::prelude::*;
use serde_json::Value as JsonValue;
use tycho_testsuite_abi::codec::decode_output;
use tycho_testsuite_abi::{
    encode_call, encode_constructor, Abi, Address, CellExt, ExternalHeader, Params, Signer,
};

use crate::artifacts::ArtifactLoader;
use crate::bridge::{ExecutionBridge, OutAction};
use crate::config::{CallDispatch, ConfigParams, CrashPolicy, SessionConfig};
use crate::error::{HarnessError, HarnessResult};
use crate::message::{DecodedBody, Message, MessageId, MessageKind};
use crate::phase::{ComputePhaseContext, ComputeStatus, TransactionInput};
use crate::queue::{Event, EventLog, MessageQueue};
use crate::registry::{ContractImage, ContractInstance, Registry, Target};
use crate::tx::{Batch, DispatchResult, Outcome};
use crate::TxState;

/// Contract deployment request.
#[derive(Debug, Clone)]
pub struct DeployParams {
    pub image: ContractImage,
    pub abi: Option<Arc<Abi>>,
    /// Runs the constructor with these params.
    pub constructor: Option<Params>,
    pub balance: Tokens,
    /// Derived from the image when `None`.
    pub address: Option<Address>,
    pub workchain: Option<i8>,
    pub nickname: Option<String>,
    pub signer: Option<Signer>,
    /// Artifact name.
    pub name: Option<String>,
    pub override_existing: bool,
}

impl DeployParams {
    pub fn new(image: ContractImage) -> Self {
        Self {
            image,
            abi: None,
            constructor: None,
            balance: Tokens::ZERO,
            address: None,
            workchain: None,
            nickname: None,
            signer: None,
            name: None,
            override_existing: false,
        }
    }

    pub fn with_abi(mut self, abi: Arc<Abi>) -> Self {
        self.abi = Some(abi);
        self
    }

    pub fn with_constructor(mut self, params: Params) -> Self {
        self.constructor = Some(params);
        self
    }

    pub fn with_balance(mut self, balance: Tokens) -> Self {
        self.balance = balance;
        self
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_workchain(mut self, workchain: i8) -> Self {
        self.workchain = Some(workchain);
        self
    }

    pub fn with_nickname(mut self, nickname: &str) -> Self {
        self.nickname = Some(nickname.to_owned());
        self
    }

    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    pub fn override_existing(mut self) -> Self {
        self.override_existing = true;
        self
    }
}

/// Options of an external call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides the contract signer.
    pub signer: Option<Signer>,
    /// Exit code the call must end with. `0` expects success.
    pub expected_exit_code: i32,
    /// Overrides [`SessionConfig::call_dispatch`].
    pub dispatch: Option<CallDispatch>,
}

/// Result of an external call.
#[derive(Debug)]
pub struct CallResult {
    pub message_id: MessageId,
    pub result: DispatchResult,
    /// Answer decoded with the method outputs.
    pub answer: Option<Params>,
    /// Dispatches performed after the call.
    pub batch: Option<Batch>,
}

/// Internal message injected by the driver.
#[derive(Debug, Clone)]
pub struct InternalMessage {
    pub src: Address,
    pub dst: Address,
    pub body: Cell,
    pub value: Tokens,
    pub bounce: bool,
    pub init: Option<ContractImage>,
}

/// Value accounting snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ledger {
    /// Contract balances and parked value.
    pub balances: u128,
    /// Value carried by queued messages.
    pub in_flight: u128,
    pub fees: u128,
    pub minted: u128,
}

impl Ledger {
    /// Value that existed before any fees and mints.
    ///
    /// Stays the same across dispatches.
    pub fn accounted(&self) -> HarnessResult<i128> {
        let total = self
            .balances
            .checked_add(self.in_flight)
            .and_then(|total| total.checked_add(self.fees))
            .and_then(|total| i128::try_from(total).ok())
            .ok_or(HarnessError::LedgerOverflow("accounted value"))?;
        let minted =
            i128::try_from(self.minted).map_err(|_| HarnessError::LedgerOverflow("minted value"))?;
        total
            .checked_sub(minted)
            .ok_or(HarnessError::LedgerOverflow("accounted value"))
    }
}

/// One test run: contracts, queue, events and the virtual clock.
pub struct Session {
    pub(crate) config: SessionConfig,
    pub(crate) params: ConfigParams,
    pub(crate) bridge: Box<dyn ExecutionBridge>,
    pub(crate) registry: Registry,
    pub(crate) queue: MessageQueue,
    pub(crate) events: EventLog,
    pub(crate) history: Vec<Message>,
    next_id: MessageId,
    pub(crate) now: u32,
    last_header_time: Option<u64>,
    pub(crate) lt: u64,
    pub(crate) total_fees: u128,
    pub(crate) total_minted: u128,
    pub(crate) last_gas: u64,
}

impl Session {
    pub fn new<B: ExecutionBridge + 'static>(bridge: B) -> Self {
        Self::with_config(bridge, SessionConfig::default())
    }

    pub fn with_config<B: ExecutionBridge + 'static>(bridge: B, config: SessionConfig) -> Self {
        Self {
            config,
            params: ConfigParams::default(),
            bridge: Box::new(bridge),
            registry: Registry::default(),
            queue: MessageQueue::default(),
            events: EventLog::default(),
            history: Vec::new(),
            next_id: 1,
            now: 0,
            last_header_time: None,
            lt: 0,
            total_fees: 0,
            total_minted: 0,
            last_gas: 0,
        }
    }

    // === Configuration ===

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn set_verbosity(&mut self, verbosity: u8) {
        self.config.verbosity = verbosity;
    }

    pub fn set_crash_policy(&mut self, policy: CrashPolicy) {
        self.config.crash_policy = policy;
    }

    pub fn set_call_dispatch(&mut self, dispatch: CallDispatch) {
        self.config.call_dispatch = dispatch;
    }

    pub fn enable_fees(&mut self, enabled: bool) {
        self.config.gas_fee = enabled;
    }

    pub fn set_artifacts_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.config.artifacts_path = path.into();
    }

    /// Sets a global config param. An empty cell removes it.
    pub fn set_config_param(&mut self, index: u32, value: Cell) {
        self.params.set(index, value);
    }

    pub fn config_params(&self) -> &ConfigParams {
        &self.params
    }

    pub fn artifacts(&self) -> ArtifactLoader {
        ArtifactLoader::new(&self.config.artifacts_path)
    }

    // === Clock ===

    pub fn now(&self) -> u32 {
        self.now
    }

    pub fn set_now(&mut self, now: u32) {
        self.now = now;
    }

    pub fn time_shift(&mut self, seconds: u32) {
        self.set_now(self.now.saturating_add(seconds));
    }

    /// Logical time of the last execution.
    pub fn lt(&self) -> u64 {
        self.lt
    }

    /// Header time in milliseconds: `now * 1000` plus a counter.
    ///
    /// Strictly increasing. A counter that runs past the second keeps
    /// counting instead of reusing the next second's values.
    fn next_header_time(&mut self) -> u64 {
        let base = self.now as u64 * 1000;
        let time = match self.last_header_time {
            Some(last) => base.max(last + 1),
            None => base,
        };
        self.last_header_time = Some(time);
        time
    }

    pub(crate) fn next_message_id(&mut self) -> MessageId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // === Registry ===

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[cfg(test)]
    pub(crate) fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn contracts(&self) -> impl Iterator<Item = &ContractInstance> {
        self.registry.contracts()
    }

    pub fn contract<T: Into<Target>>(&self, target: T) -> HarnessResult<&ContractInstance> {
        self.registry.lookup(&target.into())
    }

    pub fn resolve<T: Into<Target>>(&self, target: T) -> HarnessResult<Address> {
        self.registry.resolve(&target.into())
    }

    pub fn load_image(&self, name: &str) -> HarnessResult<ContractImage> {
        self.artifacts().load_image(name)
    }

    pub fn load_abi(&self, name: &str) -> HarnessResult<Arc<Abi>> {
        self.artifacts().load_abi(name)
    }

    /// Deploys a contract, running its constructor when params are given.
    ///
    /// The address is derived from the image before the constructor runs.
    /// Nothing is registered if the constructor fails.
    pub fn deploy(&mut self, params: DeployParams) -> HarnessResult<Address> {
        let workchain = params.workchain.unwrap_or(self.config.workchain);
        let address = match params.address {
            Some(address) => address,
            None => params.image.address(workchain)?,
        };
        if !params.override_existing && self.registry.contains(&address) {
            return Err(HarnessError::DuplicateAddress(address));
        }

        let mut instance = ContractInstance::new(address, params.image, params.balance);
        instance.abi = params.abi;
        instance.signer = params.signer;
        instance.nickname = params.nickname;
        instance.name = params.name;

        if let Some(ctor) = &params.constructor {
            let abi = instance
                .abi
                .clone()
                .ok_or(HarnessError::MissingAbi(address))?;
            let header = ExternalHeader {
                time: self.next_header_time(),
                expire: self.now.saturating_add(self.config.expire_timeout),
                signer: instance.signer.clone(),
            };
            let body = encode_constructor(&abi, ctor, Some(&header))?;
            if let Some(data) = self.run_constructor(&instance, body, ctor)? {
                instance.data = data;
            }
        }

        ts_log_dispatch!(
            self.config.verbosity,
            address = %address,
            nickname = instance.nickname.as_deref().unwrap_or_default(),
            balance = %instance.balance.into_inner(),
            "deployed"
        );
        self.registry.insert(instance, params.override_existing)?;
        Ok(address)
    }

    /// Deploys `<name>.tvc` with `<name>.abi.json` from the artifacts path.
    pub fn deploy_artifact(
        &mut self,
        name: &str,
        constructor: Option<Params>,
        balance: Tokens,
    ) -> HarnessResult<Address> {
        let loader = self.artifacts();
        let mut params = DeployParams::new(loader.load_image(name)?)
            .with_abi(loader.load_abi(name)?)
            .with_balance(balance)
            .with_name(name);
        params.constructor = constructor;
        self.deploy(params)
    }

    fn run_constructor(
        &self,
        instance: &ContractInstance,
        body: Cell,
        ctor: &Params,
    ) -> HarnessResult<Option<Cell>> {
        let msg = self.make_external(instance.address, body, tycho_testsuite_abi::CONSTRUCTOR, ctor);
        let root = msg.build_cell()?;

        let mut state = TxState::new(
            &self.config,
            &self.params,
            self.bridge.as_ref(),
            self.now,
            self.lt + 1,
            instance.clone(),
        );
        let compute = state.compute_phase(ComputePhaseContext {
            input: TransactionInput::Ordinary {
                message: &msg,
                root: &root,
            },
            free: true,
        })?;

        match compute.status {
            ComputeStatus::Success => Ok(compute.output.new_data),
            ComputeStatus::Failed { exit_code, .. } => Err(HarnessError::ConstructorFailed {
                address: instance.address,
                exit_code,
            }),
            ComputeStatus::NotAccepted => Err(HarnessError::ConstructorFailed {
                address: instance.address,
                exit_code: compute.output.exit_code,
            }),
        }
    }

    pub fn get_balance<T: Into<Target>>(&self, target: T) -> HarnessResult<Tokens> {
        let address = self.registry.resolve(&target.into())?;
        self.registry.balance(&address)
    }

    pub fn set_balance<T: Into<Target>>(&mut self, target: T, balance: Tokens) -> HarnessResult<()> {
        self.registry.set_balance(&target.into(), balance)
    }

    pub fn register_nickname(&mut self, address: Address, name: &str) -> HarnessResult<()> {
        if !self.registry.contains(&address) {
            return Err(HarnessError::UnknownAddress(address));
        }
        self.registry.register_nickname(address, name)
    }

    /// Makes an ABI known for decoding message bodies.
    pub fn register_abi(&mut self, abi: Arc<Abi>) {
        self.registry.register_abi(abi);
    }

    pub fn set_abi<T: Into<Target>>(&mut self, target: T, abi: Arc<Abi>) -> HarnessResult<()> {
        self.registry.set_abi(&target.into(), abi)
    }

    pub fn set_code<T: Into<Target>>(&mut self, target: T, code: Cell) -> HarnessResult<()> {
        self.registry.set_code(&target.into(), code)
    }

    pub fn set_data<T: Into<Target>>(&mut self, target: T, data: Cell) -> HarnessResult<()> {
        self.registry.set_data(&target.into(), data)
    }

    pub fn set_signer<T: Into<Target>>(
        &mut self,
        target: T,
        signer: Option<Signer>,
    ) -> HarnessResult<()> {
        self.registry.set_signer(&target.into(), signer)
    }

    /// Current code and data of a contract.
    pub fn fetch_state<T: Into<Target>>(&self, target: T) -> HarnessResult<(Cell, Cell)> {
        let contract = self.registry.lookup(&target.into())?;
        Ok((contract.code.clone(), contract.data.clone()))
    }

    /// Nickname of a known contract or the full address.
    pub fn format_address(&self, address: &Address) -> String {
        match self.registry.nickname_of(address) {
            Some(name) => name.to_owned(),
            None => address.to_string(),
        }
    }

    // === Calls ===

    /// Sends a signed external call and executes it right away.
    pub fn call<T: Into<Target>>(
        &mut self,
        target: T,
        method: &str,
        params: Params,
    ) -> HarnessResult<CallResult> {
        self.call_with(target, method, params, CallOptions::default())
    }

    pub fn call_with<T: Into<Target>>(
        &mut self,
        target: T,
        method: &str,
        params: Params,
        options: CallOptions,
    ) -> HarnessResult<CallResult> {
        let target = target.into();
        let time = self.next_header_time();

        let contract = self.registry.lookup(&target)?.clone();
        let address = contract.address;
        let abi = contract
            .abi
            .clone()
            .ok_or(HarnessError::MissingAbi(address))?;

        let header = ExternalHeader {
            time,
            expire: self.now.saturating_add(self.config.expire_timeout),
            signer: options.signer.or_else(|| contract.signer.clone()),
        };
        let body = encode_call(&abi, method, &params, Some(&header))?;

        let mut msg = self.make_external(address, body, method, &params);
        msg.id = self.next_message_id();

        let output = self.execute_ordinary(&msg, contract)?;
        self.history.push(msg.clone());
        let result = self.commit(Some(msg.id), output, false)?;

        ts_log_dispatch!(
            self.config.verbosity,
            id = msg.id,
            address = %self.registry.label(&address),
            method,
            outcome = ?result.outcome,
            gas_used = result.gas_used,
            "call"
        );

        match result.outcome {
            Outcome::Rejected => return Err(HarnessError::NotAccepted { address }),
            Outcome::VmFailure {
                exit_code,
                exit_arg,
            } if exit_code != options.expected_exit_code => {
                return Err(HarnessError::CallFailed {
                    address,
                    method: method.to_owned(),
                    exit_code,
                    exit_arg,
                });
            }
            Outcome::ActionFailure { result_code } if result_code != options.expected_exit_code => {
                return Err(HarnessError::CallFailed {
                    address,
                    method: method.to_owned(),
                    exit_code: result_code,
                    exit_arg: None,
                });
            }
            Outcome::Success if options.expected_exit_code != 0 => {
                return Err(HarnessError::CallFailed {
                    address,
                    method: method.to_owned(),
                    exit_code: 0,
                    exit_arg: None,
                });
            }
            _ => {}
        }

        let answer = result
            .answer
            .as_ref()
            .filter(|answer| answer.name == method)
            .map(|answer| answer.params.clone());

        let batch = match options.dispatch.unwrap_or(self.config.call_dispatch) {
            CallDispatch::Manual => None,
            CallDispatch::One => Some(self.dispatch_limit(1)),
            CallDispatch::All => Some(self.dispatch_all()),
        };

        Ok(CallResult {
            message_id: msg.id,
            result,
            answer,
            batch,
        })
    }

    /// Runs a getter without committing anything and decodes its answer.
    pub fn call_getter<T: Into<Target>>(
        &mut self,
        target: T,
        method: &str,
        params: Params,
    ) -> HarnessResult<Params> {
        let time = self.next_header_time();

        let contract = self.registry.lookup(&target.into())?;
        let address = contract.address;
        let abi = contract
            .abi
            .clone()
            .ok_or(HarnessError::MissingAbi(address))?;

        let header = ExternalHeader {
            time,
            expire: self.now.saturating_add(self.config.expire_timeout),
            signer: contract.signer.clone(),
        };
        let body = encode_call(&abi, method, &params, Some(&header))?;
        let msg = self.make_external(address, body, method, &params);
        let root = msg.build_cell()?;

        let mut state = TxState::new(
            &self.config,
            &self.params,
            self.bridge.as_ref(),
            self.now,
            self.lt + 1,
            contract.clone(),
        );
        let compute = state.compute_phase(ComputePhaseContext {
            input: TransactionInput::Ordinary {
                message: &msg,
                root: &root,
            },
            free: true,
        })?;

        if let ComputeStatus::Failed {
            exit_code,
            exit_arg,
        } = compute.status
        {
            return Err(HarnessError::CallFailed {
                address,
                method: method.to_owned(),
                exit_code,
                exit_arg,
            });
        }

        compute
            .output
            .actions
            .iter()
            .find_map(|action| match action {
                OutAction::SendMsg { message, .. } if message.is_external() => {
                    decode_output(&abi, method, message.body.as_ref()).ok()
                }
                _ => None,
            })
            .ok_or_else(|| HarnessError::NoAnswer {
                address,
                method: method.to_owned(),
            })
    }

    fn make_external(&self, dst: Address, body: Cell, method: &str, params: &Params) -> Message {
        Message {
            id: self.next_id,
            kind: MessageKind::ExternalCall,
            src: Address::None,
            dst,
            value: Tokens::ZERO,
            bounce: false,
            bounced: false,
            body,
            init: None,
            created_lt: self.lt,
            created_at: self.now,
            decoded: Some(DecodedBody {
                name: method.to_owned(),
                params: params.clone(),
            }),
        }
    }

    /// Appends an internal message to the queue.
    ///
    /// The value is not taken from `src`, it comes from the driver.
    pub fn send_internal(&mut self, msg: InternalMessage) -> HarnessResult<MessageId> {
        let (kind, decoded) = if msg.body.is_empty_cell() {
            (MessageKind::Empty, None)
        } else {
            match self.decode_internal(&msg.dst, &msg.body) {
                Some(decoded) => (MessageKind::InternalCall, Some(decoded)),
                None => (MessageKind::Unknown, None),
            }
        };

        let id = self.next_message_id();
        let msg = Message {
            id,
            kind,
            src: msg.src,
            dst: msg.dst,
            value: msg.value,
            bounce: msg.bounce,
            bounced: false,
            body: msg.body,
            init: msg.init,
            created_lt: self.lt,
            created_at: self.now,
            decoded,
        };
        ts_log_action!(self.config.verbosity, message = %msg, "injected");

        self.history.push(msg.clone());
        self.queue.push(msg);
        Ok(id)
    }

    /// Encodes an internal call with the destination ABI and queues it.
    pub fn send_call<T: Into<Target>>(
        &mut self,
        src: Address,
        target: T,
        method: &str,
        params: Params,
        value: Tokens,
        bounce: bool,
    ) -> HarnessResult<MessageId> {
        let contract = self.registry.lookup(&target.into())?;
        let dst = contract.address;
        let abi = contract.abi.as_ref().ok_or(HarnessError::MissingAbi(dst))?;
        let body = encode_call(abi, method, &params, None)?;

        self.send_internal(InternalMessage {
            src,
            dst,
            body,
            value,
            bounce,
            init: None,
        })
    }

    // === Queue and events ===

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn peek_msg(&self, index: usize) -> HarnessResult<&Message> {
        self.queue.get(index).ok_or(HarnessError::OutOfRange {
            index,
            len: self.queue.len(),
        })
    }

    /// Removes the head message without executing it.
    pub fn pop_msg(&mut self) -> Option<Message> {
        self.queue.pop()
    }

    pub fn ensure_queue_empty(&self) -> HarnessResult<()> {
        match self.queue.len() {
            0 => Ok(()),
            len => Err(HarnessError::QueueNotEmpty(len)),
        }
    }

    /// Pending messages, decoded where possible. Does not modify the queue.
    pub fn dump_queue(&self) -> Vec<JsonValue> {
        self.queue.iter().map(Message::to_json).collect()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn peek_event(&self) -> Option<&Event> {
        self.events.front()
    }

    pub fn pop_event(&mut self) -> Option<Event> {
        self.events.pop()
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain()
    }

    /// Every message created in this session in creation order.
    pub fn all_messages(&self) -> &[Message] {
        &self.history
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.history
            .binary_search_by_key(&id, |msg| msg.id)
            .ok()
            .map(|index| &self.history[index])
    }

    // === Accounting ===

    pub fn last_gas(&self) -> u64 {
        self.last_gas
    }

    pub fn total_fees(&self) -> Tokens {
        Tokens::new(self.total_fees)
    }

    pub fn total_minted(&self) -> Tokens {
        Tokens::new(self.total_minted)
    }

    pub fn ledger(&self) -> HarnessResult<Ledger> {
        Ok(Ledger {
            balances: self
                .registry
                .total_balance()
                .ok_or(HarnessError::LedgerOverflow("contract balances"))?,
            in_flight: self
                .queue
                .in_flight_value()
                .ok_or(HarnessError::LedgerOverflow("in-flight value"))?,
            fees: self.total_fees,
            minted: self.total_minted,
        })
    }

    /// Clears contracts, queue, events and counters.
    ///
    /// Config and config params are kept.
    pub fn reset_all(&mut self) {
        self.registry.clear();
        self.queue.clear();
        self.events.clear();
        self.history.clear();
        self.next_id = 1;
        self.now = 0;
        self.last_header_time = None;
        self.lt = 0;
        self.total_fees = 0;
        self.total_minted = 0;
        self.last_gas = 0;
        ts_log_dispatch!(self.config.verbosity, "session reset");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("contracts", &self.registry.len())
            .field("queue", &self.queue.len())
            .field("events", &self.events.len())
            .field("now", &self.now)
            .field("lt", &self.lt)
            .finish()
    }
}
