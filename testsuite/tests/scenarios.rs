use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;
use everscale_types::cell::HashBytes;
use everscale_types::num::Tokens;
use everscale_types::prelude::*;
use tycho_testsuite::abi::{
    decode_input, encode_answer, encode_event, Abi, AbiValue, Address, Bytes, CellExt, Params,
    Signer,
};
use tycho_testsuite::bridge::OutMessage;
use tycho_testsuite::config::SessionConfig;
use tycho_testsuite::error::HarnessError;
use tycho_testsuite::{
    CallDispatch, CallOptions, ContractImage, CrashPolicy, DeployParams, ExecutionOutput, Halt,
    InternalMessage, MessageKind, OutAction, Outcome, ScriptedBridge, Session, TickTock, VmInput,
};

const COUNTER_ABI: &str = r#"{
    "ABI version": 2,
    "version": "2.2",
    "header": ["pubkey", "time", "expire"],
    "functions": [
        { "name": "constructor", "inputs": [], "outputs": [] },
        {
            "name": "add",
            "inputs": [{ "name": "value", "type": "uint32" }],
            "outputs": [{ "name": "total", "type": "uint64" }]
        },
        {
            "name": "getTotal",
            "inputs": [],
            "outputs": [{ "name": "total", "type": "uint64" }]
        },
        {
            "name": "echo",
            "inputs": [
                { "name": "small", "type": "uint8" },
                { "name": "wide", "type": "int256" },
                { "name": "owner", "type": "address" },
                { "name": "payload", "type": "bytes" },
                { "name": "flag", "type": "bool" },
                { "name": "label", "type": "string" },
                { "name": "amount", "type": "varuint16" }
            ],
            "outputs": [
                { "name": "small", "type": "uint8" },
                { "name": "wide", "type": "int256" },
                { "name": "owner", "type": "address" },
                { "name": "payload", "type": "bytes" },
                { "name": "flag", "type": "bool" },
                { "name": "label", "type": "string" },
                { "name": "amount", "type": "varuint16" }
            ]
        },
        {
            "name": "forward",
            "inputs": [
                { "name": "dst", "type": "address" },
                { "name": "value", "type": "uint128" },
                { "name": "bounce", "type": "bool" }
            ],
            "outputs": []
        },
        {
            "name": "crash",
            "inputs": [{ "name": "code", "type": "uint16" }],
            "outputs": []
        }
    ],
    "events": [
        { "name": "Added", "inputs": [{ "name": "value", "type": "uint32" }] }
    ]
}"#;

const GAS_PER_CALL: u64 = 5;

fn init_tracing() {
    tracing_subscriber::fmt::fmt()
        .with_env_filter("tycho_testsuite=trace")
        .with_writer(tracing_subscriber::fmt::TestWriter::new)
        .try_init()
        .ok();
}

fn make_abi() -> Arc<Abi> {
    Abi::from_json("Counter", COUNTER_ABI).unwrap().into_shared()
}

fn make_code(name: &str) -> Cell {
    let mut b = CellBuilder::new();
    b.store_raw(name.as_bytes(), (name.len() * 8) as u16).unwrap();
    b.build().unwrap()
}

fn load_total(data: &Cell) -> Result<u64> {
    if data.is_empty_cell() {
        return Ok(0);
    }
    Ok(data.as_slice()?.load_u64()?)
}

/// Counter contract written against the scripted bridge.
fn counter(abi: Arc<Abi>) -> impl Fn(&VmInput<'_>) -> Result<ExecutionOutput> {
    move |input: &VmInput<'_>| {
        let Some(body) = input.body else {
            // Tick-tock increments the counter
            let total = load_total(input.data)? + 1;
            return Ok(ExecutionOutput::success().with_data(CellBuilder::build_from(total)?));
        };
        if body.is_empty_cell() {
            return Ok(ExecutionOutput::success().with_gas(GAS_PER_CALL));
        }

        let call = match decode_input(&abi, body.as_ref(), input.is_external) {
            Ok(call) => call,
            Err(_) => return Ok(ExecutionOutput::failure(60).with_gas(GAS_PER_CALL)),
        };
        let answer = |outputs: &Params| -> Result<OutAction> {
            let body = encode_answer(&abi, &call.function, outputs)?;
            Ok(OutAction::send(OutMessage::external(body)))
        };
        let param = |name: &str| {
            call.params
                .get(name)
                .ok_or_else(|| anyhow::anyhow!("missing param {name}"))
        };

        let total = load_total(input.data)?;
        let output = ExecutionOutput::success().with_gas(GAS_PER_CALL);
        Ok(match call.function.as_str() {
            "constructor" => output.with_data(CellBuilder::build_from(0u64)?),
            "add" => {
                let value = param("value")?.as_u64().unwrap_or_default();
                let total = total + value;
                let event = encode_event(&abi, "Added", &Params::new().with("value", value))?;
                output
                    .with_data(CellBuilder::build_from(total)?)
                    .with_action(OutAction::send(OutMessage::external(event)))
                    .with_action(answer(&Params::new().with("total", total))?)
            }
            "getTotal" => output.with_action(answer(&Params::new().with("total", total))?),
            "echo" => output.with_action(answer(&call.params)?),
            "forward" => {
                let dst = param("dst")?.as_address().copied().unwrap_or_default();
                let value = param("value")?.as_u128().unwrap_or_default();
                let bounce = param("bounce")?.as_bool().unwrap_or_default();
                let message = OutMessage::internal(dst, Tokens::new(value), Cell::empty_cell())
                    .with_bounce(bounce);
                output.with_action(OutAction::send(message))
            }
            "crash" => {
                let code = param("code")?.as_u64().unwrap_or_default();
                ExecutionOutput::failure(code as i32).with_gas(GAS_PER_CALL)
            }
            _ => ExecutionOutput::failure(60),
        })
    }
}

/// Relay: every non-empty internal message is forwarded to `sink` as a
/// plain transfer of the same value.
fn relay(sink: Address) -> impl Fn(&VmInput<'_>) -> Result<ExecutionOutput> {
    move |input: &VmInput<'_>| {
        let output = ExecutionOutput::success();
        match input.body {
            Some(body) if !body.is_empty_cell() => Ok(output.with_action(OutAction::send(
                OutMessage::internal(sink, input.msg_value, Cell::empty_cell()),
            ))),
            _ => Ok(output),
        }
    }
}

struct Env {
    session: Session,
    abi: Arc<Abi>,
    counter: ContractImage,
}

fn make_env() -> Env {
    init_tracing();
    let abi = make_abi();
    let counter_code = make_code("counter");
    let bridge = ScriptedBridge::new().with_contract(counter_code.as_ref(), counter(abi.clone()));

    let mut session = Session::new(bridge);
    session.set_verbosity(3);
    session.set_now(1_700_000_000);

    Env {
        session,
        abi,
        counter: ContractImage::new(counter_code, Cell::empty_cell()),
    }
}

fn deploy_counter(env: &mut Env, nickname: &str, balance: u128) -> Result<Address> {
    let address = env.session.deploy(
        DeployParams::new(env.counter.clone().with_data(CellBuilder::build_from(nickname.len() as u32)?))
            .with_abi(env.abi.clone())
            .with_constructor(Params::new())
            .with_balance(Tokens::new(balance))
            .with_nickname(nickname),
    )?;
    Ok(address)
}

fn body_with_id(id: u32) -> Cell {
    let mut b = CellBuilder::new();
    b.store_u32(id).unwrap();
    b.build().unwrap()
}

#[test]
fn deterministic_addresses() -> Result<()> {
    let mut env = make_env();
    let first = env
        .session
        .deploy(DeployParams::new(env.counter.clone()).with_abi(env.abi.clone()))?;
    assert_eq!(first, env.counter.address(0)?);

    // Same image in a fresh session lands on the same address
    let mut other = make_env();
    let second = other
        .session
        .deploy(DeployParams::new(other.counter.clone()))?;
    assert_eq!(first, second);

    let err = env
        .session
        .deploy(DeployParams::new(env.counter.clone()))
        .unwrap_err();
    assert!(matches!(err, HarnessError::DuplicateAddress(address) if address == first));
    Ok(())
}

#[test]
fn override_keeps_nickname() -> Result<()> {
    let mut env = make_env();
    let address = env.session.deploy(
        DeployParams::new(env.counter.clone())
            .with_balance(Tokens::new(100))
            .with_nickname("counter"),
    )?;

    env.session.deploy(
        DeployParams::new(env.counter.clone().with_data(CellBuilder::build_from(9u64)?))
            .with_address(address)
            .with_balance(Tokens::new(7))
            .override_existing(),
    )?;

    assert_eq!(env.session.resolve("counter")?, address);
    assert_eq!(env.session.get_balance("counter")?, Tokens::new(7));
    let (_, data) = env.session.fetch_state("counter")?;
    assert_eq!(data, CellBuilder::build_from(9u64)?);
    assert_eq!(env.session.format_address(&address), "counter");
    Ok(())
}

#[test]
fn duplicate_nickname() -> Result<()> {
    let mut env = make_env();
    let a = deploy_counter(&mut env, "a", 0)?;
    let b = deploy_counter(&mut env, "bb", 0)?;
    assert_ne!(a, b);

    let err = env.session.register_nickname(b, "a").unwrap_err();
    assert!(matches!(err, HarnessError::DuplicateNickname { address, .. } if address == a));
    assert!(matches!(
        env.session.register_nickname(Address::zero(0), "zero"),
        Err(HarnessError::UnknownAddress(_))
    ));
    Ok(())
}

#[test]
fn call_answer_round_trip() -> Result<()> {
    let mut env = make_env();
    let address = deploy_counter(&mut env, "counter", 1_000_000_000)?;

    let params = Params::new()
        .with("small", 255u8)
        .with("wide", -(1i128 << 100))
        .with("owner", address)
        .with("payload", Bytes::from(vec![0xaa; 300]))
        .with("flag", true)
        .with("label", "hello")
        .with("amount", 1_000_000_000u64);

    let res = env.session.call(address, "echo", params.clone())?;
    assert_eq!(res.answer, Some(params));
    assert!(res.result.is_success());
    assert!(res.batch.is_none());

    let res = env.session.call("counter", "add", Params::new().with("value", 5u32))?;
    assert_eq!(
        res.answer.as_ref().and_then(|a| a.get("total")).and_then(AbiValue::as_u64),
        Some(5)
    );
    assert_eq!(env.session.last_gas(), GAS_PER_CALL);
    Ok(())
}

#[test]
fn events_are_decoded() -> Result<()> {
    let mut env = make_env();
    let address = deploy_counter(&mut env, "counter", 1_000_000_000)?;

    env.session.call(address, "add", Params::new().with("value", 3u32))?;
    env.session.call(address, "add", Params::new().with("value", 4u32))?;

    let event = env.session.peek_event().cloned().unwrap();
    assert_eq!(event.name, "Added");
    assert_eq!(event.src, address);

    let events = env.session.drain_events();
    let values = events
        .iter()
        .map(|e| e.fields.get("value").and_then(AbiValue::as_u64))
        .collect::<Vec<_>>();
    assert_eq!(values, [Some(3), Some(4)]);
    assert!(env.session.pop_event().is_none());

    // Events are external outbound, the queue stays empty
    env.session.ensure_queue_empty()?;
    let kinds = env
        .session
        .all_messages()
        .iter()
        .map(|m| m.kind)
        .collect::<Vec<_>>();
    assert_eq!(kinds, [
        MessageKind::ExternalCall,
        MessageKind::Event,
        MessageKind::Answer,
        MessageKind::ExternalCall,
        MessageKind::Event,
        MessageKind::Answer,
    ]);
    Ok(())
}

#[test]
fn getter_does_not_commit() -> Result<()> {
    let mut env = make_env();
    let address = deploy_counter(&mut env, "counter", 1_000_000_000)?;
    env.session.call(address, "add", Params::new().with("value", 10u32))?;

    let balance = env.session.get_balance(address)?;
    let lt = env.session.lt();
    let history = env.session.all_messages().len();

    let total = env.session.call_getter(address, "getTotal", Params::new())?;
    assert_eq!(total.get("total").and_then(AbiValue::as_u64), Some(10));
    assert_eq!(env.session.get_balance(address)?, balance);
    assert_eq!(env.session.lt(), lt);
    assert_eq!(env.session.all_messages().len(), history);

    assert!(matches!(
        env.session.call_getter(address, "forward", Params::new()
            .with("dst", address)
            .with("value", 1u32)
            .with("bounce", false)),
        Err(HarnessError::NoAnswer { .. })
    ));
    Ok(())
}

#[test]
fn failed_call_reports_exit_code() -> Result<()> {
    let mut env = make_env();
    let address = deploy_counter(&mut env, "counter", 1_000_000_000)?;

    let err = env
        .session
        .call(address, "crash", Params::new().with("code", 101u16))
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::CallFailed { exit_code: 101, ref method, .. } if method == "crash"
    ));

    let res = env.session.call_with(
        address,
        "crash",
        Params::new().with("code", 101u16),
        CallOptions {
            expected_exit_code: 101,
            ..Default::default()
        },
    )?;
    assert_eq!(res.result.failure_code(), Some(101));
    Ok(())
}

#[test]
fn signed_call_carries_pubkey() -> Result<()> {
    init_tracing();
    let abi = make_abi();
    let code = make_code("checker");
    let signer = Signer::from_seed("alice");
    let seen = Rc::new(RefCell::new(None::<HashBytes>));

    let bridge = ScriptedBridge::new().with_contract(code.as_ref(), {
        let abi = abi.clone();
        let seen = seen.clone();
        move |input| {
            let body = input.body.ok_or_else(|| anyhow::anyhow!("no body"))?;
            let call = decode_input(&abi, body.as_ref(), input.is_external)?;
            *seen.borrow_mut() = call.header.and_then(|h| h.pubkey);
            Ok(ExecutionOutput::success())
        }
    });

    let mut session = Session::new(bridge);
    let address = session.deploy(
        DeployParams::new(ContractImage::new(code, Cell::empty_cell()))
            .with_abi(abi)
            .with_signer(signer.clone()),
    )?;
    session.call(address, "getTotal", Params::new())?;
    assert_eq!(*seen.borrow(), Some(signer.public_key()));
    Ok(())
}

#[test]
fn fifo_breadth_first_order() -> Result<()> {
    init_tracing();
    let sink_code = make_code("sink");
    let relay_code = make_code("relay");
    let sink = ContractImage::new(sink_code.clone(), Cell::empty_cell());
    let sink_address = sink.address(0)?;

    let bridge = ScriptedBridge::new()
        .with_contract(sink_code.as_ref(), |_| Ok(ExecutionOutput::success()))
        .with_contract(relay_code.as_ref(), relay(sink_address));

    let mut session = Session::new(bridge);
    session.deploy(DeployParams::new(sink))?;
    let relays = ["r1", "r2", "r3"]
        .into_iter()
        .map(|name| {
            session.deploy(DeployParams::new(ContractImage::new(
                relay_code.clone(),
                CellBuilder::build_from(name.len() as u32 + name.as_bytes()[1] as u32)?,
            )))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut injected = Vec::new();
    for relay in &relays {
        injected.push(session.send_internal(InternalMessage {
            src: sink_address,
            dst: *relay,
            body: body_with_id(1),
            value: Tokens::new(10),
            bounce: false,
            init: None,
        })?);
    }

    let batch = session.dispatch_all();
    assert!(batch.is_drained());

    let order = batch
        .results
        .iter()
        .map(|r| r.message_id.unwrap())
        .collect::<Vec<_>>();
    let produced = batch
        .results
        .iter()
        .flat_map(|r| r.out_messages.iter().copied())
        .collect::<Vec<_>>();

    // Injected messages first, then their children in the same order
    assert_eq!(order[..3], injected[..]);
    assert_eq!(order[3..], produced[..]);
    assert!(order.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(session.get_balance(sink_address)?, Tokens::new(30));
    Ok(())
}

#[test]
fn crash_policy_halts_loop() -> Result<()> {
    let mut env = make_env();
    let address = deploy_counter(&mut env, "counter", 1_000_000_000)?;
    env.session.set_crash_policy(CrashPolicy::exit_codes([100]));

    let src = Address::zero(0);
    let value = Tokens::new(1_000_000);
    env.session.send_call(src, address, "crash", Params::new().with("code", 100u16), value, false)?;
    env.session.send_call(src, address, "add", Params::new().with("value", 1u32), value, false)?;
    env.session.send_call(src, address, "add", Params::new().with("value", 2u32), value, false)?;

    let batch = env.session.dispatch_all();
    assert!(matches!(batch.halt, Halt::Crashed));
    assert_eq!(batch.results.len(), 1);
    assert_eq!(batch.crashed().and_then(|r| r.failure_code()), Some(100));
    assert_eq!(env.session.queue_len(), 2);
    assert_eq!(batch.pending.len(), 2);

    // Other exit codes are recorded and the loop goes on
    env.session.set_crash_policy(CrashPolicy::exit_codes([7]));
    env.session.send_call(src, address, "crash", Params::new().with("code", 100u16), value, false)?;
    let batch = env.session.dispatch_all();
    assert!(batch.is_drained());
    assert_eq!(batch.results.len(), 3);
    assert_eq!(batch.results[2].failure_code(), Some(100));
    Ok(())
}

#[test]
fn bounce_to_missing_destination() -> Result<()> {
    let mut env = make_env();
    let mut config = env.session.config().clone();
    config.bounce_fee = 1_000;
    let bridge = ScriptedBridge::new().with_contract(env.counter.code.as_ref(), counter(env.abi.clone()));
    env.session = Session::with_config(bridge, config);

    let sender = deploy_counter(&mut env, "sender", 10_000_000)?;
    let missing = Address::std(0, HashBytes([0x55; 32]));

    env.session.call(
        sender,
        "forward",
        Params::new()
            .with("dst", missing)
            .with("value", 50_000u32)
            .with("bounce", true),
    )?;
    let forwarded = env.session.peek_msg(0)?.id;

    let first = env.session.dispatch_one()?.unwrap();
    assert_eq!(first.message_id, Some(forwarded));
    assert_eq!(first.outcome, Outcome::Bounced);

    // The bounced message is at the tail and goes back to the sender
    let bounced = env.session.peek_msg(env.session.queue_len() - 1)?;
    assert_eq!(Some(bounced.id), first.bounce);
    assert!(bounced.bounced);
    assert_eq!(bounced.src, missing);
    assert_eq!(bounced.dst, sender);
    assert_eq!(bounced.value, Tokens::new(50_000 - 1_000));
    assert_eq!(bounced.name(), None);
    Ok(())
}

#[test]
fn bounce_from_failing_contract() -> Result<()> {
    let mut env = make_env();
    env.session.set_crash_policy(CrashPolicy::Never);
    let target = deploy_counter(&mut env, "target", 1_000_000)?;
    let src = Address::zero(0);

    let value = 2_000_000u128;
    env.session.send_call(
        src,
        target,
        "crash",
        Params::new().with("code", 100u16),
        Tokens::new(value),
        true,
    )?;
    let before = env.session.get_balance(target)?;

    let batch = env.session.dispatch_limit(1);
    assert!(matches!(batch.halt, Halt::Limit));
    let result = &batch.results[0];
    assert_eq!(result.failure_code(), Some(100));

    let gas_fee = GAS_PER_CALL as u128 * env.session.config().gas_price as u128;
    let bounced = env.session.peek_msg(0)?;
    assert_eq!(Some(bounced.id), result.bounce);
    assert_eq!(bounced.kind, MessageKind::Bounced);
    assert_eq!(bounced.name(), Some("crash"));
    assert_eq!(bounced.value, Tokens::new(value - gas_fee));
    assert_eq!(env.session.get_balance(target)?, before);
    Ok(())
}

#[test]
fn undeliverable_message_stays_queued() -> Result<()> {
    let mut env = make_env();
    let missing = Address::std(0, HashBytes([0x11; 32]));
    let id = env.session.send_internal(InternalMessage {
        src: Address::zero(0),
        dst: missing,
        body: body_with_id(42),
        value: Tokens::new(5),
        bounce: false,
        init: None,
    })?;

    let err = env.session.dispatch_one().unwrap_err();
    assert!(matches!(
        err,
        HarnessError::UnknownDestination { id: failed, address } if failed == id && address == missing
    ));
    assert_eq!(env.session.peek_msg(0)?.id, id);

    // Parking consumes it
    let mut config = env.session.config().clone();
    config.undeliverable = tycho_testsuite::UndeliverablePolicy::Park;
    let bridge = ScriptedBridge::new();
    let mut session = Session::with_config(bridge, config);
    session.send_internal(InternalMessage {
        src: Address::zero(0),
        dst: missing,
        body: body_with_id(42),
        value: Tokens::new(5),
        bounce: false,
        init: None,
    })?;
    let result = session.dispatch_one()?.unwrap();
    assert_eq!(result.outcome, Outcome::Parked);
    assert_eq!(session.get_balance(missing)?, Tokens::new(5));
    Ok(())
}

#[test]
fn bridge_failure_is_atomic() -> Result<()> {
    init_tracing();
    let code = make_code("flaky");
    let bridge = ScriptedBridge::new().with_contract(code.as_ref(), |input| {
        anyhow::ensure!(input.msg_value < Tokens::new(100), "native vm failure");
        Ok(ExecutionOutput::success()
            .with_data(CellBuilder::build_from(1u8)?)
            .with_action(OutAction::send(OutMessage::internal(
                *input.address,
                Tokens::ZERO,
                Cell::empty_cell(),
            ))))
    });

    let mut session = Session::new(bridge);
    let address = session.deploy(
        DeployParams::new(ContractImage::new(code, Cell::empty_cell()))
            .with_balance(Tokens::new(1_000)),
    )?;
    let ledger = session.ledger()?;

    session.send_internal(InternalMessage {
        src: Address::zero(0),
        dst: address,
        body: Cell::empty_cell(),
        value: Tokens::new(500),
        bounce: true,
        init: None,
    })?;

    let batch = session.dispatch_all();
    assert!(matches!(batch.halt, Halt::Error(HarnessError::Bridge { .. })));
    assert!(batch.results.is_empty());
    assert_eq!(session.queue_len(), 1);
    assert_eq!(session.get_balance(address)?, Tokens::new(1_000));
    assert_eq!(session.fetch_state(address)?.1, Cell::empty_cell());
    assert_eq!(session.ledger()?.fees, ledger.fees);
    Ok(())
}

#[test]
fn value_is_conserved() -> Result<()> {
    let mut env = make_env();
    let mut config = env.session.config().clone();
    config.bounce_fee = 777;
    config.crash_policy = CrashPolicy::Never;
    let bridge = ScriptedBridge::new().with_contract(env.counter.code.as_ref(), counter(env.abi.clone()));
    env.session = Session::with_config(bridge, config);

    let a = deploy_counter(&mut env, "a", 50_000_000)?;
    let b = deploy_counter(&mut env, "bb", 50_000_000)?;
    let missing = Address::std(0, HashBytes([0x77; 32]));

    let forward = |dst: Address, value: u32, bounce: bool| {
        Params::new()
            .with("dst", dst)
            .with("value", value)
            .with("bounce", bounce)
    };
    env.session.call(a, "forward", forward(b, 1_000_000, true))?;
    env.session.call(b, "forward", forward(missing, 200_000, true))?;
    env.session.call(a, "forward", forward(b, 30_000, false))?;
    env.session.send_call(a, b, "crash", Params::new().with("code", 55u16), Tokens::new(400_000), true)?;

    let ledger = env.session.ledger()?;
    loop {
        let Some(_) = env.session.dispatch_one()? else {
            break;
        };
        let after = env.session.ledger()?;
        assert_eq!(after.accounted()?, ledger.accounted()?);
    }

    assert!(env.session.ledger()?.fees > ledger.fees);
    Ok(())
}

#[test]
fn ticktock_bypasses_queue() -> Result<()> {
    let mut env = make_env();
    let address = deploy_counter(&mut env, "counter", 1_000_000_000)?;
    env.session.send_internal(InternalMessage {
        src: Address::zero(0),
        dst: address,
        body: Cell::empty_cell(),
        value: Tokens::new(1),
        bounce: true,
        init: None,
    })?;
    let pending = env.session.peek_msg(0)?.id;

    let result = env.session.ticktock("counter", TickTock::Tick)?;
    assert!(result.is_success());
    assert_eq!(result.message_id, None);
    assert_eq!(env.session.queue_len(), 1);
    assert_eq!(env.session.peek_msg(0)?.id, pending);

    let total = env.session.call_getter(address, "getTotal", Params::new())?;
    assert_eq!(total.get("total").and_then(AbiValue::as_u64), Some(1));

    // A failing tick-tock never bounces
    let failing = make_code("failing");
    let bridge = ScriptedBridge::new().with_contract(failing.as_ref(), |_| Ok(ExecutionOutput::failure(9)));
    let mut session = Session::new(bridge);
    let address = session.deploy(DeployParams::new(ContractImage::new(failing, Cell::empty_cell())))?;
    let result = session.ticktock(address, TickTock::Tock)?;
    assert_eq!(result.failure_code(), Some(9));
    assert!(result.bounce.is_none());
    session.ensure_queue_empty()?;
    Ok(())
}

#[test]
fn call_dispatch_modes() -> Result<()> {
    let mut env = make_env();
    let a = deploy_counter(&mut env, "a", 10_000_000)?;
    let b = deploy_counter(&mut env, "bb", 0)?;
    env.session.set_call_dispatch(CallDispatch::All);

    let res = env.session.call(
        a,
        "forward",
        Params::new()
            .with("dst", b)
            .with("value", 1_000_000u32)
            .with("bounce", false),
    )?;
    let batch = res.batch.unwrap();
    assert!(batch.is_drained());
    assert_eq!(batch.results.len(), 1);
    assert_eq!(
        env.session.get_balance(b)?,
        Tokens::new(1_000_000 - GAS_PER_CALL as u128 * env.session.config().gas_price as u128)
    );
    Ok(())
}

#[test]
fn reset_clears_everything() -> Result<()> {
    let mut env = make_env();
    let address = deploy_counter(&mut env, "counter", 1_000_000_000)?;
    env.session.call(address, "add", Params::new().with("value", 1u32))?;
    env.session.send_call(
        Address::zero(0),
        address,
        "add",
        Params::new().with("value", 1u32),
        Tokens::new(1),
        false,
    )?;
    env.session.set_verbosity(1);

    env.session.reset_all();
    assert!(env.session.registry().is_empty());
    assert_eq!(env.session.queue_len(), 0);
    assert!(env.session.peek_event().is_none());
    assert!(env.session.all_messages().is_empty());
    assert_eq!(env.session.total_fees(), Tokens::ZERO);
    assert!(matches!(
        env.session.get_balance("counter"),
        Err(HarnessError::UnknownNickname(_))
    ));
    assert!(matches!(
        env.session.get_balance(address),
        Err(HarnessError::UnknownAddress(_))
    ));
    // Settings survive
    assert_eq!(env.session.config().verbosity, 1);

    // The same contract can be deployed again
    assert_eq!(deploy_counter(&mut env, "counter", 0)?, address);
    Ok(())
}

#[test]
fn dump_queue_is_readable() -> Result<()> {
    let mut env = make_env();
    let address = deploy_counter(&mut env, "counter", 0)?;
    env.session.send_call(
        Address::zero(0),
        address,
        "add",
        Params::new().with("value", 7u32),
        Tokens::new(1_000_000),
        true,
    )?;

    let dump = env.session.dump_queue();
    assert_eq!(dump.len(), 1);
    assert_eq!(dump[0]["kind"], "internal_call");
    assert_eq!(dump[0]["name"], "add");
    assert_eq!(dump[0]["params"]["value"], "7");
    assert_eq!(env.session.queue_len(), 1);
    Ok(())
}

#[test]
fn deploy_over_existing_contract_is_not_executed() -> Result<()> {
    let mut env = make_env();
    let address = deploy_counter(&mut env, "counter", 1_000_000)?;
    let image = env
        .counter
        .clone()
        .with_data(CellBuilder::build_from("counter".len() as u32)?);
    let state = env.session.fetch_state(address)?;
    let ledger = env.session.ledger()?;
    let lt = env.session.lt();

    // Non-bounceable: the value stays at the address, the code never runs
    env.session.send_internal(InternalMessage {
        src: Address::zero(0),
        dst: address,
        body: Cell::empty_cell(),
        value: Tokens::new(500),
        bounce: false,
        init: Some(image.clone()),
    })?;
    let result = env.session.dispatch_one()?.unwrap();
    assert_eq!(result.outcome, Outcome::Parked);
    assert_eq!(env.session.registry().parked(&address), Some(Tokens::new(500)));
    assert_eq!(env.session.get_balance(address)?, Tokens::new(1_000_000));
    assert_eq!(env.session.fetch_state(address)?, state);
    assert_eq!(env.session.lt(), lt);
    assert_eq!(env.session.ledger()?.accounted()?, ledger.accounted()?);

    // Bounceable: returned to the sender
    let src = Address::std(0, HashBytes([0x42; 32]));
    env.session.send_internal(InternalMessage {
        src,
        dst: address,
        body: Cell::empty_cell(),
        value: Tokens::new(700),
        bounce: true,
        init: Some(image),
    })?;
    let result = env.session.dispatch_one()?.unwrap();
    assert_eq!(result.outcome, Outcome::Bounced);
    let bounced = env.session.peek_msg(0)?;
    assert_eq!(Some(bounced.id), result.bounce);
    assert_eq!(bounced.dst, src);
    assert_eq!(bounced.value, Tokens::new(700));
    assert_eq!(env.session.fetch_state(address)?, state);
    Ok(())
}

#[test]
fn action_failure_rolls_back_and_bounces() -> Result<()> {
    init_tracing();
    let sink_code = make_code("sink");
    let spender_code = make_code("spender");
    let sink = ContractImage::new(sink_code.clone(), Cell::empty_cell());
    let sink_address = sink.address(0)?;

    let bridge = ScriptedBridge::new()
        .with_contract(sink_code.as_ref(), |_| Ok(ExecutionOutput::success()))
        .with_contract(spender_code.as_ref(), move |_| {
            Ok(ExecutionOutput::success()
                .with_gas(GAS_PER_CALL)
                .with_data(CellBuilder::build_from(1u8)?)
                .with_action(OutAction::send(OutMessage::internal(
                    sink_address,
                    Tokens::new(1_000_000_000_000),
                    Cell::empty_cell(),
                ))))
        });

    let config = SessionConfig {
        bounce_fee: 1_000,
        ..Default::default()
    };
    let mut session = Session::with_config(bridge, config);
    session.deploy(DeployParams::new(sink))?;
    let spender = session.deploy(
        DeployParams::new(ContractImage::new(spender_code, Cell::empty_cell()))
            .with_balance(Tokens::new(100)),
    )?;

    let value = 1_000_000u128;
    session.send_internal(InternalMessage {
        src: sink_address,
        dst: spender,
        body: Cell::empty_cell(),
        value: Tokens::new(value),
        bounce: true,
        init: None,
    })?;
    let ledger = session.ledger()?;

    let result = session.dispatch_one()?.unwrap();
    assert_eq!(result.outcome, Outcome::ActionFailure { result_code: 37 });
    assert!(result.out_messages.is_empty());

    // Data and balance rolled back, only gas and the bounce fee were paid
    let gas_fee = GAS_PER_CALL as u128 * session.config().gas_price as u128;
    assert_eq!(session.fetch_state(spender)?.1, Cell::empty_cell());
    assert_eq!(session.get_balance(spender)?, Tokens::new(100));
    assert_eq!(result.fees, Tokens::new(gas_fee + 1_000));
    assert_eq!(session.ledger()?.accounted()?, ledger.accounted()?);

    let bounced = session.peek_msg(0)?;
    assert_eq!(Some(bounced.id), result.bounce);
    assert_eq!(bounced.dst, sink_address);
    assert_eq!(bounced.value, Tokens::new(value - gas_fee - 1_000));

    session.dispatch_one()?.unwrap();
    assert_eq!(
        session.get_balance(sink_address)?,
        Tokens::new(value - gas_fee - 1_000)
    );
    assert_eq!(session.ledger()?.accounted()?, ledger.accounted()?);
    session.ensure_queue_empty()?;
    Ok(())
}
