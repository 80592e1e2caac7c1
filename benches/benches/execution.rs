use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use num_bigint::BigInt;
use std::cell::RefCell;
use std::rc::Rc;
use vmhost::gas_schedule::GasSchedule;
use vmhost::instance::InstanceBuilder;
use vmhost::mock::{MockContract, MockInstanceBuilder, MockWorld};
use vmhost::types::{Address, ContractCallInput, ContractCreateInput, UserAccount, VMInput};
use vmhost::{vmhooks, HostConfig, VmHost, WasmtimeInstanceBuilder};

const GAS: u64 = 1_000_000_000;
const RELAY_CODE: &[u8] = b"relay-code";
const FANOUT_CODE: &[u8] = b"fanout-code";
const PONG_CODE: &[u8] = b"pong-code";

const COUNTER: &str = r#"
(module
  (import "env" "storageStore" (func $storageStore (param i32 i32 i32 i32) (result i32)))
  (import "env" "int64finish" (func $int64finish (param i64)))
  (memory (export "memory") 1)
  (data (i32.const 0) "count")
  (func (export "init"))
  (func (export "bump")
    (drop (call $storageStore (i32.const 0) (i32.const 5) (i32.const 0) (i32.const 5)))
    (call $int64finish (i64.const 1))))
"#;

fn owner() -> Address {
    Address::from_name("owner")
}

fn relay_address(depth: u8) -> Address {
    Address::from_name(&format!("relay{depth}"))
}

fn world() -> Rc<RefCell<MockWorld>> {
    let mut world = MockWorld::new();
    world.add_account(UserAccount {
        address: owner(),
        nonce: 1,
        balance: BigInt::from(1_000_000_000u64),
        ..Default::default()
    });
    Rc::new(RefCell::new(world))
}

fn host(world: &Rc<RefCell<MockWorld>>, builder: impl InstanceBuilder + 'static, warm: bool) -> VmHost {
    let config = HostConfig {
        warm_instance: warm,
        ..HostConfig::default()
    };
    VmHost::new(config, GasSchedule::uniform(1), Box::new(world.clone()), Box::new(builder))
        .expect("valid host configuration")
}

fn relay_contract() -> MockContract {
    MockContract::new().with_method("relay", |host| {
        let depth = host
            .runtime()
            .arguments()
            .first()
            .and_then(|argument| argument.first())
            .copied()
            .unwrap_or(0);
        vmhooks::storage_store(host, b"depth", &[depth])?;
        if depth > 0 {
            let gas = vmhooks::get_gas_left(host)? / 2;
            vmhooks::execute_on_dest_context(
                host,
                gas,
                &relay_address(depth - 1),
                &BigInt::from(0),
                "relay",
                vec![vec![depth - 1]],
            )?;
        }
        Ok(())
    })
}

fn bench_nested_calls(c: &mut Criterion) {
    let mut group = c.benchmark_group("nested_calls");
    for depth in [0u8, 2, 8] {
        let world = world();
        for level in 0..=depth {
            world
                .borrow_mut()
                .add_contract(relay_address(level), RELAY_CODE.to_vec(), vec![1, 0], Some(owner()));
        }
        let builder = MockInstanceBuilder::new().with_contract(RELAY_CODE, relay_contract());
        let mut host = host(&world, builder, false);
        let input = ContractCallInput::new(
            VMInput::new(owner(), GAS).with_arguments(vec![vec![depth]]),
            relay_address(depth),
            "relay",
        );

        group.throughput(Throughput::Elements(u64::from(depth) + 1));
        group.bench_with_input(BenchmarkId::new("dest_context", depth), &input, |b, input| {
            b.iter(|| black_box(host.run_smart_contract_call(input)))
        });
    }
    group.finish();
}

fn fanout_builder() -> MockInstanceBuilder {
    let fanout = MockContract::new()
        .with_method("fanout", |host| {
            let calls = host
                .runtime()
                .arguments()
                .first()
                .and_then(|argument| argument.first())
                .copied()
                .unwrap_or(1);
            for _ in 0..calls {
                vmhooks::create_async_call(
                    host,
                    b"batch",
                    &Address::from_name("pong"),
                    &BigInt::from(0),
                    b"ping".to_vec(),
                    "onPong",
                    "onPong",
                    0,
                )?;
            }
            Ok(())
        })
        .with_method("onPong", |host| {
            vmhooks::storage_store(host, b"pongs", b"1")?;
            Ok(())
        });
    let pong = MockContract::new().with_method("ping", |host| vmhooks::finish(host, b"pong".to_vec()));
    MockInstanceBuilder::new()
        .with_contract(FANOUT_CODE, fanout)
        .with_contract(PONG_CODE, pong)
}

fn bench_async_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("async_round_trip");
    for calls in [1u8, 4, 16] {
        let world = world();
        {
            let mut world = world.borrow_mut();
            world.add_contract(Address::from_name("fanout"), FANOUT_CODE.to_vec(), vec![1, 0], Some(owner()));
            world.add_contract(Address::from_name("pong"), PONG_CODE.to_vec(), vec![1, 0], Some(owner()));
        }
        let mut host = host(&world, fanout_builder(), false);
        let input = ContractCallInput::new(
            VMInput::new(owner(), GAS)
                .with_arguments(vec![vec![calls]])
                .with_tx_hashes(b"bench-tx", b"bench-tx"),
            Address::from_name("fanout"),
            "fanout",
        );

        group.throughput(Throughput::Elements(u64::from(calls)));
        group.bench_with_input(BenchmarkId::new("local_batch", calls), &input, |b, input| {
            b.iter(|| black_box(host.run_smart_contract_call(input)))
        });
    }
    group.finish();
}

fn bench_wasm_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("wasm_call");
    let code = wat::parse_str(COUNTER).expect("valid text format");

    for warm in [false, true] {
        let world = world();
        let builder = WasmtimeInstanceBuilder::new().expect("engine builds");
        let mut host = host(&world, builder, warm);

        let deploy = ContractCreateInput::new(VMInput::new(owner(), GAS), code.clone(), vec![1, 0]);
        let output = host.run_smart_contract_create(&deploy);
        let contract = output
            .output_accounts
            .values()
            .find(|account| account.code == code)
            .map(|account| account.address)
            .expect("contract deployed");
        world.borrow_mut().commit(&output);

        let input = ContractCallInput::new(VMInput::new(owner(), GAS), contract, "bump");
        let name = if warm { "warm" } else { "cold" };
        group.bench_function(name, |b| b.iter(|| black_box(host.run_smart_contract_call(&input))));
    }
    group.finish();
}

criterion_group!(benches, bench_nested_calls, bench_async_round_trip, bench_wasm_call);
criterion_main!(benches);
