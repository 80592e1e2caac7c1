use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vmhost::call_args::CallArgsParser;
use vmhost::types::Address;
use vmhost::{AsyncContextInfo, AsyncGeneratedCall, StateStack};

fn bench_state_stack(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_stack");
    for depth in [1usize, 8, 64] {
        group.bench_with_input(BenchmarkId::new("push_pop", depth), &depth, |b, &depth| {
            let mut stack = StateStack::new(vec![0u8; 256]);
            b.iter(|| {
                for _ in 0..depth {
                    stack.push();
                    stack.active_mut()[0] += 1;
                }
                for _ in 0..depth {
                    stack.pop_set_active();
                }
                black_box(stack.depth())
            })
        });
    }
    group.finish();
}

fn pending_batch(calls: usize) -> AsyncContextInfo {
    let mut info = AsyncContextInfo::new(Address::from_name("caller"));
    for index in 0..calls {
        info.add_call(
            format!("ctx{}", index % 4).as_bytes(),
            AsyncGeneratedCall {
                destination: Address::from_name(&format!("dest{index}")),
                data: b"transfer@01@02".to_vec(),
                success_callback: "onOk".to_string(),
                error_callback: "onErr".to_string(),
                provided_gas: 10_000,
                ..Default::default()
            },
        );
    }
    info
}

fn bench_async_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("async_record");
    for calls in [1usize, 16, 128] {
        let info = pending_batch(calls);
        let json = info.to_json().unwrap();
        group.bench_with_input(BenchmarkId::new("to_json", calls), &info, |b, info| {
            b.iter(|| black_box(info.to_json().unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("from_json", calls), &json, |b, json| {
            b.iter(|| black_box(AsyncContextInfo::from_json(json).unwrap()))
        });
    }
    group.finish();
}

fn bench_call_args(c: &mut Criterion) {
    let mut group = c.benchmark_group("call_args");
    let arguments: Vec<Vec<u8>> = (0..16u8).map(|i| vec![i; 32]).collect();
    let data = CallArgsParser::build_data("transferToken", &arguments);
    group.bench_function("build_data", |b| {
        b.iter(|| black_box(CallArgsParser::build_data("transferToken", &arguments)))
    });
    group.bench_function("parse_data", |b| {
        b.iter(|| black_box(CallArgsParser::parse_data(&data).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_state_stack, bench_async_record, bench_call_args);
criterion_main!(benches);
