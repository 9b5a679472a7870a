use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

use whisker::payload::{ChannelPayload, encode_ping, encode_pong};

/// parsing benchmark
fn bench_parsing(c: &mut Criterion) {
    let position = "POS|12.5|0.75|-3.25";
    let ping = "PING|1700000000123";

    let mut group = c.benchmark_group("Parsing");
    group.throughput(Throughput::Elements(1));

    group.bench_function("position", |b| {
        b.iter(|| {
            let payload = ChannelPayload::parse(black_box(position)).unwrap();
            black_box(payload)
        })
    });

    group.bench_function("ping", |b| {
        b.iter(|| {
            let payload = ChannelPayload::parse(black_box(ping)).unwrap();
            black_box(payload)
        })
    });

    group.finish();
}

/// encoding benchmark
fn bench_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("Encoding");
    group.throughput(Throughput::Elements(1));

    group.bench_function("ping", |b| {
        b.iter(|| {
            let encoded = encode_ping(black_box(1700000000123));
            black_box(encoded)
        })
    });

    group.finish();
}

/// full keepalive cycle: parse the probe, encode the echo, parse the echo
fn bench_keepalive_cycle(c: &mut Criterion) {
    let ping = encode_ping(1700000000123);

    let mut group = c.benchmark_group("KeepaliveCycle");
    group.throughput(Throughput::Elements(1));

    group.bench_function("ping_pong", |b| {
        b.iter(|| {
            let ChannelPayload::Ping { sent_at } = ChannelPayload::parse(black_box(&ping)).unwrap()
            else {
                unreachable!()
            };
            let pong = encode_pong(sent_at);
            let parsed = ChannelPayload::parse(&pong).unwrap();
            black_box(parsed);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_parsing, bench_encoding, bench_keepalive_cycle);
criterion_main!(benches);
