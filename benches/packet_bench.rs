use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use msim_server::core::codec::MsimCodec;
use msim_server::core::packet::Pair;
use msim_server::core::wire;
use tokio_util::codec::Decoder;

fn message(size: usize) -> Vec<Pair> {
    vec![
        Pair::int("bm", 1),
        Pair::int("sesskey", 123_456),
        Pair::int("t", 42),
        Pair::int("cid", 1),
        // every fourth byte needs escaping
        Pair::string("msg", "abc/".repeat(size / 4)),
    ]
}

fn contact_reply(entries: usize) -> Vec<Pair> {
    let body = (0..entries)
        .flat_map(|i| {
            vec![
                Pair::int("ContactID", i as u32),
                Pair::string("GroupName", "IM Friends"),
                Pair::string("NickName", format!("friend={i}")),
            ]
        })
        .collect();
    vec![
        Pair::int("persistr", 1),
        Pair::int("uid", 42),
        Pair::int("cmd", 257),
        Pair::int("dsn", 0),
        Pair::int("lid", 1),
        Pair::int("rid", 7),
        Pair::dict("body", body),
    ]
}

#[allow(clippy::unwrap_used)]
fn bench_packet_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_encode_decode");

    for &size in &[16usize, 256, 4096, 32 * 1024] {
        let pairs = message(size);
        let frame = wire::encode(&pairs);
        group.throughput(Throughput::Bytes(frame.len() as u64));

        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter(|| wire::encode(&pairs))
        });
        group.bench_function(format!("decode_{size}b"), |b| {
            b.iter(|| {
                let decoded = wire::decode(&frame);
                assert!(decoded.packet.contains("msg"));
            })
        });
        group.bench_function(format!("codec_{size}b"), |b| {
            b.iter_batched(
                || BytesMut::from(&frame[..]),
                |mut buf| {
                    let mut codec = MsimCodec::default();
                    codec.decode(&mut buf).unwrap().unwrap()
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_body_dictionary(c: &mut Criterion) {
    let mut group = c.benchmark_group("body_dictionary");

    for &entries in &[1usize, 50, 500] {
        let pairs = contact_reply(entries);
        let frame = wire::encode(&pairs);

        group.bench_function(format!("encode_{entries}_entries"), |b| {
            b.iter(|| wire::encode(&pairs))
        });
        group.bench_function(format!("decode_{entries}_entries"), |b| {
            b.iter(|| wire::decode(&frame).packet.get_body().unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_packet_encode_decode, bench_body_dictionary);
criterion_main!(benches);
