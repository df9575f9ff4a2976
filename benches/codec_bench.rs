use bytes::{Bytes, BytesMut};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use protoforge::core::CodecRegistry;
use protoforge::transport::framing::FrameCodec;
use rand::Rng;
use tokio_util::codec::{Decoder, Encoder};

fn bench_primitives(c: &mut Criterion) {
    let registry = CodecRegistry::new();
    let mut group = c.benchmark_group("primitives");

    group.bench_function("i32_roundtrip", |b| {
        b.iter(|| {
            let bytes = registry.serialize(&-42i32).unwrap();
            registry.deserialize::<i32>(&bytes).unwrap()
        })
    });

    let text = "a".repeat(256);
    group.bench_function("string_roundtrip", |b| {
        b.iter(|| {
            let bytes = registry.serialize(&text).unwrap();
            registry.deserialize::<String>(&bytes).unwrap()
        })
    });

    group.finish();
}

fn bench_sequences(c: &mut Criterion) {
    let registry = CodecRegistry::new();
    let mut rng = rand::rng();
    let mut group = c.benchmark_group("sequences");

    let numbers: Vec<u64> = (0..4096).map(|_| rng.random()).collect();
    let encoded_numbers = registry.serialize_sequence(&numbers).unwrap();
    group.throughput(Throughput::Bytes(encoded_numbers.len() as u64));
    group.bench_function("u64_x4096_serialize", |b| {
        b.iter(|| registry.serialize_sequence(&numbers).unwrap())
    });
    group.bench_function("u64_x4096_deserialize", |b| {
        b.iter(|| registry.deserialize_sequence::<u64>(&encoded_numbers).unwrap())
    });

    let words: Vec<String> = (0..1024)
        .map(|i| format!("word-{i}-{}", rng.random::<u32>()))
        .collect();
    let encoded_words = registry.serialize_sequence(&words).unwrap();
    group.throughput(Throughput::Bytes(encoded_words.len() as u64));
    group.bench_function("string_x1024_deserialize", |b| {
        b.iter(|| registry.deserialize_sequence::<String>(&encoded_words).unwrap())
    });

    group.finish();
}

fn bench_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");
    let payload = Bytes::from(vec![0x5Au8; 16 * 1024]);
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("encode_decode_16k", |b| {
        b.iter_batched(
            || (FrameCodec::new(1 << 20), BytesMut::with_capacity(payload.len() + 4)),
            |(mut codec, mut buf)| {
                codec.encode(payload.clone(), &mut buf).unwrap();
                codec.decode(&mut buf).unwrap()
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_primitives, bench_sequences, bench_framing);
criterion_main!(benches);
