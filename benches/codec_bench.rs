use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode};
use merkle_kv::codec;
use merkle_kv::model::{Entry, OperationTag};
use std::time::Duration;

fn sample_entry(i: usize) -> Entry {
    Entry::new_value(
        format!("user:{i:06}"),
        "some replicated value payload".to_string(),
        1_700_000_000_000 + i as u64,
        "node-a".to_string(),
        i as u64,
        Some(OperationTag::Set),
    )
}

fn bench_codec(c: &mut Criterion) {
    let entry = sample_entry(42);
    let encoded = codec::encode(&entry).unwrap();

    let mut g = c.benchmark_group("codec");
    g.sample_size(60)
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(2))
        .sampling_mode(SamplingMode::Auto);

    g.bench_function(BenchmarkId::new("encode", "single_entry"), |b| {
        b.iter(|| {
            let out = codec::encode(black_box(&entry)).unwrap();
            black_box(out.len());
        });
    });

    g.bench_function(BenchmarkId::new("decode", "single_entry"), |b| {
        b.iter(|| {
            let out = codec::decode(black_box(&encoded)).unwrap();
            black_box(out.seq);
        });
    });

    g.finish();
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
