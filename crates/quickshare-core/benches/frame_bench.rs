use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use quickshare_core::{ChunkFrame, ControlFrame, FrameCodec, ManifestEntry, WireFrame};

fn chunk(len: usize) -> WireFrame {
    WireFrame::Chunk(ChunkFrame {
        item_index: 3,
        offset: 1 << 20,
        payload: vec![0xAA; len],
    })
}

fn bench_chunk_encode(c: &mut Criterion) {
    let codec = FrameCodec::default();
    let frame = chunk(64 * 1024);

    let mut group = c.benchmark_group("chunk_encode");
    group.throughput(Throughput::Bytes(64 * 1024));
    group.bench_function("encode_64k", |b| b.iter(|| codec.encode(black_box(&frame))));
    group.finish();
}

fn bench_chunk_decode_by_size(c: &mut Criterion) {
    let codec = FrameCodec::default();
    let sizes: Vec<(usize, &str)> = vec![
        (1024, "1k"),
        (16 * 1024, "16k"),
        (64 * 1024, "64k"),
        (256 * 1024, "256k"),
    ];

    let mut group = c.benchmark_group("chunk_decode_by_size");
    for (size, name) in sizes {
        let bytes = codec.encode(&chunk(size));
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(name, |b| b.iter(|| codec.decode(black_box(&bytes))));
    }
    group.finish();
}

fn bench_introduction_roundtrip(c: &mut Criterion) {
    let codec = FrameCodec::default();
    let items = (0..100)
        .map(|i| ManifestEntry {
            name: format!("photo_{i:04}.jpg"),
            size: 3_500_000,
            hash: Some(vec![0x5A; 32]),
        })
        .collect();
    let frame = WireFrame::Control(ControlFrame::Introduction { items });

    c.bench_function("introduction_100_items", |b| {
        b.iter(|| {
            let bytes = codec.encode(black_box(&frame));
            codec.decode(&bytes)
        })
    });
}

fn bench_partial_decode(c: &mut Criterion) {
    let codec = FrameCodec::default();
    let bytes = codec.encode(&chunk(64 * 1024));
    let half = &bytes[..bytes.len() / 2];

    c.bench_function("decode_need_more_data", |b| {
        b.iter(|| codec.decode(black_box(half)))
    });
}

criterion_group!(
    benches,
    bench_chunk_encode,
    bench_chunk_decode_by_size,
    bench_introduction_roundtrip,
    bench_partial_decode
);
criterion_main!(benches);
