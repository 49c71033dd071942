//! Throughput benchmarks

use bytes::BytesMut;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use tokio_util::codec::Decoder;

use netio::digest::{HashAlgorithm, Hasher};
use netio::framing::{FrameBoundary, FrameSplitter};
use netio::stats::format_performance;

fn framed_stream(messages: usize, payload: usize) -> Vec<u8> {
    let boundary = FrameBoundary::hl7();
    let mut stream = Vec::new();
    for _ in 0..messages {
        stream.extend_from_slice(boundary.prefix());
        stream.extend(std::iter::repeat_n(b'x', payload));
        stream.extend_from_slice(boundary.suffix());
    }
    stream
}

fn bench_frame_split(c: &mut Criterion) {
    let stream = framed_stream(64, 1024);

    c.bench_function("frame_split_hl7", |b| {
        b.iter(|| {
            let mut splitter = FrameSplitter::new(FrameBoundary::hl7());
            let mut buf = BytesMut::from(black_box(&stream[..]));
            let mut frames = 0;
            while let Ok(Some(_)) = splitter.decode(&mut buf) {
                frames += 1;
            }
            frames
        })
    });
}

fn bench_hash_update(c: &mut Criterion) {
    let chunk = vec![0xa5u8; 32 * 1024];

    for algorithm in [HashAlgorithm::Md5, HashAlgorithm::Sha256] {
        let mut hasher = Hasher::new(algorithm);
        c.bench_function(&format!("hash_update_{}", algorithm), |b| {
            b.iter(|| hasher.update(black_box(&chunk)))
        });
    }
}

fn bench_format_performance(c: &mut Criterion) {
    c.bench_function("format_performance", |b| {
        b.iter(|| {
            format_performance(
                black_box(123_456_789),
                black_box(std::time::Duration::from_millis(4321)),
            )
        })
    });
}

criterion_group!(
    benches,
    bench_frame_split,
    bench_hash_update,
    bench_format_performance
);
criterion_main!(benches);
