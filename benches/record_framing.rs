//! Benchmarks for record framing and replay
//!
//! Covers the per-frame cost the recorder pays on top of the encoder:
//! - Wrapping an encoded image into a framed record
//! - Decoding records back out of a file image
//! - Appending through the shared sink
//!
//! Platform: Cross-platform (in-memory and temp files, CI-safe)

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use shmrec::rec::RecordReader;
use shmrec::rec::format::{decode_envelope, encode_envelope, image_envelope};
use shmrec::sink::RecordSink;
use shmrec::types::{Envelope, FourCc, ImageReading, Timestamp};
use std::hint::black_box;

/// Typical compressed sizes: a small P frame up to a 640x480 keyframe.
const PAYLOAD_SIZES: [usize; 3] = [2 * 1024, 32 * 1024, 256 * 1024];

fn envelope_of(size: usize) -> Envelope {
    let reading = ImageReading {
        fourcc: FourCc::H264,
        width: 640,
        height: 480,
        data: (0..size).map(|i| i as u8).collect(),
    };
    image_envelope(&reading, Timestamp::from_micros(2_000), Timestamp::from_micros(1_000), 7)
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_envelope");
    for size in PAYLOAD_SIZES {
        let envelope = envelope_of(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &envelope, |b, envelope| {
            b.iter(|| black_box(encode_envelope(black_box(envelope))))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_envelope");
    for size in PAYLOAD_SIZES {
        let bytes = encode_envelope(&envelope_of(size));
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &bytes, |b, bytes| {
            b.iter(|| black_box(decode_envelope(black_box(bytes)).expect("valid record")))
        });
    }
    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    const RECORDS: usize = 300;
    let record = encode_envelope(&envelope_of(8 * 1024));
    let file: Vec<u8> = record.iter().copied().cycle().take(record.len() * RECORDS).collect();

    let mut group = c.benchmark_group("replay");
    group.throughput(Throughput::Elements(RECORDS as u64));
    group.bench_function("read_all_300_records", |b| {
        b.iter(|| {
            let mut reader = RecordReader::from_bytes(file.clone());
            black_box(reader.read_all().expect("valid file"))
        })
    });
    group.finish();
}

fn bench_sink_append(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("temp dir");
    let sink = RecordSink::open(dir.path().join("bench.rec")).expect("open sink");
    let envelope = envelope_of(32 * 1024);

    let mut group = c.benchmark_group("sink");
    group.throughput(Throughput::Bytes(envelope.payload.len() as u64));
    group.bench_function("append_32k", |b| b.iter(|| black_box(sink.append(black_box(&envelope)))));
    group.finish();

    sink.close();
}

criterion_group!(benches, bench_encode, bench_decode, bench_replay, bench_sink_append);
criterion_main!(benches);
