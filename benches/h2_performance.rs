//! HTTP/2 client core benchmarks
//!
//! Measures the per-frame hot paths of the connection core:
//! - Frame header encoding/decoding and whole-frame reads
//! - DATA frame writes for several payload sizes
//! - Stream registry put/get/remove
//! - Buffer pool borrow/release
//! - Send and receive flow-control windows
//! - HPACK header compression/decompression
//!
//! Run with: cargo bench --bench h2_performance

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use h2mux::http::h2::{
    frames::{FrameFlags, FrameHeader, FrameType},
    AllocatorConfig, ByteAllocator, FlowControlWindow, FrameDecoder, FrameEncoder, HeaderDecoder, HeaderEncoder,
    HpackCodec, ReceiveWindow, StreamRegistry, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE,
};
use std::io::{self, Cursor};
use std::sync::Arc;
use std::time::Duration;

// ========== Frame Encoding/Decoding ==========

fn bench_frame_header(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_header");

    let header = FrameHeader {
        length: 1024,
        frame_type: FrameType::Data.as_u8(),
        flags: FrameFlags::from_u8(0x01),
        stream_id: 1,
    };
    let raw = header.encode();

    group.bench_function("encode", |b| {
        b.iter(|| black_box(black_box(header).encode()));
    });

    group.bench_function("decode", |b| {
        b.iter(|| black_box(FrameHeader::decode(black_box(&raw))));
    });

    group.finish();
}

fn bench_data_frame_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("data_frame_write");

    for size in [64usize, 1024, 16384] {
        let payload = vec![0xABu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            let mut encoder = FrameEncoder::new(io::sink(), DEFAULT_MAX_FRAME_SIZE);
            b.iter(|| {
                encoder.write_data(1, black_box(payload), false).unwrap();
                encoder.flush().unwrap();
            });
        });
    }

    group.finish();
}

fn bench_frame_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_read");

    let mut encoder = FrameEncoder::new(Vec::new(), DEFAULT_MAX_FRAME_SIZE);
    for stream_id in (1..200).step_by(2) {
        encoder.write_data(stream_id, &[0x5Au8; 1024], false).unwrap();
        encoder.write_window_update(stream_id, 1024).unwrap();
    }
    encoder.flush().unwrap();
    let wire = encoder.get_ref().clone();

    group.throughput(Throughput::Bytes(wire.len() as u64));
    group.bench_function("data_and_window_update_x100", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new(Cursor::new(&wire[..]), DEFAULT_MAX_FRAME_SIZE);
            let mut frames = 0;
            while let Some(frame) = decoder.read_frame().unwrap() {
                black_box(&frame);
                frames += 1;
            }
            assert_eq!(frames, 200);
        });
    });

    group.finish();
}

// ========== Stream Management ==========

fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_registry");

    for streams in [10u32, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("put_get_remove", streams), &streams, |b, &streams| {
            let registry: StreamRegistry<u32> = StreamRegistry::new();
            let values: Vec<Arc<u32>> = (0..streams).map(|i| Arc::new(i * 2 + 1)).collect();
            b.iter(|| {
                for value in &values {
                    registry.put(**value, Arc::clone(value));
                }
                for value in &values {
                    black_box(registry.get(**value));
                }
                for value in &values {
                    registry.remove(**value);
                }
            });
        });
    }

    group.finish();
}

fn bench_allocator(c: &mut Criterion) {
    let mut group = c.benchmark_group("byte_allocator");
    let allocator = ByteAllocator::new(AllocatorConfig::default()).unwrap();

    for size in [1024usize, 16384] {
        group.bench_with_input(BenchmarkId::new("borrow_release", size), &size, |b, &size| {
            b.iter(|| {
                let buf = allocator.borrow(black_box(size)).unwrap();
                allocator.release(buf);
            });
        });
    }

    group.bench_function("vec_alloc_baseline_16384", |b| {
        b.iter(|| black_box(vec![0u8; 16384]));
    });

    group.finish();
}

// ========== Flow Control ==========

fn bench_flow_control(c: &mut Criterion) {
    let mut group = c.benchmark_group("flow_control");

    group.bench_function("send_acquire_release", |b| {
        let window = FlowControlWindow::new(DEFAULT_INITIAL_WINDOW_SIZE);
        b.iter(|| {
            assert!(window.try_acquire(black_box(1024), Duration::from_millis(10)));
            window.release(1024);
        });
    });

    group.bench_function("receive_consume_release", |b| {
        let mut window = ReceiveWindow::new(DEFAULT_INITIAL_WINDOW_SIZE);
        b.iter(|| {
            window.consume(black_box(1024));
            black_box(window.release(1024));
        });
    });

    group.finish();
}

// ========== HPACK ==========

fn request_fields() -> Vec<(&'static [u8], &'static [u8])> {
    [
        (":method", "GET"),
        (":scheme", "https"),
        (":authority", "api.example.com"),
        (":path", "/v1/items?page=2"),
        ("accept", "application/json"),
        ("user-agent", "h2mux-bench/0.1"),
    ]
    .iter()
    .map(|(name, value)| (name.as_bytes(), value.as_bytes()))
    .collect()
}

fn bench_hpack(c: &mut Criterion) {
    let mut group = c.benchmark_group("hpack");
    let fields = request_fields();

    group.bench_function("encode_request", |b| {
        let mut encoder = HpackCodec::encoder();
        let mut block = Vec::with_capacity(256);
        b.iter(|| {
            block.clear();
            encoder.encode(black_box(&fields), &mut block).unwrap();
            black_box(&block);
        });
    });

    let mut block = Vec::new();
    HpackCodec::encoder().encode(&fields, &mut block).unwrap();
    group.bench_function("decode_request", |b| {
        b.iter(|| {
            // fresh decoder per block so the dynamic table matches the encoder
            let mut decoder = HpackCodec::decoder();
            black_box(decoder.decode(black_box(&block)).unwrap());
        });
    });

    group.finish();
}

criterion_group! {
    name = frame_codec;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(100);
    targets = bench_frame_header, bench_data_frame_write, bench_frame_read
}

criterion_group! {
    name = stream_management;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10));
    targets = bench_registry, bench_allocator
}

criterion_group! {
    name = flow_control_benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10));
    targets = bench_flow_control
}

criterion_group! {
    name = hpack;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10));
    targets = bench_hpack
}

criterion_main!(frame_codec, stream_management, flow_control_benches, hpack);
