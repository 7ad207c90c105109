//! Throughput Benchmark for memlink
//!
//! Measures the two hot paths of a connection without a socket: parsing a
//! response stream and batching requests through the writer.

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use memlink::connection::{CommandBuffer, NonBlockingWrite, RequestWriter};
use memlink::ResponseReader;
use std::io;

/// Builds a stream of `count` copies of `response`.
fn stream_of(response: &[u8], count: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(response.len() * count);
    for _ in 0..count {
        buf.extend_from_slice(response);
    }
    buf.freeze()
}

/// Parses the whole stream, fed in `chunk`-sized reads.
fn parse_all(stream: &Bytes, chunk: usize) -> usize {
    let mut reader = ResponseReader::new();
    let mut input = BytesMut::new();
    let mut parsed = 0;

    for piece in stream.chunks(chunk) {
        input.extend_from_slice(piece);
        while let Ok(Some(response)) = reader.next(&mut input) {
            black_box(response);
            parsed += 1;
        }
    }
    parsed
}

/// Benchmark response parsing
fn bench_reader(c: &mut Criterion) {
    let mut group = c.benchmark_group("reader");

    let stored = stream_of(b"STORED\r\n", 1000);
    group.throughput(Throughput::Bytes(stored.len() as u64));
    group.bench_function("status_lines", |b| {
        b.iter(|| black_box(parse_all(&stored, 8 * 1024)));
    });

    let meta = stream_of(b"VA 11 f0 c42 t-1\r\nsmall_value\r\n", 1000);
    group.throughput(Throughput::Bytes(meta.len() as u64));
    group.bench_function("meta_values", |b| {
        b.iter(|| black_box(parse_all(&meta, 8 * 1024)));
    });

    let large_value = format!("VA {}\r\n{}\r\n", 64 * 1024, "x".repeat(64 * 1024));
    let large = stream_of(large_value.as_bytes(), 16);
    group.throughput(Throughput::Bytes(large.len() as u64));
    group.bench_function("large_values", |b| {
        b.iter(|| black_box(parse_all(&large, 8 * 1024)));
    });

    let classic = stream_of(b"VALUE user:1 0 9 17\r\nuser_data\r\nEND\r\n", 1000);
    group.throughput(Throughput::Bytes(classic.len() as u64));
    group.bench_function("classic_get_small_reads", |b| {
        b.iter(|| black_box(parse_all(&classic, 64)));
    });

    group.finish();
}

/// A socket that takes everything.
struct Sink;

impl NonBlockingWrite for Sink {
    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        Ok(black_box(buf.len()))
    }
}

/// Pushes every command through the writer, writing whenever it fills up.
fn write_all(writer: &mut RequestWriter, commands: &[CommandBuffer]) {
    for command in commands {
        while !writer.prepare() {
            let _ = writer.write(&Sink);
        }
        // A remainder that does not fit is picked up by the next prepare()
        writer.add(command);
    }
    while writer.has_pending() {
        let _ = writer.write(&Sink);
        writer.prepare();
    }
}

/// Benchmark request batching
fn bench_writer(c: &mut Criterion) {
    let mut group = c.benchmark_group("writer");

    let small: Vec<CommandBuffer> = (0..1000u64)
        .map(|i| CommandBuffer::new(i, Bytes::from(format!("mg key:{} v\r\n", i))))
        .collect();
    group.throughput(Throughput::Elements(small.len() as u64));
    group.bench_function("small_commands", |b| {
        let mut writer = RequestWriter::new(16 * 1024);
        b.iter(|| write_all(&mut writer, &small));
    });

    let value = "x".repeat(32 * 1024);
    let large: Vec<CommandBuffer> = (0..64u64)
        .map(|i| {
            CommandBuffer::new(
                i,
                Bytes::from(format!("set key:{} 0 0 {}\r\n{}\r\n", i, value.len(), value)),
            )
        })
        .collect();
    group.throughput(Throughput::Elements(large.len() as u64));
    group.bench_function("commands_larger_than_buffer", |b| {
        let mut writer = RequestWriter::new(16 * 1024);
        b.iter(|| write_all(&mut writer, &large));
    });

    group.finish();
}

criterion_group!(benches, bench_reader, bench_writer);

criterion_main!(benches);
