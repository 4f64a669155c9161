//! Checksum throughput benchmarks.
//!
//! Run with:
//! ```bash
//! cargo bench --bench checksum
//! ```

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use fota_server::checksum::{ChecksumAlgorithm, HardwareCrc, checksum_reader};
use std::hint::black_box;
use std::io::Cursor;

fn firmware_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) % 256) as u8).collect()
}

/// One-shot hardware CRC over whole images.
fn bench_hardware_crc(c: &mut Criterion) {
    let mut group = c.benchmark_group("hardware_crc");
    for len in [1024usize, 64 * 1024, 1024 * 1024] {
        let data = firmware_image(len);
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &data, |b, data| {
            b.iter(|| {
                let mut crc = HardwareCrc::new();
                crc.update(black_box(data));
                black_box(crc.finalize())
            });
        });
    }
    group.finish();
}

/// Streaming checksum at different read chunk sizes, including sizes that
/// split words.
fn bench_chunked_reader(c: &mut Criterion) {
    let data = firmware_image(256 * 1024);
    let mut group = c.benchmark_group("checksum_reader");
    group.throughput(Throughput::Bytes(data.len() as u64));
    for algorithm in [
        ChecksumAlgorithm::HardwareCrc,
        ChecksumAlgorithm::Crc32,
        ChecksumAlgorithm::Md5,
    ] {
        for chunk in [1023usize, 1024, 4096] {
            group.bench_with_input(
                BenchmarkId::new(algorithm.to_string(), chunk),
                &chunk,
                |b, &chunk| {
                    b.iter(|| {
                        checksum_reader(Cursor::new(black_box(&data)), algorithm, chunk)
                            .map(|(digest, _)| digest)
                    });
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_hardware_crc, bench_chunked_reader);
criterion_main!(benches);
