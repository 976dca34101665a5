//! # Peer Hub Benchmarks
//!
//! Hot paths on every delivered message:
//!
//! | Path | Runs |
//! |------|------|
//! | Frame encode/decode | once per send attempt and once per inbound stream |
//! | Registration verify | once per received announcement |
//! | Boundary queue | once per queued frame, once per drain |

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hub_crypto::{AccountKeyPair, TransportKeyPair};
use peer_hub::domain::{BoundaryQueue, Frame, RegistrationRecord};

const MAX_FRAME: usize = 4 * 1024 * 1024;

// ============================================================================
// FRAME CODEC
// ============================================================================

fn bench_frame_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame-codec");

    for size in [64usize, 1024, 6000, 64 * 1024] {
        let frame = Frame::application(vec![0xA5u8; size]);
        let wire = frame.encode();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encode", size), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode()))
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &wire, |b, wire| {
            b.iter(|| black_box(Frame::decode(wire, MAX_FRAME)))
        });
    }

    group.finish();
}

// ============================================================================
// REGISTRATION
// ============================================================================

fn bench_registration_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");

    let account = AccountKeyPair::generate();
    let identity = TransportKeyPair::generate();
    let signature = account.sign(identity.fingerprint().as_bytes()).unwrap();
    let record = RegistrationRecord::new(account.account_key(), &identity, signature, 1);

    group.bench_function("verify", |b| b.iter(|| black_box(record.verify())));
    group.bench_function("recover", |b| {
        b.iter(|| black_box(RegistrationRecord::recover(&identity, signature, 1)))
    });

    group.finish();
}

// ============================================================================
// BOUNDARY QUEUE
// ============================================================================

fn bench_boundary_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("boundary-queue");
    let payload = Bytes::from(vec![7u8; 256]);

    for batch in [16usize, 256, 4096] {
        let mut buf = vec![0u8; batch * (payload.len() + 4)];
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("push_then_drain", batch), &batch, |b, &batch| {
            let queue = BoundaryQueue::new(batch);
            b.iter(|| {
                for _ in 0..batch {
                    queue.push(payload.clone());
                }
                black_box(queue.drain_into(&mut buf))
            })
        });
    }

    // Steady-state eviction with a full queue.
    let queue = BoundaryQueue::new(1024);
    for _ in 0..1024 {
        queue.push(payload.clone());
    }
    group.bench_function("push_evicting", |b| b.iter(|| black_box(queue.push(payload.clone()))));

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_codec,
    bench_registration_verify,
    bench_boundary_queue
);
criterion_main!(benches);
