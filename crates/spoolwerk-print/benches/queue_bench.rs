// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the per-device job queue: admission, dispatch
// and settle, and the expiry scan over a full queue of offline-held jobs.

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use spoolwerk_core::types::{DeviceId, JobContent, JobRequest, PrintJob};
use spoolwerk_print::JobQueue;

const CAPACITY: usize = 50;

fn job(content: &JobContent) -> PrintJob {
    PrintJob::new(DeviceId::from("label"), JobRequest::new(content.clone()))
}

fn full_queue(content: &JobContent) -> JobQueue {
    let mut queue = JobQueue::new(DeviceId::from("label"), CAPACITY);
    for _ in 0..CAPACITY {
        let _ = queue.enqueue(job(content));
    }
    queue
}

/// Fill an empty queue to capacity.
fn bench_enqueue(c: &mut Criterion) {
    let content = JobContent::new("label.png", "image/png", vec![0u8; 4096]);

    c.bench_function("enqueue to capacity", |b| {
        b.iter_batched(
            || JobQueue::new(DeviceId::from("label"), CAPACITY),
            |mut queue| {
                for _ in 0..CAPACITY {
                    let _ = queue.enqueue(black_box(job(&content)));
                }
                queue
            },
            BatchSize::SmallInput,
        );
    });
}

/// Drain a full queue through the in-flight slot.
fn bench_dispatch(c: &mut Criterion) {
    let content = JobContent::new("label.png", "image/png", vec![0u8; 4096]);

    c.bench_function("begin and finish 50 jobs", |b| {
        b.iter_batched(
            || full_queue(&content),
            |mut queue| {
                while let Ok(Some(job)) = queue.begin_next() {
                    black_box(job);
                    queue.finish_in_flight();
                }
                queue
            },
            BatchSize::SmallInput,
        );
    });
}

/// Expire a full queue of offline-held jobs.
fn bench_drain_expired(c: &mut Criterion) {
    let content = JobContent::new("label.png", "image/png", vec![0u8; 4096]);
    let later = chrono::Utc::now() + chrono::Duration::seconds(3600);

    c.bench_function("drain_expired (50 held)", |b| {
        b.iter_batched(
            || {
                let mut queue = full_queue(&content);
                let _ = queue.hold_pending_offline(chrono::Duration::seconds(600));
                queue
            },
            |mut queue| black_box(queue.drain_expired(later)),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_enqueue, bench_dispatch, bench_drain_expired);
criterion_main!(benches);
