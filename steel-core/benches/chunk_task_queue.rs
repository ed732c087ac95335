#![allow(missing_docs)]
//! Benchmarks for the chunk task priority queue.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use steel_core::chunk::{chunk_level::ChunkLevel, chunk_task_queue::ChunkTaskPriorityQueue};
use steel_utils::ChunkPos;

fn bench_submit_and_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_and_pop");
    for chunks in [64, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(chunks), &chunks, |b, &chunks| {
            b.iter(|| {
                let mut queue = ChunkTaskPriorityQueue::new("bench");
                for index in 0..chunks {
                    let pos = ChunkPos::new(index % 32, index / 32).as_i64();
                    let level = (index % i32::from(ChunkLevel::MAX_LEVEL)) as u8;
                    queue.submit(index, pos, level);
                }
                while let Some(tasks) = queue.pop() {
                    black_box(tasks);
                }
            });
        });
    }
    group.finish();
}

fn bench_resort(c: &mut Criterion) {
    let mut queue = ChunkTaskPriorityQueue::new("bench");
    for index in 0..1024 {
        queue.submit(index, ChunkPos::new(index % 32, index / 32).as_i64(), 40);
    }
    let pos = ChunkPos::new(5, 5).as_i64();

    c.bench_function("resort_one_chunk", |b| {
        b.iter(|| {
            queue.resort_chunk_tasks(40, black_box(pos), 20);
            queue.resort_chunk_tasks(20, black_box(pos), 40);
        });
    });
}

criterion_group!(benches, bench_submit_and_pop, bench_resort);
criterion_main!(benches);
