//! Benchmarks for the stack and pool allocators: single allocate/deallocate
//! round trips and a stack frame push/pop cycle under contention.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scriptcore::alloc::pool::PoolAllocator;
use scriptcore::alloc::stack::StackAllocator;
use scriptcore::alloc::Allocator;
use std::sync::Arc;
use std::thread;

fn bench_stack_allocate_deallocate(c: &mut Criterion) {
    let stack = StackAllocator::new(1024 * 1024);
    c.bench_function("stack_allocate_deallocate", |b| {
        b.iter(|| {
            let ptr = stack.allocate(64, 8).unwrap();
            stack.deallocate(ptr, 64).unwrap();
            black_box(ptr);
        })
    });
}

fn bench_stack_frame_cycle(c: &mut Criterion) {
    let stack = StackAllocator::new(1024 * 1024);
    c.bench_function("stack_frame_push_pop", |b| {
        b.iter(|| {
            let frame = stack.push_frame("bench");
            let _ = stack.allocate(128, 8).unwrap();
            let _ = stack.allocate(256, 8).unwrap();
            stack.pop_frame(frame).unwrap();
        })
    });
}

fn bench_pool_allocate_deallocate(c: &mut Criterion) {
    let pool = PoolAllocator::new(64, 4096).unwrap();
    c.bench_function("pool_allocate_deallocate", |b| {
        b.iter(|| {
            let ptr = pool.allocate(64, 8).unwrap();
            pool.deallocate(ptr, 64).unwrap();
            black_box(ptr);
        })
    });
}

fn bench_pool_allocate_deallocate_contended(c: &mut Criterion) {
    let pool = Arc::new(PoolAllocator::new(64, 4096).unwrap());
    c.bench_function("pool_allocate_deallocate_contended_4t", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let pool = pool.clone();
                    thread::spawn(move || {
                        for _ in 0..256 {
                            let ptr = pool.allocate(64, 8).unwrap();
                            pool.deallocate(ptr, 64).unwrap();
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        })
    });
}

criterion_group!(
    benches,
    bench_stack_allocate_deallocate,
    bench_stack_frame_cycle,
    bench_pool_allocate_deallocate,
    bench_pool_allocate_deallocate_contended,
);
criterion_main!(benches);
