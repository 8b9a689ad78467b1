use std::hint::black_box;
use std::sync::Arc;

use criterion::*;
use hearth_scheduler::gpu::HeadlessBackend;
use hearth_scheduler::{
    add_foreground_batch, begin_next_frame, create_worker_pool, take_frame_commands, work_fn,
    CommandCategory, DependencyAggregator, FatalAction, SchedulerConfig, Work, WorkerContext,
    WorkerPoolData,
};
use rand::Rng;

const ITEMS_PER_FRAME: usize = 2_000;

fn bench_pool(workers: usize) -> WorkerPoolData<HeadlessBackend> {
    let config = SchedulerConfig {
        worker_count: workers,
        frames_in_flight: 2,
        fatal_action: FatalAction::Poison,
        ..Default::default()
    };
    create_worker_pool(config, Arc::new(HeadlessBackend::new()))
        .expect("pool startup failed in benchmark")
}

fn draw_item(priority: f32) -> Work<HeadlessBackend> {
    work_fn("draw_chunk", |ctx: &mut WorkerContext<'_, HeadlessBackend>| {
        ctx.record(CommandCategory::GraphicsPrimary, "draw_chunk", |encoder| {
            encoder.push("draw")
        });
    })
    .with_priority(priority)
    .into()
}

fn frame_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");
    group.throughput(Throughput::Elements(ITEMS_PER_FRAME as u64));

    for workers in [1, 4] {
        let pool = bench_pool(workers);
        let mut rng = rand::thread_rng();

        group.bench_function(format!("record_{}_items_{}_workers", ITEMS_PER_FRAME, workers), |b| {
            b.iter(|| {
                let frame = begin_next_frame(pool.handle()).expect("begin frame");
                let batch: Vec<_> = (0..ITEMS_PER_FRAME)
                    .map(|_| draw_item(rng.gen_range(-1.0..2.0)))
                    .collect();
                add_foreground_batch(pool.handle(), &frame, batch).expect("enqueue");
                let commands = take_frame_commands(pool.handle(), &frame).expect("take");
                black_box(commands.len())
            })
        });
    }

    group.finish();
}

fn aggregator_fan_out(c: &mut Criterion) {
    let pool = bench_pool(4);
    let mut group = c.benchmark_group("aggregator");

    group.bench_function("fan_out_64x32", |b| {
        b.iter(|| {
            let frame = begin_next_frame(pool.handle()).expect("begin frame");
            let stages: Vec<Work<HeadlessBackend>> = (0..64)
                .map(|_| DependencyAggregator::new((0..32).map(|_| draw_item(0.0)).collect()).into())
                .collect();
            add_foreground_batch(pool.handle(), &frame, stages).expect("enqueue");
            black_box(take_frame_commands(pool.handle(), &frame).expect("take").len())
        })
    });

    group.finish();
}

criterion_group!(benches, frame_throughput, aggregator_fan_out);
criterion_main!(benches);
