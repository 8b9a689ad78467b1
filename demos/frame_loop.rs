//! Frame loop on the headless backend
//!
//! Each frame queues chunk meshing as foreground work, an acceleration
//! structure build as a task pinned to one worker, and a raycast query resumed
//! on the main thread. The simulated GPU queue is signalled at the end of
//! every frame.

use anyhow::Context;
use hearth_scheduler::gpu::{HeadlessBackend, HeadlessCommandBuffer, HeadlessQueue};
use hearth_scheduler::{
    add_background_work, add_foreground_batch, begin_next_frame, create_worker_pool,
    current_frame, install_panic_hook, pool_stats, query, record_on_current_worker, spawn,
    submit, take_frame_commands, work_fn, AsyncGpuSubmitter, CommandCategory, MainThreadQueue,
    PoolScheduler, QueueKind, SchedulerConfig, Work, WorkerContext, WorkerId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const FRAMES: u64 = 4;
const CHUNKS_PER_FRAME: usize = 16;

const CONFIG: &str = r#"
worker_count = 4
frames_in_flight = 2
thread_name_prefix = "demo-worker"
fatal_action = "poison"
"#;

type Ctx<'a> = WorkerContext<'a, HeadlessBackend>;

fn mesh_chunk(frame: u64, chunk: usize) -> Work<HeadlessBackend> {
    work_fn(format!("mesh_chunk_{}", chunk), move |ctx: &mut Ctx<'_>| {
        let label = format!("frame{}_chunk{}", frame, chunk);
        ctx.record(CommandCategory::GraphicsPrimary, &label, |encoder| {
            encoder.push("bind_chunk_pipeline");
            encoder.push("draw_indexed");
        });
        if chunk % 4 == 0 {
            ctx.record(CommandCategory::Shadow, &label, |encoder| encoder.push("draw_depth"));
        }
    })
    .into()
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    install_panic_hook();

    let config = SchedulerConfig::from_toml_str(CONFIG).context("demo config")?;
    let backend = Arc::new(HeadlessBackend::new());
    let pool = create_worker_pool(config, Arc::clone(&backend)).context("starting workers")?;
    let main_queue = MainThreadQueue::new();
    let gpu = Arc::new(HeadlessQueue::<HeadlessCommandBuffer>::new());
    let blas_scheduler = PoolScheduler::pinned(pool.handle(), WorkerId::new(0));

    println!("Hearth scheduler frame loop");
    println!("===========================");

    let mut frame = current_frame(pool.handle());
    for _ in 0..FRAMES {
        let chunks: Vec<_> = (0..CHUNKS_PER_FRAME)
            .map(|chunk| mesh_chunk(frame.index, chunk))
            .collect();
        add_foreground_batch(pool.handle(), &frame, chunks)?;

        add_background_work(
            pool.handle(),
            work_fn("far_lod", |ctx: &mut Ctx<'_>| {
                ctx.record(CommandCategory::Particle, "far_lod", |encoder| {
                    encoder.push("draw_impostors")
                });
            }),
        )?;

        let blas_ready = Arc::new(AtomicBool::new(false));
        let blas = {
            let gpu = Arc::clone(&gpu);
            let ready = Arc::clone(&blas_ready);
            spawn(&blas_scheduler, format!("blas_{}", frame.index), async move {
                let buffer = record_on_current_worker::<HeadlessBackend, _>(
                    CommandCategory::ComputePrimary,
                    "blas_build",
                    |encoder| encoder.push("build_acceleration_structure"),
                )?;
                submit(gpu.as_ref(), buffer).await?;
                ready.store(true, Ordering::SeqCst);
                Ok(())
            })
        };

        let mut raycast = {
            let gpu = Arc::clone(&gpu);
            let range_bias = frame.index as f32 * 0.5;
            spawn(&main_queue, "pick_raycast", async move {
                let buffer = HeadlessCommandBuffer {
                    id: 0,
                    label: "pick_ray".to_string(),
                    worker: WorkerId::new(0),
                    queue: QueueKind::Compute,
                    commands: vec!["trace_ray".to_string()],
                };
                query(gpu.as_ref(), buffer, move || range_bias + 3.0).await
            })
        };
        main_queue.run_pending();

        let commands = take_frame_commands(pool.handle(), &frame)?;
        println!("{}: {} command buffers", frame, commands.len());
        for published in commands.into_submission_order() {
            log::debug!(
                "submitting {} ({}) from {}",
                published.buffer.label,
                published.category.name(),
                published.worker
            );
            gpu.submit(published.buffer, Box::new(|_| {}));
        }

        // Stand-in for the fence wait at the end of the frame
        while gpu.pending() > 0 || !blas.is_finished() {
            gpu.signal_all();
            main_queue.run_pending();
            std::thread::yield_now();
        }
        main_queue.run_pending();

        match raycast.try_take_result() {
            Some(Ok(distance)) => println!("  raycast hit at {:.1}", distance),
            Some(Err(e)) => println!("  raycast failed: {}", e),
            None => println!("  raycast still in flight"),
        }
        println!("  BLAS ready: {}", blas_ready.load(Ordering::SeqCst));
        blas.detach();

        frame = begin_next_frame(pool.handle())?;
    }

    let stats = pool_stats(pool.handle());
    println!(
        "Executed {} items, published {} buffers, {} GPU submissions",
        stats.executed,
        stats.published,
        gpu.submitted()
    );
    Ok(())
}
