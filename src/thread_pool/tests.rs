//! Pool scenarios on the headless backend

use super::*;
use crate::config::SchedulerConfig;
use crate::error::EngineError;
use crate::frame::{FrameCommands, FrameContext};
use crate::gpu::{CommandCategory, HeadlessBackend, HeadlessCommandBuffer};
use crate::panic_handler::FatalAction;
use crate::resource::FrameSlotted;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type Ctx<'a> = WorkerContext<'a, HeadlessBackend>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config(workers: usize) -> SchedulerConfig {
    SchedulerConfig {
        worker_count: workers,
        frames_in_flight: 2,
        fatal_action: FatalAction::Poison,
        ..Default::default()
    }
}

fn start_pool(config: SchedulerConfig) -> (WorkerPoolData<HeadlessBackend>, Arc<HeadlessBackend>) {
    init_logging();
    let backend = Arc::new(HeadlessBackend::new());
    let pool = create_worker_pool(config, Arc::clone(&backend)).expect("pool starts");
    (pool, backend)
}

fn item<F>(name: &str, f: F) -> Work<HeadlessBackend>
where
    F: FnOnce(&mut Ctx<'_>) + Send + 'static,
{
    work_fn(name, f).into()
}

fn prioritized<F>(name: &str, priority: f32, f: F) -> Work<HeadlessBackend>
where
    F: FnOnce(&mut Ctx<'_>) + Send + 'static,
{
    work_fn(name, f).with_priority(priority).into()
}

/// Item that appends its name to `log` and records one buffer in `category`
fn recording(
    name: &str,
    category: CommandCategory,
    log: &Arc<Mutex<Vec<String>>>,
) -> Work<HeadlessBackend> {
    let log = Arc::clone(log);
    let label = name.to_string();
    item(name, move |ctx| {
        ctx.record(category, &label, |encoder| encoder.push("draw"));
        log.lock().push(label);
    })
}

fn labels(commands: &FrameCommands<HeadlessCommandBuffer>, category: CommandCategory) -> Vec<String> {
    commands
        .bucket(category)
        .iter()
        .map(|published| published.buffer.label.clone())
        .collect()
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_priorities_run_highest_first() {
    let (pool, _) = start_pool(SchedulerConfig {
        start_paused: true,
        ..config(1)
    });
    let frame = current_frame(pool.handle());
    let order = Arc::new(Mutex::new(Vec::new()));

    for (name, priority) in [("speculative", -1.0), ("blas", 2.0), ("mesh", 0.0)] {
        let order = Arc::clone(&order);
        add_foreground_work(
            pool.handle(),
            &frame,
            prioritized(name, priority, move |_ctx| order.lock().push(name)),
        )
        .expect("enqueue");
    }

    resume_workers(pool.handle());
    wait_foreground_drained(pool.handle(), &frame).expect("drained");
    assert_eq!(*order.lock(), vec!["blas", "mesh", "speculative"]);
}

#[test]
fn test_shuffled_priorities_drain_in_order() {
    let (pool, _) = start_pool(SchedulerConfig {
        start_paused: true,
        ..config(1)
    });
    let frame = current_frame(pool.handle());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut priorities: Vec<i32> = (-20..20).collect();
    priorities.shuffle(&mut rand::thread_rng());
    let batch: Vec<Work<HeadlessBackend>> = priorities
        .iter()
        .map(|&p| {
            let seen = Arc::clone(&seen);
            prioritized("shuffled", p as f32, move |_ctx| seen.lock().push(p))
        })
        .collect();
    assert_eq!(
        add_foreground_batch(pool.handle(), &frame, batch).expect("enqueue"),
        40
    );

    resume_workers(pool.handle());
    wait_foreground_drained(pool.handle(), &frame).expect("drained");
    let seen = seen.lock();
    assert_eq!(seen.len(), 40);
    assert!(seen.windows(2).all(|pair| pair[0] >= pair[1]));
}

#[test]
fn test_foreground_before_background() {
    let (pool, _) = start_pool(SchedulerConfig {
        start_paused: true,
        ..config(1)
    });
    let frame = current_frame(pool.handle());
    let order = Arc::new(Mutex::new(Vec::new()));

    let o = Arc::clone(&order);
    add_background_work(
        pool.handle(),
        prioritized("far_lod", 50.0, move |_ctx| o.lock().push("background")),
    )
    .expect("enqueue");
    let o = Arc::clone(&order);
    add_foreground_work(
        pool.handle(),
        &frame,
        prioritized("visible", -5.0, move |_ctx| o.lock().push("foreground")),
    )
    .expect("enqueue");

    resume_workers(pool.handle());
    wait_until("both items", || order.lock().len() == 2);
    assert_eq!(*order.lock(), vec!["foreground", "background"]);
}

#[test]
fn test_child_buffers_follow_parent() {
    let (pool, _) = start_pool(config(4));
    let frame = current_frame(pool.handle());
    let log = Arc::new(Mutex::new(Vec::new()));

    for i in 0..16 {
        let child = recording(&format!("child_{}", i), CommandCategory::GraphicsPrimary, &log);
        let label = format!("parent_{}", i);
        add_foreground_work(
            pool.handle(),
            &frame,
            item("parent", move |ctx| {
                ctx.record(CommandCategory::GraphicsPrimary, &label, |e| e.push("clear"));
                ctx.add_work(child);
            }),
        )
        .expect("enqueue");
    }

    let commands = take_frame_commands(pool.handle(), &frame).expect("commands");
    let bucket = labels(&commands, CommandCategory::GraphicsPrimary);
    assert_eq!(bucket.len(), 32);
    for i in 0..16 {
        let parent = bucket.iter().position(|l| *l == format!("parent_{}", i));
        let child = bucket.iter().position(|l| *l == format!("child_{}", i));
        assert!(parent < child, "child_{} published before its parent", i);
    }
    assert!(commands
        .iter_submission_order()
        .all(|published| published.frame == frame));
}

#[test]
fn test_parent_and_child_in_different_buckets() {
    let (pool, _) = start_pool(config(2));
    let frame = current_frame(pool.handle());
    let log = Arc::new(Mutex::new(Vec::new()));

    let child = recording("b", CommandCategory::GraphicsSecondary, &log);
    add_foreground_work(
        pool.handle(),
        &frame,
        item("a", move |ctx| {
            ctx.record(CommandCategory::GraphicsPrimary, "a", |e| e.push("draw"));
            ctx.add_work(child);
        }),
    )
    .expect("enqueue");

    let commands = take_frame_commands(pool.handle(), &frame).expect("commands");
    let a = &commands.bucket(CommandCategory::GraphicsPrimary)[0];
    let b = &commands.bucket(CommandCategory::GraphicsSecondary)[0];
    assert_eq!(a.frame.slot.index(), 0);
    assert_eq!(b.frame.slot.index(), 0);
    assert!(a.sequence < b.sequence);
    let order: Vec<&str> = commands
        .iter_submission_order()
        .map(|published| published.buffer.label.as_str())
        .collect();
    assert_eq!(order, vec!["a", "b"]);
}

#[test]
fn test_each_item_processed_exactly_once() {
    let (pool, _) = start_pool(config(4));
    let frame = current_frame(pool.handle());
    let counters: Arc<Vec<AtomicUsize>> = Arc::new((0..200).map(|_| AtomicUsize::new(0)).collect());

    let batch: Vec<Work<HeadlessBackend>> = (0..200)
        .map(|i| {
            let counters = Arc::clone(&counters);
            item("count", move |_ctx| {
                counters[i].fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();
    add_foreground_batch(pool.handle(), &frame, batch).expect("enqueue");

    wait_foreground_drained(pool.handle(), &frame).expect("drained");
    assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    assert_eq!(pool_stats(pool.handle()).executed, 200);
}

#[test]
fn test_frame_slots_do_not_alias() {
    let (pool, _) = start_pool(config(2));
    let uniforms = Arc::new(Mutex::new(FrameSlotted::filled(2, 0u64).expect("storage")));

    let write_frame_index = |uniforms: &Arc<Mutex<FrameSlotted<u64>>>| {
        let uniforms = Arc::clone(uniforms);
        item("update_uniforms", move |ctx| {
            let frame = ctx.frame().expect("foreground work has a frame");
            *uniforms.lock().get_mut(&frame) = 100 + frame.index;
        })
    };

    let frame0 = current_frame(pool.handle());
    add_foreground_work(pool.handle(), &frame0, write_frame_index(&uniforms)).expect("enqueue");
    let frame1 = begin_next_frame(pool.handle()).expect("frame 1");
    add_foreground_work(pool.handle(), &frame1, write_frame_index(&uniforms)).expect("enqueue");

    wait_foreground_drained(pool.handle(), &frame1).expect("drained");
    wait_foreground_drained(pool.handle(), &frame0).expect("drained");
    assert_eq!(*uniforms.lock().get(&frame0), 100);
    assert_eq!(*uniforms.lock().get(&frame1), 101);
}

#[test]
fn test_aggregator_releases_children_together() {
    let (pool, _) = start_pool(config(1));
    let frame = current_frame(pool.handle());
    let order = Arc::new(Mutex::new(Vec::new()));
    let queued_when_first_ran = Arc::new(AtomicUsize::new(usize::MAX));

    let children: Vec<Work<HeadlessBackend>> = (0..5)
        .map(|i| {
            let order = Arc::clone(&order);
            let queued = Arc::clone(&queued_when_first_ran);
            item(&format!("child_{}", i), move |ctx| {
                if i == 0 {
                    let stats = pool_stats(ctx.pool());
                    queued.store(stats.queued_foreground, Ordering::SeqCst);
                }
                order.lock().push(i);
            })
        })
        .collect();
    let aggregator = DependencyAggregator::new(children);

    add_foreground_work(
        pool.handle(),
        &frame,
        item("barrier", move |ctx| ctx.add_work(aggregator)),
    )
    .expect("enqueue");

    wait_foreground_drained(pool.handle(), &frame).expect("drained");
    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    assert_eq!(queued_when_first_ran.load(Ordering::SeqCst), 4);
}

#[test]
fn test_drain_waits_for_children() {
    let (pool, _) = start_pool(config(2));
    let frame = current_frame(pool.handle());
    let child_ran = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&child_ran);
    add_foreground_work(
        pool.handle(),
        &frame,
        item("parent", move |ctx| {
            ctx.add_work(item("slow_child", move |_ctx| {
                thread::sleep(Duration::from_millis(20));
                flag.store(true, Ordering::SeqCst);
            }));
        }),
    )
    .expect("enqueue");

    wait_foreground_drained(pool.handle(), &frame).expect("drained");
    assert!(child_ran.load(Ordering::SeqCst));
}

#[test]
fn test_frame_errors() {
    let (pool, _) = start_pool(config(1));
    let frame0 = current_frame(pool.handle());
    let noop = || item("noop", |_ctx| {});

    take_frame_commands(pool.handle(), &frame0).expect("take");
    assert!(matches!(
        add_foreground_work(pool.handle(), &frame0, noop()),
        Err(EngineError::FrameAlreadySubmitted { frame: 0 })
    ));
    assert!(matches!(
        take_frame_commands(pool.handle(), &frame0),
        Err(EngineError::FrameAlreadySubmitted { frame: 0 })
    ));

    let future_frame = FrameContext::for_index(5, 2);
    assert!(matches!(
        add_foreground_work(pool.handle(), &future_frame, noop()),
        Err(EngineError::FrameNotBegun { frame: 5, open: 0 })
    ));

    let wrong_rotation = FrameContext::for_index(0, 3);
    assert!(matches!(
        add_foreground_work(pool.handle(), &wrong_rotation, noop()),
        Err(EngineError::FrameSlotOutOfRange { .. })
    ));

    let frame2 = begin_frame(pool.handle(), 2).expect("frame 2");
    assert_eq!(frame2.slot, frame0.slot);
    assert!(matches!(
        add_foreground_work(pool.handle(), &frame0, noop()),
        Err(EngineError::StaleFrame {
            requested: 0,
            current: 2
        })
    ));
    assert!(matches!(
        begin_frame(pool.handle(), 1),
        Err(EngineError::StaleFrame { .. })
    ));
}

#[test]
fn test_begin_frame_waits_for_previous_slot_user() {
    let (pool, _) = start_pool(SchedulerConfig {
        frames_in_flight: 1,
        ..config(1)
    });
    let frame0 = current_frame(pool.handle());
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);

    add_foreground_work(
        pool.handle(),
        &frame0,
        item("long_upload", move |_ctx| {
            let _ = release_rx.recv();
        }),
    )
    .expect("enqueue");

    let opened = Arc::new(AtomicBool::new(false));
    let handle = pool.handle().clone();
    let opened_flag = Arc::clone(&opened);
    let opener = thread::spawn(move || {
        let frame = begin_frame(&handle, 1);
        opened_flag.store(true, Ordering::SeqCst);
        frame
    });

    thread::sleep(Duration::from_millis(30));
    assert!(!opened.load(Ordering::SeqCst));
    release_tx.send(()).expect("release");

    let frame1 = opener.join().expect("join").expect("frame 1");
    assert_eq!(frame1.index, 1);
    assert_eq!(current_frame(pool.handle()), frame1);
}

#[test]
fn test_background_output_goes_to_open_frame() {
    let (pool, _) = start_pool(config(1));
    let frame0 = current_frame(pool.handle());
    let log = Arc::new(Mutex::new(Vec::new()));

    add_background_work(pool.handle(), recording("far_lod_0", CommandCategory::Shadow, &log))
        .expect("enqueue");
    wait_until("publication", || pool_stats(pool.handle()).published == 1);

    let commands = take_frame_commands(pool.handle(), &frame0).expect("take");
    assert_eq!(labels(&commands, CommandCategory::Shadow), vec!["far_lod_0"]);
}

#[test]
fn test_background_output_deferred_after_take() {
    let (pool, _) = start_pool(config(1));
    let frame0 = current_frame(pool.handle());
    take_frame_commands(pool.handle(), &frame0).expect("take");
    let log = Arc::new(Mutex::new(Vec::new()));

    add_background_work(pool.handle(), recording("far_lod_1", CommandCategory::Particle, &log))
        .expect("enqueue");
    wait_until("deferral", || pool_stats(pool.handle()).deferred == 1);

    let frame1 = begin_next_frame(pool.handle()).expect("frame 1");
    assert_eq!(pool_stats(pool.handle()).deferred, 0);
    let commands = take_frame_commands(pool.handle(), &frame1).expect("take");
    assert_eq!(labels(&commands, CommandCategory::Particle), vec!["far_lod_1"]);
}

#[test]
fn test_panicking_item_poisons_pool() {
    let (pool, _) = start_pool(config(2));
    let frame = current_frame(pool.handle());

    add_foreground_work(
        pool.handle(),
        &frame,
        item("broken", |_ctx| panic!("target mesh missing")),
    )
    .expect("enqueue");

    match wait_foreground_drained(pool.handle(), &frame) {
        Err(EngineError::PoolPoisoned { reason }) => {
            assert!(reason.contains("broken"));
            assert!(reason.contains("target mesh missing"));
        }
        other => panic!("expected poisoned pool, got {:?}", other),
    }
    assert!(is_poisoned(pool.handle()));
    assert!(matches!(
        add_background_work(pool.handle(), item("late", |_ctx| {})),
        Err(EngineError::PoolPoisoned { .. })
    ));
}

#[test]
fn test_nan_child_poisons_pool() {
    let (pool, _) = start_pool(config(1));
    let frame = current_frame(pool.handle());

    add_foreground_work(
        pool.handle(),
        &frame,
        item("cull_chunks", |ctx| {
            ctx.add_work(prioritized("draw_chunk", f32::NAN, |_ctx| {}));
        }),
    )
    .expect("enqueue");

    match wait_foreground_drained(pool.handle(), &frame) {
        Err(EngineError::PoolPoisoned { reason }) => {
            assert!(reason.contains("cull_chunks"));
            assert!(reason.contains("NaN priority"));
        }
        other => panic!("expected poisoned pool, got {:?}", other),
    }
    let stats = pool_stats(pool.handle());
    assert!(stats.poisoned);
    assert_eq!(stats.running, 0);
    assert!(matches!(
        begin_next_frame(pool.handle()),
        Err(EngineError::PoolPoisoned { .. })
    ));
}

#[test]
fn test_batch_with_nan_priority_queues_nothing() {
    let (pool, _) = start_pool(SchedulerConfig {
        start_paused: true,
        ..config(1)
    });
    let frame = current_frame(pool.handle());

    let batch = vec![
        item("mesh_0", |_ctx| {}),
        prioritized("mesh_1", f32::NAN, |_ctx| {}),
        item("mesh_2", |_ctx| {}),
    ];
    match add_foreground_batch(pool.handle(), &frame, batch) {
        Err(EngineError::InvalidPriority { work }) => assert_eq!(work, "mesh_1"),
        other => panic!("expected an invalid priority, got {:?}", other),
    }

    let background = vec![item("far_lod", |_ctx| {}), prioritized("prefetch", f32::NAN, |_ctx| {})];
    assert!(matches!(
        add_background_batch(pool.handle(), background),
        Err(EngineError::InvalidPriority { .. })
    ));

    let stage: Work<HeadlessBackend> = DependencyAggregator::new(vec![
        item("skin_0", |_ctx| {}),
        prioritized("skin_1", f32::NAN, |_ctx| {}),
    ])
    .into();
    assert!(matches!(
        add_foreground_work(pool.handle(), &frame, stage),
        Err(EngineError::InvalidPriority { work }) if work == "skin_1"
    ));
    assert!(matches!(
        add_pinned_work(pool.handle(), WorkerId::new(0), prioritized("upload", f32::NAN, |_ctx| {})),
        Err(EngineError::InvalidPriority { .. })
    ));

    let stats = pool_stats(pool.handle());
    assert_eq!(stats.queued_foreground, 0);
    assert_eq!(stats.queued_background, 0);
    assert_eq!(stats.queued_pinned, 0);
    assert_eq!(stats.outstanding_per_slot, vec![0, 0]);
    wait_foreground_drained(pool.handle(), &frame).expect("nothing was tracked");
}

#[test]
fn test_gpu_failure_in_process_is_fatal() {
    let (pool, backend) = start_pool(config(1));
    backend.fail_recordings_matching("upload");
    let frame = current_frame(pool.handle());

    add_foreground_work(
        pool.handle(),
        &frame,
        item("texture", |ctx| {
            ctx.record(CommandCategory::GraphicsPrimary, "upload_texture", |_e| {});
        }),
    )
    .expect("enqueue");

    match wait_foreground_drained(pool.handle(), &frame) {
        Err(EngineError::PoolPoisoned { reason }) => assert!(reason.contains("upload_texture")),
        other => panic!("expected poisoned pool, got {:?}", other),
    }
}

#[test]
fn test_double_fill_is_invariant_violation() {
    let (pool, _) = start_pool(config(1));
    let frame = current_frame(pool.handle());

    add_foreground_work(
        pool.handle(),
        &frame,
        item("twice", |ctx| {
            ctx.record(CommandCategory::Shadow, "shadow_a", |_e| {});
            ctx.record(CommandCategory::Shadow, "shadow_b", |_e| {});
        }),
    )
    .expect("enqueue");

    match wait_foreground_drained(pool.handle(), &frame) {
        Err(EngineError::PoolPoisoned { reason }) => {
            assert!(reason.contains("invariant violated"))
        }
        other => panic!("expected poisoned pool, got {:?}", other),
    }
}

struct DropCounter {
    processed: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
}

impl WorkItem<HeadlessBackend> for DropCounter {
    fn process(self: Box<Self>, _ctx: &mut Ctx<'_>) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_shutdown_drops_queued_work() {
    let (mut pool, _) = start_pool(SchedulerConfig {
        start_paused: true,
        ..config(2)
    });
    let handle = pool.handle().clone();
    let processed = Arc::new(AtomicUsize::new(0));
    let dropped = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        add_background_work(
            &handle,
            Work::item(DropCounter {
                processed: Arc::clone(&processed),
                dropped: Arc::clone(&dropped),
            }),
        )
        .expect("enqueue");
    }

    shutdown_worker_pool(&mut pool);
    assert_eq!(processed.load(Ordering::SeqCst), 0);
    assert_eq!(dropped.load(Ordering::SeqCst), 3);
    assert!(matches!(
        add_background_work(&handle, item("late", |_ctx| {})),
        Err(EngineError::PoolShutDown)
    ));
    assert!(matches!(
        begin_next_frame(&handle),
        Err(EngineError::PoolShutDown)
    ));

    // Idempotent, and Drop runs it again
    shutdown_worker_pool(&mut pool);
}

#[test]
fn test_pinned_work_runs_on_its_worker() {
    let (pool, _) = start_pool(config(3));
    let ran_on = Arc::new(Mutex::new(None));

    let seen = Arc::clone(&ran_on);
    add_pinned_work(
        pool.handle(),
        WorkerId::new(2),
        item("pinned", move |ctx| {
            *seen.lock() = Some((ctx.worker_id(), current_worker()));
        }),
    )
    .expect("enqueue");
    let frame = current_frame(pool.handle());
    wait_foreground_drained(pool.handle(), &frame).expect("drained");

    assert_eq!(
        *ran_on.lock(),
        Some((WorkerId::new(2), Some(WorkerId::new(2))))
    );
    assert!(matches!(
        add_pinned_work(pool.handle(), WorkerId::new(3), item("nowhere", |_ctx| {})),
        Err(EngineError::ResourceNotFound { .. })
    ));
}

#[test]
fn test_record_off_worker_is_rejected() {
    init_logging();
    assert_eq!(current_worker(), None);
    let result = record_on_current_worker::<HeadlessBackend, _>(
        CommandCategory::ComputePrimary,
        "not_here",
        |_e| {},
    );
    assert!(matches!(result, Err(EngineError::NotOnWorkerThread)));
}

#[test]
fn test_record_inside_process_uses_context_pools() {
    let (pool, _) = start_pool(config(1));
    let frame = current_frame(pool.handle());
    let outcome = Arc::new(Mutex::new(None));

    let seen = Arc::clone(&outcome);
    add_foreground_work(
        pool.handle(),
        &frame,
        item("nested", move |ctx| {
            let nested = record_on_current_worker::<HeadlessBackend, _>(
                CommandCategory::GraphicsPrimary,
                "nested",
                |_e| {},
            );
            *seen.lock() = Some(matches!(nested, Err(EngineError::Internal { .. })));
            let set = ctx.descriptor_pool_mut().allocate_set();
            assert_eq!(set, Ok(0));
        }),
    )
    .expect("enqueue");

    wait_foreground_drained(pool.handle(), &frame).expect("drained");
    assert_eq!(*outcome.lock(), Some(true));
}

#[test]
fn test_stats_and_pause() {
    let (pool, backend) = start_pool(SchedulerConfig {
        start_paused: true,
        ..config(2)
    });
    assert_eq!(worker_count(pool.handle()), 2);
    assert_eq!(backend.pools_created(), 4);

    let frame = current_frame(pool.handle());
    let batch: Vec<Work<HeadlessBackend>> = (0..6).map(|_| item("idle", |_ctx| {})).collect();
    add_foreground_batch(pool.handle(), &frame, batch).expect("enqueue");
    add_background_work(pool.handle(), item("bg", |_ctx| {})).expect("enqueue");

    let stats = pool_stats(pool.handle());
    assert!(stats.paused);
    assert_eq!(stats.queued_foreground, 6);
    assert_eq!(stats.queued_background, 1);
    assert_eq!(stats.outstanding_per_slot, vec![6, 0]);

    resume_workers(pool.handle());
    wait_foreground_drained(pool.handle(), &frame).expect("drained");
    wait_until("background item", || pool_stats(pool.handle()).executed == 7);
    let stats = pool_stats(pool.handle());
    assert_eq!(stats.outstanding_per_slot, vec![0, 0]);
    assert!(!stats.poisoned);

    pause_workers(pool.handle());
    assert!(pool_stats(pool.handle()).paused);
}

#[test]
fn test_invalid_config_rejected() {
    init_logging();
    let result = create_worker_pool(
        SchedulerConfig {
            frames_in_flight: 9,
            ..config(1)
        },
        Arc::new(HeadlessBackend::new()),
    );
    assert!(matches!(result, Err(EngineError::InvalidConfig { .. })));
}
