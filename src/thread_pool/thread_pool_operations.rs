//! Worker Pool Operations - DOP Functions
//!
//! Everything that touches `PoolState` takes the pool lock, does its work and
//! releases it before any queued work is dropped, so a dropped item can never
//! re-enter the pool while the lock is held.

use super::thread_pool_data::{
    DeferredCommand, PoolShared, PoolState, WorkOutput, WorkerId, WorkerPoolData,
    WorkerPoolHandle, WorkerPoolStats,
};
use super::work_item::{QueueTier, Work};
use super::work_queue::{drain_queues, QueuedWork};
use super::worker_thread::spawn_worker;
use crate::config::SchedulerConfig;
use crate::error::{EngineError, EngineResult};
use crate::frame::frame_data::SlotState;
use crate::frame::frame_operations::{
    create_slot_states, publish_into_slot, recycle_slot, take_slot_commands,
};
use crate::frame::{frame_for_index, FrameCommands, FrameContext, PublishedCommand};
use crate::gpu::{CommandCategory, GpuBackend};
use crate::panic_handler::invariant_violation;
use crate::task::TaskRunnable;
use parking_lot::{Condvar, Mutex};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::thread;

/// Start a pool of worker threads on `backend`.
///
/// Every worker has created its GPU pools by the time this returns. If any
/// worker fails to start, the ones already running are shut down again.
pub fn create_worker_pool<B: GpuBackend>(
    config: SchedulerConfig,
    backend: Arc<B>,
) -> EngineResult<WorkerPoolData<B>> {
    config.validate()?;
    let worker_count = config.resolved_worker_count();
    let frames_in_flight = config.frames_in_flight;
    let start_paused = config.start_paused;

    let open_frame = frame_for_index(0, frames_in_flight);
    let mut slots = create_slot_states(frames_in_flight);
    recycle_slot(&mut slots[open_frame.slot.index()], open_frame);

    let shared = Arc::new(PoolShared {
        config,
        worker_count,
        backend,
        state: Mutex::new(PoolState {
            foreground: BinaryHeap::new(),
            background: BinaryHeap::new(),
            pinned: (0..worker_count).map(|_| VecDeque::new()).collect(),
            slots,
            open_frame,
            deferred: Vec::new(),
            next_sequence: 0,
            next_publication: 0,
            running: 0,
            executed: 0,
            published: 0,
            paused: start_paused,
            shutting_down: false,
            poisoned: None,
        }),
        work_available: Condvar::new(),
        frame_progress: Condvar::new(),
    });

    let mut pool = WorkerPoolData {
        handle: WorkerPoolHandle { shared },
        threads: Vec::with_capacity(worker_count),
    };

    for index in 0..worker_count {
        // On error `pool` is dropped here, which joins the started workers
        let thread = spawn_worker(&pool.handle.shared, WorkerId::new(index))?;
        pool.threads.push(thread);
    }

    log::info!(
        "[WorkerPool::create] Started {} workers, {} frames in flight{}",
        worker_count,
        frames_in_flight,
        if start_paused { " (paused)" } else { "" }
    );
    Ok(pool)
}

/// Queue foreground work that must retire before `frame` is submitted
pub fn add_foreground_work<B: GpuBackend>(
    pool: &WorkerPoolHandle<B>,
    frame: &FrameContext,
    work: impl Into<Work<B>>,
) -> EngineResult<()> {
    add_foreground_batch(pool, frame, std::iter::once(work.into())).map(|_| ())
}

/// Queue a batch of foreground work for `frame`, all or nothing
pub fn add_foreground_batch<B: GpuBackend>(
    pool: &WorkerPoolHandle<B>,
    frame: &FrameContext,
    batch: impl IntoIterator<Item = Work<B>>,
) -> EngineResult<usize> {
    let shared = &pool.shared;
    let batch = checked_batch(shared, batch)?;
    let mut state = shared.state.lock();
    check_accepting(&state)?;
    let slot = frame_slot(&mut state, frame, shared.config.frames_in_flight)?;
    if slot.taken {
        return Err(EngineError::FrameAlreadySubmitted { frame: frame.index });
    }

    let mut count = 0;
    for work in batch {
        push_work(&mut state, shared, work, Some(*frame), QueueTier::Foreground);
        count += 1;
    }
    drop(state);

    notify_queued(shared, count);
    Ok(count)
}

/// Queue opportunistic work; its output lands in whichever frame is open when it retires
pub fn add_background_work<B: GpuBackend>(
    pool: &WorkerPoolHandle<B>,
    work: impl Into<Work<B>>,
) -> EngineResult<()> {
    add_background_batch(pool, std::iter::once(work.into())).map(|_| ())
}

/// Queue a batch of background work, all or nothing
pub fn add_background_batch<B: GpuBackend>(
    pool: &WorkerPoolHandle<B>,
    batch: impl IntoIterator<Item = Work<B>>,
) -> EngineResult<usize> {
    let shared = &pool.shared;
    let batch = checked_batch(shared, batch)?;
    let mut state = shared.state.lock();
    check_accepting(&state)?;

    let mut count = 0;
    for work in batch {
        push_work(&mut state, shared, work, None, QueueTier::Background);
        count += 1;
    }
    drop(state);

    notify_queued(shared, count);
    Ok(count)
}

/// Queue work that only `worker` may run, ahead of the shared queues.
///
/// Tracked against the open frame unless that frame was already taken.
pub fn add_pinned_work<B: GpuBackend>(
    pool: &WorkerPoolHandle<B>,
    worker: WorkerId,
    work: impl Into<Work<B>>,
) -> EngineResult<()> {
    let shared = &pool.shared;
    if worker.index() >= shared.worker_count {
        return Err(EngineError::ResourceNotFound {
            resource_type: "worker".to_string(),
            id: worker.index().to_string(),
        });
    }

    let work = work.into();
    check_priority(&work, shared.config.resume_priority)?;

    let mut state = shared.state.lock();
    check_accepting(&state)?;
    let frame = accepting_open_frame(&state);
    push_pinned(&mut state, shared, worker, work, frame);
    drop(state);

    shared.work_available.notify_all();
    Ok(())
}

/// Queue the resumption of a task, on `pinned` if given
pub(crate) fn add_resume_work<B: GpuBackend>(
    pool: &WorkerPoolHandle<B>,
    runnable: TaskRunnable,
    pinned: Option<WorkerId>,
) -> EngineResult<()> {
    match pinned {
        Some(worker) => add_pinned_work(pool, worker, runnable),
        None => {
            let shared = &pool.shared;
            let mut state = shared.state.lock();
            check_accepting(&state)?;
            let frame = accepting_open_frame(&state);
            push_work(&mut state, shared, runnable.into(), frame, QueueTier::Foreground);
            drop(state);

            shared.work_available.notify_one();
            Ok(())
        }
    }
}

/// The frame that is currently open
pub fn current_frame<B: GpuBackend>(pool: &WorkerPoolHandle<B>) -> FrameContext {
    pool.shared.state.lock().open_frame
}

/// Open frame `index`.
///
/// Blocks until the earlier frame sharing its slot has no unretired foreground
/// work, then recycles the slot. Buffers the earlier frame never took are
/// discarded. Background output that retired while no frame could accept it
/// is published into the new frame.
pub fn begin_frame<B: GpuBackend>(
    pool: &WorkerPoolHandle<B>,
    index: u64,
) -> EngineResult<FrameContext> {
    let shared = &pool.shared;
    let frame = frame_for_index(index, shared.config.frames_in_flight);
    let mut state = shared.state.lock();

    loop {
        check_accepting(&state)?;
        if index <= state.open_frame.index {
            return Err(EngineError::StaleFrame {
                requested: index,
                current: state.open_frame.index,
            });
        }
        if state.slots[frame.slot.index()].outstanding == 0 {
            break;
        }
        log::debug!(
            "[WorkerPool::begin_frame] {} waiting for {} items of the previous frame in {}",
            frame,
            state.slots[frame.slot.index()].outstanding,
            frame.slot
        );
        shared.frame_progress.wait(&mut state);
    }

    let state = &mut *state;
    let discarded = recycle_slot(&mut state.slots[frame.slot.index()], frame);
    if discarded > 0 {
        log::warn!(
            "[WorkerPool::begin_frame] Discarded {} command buffers never taken from {}",
            discarded,
            frame.slot
        );
    }
    state.open_frame = frame;

    let deferred = std::mem::take(&mut state.deferred);
    let moved = deferred.len();
    for DeferredCommand {
        buffer,
        category,
        worker,
    } in deferred
    {
        publish(state, frame, category, buffer, worker);
    }

    log::debug!(
        "[WorkerPool::begin_frame] Opened {}{}",
        frame,
        if moved > 0 {
            format!(" with {} deferred background buffers", moved)
        } else {
            String::new()
        }
    );
    Ok(frame)
}

/// Open the frame after the current one
pub fn begin_next_frame<B: GpuBackend>(pool: &WorkerPoolHandle<B>) -> EngineResult<FrameContext> {
    let next = current_frame(pool).index + 1;
    begin_frame(pool, next)
}

/// Block until all foreground work tracked against `frame` has retired.
///
/// Includes children and task resumptions queued while the frame was open.
/// Must not be called from a worker thread of the same pool.
pub fn wait_foreground_drained<B: GpuBackend>(
    pool: &WorkerPoolHandle<B>,
    frame: &FrameContext,
) -> EngineResult<()> {
    let shared = &pool.shared;
    let mut state = shared.state.lock();
    loop {
        if let Some(reason) = &state.poisoned {
            return Err(EngineError::PoolPoisoned {
                reason: reason.clone(),
            });
        }
        let slot = frame_slot(&mut state, frame, shared.config.frames_in_flight)?;
        if slot.outstanding == 0 {
            log::debug!("[WorkerPool::wait_foreground_drained] {} drained", frame);
            return Ok(());
        }
        if state.shutting_down {
            return Err(EngineError::PoolShutDown);
        }
        shared.frame_progress.wait(&mut state);
    }
}

/// Wait for `frame` to drain, then take its buffers for submission
pub fn take_frame_commands<B: GpuBackend>(
    pool: &WorkerPoolHandle<B>,
    frame: &FrameContext,
) -> EngineResult<FrameCommands<B::CommandBuffer>> {
    wait_foreground_drained(pool, frame)?;

    let shared = &pool.shared;
    let mut state = shared.state.lock();
    let slot = frame_slot(&mut state, frame, shared.config.frames_in_flight)?;
    if slot.taken {
        return Err(EngineError::FrameAlreadySubmitted { frame: frame.index });
    }
    let commands = take_slot_commands(slot, *frame);
    log::debug!(
        "[WorkerPool::take_frame_commands] Took {} buffers for {}",
        commands.len(),
        frame
    );
    Ok(commands)
}

/// Let workers finish their current item, then idle until resumed
pub fn pause_workers<B: GpuBackend>(pool: &WorkerPoolHandle<B>) {
    pool.shared.state.lock().paused = true;
    log::info!("[WorkerPool::pause] Workers paused");
}

pub fn resume_workers<B: GpuBackend>(pool: &WorkerPoolHandle<B>) {
    pool.shared.state.lock().paused = false;
    pool.shared.work_available.notify_all();
    log::info!("[WorkerPool::resume] Workers resumed");
}

pub fn pool_stats<B: GpuBackend>(pool: &WorkerPoolHandle<B>) -> WorkerPoolStats {
    let state = pool.shared.state.lock();
    WorkerPoolStats {
        workers: pool.shared.worker_count,
        queued_foreground: state.foreground.len(),
        queued_background: state.background.len(),
        queued_pinned: state.pinned.iter().map(VecDeque::len).sum(),
        running: state.running,
        executed: state.executed,
        published: state.published,
        deferred: state.deferred.len(),
        outstanding_per_slot: state.slots.iter().map(|slot| slot.outstanding).collect(),
        open_frame: state.open_frame,
        paused: state.paused,
        poisoned: state.poisoned.is_some(),
    }
}

pub fn worker_count<B: GpuBackend>(pool: &WorkerPoolHandle<B>) -> usize {
    pool.shared.worker_count
}

pub fn is_poisoned<B: GpuBackend>(pool: &WorkerPoolHandle<B>) -> bool {
    pool.shared.state.lock().poisoned.is_some()
}

/// Signal every worker to exit and join them. Queued work is dropped unexecuted.
pub fn shutdown_worker_pool<B: GpuBackend>(pool: &mut WorkerPoolData<B>) {
    let shared = Arc::clone(&pool.handle.shared);
    let (first, dropped) = {
        let mut state = shared.state.lock();
        let first = !state.shutting_down;
        state.shutting_down = true;
        (first, drain_queues(&mut state))
    };
    shared.work_available.notify_all();
    shared.frame_progress.notify_all();

    if first {
        log::info!(
            "[WorkerPool::shutdown] Stopping {} workers, dropping {} queued items",
            pool.threads.len(),
            dropped.len()
        );
    }
    drop(dropped);

    let current = thread::current().id();
    for worker in pool.threads.iter_mut() {
        let Some(join_handle) = worker.join_handle.take() else {
            continue;
        };
        if join_handle.thread().id() == current {
            log::warn!(
                "[WorkerPool::shutdown] {} is shutting down its own pool; not joining itself",
                worker.id
            );
            continue;
        }
        match join_handle.join() {
            Ok(()) => log::debug!("[WorkerPool::shutdown] Joined {}", worker.id),
            Err(_) => log::warn!("[WorkerPool::shutdown] {} terminated by a panic", worker.id),
        }
    }
    pool.threads.clear();
}

impl<B: GpuBackend> Drop for WorkerPoolData<B> {
    fn drop(&mut self) {
        shutdown_worker_pool(self);
    }
}

/// Apply what an executed item produced, in order: publish its buffers,
/// queue its children, then retire it from its frame.
///
/// Children are queued after the parent's buffers are published, so no child
/// buffer can precede its parent's in a bucket.
pub(crate) fn retire_work<B: GpuBackend>(
    pool: &WorkerPoolHandle<B>,
    worker: WorkerId,
    tracked_frame: Option<FrameContext>,
    output: WorkOutput<B>,
) {
    let shared = &pool.shared;
    let WorkOutput { outputs, children } = output;
    let mut rejected = Vec::new();

    let mut guard = shared.state.lock();
    let state = &mut *guard;
    if let Some(frame) = tracked_frame {
        let slot = &state.slots[frame.slot.index()];
        if slot.frame != Some(frame) || slot.outstanding == 0 {
            invariant_violation(format!("{} retired work it was not tracking", frame));
        }
    }

    let target = tracked_frame.or_else(|| accepting_open_frame(state));
    for (category, buffer) in CommandCategory::ALL.into_iter().zip(outputs) {
        let Some(buffer) = buffer else { continue };
        match target {
            Some(frame) => publish(state, frame, category, buffer, worker),
            None => state.deferred.push(DeferredCommand {
                buffer,
                category,
                worker,
            }),
        }
    }

    let accepting = state.poisoned.is_none() && !state.shutting_down;
    let queued = children.len();
    for (work, tier) in children {
        if !accepting {
            rejected.push(work);
            continue;
        }
        let frame = match tier {
            QueueTier::Foreground => tracked_frame.or_else(|| accepting_open_frame(state)),
            QueueTier::Background => None,
        };
        push_work(state, shared, work, frame, tier);
    }

    if let Some(frame) = tracked_frame {
        let slot = &mut state.slots[frame.slot.index()];
        slot.outstanding -= 1;
        if slot.outstanding == 0 {
            shared.frame_progress.notify_all();
        }
    }
    state.running = state.running.saturating_sub(1);
    state.executed += 1;
    drop(guard);

    if accepting {
        notify_queued(shared, queued);
    } else if !rejected.is_empty() {
        log::debug!(
            "[WorkerPool::retire] Dropping {} children of work retired after shutdown",
            rejected.len()
        );
    }
}

/// Stop the pool after a worker panicked under `FatalAction::Poison`
pub(crate) fn poison_pool<B: GpuBackend>(pool: &WorkerPoolHandle<B>, reason: String) {
    let shared = &pool.shared;
    log::error!("[WorkerPool::poison] {}", reason);
    let dropped = {
        let mut state = shared.state.lock();
        state.running = state.running.saturating_sub(1);
        if state.poisoned.is_none() {
            state.poisoned = Some(reason);
        }
        drain_queues(&mut state)
    };
    shared.work_available.notify_all();
    shared.frame_progress.notify_all();
    drop(dropped);
}

/// Reject work whose priority cannot be ordered, including an aggregator's batch
pub(crate) fn check_priority<B: GpuBackend>(work: &Work<B>, resume_priority: f32) -> EngineResult<()> {
    if work.priority(resume_priority).is_nan() {
        return Err(EngineError::InvalidPriority {
            work: work.name().to_string(),
        });
    }
    if let Work::Aggregate(aggregator) = work {
        for child in aggregator.children() {
            check_priority(child, resume_priority)?;
        }
    }
    Ok(())
}

/// Collect `batch`, failing before anything is queued if one item is invalid
fn checked_batch<B: GpuBackend>(
    shared: &PoolShared<B>,
    batch: impl IntoIterator<Item = Work<B>>,
) -> EngineResult<Vec<Work<B>>> {
    let batch: Vec<Work<B>> = batch.into_iter().collect();
    for work in &batch {
        check_priority(work, shared.config.resume_priority)?;
    }
    Ok(batch)
}

fn check_accepting<B: GpuBackend>(state: &PoolState<B>) -> EngineResult<()> {
    if let Some(reason) = &state.poisoned {
        return Err(EngineError::PoolPoisoned {
            reason: reason.clone(),
        });
    }
    if state.shutting_down {
        return Err(EngineError::PoolShutDown);
    }
    Ok(())
}

/// The slot `frame` lives in, if it still belongs to `frame`
fn frame_slot<'s, B: GpuBackend>(
    state: &'s mut PoolState<B>,
    frame: &FrameContext,
    frames_in_flight: usize,
) -> EngineResult<&'s mut SlotState<B::CommandBuffer>> {
    if frame.frames_in_flight != frames_in_flight || frame.slot.index() >= frames_in_flight {
        return Err(EngineError::FrameSlotOutOfRange {
            slot: frame.slot.index(),
            frames_in_flight,
        });
    }
    let open = state.open_frame.index;
    let slot = &mut state.slots[frame.slot.index()];
    match slot.frame {
        Some(current) if current == *frame => Ok(slot),
        Some(current) if current.index > frame.index => Err(EngineError::StaleFrame {
            requested: frame.index,
            current: current.index,
        }),
        _ => Err(EngineError::FrameNotBegun {
            frame: frame.index,
            open,
        }),
    }
}

/// The open frame, if it can still take output
fn accepting_open_frame<B: GpuBackend>(state: &PoolState<B>) -> Option<FrameContext> {
    let open = state.open_frame;
    let slot = &state.slots[open.slot.index()];
    (slot.frame == Some(open) && !slot.taken).then_some(open)
}

fn next_queued<B: GpuBackend>(
    state: &mut PoolState<B>,
    shared: &PoolShared<B>,
    work: Work<B>,
    frame: Option<FrameContext>,
) -> QueuedWork<B> {
    let priority = work.priority(shared.config.resume_priority);
    if priority.is_nan() {
        invariant_violation(format!("'{}' has a NaN priority", work.name()));
    }
    if let Some(frame) = frame {
        state.slots[frame.slot.index()].outstanding += 1;
    }
    let sequence = state.next_sequence;
    state.next_sequence += 1;
    log::trace!(
        "[WorkerPool::enqueue] '{}' priority {} seq {}{}",
        work.name(),
        priority,
        sequence,
        frame.map(|f| format!(" for {}", f)).unwrap_or_default()
    );
    QueuedWork {
        work,
        priority,
        sequence,
        tracked_frame: frame,
    }
}

fn push_work<B: GpuBackend>(
    state: &mut PoolState<B>,
    shared: &PoolShared<B>,
    work: Work<B>,
    frame: Option<FrameContext>,
    tier: QueueTier,
) {
    let queued = next_queued(state, shared, work, frame);
    match tier {
        QueueTier::Foreground => state.foreground.push(queued),
        QueueTier::Background => state.background.push(queued),
    }
}

fn push_pinned<B: GpuBackend>(
    state: &mut PoolState<B>,
    shared: &PoolShared<B>,
    worker: WorkerId,
    work: Work<B>,
    frame: Option<FrameContext>,
) {
    let queued = next_queued(state, shared, work, frame);
    state.pinned[worker.index()].push_back(queued);
}

fn publish<B: GpuBackend>(
    state: &mut PoolState<B>,
    frame: FrameContext,
    category: CommandCategory,
    buffer: B::CommandBuffer,
    worker: WorkerId,
) {
    let sequence = state.next_publication;
    state.next_publication += 1;
    state.published += 1;
    publish_into_slot(
        &mut state.slots[frame.slot.index()],
        PublishedCommand {
            buffer,
            category,
            frame,
            worker,
            sequence,
        },
    );
}

fn notify_queued<B: GpuBackend>(shared: &PoolShared<B>, count: usize) {
    match count {
        0 => {}
        1 => {
            shared.work_available.notify_one();
        }
        _ => {
            shared.work_available.notify_all();
        }
    }
}
