//! Worker threads
//!
//! Each worker creates its graphics pool, compute pool and descriptor pool on
//! its own thread and keeps them in thread-local storage for its whole life.
//! Nothing else can reach them, which is what makes recording lock-free.

use super::thread_pool_data::{PoolShared, WorkOutput, WorkerId, WorkerPoolHandle, WorkerThread};
use super::thread_pool_operations::{check_priority, poison_pool, retire_work};
use super::work_item::{QueueTier, Work};
use super::work_queue::{pop_next, QueuedWork};
use crate::error::{EngineError, EngineResult, ErrorContext, OptionExt};
use crate::frame::FrameContext;
use crate::gpu::{CommandCategory, GpuBackend, GpuResult, QueueKind};
use crate::panic_handler::{abort_process, fatal, invariant_violation, panic_message, FatalAction};
use crossbeam_channel::{bounded, Sender};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

/// GPU pools owned by one worker thread
pub struct WorkerGpuPools<B: GpuBackend> {
    pub graphics: B::CommandPool,
    pub compute: B::CommandPool,
    pub descriptors: B::DescriptorPool,
}

impl<B: GpuBackend> WorkerGpuPools<B> {
    fn create(backend: &B, worker: WorkerId) -> GpuResult<Self> {
        Ok(Self {
            graphics: backend.create_command_pool(worker, QueueKind::Graphics)?,
            compute: backend.create_command_pool(worker, QueueKind::Compute)?,
            descriptors: backend.create_descriptor_pool(worker)?,
        })
    }

    pub fn command_pool_mut(&mut self, queue: QueueKind) -> &mut B::CommandPool {
        match queue {
            QueueKind::Graphics => &mut self.graphics,
            QueueKind::Compute => &mut self.compute,
        }
    }
}

struct WorkerLocal<B: GpuBackend> {
    backend: Arc<B>,
    pools: WorkerGpuPools<B>,
}

thread_local! {
    static CURRENT_WORKER: Cell<Option<WorkerId>> = const { Cell::new(None) };
    static WORKER_POOLS: RefCell<Option<Box<dyn Any>>> = const { RefCell::new(None) };
}

/// The pool worker running on this thread, if any
pub fn current_worker() -> Option<WorkerId> {
    CURRENT_WORKER.with(Cell::get)
}

fn record_with_pools<B, F>(
    backend: &B,
    pools: &mut WorkerGpuPools<B>,
    category: CommandCategory,
    label: &str,
    f: F,
) -> GpuResult<B::CommandBuffer>
where
    B: GpuBackend,
    F: FnOnce(&mut B::Encoder),
{
    let pool = pools.command_pool_mut(category.queue());
    let mut encoder = backend.begin_commands(pool, label)?;
    f(&mut encoder);
    backend.finish_commands(pool, encoder)
}

/// Record a command buffer with the current worker's pools.
///
/// For task steps resumed on a worker (see `PoolScheduler::pinned`). Work
/// items record through `WorkerContext::record` instead; calling this from
/// inside `process` fails because the item already holds the pools.
pub fn record_on_current_worker<B, F>(
    category: CommandCategory,
    label: &str,
    f: F,
) -> EngineResult<B::CommandBuffer>
where
    B: GpuBackend,
    F: FnOnce(&mut B::Encoder),
{
    WORKER_POOLS.with(|cell| {
        let mut guard = cell
            .try_borrow_mut()
            .context("worker pools are held by the running work item")?;
        let local = guard
            .as_mut()
            .and_then(|local| local.downcast_mut::<WorkerLocal<B>>())
            .ok_or_engine(|| EngineError::NotOnWorkerThread)?;
        let WorkerLocal { backend, pools } = local;
        record_with_pools(backend.as_ref(), pools, category, label, f).map_err(EngineError::from)
    })
}

/// Run `f` with this worker's backend and pools
fn with_worker_pools<B, R>(f: impl FnOnce(&B, &mut WorkerGpuPools<B>) -> R) -> R
where
    B: GpuBackend,
{
    WORKER_POOLS.with(|cell| {
        let mut guard = cell.borrow_mut();
        match guard
            .as_mut()
            .and_then(|local| local.downcast_mut::<WorkerLocal<B>>())
        {
            Some(WorkerLocal { backend, pools }) => f(backend.as_ref(), pools),
            None => invariant_violation("work item executed on a thread without worker pools"),
        }
    })
}

/// What `WorkItem::process` sees of the executing worker
pub struct WorkerContext<'a, B: GpuBackend> {
    worker: WorkerId,
    frame: Option<FrameContext>,
    item_name: &'a str,
    backend: &'a B,
    pools: &'a mut WorkerGpuPools<B>,
    pool: &'a WorkerPoolHandle<B>,
    output: WorkOutput<B>,
}

impl<'a, B: GpuBackend> WorkerContext<'a, B> {
    pub fn worker_id(&self) -> WorkerId {
        self.worker
    }

    /// Frame this item's output is published into.
    ///
    /// `None` for background work, which publishes into whichever frame is
    /// open when it retires.
    pub fn frame(&self) -> Option<FrameContext> {
        self.frame
    }

    pub fn backend(&self) -> &B {
        self.backend
    }

    /// The pool running this item, for spawning tasks or queueing unrelated work
    pub fn pool(&self) -> &WorkerPoolHandle<B> {
        self.pool
    }

    pub fn descriptor_pool_mut(&mut self) -> &mut B::DescriptorPool {
        &mut self.pools.descriptors
    }

    /// Record the buffer for `category` with this worker's pools.
    ///
    /// Each category is filled at most once per execution. A GPU failure is
    /// fatal.
    pub fn record<F>(&mut self, category: CommandCategory, label: &str, f: F)
    where
        F: FnOnce(&mut B::Encoder),
    {
        self.assert_unfilled(category);
        match record_with_pools(self.backend, self.pools, category, label, f) {
            Ok(buffer) => self.output.outputs[category.index()] = Some(buffer),
            Err(error) => fatal(&format!("recording '{}' for {}", label, self.item_name), &error),
        }
    }

    /// Fill `category` with a buffer finished elsewhere on this thread
    pub fn set_command_buffer(&mut self, category: CommandCategory, buffer: B::CommandBuffer) {
        self.assert_unfilled(category);
        self.output.outputs[category.index()] = Some(buffer);
    }

    pub fn is_filled(&self, category: CommandCategory) -> bool {
        self.output.outputs[category.index()].is_some()
    }

    /// Queue foreground work after this item retires
    pub fn add_work(&mut self, work: impl Into<Work<B>>) {
        self.push_child(work.into(), QueueTier::Foreground);
    }

    /// Queue background work after this item retires
    pub fn add_background_work(&mut self, work: impl Into<Work<B>>) {
        self.push_child(work.into(), QueueTier::Background);
    }

    fn push_child(&mut self, work: Work<B>, tier: QueueTier) {
        if let Err(e) = check_priority(&work, self.pool.shared.config.resume_priority) {
            invariant_violation(format!("'{}' queued a child: {}", self.item_name, e));
        }
        self.output.children.push((work, tier));
    }

    fn assert_unfilled(&self, category: CommandCategory) {
        if self.is_filled(category) {
            invariant_violation(format!(
                "'{}' filled its {} buffer twice",
                self.item_name,
                category.name()
            ));
        }
    }
}

/// Spawn worker `id` and wait until its pools exist
pub(crate) fn spawn_worker<B: GpuBackend>(
    shared: &Arc<PoolShared<B>>,
    id: WorkerId,
) -> EngineResult<WorkerThread> {
    let (ready_tx, ready_rx) = bounded(1);
    let thread_shared = Arc::clone(shared);
    let join_handle = thread::Builder::new()
        .name(format!("{}-{}", shared.config.thread_name_prefix, id.index()))
        .spawn(move || run_worker(thread_shared, id, ready_tx))
        .map_err(|e| EngineError::WorkerSpawnFailed {
            worker: id.index(),
            error: e.to_string(),
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(WorkerThread {
            id,
            join_handle: Some(join_handle),
        }),
        Ok(Err(error)) => {
            let _ = join_handle.join();
            Err(error)
        }
        Err(_) => {
            let _ = join_handle.join();
            Err(EngineError::WorkerSpawnFailed {
                worker: id.index(),
                error: "worker exited during startup".to_string(),
            })
        }
    }
}

fn run_worker<B: GpuBackend>(
    shared: Arc<PoolShared<B>>,
    worker: WorkerId,
    ready: Sender<EngineResult<()>>,
) {
    let pools = match WorkerGpuPools::create(shared.backend.as_ref(), worker) {
        Ok(pools) => pools,
        Err(e) => {
            log::error!("[WorkerThread::run] {} could not create GPU pools: {}", worker, e);
            let _ = ready.send(Err(EngineError::WorkerSpawnFailed {
                worker: worker.index(),
                error: e.to_string(),
            }));
            return;
        }
    };

    CURRENT_WORKER.with(|current| current.set(Some(worker)));
    WORKER_POOLS.with(|cell| {
        *cell.borrow_mut() = Some(Box::new(WorkerLocal {
            backend: Arc::clone(&shared.backend),
            pools,
        }));
    });
    let _ = ready.send(Ok(()));
    drop(ready);

    log::info!("[WorkerThread::run] {} started", worker);
    let handle = WorkerPoolHandle { shared };

    while let Some(queued) = next_work(&handle.shared, worker) {
        if !execute(&handle, worker, queued) {
            break;
        }
    }

    // Pools are destroyed on the thread that created them
    WORKER_POOLS.with(|cell| cell.borrow_mut().take());
    CURRENT_WORKER.with(|current| current.set(None));
    log::info!("[WorkerThread::run] {} exited", worker);
}

/// Block until there is work for `worker`, or return `None` when it must exit
fn next_work<B: GpuBackend>(shared: &PoolShared<B>, worker: WorkerId) -> Option<QueuedWork<B>> {
    let mut state = shared.state.lock();
    loop {
        if state.shutting_down || state.poisoned.is_some() {
            return None;
        }
        if !state.paused {
            if let Some(queued) = pop_next(&mut state, worker) {
                state.running += 1;
                return Some(queued);
            }
        }
        shared.work_available.wait(&mut state);
    }
}

/// Run one queued work to completion. Returns false if the worker must exit.
fn execute<B: GpuBackend>(
    handle: &WorkerPoolHandle<B>,
    worker: WorkerId,
    queued: QueuedWork<B>,
) -> bool {
    let QueuedWork {
        work,
        tracked_frame,
        ..
    } = queued;
    let name = work.name().to_string();
    log::trace!("[WorkerThread::execute] {} running '{}'", worker, name);

    // Retiring checks frame invariants too, so it unwinds into the same handler
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let output = run_work(handle, worker, work, tracked_frame, &name);
        retire_work(handle, worker, tracked_frame, output);
    }));

    match result {
        Ok(()) => true,
        Err(payload) => {
            let message = format!("'{}' panicked on {}: {}", name, worker, panic_message(payload.as_ref()));
            match handle.shared.config.fatal_action {
                FatalAction::Abort => abort_process("WorkerThread::execute", &message),
                FatalAction::Poison => {
                    poison_pool(handle, message);
                    false
                }
            }
        }
    }
}

fn run_work<B: GpuBackend>(
    handle: &WorkerPoolHandle<B>,
    worker: WorkerId,
    work: Work<B>,
    tracked_frame: Option<FrameContext>,
    name: &str,
) -> WorkOutput<B> {
    match work {
        Work::Item(item) => with_worker_pools::<B, _>(|backend, pools| {
            let mut ctx = WorkerContext {
                worker,
                frame: tracked_frame,
                item_name: name,
                backend,
                pools,
                pool: handle,
                output: WorkOutput::empty(),
            };
            item.process(&mut ctx);
            ctx.output
        }),
        Work::Aggregate(aggregator) => {
            let mut output = WorkOutput::empty();
            output.children = aggregator
                .into_children()
                .into_iter()
                .map(|child| (child, QueueTier::Foreground))
                .collect();
            output
        }
        Work::Resume(runnable) => {
            runnable.run();
            WorkOutput::empty()
        }
    }
}
