//! Task handles and their shared core
//!
//! The core owns the type-erased future and is what wakers point at. The
//! handle owns the result slot. Polling holds the core's future lock, so a
//! task is never polled on two threads at once and a wake that arrives mid-poll
//! simply queues one more poll.

use super::scheduler::TaskScheduler;
use super::{TaskError, TaskResult};
use crate::panic_handler::panic_message;
use futures::future::BoxFuture;
use futures::task::{waker_ref, ArcWake};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Tasks whose poll is on this thread's stack, innermost last
    static POLLING_TASKS: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Lifecycle of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Created,
    Running,
    Suspended,
    Completed,
    Abandoned,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Created,
            1 => TaskState::Running,
            2 => TaskState::Suspended,
            3 => TaskState::Completed,
            _ => TaskState::Abandoned,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TaskState::Created => 0,
            TaskState::Running => 1,
            TaskState::Suspended => 2,
            TaskState::Completed => 3,
            TaskState::Abandoned => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Abandoned)
    }
}

pub(crate) struct TaskCore {
    id: u64,
    name: String,
    state: AtomicU8,
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    scheduled: AtomicBool,
    /// Set when the task was cancelled or abandoned from inside its own poll
    cancel_requested: AtomicBool,
    scheduler: Arc<dyn TaskScheduler>,
}

impl TaskCore {
    fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: TaskState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Queue one poll unless one is already queued
    fn schedule(self: &Arc<Self>) {
        if self.state().is_terminal() {
            return;
        }
        if !self.scheduled.swap(true, Ordering::AcqRel) {
            self.scheduler.schedule(TaskRunnable {
                core: Some(Arc::clone(self)),
            });
        }
    }

    fn poll_once(self: &Arc<Self>) {
        let mut slot = self.future.lock();
        self.scheduled.store(false, Ordering::Release);
        let Some(future) = slot.as_mut() else {
            return;
        };

        self.set_state(TaskState::Running);
        POLLING_TASKS.with(|polling| polling.borrow_mut().push(self.id));
        let waker = waker_ref(self);
        let mut cx = Context::from_waker(&waker);
        let poll = future.as_mut().poll(&mut cx);
        POLLING_TASKS.with(|polling| polling.borrow_mut().pop());

        match poll {
            Poll::Ready(()) => {
                let finished = slot.take();
                self.set_state(TaskState::Completed);
                drop(slot);
                drop(finished);
                log::trace!("[Task::poll] '{}' completed", self.name);
            }
            Poll::Pending if self.cancel_requested.load(Ordering::Acquire) => {
                let cancelled = slot.take();
                self.set_state(TaskState::Abandoned);
                drop(slot);
                drop(cancelled);
                log::debug!("[Task::poll] '{}' cancelled while suspending", self.name);
            }
            Poll::Pending => self.set_state(TaskState::Suspended),
        }
    }

    /// Whether this thread is inside our poll, holding the future lock
    fn polling_here(&self) -> bool {
        POLLING_TASKS.with(|polling| polling.borrow().contains(&self.id))
    }

    /// Drop the future without completing it. Returns false if it had already
    /// finished or if the drop was deferred to the poll running on this thread.
    fn abandon(&self) -> bool {
        if self.polling_here() {
            // The future lock is ours further up the stack; poll_once drops the
            // future once the poll returns pending
            self.cancel_requested.store(true, Ordering::Release);
            log::debug!("[Task::abandon] '{}' abandoned from inside its own poll", self.name);
            return false;
        }
        let future = {
            let mut slot = self.future.lock();
            let future = slot.take();
            if future.is_some() {
                self.set_state(TaskState::Abandoned);
            }
            future
        };
        // Dropped outside the lock: it may own other task handles
        let abandoned = future.is_some();
        drop(future);
        abandoned
    }

    /// A queued resumption was dropped without running
    fn cancel(&self) {
        if self.abandon() {
            log::debug!(
                "[Task::cancel] '{}' cancelled: its scheduler dropped the resumption",
                self.name
            );
        }
    }
}

impl ArcWake for TaskCore {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.schedule();
    }
}

/// One pending poll of a task, handed to its scheduler.
///
/// Running it polls the task once. Dropping it without running cancels the
/// task, since nothing else would ever resume it.
pub struct TaskRunnable {
    core: Option<Arc<TaskCore>>,
}

impl TaskRunnable {
    pub fn run(mut self) {
        if let Some(core) = self.core.take() {
            core.poll_once();
        }
    }

    pub fn task_id(&self) -> u64 {
        self.core.as_ref().map_or(0, |core| core.id)
    }

    pub fn task_name(&self) -> &str {
        self.core.as_ref().map_or("", |core| core.name.as_str())
    }
}

impl Drop for TaskRunnable {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            core.cancel();
        }
    }
}

enum OutputState<T> {
    Pending(Option<Waker>),
    Ready(TaskResult<T>),
    Taken,
}

/// Result slot shared by the handle and the running future
struct TaskOutput<T> {
    state: Mutex<OutputState<T>>,
}

impl<T> TaskOutput<T> {
    /// Store the result; only the first call has an effect
    fn resolve(&self, result: TaskResult<T>) {
        let mut state = self.state.lock();
        if !matches!(*state, OutputState::Pending(_)) {
            return;
        }
        let previous = std::mem::replace(&mut *state, OutputState::Ready(result));
        drop(state);
        if let OutputState::Pending(Some(waker)) = previous {
            waker.wake();
        }
    }

    fn take(&self, waker: Option<&Waker>) -> Option<TaskResult<T>> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, OutputState::Taken) {
            OutputState::Ready(result) => Some(result),
            OutputState::Taken => Some(Err(TaskError::ResultTaken)),
            OutputState::Pending(previous) => {
                *state = OutputState::Pending(waker.cloned().or(previous));
                None
            }
        }
    }
}

/// Runs the user future and stores what it produced
struct Completion<T> {
    name: String,
    inner: BoxFuture<'static, TaskResult<T>>,
    output: Arc<TaskOutput<T>>,
    done: bool,
}

impl<T> Future for Completion<T> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = &mut *self;
        let result = match panic::catch_unwind(AssertUnwindSafe(|| this.inner.as_mut().poll(cx))) {
            Ok(Poll::Pending) => return Poll::Pending,
            Ok(Poll::Ready(result)) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("[Task::poll] '{}' panicked: {}", this.name, message);
                Err(TaskError::Panicked {
                    task: this.name.clone(),
                    message,
                })
            }
        };
        this.done = true;
        this.output.resolve(result);
        Poll::Ready(())
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if !self.done {
            self.output.resolve(Err(TaskError::Cancelled));
        }
    }
}

/// Handle to a cooperative task producing `T`.
///
/// Await it (from another task) or poll `try_take_result`. Dropping the handle
/// before the task finished abandons it: the remainder of its future never
/// runs. Call `detach` to let it finish unobserved instead.
pub struct Task<T> {
    core: Arc<TaskCore>,
    output: Arc<TaskOutput<T>>,
    detached: bool,
}

impl<T: Send + 'static> Task<T> {
    /// Create a task without scheduling it
    pub fn new<F>(scheduler: Arc<dyn TaskScheduler>, name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = TaskResult<T>> + Send + 'static,
    {
        let name = name.into();
        let output = Arc::new(TaskOutput {
            state: Mutex::new(OutputState::Pending(None)),
        });
        let completion = Completion {
            name: name.clone(),
            inner: Box::pin(future),
            output: Arc::clone(&output),
            done: false,
        };
        let core = Arc::new(TaskCore {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            name,
            state: AtomicU8::new(TaskState::Created.as_u8()),
            future: Mutex::new(Some(Box::pin(completion))),
            scheduled: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            scheduler,
        });
        log::trace!("[Task::new] '{}' (#{})", core.name, core.id);
        Self {
            core,
            output,
            detached: false,
        }
    }

    /// Create a task and schedule its first poll
    pub fn spawn<F>(scheduler: Arc<dyn TaskScheduler>, name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = TaskResult<T>> + Send + 'static,
    {
        let task = Self::new(scheduler, name, future);
        task.start();
        task
    }
}

impl<T> Task<T> {
    /// Schedule the first poll of a created task
    pub fn start(&self) {
        if self.core.state() == TaskState::Created {
            self.core.schedule();
        }
    }

    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// The result, if the task finished. A second call yields `ResultTaken`.
    pub fn try_take_result(&mut self) -> Option<TaskResult<T>> {
        self.output.take(None)
    }

    /// Let the task run to completion without a handle
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl<T> Future for Task<T> {
    type Output = TaskResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<TaskResult<T>> {
        let this = self.get_mut();
        match this.output.take(Some(cx.waker())) {
            Some(result) => Poll::Ready(result),
            None => {
                this.start();
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if self.core.abandon() {
            log::debug!(
                "[Task::drop] '{}' abandoned before completion",
                self.core.name
            );
        }
    }
}
