//! Task layer
//!
//! `Task<T>` wraps a future whose only suspension points are GPU submissions,
//! GPU queries and other tasks. A task is polled by whichever `TaskScheduler`
//! it was created with: the main thread queue, any pool worker, or one pinned
//! worker. Every task resolves to `TaskResult<T>`; a failure never leaves an
//! awaiting task stalled.

pub mod awaiters;
pub mod scheduler;
pub mod task_core;

pub use awaiters::{query, submit, GpuQuery, GpuSubmission};
pub use scheduler::{spawn, MainThreadQueue, PoolScheduler, TaskScheduler};
pub use task_core::{Task, TaskRunnable, TaskState};

use crate::error::EngineError;
use crate::gpu::GpuError;
use thiserror::Error;

/// Why a task did not produce its value
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("GPU operation failed: {0}")]
    Gpu(#[from] GpuError),

    #[error("submitter dropped the completion without signalling it")]
    SubmitterDropped,

    #[error("task '{task}' panicked: {message}")]
    Panicked { task: String, message: String },

    #[error("task result was already taken")]
    ResultTaken,

    #[error("task was cancelled before it completed")]
    Cancelled,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type TaskResult<T> = Result<T, TaskError>;
