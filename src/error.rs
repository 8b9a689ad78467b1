//! Error handling for the Hearth scheduler
//!
//! Recoverable conditions (configuration, frame gating, lookups of handles that
//! may have been released) surface as `EngineError`. Invariant violations and
//! GPU failures inside work items never come through here; they take the fatal
//! path in `panic_handler`.

use std::error::Error as StdError;
use std::fmt;

use crate::gpu::GpuError;

/// Main error type for the scheduler
#[derive(Debug)]
pub enum EngineError {
    // Configuration Errors
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },
    MissingConfig {
        field: String,
    },
    ConfigParse {
        error: String,
    },
    IoError {
        path: String,
        error: String,
    },

    // Threading Errors
    WorkerSpawnFailed {
        worker: usize,
        error: String,
    },
    PoolShutDown,
    PoolPoisoned {
        reason: String,
    },
    NotOnWorkerThread,
    InvalidPriority {
        work: String,
    },

    // Frame Errors
    FrameSlotOutOfRange {
        slot: usize,
        frames_in_flight: usize,
    },
    StaleFrame {
        requested: u64,
        current: u64,
    },
    FrameAlreadySubmitted {
        frame: u64,
    },
    FrameNotBegun {
        frame: u64,
        open: u64,
    },

    // Resource Errors
    ResourceNotFound {
        resource_type: String,
        id: String,
    },

    // GPU Errors
    GpuOperationFailed {
        operation: String,
        error: String,
    },

    Internal {
        message: String,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidConfig {
                field,
                value,
                reason,
            } => write!(f, "Invalid config: {} = {} ({})", field, value, reason),
            EngineError::MissingConfig { field } => write!(f, "Missing required config: {}", field),
            EngineError::ConfigParse { error } => write!(f, "Config parse error: {}", error),
            EngineError::IoError { path, error } => write!(f, "IO error for {}: {}", path, error),

            EngineError::WorkerSpawnFailed { worker, error } => {
                write!(f, "Failed to spawn worker {}: {}", worker, error)
            }
            EngineError::PoolShutDown => write!(f, "Worker pool has been shut down"),
            EngineError::PoolPoisoned { reason } => {
                write!(f, "Worker pool poisoned: {}", reason)
            }
            EngineError::NotOnWorkerThread => {
                write!(f, "Operation requires a worker thread of the pool")
            }
            EngineError::InvalidPriority { work } => {
                write!(f, "Work '{}' has a NaN priority", work)
            }

            EngineError::FrameSlotOutOfRange {
                slot,
                frames_in_flight,
            } => write!(
                f,
                "Frame slot {} out of range ({} frames in flight)",
                slot, frames_in_flight
            ),
            EngineError::StaleFrame { requested, current } => write!(
                f,
                "Frame {} is stale: its slot now belongs to frame {}",
                requested, current
            ),
            EngineError::FrameAlreadySubmitted { frame } => write!(
                f,
                "Frame {} was already taken for submission",
                frame
            ),
            EngineError::FrameNotBegun { frame, open } => write!(
                f,
                "Frame {} has not been begun (open frame is {})",
                frame, open
            ),

            EngineError::ResourceNotFound { resource_type, id } => {
                write!(f, "Resource not found: {} '{}'", resource_type, id)
            }

            EngineError::GpuOperationFailed { operation, error } => {
                write!(f, "GPU operation '{}' failed: {}", operation, error)
            }

            EngineError::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl StdError for EngineError {}

/// Type alias for Results in the scheduler
pub type EngineResult<T> = Result<T, EngineError>;

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        EngineError::IoError {
            path: String::new(),
            error: error.to_string(),
        }
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(error: toml::de::Error) -> Self {
        EngineError::ConfigParse {
            error: error.to_string(),
        }
    }
}

impl From<GpuError> for EngineError {
    fn from(error: GpuError) -> Self {
        EngineError::GpuOperationFailed {
            operation: error.operation().to_string(),
            error: error.to_string(),
        }
    }
}

/// Convert Option to Result with context
pub trait OptionExt<T> {
    fn ok_or_engine<F>(self, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> EngineError;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_engine<F>(self, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> EngineError,
    {
        self.ok_or_else(f)
    }
}

/// Extension trait for adding context to errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> EngineResult<T>;
    fn with_context<F>(self, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: fmt::Display,
{
    fn context(self, msg: &str) -> EngineResult<T> {
        self.map_err(|e| EngineError::Internal {
            message: format!("{}: {}", msg, e),
        })
    }

    fn with_context<F>(self, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| EngineError::Internal {
            message: format!("{}: {}", f(), e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::StaleFrame {
            requested: 3,
            current: 5,
        };
        assert_eq!(
            err.to_string(),
            "Frame 3 is stale: its slot now belongs to frame 5"
        );
    }

    #[test]
    fn test_option_ext() {
        let opt: Option<i32> = None;
        let result = opt.ok_or_engine(|| EngineError::ResourceNotFound {
            resource_type: "buffer".to_string(),
            id: "7".to_string(),
        });
        assert!(matches!(result, Err(EngineError::ResourceNotFound { .. })));
    }

    #[test]
    fn test_error_context() {
        let result: Result<i32, std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        let with_context = result.context("loading config");
        match with_context {
            Err(EngineError::Internal { message }) => {
                assert!(message.starts_with("loading config"));
                assert!(message.contains("file not found"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_gpu_error_conversion() {
        let err: EngineError = GpuError::DeviceLost.into();
        assert!(matches!(err, EngineError::GpuOperationFailed { .. }));
    }
}
