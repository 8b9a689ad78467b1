//! GPU failure kinds reported by backends and submitters

/// GPU errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GpuError {
    #[error("GPU device lost")]
    DeviceLost,

    #[error("GPU out of memory while {context}")]
    OutOfMemory { context: String },

    #[error("Descriptor pool exhausted: {allocated} of {capacity} sets in use")]
    DescriptorPoolExhausted { allocated: u32, capacity: u32 },

    #[error("GPU validation error: {description}")]
    Validation { description: String },

    #[error("Command recording failed for '{label}': {message}")]
    RecordingFailed { label: String, message: String },

    #[error("Submission failed: {message}")]
    SubmissionFailed { message: String },
}

impl GpuError {
    /// Short name of the operation class the error belongs to
    pub fn operation(&self) -> &'static str {
        match self {
            GpuError::DeviceLost => "device",
            GpuError::OutOfMemory { .. } => "allocation",
            GpuError::DescriptorPoolExhausted { .. } => "descriptor_allocation",
            GpuError::Validation { .. } => "validation",
            GpuError::RecordingFailed { .. } => "recording",
            GpuError::SubmissionFailed { .. } => "submission",
        }
    }
}

pub type GpuResult<T> = Result<T, GpuError>;
