//! Scheduler configuration
//!
//! Loaded from TOML or built in code; validated before the pool starts.

use crate::error::{EngineError, EngineResult};
use crate::panic_handler::FatalAction;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound on explicitly requested workers
pub const MAX_WORKERS: usize = 64;

/// Upper bound for automatically sized pools
pub const MAX_AUTO_WORKERS: usize = 16;

/// Largest supported number of frames in flight
pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads; 0 sizes the pool from the CPU count
    pub worker_count: usize,
    /// Frame slots, matching the render pipeline's in-flight image count
    pub frames_in_flight: usize,
    pub thread_name_prefix: String,
    /// Workers stay idle until `resume_workers` is called
    pub start_paused: bool,
    pub fatal_action: FatalAction,
    /// Priority given to task resumptions queued on the pool
    pub resume_priority: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            frames_in_flight: 2,
            thread_name_prefix: "hearth-worker".to_string(),
            start_paused: false,
            fatal_action: FatalAction::Abort,
            resume_priority: 1000.0,
        }
    }
}

impl SchedulerConfig {
    /// Parse a configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: SchedulerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| EngineError::IoError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        log::info!("[SchedulerConfig] Loading {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> EngineResult<()> {
        if self.worker_count > MAX_WORKERS {
            return Err(EngineError::InvalidConfig {
                field: "worker_count".to_string(),
                value: self.worker_count.to_string(),
                reason: format!("exceeds maximum of {}", MAX_WORKERS),
            });
        }

        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(EngineError::InvalidConfig {
                field: "frames_in_flight".to_string(),
                value: self.frames_in_flight.to_string(),
                reason: format!("must be between 1 and {}", MAX_FRAMES_IN_FLIGHT),
            });
        }

        if self.thread_name_prefix.is_empty() {
            return Err(EngineError::MissingConfig {
                field: "thread_name_prefix".to_string(),
            });
        }

        if !self.resume_priority.is_finite() {
            return Err(EngineError::InvalidConfig {
                field: "resume_priority".to_string(),
                value: self.resume_priority.to_string(),
                reason: "must be finite".to_string(),
            });
        }

        log::debug!(
            "[SchedulerConfig] Validated: {} workers, {} frames in flight",
            self.resolved_worker_count(),
            self.frames_in_flight
        );
        Ok(())
    }

    /// Worker count after resolving the automatic setting
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get().clamp(1, MAX_AUTO_WORKERS)
        } else {
            self.worker_count
        }
    }

    /// Suggest safe configuration parameters
    pub fn suggest_safe_config(&self) -> String {
        let mut suggestions = Vec::new();

        suggestions.push(format!(
            "This machine reports {} logical CPUs; worker_count = 0 uses {}",
            num_cpus::get(),
            num_cpus::get().clamp(1, MAX_AUTO_WORKERS)
        ));
        suggestions.push("Common safe configurations:".to_string());
        suggestions.push("  - frames_in_flight = 2 (double buffering)".to_string());
        suggestions.push("  - frames_in_flight = 3 (triple buffering)".to_string());
        suggestions.push("  - fatal_action = \"poison\" for tools and tests".to_string());

        suggestions.join("\n")
    }
}
