//! wgpu backend
//!
//! wgpu has no user-visible command pools, so a worker's "pool" is an encoder
//! factory pinned to the worker thread. Submission goes through the shared
//! queue and completion is reported through `on_submitted_work_done`, which
//! only fires while the device is being polled.

use super::{AsyncGpuSubmitter, CompletionCallback, GpuBackend, GpuError, GpuResult, QueueKind};
use crate::panic_handler::{invariant_violation, panic_message};
use crate::thread_pool::WorkerId;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Encoders come from one shared device; pools only pin them to a thread
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
}

impl WgpuBackend {
    pub fn new(device: Arc<wgpu::Device>) -> Self {
        Self { device }
    }

    /// Request a device without a surface, for offscreen work
    pub fn request_headless_device() -> GpuResult<(Arc<wgpu::Device>, Arc<wgpu::Queue>)> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(GpuError::DeviceLost)?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Hearth Scheduler Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .map_err(|e| GpuError::Validation {
            description: e.to_string(),
        })?;

        Ok((Arc::new(device), Arc::new(queue)))
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }
}

/// Per-thread encoder factory
pub struct WgpuCommandPool {
    worker: WorkerId,
    queue: QueueKind,
    owner: ThreadId,
    allocated: u64,
}

impl WgpuCommandPool {
    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    fn assert_owner(&self) {
        if thread::current().id() != self.owner {
            invariant_violation(format!(
                "{:?} command pool of {} used from a foreign thread",
                self.queue, self.worker
            ));
        }
    }
}

/// Per-thread bind group bookkeeping
pub struct WgpuDescriptorPool {
    device: Arc<wgpu::Device>,
    worker: WorkerId,
    bind_groups_created: u32,
}

impl WgpuDescriptorPool {
    /// Create a bind group owned by this worker
    pub fn create_bind_group(&mut self, desc: &wgpu::BindGroupDescriptor) -> wgpu::BindGroup {
        self.bind_groups_created += 1;
        log::trace!(
            "[WgpuDescriptorPool] {} bind group #{}",
            self.worker,
            self.bind_groups_created
        );
        self.device.create_bind_group(desc)
    }

    pub fn bind_groups_created(&self) -> u32 {
        self.bind_groups_created
    }
}

impl GpuBackend for WgpuBackend {
    type CommandPool = WgpuCommandPool;
    type DescriptorPool = WgpuDescriptorPool;
    type Encoder = wgpu::CommandEncoder;
    type CommandBuffer = wgpu::CommandBuffer;

    fn create_command_pool(&self, worker: WorkerId, queue: QueueKind) -> GpuResult<WgpuCommandPool> {
        Ok(WgpuCommandPool {
            worker,
            queue,
            owner: thread::current().id(),
            allocated: 0,
        })
    }

    fn create_descriptor_pool(&self, worker: WorkerId) -> GpuResult<WgpuDescriptorPool> {
        Ok(WgpuDescriptorPool {
            device: Arc::clone(&self.device),
            worker,
            bind_groups_created: 0,
        })
    }

    fn begin_commands(
        &self,
        pool: &mut WgpuCommandPool,
        label: &str,
    ) -> GpuResult<wgpu::CommandEncoder> {
        pool.assert_owner();
        Ok(self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) }))
    }

    fn finish_commands(
        &self,
        pool: &mut WgpuCommandPool,
        encoder: wgpu::CommandEncoder,
    ) -> GpuResult<wgpu::CommandBuffer> {
        pool.assert_owner();
        pool.allocated += 1;
        Ok(encoder.finish())
    }
}

/// Submits to a wgpu queue and signals through `on_submitted_work_done`
pub struct WgpuSubmitter {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    /// Flag indicating if device is lost
    device_lost: Arc<AtomicBool>,
    /// Consecutive failed submissions
    error_count: AtomicU32,
    /// Maximum errors before the device is treated as lost
    max_errors: u32,
}

impl WgpuSubmitter {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let device_lost = Arc::new(AtomicBool::new(false));
        let device_lost_clone = Arc::clone(&device_lost);

        device.on_uncaptured_error(Box::new(move |error| {
            log::error!("[WgpuSubmitter] Uncaptured GPU error: {:?}", error);

            match error {
                wgpu::Error::OutOfMemory { .. } => {
                    log::error!("[WgpuSubmitter] GPU out of memory!");
                    device_lost_clone.store(true, Ordering::Relaxed);
                }
                wgpu::Error::Validation { description, .. } => {
                    log::error!("[WgpuSubmitter] GPU validation error: {}", description);
                }
            }
        }));

        Self {
            device,
            queue,
            device_lost,
            error_count: AtomicU32::new(0),
            max_errors: 10,
        }
    }

    pub fn is_device_lost(&self) -> bool {
        self.device_lost.load(Ordering::Relaxed)
    }

    /// Drive completion callbacks without blocking
    pub fn poll(&self) {
        let _ = self.device.poll(wgpu::Maintain::Poll);
    }

    /// Block until every submission so far has completed
    pub fn wait_idle(&self) {
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }

    fn try_submit(&self, buffer: wgpu::CommandBuffer) -> GpuResult<wgpu::SubmissionIndex> {
        if self.is_device_lost() {
            return Err(GpuError::DeviceLost);
        }

        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            self.queue.submit(std::iter::once(buffer))
        }));

        match result {
            Ok(index) => {
                self.error_count.store(0, Ordering::Relaxed);
                Ok(index)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let errors = self.error_count.fetch_add(1, Ordering::Relaxed) + 1;
                log::error!(
                    "[WgpuSubmitter] Submission panicked ({} in a row): {}",
                    errors,
                    message
                );
                if errors > self.max_errors {
                    self.device_lost.store(true, Ordering::Relaxed);
                }
                Err(GpuError::SubmissionFailed { message })
            }
        }
    }
}

impl AsyncGpuSubmitter<wgpu::CommandBuffer> for WgpuSubmitter {
    fn submit(&self, buffer: wgpu::CommandBuffer, on_complete: CompletionCallback) {
        match self.try_submit(buffer) {
            Ok(_) => {
                let device_lost = Arc::clone(&self.device_lost);
                self.queue.on_submitted_work_done(move || {
                    if device_lost.load(Ordering::Relaxed) {
                        on_complete(Err(GpuError::DeviceLost));
                    } else {
                        on_complete(Ok(()));
                    }
                });
            }
            Err(e) => on_complete(Err(e)),
        }
    }
}
