// Synchronization primitives
//
// One FrameSync per frame slot. The fence starts signaled so the first wait
// on every slot returns immediately.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::LogicalDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    device: Arc<LogicalDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<LogicalDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        // Null handles are valid to destroy, so a partial failure cleans up in Drop.
        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            device,
        };
        let d = &sync.device.device;
        unsafe {
            sync.image_available = d
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create image-available semaphore")?;
            sync.render_finished = d
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create render-finished semaphore")?;
            sync.in_flight = d
                .create_fence(&fence_info, None)
                .context("Failed to create in-flight fence")?;
        }
        Ok(sync)
    }

    /// Block until the GPU has finished the last submission on this slot.
    pub fn wait(&self) -> Result<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.in_flight], true, u64::MAX)
        }
        .context("Failed to wait for in-flight fence")
    }

    pub fn reset(&self) -> Result<()> {
        unsafe { self.device.device.reset_fences(&[self.in_flight]) }
            .context("Failed to reset in-flight fence")
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        let d = &self.device.device;
        unsafe {
            d.destroy_semaphore(self.image_available, None);
            d.destroy_semaphore(self.render_finished, None);
            d.destroy_fence(self.in_flight, None);
        }
    }
}
