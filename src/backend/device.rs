// Logical device - Core GPU interface
//
// Responsibilities:
// - One queue per unique resolved family (graphics/presentation/transfer/compute)
// - Graphics command pool (individually resettable buffers)
// - Transient transfer command pool for staged uploads
// - One-shot command submission helper

use anyhow::{Context, Result};
use ash::vk;
use parking_lot::Mutex;
use std::ffi::CStr;
use std::sync::Arc;

use super::command::{CommandBufferId, CommandPool};
use super::instance::Instance;
use super::physical_device::PhysicalDeviceInfo;

/// Device features the renderer turns on.
const REQUIRED_DEVICE_FEATURES: vk::PhysicalDeviceFeatures = vk::PhysicalDeviceFeatures {
    sampler_anisotropy: vk::TRUE,
    ..unsafe { std::mem::zeroed() }
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRole {
    Graphics,
    Transfer,
}

#[derive(Debug, Clone, Copy)]
pub struct Queues {
    pub graphics: vk::Queue,
    pub presentation: vk::Queue,
    pub transfer: vk::Queue,
    pub compute: Option<vk::Queue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub presentation: u32,
    pub transfer: u32,
    pub compute: Option<u32>,
}

pub struct LogicalDevice {
    pub device: ash::Device,
    pub physical: PhysicalDeviceInfo,
    pub queues: Queues,
    pub families: QueueFamilies,
    graphics_pool: Mutex<CommandPool>,
    transfer_pool: Mutex<CommandPool>,
    pub instance: Arc<Instance>,
}

impl LogicalDevice {
    /// Create the device on the selected adapter.
    ///
    /// `extensions` must already have been verified against the adapter.
    pub fn new(
        instance: Arc<Instance>,
        physical: PhysicalDeviceInfo,
        extensions: &[&CStr],
    ) -> Result<Arc<Self>> {
        let table = &physical.queue_families;
        let (Some(graphics), Some(presentation)) = (table.graphics, table.presentation) else {
            anyhow::bail!("Selected device has no graphics or presentation queue");
        };
        let families = QueueFamilies {
            graphics,
            presentation,
            transfer: table.transfer.unwrap_or(graphics),
            compute: table.compute,
        };

        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = table
            .unique_indices()
            .into_iter()
            .map(|index| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(index)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extension_ptrs: Vec<_> = extensions.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<_> = instance.layers.iter().map(|l| l.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs)
            .enabled_features(&REQUIRED_DEVICE_FEATURES);

        let device = unsafe {
            instance
                .instance
                .create_device(physical.handle, &create_info, None)
        }
        .context("Failed to create logical device")?;

        let queues = unsafe {
            Queues {
                graphics: device.get_device_queue(families.graphics, 0),
                presentation: device.get_device_queue(families.presentation, 0),
                transfer: device.get_device_queue(families.transfer, 0),
                compute: families.compute.map(|i| device.get_device_queue(i, 0)),
            }
        };

        let mut graphics_pool = match CommandPool::new(
            &device,
            families.graphics,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ) {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };
        let transfer_pool = match CommandPool::new(
            &device,
            families.transfer,
            vk::CommandPoolCreateFlags::TRANSIENT,
        ) {
            Ok(pool) => pool,
            Err(e) => {
                graphics_pool.destroy(&device);
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };

        log::info!(
            "Logical device created (graphics {}, present {}, transfer {}, compute {:?})",
            families.graphics,
            families.presentation,
            families.transfer,
            families.compute
        );

        Ok(Arc::new(Self {
            device,
            physical,
            queues,
            families,
            graphics_pool: Mutex::new(graphics_pool),
            transfer_pool: Mutex::new(transfer_pool),
            instance,
        }))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")?;
        Ok(())
    }

    pub fn allocate_graphics_command_buffers(&self, count: u32) -> Result<Vec<CommandBufferId>> {
        self.graphics_pool.lock().allocate(&self.device, count)
    }

    pub fn graphics_command_buffer(&self, id: CommandBufferId) -> Option<vk::CommandBuffer> {
        self.graphics_pool.lock().get(id)
    }

    /// Families that device-local buffers are shared between. Empty when a
    /// single family does both graphics and transfer work.
    pub fn buffer_sharing_families(&self) -> Vec<u32> {
        if self.families.transfer == self.families.graphics {
            Vec::new()
        } else {
            vec![self.families.graphics, self.families.transfer]
        }
    }

    /// Record and run a throwaway command buffer on the given queue, then
    /// wait for the queue to drain.
    pub fn submit_one_shot<F>(&self, role: QueueRole, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let (pool, queue) = match role {
            QueueRole::Graphics => (&self.graphics_pool, self.queues.graphics),
            QueueRole::Transfer => (&self.transfer_pool, self.queues.transfer),
        };

        let mut pool = pool.lock();
        let id = pool
            .allocate(&self.device, 1)?
            .pop()
            .context("Command pool returned no buffer")?;
        let result = match pool.get(id) {
            Some(cmd) => self.run_one_shot(queue, cmd, record),
            None => Err(anyhow::anyhow!("One-shot command buffer vanished")),
        };
        pool.free(&self.device, id);
        result
    }

    fn run_one_shot<F>(&self, queue: vk::Queue, cmd: vk::CommandBuffer, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin one-shot command buffer")?;
            record(&self.device, cmd);
            self.device
                .end_command_buffer(cmd)
                .context("Failed to end one-shot command buffer")?;

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            self.device
                .queue_submit(queue, &[submit_info.build()], vk::Fence::null())
                .context("Failed to submit one-shot command buffer")?;
            self.device
                .queue_wait_idle(queue)
                .context("Failed to wait for one-shot submission")?;
        }
        Ok(())
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        log::info!("Destroying logical device...");

        // Wait for device to finish
        if let Err(e) = self.wait_idle() {
            log::error!("{:#}", e);
        }

        self.transfer_pool.get_mut().destroy(&self.device);
        self.graphics_pool.get_mut().destroy(&self.device);
        unsafe { self.device.destroy_device(None) };
    }
}
