// Uniform descriptors
//
// One uniform buffer and one descriptor set per frame slot. A slot's buffer
// is only written after that slot's fence has been waited on, so the CPU
// never touches memory the GPU is still reading.

use anyhow::{Context, Result};
use ash::vk;
use std::mem::size_of;
use std::sync::Arc;

use super::buffer::Buffer;
use super::device::LogicalDevice;
use crate::vertex::UniformBufferObject;

pub fn ubo_layout_binding() -> vk::DescriptorSetLayoutBinding {
    vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::VERTEX)
        .build()
}

pub struct DescriptorSetLayout {
    pub handle: vk::DescriptorSetLayout,
    device: Arc<LogicalDevice>,
}

impl DescriptorSetLayout {
    pub fn uniform(device: Arc<LogicalDevice>) -> Result<Self> {
        let bindings = [ubo_layout_binding()];
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let handle = unsafe { device.device.create_descriptor_set_layout(&create_info, None) }
            .context("Failed to create descriptor set layout")?;
        Ok(Self { handle, device })
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_descriptor_set_layout(self.handle, None)
        };
    }
}

pub struct FrameUniforms {
    pub sets: Vec<vk::DescriptorSet>,
    pub buffers: Vec<Buffer>,
    pool: vk::DescriptorPool,
    device: Arc<LogicalDevice>,
}

impl FrameUniforms {
    pub fn new(
        device: Arc<LogicalDevice>,
        layout: &DescriptorSetLayout,
        slots: usize,
    ) -> Result<Self> {
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: slots as u32,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(slots as u32);
        let pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        let mut uniforms = Self {
            sets: Vec::new(),
            buffers: Vec::with_capacity(slots),
            pool,
            device,
        };

        let size = size_of::<UniformBufferObject>() as vk::DeviceSize;
        for _ in 0..slots {
            uniforms.buffers.push(Buffer::new(
                &uniforms.device,
                size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?);
        }

        let layouts = vec![layout.handle; slots];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        uniforms.sets = unsafe { uniforms.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor sets")?;

        for (&set, buffer) in uniforms.sets.iter().zip(&uniforms.buffers) {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: buffer.handle,
                offset: 0,
                range: size,
            }];
            let write = vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build();
            unsafe { uniforms.device.device.update_descriptor_sets(&[write], &[]) };
        }

        log::debug!("Allocated {} uniform slots", slots);
        Ok(uniforms)
    }

    /// Overwrite the uniform block of `slot`.
    pub fn write(&self, slot: usize, ubo: &UniformBufferObject) -> Result<()> {
        let buffer = self
            .buffers
            .get(slot)
            .with_context(|| format!("No uniform buffer for frame slot {}", slot))?;
        buffer.write(0, bytemuck::bytes_of(ubo))
    }
}

impl Drop for FrameUniforms {
    fn drop(&mut self) {
        // Destroying the pool frees its sets; buffers drop afterwards.
        unsafe { self.device.device.destroy_descriptor_pool(self.pool, None) };
    }
}
