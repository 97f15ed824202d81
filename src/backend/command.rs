// Command pools
//
// A pool owns its command buffers as slots in a Vec; callers hold a
// CommandBufferId and never the raw handle. Freed slots are reused by the
// next allocation. Pools are destroyed by the LogicalDevice that created
// them, which frees every remaining buffer with it.

use anyhow::{Context, Result};
use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandBufferId(usize);

pub struct CommandPool {
    handle: vk::CommandPool,
    buffers: Vec<Option<vk::CommandBuffer>>,
}

impl CommandPool {
    pub fn new(
        device: &ash::Device,
        family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family_index)
            .flags(flags);
        let handle = unsafe { device.create_command_pool(&create_info, None) }
            .context("Failed to create command pool")?;

        Ok(Self {
            handle,
            buffers: Vec::new(),
        })
    }

    /// Allocate `count` primary command buffers.
    pub fn allocate(&mut self, device: &ash::Device, count: u32) -> Result<Vec<CommandBufferId>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")?;

        Ok(buffers.into_iter().map(|b| self.insert(b)).collect())
    }

    pub fn get(&self, id: CommandBufferId) -> Option<vk::CommandBuffer> {
        self.buffers.get(id.0).copied().flatten()
    }

    pub fn free(&mut self, device: &ash::Device, id: CommandBufferId) {
        if let Some(buffer) = self.take(id) {
            unsafe { device.free_command_buffers(self.handle, &[buffer]) };
        }
    }

    /// Number of live command buffers.
    pub fn len(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy the pool and every buffer allocated from it.
    pub fn destroy(&mut self, device: &ash::Device) {
        if self.handle == vk::CommandPool::null() {
            return;
        }
        unsafe { device.destroy_command_pool(self.handle, None) };
        self.handle = vk::CommandPool::null();
        self.buffers.clear();
    }

    fn insert(&mut self, buffer: vk::CommandBuffer) -> CommandBufferId {
        match self.buffers.iter().position(Option::is_none) {
            Some(slot) => {
                self.buffers[slot] = Some(buffer);
                CommandBufferId(slot)
            }
            None => {
                self.buffers.push(Some(buffer));
                CommandBufferId(self.buffers.len() - 1)
            }
        }
    }

    fn take(&mut self, id: CommandBufferId) -> Option<vk::CommandBuffer> {
        self.buffers.get_mut(id.0).and_then(Option::take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn empty_pool() -> CommandPool {
        CommandPool {
            handle: vk::CommandPool::null(),
            buffers: Vec::new(),
        }
    }

    #[test]
    fn ids_address_their_own_buffers() {
        let mut pool = empty_pool();
        let a = pool.insert(vk::CommandBuffer::from_raw(10));
        let b = pool.insert(vk::CommandBuffer::from_raw(20));
        assert_ne!(a, b);
        assert_eq!(pool.get(a), Some(vk::CommandBuffer::from_raw(10)));
        assert_eq!(pool.get(b), Some(vk::CommandBuffer::from_raw(20)));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut pool = empty_pool();
        let a = pool.insert(vk::CommandBuffer::from_raw(10));
        let _b = pool.insert(vk::CommandBuffer::from_raw(20));

        assert_eq!(pool.take(a), Some(vk::CommandBuffer::from_raw(10)));
        assert_eq!(pool.get(a), None);
        assert_eq!(pool.take(a), None);

        let c = pool.insert(vk::CommandBuffer::from_raw(30));
        assert_eq!(c, a);
        assert_eq!(pool.get(c), Some(vk::CommandBuffer::from_raw(30)));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn unknown_id_is_none() {
        let pool = empty_pool();
        assert!(pool.is_empty());
        assert_eq!(pool.get(CommandBufferId(3)), None);
    }
}
