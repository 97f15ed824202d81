// Buffer utilities for vertex, index, and uniform buffers
//
// One device allocation per buffer. Device-local buffers are filled through
// a host-visible staging buffer and a one-shot copy on the transfer queue;
// host-visible buffers are mapped and written directly.

use anyhow::{Context, Result};
use ash::vk;
use std::mem::size_of;
use std::sync::Arc;

use super::device::{LogicalDevice, QueueRole};
use crate::error::RendererError;
use crate::vertex::{Index, Vertex};

/// First memory type allowed by `type_filter` whose flags include `properties`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        let has_type = (type_filter & (1 << i)) != 0;
        let has_properties = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(properties);
        has_type && has_properties
    })
}

/// Allocate and bind backing memory for a buffer or image.
pub(crate) fn allocate_memory(
    device: &LogicalDevice,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(
        &device.physical.memory_properties,
        requirements.memory_type_bits,
        properties,
    )
    .ok_or(RendererError::NoMemoryType {
        type_filter: requirements.memory_type_bits,
        properties,
    })?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    unsafe { device.device.allocate_memory(&alloc_info, None) }
        .context("Failed to allocate device memory")
}

pub struct Buffer {
    pub handle: vk::Buffer,
    pub memory: vk::DeviceMemory,
    /// Requested size; the allocation may be larger.
    pub size: vk::DeviceSize,
    pub properties: vk::MemoryPropertyFlags,
    device: Arc<LogicalDevice>,
}

impl Buffer {
    /// Create a buffer with its own memory allocation.
    ///
    /// Device-local buffers are shared between the graphics and transfer
    /// families when those differ.
    pub fn new(
        device: &Arc<LogicalDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        if size == 0 {
            return Err(RendererError::InvalidUpload("zero-sized buffer".to_string()).into());
        }

        let sharing = if properties.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            device.buffer_sharing_families()
        } else {
            Vec::new()
        };
        let mut buffer_info = vk::BufferCreateInfo::builder().size(size).usage(usage);
        buffer_info = if sharing.is_empty() {
            buffer_info.sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            buffer_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&sharing)
        };

        let handle = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        let mut buffer = Self {
            handle,
            memory: vk::DeviceMemory::null(),
            size,
            properties,
            device: device.clone(),
        };

        let requirements = unsafe { device.device.get_buffer_memory_requirements(handle) };
        buffer.memory = allocate_memory(device, requirements, properties)?;
        unsafe { device.device.bind_buffer_memory(handle, buffer.memory, 0) }
            .context("Failed to bind buffer memory")?;

        Ok(buffer)
    }

    fn check_range(&self, offset: vk::DeviceSize, len: usize) -> Result<()> {
        let end = offset.checked_add(len as vk::DeviceSize);
        if end.map_or(true, |end| end > self.size) {
            return Err(RendererError::InvalidUpload(format!(
                "{} bytes at offset {} overflow a {}-byte buffer",
                len, offset, self.size
            ))
            .into());
        }
        Ok(())
    }

    /// Map, copy, unmap. Only valid for host-visible buffers.
    pub fn write(&self, offset: vk::DeviceSize, bytes: &[u8]) -> Result<()> {
        self.check_range(offset, bytes.len())?;
        if !self.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            anyhow::bail!("Cannot map a buffer that is not host-visible");
        }
        if bytes.is_empty() {
            return Ok(());
        }

        let d = &self.device.device;
        unsafe {
            let ptr = d
                .map_memory(
                    self.memory,
                    offset,
                    bytes.len() as vk::DeviceSize,
                    vk::MemoryMapFlags::empty(),
                )
                .context("Failed to map buffer memory")? as *mut u8;
            ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
            d.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Copy the whole buffer back to the host. Only valid for host-visible buffers.
    pub fn read_back(&self) -> Result<Vec<u8>> {
        if !self.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            anyhow::bail!("Cannot map a buffer that is not host-visible");
        }

        let len = self.size as usize;
        let mut bytes = vec![0u8; len];
        let d = &self.device.device;
        unsafe {
            let ptr = d
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .context("Failed to map buffer memory")? as *const u8;
            ptr.copy_to_nonoverlapping(bytes.as_mut_ptr(), len);
            d.unmap_memory(self.memory);
        }
        Ok(bytes)
    }

    /// Fill a buffer through a staging buffer. Host-visible destinations are
    /// written directly.
    pub fn upload(&self, offset: vk::DeviceSize, bytes: &[u8]) -> Result<()> {
        self.check_range(offset, bytes.len())?;
        if self.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return self.write(offset, bytes);
        }
        if bytes.is_empty() {
            return Ok(());
        }

        let staging = Buffer::new(
            &self.device,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write(0, bytes)?;

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: offset,
            size: bytes.len() as vk::DeviceSize,
        };
        self.device
            .submit_one_shot(QueueRole::Transfer, |d, cmd| unsafe {
                d.cmd_copy_buffer(cmd, staging.handle, self.handle, &[region]);
            })
            .context("Staged buffer upload failed")
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.handle, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

/// Placement of vertex and index data inside one mesh buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshLayout {
    pub vertex_count: u32,
    pub index_count: u32,
    /// Byte offset of the index data, passed to vkCmdBindIndexBuffer.
    pub index_offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl MeshLayout {
    pub fn new(vertex_count: usize, index_count: usize) -> Self {
        let vertex_bytes = (vertex_count * size_of::<Vertex>()) as vk::DeviceSize;
        let index_bytes = (index_count * size_of::<Index>()) as vk::DeviceSize;
        Self {
            vertex_count: vertex_count as u32,
            index_count: index_count as u32,
            index_offset: vertex_bytes,
            size: vertex_bytes + index_bytes,
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.index_count > 0
    }
}

/// Reject meshes the GPU could not draw safely.
pub fn validate_mesh(vertices: &[Vertex], indices: &[Index]) -> Result<(), RendererError> {
    if vertices.is_empty() {
        return Err(RendererError::InvalidUpload("mesh has no vertices".to_string()));
    }
    if vertices.len() > Index::MAX as usize + 1 {
        return Err(RendererError::InvalidUpload(format!(
            "{} vertices cannot be addressed by 16-bit indices",
            vertices.len()
        )));
    }
    if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
        return Err(RendererError::InvalidUpload(format!(
            "index {} out of range for {} vertices",
            bad,
            vertices.len()
        )));
    }
    Ok(())
}

/// Vertex data at offset 0 followed by index data in one device-local buffer.
pub struct MeshBuffer {
    pub buffer: Buffer,
    pub layout: MeshLayout,
}

impl MeshBuffer {
    pub fn upload(device: &Arc<LogicalDevice>, vertices: &[Vertex], indices: &[Index]) -> Result<Self> {
        validate_mesh(vertices, indices)?;
        let layout = MeshLayout::new(vertices.len(), indices.len());

        let mut bytes = Vec::with_capacity(layout.size as usize);
        bytes.extend_from_slice(bytemuck::cast_slice(vertices));
        bytes.extend_from_slice(bytemuck::cast_slice(indices));

        let buffer = Buffer::new(
            device,
            layout.size,
            vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        buffer.upload(0, &bytes)?;

        log::debug!(
            "Uploaded mesh: {} vertices, {} indices, {} bytes",
            layout.vertex_count,
            layout.index_count,
            layout.size
        );
        Ok(Self { buffer, layout })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    #[test]
    fn first_matching_memory_type_wins() {
        type F = vk::MemoryPropertyFlags;
        let props = memory_properties(&[
            F::DEVICE_LOCAL,
            F::HOST_VISIBLE | F::HOST_COHERENT,
            F::HOST_VISIBLE | F::HOST_COHERENT | F::HOST_CACHED,
        ]);

        let host = F::HOST_VISIBLE | F::HOST_COHERENT;
        assert_eq!(find_memory_type(&props, 0b111, host), Some(1));
        // Type 1 excluded by the filter, type 2 is a superset.
        assert_eq!(find_memory_type(&props, 0b101, host), Some(2));
        assert_eq!(find_memory_type(&props, 0b111, F::DEVICE_LOCAL), Some(0));
        assert_eq!(find_memory_type(&props, 0b110, F::DEVICE_LOCAL), None);
        assert_eq!(find_memory_type(&props, 0b111, F::PROTECTED), None);
    }

    #[test]
    fn filter_bits_beyond_type_count_are_ignored() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert_eq!(
            find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            None
        );
    }

    #[test]
    fn quad_layout_packs_indices_after_vertices() {
        let layout = MeshLayout::new(4, 6);
        assert_eq!(layout.size, (4 * size_of::<Vertex>() + 6 * size_of::<Index>()) as u64);
        assert_eq!(layout.size, 92);
        assert_eq!(layout.index_offset, (4 * size_of::<Vertex>()) as u64);
        assert_eq!(layout.index_offset, 80);
        assert!(layout.is_indexed());
    }

    #[test]
    fn non_indexed_layout() {
        let layout = MeshLayout::new(3, 0);
        assert_eq!(layout.size, 60);
        assert_eq!(layout.index_offset, 60);
        assert!(!layout.is_indexed());
    }

    #[test]
    fn mesh_validation() {
        let v = Vertex::new([0.0, 0.0], [1.0, 1.0, 1.0]);
        assert!(validate_mesh(&[v, v, v], &[0, 1, 2]).is_ok());
        assert!(validate_mesh(&[v, v, v], &[]).is_ok());
        assert!(validate_mesh(&[], &[]).is_err());
        assert!(matches!(
            validate_mesh(&[v, v, v], &[0, 1, 3]),
            Err(RendererError::InvalidUpload(_))
        ));
    }
}
