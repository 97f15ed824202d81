//! Vertex and uniform layouts shared by the CPU and the shaders.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};
use std::mem::{offset_of, size_of};

/// Index type used by every mesh.
pub type Index = u16;

pub const INDEX_TYPE: vk::IndexType = vk::IndexType::UINT16;

/// Interleaved position + colour, matching `Basic.vert` locations 0 and 1.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec2,
    pub color: Vec3,
}

impl Vertex {
    pub const fn new(position: [f32; 2], color: [f32; 3]) -> Self {
        Self {
            position: Vec2::from_array(position),
            color: Vec3::from_array(color),
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(size_of::<Self>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(offset_of!(Vertex, position) as u32)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(offset_of!(Vertex, color) as u32)
                .build(),
        ]
    }
}

/// Per-frame transforms, bound at set 0 / binding 0 for the vertex stage.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
}

impl Default for UniformBufferObject {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 20);
        assert_eq!(Vertex::binding_description().stride, 20);

        let [position, color] = Vertex::attribute_descriptions();
        assert_eq!(position.offset, 0);
        assert_eq!(color.offset, 8);
        assert_eq!(color.location, 1);
    }

    #[test]
    fn uniform_block_is_three_matrices() {
        assert_eq!(size_of::<UniformBufferObject>(), 3 * 64);
        let ubo = UniformBufferObject::default();
        assert_eq!(bytemuck::bytes_of(&ubo).len(), 192);
    }
}
