//! lumen-vk: a small Vulkan rendering backend.
//!
//! The engine loop owns a [`RendererContext`] and drives it once per tick
//! with [`RendererContext::prepare_frame`] followed by
//! [`RendererContext::frame`]. Window integration goes through the
//! [`platform::Platform`] trait.

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod platform;
pub mod renderer;
pub mod vertex;

pub use backend::FrameStatus;
pub use config::Config;
pub use error::RendererError;
pub use renderer::{MeshHandle, RendererContext, TextureHandle};
pub use vertex::{UniformBufferObject, Vertex};
