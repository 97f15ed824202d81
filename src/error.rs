//! Fatal renderer error categories.
//!
//! Everything is propagated as `anyhow::Error`; these variants exist so the
//! engine loop (and tests) can tell initialization failures apart with
//! `downcast_ref`.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Vulkan instance does not support required extensions: {0:?}")]
    MissingInstanceExtensions(Vec<String>),

    #[error("Vulkan instance does not support required layers: {0:?}")]
    MissingLayers(Vec<String>),

    #[error("No Vulkan devices were found")]
    NoAdapters,

    #[error("No Vulkan device meets renderer requirements")]
    NoSuitableDevice,

    #[error("Could not resolve Vulkan entry point `{0}`")]
    MissingEntryPoint(&'static str),

    #[error("No memory type matches filter {type_filter:#b} with properties {properties:?}")]
    NoMemoryType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("Failed to build pipeline for shader `{shader}`: {reason}")]
    PipelineBuild { shader: String, reason: String },

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),
}
