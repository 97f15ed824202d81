//! Window-layer capabilities consumed by the renderer.
//!
//! The renderer never talks to a windowing library directly. It asks the
//! platform for the instance extensions it needs, a surface, the current
//! framebuffer extent and whether the user asked to close.

mod window;

pub use window::{surface_extensions_for, WinitPlatform};

use anyhow::Result;
use ash::vk;
use std::ffi::CStr;

pub trait Platform {
    /// Fixed list of instance extensions: the generic surface extension plus
    /// the platform surface extension.
    fn required_instance_extensions(&self) -> Result<Vec<&'static CStr>>;

    /// Create a surface for the native window.
    ///
    /// # Safety
    /// `instance` must have been created from `entry` with every extension
    /// returned by `required_instance_extensions` enabled.
    unsafe fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR>;

    /// Current framebuffer size in pixels. Zero while minimized.
    fn framebuffer_extent(&self) -> vk::Extent2D;

    fn is_close_requested(&self) -> bool;
}
