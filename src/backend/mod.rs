// Backend module - Vulkan abstraction layer
//
// Thin owning wrappers around ash. Each handle lives in a struct that
// destroys it on Drop and keeps an Arc to its parent, so parents always
// outlive children.

pub mod buffer;
pub mod capabilities;
pub mod command;
pub mod debug;
pub mod descriptor;
pub mod device;
pub mod frame;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::LogicalDevice;
pub use frame::{FrameDriver, FrameLoop, FrameStatus};
pub use instance::Instance;
pub use swapchain::Swapchain;
