// Presentation surface
//
// The native handle comes from the platform layer; this struct only owns the
// resulting VkSurfaceKHR and the loader needed to query and destroy it.

use anyhow::Result;
use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use super::instance::Instance;
use crate::platform::Platform;

pub struct Surface {
    pub loader: khr::Surface,
    pub handle: vk::SurfaceKHR,
    _instance: Arc<Instance>,
}

impl Surface {
    pub fn new(instance: Arc<Instance>, platform: &dyn Platform) -> Result<Self> {
        let handle = unsafe { platform.create_surface(&instance.entry, &instance.instance) }?;
        let loader = khr::Surface::new(&instance.entry, &instance.instance);
        log::debug!("Surface created");

        Ok(Self {
            loader,
            handle,
            _instance: instance,
        })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}
