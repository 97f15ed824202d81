// Vulkan instance
//
// Process-wide handle to the API. Owns the loader entry, the enabled layer
// list and the debug messenger. Everything else holds an Arc<Instance>, so
// the instance is always the last Vulkan object destroyed.

use anyhow::{Context, Result};
use ash::{vk, Entry};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use super::capabilities;
use super::debug::{self, DebugLevel, DebugMessenger};
use crate::error::RendererError;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct Instance {
    pub entry: Entry,
    pub instance: ash::Instance,
    /// Layers enabled on the instance, re-requested on the logical device.
    pub layers: Vec<&'static CStr>,
    debug_messenger: Option<DebugMessenger>,
}

impl Instance {
    /// Create the instance.
    ///
    /// `platform_extensions` is the fixed list supplied by the window layer
    /// (generic surface + platform surface). With `validation` set, the
    /// debug-utils extension and the Khronos validation layer are required
    /// as well.
    pub fn new(
        app_name: &str,
        platform_extensions: &[&'static CStr],
        validation: Option<DebugLevel>,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let version = entry
            .try_enumerate_instance_version()
            .context("Failed to query Vulkan version")?
            .unwrap_or(vk::API_VERSION_1_0);
        log::debug!(
            "Vulkan loader version {}.{}.{}",
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version)
        );

        let mut extensions: Vec<&'static CStr> = platform_extensions.to_vec();
        if validation.is_some() {
            extensions.push(ash::extensions::ext::DebugUtils::name());
        }

        let available_extensions = capabilities::instance_extension_names(&entry)?;
        let missing = capabilities::missing_names(&extensions, &available_extensions);
        if !missing.is_empty() {
            return Err(RendererError::MissingInstanceExtensions(missing).into());
        }

        let layers: Vec<&'static CStr> = if validation.is_some() {
            vec![VALIDATION_LAYER]
        } else {
            Vec::new()
        };
        let available_layers = capabilities::instance_layer_names(&entry)?;
        let missing = capabilities::missing_names(&layers, &available_layers);
        if !missing.is_empty() {
            return Err(RendererError::MissingLayers(missing).into());
        }

        let app_name_cstr = CString::new(app_name)?;
        let engine_name = c"lumen";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let extension_ptrs: Vec<_> = extensions.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<_> = layers.iter().map(|l| l.as_ptr()).collect();

        let mut instance_debug_info = validation.map(debug::create_info);

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);
        if let Some(info) = instance_debug_info.as_mut() {
            create_info = create_info.push_next(info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        let debug_messenger = match validation {
            Some(level) => match unsafe { DebugMessenger::new(&entry, &instance, level) } {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            },
            None => None,
        };

        log::info!(
            "Vulkan instance created ({} extensions, validation {})",
            extensions.len(),
            if validation.is_some() { "on" } else { "off" }
        );

        Ok(Arc::new(Self {
            entry,
            instance,
            layers,
            debug_messenger,
        }))
    }

    pub fn validation_enabled(&self) -> bool {
        self.debug_messenger.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");
        if let Some(mut messenger) = self.debug_messenger.take() {
            messenger.destroy();
        }
        unsafe { self.instance.destroy_instance(None) };
    }
}
