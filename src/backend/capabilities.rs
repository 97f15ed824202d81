// Capability validation
//
// Requested extension/layer names are checked against what the host reports.
// A missing name is never dropped silently: callers abort initialization.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::{c_char, CStr};

/// Names from `requested` that do not appear in `available`, in request order.
pub fn missing_names(requested: &[&CStr], available: &[String]) -> Vec<String> {
    requested
        .iter()
        .map(|name| name.to_string_lossy())
        .filter(|name| !available.iter().any(|a| a == name.as_ref()))
        .map(|name| name.into_owned())
        .collect()
}

/// True iff every requested name is available. An empty request always passes.
pub fn validate_extensions(requested: &[&CStr], available: &[String]) -> bool {
    missing_names(requested, available).is_empty()
}

/// Extension names supported by the Vulkan instance.
pub fn instance_extension_names(entry: &ash::Entry) -> Result<Vec<String>> {
    let properties = entry
        .enumerate_instance_extension_properties(None)
        .context("Failed to enumerate instance extensions")?;
    Ok(properties
        .iter()
        .map(|p| fixed_str(&p.extension_name))
        .collect())
}

/// Layer names supported by the Vulkan instance.
pub fn instance_layer_names(entry: &ash::Entry) -> Result<Vec<String>> {
    let properties = entry
        .enumerate_instance_layer_properties()
        .context("Failed to enumerate instance layers")?;
    Ok(properties.iter().map(|p| fixed_str(&p.layer_name)).collect())
}

/// Extension names supported by a physical device.
pub fn device_extension_names(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<Vec<String>> {
    let properties = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .context("Failed to enumerate device extensions")?;
    Ok(properties
        .iter()
        .map(|p| fixed_str(&p.extension_name))
        .collect())
}

/// Convert a NUL-terminated fixed-size Vulkan name array into a String.
pub(crate) fn fixed_str(raw: &[c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
