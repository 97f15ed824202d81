// Physical device selection
//
// Every adapter is snapshotted into a PhysicalDeviceInfo (properties,
// features, memory layout, queue families, surface support, extensions).
// The first adapter that passes verification wins; enumeration order breaks
// ties.

use anyhow::{Context, Result};
use ash::vk;
use std::collections::BTreeSet;
use std::ffi::CStr;
use std::fmt;

use super::capabilities;
use super::surface::Surface;
use crate::error::RendererError;

/// One queue family as reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamily {
    pub index: u32,
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    /// Whether this family can present to the target surface.
    pub presentation: bool,
}

impl QueueFamily {
    pub fn supports_graphics(&self) -> bool {
        self.flags.contains(vk::QueueFlags::GRAPHICS)
    }
    pub fn supports_compute(&self) -> bool {
        self.flags.contains(vk::QueueFlags::COMPUTE)
    }
    pub fn supports_transfer(&self) -> bool {
        self.flags.contains(vk::QueueFlags::TRANSFER)
    }
    pub fn supports_sparse_binding(&self) -> bool {
        self.flags.contains(vk::QueueFlags::SPARSE_BINDING)
    }
    pub fn supports_protected(&self) -> bool {
        self.flags.contains(vk::QueueFlags::PROTECTED)
    }
}

/// Queue families plus the indices chosen for each role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueFamilyTable {
    pub families: Vec<QueueFamily>,
    pub graphics: Option<u32>,
    pub presentation: Option<u32>,
    pub transfer: Option<u32>,
    pub compute: Option<u32>,
}

impl QueueFamilyTable {
    /// Resolve role indices.
    ///
    /// Graphics and presentation take the first family that supports them.
    /// Compute and transfer take the first supporting family, but move to a
    /// later one when the current pick is the graphics family. Transfer falls
    /// back to graphics when no family advertises the transfer bit.
    pub fn resolve(families: Vec<QueueFamily>) -> Self {
        let mut table = Self {
            families,
            ..Default::default()
        };

        for family in &table.families {
            let i = family.index;
            if table.graphics.is_none() && family.supports_graphics() {
                table.graphics = Some(i);
            }
            if table.presentation.is_none() && family.presentation {
                table.presentation = Some(i);
            }
            if family.supports_compute()
                && (table.compute.is_none() || table.compute == table.graphics)
            {
                table.compute = Some(i);
            }
            if family.supports_transfer()
                && (table.transfer.is_none() || table.transfer == table.graphics)
            {
                table.transfer = Some(i);
            }
        }

        if table.transfer.is_none() {
            table.transfer = table.graphics;
        }

        table
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.presentation.is_some()
    }

    /// Resolved indices with duplicates removed, ascending.
    pub fn unique_indices(&self) -> BTreeSet<u32> {
        [self.graphics, self.presentation, self.transfer, self.compute]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Surface capabilities, formats and present modes for one adapter.
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(surface: &Surface, physical_device: vk::PhysicalDevice) -> Result<Self> {
        let loader = &surface.loader;
        let handle = surface.handle;
        unsafe {
            Ok(Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical_device, handle)
                    .context("Failed to query surface capabilities")?,
                formats: loader
                    .get_physical_device_surface_formats(physical_device, handle)
                    .context("Failed to query surface formats")?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical_device, handle)
                    .context("Failed to query surface present modes")?,
            })
        }
    }
}

/// Immutable snapshot of one adapter, cached for the device lifetime.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyTable,
    pub swapchain_support: SwapchainSupport,
    pub extensions: Vec<String>,
}

impl PhysicalDeviceInfo {
    pub fn query(
        instance: &ash::Instance,
        surface: &Surface,
        handle: vk::PhysicalDevice,
    ) -> Result<Self> {
        let (properties, features, memory_properties, family_properties) = unsafe {
            (
                instance.get_physical_device_properties(handle),
                instance.get_physical_device_features(handle),
                instance.get_physical_device_memory_properties(handle),
                instance.get_physical_device_queue_family_properties(handle),
            )
        };

        let mut families = Vec::with_capacity(family_properties.len());
        for (index, props) in family_properties.iter().enumerate() {
            let index = index as u32;
            let presentation = unsafe {
                surface
                    .loader
                    .get_physical_device_surface_support(handle, index, surface.handle)
            }
            .context("Failed to query surface presentation support")?;
            families.push(QueueFamily {
                index,
                flags: props.queue_flags,
                queue_count: props.queue_count,
                presentation,
            });
        }

        Ok(Self {
            handle,
            properties,
            features,
            memory_properties,
            queue_families: QueueFamilyTable::resolve(families),
            swapchain_support: SwapchainSupport::query(surface, handle)?,
            extensions: capabilities::device_extension_names(instance, handle)?,
        })
    }

    pub fn name(&self) -> String {
        capabilities::fixed_str(&self.properties.device_name)
    }
}

/// Why an adapter was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRejection {
    MissingGraphicsQueue,
    MissingPresentationQueue,
    MissingExtensions(Vec<String>),
    NoSurfaceFormats,
    NoPresentModes,
    NoSamplerAnisotropy,
}

impl fmt::Display for DeviceRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingGraphicsQueue => write!(f, "missing graphics queue"),
            Self::MissingPresentationQueue => write!(f, "missing presentation queue"),
            Self::MissingExtensions(names) => write!(f, "missing extensions {:?}", names),
            Self::NoSurfaceFormats => write!(f, "no surface formats"),
            Self::NoPresentModes => write!(f, "no present modes"),
            Self::NoSamplerAnisotropy => write!(f, "no sampler anisotropy"),
        }
    }
}

/// Check an adapter against the renderer requirements.
///
/// Each condition rejects on its own: graphics queue, presentation queue,
/// required extensions, at least one surface format and present mode,
/// sampler anisotropy.
pub fn verify_device_capabilities(
    info: &PhysicalDeviceInfo,
    required_extensions: &[&CStr],
) -> Result<(), DeviceRejection> {
    if info.queue_families.graphics.is_none() {
        return Err(DeviceRejection::MissingGraphicsQueue);
    }
    if info.queue_families.presentation.is_none() {
        return Err(DeviceRejection::MissingPresentationQueue);
    }

    let missing = capabilities::missing_names(required_extensions, &info.extensions);
    if !missing.is_empty() {
        return Err(DeviceRejection::MissingExtensions(missing));
    }

    if info.swapchain_support.formats.is_empty() {
        return Err(DeviceRejection::NoSurfaceFormats);
    }
    if info.swapchain_support.present_modes.is_empty() {
        return Err(DeviceRejection::NoPresentModes);
    }

    if info.features.sampler_anisotropy != vk::TRUE {
        return Err(DeviceRejection::NoSamplerAnisotropy);
    }

    Ok(())
}

/// Index of the first candidate that passes verification.
pub fn first_suitable(
    candidates: &[PhysicalDeviceInfo],
    required_extensions: &[&CStr],
) -> Option<usize> {
    candidates.iter().position(|info| {
        match verify_device_capabilities(info, required_extensions) {
            Ok(()) => true,
            Err(reason) => {
                log::debug!("Rejecting device \"{}\": {}", info.name(), reason);
                false
            }
        }
    })
}

/// Drop adapters whose query failed. A failure rejects only that adapter.
fn keep_queried<T>(results: impl IntoIterator<Item = Result<T>>) -> Vec<T> {
    results
        .into_iter()
        .enumerate()
        .filter_map(|(index, result)| match result {
            Ok(info) => Some(info),
            Err(e) => {
                log::debug!("Skipping adapter {}: {:#}", index, e);
                None
            }
        })
        .collect()
}

/// Enumerate adapters and pick the first suitable one.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: &Surface,
    required_extensions: &[&CStr],
) -> Result<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .context("Failed to enumerate physical devices")?;
    if devices.is_empty() {
        return Err(RendererError::NoAdapters.into());
    }
    log::debug!("Found {} Vulkan device(s)", devices.len());

    let mut candidates = keep_queried(
        devices
            .into_iter()
            .map(|device| PhysicalDeviceInfo::query(instance, surface, device)),
    );

    for info in &candidates {
        log_device_details(info);
    }

    let index = first_suitable(&candidates, required_extensions)
        .ok_or(RendererError::NoSuitableDevice)?;
    let selected = candidates.swap_remove(index);

    log::info!("Selected GPU: {}", selected.name());
    log::info!(
        "API Version: {}.{}.{}",
        vk::api_version_major(selected.properties.api_version),
        vk::api_version_minor(selected.properties.api_version),
        vk::api_version_patch(selected.properties.api_version)
    );

    Ok(selected)
}

fn flag(set: bool, label: &'static str) -> &'static str {
    if set {
        label
    } else {
        "  "
    }
}

/// Dump adapter details at trace level.
fn log_device_details(info: &PhysicalDeviceInfo) {
    if !log::log_enabled!(log::Level::Trace) {
        return;
    }

    let props = &info.properties;
    log::trace!("Vulkan device \"{}\":", info.name());
    log::trace!(
        "-- API {}.{}.{}, type {:?}, max 2D image {}",
        vk::api_version_major(props.api_version),
        vk::api_version_minor(props.api_version),
        vk::api_version_patch(props.api_version),
        props.device_type,
        props.limits.max_image_dimension2_d
    );

    let memory = &info.memory_properties;
    log::trace!("-- Memory types ({}):", memory.memory_type_count);
    for memory_type in &memory.memory_types[..memory.memory_type_count as usize] {
        let f = memory_type.property_flags;
        log::trace!(
            "---- heap {}: {} {} {} {} {} {}",
            memory_type.heap_index,
            flag(f.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL), "DL"),
            flag(f.contains(vk::MemoryPropertyFlags::HOST_VISIBLE), "HV"),
            flag(f.contains(vk::MemoryPropertyFlags::HOST_COHERENT), "HC"),
            flag(f.contains(vk::MemoryPropertyFlags::HOST_CACHED), "HH"),
            flag(f.contains(vk::MemoryPropertyFlags::LAZILY_ALLOCATED), "LA"),
            flag(f.contains(vk::MemoryPropertyFlags::PROTECTED), "PT"),
        );
    }
    log::trace!("-- Memory heaps ({}):", memory.memory_heap_count);
    for (i, heap) in memory.memory_heaps[..memory.memory_heap_count as usize]
        .iter()
        .enumerate()
    {
        log::trace!(
            "---- heap {}: {:.2} MiB {}",
            i,
            heap.size as f64 / (1024.0 * 1024.0),
            flag(heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL), "DL")
        );
    }

    let queues = &info.queue_families;
    log::trace!("-- Queue families ({}):", queues.families.len());
    for family in &queues.families {
        let mark = |role: Option<u32>| if role == Some(family.index) { '*' } else { ' ' };
        log::trace!(
            "---- family {}: GFX{} CMP{} TRA{} SPB{} PRT{} PST{} ({} queues)",
            family.index,
            if family.supports_graphics() { mark(queues.graphics) } else { '-' },
            if family.supports_compute() { mark(queues.compute) } else { '-' },
            if family.supports_transfer() { mark(queues.transfer) } else { '-' },
            if family.supports_sparse_binding() { ' ' } else { '-' },
            if family.supports_protected() { ' ' } else { '-' },
            if family.presentation { mark(queues.presentation) } else { '-' },
            family.queue_count
        );
    }

    let caps = &info.swapchain_support.capabilities;
    log::trace!(
        "-- Swapchain: images {}..{}, extent {}x{}..{}x{}, {} formats, {} present modes",
        caps.min_image_count,
        caps.max_image_count,
        caps.min_image_extent.width,
        caps.min_image_extent.height,
        caps.max_image_extent.width,
        caps.max_image_extent.height,
        info.swapchain_support.formats.len(),
        info.swapchain_support.present_modes.len()
    );
    log::trace!("-- Extensions ({}): {:?}", info.extensions.len(), info.extensions);
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWAPCHAIN: &CStr = c"VK_KHR_swapchain";

    fn family(index: u32, flags: vk::QueueFlags, presentation: bool) -> QueueFamily {
        QueueFamily {
            index,
            flags,
            queue_count: 1,
            presentation,
        }
    }

    /// An adapter that passes every check.
    fn suitable_device() -> PhysicalDeviceInfo {
        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            ..Default::default()
        };
        PhysicalDeviceInfo {
            handle: vk::PhysicalDevice::null(),
            properties: vk::PhysicalDeviceProperties::default(),
            features,
            memory_properties: vk::PhysicalDeviceMemoryProperties::default(),
            queue_families: QueueFamilyTable::resolve(vec![family(
                0,
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                true,
            )]),
            swapchain_support: SwapchainSupport {
                capabilities: vk::SurfaceCapabilitiesKHR::default(),
                formats: vec![vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                }],
                present_modes: vec![vk::PresentModeKHR::FIFO],
            },
            extensions: vec!["VK_KHR_swapchain".to_string()],
        }
    }

    #[test]
    fn graphics_and_presentation_take_first_match() {
        let table = QueueFamilyTable::resolve(vec![
            family(0, vk::QueueFlags::TRANSFER, false),
            family(1, vk::QueueFlags::GRAPHICS, false),
            family(2, vk::QueueFlags::GRAPHICS, true),
            family(3, vk::QueueFlags::GRAPHICS, true),
        ]);
        assert_eq!(table.graphics, Some(1));
        assert_eq!(table.presentation, Some(2));
        assert!(table.is_complete());
    }

    #[test]
    fn compute_and_transfer_prefer_non_graphics_families() {
        let all = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let table = QueueFamilyTable::resolve(vec![
            family(0, all, true),
            family(1, vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, false),
            family(2, vk::QueueFlags::TRANSFER, false),
        ]);
        assert_eq!(table.graphics, Some(0));
        assert_eq!(table.compute, Some(1));
        // Once off the graphics family the first dedicated pick sticks.
        assert_eq!(table.transfer, Some(1));
        assert_eq!(table.unique_indices().into_iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn transfer_falls_back_to_graphics() {
        let table = QueueFamilyTable::resolve(vec![family(0, vk::QueueFlags::GRAPHICS, true)]);
        assert_eq!(table.transfer, Some(0));
        assert_eq!(table.compute, None);
        assert_eq!(table.unique_indices().len(), 1);
    }

    #[test]
    fn shared_graphics_family_is_kept_without_alternative() {
        let all = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let table = QueueFamilyTable::resolve(vec![family(0, all, true)]);
        assert_eq!(table.compute, Some(0));
        assert_eq!(table.transfer, Some(0));
    }

    #[test]
    fn suitable_device_passes() {
        assert_eq!(verify_device_capabilities(&suitable_device(), &[SWAPCHAIN]), Ok(()));
    }

    #[test]
    fn each_failing_condition_rejects_on_its_own() {
        let mut no_graphics = suitable_device();
        no_graphics.queue_families.graphics = None;
        assert_eq!(
            verify_device_capabilities(&no_graphics, &[SWAPCHAIN]),
            Err(DeviceRejection::MissingGraphicsQueue)
        );

        let mut no_present = suitable_device();
        no_present.queue_families.presentation = None;
        assert_eq!(
            verify_device_capabilities(&no_present, &[SWAPCHAIN]),
            Err(DeviceRejection::MissingPresentationQueue)
        );

        let mut no_swapchain = suitable_device();
        no_swapchain.extensions.clear();
        assert_eq!(
            verify_device_capabilities(&no_swapchain, &[SWAPCHAIN]),
            Err(DeviceRejection::MissingExtensions(vec!["VK_KHR_swapchain".into()]))
        );

        let mut no_formats = suitable_device();
        no_formats.swapchain_support.formats.clear();
        assert_eq!(
            verify_device_capabilities(&no_formats, &[SWAPCHAIN]),
            Err(DeviceRejection::NoSurfaceFormats)
        );

        let mut no_modes = suitable_device();
        no_modes.swapchain_support.present_modes.clear();
        assert_eq!(
            verify_device_capabilities(&no_modes, &[SWAPCHAIN]),
            Err(DeviceRejection::NoPresentModes)
        );

        let mut no_aniso = suitable_device();
        no_aniso.features.sampler_anisotropy = vk::FALSE;
        assert_eq!(
            verify_device_capabilities(&no_aniso, &[SWAPCHAIN]),
            Err(DeviceRejection::NoSamplerAnisotropy)
        );
    }

    #[test]
    fn first_suitable_uses_enumeration_order() {
        let mut rejected = suitable_device();
        rejected.features.sampler_anisotropy = vk::FALSE;
        let candidates = vec![rejected, suitable_device(), suitable_device()];
        assert_eq!(first_suitable(&candidates, &[SWAPCHAIN]), Some(1));
    }

    #[test]
    fn unknown_required_extension_rejects_every_device() {
        let candidates = vec![suitable_device(), suitable_device()];
        assert_eq!(
            first_suitable(&candidates, &[SWAPCHAIN, c"VK_VENDOR_does_not_exist"]),
            None
        );
    }

    #[test]
    fn failed_adapter_query_only_rejects_that_adapter() {
        let results = vec![
            Err(anyhow::anyhow!("surface support query failed")),
            Ok(suitable_device()),
        ];
        let candidates = keep_queried(results);
        assert_eq!(candidates.len(), 1);
        assert_eq!(first_suitable(&candidates, &[SWAPCHAIN]), Some(0));

        let none: Vec<PhysicalDeviceInfo> = keep_queried(vec![Err(anyhow::anyhow!("lost"))]);
        assert!(none.is_empty());
    }
}
