// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// A swapchain is never resized in place: the renderer drops it (after the
// device is idle) and builds a new one against the current surface extent.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use super::device::LogicalDevice;
use super::physical_device::SwapchainSupport;
use super::surface::Surface;

/// Result of asking the swapchain for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface and must be rebuilt
    /// before anything is drawn.
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Suboptimal or out of date; the caller must recreate the swapchain.
    Stale,
}

/// Prefer B8G8R8A8_SRGB with the sRGB non-linear colour space, else the
/// first format the surface reports.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// The configured mode if supported, else MAILBOX (low latency, no
/// tearing), else FIFO which every implementation must provide.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    [preferred, vk::PresentModeKHR::MAILBOX]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// `currentExtent` verbatim, unless it is the u32::MAX sentinel meaning the
/// surface size follows the swapchain; then the requested size clamped into
/// the supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Queue families the images are shared between, empty for exclusive use.
pub fn image_sharing_families(graphics: u32, presentation: u32) -> Vec<u32> {
    if graphics == presentation {
        Vec::new()
    } else {
        vec![graphics, presentation]
    }
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    device: Arc<LogicalDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<LogicalDevice>,
        surface: &Surface,
        requested_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        // Capabilities change with the window, so the cached snapshot is not reused.
        let support = SwapchainSupport::query(surface, device.physical.handle)?;
        let caps = &support.capabilities;

        let format = choose_surface_format(&support.formats).context("No suitable surface format")?;
        let present_mode = choose_present_mode(&support.present_modes, preferred_present_mode);
        let extent = choose_extent(caps, requested_extent);
        let image_count = choose_image_count(caps);

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}, {} images requested",
            extent.width,
            extent.height,
            format.format,
            present_mode,
            image_count
        );

        let sharing = image_sharing_families(device.families.graphics, device.families.presentation);
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);
        create_info = if sharing.is_empty() {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&sharing)
        };

        let loader = khr::Swapchain::new(&device.instance.instance, &device.device);
        let handle = unsafe { loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let mut swapchain = Self {
            handle,
            loader,
            images: Vec::new(),
            image_views: Vec::new(),
            format,
            present_mode,
            extent,
            device,
        };

        swapchain.images = unsafe { swapchain.loader.get_swapchain_images(handle) }
            .context("Failed to get swapchain images")?;

        for &image in &swapchain.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: vk::REMAINING_MIP_LEVELS,
                    base_array_layer: 0,
                    layer_count: vk::REMAINING_ARRAY_LAYERS,
                });

            let view = unsafe { swapchain.device.device.create_image_view(&create_info, None) }
                .context("Failed to create swapchain image view")?;
            swapchain.image_views.push(view);
        }

        log::info!("Created swapchain with {} images", swapchain.images.len());
        Ok(swapchain)
    }

    /// Acquire next image, signalling `semaphore` when it is ready.
    pub fn acquire(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null())
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        wait_semaphores: &[vk::Semaphore],
        image_index: u32,
    ) -> Result<PresentOutcome> {
        let swapchains = [self.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounded_caps() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn bounded_current_extent_is_used_verbatim() {
        let caps = bounded_caps();
        assert_eq!(choose_extent(&caps, extent(1920, 1080)), extent(800, 600));
    }

    #[test]
    fn sentinel_extent_clamps_request() {
        let mut caps = bounded_caps();
        caps.current_extent = extent(u32::MAX, u32::MAX);
        caps.min_image_extent = extent(64, 64);
        caps.max_image_extent = extent(1024, 768);

        assert_eq!(choose_extent(&caps, extent(800, 600)), extent(800, 600));
        assert_eq!(choose_extent(&caps, extent(4000, 10)), extent(1024, 64));
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        let mut caps = bounded_caps();
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);

        caps.max_image_count = 0;
        caps.min_image_count = 4;
        assert_eq!(choose_image_count(&caps), 5);
    }

    #[test]
    fn srgb_format_is_preferred() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[unorm, srgb]), Some(srgb));
        assert_eq!(choose_surface_format(&[unorm]), Some(unorm));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_falls_back_to_mailbox_then_fifo() {
        use ash::vk::PresentModeKHR as M;
        assert_eq!(choose_present_mode(&[M::FIFO, M::IMMEDIATE], M::IMMEDIATE), M::IMMEDIATE);
        assert_eq!(choose_present_mode(&[M::FIFO, M::MAILBOX], M::IMMEDIATE), M::MAILBOX);
        assert_eq!(choose_present_mode(&[M::FIFO], M::MAILBOX), M::FIFO);
        assert_eq!(choose_present_mode(&[], M::FIFO_RELAXED), M::FIFO);
    }

    #[test]
    fn differing_families_share_images() {
        assert!(image_sharing_families(0, 0).is_empty());
        assert_eq!(image_sharing_families(0, 2), vec![0, 2]);
    }
}
