// Render pass and framebuffers
//
// Single colour attachment cleared on load and stored for presentation.
// Framebuffers are per swapchain image and die with the swapchain.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::LogicalDevice;
use super::swapchain::Swapchain;

/// Colour attachment: CLEAR/STORE, UNDEFINED -> PRESENT_SRC.
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build()
}

pub struct RenderPass {
    pub handle: vk::RenderPass,
    device: Arc<LogicalDevice>,
}

impl RenderPass {
    pub fn new(device: Arc<LogicalDevice>, format: vk::Format) -> Result<Self> {
        let attachments = [color_attachment(format)];

        let color_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();
        let color_refs = [color_ref];

        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .build();

        // The acquire semaphore is waited at COLOR_ATTACHMENT_OUTPUT, so the
        // layout transition must not start before that stage.
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build();

        let subpasses = [subpass];
        let dependencies = [dependency];
        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let handle = unsafe { device.device.create_render_pass(&create_info, None) }
            .context("Failed to create render pass")?;

        Ok(Self { handle, device })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_render_pass(self.handle, None) };
    }
}

/// One framebuffer per swapchain image view.
pub struct Framebuffers {
    pub handles: Vec<vk::Framebuffer>,
    device: Arc<LogicalDevice>,
}

impl Framebuffers {
    pub fn new(
        device: Arc<LogicalDevice>,
        render_pass: &RenderPass,
        swapchain: &Swapchain,
    ) -> Result<Self> {
        let mut framebuffers = Self {
            handles: Vec::with_capacity(swapchain.image_views.len()),
            device,
        };

        for &view in &swapchain.image_views {
            let attachments = [view];
            let create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass.handle)
                .attachments(&attachments)
                .width(swapchain.extent.width)
                .height(swapchain.extent.height)
                .layers(1);

            let framebuffer = unsafe { framebuffers.device.device.create_framebuffer(&create_info, None) }
                .context("Failed to create framebuffer")?;
            framebuffers.handles.push(framebuffer);
        }

        Ok(framebuffers)
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.handles {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_clears_and_ends_presentable() {
        let attachment = color_attachment(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(attachment.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachment.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(attachment.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(attachment.samples, vk::SampleCountFlags::TYPE_1);
    }
}
