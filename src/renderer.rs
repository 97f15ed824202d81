// =============================================================================
// RENDERER CONTEXT - Everything the engine loop talks to
// =============================================================================
//
// Owns the whole Vulkan object tree. Field order inside GpuState is the
// teardown order:
//
//   meshes/textures -> uniforms -> swapchain resources -> descriptor layout
//   -> frame sync -> surface -> device -> (instance, via the last Arc)
//
// Swapchain resources are rebuilt as a unit:
//   framebuffers -> pipeline -> render pass -> image views -> swapchain

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::ffi::{CStr, CString};
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::buffer::{MeshBuffer, MeshLayout};
use crate::backend::command::CommandBufferId;
use crate::backend::descriptor::{DescriptorSetLayout, FrameUniforms};
use crate::backend::device::LogicalDevice;
use crate::backend::frame::{AcquireOutcome, FrameDriver, FrameLoop, FrameStatus, PresentOutcome};
use crate::backend::image::Texture;
use crate::backend::instance::Instance;
use crate::backend::physical_device::select_physical_device;
use crate::backend::pipeline::Pipeline;
use crate::backend::render_pass::{Framebuffers, RenderPass};
use crate::backend::shader::{ShaderProgram, ShaderStage};
use crate::backend::surface::Surface;
use crate::backend::swapchain::Swapchain;
use crate::backend::sync::FrameSync;
use crate::config::Config;
use crate::error::RendererError;
use crate::platform::Platform;
use crate::vertex::{Index, UniformBufferObject, Vertex, INDEX_TYPE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(usize);

/// Per-second frame counter.
#[derive(Debug, Default)]
pub struct FrameStats {
    frames: u32,
    elapsed: f32,
}

impl FrameStats {
    /// Count one presented frame. Returns the frame rate once at least a
    /// second has accumulated, then starts a new window.
    pub fn record(&mut self, delta_time: f32) -> Option<f32> {
        if !delta_time.is_finite() || delta_time < 0.0 {
            return None;
        }
        self.frames += 1;
        self.elapsed += delta_time;
        if self.elapsed < 1.0 {
            return None;
        }
        let fps = self.frames as f32 / self.elapsed;
        self.frames = 0;
        self.elapsed = 0.0;
        Some(fps)
    }
}

/// Settings that survive swapchain recreation.
struct RenderSettings {
    clear_color: [f32; 4],
    alpha_blend: bool,
    present_mode: vk::PresentModeKHR,
    assets_dir: PathBuf,
    shader: String,
}

impl RenderSettings {
    fn from_config(config: &Config) -> Self {
        Self {
            clear_color: config.renderer.clear_color,
            alpha_blend: config.renderer.alpha_blend,
            present_mode: config.preferred_present_mode(),
            assets_dir: config.renderer.assets_dir.clone(),
            shader: config.renderer.shader.clone(),
        }
    }
}

/// Everything that depends on the swapchain images or extent.
struct SwapchainResources {
    framebuffers: Framebuffers,
    pipeline: Pipeline,
    render_pass: RenderPass,
    swapchain: Swapchain,
}

impl SwapchainResources {
    fn new(
        device: &Arc<LogicalDevice>,
        surface: &Surface,
        extent: vk::Extent2D,
        settings: &RenderSettings,
        set_layout: &DescriptorSetLayout,
    ) -> Result<Self> {
        let swapchain = Swapchain::new(device.clone(), surface, extent, settings.present_mode)?;
        let render_pass = RenderPass::new(device.clone(), swapchain.format.format)?;

        // Modules are only needed while the pipeline is being built.
        let program = ShaderProgram::load(
            device,
            &settings.assets_dir,
            &settings.shader,
            &[ShaderStage::Vertex, ShaderStage::Fragment],
        )?;
        let pipeline = Pipeline::new(
            device.clone(),
            &render_pass,
            swapchain.extent,
            &program,
            &[set_layout.handle],
            settings.alpha_blend,
        )?;
        let framebuffers = Framebuffers::new(device.clone(), &render_pass, &swapchain)?;

        Ok(Self {
            framebuffers,
            pipeline,
            render_pass,
            swapchain,
        })
    }
}

fn is_empty(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

struct GpuState {
    meshes: Vec<MeshBuffer>,
    textures: Vec<Texture>,
    uniforms: FrameUniforms,
    resources: Option<SwapchainResources>,
    descriptor_layout: DescriptorSetLayout,
    frame_sync: Vec<FrameSync>,
    command_buffers: Vec<CommandBufferId>,
    surface: Surface,
    device: Arc<LogicalDevice>,
    platform: Arc<dyn Platform>,
    settings: RenderSettings,
    ubo: UniformBufferObject,
}

impl GpuState {
    fn sync(&self, slot: usize) -> Result<&FrameSync> {
        self.frame_sync
            .get(slot)
            .with_context(|| format!("No sync objects for frame slot {}", slot))
    }

    fn command_buffer(&self, slot: usize) -> Result<vk::CommandBuffer> {
        self.command_buffers
            .get(slot)
            .and_then(|&id| self.device.graphics_command_buffer(id))
            .with_context(|| format!("No command buffer for frame slot {}", slot))
    }

    fn resources(&self) -> Result<&SwapchainResources> {
        self.resources.as_ref().context("Swapchain is not available")
    }
}

impl FrameDriver for GpuState {
    fn image_count(&self) -> usize {
        self.resources
            .as_ref()
            .map_or(0, |r| r.swapchain.images.len())
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.sync(slot)?.wait()
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let semaphore = self.sync(slot)?.image_available;
        self.resources()?.swapchain.acquire(semaphore)
    }

    fn wait_for_image_owner(&mut self, owner_slot: usize) -> Result<()> {
        self.sync(owner_slot)?.wait()
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let cmd = self.command_buffer(slot)?;
        self.uniforms.write(slot, &self.ubo)?;
        let descriptor_set = *self
            .uniforms
            .sets
            .get(slot)
            .with_context(|| format!("No descriptor set for frame slot {}", slot))?;

        let res = self.resources()?;
        let framebuffer = *res
            .framebuffers
            .handles
            .get(image_index as usize)
            .with_context(|| format!("No framebuffer for image {}", image_index))?;

        let d = &self.device.device;
        let begin_info = vk::CommandBufferBeginInfo::builder();
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.settings.clear_color,
            },
        }];
        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(res.render_pass.handle)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: res.swapchain.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;
            d.begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin command buffer")?;

            d.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, res.pipeline.handle);
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                res.pipeline.layout,
                0,
                &[descriptor_set],
                &[],
            );

            for mesh in &self.meshes {
                d.cmd_bind_vertex_buffers(cmd, 0, &[mesh.buffer.handle], &[0]);
                if mesh.layout.is_indexed() {
                    d.cmd_bind_index_buffer(
                        cmd,
                        mesh.buffer.handle,
                        mesh.layout.index_offset,
                        INDEX_TYPE,
                    );
                    d.cmd_draw_indexed(cmd, mesh.layout.index_count, 1, 0, 0, 0);
                } else {
                    d.cmd_draw(cmd, mesh.layout.vertex_count, 1, 0, 0);
                }
            }

            d.cmd_end_render_pass(cmd);
            d.end_command_buffer(cmd)
                .context("Failed to end command buffer")?;
        }
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let cmd = self.command_buffer(slot)?;
        let sync = self.sync(slot)?;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        sync.reset()?;
        unsafe {
            self.device
                .device
                .queue_submit(self.device.queues.graphics, &[submit_info], sync.in_flight)
        }
        .context("Failed to submit frame")
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let render_finished = self.sync(slot)?.render_finished;
        self.resources()?.swapchain.present(
            self.device.queues.presentation,
            &[render_finished],
            image_index,
        )
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        self.device.wait_idle()?;
        self.resources = None;

        let extent = self.platform.framebuffer_extent();
        if is_empty(extent) {
            log::debug!("Framebuffer is empty, deferring swapchain creation");
            return Ok(());
        }

        match SwapchainResources::new(
            &self.device,
            &self.surface,
            extent,
            &self.settings,
            &self.descriptor_layout,
        ) {
            Ok(resources) => {
                self.resources = Some(resources);
                Ok(())
            }
            Err(e) if matches!(
                e.downcast_ref::<RendererError>(),
                Some(RendererError::PipelineBuild { .. })
            ) =>
            {
                log::warn!("Pipeline rebuild failed, retrying next frame: {:#}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for GpuState {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("{:#}", e);
        }
    }
}

/// The rendering backend as seen by the engine loop.
pub struct RendererContext {
    frames: FrameLoop,
    stats: FrameStats,
    gpu: GpuState,
}

impl RendererContext {
    /// Build the whole object tree. Any failure here is fatal.
    pub fn initialize(platform: Arc<dyn Platform>, config: &Config) -> Result<Self> {
        log::info!("Initializing renderer...");

        let instance = Instance::new(
            &config.window.title,
            &platform.required_instance_extensions()?,
            config.validation_level(),
        )?;
        let validation = instance.validation_enabled();
        let surface = Surface::new(instance.clone(), platform.as_ref())?;

        let extra_extensions = config
            .renderer
            .required_device_extensions
            .iter()
            .map(|name| CString::new(name.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid device extension name")?;
        let mut device_extensions: Vec<&CStr> = vec![khr::Swapchain::name()];
        device_extensions.extend(extra_extensions.iter().map(CString::as_c_str));

        let physical = select_physical_device(&instance.instance, &surface, &device_extensions)?;
        let device = LogicalDevice::new(instance, physical, &device_extensions)?;

        let max_frames = config.max_frames_in_flight();
        let frame_sync = (0..max_frames)
            .map(|_| FrameSync::new(device.clone()))
            .collect::<Result<Vec<_>>>()?;
        let command_buffers = device.allocate_graphics_command_buffers(max_frames as u32)?;

        let descriptor_layout = DescriptorSetLayout::uniform(device.clone())?;
        let uniforms = FrameUniforms::new(device.clone(), &descriptor_layout, max_frames)?;

        let settings = RenderSettings::from_config(config);
        let extent = platform.framebuffer_extent();
        let resources = if is_empty(extent) {
            log::info!("Window is minimized, swapchain creation deferred");
            None
        } else {
            Some(SwapchainResources::new(
                &device,
                &surface,
                extent,
                &settings,
                &descriptor_layout,
            )?)
        };

        let gpu = GpuState {
            meshes: Vec::new(),
            textures: Vec::new(),
            uniforms,
            resources,
            descriptor_layout,
            frame_sync,
            command_buffers,
            surface,
            device,
            platform,
            settings,
            ubo: UniformBufferObject::default(),
        };
        let frames = FrameLoop::new(max_frames, gpu.image_count());

        log::info!(
            "Renderer initialized ({} frames in flight, validation {})",
            max_frames,
            if validation { "on" } else { "off" }
        );
        Ok(Self {
            frames,
            stats: FrameStats::default(),
            gpu,
        })
    }

    /// Wait for the GPU and release everything in dependency order.
    pub fn shutdown(self) {
        log::info!("Shutting down renderer...");
        drop(self);
        log::info!("Cleanup complete");
    }

    /// Wait for the current slot, acquire an image and record the frame.
    pub fn prepare_frame(&mut self, _delta_time: f32) -> Result<FrameStatus> {
        self.frames.prepare(&mut self.gpu)
    }

    /// Submit and present what `prepare_frame` recorded.
    pub fn frame(&mut self, delta_time: f32) -> Result<FrameStatus> {
        let status = self.frames.finish(&mut self.gpu)?;
        if status == FrameStatus::Presented {
            if let Some(fps) = self.stats.record(delta_time) {
                log::debug!("{:.1} FPS ({:.2}ms)", fps, 1000.0 / fps);
            }
        }
        Ok(status)
    }

    /// Upload a mesh into its own device-local buffer. It is drawn every
    /// frame from the next recording on.
    pub fn upload_mesh(&mut self, vertices: &[Vertex], indices: &[Index]) -> Result<MeshHandle> {
        let mesh = MeshBuffer::upload(&self.gpu.device, vertices, indices)?;
        self.gpu.meshes.push(mesh);
        Ok(MeshHandle(self.gpu.meshes.len() - 1))
    }

    pub fn mesh_layout(&self, handle: MeshHandle) -> Option<MeshLayout> {
        self.gpu.meshes.get(handle.0).map(|m| m.layout)
    }

    pub fn upload_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<TextureHandle> {
        let texture = Texture::upload(&self.gpu.device, width, height, rgba)?;
        self.gpu.textures.push(texture);
        Ok(TextureHandle(self.gpu.textures.len() - 1))
    }

    /// Transforms used by every frame recorded from now on.
    pub fn set_uniforms(&mut self, ubo: UniformBufferObject) {
        self.gpu.ubo = ubo;
    }

    /// Rebuild the swapchain now, or once the recorded frame is presented.
    pub fn recreate_swapchain(&mut self) -> Result<()> {
        self.frames.recreate(&mut self.gpu)
    }

    /// Schedule a swapchain rebuild for the next frame.
    pub fn notify_resized(&mut self) {
        self.frames.request_recreate();
    }

    pub fn is_close_requested(&self) -> bool {
        self.gpu.platform.is_close_requested()
    }

    pub fn device(&self) -> &Arc<LogicalDevice> {
        &self.gpu.device
    }

    pub fn swapchain_extent(&self) -> Option<vk::Extent2D> {
        self.gpu.resources.as_ref().map(|r| r.swapchain.extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_is_reported_once_per_second() {
        let mut stats = FrameStats::default();
        assert_eq!(stats.record(0.25), None);
        assert_eq!(stats.record(0.25), None);
        assert_eq!(stats.record(0.25), None);
        assert_eq!(stats.record(0.25), Some(4.0));
        // Window restarts after reporting.
        assert_eq!(stats.record(0.5), None);
    }

    #[test]
    fn bogus_delta_time_is_ignored() {
        let mut stats = FrameStats::default();
        assert_eq!(stats.record(f32::NAN), None);
        assert_eq!(stats.record(-1.0), None);
        assert_eq!(stats.record(1.0), Some(1.0));
    }

    #[test]
    fn empty_extent_detection() {
        assert!(is_empty(vk::Extent2D { width: 0, height: 600 }));
        assert!(is_empty(vk::Extent2D { width: 800, height: 0 }));
        assert!(!is_empty(vk::Extent2D { width: 1, height: 1 }));
    }
}
