// Graphics pipeline creation and management
//
// Pipelines are immutable: viewport and scissor are baked in, so a new
// swapchain extent means a new pipeline.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::LogicalDevice;
use super::render_pass::RenderPass;
use super::shader::{ShaderProgram, ShaderStage};
use crate::error::RendererError;
use crate::vertex::Vertex;

/// Opaque output, or straight alpha blending when `alpha_blend` is set.
pub fn color_blend_attachment(alpha_blend: bool) -> vk::PipelineColorBlendAttachmentState {
    let builder = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA);
    if !alpha_blend {
        return builder.blend_enable(false).build();
    }
    builder
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .build()
}

pub struct Pipeline {
    pub handle: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<LogicalDevice>,
}

impl Pipeline {
    pub fn new(
        device: Arc<LogicalDevice>,
        render_pass: &RenderPass,
        extent: vk::Extent2D,
        program: &ShaderProgram,
        set_layouts: &[vk::DescriptorSetLayout],
        alpha_blend: bool,
    ) -> Result<Self> {
        if program.has_stage(ShaderStage::Compute) {
            return Err(RendererError::PipelineBuild {
                shader: program.name.clone(),
                reason: "compute stage in a graphics pipeline".to_string(),
            }
            .into());
        }
        if !program.has_stage(ShaderStage::Vertex) {
            return Err(RendererError::PipelineBuild {
                shader: program.name.clone(),
                reason: "no vertex stage".to_string(),
            }
            .into());
        }

        let shader_stages = program.stage_infos();

        // Vertex input
        let bindings = [Vertex::binding_description()];
        let attributes = Vertex::attribute_descriptions();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor cover the whole render area
        let viewports = [vk::Viewport::builder()
            .x(0.0)
            .y(0.0)
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0)
            .build()];
        let scissors = [vk::Rect2D::builder()
            .offset(vk::Offset2D { x: 0, y: 0 })
            .extent(extent)
            .build()];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [color_blend_attachment(alpha_blend)];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);
        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;

        // Owns the layout from here on, so an error below still releases it.
        let mut pipeline = Self {
            handle: vk::Pipeline::null(),
            layout,
            device,
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(render_pass.handle)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            pipeline.device.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        }
        .map_err(|(_, e)| RendererError::PipelineBuild {
            shader: program.name.clone(),
            reason: e.to_string(),
        })?;

        pipeline.handle = pipelines
            .into_iter()
            .next()
            .context("Driver returned no pipeline")?;

        log::debug!(
            "Built pipeline for '{}' at {}x{}",
            program.name,
            extent.width,
            extent.height
        );
        Ok(pipeline)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.handle, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_output_disables_blending() {
        let state = color_blend_attachment(false);
        assert_eq!(state.blend_enable, vk::FALSE);
        assert_eq!(state.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn alpha_blend_uses_source_alpha() {
        let state = color_blend_attachment(true);
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(state.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
    }
}
