// Shader module loading and management
//
// Vulkan uses SPIR-V bytecode for shaders. Compiled modules live next to
// their sources as `<assets>/shaders/<name>.<stage>.spv` (see build.rs).

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::device::LogicalDevice;
use crate::error::RendererError;

pub const ENTRY_POINT: &CStr = c"main";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    Compute,
}

impl ShaderStage {
    /// File-name component used by the asset convention.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::Fragment => "frag",
            Self::Geometry => "geom",
            Self::Compute => "comp",
        }
    }

    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Geometry => vk::ShaderStageFlags::GEOMETRY,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

pub fn shader_path(assets_dir: &Path, name: &str, stage: ShaderStage) -> PathBuf {
    assets_dir
        .join("shaders")
        .join(format!("{}.{}.spv", name, stage.extension()))
}

/// Read a SPIR-V file into aligned 32-bit words.
pub fn read_shader_bytecode(path: &Path) -> Result<Vec<u32>> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open shader {:?}", path))?;
    ash::util::read_spv(&mut file).with_context(|| format!("Invalid SPIR-V in {:?}", path))
}

pub struct ShaderModule {
    pub handle: vk::ShaderModule,
    pub stage: ShaderStage,
    device: Arc<LogicalDevice>,
}

impl ShaderModule {
    pub fn new(device: Arc<LogicalDevice>, code: &[u32], stage: ShaderStage) -> Result<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
        let handle = unsafe { device.device.create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;
        Ok(Self {
            handle,
            stage,
            device,
        })
    }

    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage.flags())
            .module(self.handle)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.handle, None) };
    }
}

fn pipeline_build_error(shader: &str, err: anyhow::Error) -> anyhow::Error {
    RendererError::PipelineBuild {
        shader: shader.to_string(),
        reason: format!("{:#}", err),
    }
    .into()
}

/// The set of stages one pipeline is built from.
pub struct ShaderProgram {
    pub name: String,
    pub modules: Vec<ShaderModule>,
}

impl ShaderProgram {
    /// Load every stage of `name`. A missing or malformed file, or a module
    /// the device rejects, is reported as a pipeline build failure.
    pub fn load(
        device: &Arc<LogicalDevice>,
        assets_dir: &Path,
        name: &str,
        stages: &[ShaderStage],
    ) -> Result<Self> {
        let mut modules = Vec::with_capacity(stages.len());
        for &stage in stages {
            let path = shader_path(assets_dir, name, stage);
            let code = read_shader_bytecode(&path).map_err(|e| pipeline_build_error(name, e))?;
            let module = ShaderModule::new(device.clone(), &code, stage)
                .map_err(|e| pipeline_build_error(name, e))?;
            modules.push(module);
            log::debug!("Loaded shader {:?}", path);
        }

        Ok(Self {
            name: name.to_string(),
            modules,
        })
    }

    pub fn stage_infos(&self) -> Vec<vk::PipelineShaderStageCreateInfo> {
        self.modules.iter().map(ShaderModule::stage_info).collect()
    }

    pub fn has_stage(&self, stage: ShaderStage) -> bool {
        self.modules.iter().any(|m| m.stage == stage)
    }
}
