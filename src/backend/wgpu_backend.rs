//! wgpu render device.
//!
//! Consumes WGSL. Only the vertex and fragment stages exist in WebGPU, so
//! tessellation and geometry shader blueprints are rejected with
//! [`PipelineError::UnsupportedShaderType`]. Entry points follow the engine
//! convention: `vs_main` / `fs_main`.
//!
//! The "bytecode" of a WGSL shader is its UTF-8 source, which lets the
//! persisted shader cache skip blueprint expansion on the next run.
//!
//! Shader module and render pipeline creation run inside a validation error
//! scope; a captured error becomes a `ShaderCompilation` or
//! `PipelineStateCreation` error instead of reaching the device's uncaptured
//! error handler. Error scopes are per thread, so concurrent compiler workers
//! never see each other's errors.

use parking_lot::RwLock;
use slotmap::SlotMap;

use super::{
    Capabilities, PipelineStateDescriptor, PipelineStateHandle, ProgramHandle, RenderDevice,
    RootSignature, ShaderBytecode, ShaderHandle, ShaderInfo, ShaderLanguage, ShaderType,
    StageShaders, VertexAttributes,
};
use crate::errors::{PipelineError, Result};

struct WgpuShader {
    shader_type: ShaderType,
    module: wgpu::ShaderModule,
}

struct WgpuProgram {
    vertex: wgpu::ShaderModule,
    fragment: Option<wgpu::ShaderModule>,
    layout: wgpu::PipelineLayout,
}

pub struct WgpuRenderDevice {
    device: wgpu::Device,
    shaders: RwLock<SlotMap<ShaderHandle, WgpuShader>>,
    programs: RwLock<SlotMap<ProgramHandle, WgpuProgram>>,
    pipeline_states: RwLock<SlotMap<PipelineStateHandle, wgpu::RenderPipeline>>,
}

impl WgpuRenderDevice {
    #[must_use]
    pub fn new(device: wgpu::Device) -> Self {
        Self {
            device,
            shaders: RwLock::new(SlotMap::with_key()),
            programs: RwLock::new(SlotMap::with_key()),
            pipeline_states: RwLock::new(SlotMap::with_key()),
        }
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Resolves a PSO handle for draw submission.
    #[must_use]
    pub fn render_pipeline(&self, pipeline_state: PipelineStateHandle) -> Option<wgpu::RenderPipeline> {
        self.pipeline_states.read().get(pipeline_state).cloned()
    }

    fn create_module(&self, shader_type: ShaderType, source_code: &str) -> Result<ShaderHandle> {
        if !matches!(shader_type, ShaderType::Vertex | ShaderType::Fragment) {
            return Err(PipelineError::UnsupportedShaderType(shader_type));
        }

        let (module, error) = self.validated(|| {
            self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("{shader_type} Shader Module")),
                source: wgpu::ShaderSource::Wgsl(source_code.into()),
            })
        });
        if let Some(error) = error {
            return Err(PipelineError::ShaderCompilation {
                shader_type,
                log: error.to_string(),
            });
        }

        Ok(self.shaders.write().insert(WgpuShader {
            shader_type,
            module,
        }))
    }

    /// Runs `create` inside a validation error scope and returns what it
    /// captured.
    fn validated<T>(&self, create: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
        let scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let created = create();
        let error = pollster::block_on(scope.pop());
        (created, error)
    }
}

impl RenderDevice for WgpuRenderDevice {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn shader_language(&self) -> ShaderLanguage {
        ShaderLanguage::WGSL
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            shader_bytecode: true,
        }
    }

    fn create_shader_from_source_code(
        &self,
        shader_type: ShaderType,
        _vertex_attributes: &VertexAttributes,
        source_code: &str,
        bytecode: Option<&mut ShaderBytecode>,
    ) -> Result<ShaderHandle> {
        let shader = self.create_module(shader_type, source_code)?;
        if let Some(bytecode) = bytecode {
            bytecode.set_bytes(source_code.as_bytes());
        }
        Ok(shader)
    }

    fn create_shader_from_bytecode(
        &self,
        shader_type: ShaderType,
        _vertex_attributes: &VertexAttributes,
        bytecode: &ShaderBytecode,
    ) -> Result<ShaderHandle> {
        let source_code = std::str::from_utf8(bytecode.as_bytes()).map_err(|e| {
            PipelineError::ShaderCompilation {
                shader_type,
                log: format!("WGSL bytecode is not UTF-8: {e}"),
            }
        })?;
        self.create_module(shader_type, source_code)
    }

    fn shader_info(&self, shader: ShaderHandle) -> Option<ShaderInfo> {
        self.shaders.read().get(shader).map(|s| ShaderInfo {
            shader_type: s.shader_type,
            language: ShaderLanguage::WGSL,
        })
    }

    fn create_program(
        &self,
        root_signature: &RootSignature,
        _vertex_attributes: &VertexAttributes,
        shaders: &StageShaders,
    ) -> Result<ProgramHandle> {
        let (vertex, fragment) = {
            let table = self.shaders.read();
            let module_of = |shader_type: ShaderType| -> Result<Option<wgpu::ShaderModule>> {
                match shaders[shader_type.index()] {
                    Some(handle) => table
                        .get(handle)
                        .map(|s| Some(s.module.clone()))
                        .ok_or_else(|| {
                            PipelineError::ProgramCreation(format!(
                                "stale {shader_type} shader handle"
                            ))
                        }),
                    None => Ok(None),
                }
            };
            let vertex = module_of(ShaderType::Vertex)?.ok_or_else(|| {
                PipelineError::ProgramCreation("program has no vertex shader".to_string())
            })?;
            (vertex, module_of(ShaderType::Fragment)?)
        };

        let bind_group_layouts: Vec<wgpu::BindGroupLayout> = root_signature
            .bind_group_layouts()
            .iter()
            .map(|desc| {
                self.device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: desc.label.as_deref(),
                        entries: &desc.entries,
                    })
            })
            .collect();
        let layout_refs: Vec<&wgpu::BindGroupLayout> = bind_group_layouts.iter().collect();

        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Program Pipeline Layout"),
                bind_group_layouts: &layout_refs,
                immediate_size: 0,
            });

        Ok(self.programs.write().insert(WgpuProgram {
            vertex,
            fragment,
            layout,
        }))
    }

    fn create_pipeline_state(
        &self,
        descriptor: &PipelineStateDescriptor<'_>,
    ) -> Result<PipelineStateHandle> {
        let programs = self.programs.read();
        let program = programs.get(descriptor.program).ok_or_else(|| {
            PipelineError::PipelineStateCreation("stale program handle".to_string())
        })?;

        let state = descriptor.state;
        let vertex_buffers = descriptor.vertex_attributes.wgpu_layouts();
        let color_targets = state.wgpu_color_targets();

        let (pipeline, error) = self.validated(|| {
            self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: descriptor.label,
                layout: Some(&program.layout),
                vertex: wgpu::VertexState {
                    module: &program.vertex,
                    entry_point: Some("vs_main"),
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: program.fragment.as_ref().map(|module| wgpu::FragmentState {
                    module,
                    entry_point: Some("fs_main"),
                    targets: &color_targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: state.primitive(),
                depth_stencil: state.wgpu_depth_stencil(),
                multisample: state.wgpu_multisample(),
                multiview_mask: None,
                cache: None,
            })
        });
        drop(programs);
        if let Some(error) = error {
            return Err(PipelineError::PipelineStateCreation(error.to_string()));
        }

        Ok(self.pipeline_states.write().insert(pipeline))
    }

    fn destroy_shader(&self, shader: ShaderHandle) {
        self.shaders.write().remove(shader);
    }

    fn destroy_program(&self, program: ProgramHandle) {
        self.programs.write().remove(program);
    }

    fn destroy_pipeline_state(&self, pipeline_state: PipelineStateHandle) {
        self.pipeline_states.write().remove(pipeline_state);
    }
}
