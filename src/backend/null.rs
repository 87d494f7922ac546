//! Headless render device.
//!
//! Creates no GPU objects; it stores what it was asked to create and counts
//! every call. Used for tooling runs without a GPU (shader cache warm-up) and
//! as the test double for the whole pipeline runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use slotmap::SlotMap;

use super::{
    Capabilities, NUMBER_OF_SHADER_TYPES, PipelineStateDescriptor, PipelineStateHandle,
    ProgramHandle, RenderDevice, RootSignature, ShaderBytecode, ShaderHandle, ShaderInfo,
    ShaderLanguage, ShaderType, StageShaders, VertexAttributes,
};
use crate::errors::{PipelineError, Result};

#[derive(Debug)]
struct NullShader {
    shader_type: ShaderType,
    language: ShaderLanguage,
    source_code: String,
}

#[derive(Debug)]
struct NullProgram {
    shaders: StageShaders,
}

#[derive(Debug)]
struct NullPipelineState {
    program: ProgramHandle,
    serialized_hash: u32,
}

pub struct NullRenderDevice {
    language: ShaderLanguage,
    capabilities: Capabilities,
    compile_failure_pattern: Option<String>,
    compile_delay: Option<Duration>,

    shaders: RwLock<SlotMap<ShaderHandle, NullShader>>,
    programs: RwLock<SlotMap<ProgramHandle, NullProgram>>,
    pipeline_states: RwLock<SlotMap<PipelineStateHandle, NullPipelineState>>,

    source_compiles: [AtomicUsize; NUMBER_OF_SHADER_TYPES],
    bytecode_loads: AtomicUsize,
    programs_created: AtomicUsize,
    pipeline_states_created: AtomicUsize,
}

impl Default for NullRenderDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl NullRenderDevice {
    #[must_use]
    pub fn new() -> Self {
        Self {
            language: ShaderLanguage::NULL,
            capabilities: Capabilities {
                shader_bytecode: true,
            },
            compile_failure_pattern: None,
            compile_delay: None,
            shaders: RwLock::new(SlotMap::with_key()),
            programs: RwLock::new(SlotMap::with_key()),
            pipeline_states: RwLock::new(SlotMap::with_key()),
            source_compiles: std::array::from_fn(|_| AtomicUsize::new(0)),
            bytecode_loads: AtomicUsize::new(0),
            programs_created: AtomicUsize::new(0),
            pipeline_states_created: AtomicUsize::new(0),
        }
    }

    /// Source code containing `pattern` is rejected like a compile error.
    #[must_use]
    pub fn with_compile_failure_pattern(mut self, pattern: &str) -> Self {
        self.compile_failure_pattern = Some(pattern.to_string());
        self
    }

    /// Every source compile sleeps for `delay`, to keep requests in flight.
    #[must_use]
    pub fn with_compile_delay(mut self, delay: Duration) -> Self {
        self.compile_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn without_shader_bytecode(mut self) -> Self {
        self.capabilities.shader_bytecode = false;
        self
    }

    /// Registers a shader tagged with another shading language, as left over
    /// by a device of a different backend.
    pub fn create_shader_with_language(
        &self,
        shader_type: ShaderType,
        language: ShaderLanguage,
        source_code: &str,
    ) -> ShaderHandle {
        self.shaders.write().insert(NullShader {
            shader_type,
            language,
            source_code: source_code.to_string(),
        })
    }

    // ── Statistics ─────────────────────────────────────────────────────────

    #[must_use]
    pub fn number_of_source_compiles(&self) -> usize {
        self.source_compiles
            .iter()
            .map(|c| c.load(Ordering::Acquire))
            .sum()
    }

    #[must_use]
    pub fn number_of_source_compiles_for(&self, shader_type: ShaderType) -> usize {
        self.source_compiles[shader_type.index()].load(Ordering::Acquire)
    }

    #[must_use]
    pub fn number_of_bytecode_loads(&self) -> usize {
        self.bytecode_loads.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn number_of_programs_created(&self) -> usize {
        self.programs_created.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn number_of_pipeline_states_created(&self) -> usize {
        self.pipeline_states_created.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn number_of_live_shaders(&self) -> usize {
        self.shaders.read().len()
    }

    #[must_use]
    pub fn number_of_live_programs(&self) -> usize {
        self.programs.read().len()
    }

    #[must_use]
    pub fn number_of_live_pipeline_states(&self) -> usize {
        self.pipeline_states.read().len()
    }

    // ── Introspection ──────────────────────────────────────────────────────

    #[must_use]
    pub fn shader_source_code(&self, shader: ShaderHandle) -> Option<String> {
        self.shaders
            .read()
            .get(shader)
            .map(|s| s.source_code.clone())
    }

    #[must_use]
    pub fn program_shaders(&self, program: ProgramHandle) -> Option<StageShaders> {
        self.programs.read().get(program).map(|p| p.shaders)
    }

    #[must_use]
    pub fn pipeline_state_program(&self, pipeline_state: PipelineStateHandle) -> Option<ProgramHandle> {
        self.pipeline_states.read().get(pipeline_state).map(|p| p.program)
    }

    #[must_use]
    pub fn pipeline_state_serialized_hash(&self, pipeline_state: PipelineStateHandle) -> Option<u32> {
        self.pipeline_states
            .read()
            .get(pipeline_state)
            .map(|p| p.serialized_hash)
    }

    /// Source code of the `shader_type` stage linked into a PSO.
    #[must_use]
    pub fn pipeline_state_source_code(
        &self,
        pipeline_state: PipelineStateHandle,
        shader_type: ShaderType,
    ) -> Option<String> {
        let program = self.pipeline_state_program(pipeline_state)?;
        let shader = self.program_shaders(program)?[shader_type.index()]?;
        self.shader_source_code(shader)
    }
}

impl RenderDevice for NullRenderDevice {
    fn name(&self) -> &str {
        "Null"
    }

    fn shader_language(&self) -> ShaderLanguage {
        self.language
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_shader_from_source_code(
        &self,
        shader_type: ShaderType,
        _vertex_attributes: &VertexAttributes,
        source_code: &str,
        bytecode: Option<&mut ShaderBytecode>,
    ) -> Result<ShaderHandle> {
        self.source_compiles[shader_type.index()].fetch_add(1, Ordering::AcqRel);
        if let Some(delay) = self.compile_delay {
            std::thread::sleep(delay);
        }

        if let Some(pattern) = &self.compile_failure_pattern
            && source_code.contains(pattern.as_str())
        {
            return Err(PipelineError::ShaderCompilation {
                shader_type,
                log: format!("error: unexpected token '{pattern}'"),
            });
        }

        if self.capabilities.shader_bytecode
            && let Some(bytecode) = bytecode
        {
            bytecode.set_bytes(source_code.as_bytes());
        }

        Ok(self.shaders.write().insert(NullShader {
            shader_type,
            language: self.language,
            source_code: source_code.to_string(),
        }))
    }

    fn create_shader_from_bytecode(
        &self,
        shader_type: ShaderType,
        _vertex_attributes: &VertexAttributes,
        bytecode: &ShaderBytecode,
    ) -> Result<ShaderHandle> {
        if !self.capabilities.shader_bytecode {
            return Err(PipelineError::ShaderCompilation {
                shader_type,
                log: "device does not support shader bytecode".to_string(),
            });
        }
        let source_code = std::str::from_utf8(bytecode.as_bytes()).map_err(|e| {
            PipelineError::ShaderCompilation {
                shader_type,
                log: format!("invalid bytecode: {e}"),
            }
        })?;

        self.bytecode_loads.fetch_add(1, Ordering::AcqRel);
        Ok(self.shaders.write().insert(NullShader {
            shader_type,
            language: self.language,
            source_code: source_code.to_string(),
        }))
    }

    fn shader_info(&self, shader: ShaderHandle) -> Option<ShaderInfo> {
        self.shaders.read().get(shader).map(|s| ShaderInfo {
            shader_type: s.shader_type,
            language: s.language,
        })
    }

    fn create_program(
        &self,
        _root_signature: &RootSignature,
        _vertex_attributes: &VertexAttributes,
        shaders: &StageShaders,
    ) -> Result<ProgramHandle> {
        {
            let table = self.shaders.read();
            if shaders.iter().flatten().any(|&s| !table.contains_key(s)) {
                return Err(PipelineError::ProgramCreation(
                    "stale shader handle".to_string(),
                ));
            }
        }

        self.programs_created.fetch_add(1, Ordering::AcqRel);
        Ok(self.programs.write().insert(NullProgram { shaders: *shaders }))
    }

    fn create_pipeline_state(
        &self,
        descriptor: &PipelineStateDescriptor<'_>,
    ) -> Result<PipelineStateHandle> {
        if !self.programs.read().contains_key(descriptor.program) {
            return Err(PipelineError::PipelineStateCreation(
                "stale program handle".to_string(),
            ));
        }

        self.pipeline_states_created.fetch_add(1, Ordering::AcqRel);
        Ok(self.pipeline_states.write().insert(NullPipelineState {
            program: descriptor.program,
            serialized_hash: descriptor.state.serialized_hash(),
        }))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_compile_is_counted_and_captures_bytecode() {
        let device = NullRenderDevice::new();
        let mut bytecode = ShaderBytecode::default();
        let shader = device
            .create_shader_from_source_code(
                ShaderType::Fragment,
                &VertexAttributes::new(),
                "fs",
                Some(&mut bytecode),
            )
            .unwrap();

        assert_eq!(device.number_of_source_compiles_for(ShaderType::Fragment), 1);
        assert_eq!(bytecode.as_bytes(), b"fs");
        assert_eq!(
            device.shader_info(shader).map(|i| i.shader_type),
            Some(ShaderType::Fragment)
        );
    }

    #[test]
    fn failure_pattern_rejects_source() {
        let device = NullRenderDevice::new().with_compile_failure_pattern("BROKEN");
        let result = device.create_shader_from_source_code(
            ShaderType::Vertex,
            &VertexAttributes::new(),
            "x BROKEN y",
            None,
        );
        assert!(matches!(result, Err(PipelineError::ShaderCompilation { .. })));
    }

    #[test]
    fn destroyed_shader_cannot_be_linked() {
        let device = NullRenderDevice::new();
        let shader = device
            .create_shader_from_source_code(ShaderType::Vertex, &VertexAttributes::new(), "vs", None)
            .unwrap();
        device.destroy_shader(shader);

        let mut shaders: StageShaders = [None; NUMBER_OF_SHADER_TYPES];
        shaders[ShaderType::Vertex.index()] = Some(shader);
        let result = device.create_program(&RootSignature::new(), &VertexAttributes::new(), &shaders);
        assert!(result.is_err());
    }
}
