//! Backend Device Contract
//!
//! The pipeline runtime never talks to a graphics API directly. It consumes a
//! [`RenderDevice`] that can create stage shaders from source code or bytecode,
//! link them into programs, and build pipeline state objects (PSOs).
//!
//! Backend objects live in generation-checked arenas inside the device. The
//! caches only store the `Copy` handles ([`ShaderHandle`], [`ProgramHandle`],
//! [`PipelineStateHandle`]), so holding a handle never extends an object's
//! lifetime and a destroyed object is detected instead of dangling.
//!
//! Two implementations are provided:
//!
//! | Device | Use case |
//! |--------|----------|
//! | [`NullRenderDevice`] | Headless tooling and tests, counts every compile call |
//! | [`WgpuRenderDevice`] | wgpu, WGSL vertex + fragment stages |
//!
//! Creation calls must be thread-safe; the compiler pool calls them
//! concurrently.

pub mod null;
pub mod root_signature;
pub mod vertex;
pub mod wgpu_backend;

use std::fmt;

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::errors::Result;
use crate::renderer::pipeline::pipeline_key::PipelineState;

pub use null::NullRenderDevice;
pub use root_signature::{BindGroupLayoutDesc, RootSignature};
pub use vertex::{OwnedVertexBufferDesc, VertexAttributes};
pub use wgpu_backend::WgpuRenderDevice;

new_key_type! {
    /// Handle to a backend stage shader.
    pub struct ShaderHandle;
    /// Handle to a backend program (linked stage shaders).
    pub struct ProgramHandle;
    /// Handle to a backend pipeline state object.
    pub struct PipelineStateHandle;
}

pub const NUMBER_OF_SHADER_TYPES: usize = 5;

/// Programmable pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShaderType {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
}

impl ShaderType {
    pub const ALL: [ShaderType; NUMBER_OF_SHADER_TYPES] = [
        ShaderType::Vertex,
        ShaderType::TessellationControl,
        ShaderType::TessellationEvaluation,
        ShaderType::Geometry,
        ShaderType::Fragment,
    ];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ShaderType::Vertex => "Vertex",
            ShaderType::TessellationControl => "TessellationControl",
            ShaderType::TessellationEvaluation => "TessellationEvaluation",
            ShaderType::Geometry => "Geometry",
            ShaderType::Fragment => "Fragment",
        }
    }
}

impl fmt::Display for ShaderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name of the shading language a device consumes ("WGSL", "Null", ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderLanguage(pub &'static str);

impl ShaderLanguage {
    pub const WGSL: Self = Self("WGSL");
    pub const NULL: Self = Self("Null");
}

impl fmt::Display for ShaderLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// The device can hand out bytecode for compiled shaders and recreate
    /// shaders from it. Without it nothing is persisted to the shader cache.
    pub shader_bytecode: bool,
}

/// Opaque compiled shader blob as produced by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ShaderBytecode {
    bytes: Vec<u8>,
}

impl ShaderBytecode {
    #[inline]
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn set_bytes(&mut self, bytes: &[u8]) {
        self.bytes.clear();
        self.bytes.extend_from_slice(bytes);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderInfo {
    pub shader_type: ShaderType,
    pub language: ShaderLanguage,
}

/// Stage shaders handed to [`RenderDevice::create_program`], indexed by
/// [`ShaderType::index`].
pub type StageShaders = [Option<ShaderHandle>; NUMBER_OF_SHADER_TYPES];

/// Everything needed to build a PSO: the fixed-function state from the
/// material blueprint plus the dynamic parts (program, vertex input, root
/// signature).
#[derive(Debug, Clone, Copy)]
pub struct PipelineStateDescriptor<'a> {
    pub program: ProgramHandle,
    pub root_signature: &'a RootSignature,
    pub vertex_attributes: &'a VertexAttributes,
    pub state: &'a PipelineState,
    pub label: Option<&'a str>,
}

/// Backend graphics device as seen by the pipeline runtime.
pub trait RenderDevice: Send + Sync {
    fn name(&self) -> &str;

    fn shader_language(&self) -> ShaderLanguage;

    fn capabilities(&self) -> Capabilities;

    /// Compiles `source_code` for `shader_type`. When `bytecode` is given and
    /// the device supports it, the compiled blob is written into it.
    fn create_shader_from_source_code(
        &self,
        shader_type: ShaderType,
        vertex_attributes: &VertexAttributes,
        source_code: &str,
        bytecode: Option<&mut ShaderBytecode>,
    ) -> Result<ShaderHandle>;

    fn create_shader_from_bytecode(
        &self,
        shader_type: ShaderType,
        vertex_attributes: &VertexAttributes,
        bytecode: &ShaderBytecode,
    ) -> Result<ShaderHandle>;

    /// Returns `None` for destroyed or foreign handles.
    fn shader_info(&self, shader: ShaderHandle) -> Option<ShaderInfo>;

    fn create_program(
        &self,
        root_signature: &RootSignature,
        vertex_attributes: &VertexAttributes,
        shaders: &StageShaders,
    ) -> Result<ProgramHandle>;

    fn create_pipeline_state(
        &self,
        descriptor: &PipelineStateDescriptor<'_>,
    ) -> Result<PipelineStateHandle>;

    fn destroy_shader(&self, shader: ShaderHandle);

    fn destroy_program(&self, program: ProgramHandle);

    fn destroy_pipeline_state(&self, pipeline_state: PipelineStateHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_type_index_matches_all_order() {
        for (i, shader_type) in ShaderType::ALL.iter().enumerate() {
            assert_eq!(shader_type.index(), i);
        }
    }

    #[test]
    fn shader_type_display() {
        assert_eq!(ShaderType::Fragment.to_string(), "Fragment");
        assert_eq!(ShaderLanguage::WGSL.to_string(), "WGSL");
    }
}
