//! Myth Pipeline
//!
//! Pipeline state, program and shader caches for the Myth engine, fed by an
//! asynchronous multi-stage compiler.
//!
//! A draw asks its material blueprint's pipeline state cache manager for a
//! PSO by shader property combination. Misses never stall the frame when a
//! lower-quality fallback exists: the fallback is returned and the exact PSO
//! is compiled on background threads, then published by
//! [`RendererRuntime::dispatch`].

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod backend;
pub mod errors;
pub mod renderer;
pub mod resources;
pub mod utils;

pub use backend::{
    NullRenderDevice, PipelineStateHandle, ProgramHandle, RenderDevice, ShaderHandle,
    ShaderLanguage, ShaderType, WgpuRenderDevice,
};
pub use errors::{PipelineError, Result};
pub use renderer::pipeline::{
    PipelineState, PipelineStateCache, PipelineStateCacheManager, PipelineStateCompiler,
    PipelineStateSignature, ShaderBuilder, ShaderCacheManager, ShaderCombinationIterator,
};
pub use renderer::{PipelineStateCompilerSettings, RendererRuntime, RendererRuntimeSettings};
pub use resources::{
    DynamicShaderPieces, MaterialBlueprint, MaterialShaderProperty, ShaderAssetLibrary,
    ShaderProperties, VisualImportance,
};
pub use utils::StringId;
