//! Pipeline Module
//!
//! Produces pipeline state objects from material blueprints:
//! - `shader_builder`: template expansion of shader blueprints
//! - `signature`: pipeline state signature and per-stage combination ids
//! - `shader_cache` / `cache_blob`: shader dedup and its persisted form
//! - `program_cache`: linked programs per material blueprint
//! - `cache`: pipeline state caches with fallback search
//! - `compiler`: builder thread → compiler pool → dispatch
//! - `combination`: shader property combination enumeration
//! - `pipeline_key`: hashable fixed-function pipeline state

pub mod cache;
pub mod cache_blob;
pub mod combination;
pub mod compiler;
pub mod context;
pub mod pipeline_id;
pub mod pipeline_key;
pub mod program_cache;
pub mod shader_builder;
pub mod shader_cache;
pub(crate) mod shader_expression;
pub mod signature;

pub use cache::{PipelineStateCache, PipelineStateCacheManager};
pub use combination::ShaderCombinationIterator;
pub use compiler::{CompiledPipelineState, CompilerRequest, PipelineStateCompiler};
pub use context::CompilationContext;
pub use pipeline_id::{
    PipelineStateSignatureId, ProgramCacheId, ShaderCacheId, ShaderCombinationId,
    ShaderSourceCodeId,
};
pub use pipeline_key::PipelineState;
pub use program_cache::{ProgramCache, ProgramCacheManager};
pub use shader_builder::{BuildShader, ShaderBuilder};
pub use shader_cache::{LoadCacheSummary, ShaderCache, ShaderCacheManager, ShaderCacheResolution};
pub use signature::PipelineStateSignature;
