//! Renderer Runtime
//!
//! [`RendererRuntime`] owns everything the pipeline machinery needs: the
//! compilation context (backend device, shader asset library, shader cache
//! manager), the asynchronous [`PipelineStateCompiler`] and the registered
//! material blueprints with their pipeline state caches.
//!
//! # Frame Usage
//!
//! ```rust,ignore
//! let mut runtime = RendererRuntime::new(device, library, RendererRuntimeSettings::default())?;
//! let mesh = runtime.add_material_blueprint(blueprint);
//!
//! // Per draw: never blocks, may return a fallback or nothing on first use
//! if let Some(pso) = runtime.get_pipeline_state(mesh, &properties, false) {
//!     // bind and draw
//! }
//!
//! // Once per frame
//! runtime.dispatch();
//! ```
//!
//! Dropping the runtime flushes the compiler and destroys every backend
//! object the caches own.

pub mod pipeline;
pub mod settings;

use std::io::{Read, Write};
use std::sync::Arc;

use crate::backend::{PipelineStateHandle, RenderDevice};
use crate::errors::{PipelineError, Result};
use crate::resources::{
    DynamicShaderPiecesPerStage, MaterialBlueprint, MaterialBlueprintResourceManager,
    ShaderAssetLibrary, ShaderProperties,
};
use crate::utils::AssetId;

pub use pipeline::{
    CompilationContext, LoadCacheSummary, PipelineState, PipelineStateCache,
    PipelineStateCacheManager, PipelineStateCompiler, ShaderCacheManager,
};
pub use settings::{PipelineStateCompilerSettings, RendererRuntimeSettings};

pub struct RendererRuntime {
    context: Arc<CompilationContext>,
    compiler: PipelineStateCompiler,
    material_blueprints: MaterialBlueprintResourceManager,
    settings: RendererRuntimeSettings,
}

impl RendererRuntime {
    pub fn new(
        device: Arc<dyn RenderDevice>,
        library: Arc<ShaderAssetLibrary>,
        settings: RendererRuntimeSettings,
    ) -> Result<Self> {
        log::info!(
            "Renderer runtime on '{}' ({} shaders)",
            device.name(),
            device.shader_language()
        );
        let context = Arc::new(CompilationContext::new(
            device,
            library,
            settings.debug_print_generated_source,
        ));
        let compiler = PipelineStateCompiler::new(Arc::clone(&context), &settings.compiler)?;
        Ok(Self {
            context,
            compiler,
            material_blueprints: MaterialBlueprintResourceManager::new(),
            settings,
        })
    }

    // === Accessors ===

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &RendererRuntimeSettings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn context(&self) -> &Arc<CompilationContext> {
        &self.context
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &dyn RenderDevice {
        self.context.device()
    }

    #[inline]
    #[must_use]
    pub fn library(&self) -> &ShaderAssetLibrary {
        self.context.library()
    }

    #[inline]
    #[must_use]
    pub fn shader_cache_manager(&self) -> &ShaderCacheManager {
        self.context.shader_cache_manager()
    }

    #[inline]
    #[must_use]
    pub fn compiler(&self) -> &PipelineStateCompiler {
        &self.compiler
    }

    #[inline]
    #[must_use]
    pub fn material_blueprints(&self) -> &MaterialBlueprintResourceManager {
        &self.material_blueprints
    }

    // === Material Blueprints ===

    pub fn add_material_blueprint(&mut self, material_blueprint: MaterialBlueprint) -> AssetId {
        self.material_blueprints
            .add(self.context.device(), Arc::new(material_blueprint))
    }

    pub fn remove_material_blueprint(&mut self, material_blueprint_id: AssetId) -> bool {
        self.material_blueprints
            .remove(self.context.device(), material_blueprint_id)
    }

    /// PSO for a shader property combination under the blueprint's default
    /// dynamic pieces and its own pipeline state.
    pub fn get_pipeline_state(
        &mut self,
        material_blueprint_id: AssetId,
        shader_properties: &ShaderProperties,
        allow_emergency_synchronous_compilation: bool,
    ) -> Option<PipelineStateHandle> {
        let material_blueprint = Arc::clone(
            self.material_blueprints
                .get(material_blueprint_id)?
                .material_blueprint(),
        );
        self.get_pipeline_state_with(
            material_blueprint_id,
            None,
            shader_properties,
            &material_blueprint.default_dynamic_shader_pieces(),
            allow_emergency_synchronous_compilation,
        )
    }

    /// PSO lookup with explicit dynamic pieces and an optional pipeline state
    /// overriding the blueprint's.
    pub fn get_pipeline_state_with(
        &mut self,
        material_blueprint_id: AssetId,
        pipeline_state: Option<&PipelineState>,
        shader_properties: &ShaderProperties,
        dynamic_shader_pieces: &DynamicShaderPiecesPerStage,
        allow_emergency_synchronous_compilation: bool,
    ) -> Option<PipelineStateHandle> {
        let Some(resource) = self.material_blueprints.get_mut(material_blueprint_id) else {
            log::warn!("Unknown material blueprint {material_blueprint_id}");
            return None;
        };
        let manager = resource.pipeline_state_cache_manager_mut();
        match pipeline_state {
            Some(pipeline_state) => manager.get_pipeline_state_cache_by_combination_with_state(
                &self.compiler,
                pipeline_state,
                shader_properties,
                dynamic_shader_pieces,
                allow_emergency_synchronous_compilation,
            ),
            None => manager.get_pipeline_state_cache_by_combination(
                &self.compiler,
                shader_properties,
                dynamic_shader_pieces,
                allow_emergency_synchronous_compilation,
            ),
        }
    }

    /// Existing cache entry of a combination, without creating one.
    #[must_use]
    pub fn pipeline_state_cache(
        &self,
        material_blueprint_id: AssetId,
        shader_properties: &ShaderProperties,
    ) -> Option<&PipelineStateCache> {
        let resource = self.material_blueprints.get(material_blueprint_id)?;
        resource.pipeline_state_cache_manager().find_pipeline_state_cache(
            &self.compiler,
            shader_properties,
            &resource.material_blueprint().default_dynamic_shader_pieces(),
        )
    }

    pub fn create_pipeline_state_caches(
        &mut self,
        material_blueprint_id: AssetId,
        mandatory_only: bool,
    ) -> Result<usize> {
        let resource = self
            .material_blueprints
            .get_mut(material_blueprint_id)
            .ok_or(PipelineError::AssetNotFound(material_blueprint_id))?;
        Ok(resource.create_pipeline_state_caches(&self.compiler, mandatory_only))
    }

    // === Compiler ===

    /// Publishes finished PSOs. Call once per frame.
    pub fn dispatch(&mut self) -> usize {
        self.compiler.dispatch(&mut self.material_blueprints)
    }

    pub fn flush_all_queues(&mut self) {
        self.compiler.flush_all_queues(&mut self.material_blueprints);
    }

    pub fn set_asynchronous_compilation_enabled(&mut self, enabled: bool) {
        self.compiler
            .set_asynchronous_compilation_enabled(enabled, &mut self.material_blueprints);
        self.settings.compiler.asynchronous_compilation = enabled;
    }

    pub fn set_number_of_compiler_threads(&mut self, number_of_compiler_threads: usize) -> Result<()> {
        self.compiler
            .set_number_of_compiler_threads(number_of_compiler_threads)?;
        self.settings.compiler.number_of_compiler_threads = self.compiler.number_of_compiler_threads();
        Ok(())
    }

    // === Hot Reload ===

    pub fn reload_shader_blueprint(&mut self, asset_id: AssetId, source_code: &str) -> Result<()> {
        self.flush_all_queues();
        self.context
            .library()
            .update_shader_blueprint_source(asset_id, source_code)?;
        log::info!("Shader blueprint {asset_id} reloaded");
        self.clear_caches();
        Ok(())
    }

    pub fn reload_shader_piece(&mut self, asset_id: AssetId, source_code: &str) -> Result<()> {
        self.flush_all_queues();
        self.context
            .library()
            .update_shader_piece_source(asset_id, source_code)?;
        log::info!("Shader piece {asset_id} reloaded");
        self.clear_caches();
        Ok(())
    }

    /// Flushes the compiler, then destroys every PSO, program and shader the
    /// caches own.
    pub fn clear_caches(&mut self) {
        self.compiler.flush_all_queues(&mut self.material_blueprints);
        let device = self.context.device();
        self.material_blueprints.clear_caches(device);
        self.context.shader_cache_manager().clear_cache(device);
    }

    // === Persistence ===

    pub fn save_shader_cache<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.context.shader_cache_manager().save_cache(writer)
    }

    pub fn load_shader_cache<R: Read>(&self, reader: &mut R) -> Result<LoadCacheSummary> {
        self.context
            .shader_cache_manager()
            .load_cache(self.context.library(), reader)
    }
}

impl Drop for RendererRuntime {
    fn drop(&mut self) {
        self.clear_caches();
    }
}
