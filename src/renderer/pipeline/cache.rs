//! Pipeline State Cache
//!
//! Top-level cache of a material blueprint: pipeline state signature → PSO.
//!
//! # Lookup
//!
//! [`PipelineStateCacheManager::get_pipeline_state_cache_by_combination`]
//! never stalls on a miss if anything usable exists:
//!
//! 1. The shader properties are optimized against the material blueprint
//!    (zero values and unknown properties dropped).
//! 2. A hit returns the entry's current PSO, which may still be a fallback.
//! 3. On a miss, non-mandatory shader properties are stripped one by one
//!    (lowest visual importance first, ties by ascending property id) until a
//!    signature with an exact, compiled entry is found. That PSO seeds the new
//!    entry as a fallback and the exact PSO is queued for compilation.
//! 4. Without a fallback the PSO is compiled inline when emergency
//!    compilation is allowed; otherwise the entry starts out null, the exact
//!    PSO is queued and the caller skips the draw.
//!
//! With asynchronous compilation disabled every miss compiles inline.
//!
//! # Ownership
//!
//! An entry owns its PSO only when it is not using a fallback; fallback
//! entries borrow another entry's handle. Only pending entries accept a
//! published PSO; an entry holding its exact PSO keeps it.
//!
//! # Generations
//!
//! Every manager, and every clear of a manager, draws a fresh generation from
//! a process-wide counter, so no two cache lifetimes ever share one, not even
//! across removing and re-adding a blueprint. Requests carry the generation
//! they were queued under: their programs are rejected by the program cache
//! and their PSOs destroyed at dispatch once the generation moved on.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::backend::{PipelineStateHandle, RenderDevice};
use crate::renderer::pipeline::combination::ShaderCombinationIterator;
use crate::renderer::pipeline::compiler::{CompilerRequest, PipelineStateCompiler};
use crate::renderer::pipeline::pipeline_id::PipelineStateSignatureId;
use crate::renderer::pipeline::pipeline_key::PipelineState;
use crate::renderer::pipeline::program_cache::ProgramCacheManager;
use crate::renderer::pipeline::signature::PipelineStateSignature;
use crate::resources::{
    DynamicShaderPiecesPerStage, MaterialBlueprint, MaterialShaderProperty, ShaderProperties,
};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone)]
pub struct PipelineStateCache {
    signature: PipelineStateSignature,
    pipeline_state: Option<PipelineStateHandle>,
    is_using_fallback: bool,
}

impl PipelineStateCache {
    #[inline]
    #[must_use]
    pub fn signature(&self) -> &PipelineStateSignature {
        &self.signature
    }

    /// Current PSO; a fallback while [`Self::is_using_fallback`].
    #[inline]
    #[must_use]
    pub fn pipeline_state(&self) -> Option<PipelineStateHandle> {
        self.pipeline_state
    }

    /// The exact PSO has not been published yet.
    #[inline]
    #[must_use]
    pub fn is_using_fallback(&self) -> bool {
        self.is_using_fallback
    }

    fn owned_pipeline_state(&self) -> Option<PipelineStateHandle> {
        if self.is_using_fallback {
            None
        } else {
            self.pipeline_state
        }
    }
}

pub struct PipelineStateCacheManager {
    material_blueprint: Arc<MaterialBlueprint>,
    program_cache_manager: Arc<ProgramCacheManager>,
    pipeline_state_caches: FxHashMap<PipelineStateSignatureId, PipelineStateCache>,
    generation: u64,
}

impl PipelineStateCacheManager {
    #[must_use]
    pub fn new(material_blueprint: Arc<MaterialBlueprint>) -> Self {
        let generation = next_generation();
        Self {
            material_blueprint,
            program_cache_manager: Arc::new(ProgramCacheManager::new(generation)),
            pipeline_state_caches: FxHashMap::default(),
            generation,
        }
    }

    #[inline]
    #[must_use]
    pub fn material_blueprint(&self) -> &Arc<MaterialBlueprint> {
        &self.material_blueprint
    }

    #[inline]
    #[must_use]
    pub fn program_cache_manager(&self) -> &ProgramCacheManager {
        &self.program_cache_manager
    }

    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pipeline_state_caches.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipeline_state_caches.is_empty()
    }

    #[must_use]
    pub fn get(&self, pipeline_state_signature_id: PipelineStateSignatureId) -> Option<&PipelineStateCache> {
        self.pipeline_state_caches.get(&pipeline_state_signature_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PipelineStateCache> {
        self.pipeline_state_caches.values()
    }

    /// Entry for a combination under the material blueprint's own pipeline
    /// state, without creating anything.
    #[must_use]
    pub fn find_pipeline_state_cache(
        &self,
        compiler: &PipelineStateCompiler,
        shader_properties: &ShaderProperties,
        dynamic_shader_pieces: &DynamicShaderPiecesPerStage,
    ) -> Option<&PipelineStateCache> {
        let signature = self.signature(
            compiler,
            self.material_blueprint.pipeline_state().serialized_hash(),
            shader_properties,
            dynamic_shader_pieces,
        );
        self.get(signature.pipeline_state_signature_id())
    }

    pub fn get_pipeline_state_cache_by_combination(
        &mut self,
        compiler: &PipelineStateCompiler,
        shader_properties: &ShaderProperties,
        dynamic_shader_pieces: &DynamicShaderPiecesPerStage,
        allow_emergency_synchronous_compilation: bool,
    ) -> Option<PipelineStateHandle> {
        let pipeline_state = self.material_blueprint.pipeline_state().clone();
        self.get_pipeline_state_cache_by_combination_with_state(
            compiler,
            &pipeline_state,
            shader_properties,
            dynamic_shader_pieces,
            allow_emergency_synchronous_compilation,
        )
    }

    /// Same as [`Self::get_pipeline_state_cache_by_combination`] for a
    /// caller-provided fixed-function state (different render target format,
    /// wireframe, ...).
    pub fn get_pipeline_state_cache_by_combination_with_state(
        &mut self,
        compiler: &PipelineStateCompiler,
        pipeline_state: &PipelineState,
        shader_properties: &ShaderProperties,
        dynamic_shader_pieces: &DynamicShaderPiecesPerStage,
        allow_emergency_synchronous_compilation: bool,
    ) -> Option<PipelineStateHandle> {
        let serialized_hash = pipeline_state.serialized_hash();
        let signature = self.signature(compiler, serialized_hash, shader_properties, dynamic_shader_pieces);
        let signature_id = signature.pipeline_state_signature_id();

        if let Some(cache) = self.pipeline_state_caches.get(&signature_id) {
            return cache.pipeline_state;
        }

        if !compiler.is_asynchronous_compilation_enabled() {
            return self.compile_synchronously(compiler, signature, pipeline_state);
        }

        if let Some(fallback) = self.find_fallback(compiler, &signature) {
            log::debug!(
                "Pipeline state {signature_id} of '{}': using fallback while compiling",
                self.material_blueprint.name()
            );
            self.insert_pending(compiler, signature, pipeline_state, Some(fallback));
            return Some(fallback);
        }

        if allow_emergency_synchronous_compilation {
            log::debug!(
                "Pipeline state {signature_id} of '{}': no fallback, compiling synchronously",
                self.material_blueprint.name()
            );
            return self.compile_synchronously(compiler, signature, pipeline_state);
        }

        log::warn!(
            "Pipeline state {signature_id} of '{}': no fallback available, skipping until compiled",
            self.material_blueprint.name()
        );
        self.insert_pending(compiler, signature, pipeline_state, None);
        None
    }

    /// Creates the caches of every shader property combination (or only the
    /// mandatory ones) that does not exist yet. Returns the number created.
    pub fn create_pipeline_state_caches(
        &mut self,
        compiler: &PipelineStateCompiler,
        dynamic_shader_pieces: &DynamicShaderPiecesPerStage,
        mandatory_only: bool,
    ) -> usize {
        let pipeline_state = self.material_blueprint.pipeline_state().clone();
        let serialized_hash = pipeline_state.serialized_hash();
        let asynchronous = compiler.is_asynchronous_compilation_enabled();
        let mut created = 0;

        let combinations =
            ShaderCombinationIterator::from_material_blueprint(&self.material_blueprint, mandatory_only);
        for shader_properties in combinations {
            let signature =
                self.signature(compiler, serialized_hash, &shader_properties, dynamic_shader_pieces);
            if self
                .pipeline_state_caches
                .contains_key(&signature.pipeline_state_signature_id())
            {
                continue;
            }
            if asynchronous {
                self.insert_pending(compiler, signature, &pipeline_state, None);
            } else if self
                .compile_synchronously(compiler, signature, &pipeline_state)
                .is_none()
            {
                log::warn!(
                    "Material blueprint '{}': pipeline state for {shader_properties:?} failed to compile",
                    self.material_blueprint.name()
                );
            }
            created += 1;
        }

        log::info!(
            "Material blueprint '{}': {created} pipeline state cache(s) created{}",
            self.material_blueprint.name(),
            if mandatory_only { " (mandatory only)" } else { "" }
        );
        created
    }

    /// Stores a compiled PSO in its pending entry. Results of another
    /// generation, for entries that no longer exist, or for entries that
    /// already hold their exact PSO are destroyed.
    pub fn publish(
        &mut self,
        device: &dyn RenderDevice,
        generation: u64,
        pipeline_state_signature_id: PipelineStateSignatureId,
        pipeline_state: Option<PipelineStateHandle>,
    ) {
        let cache = if generation == self.generation {
            self.pipeline_state_caches
                .get_mut(&pipeline_state_signature_id)
                .filter(|cache| cache.is_using_fallback)
        } else {
            None
        };
        let Some(cache) = cache else {
            log::debug!(
                "Pipeline state {pipeline_state_signature_id} of '{}' is stale, discarded",
                self.material_blueprint.name()
            );
            if let Some(pipeline_state) = pipeline_state {
                device.destroy_pipeline_state(pipeline_state);
            }
            return;
        };

        cache.pipeline_state = pipeline_state;
        cache.is_using_fallback = false;
        log::debug!(
            "Pipeline state {pipeline_state_signature_id} of '{}' published{}",
            self.material_blueprint.name(),
            if pipeline_state.is_none() { " (null)" } else { "" }
        );
    }

    /// Destroys every owned PSO and program, forgets all entries and moves
    /// to a new generation.
    pub fn clear_cache(&mut self, device: &dyn RenderDevice) {
        for cache in self.pipeline_state_caches.values() {
            if let Some(pipeline_state) = cache.owned_pipeline_state() {
                device.destroy_pipeline_state(pipeline_state);
            }
        }
        self.pipeline_state_caches.clear();
        self.generation = next_generation();
        self.program_cache_manager.clear_cache(device, self.generation);
    }

    fn signature(
        &self,
        compiler: &PipelineStateCompiler,
        serialized_hash: u32,
        shader_properties: &ShaderProperties,
        dynamic_shader_pieces: &DynamicShaderPiecesPerStage,
    ) -> PipelineStateSignature {
        PipelineStateSignature::new(
            &self.material_blueprint,
            compiler.context().library(),
            serialized_hash,
            self.material_blueprint.optimize_shader_properties(shader_properties),
            dynamic_shader_pieces.clone(),
        )
    }

    fn request(&self, signature: PipelineStateSignature, pipeline_state: &PipelineState) -> CompilerRequest {
        CompilerRequest::new(
            Arc::clone(&self.material_blueprint),
            Arc::clone(&self.program_cache_manager),
            signature,
            pipeline_state.clone(),
            self.generation,
        )
    }

    fn compile_synchronously(
        &mut self,
        compiler: &PipelineStateCompiler,
        signature: PipelineStateSignature,
        pipeline_state: &PipelineState,
    ) -> Option<PipelineStateHandle> {
        let signature_id = signature.pipeline_state_signature_id();
        let request = self.request(signature.clone(), pipeline_state);
        let compiled = compiler.instant_synchronous_compiler_request(request);
        self.pipeline_state_caches.insert(
            signature_id,
            PipelineStateCache {
                signature,
                pipeline_state: compiled,
                is_using_fallback: false,
            },
        );
        compiled
    }

    fn insert_pending(
        &mut self,
        compiler: &PipelineStateCompiler,
        signature: PipelineStateSignature,
        pipeline_state: &PipelineState,
        fallback: Option<PipelineStateHandle>,
    ) {
        let request = self.request(signature.clone(), pipeline_state);
        self.pipeline_state_caches.insert(
            signature.pipeline_state_signature_id(),
            PipelineStateCache {
                signature,
                pipeline_state: fallback,
                is_using_fallback: true,
            },
        );
        compiler.add_asynchronous_compiler_request(request);
    }

    /// Strips non-mandatory properties cumulatively until a compiled exact
    /// entry exists for the reduced signature.
    fn find_fallback(
        &self,
        compiler: &PipelineStateCompiler,
        signature: &PipelineStateSignature,
    ) -> Option<PipelineStateHandle> {
        let mut strippable: SmallVec<[&MaterialShaderProperty; 8]> = signature
            .shader_properties()
            .iter()
            .filter_map(|p| self.material_blueprint.shader_property(p.shader_property_id))
            .filter(|p| !p.is_mandatory())
            .collect();
        strippable.sort_by_key(|p| (p.visual_importance, p.shader_property_id));

        let mut shader_properties = signature.shader_properties().clone();
        for property in strippable {
            shader_properties.remove_property(property.shader_property_id);
            let candidate = PipelineStateSignature::new(
                &self.material_blueprint,
                compiler.context().library(),
                signature.serialized_pipeline_state_hash(),
                shader_properties.clone(),
                signature.dynamic_shader_pieces().clone(),
            );
            if let Some(cache) = self.pipeline_state_caches.get(&candidate.pipeline_state_signature_id())
                && !cache.is_using_fallback
                && cache.pipeline_state.is_some()
            {
                return cache.pipeline_state;
            }
        }
        None
    }
}
